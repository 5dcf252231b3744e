/*
 * Copyright (c) 2020-2022, Stalwart Labs Ltd.
 *
 * This file is part of the Stalwart JMAP Server.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of
 * the License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 * in the LICENSE file at the top-level directory of this distribution.
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 * You can be released from the requirements of the AGPLv3 license by
 * purchasing a commercial license. Please contact licensing@stalw.art
 * for more details.
*/

//! `Email/get` (C10, spec §4.10): property filtering, defaulted container shapes,
//! body-value resolution, and `header:*` properties.

use jmap::id::state_to_string;
use jmap::MethodError;
use mail_store::EmailRepository;
use serde_json::{json, Map, Value};
use state::StateLog;
use store::model::{BodyPart, EmailAddress, EmailItem, ObjectType};
use store::table::Table;

use crate::blob::{BlobStreamer, CharsetDecoder};
use crate::header::{evaluate, HeaderParser, HeaderProperty};

const DEFAULT_BODY_PROPERTIES: [&str; 7] = [
    "partId", "type", "blobId", "size", "charset", "disposition", "name",
];

pub struct EmailGetContext<'a, T: Table> {
    pub email_repo: &'a EmailRepository<T>,
    pub state_log: &'a StateLog<T>,
    pub blob_streamer: &'a dyn BlobStreamer,
    pub charset_decoder: &'a dyn CharsetDecoder,
    pub header_parser: &'a dyn HeaderParser,
    pub default_max_body_value_bytes: usize,
}

pub async fn email_get<T: Table>(
    account: &str,
    args: &Value,
    ctx: &EmailGetContext<'_, T>,
) -> Result<Value, MethodError> {
    let ids = args
        .get("ids")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MethodError::InvalidArguments("ids must be an array of strings".into()))?;
    let mut id_strings = Vec::with_capacity(ids.len());
    for id in ids {
        id_strings.push(
            id.as_str()
                .ok_or_else(|| MethodError::InvalidArguments("ids must be strings".into()))?
                .to_string(),
        );
    }

    let properties: Option<Vec<String>> = args.get("properties").and_then(|v| v.as_array()).map(|a| {
        a.iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect()
    });
    let body_properties: Vec<String> = args
        .get("bodyProperties")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_else(|| DEFAULT_BODY_PROPERTIES.iter().map(|s| s.to_string()).collect());
    let fetch_all = args.get("fetchAllBodyValues").and_then(|v| v.as_bool()).unwrap_or(false);
    let fetch_text = args
        .get("fetchTextBodyValues")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let fetch_html = args
        .get("fetchHTMLBodyValues")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let max_body_value_bytes = args
        .get("maxBodyValueBytes")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(ctx.default_max_body_value_bytes)
        .min(ctx.default_max_body_value_bytes);

    let mut list = Vec::new();
    let mut not_found = Vec::new();

    for id in &id_strings {
        match ctx.email_repo.get_email(account, id).await? {
            Some(item) => {
                let rendered = render_email(
                    &item,
                    properties.as_deref(),
                    &body_properties,
                    fetch_all,
                    fetch_text,
                    fetch_html,
                    max_body_value_bytes,
                    ctx,
                )
                .await?;
                list.push(rendered);
            }
            None => not_found.push(Value::String(id.clone())),
        }
    }

    let state = ctx.state_log.get_current(account, ObjectType::Email).await?;

    Ok(json!({
        "accountId": account,
        "state": state_to_string(state),
        "list": list,
        "notFound": not_found,
    }))
}

#[allow(clippy::too_many_arguments)]
async fn render_email<T: Table>(
    item: &EmailItem,
    properties: Option<&[String]>,
    body_properties: &[String],
    fetch_all: bool,
    fetch_text: bool,
    fetch_html: bool,
    max_body_value_bytes: usize,
    ctx: &EmailGetContext<'_, T>,
) -> Result<Value, MethodError> {
    let wants = |prop: &str| properties.map(|p| p.iter().any(|x| x == prop)).unwrap_or(true);

    let mut out = Map::new();
    // The id is always present (spec §4.10), regardless of `properties`.
    out.insert("id".into(), Value::String(item.email_id.clone()));

    if wants("blobId") {
        out.insert("blobId".into(), Value::String(item.blob_id.clone()));
    }
    if wants("threadId") {
        out.insert("threadId".into(), Value::String(item.thread_id.clone()));
    }
    if wants("mailboxIds") {
        let mut map = Map::new();
        for id in &item.mailbox_ids {
            map.insert(id.clone(), Value::Bool(true));
        }
        out.insert("mailboxIds".into(), Value::Object(map));
    }
    if wants("keywords") {
        let mut map = Map::new();
        for kw in &item.keywords {
            map.insert(kw.clone(), Value::Bool(true));
        }
        out.insert("keywords".into(), Value::Object(map));
    }
    if wants("receivedAt") {
        out.insert("receivedAt".into(), Value::String(item.received_at.to_rfc3339()));
    }
    if wants("sentAt") {
        out.insert(
            "sentAt".into(),
            item.sent_at.map(|d| Value::String(d.to_rfc3339())).unwrap_or(Value::Null),
        );
    }
    if wants("size") {
        out.insert("size".into(), json!(item.size));
    }
    if wants("hasAttachment") {
        out.insert("hasAttachment".into(), Value::Bool(item.has_attachment));
    }
    if wants("subject") {
        out.insert(
            "subject".into(),
            item.subject.clone().map(Value::String).unwrap_or(Value::Null),
        );
    }
    if wants("preview") {
        out.insert("preview".into(), Value::String(item.preview.clone()));
    }

    for (prop, addresses) in [
        ("sender", &item.sender),
        ("from", &item.from),
        ("to", &item.to),
        ("cc", &item.cc),
        ("bcc", &item.bcc),
        ("replyTo", &item.reply_to),
    ] {
        if wants(prop) {
            out.insert(prop.into(), address_list_or_null(addresses));
        }
    }

    for (prop, ids) in [
        ("messageId", &item.message_id),
        ("inReplyTo", &item.in_reply_to),
        ("references", &item.references),
    ] {
        if wants(prop) {
            out.insert(prop.into(), string_list_or_null(ids));
        }
    }

    if wants("bodyStructure") {
        out.insert("bodyStructure".into(), render_full_part(&item.body_structure));
    }
    if wants("textBody") {
        out.insert(
            "textBody".into(),
            render_part_list(&item.text_body, &item.body_structure, body_properties),
        );
    }
    if wants("htmlBody") {
        out.insert(
            "htmlBody".into(),
            render_part_list(&item.html_body, &item.body_structure, body_properties),
        );
    }
    if wants("attachments") {
        out.insert(
            "attachments".into(),
            render_part_list(&item.attachments, &item.body_structure, body_properties),
        );
    }

    if wants("bodyValues") && (fetch_all || fetch_text || fetch_html) {
        let part_ids = body_value_part_ids(item, fetch_all, fetch_text, fetch_html);
        let mut values = Map::new();
        for part_id in part_ids {
            if let Some(part) = item.body_structure.find(&part_id) {
                let rendered = render_body_value(&item.account_id, part, ctx, max_body_value_bytes).await?;
                values.insert(part_id, rendered);
            }
        }
        out.insert("bodyValues".into(), Value::Object(values));
    }

    if let Some(properties) = properties {
        for property in properties {
            if let Some(parsed) = HeaderProperty::parse(property) {
                let parsed = parsed?;
                let raw_headers = ctx
                    .blob_streamer
                    .read(&item.account_id, &item.blob_id)
                    .await?;
                let header_bytes = &raw_headers[..raw_headers.len().min(item.header_size)];
                out.insert(
                    property.clone(),
                    evaluate(ctx.header_parser, header_bytes, &parsed),
                );
            }
        }
    }

    Ok(Value::Object(out))
}

fn address_list_or_null(addresses: &[EmailAddress]) -> Value {
    if addresses.is_empty() {
        Value::Null
    } else {
        Value::Array(
            addresses
                .iter()
                .map(|a| json!({"name": a.name, "email": a.email}))
                .collect(),
        )
    }
}

fn string_list_or_null(items: &[String]) -> Value {
    if items.is_empty() {
        Value::Null
    } else {
        Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
    }
}

fn render_full_part(part: &BodyPart) -> Value {
    json!({
        "partId": part.part_id,
        "type": part.media_type,
        "blobId": part.blob_id,
        "size": part.size,
        "charset": part.charset,
        "disposition": part.disposition,
        "name": part.name,
        "subParts": part.sub_parts.iter().map(render_full_part).collect::<Vec<_>>(),
    })
}

/// Renders a stored `list<partId>` to full `BodyPart` objects, filtered to
/// `bodyProperties`. A part ID with no match in `bodyStructure` renders as a stub
/// containing only `partId` (spec §4.10).
fn render_part_list(part_ids: &[String], structure: &BodyPart, body_properties: &[String]) -> Value {
    Value::Array(
        part_ids
            .iter()
            .map(|id| match structure.find(id) {
                Some(part) => render_filtered_part(part, body_properties),
                None => json!({"partId": id}),
            })
            .collect(),
    )
}

fn render_filtered_part(part: &BodyPart, body_properties: &[String]) -> Value {
    let mut out = Map::new();
    let wants = |prop: &str| body_properties.iter().any(|p| p == prop);

    if wants("partId") {
        out.insert("partId".into(), Value::String(part.part_id.clone()));
    }
    if wants("type") {
        if let Some(t) = &part.media_type {
            out.insert("type".into(), Value::String(t.clone()));
        }
    }
    if wants("blobId") {
        if let Some(b) = &part.blob_id {
            out.insert("blobId".into(), Value::String(b.clone()));
        }
    }
    if wants("size") {
        out.insert("size".into(), json!(part.size));
    }
    if wants("charset") {
        if let Some(c) = &part.charset {
            out.insert("charset".into(), Value::String(c.clone()));
        }
    }
    if wants("disposition") {
        if let Some(d) = &part.disposition {
            out.insert("disposition".into(), Value::String(d.clone()));
        }
    }
    if wants("name") {
        if let Some(n) = &part.name {
            out.insert("name".into(), Value::String(n.clone()));
        }
    }
    Value::Object(out)
}

/// Body-value part-ID selection (spec §4.10): `fetchAllBodyValues` walks every
/// `text/*` descendant; `fetchHTMLBodyValues` falls back to `textBody` when
/// `htmlBody` is empty.
fn body_value_part_ids(item: &EmailItem, fetch_all: bool, fetch_text: bool, fetch_html: bool) -> Vec<String> {
    let mut ids = Vec::new();
    if fetch_all {
        item.body_structure.walk(&mut |part| {
            if part.media_type.as_deref().map(|t| t.starts_with("text/")).unwrap_or(false) {
                ids.push(part.part_id.clone());
            }
        });
    }
    if fetch_text {
        ids.extend(item.text_body.iter().cloned());
    }
    if fetch_html {
        if item.html_body.is_empty() {
            ids.extend(item.text_body.iter().cloned());
        } else {
            ids.extend(item.html_body.iter().cloned());
        }
    }
    ids.sort();
    ids.dedup();
    ids
}

async fn render_body_value<T: Table>(
    account_id: &str,
    part: &BodyPart,
    ctx: &EmailGetContext<'_, T>,
    max_body_value_bytes: usize,
) -> Result<Value, MethodError> {
    let Some(blob_id) = &part.blob_id else {
        return Ok(json!({"value": "", "isEncodingProblem": true, "isTruncated": false}));
    };

    let bytes = match ctx.blob_streamer.read(account_id, blob_id).await {
        Ok(b) => b,
        Err(_) => {
            return Ok(json!({"value": "", "isEncodingProblem": true, "isTruncated": false}));
        }
    };

    let is_truncated = bytes.len() > max_body_value_bytes;
    let truncated = &bytes[..bytes.len().min(max_body_value_bytes)];

    match ctx.charset_decoder.decode(truncated, part.charset.as_deref()) {
        Ok(value) => Ok(json!({"value": value, "isEncodingProblem": false, "isTruncated": is_truncated})),
        Err(()) => Ok(json!({"value": "", "isEncodingProblem": true, "isTruncated": is_truncated})),
    }
}
