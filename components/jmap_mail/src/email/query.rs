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

//! `Email/query` (C9, spec §4.9): argument parsing plus the three-way route to
//! C3 (structural), C7/C5 (address), or C7 (vector).

use jmap::id::state_to_string;
use jmap::MethodError;
use mail_store::{EmailRepository, MailboxRepository, QueryEmailsRequest};
use search::{query_address, query_vector, PageRequest, Route};
use serde_json::{json, Value};
use state::StateLog;
use store::model::ObjectType;
use store::table::Table;
use token_index::TokenIndex;
use vector_store::{Embedder, VectorStore};

const DEFAULT_LIMIT: usize = 25;
const MAX_LIMIT: usize = 100;

pub struct EmailQueryContext<'a, T: Table, V: VectorStore, E: Embedder> {
    pub email_repo: &'a EmailRepository<T>,
    pub mailbox_repo: &'a MailboxRepository<T>,
    pub token_index: &'a TokenIndex<T>,
    pub vector_store: &'a V,
    pub embedder: &'a E,
    pub state_log: &'a StateLog<T>,
    pub overfetch_floor: usize,
}

pub async fn email_query<T: Table, V: VectorStore, E: Embedder>(
    account: &str,
    args: &Value,
    ctx: &EmailQueryContext<'_, T, V, E>,
) -> Result<Value, MethodError> {
    let filter_value = args.get("filter").cloned().unwrap_or_else(|| json!({}));
    let parsed = search::parse_filter(&filter_value)?;

    if let Some(sort) = args.get("sort") {
        validate_sort(sort)?;
    }

    let position = args.get("position").and_then(|v| v.as_i64()).unwrap_or(0);
    let anchor = args.get("anchor").and_then(|v| v.as_str());
    let anchor_offset = args.get("anchorOffset").and_then(|v| v.as_i64()).unwrap_or(0);
    let limit = args
        .get("limit")
        .and_then(|v| v.as_i64())
        .map(|n| if n < 0 { 0 } else { n as usize })
        .unwrap_or(DEFAULT_LIMIT)
        .min(MAX_LIMIT);
    let collapse_threads = args
        .get("collapseThreads")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let page = PageRequest {
        position,
        anchor,
        anchor_offset,
        limit,
    };

    let (ids, result_position, total) = match parsed.route() {
        Route::Structural => {
            let request = QueryEmailsRequest {
                filter: parsed.structural.clone(),
                position,
                anchor: anchor.map(String::from),
                anchor_offset,
                limit,
            };
            let result = ctx.email_repo.query_emails(account, &request).await?;
            (result.ids, result.position, result.total)
        }
        Route::Address => {
            let result = query_address(
                account,
                ctx.token_index,
                ctx.email_repo,
                &parsed,
                ctx.overfetch_floor,
                page,
            )
            .await?;
            let total = total_for_mailbox(ctx, account, &parsed).await?;
            (result.ids, result.position, total)
        }
        Route::Vector => {
            let result = query_vector(
                account,
                ctx.email_repo,
                ctx.vector_store,
                ctx.embedder,
                &parsed,
                ctx.overfetch_floor,
                page,
            )
            .await?;
            let total = total_for_mailbox(ctx, account, &parsed).await?;
            (result.ids, result.position, total)
        }
    };

    let query_state = ctx.state_log.get_current(account, ObjectType::Email).await?;

    let mut response = json!({
        "accountId": account,
        "queryState": state_to_string(query_state),
        "canCalculateChanges": false,
        "position": result_position,
        "ids": ids,
        "collapseThreads": collapse_threads,
    });
    if let Some(total) = total {
        response["total"] = json!(total);
    }
    Ok(response)
}

/// `total` is included only when `inMailbox` pins the query to one mailbox (spec
/// §4.9). The structural path gets this for free from the mailbox-scoped LSI walk;
/// the address/vector paths look it up separately since they don't walk that index.
async fn total_for_mailbox<T: Table, V: VectorStore, E: Embedder>(
    ctx: &EmailQueryContext<'_, T, V, E>,
    account: &str,
    parsed: &search::ParsedFilter,
) -> Result<Option<u64>, MethodError> {
    match &parsed.structural.in_mailbox {
        Some(mailbox_id) => Ok(ctx
            .mailbox_repo
            .get_mailbox(account, mailbox_id)
            .await?
            .map(|m| m.total_emails)),
        None => Ok(None),
    }
}

fn validate_sort(sort: &Value) -> Result<(), MethodError> {
    let entries = sort
        .as_array()
        .ok_or_else(|| MethodError::InvalidArguments("sort must be an array".into()))?;
    for entry in entries {
        let property = entry
            .get("property")
            .and_then(|p| p.as_str())
            .ok_or_else(|| MethodError::InvalidArguments("sort entry missing property".into()))?;
        if property != "receivedAt" {
            return Err(MethodError::UnsupportedSort(format!(
                "sorting by {property} is not supported"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mail_store::{EmailRepository, MailboxRepository};
    use state::StateLog;
    use std::sync::Arc;
    use store::model::{BodyPart, EmailAddress, EmailItem, MailboxItem};
    use store::table::InMemoryTable;
    use token_index::TokenIndex;
    use vector_store::{FakeEmbedder, InMemoryVectorStore};

    fn email(id: &str, mailbox: &str, from: &str, ts: i64) -> EmailItem {
        EmailItem {
            account_id: "a1".into(),
            email_id: id.into(),
            blob_id: "b".into(),
            thread_id: format!("t-{id}"),
            mailbox_ids: [mailbox.to_string()].into_iter().collect(),
            keywords: Default::default(),
            received_at: Utc.timestamp_opt(ts, 0).unwrap(),
            sent_at: None,
            size: 10,
            header_size: 0,
            has_attachment: false,
            subject: Some("hi".into()),
            sender: vec![],
            from: vec![EmailAddress {
                name: None,
                email: from.into(),
            }],
            to: vec![],
            cc: vec![],
            bcc: vec![],
            reply_to: vec![],
            message_id: vec![],
            in_reply_to: vec![],
            references: vec![],
            preview: String::new(),
            summary: None,
            body_structure: BodyPart::default(),
            text_body: vec![],
            html_body: vec![],
            attachments: vec![],
            search_chunks: 0,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn structural_query_includes_total_when_in_mailbox() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let mailbox_repo = MailboxRepository::new(table.clone());
        let token_index = TokenIndex::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let embedder = FakeEmbedder::new(8);
        let state_log = StateLog::new(table.clone());

        for (id, ts) in [("e1", 100), ("e2", 200)] {
            let item = email(id, "m1", "alice@example.com", ts);
            email_repo
                .commit(EmailRepository::<InMemoryTable>::build_create_email_items(&item).unwrap())
                .await
                .unwrap();
        }
        mailbox_repo
            .put_mailbox(
                "a1",
                &MailboxItem {
                    mailbox_id: "m1".into(),
                    total_emails: 2,
                    unread_emails: 0,
                },
            )
            .await
            .unwrap();

        let ctx = EmailQueryContext {
            email_repo: &email_repo,
            mailbox_repo: &mailbox_repo,
            token_index: &token_index,
            vector_store: &vector_store,
            embedder: &embedder,
            state_log: &state_log,
            overfetch_floor: 100,
        };

        let args = json!({"filter": {"inMailbox": "m1"}});
        let response = email_query("a1", &args, &ctx).await.unwrap();
        assert_eq!(response["ids"], json!(["e2", "e1"]));
        assert_eq!(response["total"], 2);
    }

    #[tokio::test]
    async fn address_query_has_no_total_without_in_mailbox() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let mailbox_repo = MailboxRepository::new(table.clone());
        let token_index = TokenIndex::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let embedder = FakeEmbedder::new(8);
        let state_log = StateLog::new(table.clone());

        let item = email("e1", "m1", "alice@example.com", 100);
        email_repo
            .commit(EmailRepository::<InMemoryTable>::build_create_email_items(&item).unwrap())
            .await
            .unwrap();
        token_index.rewrite_email_tokens("a1", &item).await.unwrap();

        let ctx = EmailQueryContext {
            email_repo: &email_repo,
            mailbox_repo: &mailbox_repo,
            token_index: &token_index,
            vector_store: &vector_store,
            embedder: &embedder,
            state_log: &state_log,
            overfetch_floor: 100,
        };

        let args = json!({"filter": {"from": "alice"}});
        let response = email_query("a1", &args, &ctx).await.unwrap();
        assert_eq!(response["ids"], json!(["e1"]));
        assert!(response.get("total").is_none());
    }

    #[tokio::test]
    async fn unsupported_sort_property_is_rejected() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let mailbox_repo = MailboxRepository::new(table.clone());
        let token_index = TokenIndex::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let embedder = FakeEmbedder::new(8);
        let state_log = StateLog::new(table);

        let ctx = EmailQueryContext {
            email_repo: &email_repo,
            mailbox_repo: &mailbox_repo,
            token_index: &token_index,
            vector_store: &vector_store,
            embedder: &embedder,
            state_log: &state_log,
            overfetch_floor: 100,
        };

        let args = json!({"filter": {}, "sort": [{"property": "subject"}]});
        let err = email_query("a1", &args, &ctx).await.unwrap_err();
        assert!(matches!(err, MethodError::UnsupportedSort(_)));
    }
}
