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

//! `Thread/get` (C10, spec §4.10): each thread's member emails ordered by
//! `receivedAt`, soft-deleted members excluded.

use jmap::id::state_to_string;
use jmap::MethodError;
use mail_store::EmailRepository;
use serde_json::{json, Value};
use state::StateLog;
use store::model::ObjectType;
use store::table::Table;

pub async fn thread_get<T: Table>(
    account: &str,
    args: &Value,
    email_repo: &EmailRepository<T>,
    state_log: &StateLog<T>,
) -> Result<Value, MethodError> {
    let ids = args
        .get("ids")
        .and_then(|v| v.as_array())
        .ok_or_else(|| MethodError::InvalidArguments("ids must be an array of strings".into()))?;

    let mut list = Vec::new();
    let mut not_found = Vec::new();

    for id in ids {
        let id = id
            .as_str()
            .ok_or_else(|| MethodError::InvalidArguments("ids must be strings".into()))?;
        let members = email_repo.find_by_thread(account, id).await?;
        if members.is_empty() {
            not_found.push(Value::String(id.to_string()));
            continue;
        }
        list.push(json!({
            "id": id,
            "emailIds": members.iter().map(|e| e.email_id.clone()).collect::<Vec<_>>(),
        }));
    }

    let state = state_log.get_current(account, ObjectType::Thread).await?;

    Ok(json!({
        "accountId": account,
        "state": state_to_string(state),
        "list": list,
        "notFound": not_found,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mail_store::EmailRepository;
    use std::sync::Arc;
    use store::model::{BodyPart, EmailItem};
    use store::table::InMemoryTable;

    fn email(id: &str, thread: &str, ts: i64) -> EmailItem {
        EmailItem {
            account_id: "a1".into(),
            email_id: id.into(),
            blob_id: format!("blob-{id}"),
            thread_id: thread.into(),
            mailbox_ids: ["m1".to_string()].into_iter().collect(),
            keywords: Default::default(),
            received_at: Utc.timestamp_opt(ts, 0).unwrap(),
            sent_at: None,
            size: 10,
            header_size: 5,
            has_attachment: false,
            subject: None,
            sender: vec![],
            from: vec![],
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
    async fn returns_members_ordered_by_received_at() {
        let table = Arc::new(InMemoryTable::new());
        let repo = EmailRepository::new(table.clone());
        for (id, ts) in [("e2", 200), ("e1", 100)] {
            repo.commit(EmailRepository::<InMemoryTable>::build_create_email_items(&email(
                id, "t1", ts,
            ))
            .unwrap())
            .await
            .unwrap();
        }
        let state_log = StateLog::new(table);

        let args = json!({"ids": ["t1"]});
        let response = thread_get("a1", &args, &repo, &state_log).await.unwrap();
        assert_eq!(response["list"][0]["emailIds"], json!(["e1", "e2"]));
    }

    #[tokio::test]
    async fn unknown_thread_is_not_found() {
        let table = Arc::new(InMemoryTable::new());
        let repo = EmailRepository::new(table.clone());
        let state_log = StateLog::new(table);

        let args = json!({"ids": ["missing"]});
        let response = thread_get("a1", &args, &repo, &state_log).await.unwrap();
        assert_eq!(response["notFound"], json!(["missing"]));
    }
}
