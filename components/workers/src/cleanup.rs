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

//! Mailbox cleanup worker (C13, spec §4.13): finishes a mailbox destroy by
//! sweeping every email that referenced it, one transaction per email.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use jmap_mail::blob::BlobStreamer;
use mail_store::EmailRepository;
use state::StateLog;
use store::model::{ChangeType, ObjectType};
use store::table::Table;
use store::Result;
use vector_store::VectorStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupMessage {
    pub account_id: String,
    pub mailbox_id: String,
}

/// `MailboxCleanup` (spec §4.13): `QueryEmailsByMailbox` then, per email, one of
/// skip / destroy / rewrite-mailboxIds, each its own transaction so one email's
/// failure doesn't block the rest of the sweep.
pub async fn process_cleanup_message<T, V>(
    message: &CleanupMessage,
    email_repo: &EmailRepository<T>,
    state_log: &StateLog<T>,
    vector_store: &V,
    token_index: &token_index::TokenIndex<T>,
    blob_streamer: Option<&dyn BlobStreamer>,
) -> Result<()>
where
    T: Table,
    V: VectorStore,
{
    let candidates = email_repo
        .query_emails_by_mailbox(&message.account_id, &message.mailbox_id)
        .await?;

    for email_id in candidates {
        if let Err(e) = process_one_email(message, &email_id, email_repo, state_log, vector_store, token_index, blob_streamer).await {
            error!(error = %e, email_id = %email_id, mailbox_id = %message.mailbox_id, "cleanup failed for email, will be redelivered");
            return Err(e);
        }
    }
    Ok(())
}

async fn process_one_email<T, V>(
    message: &CleanupMessage,
    email_id: &str,
    email_repo: &EmailRepository<T>,
    state_log: &StateLog<T>,
    vector_store: &V,
    token_index: &token_index::TokenIndex<T>,
    blob_streamer: Option<&dyn BlobStreamer>,
) -> Result<()>
where
    T: Table,
    V: VectorStore,
{
    let Some(item) = email_repo.get_email_internal(&message.account_id, email_id).await? else {
        // Destroyed by someone else already.
        return Ok(());
    };

    if !item.mailbox_ids.contains(&message.mailbox_id) {
        // Mailbox membership changed concurrently; nothing left for us to do.
        return Ok(());
    }

    if item.mailbox_ids.len() == 1 {
        // Only mailbox this email belonged to: destroy it outright.
        let mut items = EmailRepository::<T>::build_delete_email_items(&item);
        items.extend(
            state_log
                .build_append_items(&message.account_id, ObjectType::Email, email_id, ChangeType::Destroyed)
                .await?
                .0,
        );
        items.extend(
            state_log
                .build_append_items(&message.account_id, ObjectType::Thread, &item.thread_id, ChangeType::Updated)
                .await?
                .0,
        );
        email_repo.commit(items).await?;

        let mut keys: Vec<String> = (0..item.search_chunks).map(|n| format!("{email_id}#{n}")).collect();
        keys.push(format!("{email_id}#subject"));
        keys.push(format!("{email_id}#summary"));
        if let Err(e) = vector_store.delete_vectors(&message.account_id, &keys).await {
            warn!(error = %e, email_id = %email_id, "best-effort vector cleanup failed after destroy");
        }
        if let Err(e) = token_index.delete_email_tokens(&message.account_id, email_id).await {
            warn!(error = %e, email_id = %email_id, "best-effort token cleanup failed after destroy");
        }
        if let Some(streamer) = blob_streamer {
            let _ = streamer.read(&message.account_id, &item.blob_id).await;
        }
    } else {
        // Still present in other mailboxes: just drop this membership.
        let mut new_mailbox_ids = item.mailbox_ids.clone();
        new_mailbox_ids.remove(&message.mailbox_id);
        let mut items = email_repo
            .build_update_email_mailboxes_items(&message.account_id, email_id, &new_mailbox_ids)
            .await?;
        items.extend(
            state_log
                .build_append_items(&message.account_id, ObjectType::Email, email_id, ChangeType::Updated)
                .await?
                .0,
        );
        email_repo.commit(items).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use store::model::{BodyPart, EmailItem};
    use store::table::InMemoryTable;
    use token_index::TokenIndex;
    use vector_store::InMemoryVectorStore;

    fn email(id: &str, mailboxes: &[&str]) -> EmailItem {
        EmailItem {
            account_id: "a1".into(),
            email_id: id.into(),
            blob_id: "b".into(),
            thread_id: "t1".into(),
            mailbox_ids: mailboxes.iter().map(|s| s.to_string()).collect(),
            keywords: Default::default(),
            received_at: Utc::now(),
            sent_at: None,
            size: 0,
            header_size: 0,
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
    async fn sole_mailbox_destroys_email() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let state_log = StateLog::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let token_index = TokenIndex::new(table);

        let item = email("e1", &["m1"]);
        email_repo
            .commit(EmailRepository::<InMemoryTable>::build_create_email_items(&item).unwrap())
            .await
            .unwrap();

        let message = CleanupMessage {
            account_id: "a1".into(),
            mailbox_id: "m1".into(),
        };
        process_cleanup_message(&message, &email_repo, &state_log, &vector_store, &token_index, None)
            .await
            .unwrap();

        assert!(email_repo.get_email_internal("a1", "e1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn other_mailbox_keeps_email_with_membership_removed() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let state_log = StateLog::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let token_index = TokenIndex::new(table);

        let item = email("e1", &["m1", "m2"]);
        email_repo
            .commit(EmailRepository::<InMemoryTable>::build_create_email_items(&item).unwrap())
            .await
            .unwrap();

        let message = CleanupMessage {
            account_id: "a1".into(),
            mailbox_id: "m1".into(),
        };
        process_cleanup_message(&message, &email_repo, &state_log, &vector_store, &token_index, None)
            .await
            .unwrap();

        let updated = email_repo.get_email_internal("a1", "e1").await.unwrap().unwrap();
        assert!(!updated.mailbox_ids.contains("m1"));
        assert!(updated.mailbox_ids.contains("m2"));
    }

    #[tokio::test]
    async fn already_destroyed_email_is_skipped() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let state_log = StateLog::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let token_index = TokenIndex::new(table);

        let message = CleanupMessage {
            account_id: "a1".into(),
            mailbox_id: "m1".into(),
        };
        process_cleanup_message(&message, &email_repo, &state_log, &vector_store, &token_index, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrently_removed_membership_is_skipped() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let state_log = StateLog::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let token_index = TokenIndex::new(table);

        // Email never belonged to m1 at all by the time we look.
        let item = email("e1", &["m2"]);
        email_repo
            .commit(EmailRepository::<InMemoryTable>::build_create_email_items(&item).unwrap())
            .await
            .unwrap();

        let message = CleanupMessage {
            account_id: "a1".into(),
            mailbox_id: "m1".into(),
        };
        process_cleanup_message(&message, &email_repo, &state_log, &vector_store, &token_index, None)
            .await
            .unwrap();

        let unchanged = email_repo.get_email_internal("a1", "e1").await.unwrap().unwrap();
        assert!(unchanged.mailbox_ids.contains("m2"));
    }
}
