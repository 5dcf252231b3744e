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

//! Email repository (C3, spec §4.3): CRUD + list queries, transactional
//! mailbox-membership updates, soft-delete-aware reads.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use store::key;
use store::model::EmailItem;
use store::table::{Lsi, Record, Table, WriteItem};
use store::{Result, StoreError};

use crate::filter::StructuralFilter;

#[derive(Debug, Serialize, Deserialize)]
struct MembershipRow {
    email_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryEmailsRequest {
    pub filter: StructuralFilter,
    pub position: i64,
    pub anchor: Option<String>,
    pub anchor_offset: i64,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct QueryEmailsResult {
    pub ids: Vec<String>,
    pub position: i64,
    /// Only `Some` when the filter pinned `inMailbox` and the mailbox counter was
    /// readable (spec §4.9: "total is included only when inMailbox is set").
    pub total: Option<u64>,
}

pub struct EmailRepository<T: Table> {
    table: Arc<T>,
}

impl<T: Table> EmailRepository<T> {
    pub fn new(table: Arc<T>) -> Self {
        EmailRepository { table }
    }

    fn decode(record: Record) -> Result<EmailItem> {
        serde_json::from_value(record.data).map_err(|e| StoreError::DeserializeError(e.to_string()))
    }

    async fn get_raw(&self, account: &str, id: &str) -> Result<Option<EmailItem>> {
        let pk = key::account_pk(account);
        match self.table.get_item(&pk, &key::email_sk(id)).await? {
            Some(record) => Ok(Some(Self::decode(record)?)),
            None => Ok(None),
        }
    }

    /// `GetEmail`. Soft-deleted emails are NotFound to every caller except the cleanup
    /// and index workers, which use [`Self::get_email_internal`].
    pub async fn get_email(&self, account: &str, id: &str) -> Result<Option<EmailItem>> {
        Ok(self.get_raw(account, id).await?.filter(|e| e.is_live()))
    }

    pub async fn get_email_internal(&self, account: &str, id: &str) -> Result<Option<EmailItem>> {
        self.get_raw(account, id).await
    }

    /// Sorted by `receivedAt` ascending; soft-deleted excluded.
    pub async fn find_by_thread(&self, account: &str, thread_id: &str) -> Result<Vec<EmailItem>> {
        let pk = key::account_pk(account);
        let rows = self
            .table
            .query(&pk, Lsi::Lsi2, &key::thread_lsi2_prefix(thread_id))
            .await?;
        let mut items = Vec::with_capacity(rows.len());
        for record in rows {
            let item = Self::decode(record)?;
            if item.is_live() {
                items.push(item);
            }
        }
        items.sort_by_key(|e| e.received_at);
        Ok(items)
    }

    /// All membership rows for `mailbox_id`, live or not — used by the cleanup worker,
    /// which must see soft-deleted emails too.
    pub async fn query_emails_by_mailbox(&self, account: &str, mailbox_id: &str) -> Result<Vec<String>> {
        let pk = key::account_pk(account);
        let rows = self
            .table
            .query(&pk, Lsi::Lsi1, &key::mailbox_rcvd_lsi1_prefix(mailbox_id))
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for record in rows {
            let row: MembershipRow = serde_json::from_value(record.data)
                .map_err(|e| StoreError::DeserializeError(e.to_string()))?;
            ids.push(row.email_id);
        }
        Ok(ids)
    }

    /// Structural-filter-only query (spec §4.3 "QueryEmails policy"). `inMailbox`
    /// walks the per-mailbox LSI; its absence walks the account-wide `receivedAt` LSI.
    pub async fn query_emails(
        &self,
        account: &str,
        request: &QueryEmailsRequest,
    ) -> Result<QueryEmailsResult> {
        let pk = key::account_pk(account);

        let candidate_ids: Vec<String> = if let Some(mailbox_id) = &request.filter.in_mailbox {
            let rows = self
                .table
                .query(&pk, Lsi::Lsi1, &key::mailbox_rcvd_lsi1_prefix(mailbox_id))
                .await?;
            let mut ids = Vec::with_capacity(rows.len());
            for record in rows {
                let row: MembershipRow = serde_json::from_value(record.data)
                    .map_err(|e| StoreError::DeserializeError(e.to_string()))?;
                ids.push(row.email_id);
            }
            ids
        } else {
            let rows = self.table.query(&pk, Lsi::Lsi1, key::rcvd_lsi1_prefix()).await?;
            let mut ids = Vec::with_capacity(rows.len());
            for record in rows {
                ids.push(Self::decode(record)?.email_id);
            }
            ids
        };

        let mut items = Vec::with_capacity(candidate_ids.len());
        for id in &candidate_ids {
            if let Some(item) = self.get_email(account, id).await? {
                if request.filter.matches(&item) {
                    items.push(item);
                }
            }
        }
        // The LSI gives us receivedAt ordering already; re-assert the exact tie-break
        // (receivedAt desc, emailId desc) explicitly rather than relying on key layout.
        items.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| b.email_id.cmp(&a.email_id))
        });

        let total = if let Some(mailbox_id) = &request.filter.in_mailbox {
            crate::mailbox::MailboxRepository::new(self.table.clone())
                .get_mailbox(account, mailbox_id)
                .await?
                .map(|m| m.total_emails)
        } else {
            None
        };

        let start = resolve_start(&items, request)?;
        let end = items.len().min(start + request.limit.max(0));
        let ids = items[start.min(items.len())..end]
            .iter()
            .map(|e| e.email_id.clone())
            .collect();

        Ok(QueryEmailsResult {
            ids,
            position: start as i64,
            total,
        })
    }

    /// Post-filter used by the address (C5) and vector (C7) backend paths: applies
    /// the remaining structural conditions to an already-ordered candidate list,
    /// excluding soft-deleted emails, preserving input order.
    pub async fn filter_email_ids(
        &self,
        account: &str,
        ids: &[String],
        filter: &StructuralFilter,
    ) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.get_email(account, id).await? {
                if filter.matches(&item) {
                    out.push(id.clone());
                }
            }
        }
        Ok(out)
    }

    fn email_record(item: &EmailItem) -> Result<Record> {
        let message_id = item.message_id.first().cloned().unwrap_or_default();
        Ok(Record::new(
            key::account_pk(&item.account_id),
            key::email_sk(&item.email_id),
            serde_json::to_value(item).map_err(|e| StoreError::SerializeError(e.to_string()))?,
        )
        .with_lsi1(key::rcvd_lsi1sk(item.received_at, &item.email_id))
        .with_lsi2(key::thread_lsi2sk(&item.thread_id, item.received_at))
        .with_lsi3(key::msgid_lsi3sk(&message_id)))
    }

    fn membership_record(item: &EmailItem, mailbox_id: &str) -> Result<Record> {
        Ok(Record::new(
            key::account_pk(&item.account_id),
            key::mailbox_membership_sk(mailbox_id, &item.email_id),
            serde_json::to_value(MembershipRow {
                email_id: item.email_id.clone(),
            })
            .map_err(|e| StoreError::SerializeError(e.to_string()))?,
        )
        .with_lsi1(key::mailbox_rcvd_lsi1sk(
            mailbox_id,
            item.received_at,
            &item.email_id,
        )))
    }

    /// Fresh insert: the email row plus one membership row per entry in `mailboxIds`
    /// (invariant 1, spec §3).
    pub fn build_create_email_items(item: &EmailItem) -> Result<Vec<WriteItem>> {
        let mut items = vec![
            WriteItem::CheckVersion {
                pk: key::account_pk(&item.account_id),
                sk: key::email_sk(&item.email_id),
                expected_version: None,
            },
            WriteItem::Put(Self::email_record(item)?),
        ];
        for mailbox_id in &item.mailbox_ids {
            items.push(WriteItem::Put(Self::membership_record(item, mailbox_id)?));
        }
        Ok(items)
    }

    /// Email row + every membership row for it (spec §4.13 "destroy").
    pub fn build_delete_email_items(item: &EmailItem) -> Vec<WriteItem> {
        let mut items = vec![WriteItem::Delete {
            pk: key::account_pk(&item.account_id),
            sk: key::email_sk(&item.email_id),
        }];
        for mailbox_id in &item.mailbox_ids {
            items.push(WriteItem::Delete {
                pk: key::account_pk(&item.account_id),
                sk: key::mailbox_membership_sk(mailbox_id, &item.email_id),
            });
        }
        items
    }

    /// Rewrites `mailboxIds` transactionally: a `CheckVersion` precondition on the
    /// email row guards invariant 1 against a concurrent membership rewrite (spec
    /// §4.3 "Concurrency").
    pub async fn build_update_email_mailboxes_items(
        &self,
        account: &str,
        email_id: &str,
        new_mailbox_ids: &BTreeSet<String>,
    ) -> Result<Vec<WriteItem>> {
        let pk = key::account_pk(account);
        let record = self
            .table
            .get_item(&pk, &key::email_sk(email_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(email_id.to_string()))?;
        let mut item: EmailItem = Self::decode(record.clone())?;
        let old_mailbox_ids = item.mailbox_ids.clone();

        let mut items = vec![WriteItem::CheckVersion {
            pk: pk.clone(),
            sk: key::email_sk(email_id),
            expected_version: Some(record.version),
        }];

        for removed in old_mailbox_ids.difference(new_mailbox_ids) {
            items.push(WriteItem::Delete {
                pk: pk.clone(),
                sk: key::mailbox_membership_sk(removed, email_id),
            });
        }

        item.mailbox_ids = new_mailbox_ids.clone();
        for added in new_mailbox_ids.difference(&old_mailbox_ids) {
            items.push(WriteItem::Put(Self::membership_record(&item, added)?));
        }
        items.push(WriteItem::Put(Self::email_record(&item)?));

        Ok(items)
    }

    /// `UpdateSearchChunks(N)` (spec §4.12 step 9): unconditional write of the new
    /// chunk count, no `CheckVersion` precondition since it races nothing but itself.
    pub async fn build_update_search_chunks_items(
        &self,
        account: &str,
        email_id: &str,
        chunks: usize,
    ) -> Result<Vec<WriteItem>> {
        let pk = key::account_pk(account);
        let record = self
            .table
            .get_item(&pk, &key::email_sk(email_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(email_id.to_string()))?;
        let mut item: EmailItem = Self::decode(record)?;
        item.search_chunks = chunks;
        Ok(vec![WriteItem::Put(Self::email_record(&item)?)])
    }

    /// `UpdateSummary(summary, overwritePreview?)` (spec §4.12 step 7).
    pub async fn build_update_summary_items(
        &self,
        account: &str,
        email_id: &str,
        summary: &str,
        overwrite_preview: bool,
    ) -> Result<Vec<WriteItem>> {
        let pk = key::account_pk(account);
        let record = self
            .table
            .get_item(&pk, &key::email_sk(email_id))
            .await?
            .ok_or_else(|| StoreError::NotFound(email_id.to_string()))?;
        let mut item: EmailItem = Self::decode(record)?;
        item.summary = Some(summary.to_string());
        if overwrite_preview {
            item.preview = summary.to_string();
        }
        Ok(vec![WriteItem::Put(Self::email_record(&item)?)])
    }

    pub async fn commit(&self, items: Vec<WriteItem>) -> Result<()> {
        self.table.transact_write(items).await
    }
}

fn resolve_start(items: &[EmailItem], request: &QueryEmailsRequest) -> Result<usize> {
    let len = items.len() as i64;
    let base = if let Some(anchor) = &request.anchor {
        let anchor_index = items
            .iter()
            .position(|e| &e.email_id == anchor)
            .ok_or(StoreError::AnchorNotFound)? as i64;
        anchor_index + request.anchor_offset
    } else if request.position < 0 {
        len + request.position
    } else {
        request.position
    };
    Ok(base.clamp(0, len) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use store::model::BodyPart;
    use store::table::InMemoryTable;

    fn email(id: &str, mailbox: &str, ts: i64) -> EmailItem {
        EmailItem {
            account_id: "a1".into(),
            email_id: id.into(),
            blob_id: format!("blob-{id}"),
            thread_id: format!("t-{id}"),
            mailbox_ids: [mailbox.to_string()].into_iter().collect(),
            keywords: Default::default(),
            received_at: Utc.timestamp_opt(ts, 0).unwrap(),
            sent_at: None,
            size: 100,
            header_size: 10,
            has_attachment: false,
            subject: Some("Hi".into()),
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
    async fn create_then_get() {
        let table = Arc::new(InMemoryTable::new());
        let repo = EmailRepository::new(table);
        let e = email("e1", "m1", 1000);
        repo.commit(EmailRepository::<InMemoryTable>::build_create_email_items(&e).unwrap())
            .await
            .unwrap();

        let got = repo.get_email("a1", "e1").await.unwrap().unwrap();
        assert_eq!(got.email_id, "e1");
    }

    #[tokio::test]
    async fn query_by_mailbox_orders_receivedat_desc() {
        let table = Arc::new(InMemoryTable::new());
        let repo = EmailRepository::new(table);
        for (id, ts) in [("e1", 100), ("e2", 200), ("e3", 300)] {
            let e = email(id, "m1", ts);
            repo.commit(EmailRepository::<InMemoryTable>::build_create_email_items(&e).unwrap())
                .await
                .unwrap();
        }

        let result = repo
            .query_emails(
                "a1",
                &QueryEmailsRequest {
                    filter: StructuralFilter {
                        in_mailbox: Some("m1".into()),
                        ..Default::default()
                    },
                    limit: 25,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.ids, vec!["e3", "e2", "e1"]);
    }

    #[tokio::test]
    async fn soft_deleted_email_is_excluded_from_query_and_get() {
        let table = Arc::new(InMemoryTable::new());
        let repo = EmailRepository::new(table);
        let mut e = email("e1", "m1", 100);
        repo.commit(EmailRepository::<InMemoryTable>::build_create_email_items(&e).unwrap())
            .await
            .unwrap();
        e.deleted_at = Some(Utc::now());
        repo.commit(vec![WriteItem::Put(
            EmailRepository::<InMemoryTable>::email_record(&e).unwrap(),
        )])
        .await
        .unwrap();

        assert!(repo.get_email("a1", "e1").await.unwrap().is_none());
        assert!(repo
            .get_email_internal("a1", "e1")
            .await
            .unwrap()
            .is_some());
        let result = repo
            .query_emails(
                "a1",
                &QueryEmailsRequest {
                    filter: StructuralFilter {
                        in_mailbox: Some("m1".into()),
                        ..Default::default()
                    },
                    limit: 25,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(result.ids.is_empty());
    }

    #[tokio::test]
    async fn update_mailboxes_rewrites_membership_rows() {
        let table = Arc::new(InMemoryTable::new());
        let repo = EmailRepository::new(table);
        let e = email("e1", "m1", 100);
        repo.commit(EmailRepository::<InMemoryTable>::build_create_email_items(&e).unwrap())
            .await
            .unwrap();

        let new_ids: BTreeSet<String> = ["m2".to_string()].into_iter().collect();
        let items = repo
            .build_update_email_mailboxes_items("a1", "e1", &new_ids)
            .await
            .unwrap();
        repo.commit(items).await.unwrap();

        let got = repo.get_email("a1", "e1").await.unwrap().unwrap();
        assert_eq!(got.mailbox_ids, new_ids);
        assert!(repo.query_emails_by_mailbox("a1", "m1").await.unwrap().is_empty());
        assert_eq!(repo.query_emails_by_mailbox("a1", "m2").await.unwrap(), vec!["e1"]);
    }
}
