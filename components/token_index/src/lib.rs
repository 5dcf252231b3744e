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

//! Address-token index (C5, spec §4.5): written by the index worker (C12), read by
//! the query handler's address path (C9 via C8).

pub mod normalize;

use std::sync::Arc;

use store::key;
use store::model::EmailItem;
use store::table::{Lsi, Record, Table, WriteItem};
use store::Result;

pub const FIELDS: [&str; 4] = ["from", "to", "cc", "bcc"];

pub struct TokenIndex<T: Table> {
    table: Arc<T>,
}

impl<T: Table> TokenIndex<T> {
    pub fn new(table: Arc<T>) -> Self {
        TokenIndex { table }
    }

    fn addresses_for_field<'a>(item: &'a EmailItem, field: &str) -> &'a [store::model::EmailAddress] {
        match field {
            "from" => &item.from,
            "to" => &item.to,
            "cc" => &item.cc,
            "bcc" => &item.bcc,
            _ => &[],
        }
    }

    /// Delete-then-insert semantics (spec §4.12 step 8): every existing token row for
    /// this email, across all four fields, is removed before the fresh set is
    /// written, so re-indexing converges even if the address set shrank.
    pub async fn rewrite_email_tokens(&self, account: &str, item: &EmailItem) -> Result<()> {
        let pk = key::account_pk(account);
        let mut writes = Vec::new();

        for field in FIELDS {
            let existing = self
                .table
                .query(&pk, Lsi::Primary, &key::token_email_prefix(field))
                .await?;
            for record in existing {
                if let Some((_, email_id)) = key::parse_token_sk(&record.sk, field) {
                    if email_id == item.email_id {
                        writes.push(WriteItem::Delete {
                            pk: pk.clone(),
                            sk: record.sk.clone(),
                        });
                    }
                }
            }

            for address in Self::addresses_for_field(item, field) {
                for token in normalize::tokens_for_address(address) {
                    writes.push(WriteItem::Put(Record::new(
                        pk.clone(),
                        key::token_sk(field, &token, &item.email_id),
                        serde_json::Value::Null,
                    )));
                }
            }
        }

        if writes.is_empty() {
            return Ok(());
        }
        self.table.transact_write(writes).await
    }

    /// Deletes every token row for `email_id` across all fields, without writing
    /// replacements (spec §4.12 "Delete action").
    pub async fn delete_email_tokens(&self, account: &str, email_id: &str) -> Result<()> {
        let pk = key::account_pk(account);
        let mut deletes = Vec::new();
        for field in FIELDS {
            let existing = self
                .table
                .query(&pk, Lsi::Primary, &key::token_email_prefix(field))
                .await?;
            for record in existing {
                if let Some((_, id)) = key::parse_token_sk(&record.sk, field) {
                    if id == email_id {
                        deletes.push(WriteItem::Delete {
                            pk: pk.clone(),
                            sk: record.sk.clone(),
                        });
                    }
                }
            }
        }
        if deletes.is_empty() {
            return Ok(());
        }
        self.table.transact_write(deletes).await
    }

    /// `QueryTokens` (spec §4.5): a sort-key range scan returning `(token, emailId)`
    /// pairs in sort-key order, optionally reversed for descending callers.
    pub async fn query_tokens(
        &self,
        account: &str,
        field: &str,
        prefix: &str,
        asc: bool,
    ) -> Result<Vec<(String, String)>> {
        let pk = key::account_pk(account);
        let rows = self
            .table
            .query(&pk, Lsi::Primary, &key::token_prefix(field, prefix))
            .await?;
        let mut pairs: Vec<(String, String)> = rows
            .iter()
            .filter_map(|r| key::parse_token_sk(&r.sk, field))
            .map(|(token, email_id)| (token.to_string(), email_id.to_string()))
            .collect();
        if !asc {
            pairs.reverse();
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use store::model::{BodyPart, EmailAddress};
    use store::table::InMemoryTable;

    fn email(id: &str, from: &str) -> EmailItem {
        EmailItem {
            account_id: "a1".into(),
            email_id: id.into(),
            blob_id: "b".into(),
            thread_id: "t".into(),
            mailbox_ids: Default::default(),
            keywords: Default::default(),
            received_at: Utc::now(),
            sent_at: None,
            size: 0,
            header_size: 0,
            has_attachment: false,
            subject: None,
            sender: vec![],
            from: vec![EmailAddress {
                name: Some("Alice Smith".into()),
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
    async fn write_then_query_prefix() {
        let table = Arc::new(InMemoryTable::new());
        let index = TokenIndex::new(table);
        let e = email("e1", "alice@example.com");
        index.rewrite_email_tokens("a1", &e).await.unwrap();

        let hits = index.query_tokens("a1", "from", "ali", true).await.unwrap();
        assert!(hits.iter().any(|(tok, id)| tok == "alice" && id == "e1"));
    }

    #[tokio::test]
    async fn rewrite_converges_after_address_change() {
        let table = Arc::new(InMemoryTable::new());
        let index = TokenIndex::new(table);
        let e1 = email("e1", "alice@example.com");
        index.rewrite_email_tokens("a1", &e1).await.unwrap();

        let e2 = email("e1", "bob@example.org");
        index.rewrite_email_tokens("a1", &e2).await.unwrap();

        let alice_hits = index.query_tokens("a1", "from", "alice", true).await.unwrap();
        assert!(alice_hits.is_empty());
        let bob_hits = index.query_tokens("a1", "from", "bob", true).await.unwrap();
        assert_eq!(bob_hits.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_all_fields() {
        let table = Arc::new(InMemoryTable::new());
        let index = TokenIndex::new(table);
        let e = email("e1", "alice@example.com");
        index.rewrite_email_tokens("a1", &e).await.unwrap();
        index.delete_email_tokens("a1", "e1").await.unwrap();

        let hits = index.query_tokens("a1", "from", "", true).await.unwrap();
        assert!(hits.is_empty());
    }
}
