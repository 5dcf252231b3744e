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

//! Mailbox repository (C4, spec §4.4). Mailbox objects and their `totalEmails`/
//! `unreadEmails` counters — mutation of the counters happens wherever an email's
//! `mailboxIds`/`keywords` change (the email repository), this crate only reads
//! and, for test setup, seeds mailbox rows directly.

use std::sync::Arc;

use store::key;
use store::model::MailboxItem;
use store::table::{Record, Table, WriteItem};
use store::{Result, StoreError};

pub struct MailboxRepository<T: Table> {
    table: Arc<T>,
}

impl<T: Table> MailboxRepository<T> {
    pub fn new(table: Arc<T>) -> Self {
        MailboxRepository { table }
    }

    pub async fn get_mailbox(&self, account: &str, mailbox_id: &str) -> Result<Option<MailboxItem>> {
        let pk = key::account_pk(account);
        match self.table.get_item(&pk, &key::mailbox_sk(mailbox_id)).await? {
            Some(record) => Ok(Some(
                serde_json::from_value(record.data)
                    .map_err(|e| StoreError::DeserializeError(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub async fn mailbox_exists(&self, account: &str, mailbox_id: &str) -> Result<bool> {
        Ok(self.get_mailbox(account, mailbox_id).await?.is_some())
    }

    /// Test/seed helper. Real counter maintenance lives with whichever subsystem
    /// mutates `mailboxIds`/`keywords` on an email (spec §4.4 "Non-goals": this
    /// repository does not itself recompute counters from a scan).
    pub async fn put_mailbox(&self, account: &str, item: &MailboxItem) -> Result<()> {
        let record = Record::new(
            key::account_pk(account),
            key::mailbox_sk(&item.mailbox_id),
            serde_json::to_value(item).map_err(|e| StoreError::SerializeError(e.to_string()))?,
        );
        self.table.transact_write(vec![WriteItem::Put(record)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::table::InMemoryTable;

    #[tokio::test]
    async fn put_then_get_mailbox() {
        let table = Arc::new(InMemoryTable::new());
        let repo = MailboxRepository::new(table);
        let item = MailboxItem {
            mailbox_id: "m1".into(),
            total_emails: 3,
            unread_emails: 1,
        };
        repo.put_mailbox("a1", &item).await.unwrap();

        let got = repo.get_mailbox("a1", "m1").await.unwrap().unwrap();
        assert_eq!(got.total_emails, 3);
        assert!(repo.mailbox_exists("a1", "m1").await.unwrap());
        assert!(!repo.mailbox_exists("a1", "missing").await.unwrap());
    }
}
