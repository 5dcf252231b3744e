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

//! The wide key-value table abstraction (spec §3, §9 "Transactions"). `Table` is the
//! capability every repository is generic over; [`InMemoryTable`] is the only backend
//! this core ships (a real DynamoDB/RocksDB binding is deployment infrastructure, out
//! of scope per spec §1).

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub pk: String,
    pub sk: String,
    pub lsi1sk: Option<String>,
    pub lsi2sk: Option<String>,
    pub lsi3sk: Option<String>,
    pub data: Value,
    /// Optimistic-concurrency token, bumped on every overwrite. Used by
    /// [`WriteItem::CheckVersion`] to fail a transaction whose precondition no longer
    /// holds (spec §4.3 "Concurrency").
    pub version: u64,
}

impl Record {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>, data: Value) -> Self {
        Record {
            pk: pk.into(),
            sk: sk.into(),
            lsi1sk: None,
            lsi2sk: None,
            lsi3sk: None,
            data,
            version: 0,
        }
    }

    pub fn with_lsi1(mut self, lsi1sk: impl Into<String>) -> Self {
        self.lsi1sk = Some(lsi1sk.into());
        self
    }

    pub fn with_lsi2(mut self, lsi2sk: impl Into<String>) -> Self {
        self.lsi2sk = Some(lsi2sk.into());
        self
    }

    pub fn with_lsi3(mut self, lsi3sk: impl Into<String>) -> Self {
        self.lsi3sk = Some(lsi3sk.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum WriteItem {
    Put(Record),
    Delete { pk: String, sk: String },
    /// Fails the whole transaction with [`StoreError::TransactionConflict`] unless the
    /// item at `(pk, sk)` currently has `expected_version` (`None` means "must not
    /// exist"). Lets repositories implement invariant-preserving read-modify-write.
    CheckVersion {
        pk: String,
        sk: String,
        expected_version: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lsi {
    Primary,
    Lsi1,
    Lsi2,
    Lsi3,
}

#[async_trait]
pub trait Table: Send + Sync {
    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Record>>;

    /// Rows under `pk` whose chosen sort key (primary `sk`, or one of the LSIs) begins
    /// with `prefix`, ordered ascending by that sort key.
    async fn query(&self, pk: &str, index: Lsi, prefix: &str) -> Result<Vec<Record>>;

    /// Applies every item atomically: either all succeed or none are visible.
    async fn transact_write(&self, items: Vec<WriteItem>) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryTable {
    rows: Mutex<BTreeMap<(String, String), Record>>,
}

impl InMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn sort_key_for<'a>(record: &'a Record, index: Lsi) -> Option<&'a str> {
        match index {
            Lsi::Primary => Some(record.sk.as_str()),
            Lsi::Lsi1 => record.lsi1sk.as_deref(),
            Lsi::Lsi2 => record.lsi2sk.as_deref(),
            Lsi::Lsi3 => record.lsi3sk.as_deref(),
        }
    }
}

#[async_trait]
impl Table for InMemoryTable {
    async fn get_item(&self, pk: &str, sk: &str) -> Result<Option<Record>> {
        Ok(self.rows.lock().get(&(pk.to_string(), sk.to_string())).cloned())
    }

    async fn query(&self, pk: &str, index: Lsi, prefix: &str) -> Result<Vec<Record>> {
        let rows = self.rows.lock();
        let mut matches: Vec<Record> = rows
            .values()
            .filter(|r| r.pk == pk)
            .filter_map(|r| {
                Self::sort_key_for(r, index)
                    .filter(|sk| sk.starts_with(prefix))
                    .map(|_| r.clone())
            })
            .collect();
        matches.sort_by(|a, b| {
            Self::sort_key_for(a, index)
                .unwrap_or_default()
                .cmp(Self::sort_key_for(b, index).unwrap_or_default())
        });
        Ok(matches)
    }

    async fn transact_write(&self, items: Vec<WriteItem>) -> Result<()> {
        let mut rows = self.rows.lock();

        for item in &items {
            if let WriteItem::CheckVersion {
                pk,
                sk,
                expected_version,
            } = item
            {
                let current = rows.get(&(pk.clone(), sk.clone())).map(|r| r.version);
                if current != *expected_version {
                    return Err(StoreError::TransactionConflict(format!(
                        "version mismatch for {}/{}",
                        pk, sk
                    )));
                }
            }
        }

        for item in items {
            match item {
                WriteItem::Put(mut record) => {
                    let key = (record.pk.clone(), record.sk.clone());
                    let next_version = rows.get(&key).map(|r| r.version + 1).unwrap_or(0);
                    record.version = next_version;
                    rows.insert(key, record);
                }
                WriteItem::Delete { pk, sk } => {
                    rows.remove(&(pk, sk));
                }
                WriteItem::CheckVersion { .. } => {}
            }
        }

        Ok(())
    }
}
