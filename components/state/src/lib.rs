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

//! Per-account, per-object-type monotone counter + append-only change log (C2, spec §4.2).

use std::sync::Arc;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use store::key;
use store::model::{ChangeRecord, ChangeType, ObjectType};
use store::table::{Lsi, Record, Table, WriteItem};
use store::{Result, StoreError};

/// The payload stored at `STATE#<type>#CHG#<n>`. `occurred_at` is purge-only metadata;
/// it never reaches the public [`ChangeRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChangeLogEntry {
    object_id: String,
    change_type: ChangeType,
    state: u64,
    occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Counter {
    current: u64,
}

pub struct StateLog<T: Table> {
    table: Arc<T>,
}

impl<T: Table> StateLog<T> {
    pub fn new(table: Arc<T>) -> Self {
        StateLog { table }
    }

    async fn read_counter(&self, account: &str, object_type: ObjectType) -> Result<(u64, Option<u64>)> {
        let pk = key::account_pk(account);
        let sk = key::state_current_sk(object_type.as_str());
        match self.table.get_item(&pk, &sk).await? {
            Some(record) => {
                let counter: Counter = serde_json::from_value(record.data)
                    .map_err(|e| StoreError::DeserializeError(e.to_string()))?;
                Ok((counter.current, Some(record.version)))
            }
            None => Ok((0, None)),
        }
    }

    pub async fn get_current(&self, account: &str, object_type: ObjectType) -> Result<u64> {
        Ok(self.read_counter(account, object_type).await?.0)
    }

    /// Builds the write items an append would need, without executing them, so the
    /// caller can fold them into one transaction alongside the business mutation
    /// (spec §4.2 "same transaction as the business mutation").
    pub async fn build_append_items(
        &self,
        account: &str,
        object_type: ObjectType,
        object_id: &str,
        change_type: ChangeType,
    ) -> Result<(Vec<WriteItem>, u64)> {
        self.build_append_multi_items(account, object_type, &[(object_id.to_string(), change_type)])
            .await
    }

    /// Multi-object variant (spec §4.2): consumes contiguous state numbers, one change
    /// row per entry plus one counter update, in items the caller commits together.
    pub async fn build_append_multi_items(
        &self,
        account: &str,
        object_type: ObjectType,
        changes: &[(String, ChangeType)],
    ) -> Result<(Vec<WriteItem>, u64)> {
        let pk = key::account_pk(account);
        let (current, version) = self.read_counter(account, object_type).await?;

        let mut items = Vec::with_capacity(changes.len() + 2);
        items.push(WriteItem::CheckVersion {
            pk: pk.clone(),
            sk: key::state_current_sk(object_type.as_str()),
            expected_version: version,
        });

        let mut next = current;
        let now = Utc::now();
        for (object_id, change_type) in changes {
            next += 1;
            let entry = ChangeLogEntry {
                object_id: object_id.clone(),
                change_type: *change_type,
                state: next,
                occurred_at: now,
            };
            items.push(WriteItem::Put(Record::new(
                pk.clone(),
                key::state_change_sk(object_type.as_str(), next),
                serde_json::to_value(&entry)
                    .map_err(|e| StoreError::SerializeError(e.to_string()))?,
            )));
        }

        items.push(WriteItem::Put(Record::new(
            pk.clone(),
            key::state_current_sk(object_type.as_str()),
            serde_json::to_value(Counter { current: next })
                .map_err(|e| StoreError::SerializeError(e.to_string()))?,
        )));

        Ok((items, next))
    }

    /// Standalone append: reads, builds, and commits in one call, retrying on a
    /// concurrent counter update. Most callers that already hold a transaction should
    /// use [`Self::build_append_items`] instead.
    pub async fn append(
        &self,
        account: &str,
        object_type: ObjectType,
        object_id: &str,
        change_type: ChangeType,
    ) -> Result<u64> {
        for _ in 0..8 {
            let (items, new_state) = self
                .build_append_items(account, object_type, object_id, change_type)
                .await?;
            match self.table.transact_write(items).await {
                Ok(()) => return Ok(new_state),
                Err(StoreError::TransactionConflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::TransactionConflict(format!(
            "could not append state change for {} after retries",
            object_id
        )))
    }

    /// Smallest retained state, used to compute `cannotCalculateChanges` (spec §4.2).
    /// If no change-log entries remain, the window collapses to `[current, current]`.
    pub async fn oldest_available(&self, account: &str, object_type: ObjectType) -> Result<u64> {
        let pk = key::account_pk(account);
        let prefix = key::state_change_prefix(object_type.as_str());
        let rows = self.table.query(&pk, Lsi::Primary, &prefix).await?;
        match rows.first() {
            Some(record) => {
                let entry: ChangeLogEntry = serde_json::from_value(record.data.clone())
                    .map_err(|e| StoreError::DeserializeError(e.to_string()))?;
                Ok(entry.state)
            }
            None => self.get_current(account, object_type).await,
        }
    }

    /// Ordered by state ascending, at most `max_changes` records with state > `since`,
    /// collapsed per §4.2 over exactly the window that was fetched. Returns
    /// `(records, has_more_changes, new_state)`.
    pub async fn query(
        &self,
        account: &str,
        object_type: ObjectType,
        since: u64,
        max_changes: usize,
    ) -> Result<(Vec<ChangeRecord>, bool, u64)> {
        let pk = key::account_pk(account);
        let prefix = key::state_change_prefix(object_type.as_str());
        let rows = self.table.query(&pk, Lsi::Primary, &prefix).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for record in rows {
            let entry: ChangeLogEntry = serde_json::from_value(record.data)
                .map_err(|e| StoreError::DeserializeError(e.to_string()))?;
            if entry.state > since {
                entries.push(entry);
            }
        }
        // rows come back sorted by sk (zero-padded decimal), which matches numeric order.

        let has_more = entries.len() > max_changes;
        let window: &[ChangeLogEntry] = if has_more {
            &entries[..max_changes]
        } else {
            &entries[..]
        };

        let new_state = match window.last() {
            Some(entry) => entry.state,
            None => self.get_current(account, object_type).await?,
        };

        Ok((collapse(window), has_more, new_state))
    }
}

/// Applies the §4.2 read-time collapse rules over one fetched window, preserving the
/// position of each object's *first* appearance in the window.
fn collapse(window: &[ChangeLogEntry]) -> Vec<ChangeRecord> {
    let mut order: Vec<String> = Vec::new();
    let mut effective: AHashMap<String, Option<ChangeType>> = AHashMap::default();
    let mut last_state: AHashMap<String, u64> = AHashMap::default();

    for entry in window {
        last_state.insert(entry.object_id.clone(), entry.state);
        match effective.get(&entry.object_id).copied().flatten() {
            None if !effective.contains_key(&entry.object_id) => {
                order.push(entry.object_id.clone());
                effective.insert(entry.object_id.clone(), Some(entry.change_type));
            }
            Some(ChangeType::Created) => {
                let collapsed = match entry.change_type {
                    ChangeType::Created => Some(ChangeType::Created),
                    ChangeType::Updated => Some(ChangeType::Created),
                    ChangeType::Destroyed => None, // created+destroyed cancel out
                };
                effective.insert(entry.object_id.clone(), collapsed);
            }
            Some(ChangeType::Updated) => {
                let collapsed = match entry.change_type {
                    ChangeType::Destroyed => ChangeType::Destroyed,
                    _ => ChangeType::Updated,
                };
                effective.insert(entry.object_id.clone(), Some(collapsed));
            }
            Some(ChangeType::Destroyed) => {
                // destroyed absorbs anything further for this id.
            }
            None => {
                // previously cancelled out (created+destroyed); a later event for the
                // same id within the window starts a fresh record. `order` already holds
                // this id from its first appearance, so only `effective` needs updating.
                effective.insert(entry.object_id.clone(), Some(entry.change_type));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|object_id| {
            let change_type = effective.get(&object_id).copied().flatten()?;
            let state = *last_state.get(&object_id)?;
            Some(ChangeRecord {
                object_id,
                change_type,
                state,
            })
        })
        .collect()
}

/// Deletes change-log entries older than `retention_days` (spec §3 "Lifecycles").
pub async fn purge_expired<T: Table>(
    state_log: &StateLog<T>,
    account: &str,
    object_type: ObjectType,
    retention_days: i64,
) -> Result<usize> {
    let pk = key::account_pk(account);
    let prefix = key::state_change_prefix(object_type.as_str());
    let rows = state_log.table.query(&pk, Lsi::Primary, &prefix).await?;
    let cutoff = Utc::now() - chrono::Duration::days(retention_days);

    let mut to_delete = Vec::new();
    for record in rows {
        let entry: ChangeLogEntry = serde_json::from_value(record.data.clone())
            .map_err(|e| StoreError::DeserializeError(e.to_string()))?;
        if entry.occurred_at < cutoff {
            to_delete.push(WriteItem::Delete {
                pk: record.pk.clone(),
                sk: record.sk.clone(),
            });
        }
    }
    let count = to_delete.len();
    if count > 0 {
        state_log.table.transact_write(to_delete).await?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::table::InMemoryTable;

    fn log() -> StateLog<InMemoryTable> {
        StateLog::new(Arc::new(InMemoryTable::new()))
    }

    #[tokio::test]
    async fn append_is_monotone() {
        let log = log();
        let s1 = log
            .append("a1", ObjectType::Email, "e1", ChangeType::Created)
            .await
            .unwrap();
        let s2 = log
            .append("a1", ObjectType::Email, "e2", ChangeType::Created)
            .await
            .unwrap();
        assert!(s2 > s1);
        assert_eq!(log.get_current("a1", ObjectType::Email).await.unwrap(), s2);
    }

    #[tokio::test]
    async fn query_collapses_created_then_destroyed() {
        let log = log();
        log.append("a1", ObjectType::Email, "e1", ChangeType::Created)
            .await
            .unwrap();
        log.append("a1", ObjectType::Email, "e1", ChangeType::Destroyed)
            .await
            .unwrap();
        log.append("a1", ObjectType::Email, "e2", ChangeType::Created)
            .await
            .unwrap();

        let (records, has_more, _) = log.query("a1", ObjectType::Email, 0, 500).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].object_id, "e2");
        assert!(!has_more);
    }

    #[tokio::test]
    async fn query_collapses_created_then_updated() {
        let log = log();
        log.append("a1", ObjectType::Email, "e1", ChangeType::Created)
            .await
            .unwrap();
        log.append("a1", ObjectType::Email, "e1", ChangeType::Updated)
            .await
            .unwrap();

        let (records, _, _) = log.query("a1", ObjectType::Email, 0, 500).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].change_type, ChangeType::Created);
    }

    #[tokio::test]
    async fn query_collapses_created_destroyed_then_recreated_to_one_record() {
        let log = log();
        log.append("a1", ObjectType::Email, "e1", ChangeType::Created)
            .await
            .unwrap();
        log.append("a1", ObjectType::Email, "e1", ChangeType::Destroyed)
            .await
            .unwrap();
        log.append("a1", ObjectType::Email, "e1", ChangeType::Created)
            .await
            .unwrap();

        let (records, _, _) = log.query("a1", ObjectType::Email, 0, 500).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].object_id, "e1");
        assert_eq!(records[0].change_type, ChangeType::Created);
    }

    #[tokio::test]
    async fn query_respects_max_changes_and_reports_has_more() {
        let log = log();
        for i in 0..5 {
            log.append("a1", ObjectType::Email, &format!("e{i}"), ChangeType::Created)
                .await
                .unwrap();
        }
        let (records, has_more, new_state) =
            log.query("a1", ObjectType::Email, 0, 2).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(has_more);
        assert_eq!(new_state, 2);
    }

    #[tokio::test]
    async fn oldest_available_falls_back_to_current_when_log_empty() {
        let log = log();
        assert_eq!(
            log.oldest_available("a1", ObjectType::Email).await.unwrap(),
            0
        );
    }
}
