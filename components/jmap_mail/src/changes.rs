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

//! `Email/changes`, `Mailbox/changes`, `Thread/changes` (C11, spec §4.11): one
//! generic handler over [`ObjectType`], since all three share the same change-log
//! shape (C2).

use jmap::id::{parse_since_state, state_to_string};
use jmap::MethodError;
use serde_json::{json, Value};
use state::StateLog;
use store::model::{ChangeType, ObjectType};
use store::table::Table;

pub async fn object_changes<T: Table>(
    account: &str,
    object_type: ObjectType,
    args: &Value,
    state_log: &StateLog<T>,
    default_max_changes: usize,
) -> Result<Value, MethodError> {
    let since_state_str = args
        .get("sinceState")
        .and_then(|v| v.as_str())
        .ok_or_else(|| MethodError::InvalidArguments("sinceState is required".into()))?;
    let since = parse_since_state(since_state_str)?;

    let max_changes = args
        .get("maxChanges")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(default_max_changes);

    // `oldest` is the smallest state still present in the change log; anything the
    // client has already seen up to `oldest - 1` is a valid resync point even if the
    // log itself starts later (spec §4.2 purge window). Only a `since` that falls
    // strictly behind that floor has been purged out from under the client.
    let oldest = state_log.oldest_available(account, object_type).await?;
    let current = state_log.get_current(account, object_type).await?;
    if since < oldest.saturating_sub(1) || since > current {
        return Err(MethodError::CannotCalculateChanges);
    }

    let (records, has_more, new_state) = state_log.query(account, object_type, since, max_changes).await?;

    let mut created = Vec::new();
    let mut updated = Vec::new();
    let mut destroyed = Vec::new();
    for record in records {
        match record.change_type {
            ChangeType::Created => created.push(record.object_id),
            ChangeType::Updated => updated.push(record.object_id),
            ChangeType::Destroyed => destroyed.push(record.object_id),
        }
    }

    Ok(json!({
        "accountId": account,
        "oldState": since_state_str,
        "newState": state_to_string(new_state),
        "hasMoreChanges": has_more,
        "created": created,
        "updated": updated,
        "destroyed": destroyed,
        "updatedProperties": Value::Null,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use store::model::ObjectType;
    use store::table::InMemoryTable;

    #[tokio::test]
    async fn garbage_since_state_is_cannot_calculate_changes() {
        let table = Arc::new(InMemoryTable::new());
        let state_log = StateLog::new(table);
        let args = json!({"sinceState": "not-a-number"});
        let err = object_changes("a1", ObjectType::Email, &args, &state_log, 100)
            .await
            .unwrap_err();
        assert!(matches!(err, MethodError::CannotCalculateChanges));
    }

    #[tokio::test]
    async fn reports_created_and_advances_state() {
        let table = Arc::new(InMemoryTable::new());
        let state_log = StateLog::new(table);
        state_log
            .append("a1", ObjectType::Email, "e1", ChangeType::Created)
            .await
            .unwrap();
        state_log
            .append("a1", ObjectType::Email, "e2", ChangeType::Created)
            .await
            .unwrap();

        let args = json!({"sinceState": "0"});
        let response = object_changes("a1", ObjectType::Email, &args, &state_log, 100)
            .await
            .unwrap();
        assert_eq!(response["created"], json!(["e1", "e2"]));
        assert_eq!(response["newState"], "2");
        assert_eq!(response["hasMoreChanges"], false);
    }

    #[tokio::test]
    async fn no_changes_since_account_creation_is_empty_at_state_zero() {
        let table = Arc::new(InMemoryTable::new());
        let state_log = StateLog::new(table);
        let args = json!({"sinceState": "0"});
        let response = object_changes("a1", ObjectType::Email, &args, &state_log, 100)
            .await
            .unwrap();
        assert_eq!(response["created"], json!([]));
        assert_eq!(response["newState"], "0");
    }
}
