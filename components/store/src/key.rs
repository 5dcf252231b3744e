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

//! Partition/sort-key layout (spec §3). Every prefix used anywhere in the system is
//! built here so the grammar has one source of truth.

use chrono::{DateTime, Utc};

/// `pk = "ACCOUNT#" + accountId`
pub fn account_pk(account_id: &str) -> String {
    format!("ACCOUNT#{}", account_id)
}

pub fn email_sk(email_id: &str) -> String {
    format!("EMAIL#{}", email_id)
}

/// `RCVD#<ts>#<id>`, ordered by `receivedAt` descending when the timestamp is negated
/// before formatting (the in-memory backend negates explicitly; callers who sort by
/// comparing these strings lexicographically get descending order "for free" because
/// `received_at_sort_component` emits `i64::MAX - ts`).
pub fn rcvd_lsi1sk(received_at: DateTime<Utc>, email_id: &str) -> String {
    format!(
        "RCVD#{:020}#{}",
        received_at_sort_component(received_at),
        email_id
    )
}

pub fn rcvd_lsi1_prefix() -> &'static str {
    "RCVD#"
}

/// Maps a timestamp to a value that sorts ascending-as-string in the same order as
/// `receivedAt` descending, by inverting it against a fixed ceiling.
fn received_at_sort_component(received_at: DateTime<Utc>) -> i64 {
    i64::MAX - received_at.timestamp()
}

/// Per-mailbox timeline sort key for a mailbox-membership row's LSI1 (spec §3, "Mailbox
/// membership" row). Scoping the prefix by `mailbox_id` is what makes `inMailbox`
/// queries an efficient single-mailbox range scan instead of an account-wide one.
pub fn mailbox_rcvd_lsi1sk(mailbox_id: &str, received_at: DateTime<Utc>, email_id: &str) -> String {
    format!(
        "MBOX#{}#RCVD#{:020}#{}",
        mailbox_id,
        received_at_sort_component(received_at),
        email_id
    )
}

pub fn mailbox_rcvd_lsi1_prefix(mailbox_id: &str) -> String {
    format!("MBOX#{}#RCVD#", mailbox_id)
}

pub fn thread_lsi2sk(thread_id: &str, received_at: DateTime<Utc>) -> String {
    format!("THREAD#{}#{:020}", thread_id, received_at.timestamp())
}

pub fn thread_lsi2_prefix(thread_id: &str) -> String {
    format!("THREAD#{}#", thread_id)
}

pub fn msgid_lsi3sk(message_id: &str) -> String {
    format!("MSGID#{}", message_id)
}

pub fn mailbox_membership_sk(mailbox_id: &str, email_id: &str) -> String {
    format!("MBOX#{}#EMAIL#{}", mailbox_id, email_id)
}

pub fn mailbox_membership_prefix(mailbox_id: &str) -> String {
    format!("MBOX#{}#EMAIL#", mailbox_id)
}

pub fn mailbox_sk(mailbox_id: &str) -> String {
    format!("MBOX#{}", mailbox_id)
}

pub fn state_current_sk(object_type: &str) -> String {
    format!("STATE#{}#CURRENT", object_type)
}

/// State-log entries are zero-padded to 20 digits so lexicographic order matches
/// numeric order (spec §6, "Table sort-key grammar").
pub fn state_change_sk(object_type: &str, state: u64) -> String {
    format!("STATE#{}#CHG#{:020}", object_type, state)
}

pub fn state_change_prefix(object_type: &str) -> String {
    format!("STATE#{}#CHG#", object_type)
}

pub fn token_sk(field: &str, token: &str, email_id: &str) -> String {
    format!("TOK#{}#{}#EMAIL#{}", field, token, email_id)
}

pub fn token_prefix(field: &str, token_prefix: &str) -> String {
    format!("TOK#{}#{}", field, token_prefix)
}

pub fn token_email_prefix(field: &str) -> String {
    format!("TOK#{}#", field)
}

/// Recovers `(token, email_id)` from a `TOK#<field>#<token>#EMAIL#<id>` sort key, given
/// the `field` that was used to scan for it.
pub fn parse_token_sk<'a>(sk: &'a str, field: &str) -> Option<(&'a str, &'a str)> {
    let rest = sk.strip_prefix(&format!("TOK#{}#", field))?;
    let idx = rest.rfind("#EMAIL#")?;
    Some((&rest[..idx], &rest[idx + "#EMAIL#".len()..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn token_sk_round_trips() {
        let sk = token_sk("from", "alice", "e1");
        assert_eq!(sk, "TOK#from#alice#EMAIL#e1");
        assert_eq!(parse_token_sk(&sk, "from"), Some(("alice", "e1")));
    }

    #[test]
    fn token_sk_with_hash_in_token() {
        // tokens never contain '#' post-normalisation, but the parser must still pick
        // the *last* #EMAIL# boundary to be robust.
        let sk = "TOK#to#a#b#EMAIL#e2".to_string();
        assert_eq!(parse_token_sk(&sk, "to"), Some(("a#b", "e2")));
    }

    #[test]
    fn rcvd_sort_key_orders_descending() {
        let newer = Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap();
        let older = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let newer_key = rcvd_lsi1sk(newer, "e1");
        let older_key = rcvd_lsi1sk(older, "e2");
        assert!(newer_key < older_key, "newer email must sort first");
    }

    #[test]
    fn state_change_sk_is_zero_padded() {
        assert_eq!(
            state_change_sk("Email", 7),
            "STATE#Email#CHG#00000000000000000007"
        );
    }
}
