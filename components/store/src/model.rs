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

//! Entity shapes (spec §3 "Entity shapes"). These are the in-memory domain records;
//! the wire (JMAP JSON) rendering of set-valued and default-null fields lives in the
//! `jmap_mail` get handlers, not here, since the same item feeds the vector/token
//! indexes which have no notion of JMAP's `{}` vs `null` convention.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type StringSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Email,
    Thread,
    Mailbox,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Email => "Email",
            ObjectType::Thread => "Thread",
            ObjectType::Mailbox => "Mailbox",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Updated,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub object_id: String,
    pub change_type: ChangeType,
    pub state: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BodyPart {
    pub part_id: String,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub blob_id: Option<String>,
    pub size: usize,
    pub charset: Option<String>,
    pub disposition: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub sub_parts: Vec<BodyPart>,
}

impl BodyPart {
    /// Depth-first walk of this part and all descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a BodyPart)) {
        f(self);
        for part in &self.sub_parts {
            part.walk(f);
        }
    }

    pub fn find<'a>(&'a self, part_id: &str) -> Option<&'a BodyPart> {
        if self.part_id == part_id {
            return Some(self);
        }
        self.sub_parts.iter().find_map(|p| p.find(part_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailItem {
    pub account_id: String,
    pub email_id: String,
    pub blob_id: String,
    pub thread_id: String,
    pub mailbox_ids: StringSet,
    pub keywords: StringSet,
    pub received_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub size: usize,
    pub header_size: usize,
    pub has_attachment: bool,
    pub subject: Option<String>,
    #[serde(default)]
    pub sender: Vec<EmailAddress>,
    #[serde(default)]
    pub from: Vec<EmailAddress>,
    #[serde(default)]
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    #[serde(default)]
    pub reply_to: Vec<EmailAddress>,
    #[serde(default)]
    pub message_id: Vec<String>,
    #[serde(default)]
    pub in_reply_to: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
    pub preview: String,
    pub summary: Option<String>,
    pub body_structure: BodyPart,
    #[serde(default)]
    pub text_body: Vec<String>,
    #[serde(default)]
    pub html_body: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub search_chunks: usize,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EmailItem {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxItem {
    pub mailbox_id: String,
    pub total_emails: u64,
    pub unread_emails: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenQueryResult {
    pub field: String,
    pub token: String,
    pub email_id: String,
    pub received_at: DateTime<Utc>,
}
