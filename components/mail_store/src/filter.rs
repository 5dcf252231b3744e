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

//! The structural conditions `Email/query` can apply directly against the store,
//! after the filter planner (C8, in the `search` crate) has stripped out whichever
//! keys it routes to the address or vector path (spec §4.3, §4.8).

use chrono::{DateTime, Utc};
use store::model::EmailItem;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuralFilter {
    pub in_mailbox: Option<String>,
    pub in_mailbox_other_than: Vec<String>,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub has_attachment: Option<bool>,
    pub has_keyword: Option<String>,
    pub not_keyword: Option<String>,
}

impl StructuralFilter {
    /// Every condition other than `inMailbox` (which is handled by choosing which LSI
    /// to scan, not by post-filtering).
    pub fn matches(&self, item: &EmailItem) -> bool {
        if let Some(before) = self.before {
            if !(item.received_at < before) {
                return false;
            }
        }
        if let Some(after) = self.after {
            if !(item.received_at >= after) {
                return false;
            }
        }
        if let Some(min_size) = self.min_size {
            if item.size < min_size {
                return false;
            }
        }
        if let Some(max_size) = self.max_size {
            if item.size >= max_size {
                return false;
            }
        }
        if let Some(has_attachment) = self.has_attachment {
            if item.has_attachment != has_attachment {
                return false;
            }
        }
        if let Some(keyword) = &self.has_keyword {
            if !item.keywords.contains(keyword) {
                return false;
            }
        }
        if let Some(keyword) = &self.not_keyword {
            if item.keywords.contains(keyword) {
                return false;
            }
        }
        if !self.in_mailbox_other_than.is_empty()
            && self
                .in_mailbox_other_than
                .iter()
                .any(|m| item.mailbox_ids.contains(m))
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::model::BodyPart;

    fn item(size: usize, has_attachment: bool) -> EmailItem {
        EmailItem {
            account_id: "a".into(),
            email_id: "e1".into(),
            blob_id: "b1".into(),
            thread_id: "t1".into(),
            mailbox_ids: Default::default(),
            keywords: Default::default(),
            received_at: Utc::now(),
            sent_at: None,
            size,
            header_size: 0,
            has_attachment,
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

    #[test]
    fn size_range_is_half_open_on_max() {
        let filter = StructuralFilter {
            min_size: Some(10),
            max_size: Some(20),
            ..Default::default()
        };
        assert!(filter.matches(&item(10, false)));
        assert!(!filter.matches(&item(20, false)));
        assert!(!filter.matches(&item(9, false)));
    }

    #[test]
    fn has_attachment_filters_exactly() {
        let filter = StructuralFilter {
            has_attachment: Some(true),
            ..Default::default()
        };
        assert!(!filter.matches(&item(1, false)));
        assert!(filter.matches(&item(1, true)));
    }
}
