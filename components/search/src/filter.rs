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

//! Filter planner (C8, spec §4.8): parses a JMAP `Email/query` filter tree, rejects
//! anything beyond a flat top-level conjunction, and decides which backend answers
//! the query.

use chrono::{DateTime, Utc};
use jmap::MethodError;
use mail_store::StructuralFilter;
use serde_json::Value;

const UNSUPPORTED_KEYS: [&str; 4] = [
    "header",
    "allInThreadHaveKeyword",
    "someInThreadHaveKeyword",
    "noneInThreadHaveKeyword",
];

#[derive(Debug, Clone, Default)]
pub struct ParsedFilter {
    pub structural: StructuralFilter,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub text: Option<String>,
    pub body: Option<String>,
    pub subject: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Structural,
    Address,
    Vector,
}

impl ParsedFilter {
    pub fn route(&self) -> Route {
        if self.text.is_some() || self.body.is_some() || self.subject.is_some() || self.summary.is_some()
        {
            Route::Vector
        } else if self.from.is_some() || self.to.is_some() || self.cc.is_some() || self.bcc.is_some() {
            Route::Address
        } else {
            Route::Structural
        }
    }

    /// `(searchText, typeFilter)` per spec §4.7 step 1.
    pub fn vector_search_text(&self) -> (String, Option<&'static str>) {
        if let Some(summary) = &self.summary {
            (summary.clone(), Some("summary"))
        } else if let Some(subject) = &self.subject {
            (subject.clone(), Some("subject"))
        } else if let Some(body) = &self.body {
            (body.clone(), Some("body"))
        } else {
            (self.text.clone().unwrap_or_default(), None)
        }
    }

    pub fn address_conditions(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(v) = &self.from {
            out.push(("from", v.as_str()));
        }
        if let Some(v) = &self.to {
            out.push(("to", v.as_str()));
        }
        if let Some(v) = &self.cc {
            out.push(("cc", v.as_str()));
        }
        if let Some(v) = &self.bcc {
            out.push(("bcc", v.as_str()));
        }
        out
    }
}

/// Parses the top level of a filter: either a single condition object, or a
/// `{"operator":"AND","conditions":[...]}` whose members are each plain condition
/// objects. Any `OR`, `NOT`, or nested operator is `unsupportedFilter`.
pub fn parse_filter(value: &Value) -> Result<ParsedFilter, MethodError> {
    let conditions = flatten(value)?;
    let mut parsed = ParsedFilter::default();
    for condition in conditions {
        apply_condition(&mut parsed, condition)?;
    }
    Ok(parsed)
}

fn flatten(value: &Value) -> Result<Vec<&serde_json::Map<String, Value>>, MethodError> {
    let obj = value
        .as_object()
        .ok_or_else(|| MethodError::InvalidArguments("filter must be an object".into()))?;

    if let Some(operator) = obj.get("operator") {
        let operator = operator
            .as_str()
            .ok_or_else(|| MethodError::UnsupportedFilter("operator must be a string".into()))?;
        if operator != "AND" {
            return Err(MethodError::UnsupportedFilter(format!(
                "operator {operator} is not supported; only a top-level AND is"
            )));
        }
        let conditions = obj
            .get("conditions")
            .and_then(|c| c.as_array())
            .ok_or_else(|| MethodError::InvalidArguments("AND requires conditions array".into()))?;
        let mut out = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let condition_obj = condition.as_object().ok_or_else(|| {
                MethodError::InvalidArguments("filter condition must be an object".into())
            })?;
            if condition_obj.contains_key("operator") {
                return Err(MethodError::UnsupportedFilter(
                    "nested filter operators are not supported".into(),
                ));
            }
            out.push(condition_obj);
        }
        Ok(out)
    } else {
        Ok(vec![obj])
    }
}

fn apply_condition(
    parsed: &mut ParsedFilter,
    condition: &serde_json::Map<String, Value>,
) -> Result<(), MethodError> {
    for (key, value) in condition {
        if UNSUPPORTED_KEYS.contains(&key.as_str()) {
            return Err(MethodError::UnsupportedFilter(format!(
                "filter key {key} is not supported"
            )));
        }
        match key.as_str() {
            "inMailbox" => parsed.structural.in_mailbox = value.as_str().map(String::from),
            "inMailboxOtherThan" => {
                parsed.structural.in_mailbox_other_than = value
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default()
            }
            "before" => parsed.structural.before = parse_date(value)?,
            "after" => parsed.structural.after = parse_date(value)?,
            "minSize" => parsed.structural.min_size = value.as_u64().map(|n| n as usize),
            "maxSize" => parsed.structural.max_size = value.as_u64().map(|n| n as usize),
            "hasAttachment" => parsed.structural.has_attachment = value.as_bool(),
            "hasKeyword" => parsed.structural.has_keyword = value.as_str().map(String::from),
            "notKeyword" => parsed.structural.not_keyword = value.as_str().map(String::from),
            "from" => parsed.from = value.as_str().map(String::from),
            "to" => parsed.to = value.as_str().map(String::from),
            "cc" => parsed.cc = value.as_str().map(String::from),
            "bcc" => parsed.bcc = value.as_str().map(String::from),
            "text" => parsed.text = value.as_str().map(String::from),
            "body" => parsed.body = value.as_str().map(String::from),
            "subject" => parsed.subject = value.as_str().map(String::from),
            "summary" => parsed.summary = value.as_str().map(String::from),
            other => {
                return Err(MethodError::UnsupportedFilter(format!(
                    "unknown filter key {other}"
                )))
            }
        }
    }
    Ok(())
}

fn parse_date(value: &Value) -> Result<Option<DateTime<Utc>>, MethodError> {
    match value.as_str() {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| MethodError::InvalidArguments(format!("invalid date {s}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_and_merges_conditions() {
        let filter = json!({
            "operator": "AND",
            "conditions": [
                {"inMailbox": "m1"},
                {"hasAttachment": true}
            ]
        });
        let parsed = parse_filter(&filter).unwrap();
        assert_eq!(parsed.structural.in_mailbox, Some("m1".to_string()));
        assert_eq!(parsed.structural.has_attachment, Some(true));
        assert_eq!(parsed.route(), Route::Structural);
    }

    #[test]
    fn or_is_rejected() {
        let filter = json!({"operator": "OR", "conditions": [{"inMailbox": "m1"}]});
        assert!(matches!(
            parse_filter(&filter),
            Err(MethodError::UnsupportedFilter(_))
        ));
    }

    #[test]
    fn nested_operator_is_rejected() {
        let filter = json!({
            "operator": "AND",
            "conditions": [{"operator": "OR", "conditions": []}]
        });
        assert!(matches!(
            parse_filter(&filter),
            Err(MethodError::UnsupportedFilter(_))
        ));
    }

    #[test]
    fn unknown_key_is_unsupported_filter() {
        let filter = json!({"notARealKey": 1});
        assert!(matches!(
            parse_filter(&filter),
            Err(MethodError::UnsupportedFilter(_))
        ));
    }

    #[test]
    fn explicitly_unsupported_key_is_rejected() {
        let filter = json!({"header": ["X-Spam", "asText"]});
        assert!(matches!(
            parse_filter(&filter),
            Err(MethodError::UnsupportedFilter(_))
        ));
    }

    #[test]
    fn presence_of_body_routes_to_vector() {
        let filter = json!({"body": "hello"});
        let parsed = parse_filter(&filter).unwrap();
        assert_eq!(parsed.route(), Route::Vector);
    }

    #[test]
    fn presence_of_from_routes_to_address() {
        let filter = json!({"from": "alice"});
        let parsed = parse_filter(&filter).unwrap();
        assert_eq!(parsed.route(), Route::Address);
    }
}
