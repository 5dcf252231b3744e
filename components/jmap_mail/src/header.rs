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

//! `header:<Name>[:<form>][:all]` property evaluation (spec §4.10). The byte-level
//! header parser is an out-of-scope external collaborator (spec §1); this module
//! owns the JMAP form dispatch and the property-name validation on top of it.

use jmap::MethodError;
use serde_json::{json, Value};

const DATE_HEADERS: [&str; 2] = ["Date", "Resent-Date"];
const ADDRESS_HEADERS: [&str; 7] = [
    "From",
    "To",
    "Cc",
    "Bcc",
    "Reply-To",
    "Sender",
    "Resent-From",
];
const MESSAGEID_HEADERS: [&str; 3] = ["Message-Id", "In-Reply-To", "References"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderForm {
    AsText,
    AsAddresses,
    AsMessageIds,
    AsDate,
    AsUrls,
    AsRaw,
}

impl HeaderForm {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asText" => Some(HeaderForm::AsText),
            "asAddresses" => Some(HeaderForm::AsAddresses),
            "asMessageIds" => Some(HeaderForm::AsMessageIds),
            "asDate" => Some(HeaderForm::AsDate),
            "asURLs" => Some(HeaderForm::AsUrls),
            "asRaw" => Some(HeaderForm::AsRaw),
            _ => None,
        }
    }
}

/// A `header:Name:form:all` property, parsed from its JMAP string form.
#[derive(Debug, Clone)]
pub struct HeaderProperty {
    pub name: String,
    pub form: HeaderForm,
    pub all: bool,
}

impl HeaderProperty {
    /// Parses `header:<Name>[:<form>][:all]`. Returns `None` if `property` isn't a
    /// `header:`-prefixed property at all (not an error - the caller tries other
    /// property kinds next).
    pub fn parse(property: &str) -> Option<Result<HeaderProperty, MethodError>> {
        let rest = property.strip_prefix("header:")?;
        let mut parts = rest.split(':');
        let name = parts.next()?.to_string();
        if name.is_empty() {
            return Some(Err(MethodError::InvalidArguments(
                "header property is missing a name".into(),
            )));
        }

        let mut form = HeaderForm::AsRaw;
        let mut all = false;
        for part in parts {
            if part == "all" {
                all = true;
            } else if let Some(parsed_form) = HeaderForm::parse(part) {
                form = parsed_form;
            } else {
                return Some(Err(MethodError::InvalidArguments(format!(
                    "unknown header form/modifier {part}"
                ))));
            }
        }

        if let Err(e) = validate_form(&name, form) {
            return Some(Err(e));
        }

        Some(Ok(HeaderProperty { name, form, all }))
    }
}

fn validate_form(name: &str, form: HeaderForm) -> Result<(), MethodError> {
    let ok = match form {
        HeaderForm::AsDate => DATE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)),
        HeaderForm::AsAddresses => ADDRESS_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)),
        HeaderForm::AsMessageIds => MESSAGEID_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)),
        HeaderForm::AsText | HeaderForm::AsRaw | HeaderForm::AsUrls => true,
    };
    if ok {
        Ok(())
    } else {
        Err(MethodError::InvalidArguments(format!(
            "{:?} is not a valid form for header {name}",
            form
        )))
    }
}

/// Out-of-scope external collaborator: splits a raw header blob into the ordered
/// list of values for one header name.
pub trait HeaderParser: Send + Sync {
    fn header_values(&self, raw: &[u8], name: &str) -> Vec<String>;
}

/// Minimal fake (C17): one header per line, `Name: value`, folding not supported.
pub struct FakeHeaderParser;

impl HeaderParser for FakeHeaderParser {
    fn header_values(&self, raw: &[u8], name: &str) -> Vec<String> {
        let text = String::from_utf8_lossy(raw);
        text.lines()
            .filter_map(|line| {
                let (header_name, value) = line.split_once(':')?;
                if header_name.trim().eq_ignore_ascii_case(name) {
                    Some(value.trim().to_string())
                } else {
                    None
                }
            })
            .collect()
    }
}

fn render_one(value: &str, form: HeaderForm) -> Value {
    match form {
        HeaderForm::AsRaw | HeaderForm::AsText => Value::String(value.to_string()),
        HeaderForm::AsDate => chrono::DateTime::parse_from_rfc2822(value)
            .map(|dt| Value::String(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
        HeaderForm::AsMessageIds => Value::Array(
            value
                .split_whitespace()
                .map(|s| Value::String(s.trim_matches(|c| c == '<' || c == '>').to_string()))
                .collect(),
        ),
        HeaderForm::AsUrls => Value::Array(
            value
                .split(',')
                .map(|s| Value::String(s.trim().trim_matches(|c| c == '<' || c == '>').to_string()))
                .collect(),
        ),
        HeaderForm::AsAddresses => Value::Array(
            value
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|entry| parse_address(entry.trim()))
                .collect(),
        ),
    }
}

fn parse_address(entry: &str) -> Value {
    if let Some(lt) = entry.find('<') {
        let name = entry[..lt].trim().trim_matches('"').to_string();
        let email = entry[lt + 1..].trim_end_matches('>').to_string();
        json!({"name": if name.is_empty() { Value::Null } else { Value::String(name) }, "email": email})
    } else {
        json!({"name": Value::Null, "email": entry})
    }
}

/// Evaluates one `header:` property against the email's raw header bytes.
/// Missing headers: without `:all` → `null`; with `:all` → empty list (spec §4.10).
pub fn evaluate(parser: &dyn HeaderParser, raw_headers: &[u8], property: &HeaderProperty) -> Value {
    let values = parser.header_values(raw_headers, &property.name);
    if property.all {
        Value::Array(values.iter().map(|v| render_one(v, property.form)).collect())
    } else {
        values
            .first()
            .map(|v| render_one(v, property.form))
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_form_and_all() {
        let prop = HeaderProperty::parse("header:Subject:asText:all")
            .unwrap()
            .unwrap();
        assert_eq!(prop.name, "Subject");
        assert_eq!(prop.form, HeaderForm::AsText);
        assert!(prop.all);
    }

    #[test]
    fn defaults_to_raw_without_all() {
        let prop = HeaderProperty::parse("header:X-Custom").unwrap().unwrap();
        assert_eq!(prop.form, HeaderForm::AsRaw);
        assert!(!prop.all);
    }

    #[test]
    fn as_date_on_subject_is_invalid_arguments() {
        let result = HeaderProperty::parse("header:Subject:asDate").unwrap();
        assert!(matches!(result, Err(MethodError::InvalidArguments(_))));
    }

    #[test]
    fn non_header_property_returns_none() {
        assert!(HeaderProperty::parse("subject").is_none());
    }

    #[test]
    fn missing_header_without_all_is_null() {
        let prop = HeaderProperty {
            name: "X-Missing".into(),
            form: HeaderForm::AsRaw,
            all: false,
        };
        let value = evaluate(&FakeHeaderParser, b"Subject: hi\n", &prop);
        assert!(value.is_null());
    }

    #[test]
    fn missing_header_with_all_is_empty_list() {
        let prop = HeaderProperty {
            name: "X-Missing".into(),
            form: HeaderForm::AsRaw,
            all: true,
        };
        let value = evaluate(&FakeHeaderParser, b"Subject: hi\n", &prop);
        assert_eq!(value, Value::Array(vec![]));
    }

    #[test]
    fn as_date_parses_rfc2822() {
        let prop = HeaderProperty {
            name: "Date".into(),
            form: HeaderForm::AsDate,
            all: false,
        };
        let raw = b"Date: Tue, 1 Jul 2025 10:00:00 +0000\n";
        let value = evaluate(&FakeHeaderParser, raw, &prop);
        assert_eq!(value, "2025-07-01T10:00:00+00:00");
    }
}
