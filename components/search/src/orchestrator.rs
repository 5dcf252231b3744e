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

//! Search orchestrator (C7, spec §4.7) and the address-path query (the C5+C3 half
//! of C8's backend routing). Both produce an ordered, paginated id list the same
//! shape as C3's structural query, so the `Email/query` handler (C9) can treat all
//! three backends uniformly.

use std::collections::HashSet;

use jmap::MethodError;
use mail_store::EmailRepository;
use serde_json::Value;
use store::table::Table;
use token_index::{normalize, TokenIndex};
use vector_store::{Embedder, MetadataFilter, MetadataOp, VectorStore, VectorType};

use crate::filter::ParsedFilter;

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub ids: Vec<String>,
    pub position: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest<'a> {
    pub position: i64,
    pub anchor: Option<&'a str>,
    pub anchor_offset: i64,
    pub limit: usize,
}

fn paginate_by_id(ordered_ids: &[String], page: PageRequest<'_>) -> Result<SearchResult, MethodError> {
    let len = ordered_ids.len() as i64;
    let base = if let Some(anchor) = page.anchor {
        let idx = ordered_ids
            .iter()
            .position(|id| id == anchor)
            .ok_or(MethodError::AnchorNotFound)? as i64;
        idx + page.anchor_offset
    } else if page.position < 0 {
        len + page.position
    } else {
        page.position
    };
    let start = base.clamp(0, len) as usize;
    let end = ordered_ids.len().min(start + page.limit);
    Ok(SearchResult {
        ids: ordered_ids[start.min(ordered_ids.len())..end].to_vec(),
        position: start as i64,
    })
}

/// Address path (spec §4.5, §4.8): queries each present `from/to/cc/bcc` condition
/// against the token index, intersects the per-field id sets (AND semantics, since
/// only flat conjunctions reach here), then hands the survivors to C3 for the
/// structural post-filter before sorting and paginating.
pub async fn query_address<T: Table>(
    account: &str,
    token_index: &TokenIndex<T>,
    email_repo: &EmailRepository<T>,
    parsed: &ParsedFilter,
    overfetch_floor: usize,
    page: PageRequest<'_>,
) -> Result<SearchResult, MethodError> {
    let overfetch = ((page.position.max(0) as usize + page.limit) * 4).max(overfetch_floor);

    let mut candidate_sets: Vec<HashSet<String>> = Vec::new();
    for (field, value) in parsed.address_conditions() {
        let Some(prefix) = normalize::normalize_token(value) else {
            continue;
        };
        let hits = token_index.query_tokens(account, field, &prefix, true).await?;
        let ids: HashSet<String> = hits.into_iter().take(overfetch).map(|(_, id)| id).collect();
        candidate_sets.push(ids);
    }

    let candidates: Vec<String> = match candidate_sets.split_first() {
        Some((first, rest)) => first
            .iter()
            .filter(|id| rest.iter().all(|set| set.contains(*id)))
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    let filtered = email_repo
        .filter_email_ids(account, &candidates, &parsed.structural)
        .await?;

    let mut items = Vec::with_capacity(filtered.len());
    for id in &filtered {
        if let Some(item) = email_repo.get_email(account, id).await? {
            items.push(item);
        }
    }
    items.sort_by(|a, b| {
        b.received_at
            .cmp(&a.received_at)
            .then_with(|| b.email_id.cmp(&a.email_id))
    });

    let ordered_ids: Vec<String> = items.into_iter().map(|e| e.email_id).collect();
    paginate_by_id(&ordered_ids, page)
}

fn vector_type_filter(type_filter: Option<&'static str>) -> Option<VectorType> {
    match type_filter {
        Some("subject") => Some(VectorType::Subject),
        Some("body") => Some(VectorType::Body),
        Some("summary") => Some(VectorType::Summary),
        _ => None,
    }
}

/// Builds the ANN metadata filter from the non-text-search parts of the parsed
/// filter (spec §4.6, §4.7 step 3). `inMailboxOtherThan` has no representable
/// `$ne`/`$nin` operator, so it is left to the structural post-filter applied to
/// each hit's re-fetched `EmailItem`.
fn build_metadata_filter(parsed: &ParsedFilter, type_filter: Option<&'static str>) -> MetadataFilter {
    let mut filter = MetadataFilter::default();
    if let Some(vt) = vector_type_filter(type_filter) {
        let type_str = match vt {
            VectorType::Subject => "subject",
            VectorType::Body => "body",
            VectorType::Summary => "summary",
        };
        filter.push("type", MetadataOp::Eq(Value::String(type_str.into())));
    }
    if let Some(mailbox) = &parsed.structural.in_mailbox {
        filter.push("mailboxIds", MetadataOp::Eq(Value::String(mailbox.clone())));
    }
    if let Some(keyword) = &parsed.structural.has_keyword {
        filter.push("keywords", MetadataOp::Eq(Value::String(keyword.clone())));
    }
    if let Some(has_attachment) = parsed.structural.has_attachment {
        filter.push("hasAttachment", MetadataOp::Eq(Value::Bool(has_attachment)));
    }
    if let Some(min_size) = parsed.structural.min_size {
        filter.push("size", MetadataOp::Gte(Value::from(min_size)));
    }
    if let Some(max_size) = parsed.structural.max_size {
        filter.push("size", MetadataOp::Lt(Value::from(max_size)));
    }
    if let Some(before) = parsed.structural.before {
        filter.push("receivedAt", MetadataOp::Lt(Value::String(before.to_rfc3339())));
    }
    if let Some(after) = parsed.structural.after {
        filter.push("receivedAt", MetadataOp::Gte(Value::String(after.to_rfc3339())));
    }
    filter
}

struct Boosted {
    email_id: String,
    similarity: f32,
    received_at: chrono::DateTime<chrono::Utc>,
}

/// Search orchestrator (C7): embed → ANN query → dedup/boost → sort → paginate.
pub async fn query_vector<T: Table, V: VectorStore, E: Embedder>(
    account: &str,
    email_repo: &EmailRepository<T>,
    vector_store: &V,
    embedder: &E,
    parsed: &ParsedFilter,
    overfetch_floor: usize,
    page: PageRequest<'_>,
) -> Result<SearchResult, MethodError> {
    let (search_text, type_filter) = parsed.vector_search_text();
    let embedding = embedder
        .generate_embedding(&search_text)
        .await
        .map_err(MethodError::from)?;

    let metadata_filter = build_metadata_filter(parsed, type_filter);
    let multiplier = if type_filter.is_none() { 5 } else { 3 };
    let top_k = ((page.position.max(0) as usize + page.limit) * multiplier).max(overfetch_floor.max(50));

    let hits = vector_store
        .query_vectors(account, &embedding, top_k, &metadata_filter)
        .await
        .map_err(MethodError::from)?;

    // Dedup by emailId, keeping the best boosted similarity. Untyped (`text`)
    // queries boost subject hits 1.5x, clamped to 1.0 (spec §4.7 step 5).
    let mut best: std::collections::HashMap<String, Boosted> = std::collections::HashMap::new();
    for hit in hits {
        let mut similarity = 1.0 - hit.distance;
        if type_filter.is_none() && hit.metadata.vector_type == VectorType::Subject {
            similarity = (similarity * 1.5).min(1.0);
        }
        best.entry(hit.metadata.email_id.clone())
            .and_modify(|b| {
                if similarity > b.similarity {
                    b.similarity = similarity;
                }
            })
            .or_insert(Boosted {
                email_id: hit.metadata.email_id.clone(),
                similarity,
                received_at: hit.metadata.received_at,
            });
    }

    let mut candidates: Vec<Boosted> = best.into_values().collect();

    // Post-filter for conditions the metadata filter can't express (notably
    // inMailboxOtherThan) and to exclude anything soft-deleted since indexing.
    let mut survivors = Vec::with_capacity(candidates.len());
    for candidate in candidates.drain(..) {
        if let Some(item) = email_repo.get_email(account, &candidate.email_id).await? {
            if parsed.structural.matches(&item) {
                survivors.push(candidate);
            }
        }
    }
    candidates = survivors;

    if type_filter.is_some() {
        candidates.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| b.email_id.cmp(&a.email_id))
        });
    } else {
        let (min_ts, max_ts) = candidates.iter().fold(
            (i64::MAX, i64::MIN),
            |(min, max), c| {
                let ts = c.received_at.timestamp();
                (min.min(ts), max.max(ts))
            },
        );
        let span = (max_ts - min_ts).max(1) as f64;
        let mut scored: Vec<(f64, Boosted)> = candidates
            .into_iter()
            .map(|c| {
                let recency = (c.received_at.timestamp() - min_ts) as f64 / span;
                let score = 0.6 * c.similarity as f64 + 0.4 * recency;
                (score, c)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap()
                .then_with(|| b.1.email_id.cmp(&a.1.email_id))
        });
        candidates = scored.into_iter().map(|(_, c)| c).collect();
    }

    let ordered_ids: Vec<String> = candidates.into_iter().map(|c| c.email_id).collect();
    paginate_by_id(&ordered_ids, page)
}
