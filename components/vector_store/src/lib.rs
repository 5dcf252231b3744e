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

//! Vector store adapter (C6, spec §4.6): one ANN index per account, metadata filter
//! support, and the process-wide "known indexes" monotone-grow cache (spec §5
//! "Shared state"). The only backend shipped is an in-memory brute-force cosine
//! index; a production ANN binding is deployment infrastructure, out of scope.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use store::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorType {
    Body,
    Subject,
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorMetadata {
    pub email_id: String,
    pub received_at: DateTime<Utc>,
    pub subject: String,
    #[serde(rename = "type")]
    pub vector_type: VectorType,
    pub mailbox_ids: Vec<String>,
    pub keywords: Vec<String>,
    pub has_attachment: bool,
    pub size: usize,
    pub from_tokens: Vec<String>,
    pub to_tokens: Vec<String>,
    pub cc_tokens: Vec<String>,
    pub bcc_tokens: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub key: String,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

#[derive(Debug, Clone)]
pub struct VectorQueryHit {
    pub key: String,
    pub distance: f32,
    pub metadata: VectorMetadata,
}

/// One metadata condition. `$eq` against a list-valued field matches when any
/// element equals the scalar (spec §4.6).
#[derive(Debug, Clone)]
pub enum MetadataOp {
    Eq(Value),
    Gte(Value),
    Lte(Value),
    Lt(Value),
    Gt(Value),
    In(Vec<Value>),
}

#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub conditions: Vec<(String, MetadataOp)>,
}

impl MetadataFilter {
    pub fn push(&mut self, field: impl Into<String>, op: MetadataOp) -> &mut Self {
        self.conditions.push((field.into(), op));
        self
    }

    fn matches(&self, metadata: &Value) -> bool {
        self.conditions
            .iter()
            .all(|(field, op)| field_matches(metadata.get(field).unwrap_or(&Value::Null), op))
    }
}

fn field_matches(value: &Value, op: &MetadataOp) -> bool {
    match op {
        MetadataOp::Eq(target) => value_eq(value, target),
        MetadataOp::In(targets) => targets.iter().any(|t| value_eq(value, t)),
        MetadataOp::Gte(target) => compare(value, target).map(|o| o.is_ge()).unwrap_or(false),
        MetadataOp::Lte(target) => compare(value, target).map(|o| o.is_le()).unwrap_or(false),
        MetadataOp::Gt(target) => compare(value, target).map(|o| o.is_gt()).unwrap_or(false),
        MetadataOp::Lt(target) => compare(value, target).map(|o| o.is_lt()).unwrap_or(false),
    }
}

fn value_eq(value: &Value, target: &Value) -> bool {
    if let Value::Array(items) = value {
        return items.iter().any(|v| v == target);
    }
    value == target
}

fn compare(value: &Value, target: &Value) -> Option<std::cmp::Ordering> {
    let a = value.as_f64().or_else(|| value.as_str().and_then(|s| s.parse().ok()))?;
    let b = target
        .as_f64()
        .or_else(|| target.as_str().and_then(|s| s.parse().ok()))?;
    a.partial_cmp(&b)
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent; concurrent calls racing the backend's own conflict response
    /// must still converge to "known" (spec §4.6, §5).
    async fn ensure_index(&self, account: &str) -> Result<()>;
    async fn put_vector(&self, account: &str, record: VectorRecord) -> Result<()>;
    async fn delete_vectors(&self, account: &str, keys: &[String]) -> Result<()>;
    async fn query_vectors(
        &self,
        account: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorQueryHit>>;
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    known_indexes: Mutex<HashSet<String>>,
    vectors: Mutex<HashMap<String, HashMap<String, (Vec<f32>, VectorMetadata)>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_known(&self, account: &str) -> bool {
        self.known_indexes.lock().contains(account)
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_index(&self, account: &str) -> Result<()> {
        self.known_indexes.lock().insert(account.to_string());
        Ok(())
    }

    async fn put_vector(&self, account: &str, record: VectorRecord) -> Result<()> {
        self.known_indexes.lock().insert(account.to_string());
        self.vectors
            .lock()
            .entry(account.to_string())
            .or_default()
            .insert(record.key, (record.vector, record.metadata));
        Ok(())
    }

    async fn delete_vectors(&self, account: &str, keys: &[String]) -> Result<()> {
        if let Some(acct) = self.vectors.lock().get_mut(account) {
            for key in keys {
                acct.remove(key);
            }
        }
        Ok(())
    }

    async fn query_vectors(
        &self,
        account: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorQueryHit>> {
        let vectors = self.vectors.lock();
        let Some(acct) = vectors.get(account) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<VectorQueryHit> = acct
            .iter()
            .filter_map(|(key, (v, metadata))| {
                let metadata_json = serde_json::to_value(metadata).ok()?;
                if !filter.matches(&metadata_json) {
                    return None;
                }
                Some(VectorQueryHit {
                    key: key.clone(),
                    distance: cosine_distance(vector, v),
                    metadata: metadata.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap());
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// External embedding collaborator (spec §6): fixed-dimension per deployment, one
/// model for the whole deployment.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>>;
}

/// Optional summarisation collaborator (spec §4.12 step 7, §6). Its absence
/// disables summary vectors entirely; it never fails an index operation.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, subject: &str, from_address: &str, body_text: &str) -> Result<String>;
}

/// Deterministic test fake (C17): hashes the text into a fixed-width vector so
/// equal inputs embed identically and near-duplicates land close together.
pub struct FakeEmbedder {
    pub dim: usize,
}

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self {
        FakeEmbedder { dim }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dim] += byte as f32;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// Deterministic test fake: truncates the body to a fixed length prefixed by the
/// subject, standing in for an LLM summariser.
pub struct FakeSummarizer;

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, subject: &str, _from_address: &str, body_text: &str) -> Result<String> {
        let snippet: String = body_text.chars().take(120).collect();
        Ok(format!("{subject}: {snippet}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn metadata(email_id: &str, vector_type: VectorType) -> VectorMetadata {
        VectorMetadata {
            email_id: email_id.into(),
            received_at: Utc::now(),
            subject: "hi".into(),
            vector_type,
            mailbox_ids: vec!["m1".into()],
            keywords: vec![],
            has_attachment: false,
            size: 10,
            from_tokens: vec![],
            to_tokens: vec![],
            cc_tokens: vec![],
            bcc_tokens: vec![],
            summary: None,
        }
    }

    #[tokio::test]
    async fn ensure_index_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.ensure_index("a1").await.unwrap();
        store.ensure_index("a1").await.unwrap();
        assert!(store.is_known("a1"));
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_distance() {
        let store = InMemoryVectorStore::new();
        store
            .put_vector(
                "a1",
                VectorRecord {
                    key: "e1#0".into(),
                    vector: vec![1.0, 0.0],
                    metadata: metadata("e1", VectorType::Body),
                },
            )
            .await
            .unwrap();
        store
            .put_vector(
                "a1",
                VectorRecord {
                    key: "e2#0".into(),
                    vector: vec![0.0, 1.0],
                    metadata: metadata("e2", VectorType::Body),
                },
            )
            .await
            .unwrap();

        let hits = store
            .query_vectors("a1", &[1.0, 0.0], 5, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits[0].key, "e1#0");
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn metadata_filter_eq_on_list_field_matches_any_element() {
        let store = InMemoryVectorStore::new();
        store
            .put_vector(
                "a1",
                VectorRecord {
                    key: "e1#0".into(),
                    vector: vec![1.0, 0.0],
                    metadata: metadata("e1", VectorType::Body),
                },
            )
            .await
            .unwrap();

        let mut filter = MetadataFilter::default();
        filter.push("mailboxIds", MetadataOp::Eq(Value::String("m1".into())));
        let hits = store
            .query_vectors("a1", &[1.0, 0.0], 5, &filter)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        let mut miss_filter = MetadataFilter::default();
        miss_filter.push("mailboxIds", MetadataOp::Eq(Value::String("m2".into())));
        let misses = store
            .query_vectors("a1", &[1.0, 0.0], 5, &miss_filter)
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_vector() {
        let store = InMemoryVectorStore::new();
        store
            .put_vector(
                "a1",
                VectorRecord {
                    key: "e1#0".into(),
                    vector: vec![1.0, 0.0],
                    metadata: metadata("e1", VectorType::Body),
                },
            )
            .await
            .unwrap();
        store
            .delete_vectors("a1", &["e1#0".to_string()])
            .await
            .unwrap();
        let hits = store
            .query_vectors("a1", &[1.0, 0.0], 5, &MetadataFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
