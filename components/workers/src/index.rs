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

//! Index worker (C12, spec §4.12): embeds and token-indexes one email per message.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use jmap_mail::blob::{BlobStreamer, CharsetDecoder};
use mail_store::EmailRepository;
use store::model::{ChangeType, ObjectType};
use store::table::Table;
use store::{Result, StoreError};
use token_index::TokenIndex;
use vector_store::{Embedder, Summarizer, VectorMetadata, VectorRecord, VectorStore, VectorType};

use crate::chunk::chunk_text;
use crate::html::strip_html;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexAction {
    Index,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMessage {
    pub account_id: String,
    pub email_id: String,
    pub action: IndexAction,
    pub api_url: String,
}

pub struct IndexWorkerConfig {
    pub chunk_size_chars: usize,
    pub chunk_overlap_ratio: f64,
    pub overwrite_preview_on_summary: bool,
}

impl Default for IndexWorkerConfig {
    fn default() -> Self {
        IndexWorkerConfig {
            chunk_size_chars: 2000,
            chunk_overlap_ratio: 0.1,
            overwrite_preview_on_summary: false,
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn process_index_message<T, V, E, S>(
    message: &IndexMessage,
    email_repo: &EmailRepository<T>,
    token_index: &TokenIndex<T>,
    vector_store: &V,
    embedder: &E,
    summarizer: Option<&S>,
    blob_streamer: &dyn BlobStreamer,
    charset_decoder: &dyn CharsetDecoder,
    state_log: &state::StateLog<T>,
    config: &IndexWorkerConfig,
) -> Result<()>
where
    T: Table,
    V: VectorStore,
    E: Embedder,
    S: Summarizer,
{
    match message.action {
        IndexAction::Index => {
            index_email(
                message,
                email_repo,
                token_index,
                vector_store,
                embedder,
                summarizer,
                blob_streamer,
                charset_decoder,
                state_log,
                config,
            )
            .await
        }
        IndexAction::Delete => delete_email_index(message, email_repo, token_index, vector_store).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn index_email<T, V, E, S>(
    message: &IndexMessage,
    email_repo: &EmailRepository<T>,
    token_index: &TokenIndex<T>,
    vector_store: &V,
    embedder: &E,
    summarizer: Option<&S>,
    blob_streamer: &dyn BlobStreamer,
    charset_decoder: &dyn CharsetDecoder,
    state_log: &state::StateLog<T>,
    config: &IndexWorkerConfig,
) -> Result<()>
where
    T: Table,
    V: VectorStore,
    E: Embedder,
    S: Summarizer,
{
    let Some(item) = email_repo.get_email(&message.account_id, &message.email_id).await? else {
        // Deleted before we got to it - not an error (spec §4.12 step 2).
        return Ok(());
    };

    let part_ids: &[String] = if !item.text_body.is_empty() {
        &item.text_body
    } else {
        &item.html_body
    };
    let is_html = item.text_body.is_empty() && !item.html_body.is_empty();

    let mut body_text = String::new();
    for part_id in part_ids {
        let Some(part) = item.body_structure.find(part_id) else {
            continue;
        };
        let Some(blob_id) = &part.blob_id else {
            continue;
        };
        let bytes = blob_streamer.read(&message.account_id, blob_id).await?;
        let decoded = charset_decoder
            .decode(&bytes, part.charset.as_deref())
            .map_err(|_| StoreError::InvalidArguments(format!("undecodable body part {part_id}")))?;
        body_text.push_str(&decoded);
        body_text.push('\n');
    }
    if is_html {
        body_text = strip_html(&body_text);
    }

    let from_tokens = item
        .from
        .iter()
        .flat_map(token_index::normalize::tokens_for_address)
        .collect::<Vec<_>>();
    let to_tokens = item
        .to
        .iter()
        .flat_map(token_index::normalize::tokens_for_address)
        .collect::<Vec<_>>();
    let cc_tokens = item
        .cc
        .iter()
        .flat_map(token_index::normalize::tokens_for_address)
        .collect::<Vec<_>>();
    let bcc_tokens = item
        .bcc
        .iter()
        .flat_map(token_index::normalize::tokens_for_address)
        .collect::<Vec<_>>();

    let base_metadata = |vector_type: VectorType| VectorMetadata {
        email_id: item.email_id.clone(),
        received_at: item.received_at,
        subject: item.subject.clone().unwrap_or_default(),
        vector_type,
        mailbox_ids: item.mailbox_ids.iter().cloned().collect(),
        keywords: item.keywords.iter().cloned().collect(),
        has_attachment: item.has_attachment,
        size: item.size,
        from_tokens: from_tokens.clone(),
        to_tokens: to_tokens.clone(),
        cc_tokens: cc_tokens.clone(),
        bcc_tokens: bcc_tokens.clone(),
        summary: item.summary.clone(),
    };

    vector_store.ensure_index(&message.account_id).await?;

    let chunks = chunk_text(&body_text, config.chunk_size_chars, config.chunk_overlap_ratio);
    for (n, chunk) in chunks.iter().enumerate() {
        let vector = embedder.generate_embedding(chunk).await?;
        vector_store
            .put_vector(
                &message.account_id,
                VectorRecord {
                    key: format!("{}#{}", item.email_id, n),
                    vector,
                    metadata: base_metadata(VectorType::Body),
                },
            )
            .await?;
    }

    if let Some(subject) = item.subject.as_deref().filter(|s| !s.is_empty()) {
        let vector = embedder.generate_embedding(subject).await?;
        vector_store
            .put_vector(
                &message.account_id,
                VectorRecord {
                    key: format!("{}#subject", item.email_id),
                    vector,
                    metadata: base_metadata(VectorType::Subject),
                },
            )
            .await?;
    }

    if let Some(summarizer) = summarizer {
        let from_address = item.from.first().map(|a| a.email.as_str()).unwrap_or_default();
        match summarizer.summarize(item.subject.as_deref().unwrap_or(""), from_address, &body_text).await {
            Ok(summary) => {
                let items = email_repo
                    .build_update_summary_items(
                        &message.account_id,
                        &item.email_id,
                        &summary,
                        config.overwrite_preview_on_summary,
                    )
                    .await?;
                email_repo.commit(items).await?;
                state_log
                    .append(&message.account_id, ObjectType::Email, &item.email_id, ChangeType::Updated)
                    .await?;

                let vector = embedder.generate_embedding(&summary).await?;
                let mut metadata = base_metadata(VectorType::Summary);
                metadata.summary = Some(summary);
                vector_store
                    .put_vector(
                        &message.account_id,
                        VectorRecord {
                            key: format!("{}#summary", item.email_id),
                            vector,
                            metadata,
                        },
                    )
                    .await?;
            }
            Err(e) => {
                warn!(error = %e, email_id = %item.email_id, "summariser failed, continuing without it");
            }
        }
    }

    token_index.rewrite_email_tokens(&message.account_id, &item).await?;

    let items = email_repo
        .build_update_search_chunks_items(&message.account_id, &item.email_id, chunks.len())
        .await?;
    email_repo.commit(items).await?;

    Ok(())
}

async fn delete_email_index<T: Table, V: VectorStore>(
    message: &IndexMessage,
    email_repo: &EmailRepository<T>,
    token_index: &TokenIndex<T>,
    vector_store: &V,
) -> Result<()> {
    let Some(item) = email_repo
        .get_email_internal(&message.account_id, &message.email_id)
        .await?
    else {
        return Ok(());
    };

    let mut keys: Vec<String> = (0..item.search_chunks)
        .map(|n| format!("{}#{}", item.email_id, n))
        .collect();
    keys.push(format!("{}#subject", item.email_id));
    keys.push(format!("{}#summary", item.email_id));

    if let Err(e) = vector_store.delete_vectors(&message.account_id, &keys).await {
        error!(error = %e, email_id = %item.email_id, "failed to delete vectors");
        return Err(e);
    }
    token_index.delete_email_tokens(&message.account_id, &item.email_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use jmap_mail::blob::{FakeBlobStore, FakeBlobStreamer, Utf8OnlyDecoder};
    use mail_store::EmailRepository;
    use state::StateLog;
    use std::sync::Arc;
    use store::model::{BodyPart, EmailAddress, EmailItem};
    use store::table::InMemoryTable;
    use token_index::TokenIndex;
    use vector_store::{FakeEmbedder, FakeSummarizer, InMemoryVectorStore};

    fn email_with_body(id: &str, body_blob: &str) -> EmailItem {
        let part = BodyPart {
            part_id: "1".into(),
            media_type: Some("text/plain".into()),
            blob_id: Some(body_blob.into()),
            size: 11,
            charset: Some("utf-8".into()),
            disposition: None,
            name: None,
            sub_parts: vec![],
        };
        EmailItem {
            account_id: "a1".into(),
            email_id: id.into(),
            blob_id: "full".into(),
            thread_id: "t1".into(),
            mailbox_ids: ["m1".to_string()].into_iter().collect(),
            keywords: Default::default(),
            received_at: Utc.timestamp_opt(1000, 0).unwrap(),
            sent_at: None,
            size: 100,
            header_size: 10,
            has_attachment: false,
            subject: Some("Hello world".into()),
            sender: vec![],
            from: vec![EmailAddress {
                name: None,
                email: "alice@example.com".into(),
            }],
            to: vec![],
            cc: vec![],
            bcc: vec![],
            reply_to: vec![],
            message_id: vec![],
            in_reply_to: vec![],
            references: vec![],
            preview: String::new(),
            summary: None,
            body_structure: part,
            text_body: vec!["1".into()],
            html_body: vec![],
            attachments: vec![],
            search_chunks: 0,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn indexing_writes_body_subject_and_tokens() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let token_index = TokenIndex::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let embedder = FakeEmbedder::new(8);
        let state_log = StateLog::new(table);

        let item = email_with_body("e1", "body-blob");
        email_repo
            .commit(EmailRepository::<InMemoryTable>::build_create_email_items(&item).unwrap())
            .await
            .unwrap();

        let mut blobs = FakeBlobStore::new();
        blobs.insert("body-blob", b"hello there friend".to_vec());
        let streamer = FakeBlobStreamer::new(Arc::new(blobs));
        let decoder = Utf8OnlyDecoder;

        let message = IndexMessage {
            account_id: "a1".into(),
            email_id: "e1".into(),
            action: IndexAction::Index,
            api_url: "https://example".into(),
        };

        process_index_message::<InMemoryTable, _, _, FakeSummarizer>(
            &message,
            &email_repo,
            &token_index,
            &vector_store,
            &embedder,
            None,
            &streamer,
            &decoder,
            &state_log,
            &IndexWorkerConfig::default(),
        )
        .await
        .unwrap();

        assert!(vector_store.is_known("a1"));
        let hits = token_index.query_tokens("a1", "from", "alice", true).await.unwrap();
        assert!(hits.iter().any(|(_, id)| id == "e1"));

        let updated = email_repo.get_email("a1", "e1").await.unwrap().unwrap();
        assert_eq!(updated.search_chunks, 1);
    }

    #[tokio::test]
    async fn missing_email_indexes_as_success() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let token_index = TokenIndex::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let embedder = FakeEmbedder::new(8);
        let state_log = StateLog::new(table);
        let streamer = FakeBlobStreamer::new(Arc::new(FakeBlobStore::new()));
        let decoder = Utf8OnlyDecoder;

        let message = IndexMessage {
            account_id: "a1".into(),
            email_id: "missing".into(),
            action: IndexAction::Index,
            api_url: "https://example".into(),
        };

        process_index_message::<InMemoryTable, _, _, FakeSummarizer>(
            &message,
            &email_repo,
            &token_index,
            &vector_store,
            &embedder,
            None,
            &streamer,
            &decoder,
            &state_log,
            &IndexWorkerConfig::default(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delete_removes_vectors_and_tokens() {
        let table = Arc::new(InMemoryTable::new());
        let email_repo = EmailRepository::new(table.clone());
        let token_index = TokenIndex::new(table.clone());
        let vector_store = InMemoryVectorStore::new();
        let embedder = FakeEmbedder::new(8);
        let state_log = StateLog::new(table);
        let mut blobs = FakeBlobStore::new();
        blobs.insert("body-blob", b"hello there friend".to_vec());
        let streamer = FakeBlobStreamer::new(Arc::new(blobs));
        let decoder = Utf8OnlyDecoder;

        let item = email_with_body("e1", "body-blob");
        email_repo
            .commit(EmailRepository::<InMemoryTable>::build_create_email_items(&item).unwrap())
            .await
            .unwrap();

        let index_message = IndexMessage {
            account_id: "a1".into(),
            email_id: "e1".into(),
            action: IndexAction::Index,
            api_url: "https://example".into(),
        };
        process_index_message::<InMemoryTable, _, _, FakeSummarizer>(
            &index_message,
            &email_repo,
            &token_index,
            &vector_store,
            &embedder,
            None,
            &streamer,
            &decoder,
            &state_log,
            &IndexWorkerConfig::default(),
        )
        .await
        .unwrap();

        let delete_message = IndexMessage {
            account_id: "a1".into(),
            email_id: "e1".into(),
            action: IndexAction::Delete,
            api_url: "https://example".into(),
        };
        process_index_message::<InMemoryTable, _, _, FakeSummarizer>(
            &delete_message,
            &email_repo,
            &token_index,
            &vector_store,
            &embedder,
            None,
            &streamer,
            &decoder,
            &state_log,
            &IndexWorkerConfig::default(),
        )
        .await
        .unwrap();

        let hits = token_index.query_tokens("a1", "from", "alice", true).await.unwrap();
        assert!(hits.is_empty());
    }
}
