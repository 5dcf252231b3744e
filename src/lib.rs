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

//! Top-level core: wires the repositories (C1-C8) and handlers (C9-C11) into one
//! request dispatcher, and owns the background workers (C12/C13) the way the
//! teacher's `JMAPServer<T>` owns `email_delivery`/`housekeeper`/`state_change`.

use std::sync::Arc;

use jmap::protocol::invocation::{Invocation, MethodResponse};
use jmap::MethodError;
use jmap_mail::blob::{BlobStreamer, BlobStreamerFactory, CharsetDecoder};
use jmap_mail::header::HeaderParser;
use jmap_mail::{email_get, email_query, object_changes, thread_get, EmailGetContext, EmailQueryContext};
use mail_store::{EmailRepository, MailboxRepository};
use state::StateLog;
use store::config::CoreSettings;
use store::model::ObjectType;
use store::table::Table;
use token_index::TokenIndex;
use tokio::sync::mpsc;
use vector_store::{Embedder, Summarizer, VectorStore};

/// Everything one request dispatch needs. Generic over the store backend and the
/// external collaborators (§1: blob streaming, embedding, summarisation, charset
/// decoding, header parsing) the way `jmap_mail`'s handler contexts already are.
pub struct JMAPCore<T, V, E, S, F>
where
    T: Table,
    V: VectorStore,
    E: Embedder,
    S: Summarizer,
    F: BlobStreamerFactory,
{
    pub email_repo: Arc<EmailRepository<T>>,
    pub mailbox_repo: Arc<MailboxRepository<T>>,
    pub token_index: Arc<TokenIndex<T>>,
    pub state_log: Arc<StateLog<T>>,
    pub vector_store: Arc<V>,
    pub embedder: Arc<E>,
    pub summarizer: Option<Arc<S>>,
    pub blob_factory: Arc<F>,
    pub charset_decoder: Arc<dyn CharsetDecoder>,
    pub header_parser: Arc<dyn HeaderParser>,
    pub config: CoreSettings,

    pub index_worker: mpsc::Sender<workers::IndexMessage>,
    pub cleanup_worker: mpsc::Sender<workers::CleanupMessage>,
}

impl<T, V, E, S, F> JMAPCore<T, V, E, S, F>
where
    T: Table,
    V: VectorStore,
    E: Embedder,
    S: Summarizer,
    F: BlobStreamerFactory,
{
    /// Routes one method invocation (spec §6) to its C9-C11 handler and folds the
    /// result into the envelope response, so no caller-visible exception escapes
    /// (spec §4.15: "the top-level dispatcher converts `Err` into the error
    /// envelope").
    pub async fn dispatch(&self, invocation: Invocation) -> MethodResponse {
        let streamer = self.blob_factory.build(&invocation.api_url);
        let result = self.dispatch_inner(&invocation, &streamer).await;
        match result {
            Ok(args) => MethodResponse::ok(invocation.method, args, invocation.client_id),
            Err(e) => MethodResponse::error(e, invocation.client_id),
        }
    }

    async fn dispatch_inner(
        &self,
        invocation: &Invocation,
        streamer: &F::Streamer,
    ) -> Result<serde_json::Value, MethodError> {
        match invocation.method.as_str() {
            "Email/get" => {
                let ctx = EmailGetContext {
                    email_repo: self.email_repo.as_ref(),
                    state_log: self.state_log.as_ref(),
                    blob_streamer: streamer as &dyn BlobStreamer,
                    charset_decoder: self.charset_decoder.as_ref(),
                    header_parser: self.header_parser.as_ref(),
                    default_max_body_value_bytes: self.config.max_body_value_bytes,
                };
                email_get(&invocation.account_id, &invocation.args, &ctx).await
            }
            "Email/query" => {
                let ctx = EmailQueryContext {
                    email_repo: self.email_repo.as_ref(),
                    mailbox_repo: self.mailbox_repo.as_ref(),
                    token_index: self.token_index.as_ref(),
                    vector_store: self.vector_store.as_ref(),
                    embedder: self.embedder.as_ref(),
                    state_log: self.state_log.as_ref(),
                    overfetch_floor: self.config.address_token_overfetch_floor,
                };
                email_query(&invocation.account_id, &invocation.args, &ctx).await
            }
            "Email/changes" => {
                object_changes(
                    &invocation.account_id,
                    ObjectType::Email,
                    &invocation.args,
                    self.state_log.as_ref(),
                    self.config.default_max_changes,
                )
                .await
            }
            "Thread/get" => thread_get(&invocation.account_id, &invocation.args, self.email_repo.as_ref(), self.state_log.as_ref()).await,
            "Thread/changes" => {
                object_changes(
                    &invocation.account_id,
                    ObjectType::Thread,
                    &invocation.args,
                    self.state_log.as_ref(),
                    self.config.default_max_changes,
                )
                .await
            }
            other => Err(MethodError::InvalidArguments(format!("unknown method {other}"))),
        }
    }

    /// Enqueues an index/delete job for the index worker (spec §4.12). The queue
    /// transport itself is out of scope; this just hands the message to the
    /// in-process channel the caller wired up at startup.
    pub async fn enqueue_index(&self, message: workers::IndexMessage) -> Result<(), mpsc::error::SendError<workers::IndexMessage>> {
        self.index_worker.send(message).await
    }

    pub async fn enqueue_cleanup(&self, message: workers::CleanupMessage) -> Result<(), mpsc::error::SendError<workers::CleanupMessage>> {
        self.cleanup_worker.send(message).await
    }
}
