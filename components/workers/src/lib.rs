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

//! Background workers (C12, C13, spec §4.12-§4.13): the two queue consumers that
//! do the work `Email/set` only schedules. Transport/delivery itself (spec §6,
//! "Queue messages") is deployment infrastructure; what lives here is the
//! consumer loop and the per-item processing it drives, following the same
//! `spawn_*(core, settings, rx)` shape the rest of this server uses for its other
//! long-running subsystems.

pub mod chunk;
pub mod cleanup;
pub mod html;
pub mod index;

pub use cleanup::{process_cleanup_message, CleanupMessage};
pub use index::{process_index_message, IndexAction, IndexMessage, IndexWorkerConfig};

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

use jmap_mail::blob::{BlobStreamer, BlobStreamerFactory, CharsetDecoder};
use mail_store::EmailRepository;
use state::StateLog;
use store::table::Table;
use token_index::TokenIndex;
use vector_store::{Embedder, Summarizer, VectorStore};

/// Handle to every collaborator the index worker needs, cloned into the spawned
/// task. Held behind `Arc` the way the teacher's own long-running services hold
/// their `JMAPServer<T>` core.
pub struct IndexWorkerContext<T, V, E, S, F>
where
    T: Table,
    V: VectorStore,
    E: Embedder,
    S: Summarizer,
    F: BlobStreamerFactory,
{
    pub email_repo: Arc<EmailRepository<T>>,
    pub token_index: Arc<TokenIndex<T>>,
    pub vector_store: Arc<V>,
    pub embedder: Arc<E>,
    pub summarizer: Option<Arc<S>>,
    pub state_log: Arc<StateLog<T>>,
    pub blob_factory: Arc<F>,
    pub charset_decoder: Arc<dyn CharsetDecoder>,
    pub config: IndexWorkerConfig,
    /// Upper bound on messages processed at once (spec §4.14 `worker-concurrency`).
    pub concurrency: usize,
}

/// Drains `rx` until the channel closes, processing up to `ctx.concurrency`
/// [`IndexMessage`]s at once. A failure is logged and the message dropped; real
/// delivery is a queue's job (redelivery/backoff/DLQ), not this loop's.
pub async fn spawn_index_worker<T, V, E, S, F>(ctx: Arc<IndexWorkerContext<T, V, E, S, F>>, mut rx: mpsc::Receiver<IndexMessage>)
where
    T: Table + 'static,
    V: VectorStore + 'static,
    E: Embedder + 'static,
    S: Summarizer + 'static,
    F: BlobStreamerFactory + 'static,
{
    let permits = Arc::new(Semaphore::new(ctx.concurrency.max(1)));
    tokio::spawn(async move {
        info!("Index worker started.");
        while let Some(message) = rx.recv().await {
            let ctx = ctx.clone();
            let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
            tokio::spawn(async move {
                let _permit = permit;
                let streamer = ctx.blob_factory.build(&message.api_url);
                let result = process_index_message(
                    &message,
                    ctx.email_repo.as_ref(),
                    ctx.token_index.as_ref(),
                    ctx.vector_store.as_ref(),
                    ctx.embedder.as_ref(),
                    ctx.summarizer.as_deref(),
                    &streamer,
                    ctx.charset_decoder.as_ref(),
                    ctx.state_log.as_ref(),
                    &ctx.config,
                )
                .await;
                if let Err(e) = result {
                    error!(error = %e, email_id = %message.email_id, account_id = %message.account_id, "index worker failed, message will be redelivered");
                }
            });
        }
        info!("Index worker exiting.");
    });
}

pub struct CleanupWorkerContext<T, V, F>
where
    T: Table,
    V: VectorStore,
    F: BlobStreamerFactory,
{
    pub email_repo: Arc<EmailRepository<T>>,
    pub state_log: Arc<StateLog<T>>,
    pub vector_store: Arc<V>,
    pub token_index: Arc<TokenIndex<T>>,
    pub blob_factory: Option<Arc<F>>,
    /// Upper bound on messages processed at once (spec §4.14 `worker-concurrency`).
    pub concurrency: usize,
}

pub async fn spawn_cleanup_worker<T, V, F>(ctx: Arc<CleanupWorkerContext<T, V, F>>, mut rx: mpsc::Receiver<CleanupMessage>)
where
    T: Table + 'static,
    V: VectorStore + 'static,
    F: BlobStreamerFactory + 'static,
{
    let permits = Arc::new(Semaphore::new(ctx.concurrency.max(1)));
    tokio::spawn(async move {
        info!("Mailbox cleanup worker started.");
        while let Some(message) = rx.recv().await {
            let ctx = ctx.clone();
            let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
            tokio::spawn(async move {
                let _permit = permit;
                let streamer = ctx.blob_factory.as_ref().map(|f| f.build(""));
                let streamer_ref: Option<&dyn BlobStreamer> = streamer.as_ref().map(|s| s as &dyn BlobStreamer);
                let result = process_cleanup_message(
                    &message,
                    ctx.email_repo.as_ref(),
                    ctx.state_log.as_ref(),
                    ctx.vector_store.as_ref(),
                    ctx.token_index.as_ref(),
                    streamer_ref,
                )
                .await;
                if let Err(e) = result {
                    error!(error = %e, mailbox_id = %message.mailbox_id, account_id = %message.account_id, "cleanup worker failed, message will be redelivered");
                }
            });
        }
        info!("Mailbox cleanup worker exiting.");
    });
}
