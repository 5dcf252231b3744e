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

use std::sync::Arc;

use futures::StreamExt;
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook_tokio::Signals;
use stalwart_jmap::JMAPCore;
use store::config::{CoreSettings, EnvSettings};
use tokio::sync::mpsc;
use tracing::{info, Level};

use jmap_mail::blob::{FakeBlobStore, FakeBlobStreamerFactory, Utf8OnlyDecoder};
use jmap_mail::header::FakeHeaderParser;
use mail_store::{EmailRepository, MailboxRepository};
use state::StateLog;
use store::table::InMemoryTable;
use token_index::TokenIndex;
use vector_store::{FakeEmbedder, FakeSummarizer, InMemoryVectorStore};
use workers::{IndexWorkerConfig, IndexWorkerContext};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let mut settings = EnvSettings::new();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(settings.parse::<Level>("log-level").unwrap_or(Level::INFO))
            .finish(),
    )
    .expect("failed to set default subscriber");

    if !settings.contains_key("jmap-hostname") {
        info!("jmap-hostname not set, using 'localhost'");
        settings.set_value("jmap-hostname".to_string(), "localhost".to_string());
    }

    let config = CoreSettings::from_env(&settings);

    // This core ships only the in-memory `Table` backend and deterministic
    // collaborator fakes (C17); a production deployment swaps these for real
    // bindings without touching `JMAPCore` or the handlers.
    let table = Arc::new(InMemoryTable::new());
    let email_repo = Arc::new(EmailRepository::new(table.clone()));
    let mailbox_repo = Arc::new(MailboxRepository::new(table.clone()));
    let token_index = Arc::new(TokenIndex::new(table.clone()));
    let state_log = Arc::new(StateLog::new(table));
    let vector_store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(FakeEmbedder::new(config.vector_embedding_dim.min(256)));
    let blob_factory = Arc::new(FakeBlobStreamerFactory::new(Arc::new(FakeBlobStore::new())));

    let (index_tx, index_rx) = mpsc::channel(256);
    let (cleanup_tx, cleanup_rx) = mpsc::channel(256);

    let index_ctx = Arc::new(IndexWorkerContext {
        email_repo: email_repo.clone(),
        token_index: token_index.clone(),
        vector_store: vector_store.clone(),
        embedder: embedder.clone(),
        summarizer: Some(Arc::new(FakeSummarizer)),
        state_log: state_log.clone(),
        blob_factory: blob_factory.clone(),
        charset_decoder: Arc::new(Utf8OnlyDecoder),
        config: IndexWorkerConfig {
            chunk_size_chars: config.search_chunk_size_chars,
            chunk_overlap_ratio: config.search_chunk_overlap_ratio as f64,
            overwrite_preview_on_summary: false,
        },
        concurrency: config.worker_concurrency,
    });
    workers::spawn_index_worker(index_ctx, index_rx).await;

    let cleanup_ctx = Arc::new(workers::CleanupWorkerContext {
        email_repo: email_repo.clone(),
        state_log: state_log.clone(),
        vector_store: vector_store.clone(),
        token_index: token_index.clone(),
        blob_factory: Some(blob_factory.clone()),
        concurrency: config.worker_concurrency,
    });
    workers::spawn_cleanup_worker(cleanup_ctx, cleanup_rx).await;

    let core = JMAPCore {
        email_repo,
        mailbox_repo,
        token_index,
        state_log,
        vector_store,
        embedder,
        summarizer: Some(Arc::new(FakeSummarizer)),
        blob_factory,
        charset_decoder: Arc::new(Utf8OnlyDecoder),
        header_parser: Arc::new(FakeHeaderParser),
        config,
        index_worker: index_tx,
        cleanup_worker: cleanup_tx,
    };
    let _core = Arc::new(core);

    info!("Stalwart JMAP core v{} ready.", env!("CARGO_PKG_VERSION"));

    let mut signals = Signals::new([SIGHUP, SIGTERM, SIGINT, SIGQUIT])?;
    while let Some(signal) = signals.next().await {
        match signal {
            SIGHUP => {
                // Reload configuration - left to the embedding application.
            }
            SIGTERM | SIGINT | SIGQUIT => {
                info!("Shutting down Stalwart JMAP core v{}...", env!("CARGO_PKG_VERSION"));
                break;
            }
            _ => unreachable!(),
        }
    }

    Ok(())
}
