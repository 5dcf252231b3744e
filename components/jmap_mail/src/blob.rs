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

//! Blob streaming and charset decoding (spec §6, §1 "Out of scope"): both are
//! external collaborators. This module defines the capability traits C10 needs and
//! a deterministic in-memory fake (C17) standing in for the real blob store and
//! MIME/charset-decoding providers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use store::Result;

/// Produced by `BlobStreamerFactory(apiUrl)` per request (spec §6); the worker and
/// `Email/get` handler read full blob bytes through it.
#[async_trait]
pub trait BlobStreamer: Send + Sync {
    async fn read(&self, account_id: &str, blob_id: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait BlobStreamerFactory: Send + Sync {
    type Streamer: BlobStreamer;

    fn build(&self, api_url: &str) -> Self::Streamer;
}

/// Decodes raw bytes from a declared MIME charset to UTF-8 (RFC 2047/charset
/// decoding is an out-of-scope external collaborator, spec §1).
pub trait CharsetDecoder: Send + Sync {
    /// `Err` signals an undecodable blob; the caller reports `isEncodingProblem`.
    fn decode(&self, bytes: &[u8], charset: Option<&str>) -> std::result::Result<String, ()>;
}

#[derive(Default)]
pub struct FakeBlobStore {
    blobs: HashMap<String, Vec<u8>>,
}

impl FakeBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, blob_id: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(blob_id.into(), bytes.into());
    }
}

pub struct FakeBlobStreamer {
    store: Arc<FakeBlobStore>,
}

impl FakeBlobStreamer {
    pub fn new(store: Arc<FakeBlobStore>) -> Self {
        FakeBlobStreamer { store }
    }
}

#[async_trait]
impl BlobStreamer for FakeBlobStreamer {
    async fn read(&self, _account_id: &str, blob_id: &str) -> Result<Vec<u8>> {
        self.store
            .blobs
            .get(blob_id)
            .cloned()
            .ok_or_else(|| store::StoreError::NotFound(blob_id.to_string()))
    }
}

/// Builds a [`FakeBlobStreamer`] against one shared in-memory store regardless of
/// `apiUrl`. The real factory would mint a client scoped to that URL; this core
/// ships no such binding (spec §1 "blob streaming" is an external collaborator).
pub struct FakeBlobStreamerFactory {
    store: Arc<FakeBlobStore>,
}

impl FakeBlobStreamerFactory {
    pub fn new(store: Arc<FakeBlobStore>) -> Self {
        FakeBlobStreamerFactory { store }
    }
}

#[async_trait]
impl BlobStreamerFactory for FakeBlobStreamerFactory {
    type Streamer = FakeBlobStreamer;

    fn build(&self, _api_url: &str) -> Self::Streamer {
        FakeBlobStreamer::new(self.store.clone())
    }
}

/// UTF-8-only: any declared charset other than `utf-8`/absent is treated as
/// undecodable. A real implementation would dispatch to `encoding_rs`; this core's
/// scope stops at the decision point the spec names (§1 "charset decoding" is
/// external).
pub struct Utf8OnlyDecoder;

impl CharsetDecoder for Utf8OnlyDecoder {
    fn decode(&self, bytes: &[u8], charset: Option<&str>) -> std::result::Result<String, ()> {
        match charset {
            None | Some("utf-8") | Some("UTF-8") | Some("us-ascii") => {
                String::from_utf8(bytes.to_vec()).map_err(|_| ())
            }
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_blob_streamer_reads_inserted_blobs() {
        let mut store = FakeBlobStore::new();
        store.insert("b1", b"hello".to_vec());
        let streamer = FakeBlobStreamer::new(Arc::new(store));
        let bytes = streamer.read("a1", "b1").await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn utf8_decoder_rejects_unknown_charset() {
        let decoder = Utf8OnlyDecoder;
        assert!(decoder.decode(b"hi", Some("iso-2022-jp")).is_err());
        assert_eq!(decoder.decode(b"hi", None).unwrap(), "hi");
    }
}
