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

//! Flat `--key=value` / environment-variable settings bag (spec §4.14, C14). Same
//! shape as the teacher's `EnvSettings`: no config-file format, typed accessors via
//! `FromStr`.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;

pub struct EnvSettings {
    pub args: HashMap<String, String>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSettings {
    pub fn new() -> Self {
        let mut args = HashMap::new();
        let mut current_key: Option<String> = None;

        for arg in env::args().skip(1) {
            if let Some(stripped) = arg.strip_prefix("--") {
                if let Some((key, value)) = stripped.split_once('=') {
                    args.insert(key.to_lowercase(), value.to_string());
                } else {
                    current_key = Some(stripped.to_lowercase());
                }
            } else if let Some(key) = current_key.take() {
                args.insert(key, arg);
            }
        }

        EnvSettings { args }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.args.get(name) {
            Some(value.clone())
        } else {
            env::var(name.replace('-', "_").to_uppercase()).ok()
        }
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.args.contains_key(name)
            || env::var(name.replace('-', "_").to_uppercase()).is_ok()
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|value| value.parse::<T>().ok())
    }

    pub fn set_value(&mut self, key: String, value: String) {
        self.args.insert(key, value);
    }
}

/// Deployment knobs this core reads, with the defaults named in spec §4.14.
pub struct CoreSettings {
    pub state_retention_days: i64,
    pub search_chunk_size_chars: usize,
    pub search_chunk_overlap_ratio: f32,
    pub vector_embedding_dim: usize,
    pub max_body_value_bytes: usize,
    pub address_token_overfetch_floor: usize,
    pub worker_concurrency: usize,
    pub default_max_changes: usize,
}

impl Default for CoreSettings {
    fn default() -> Self {
        CoreSettings {
            state_retention_days: 7,
            search_chunk_size_chars: 2000,
            search_chunk_overlap_ratio: 0.1,
            vector_embedding_dim: 1536,
            max_body_value_bytes: 256 * 1024,
            address_token_overfetch_floor: 100,
            worker_concurrency: 8,
            default_max_changes: 500,
        }
    }
}

impl CoreSettings {
    pub fn from_env(settings: &EnvSettings) -> Self {
        let defaults = CoreSettings::default();
        CoreSettings {
            state_retention_days: settings
                .parse("state-retention-days")
                .unwrap_or(defaults.state_retention_days),
            search_chunk_size_chars: settings
                .parse("search-chunk-size-chars")
                .unwrap_or(defaults.search_chunk_size_chars),
            search_chunk_overlap_ratio: settings
                .parse("search-chunk-overlap-ratio")
                .unwrap_or(defaults.search_chunk_overlap_ratio),
            vector_embedding_dim: settings
                .parse("vector-embedding-dim")
                .unwrap_or(defaults.vector_embedding_dim),
            max_body_value_bytes: settings
                .parse("max-body-value-bytes")
                .unwrap_or(defaults.max_body_value_bytes),
            address_token_overfetch_floor: settings
                .parse("address-token-overfetch-floor")
                .unwrap_or(defaults.address_token_overfetch_floor),
            worker_concurrency: settings
                .parse("worker-concurrency")
                .unwrap_or(defaults.worker_concurrency),
            default_max_changes: settings
                .parse("default-max-changes")
                .unwrap_or(defaults.default_max_changes),
        }
    }
}
