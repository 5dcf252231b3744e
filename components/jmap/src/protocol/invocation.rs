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

//! The method envelope (spec §6). JSON framing of the full JMAP request/response
//! batch and `ResultReference` resolution are envelope-layer plumbing out of scope
//! per §1/§11; this is the per-invocation shape handlers are called with.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MethodError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub request_id: String,
    pub account_id: String,
    pub method: String,
    pub client_id: String,
    pub api_url: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum MethodResponse {
    Ok {
        name: String,
        args: Value,
        client_id: String,
    },
    Error {
        name: &'static str,
        args: MethodError,
        client_id: String,
    },
}

impl MethodResponse {
    pub fn ok(name: impl Into<String>, args: Value, client_id: impl Into<String>) -> Self {
        MethodResponse::Ok {
            name: name.into(),
            args,
            client_id: client_id.into(),
        }
    }

    pub fn error(err: MethodError, client_id: impl Into<String>) -> Self {
        MethodResponse::Error {
            name: "error",
            args: err,
            client_id: client_id.into(),
        }
    }
}
