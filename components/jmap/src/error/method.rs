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

use std::fmt::Display;

use serde::ser::SerializeMap;
use serde::Serialize;
use store::StoreError;
use tracing::error;

/// The JMAP method-level error taxonomy (spec §6, §7): every variant maps to exactly
/// one `type` string in the `{type, description}` error envelope.
#[derive(Debug)]
pub enum MethodError {
    InvalidArguments(String),
    UnknownMethod(String),
    UnsupportedFilter(String),
    UnsupportedSort(String),
    AnchorNotFound,
    CannotCalculateChanges,
    ServerFail(StoreError),
}

impl From<StoreError> for MethodError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::AnchorNotFound => MethodError::AnchorNotFound,
            StoreError::InvalidArguments(err) => MethodError::InvalidArguments(err),
            _ => MethodError::ServerFail(e),
        }
    }
}

impl Display for MethodError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MethodError::InvalidArguments(err) => write!(f, "Invalid arguments: {}", err),
            MethodError::UnknownMethod(err) => write!(f, "Unknown method: {}", err),
            MethodError::UnsupportedFilter(err) => write!(f, "Unsupported filter: {}", err),
            MethodError::UnsupportedSort(err) => write!(f, "Unsupported sort: {}", err),
            MethodError::AnchorNotFound => write!(f, "Anchor not found"),
            MethodError::CannotCalculateChanges => write!(f, "Cannot calculate changes"),
            MethodError::ServerFail(err) => write!(f, "Server error: {}", err),
        }
    }
}

impl std::error::Error for MethodError {}

impl Serialize for MethodError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(2.into())?;

        let (error_type, description) = match self {
            MethodError::InvalidArguments(description) => {
                ("invalidArguments", description.as_str())
            }
            MethodError::UnknownMethod(description) => ("unknownMethod", description.as_str()),
            MethodError::UnsupportedFilter(description) => {
                ("unsupportedFilter", description.as_str())
            }
            MethodError::UnsupportedSort(description) => ("unsupportedSort", description.as_str()),
            MethodError::AnchorNotFound => (
                "anchorNotFound",
                concat!(
                    "An anchor argument was supplied, but it ",
                    "cannot be found in the results of the query."
                ),
            ),
            MethodError::CannotCalculateChanges => (
                "cannotCalculateChanges",
                concat!(
                    "The sinceState token no longer refers to a valid ",
                    "point in time; the client must resynchronise."
                ),
            ),
            MethodError::ServerFail(e) => ("serverFail", {
                error!(error = %e, "JMAP request failed");
                concat!(
                    "An unexpected error occurred while processing ",
                    "this call, please contact the system administrator."
                )
            }),
        };

        map.serialize_entry("type", error_type)?;
        map.serialize_entry("description", description)?;
        map.end()
    }
}
