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

//! Key schema, item codecs and the wide key-value table abstraction (C1).
//!
//! Every other component composes keys through [`key`] and reads/writes through the
//! [`table::Table`] trait rather than touching the schema directly.

pub mod config;
pub mod error;
pub mod key;
pub mod model;
pub mod table;

pub use ahash;
pub use chrono;
pub use error::StoreError;

/// Per-account partition identifier, e.g. `"ACCOUNT#u1234"`.
pub type AccountId = String;

pub type Result<T> = std::result::Result<T, StoreError>;
