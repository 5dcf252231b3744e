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

//! State-number wire encoding (spec §4.2: "a string in the wire protocol but MUST
//! sort as an integer; encoding uses decimal with no leading zeros in responses").

use crate::error::MethodError;

/// Formats a state counter for a method response or `*/changes` result.
pub fn state_to_string(state: u64) -> String {
    state.to_string()
}

/// Parses a `sinceState` argument. Anything that isn't a bare non-negative decimal
/// integer is `cannotCalculateChanges` (spec §4.11), not `invalidArguments` - the
/// client is expected to resynchronise, not fix a request bug.
pub fn parse_since_state(value: &str) -> Result<u64, MethodError> {
    value
        .parse::<u64>()
        .map_err(|_| MethodError::CannotCalculateChanges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_decimal() {
        assert_eq!(state_to_string(42), "42");
        assert_eq!(parse_since_state("42").unwrap(), 42);
    }

    #[test]
    fn garbage_is_cannot_calculate_changes() {
        assert!(matches!(
            parse_since_state("not-a-number"),
            Err(MethodError::CannotCalculateChanges)
        ));
    }
}
