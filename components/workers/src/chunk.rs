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

//! Embedding-sized chunking of the concatenated body text (spec §4.12 step 4).

/// Splits `text` into chunks of roughly `chunk_size_chars`, overlapping by
/// `overlap_ratio` of that size so a sentence split at a boundary still appears
/// whole in at least one chunk. Empty input yields no chunks.
pub fn chunk_text(text: &str, chunk_size_chars: usize, overlap_ratio: f64) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_size_chars == 0 {
        return Vec::new();
    }

    let overlap = ((chunk_size_chars as f64) * overlap_ratio) as usize;
    let stride = chunk_size_chars.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("", 2000, 0.1).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello world", 2000, 0.1);
        assert_eq!(chunks, vec!["hello world".to_string()]);
    }

    #[test]
    fn long_text_splits_with_overlap() {
        let text = "a".repeat(25);
        let chunks = chunk_text(&text, 10, 0.2);
        assert!(chunks.len() > 1);
        // consecutive chunks share an overlapping tail/head
        assert_eq!(chunks[0].chars().last(), chunks[1].chars().nth(1));
    }
}
