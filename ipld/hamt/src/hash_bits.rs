// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use sha2::{Digest, Sha256};

/// Derives the trie index path of a key: sha256(key) read MSB-first in
/// `bit_width`-sized groups, discarding the trailing bits that do not fill a
/// whole group.
///
/// With `from_end = Some(n)` only the last `n - 1` indices are produced,
/// aligning the suffix of an existing key with the depth of a freshly
/// allocated subshard.
pub fn key_to_indices(key: &str, bit_width: u32, from_end: Option<usize>) -> Vec<u32> {
    let hash = Sha256::digest(key.as_bytes());
    let byte_bits = 8usize;
    let bit_width = bit_width as usize;

    let mut max_bits = byte_bits * hash.len();
    max_bits -= max_bits % bit_width;

    let mut offset = match from_end {
        Some(n) => max_bits - (n - 1) * bit_width,
        None => 0,
    };

    let mut indices = Vec::with_capacity((max_bits - offset) / bit_width);
    while offset + bit_width <= max_bits {
        let mut index: u32 = 0;
        for _ in 0..bit_width {
            index <<= 1;
            index |= 1 & (hash[offset / byte_bits] >> (byte_bits - 1 - offset % byte_bits)) as u32;
            offset += 1;
        }
        indices.push(index);
    }
    indices
}
