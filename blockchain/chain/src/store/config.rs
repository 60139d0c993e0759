// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Chain database tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of the tipset LRU cache.
    pub tipset_cache_size: NonZeroUsize,
    /// Capacity of the index row cache.
    pub index_cache_size: NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tipset_cache_size: NonZeroUsize::new(1024).expect("non-zero"),
            index_cache_size: NonZeroUsize::new(1000).expect("non-zero"),
        }
    }
}
