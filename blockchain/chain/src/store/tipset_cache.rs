// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use blocks::{Tipset, TipsetHash};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Bounded LRU over shared immutable tipsets, keyed by tipset hash. All
/// tipset reads go through this cache before touching the stores.
#[derive(Debug)]
pub struct TipsetCache {
    cache: LruCache<TipsetHash, Arc<Tipset>>,
}

impl TipsetCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, hash: &TipsetHash) -> Option<Arc<Tipset>> {
        self.cache.get(hash).cloned()
    }

    pub fn put(&mut self, tipset: Arc<Tipset>) {
        self.cache.put(tipset.key().hash(), tipset);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
