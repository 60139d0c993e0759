// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::branches::{BranchId, BranchInfo, RenameBranch, GENESIS_BRANCH, NO_BRANCH};
use crate::store::Error;
use blocks::{Height, Tipset, TipsetHash, TipsetKeys};
use encoding::Cbor;
use log::debug;
use lru::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Tipset metadata row persisted by the index database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipsetInfo {
    pub key: TipsetKeys,
    pub branch: BranchId,
    pub height: Height,
    pub parent_hash: Option<TipsetHash>,
}

impl TipsetInfo {
    pub fn hash(&self) -> TipsetHash {
        self.key.hash()
    }
}

impl Cbor for TipsetInfo {}

/// Storage backend of the index database.
///
/// `store` must apply the row insert and the branch rename as one atomic
/// batch. `walk` reports rows of one branch in ascending height order
/// starting at `from_height`, until `limit` rows are delivered or the
/// callback declines to continue.
pub trait IndexDbBackend {
    fn load_branches(&self) -> Result<BTreeMap<BranchId, BranchInfo>, Error>;

    fn store(&self, info: &TipsetInfo, rename: Option<&RenameBranch>) -> Result<(), Error>;

    fn get(&self, hash: &TipsetHash) -> Result<Option<TipsetInfo>, Error>;

    fn get_by_position(&self, branch: BranchId, height: Height)
        -> Result<Option<TipsetInfo>, Error>;

    fn walk(
        &self,
        branch: BranchId,
        from_height: Height,
        limit: usize,
        cb: &mut dyn FnMut(TipsetInfo) -> bool,
    ) -> Result<(), Error>;
}

#[derive(Debug, Default)]
struct MemoryIndexInner {
    by_hash: HashMap<TipsetHash, TipsetInfo>,
    by_position: BTreeMap<(BranchId, Height), TipsetHash>,
}

/// In-memory index backend. A persistent backend implements the same trait
/// over its own row format.
#[derive(Debug, Default, Clone)]
pub struct MemoryIndexDb {
    inner: Arc<RwLock<MemoryIndexInner>>,
}

impl MemoryIndexDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexDbBackend for MemoryIndexDb {
    /// Reconstructs branch metadata from the stored rows: per-branch height
    /// extremes plus the parent link of the bottom row. Fork sets and sync
    /// flags are left for the branch graph to rebuild.
    fn load_branches(&self) -> Result<BTreeMap<BranchId, BranchInfo>, Error> {
        let inner = self.inner.read();

        let ids: BTreeSet<BranchId> = inner.by_position.keys().map(|(b, _)| *b).collect();
        let mut branches = BTreeMap::new();

        for id in ids {
            let mut rows = inner
                .by_position
                .range((id, Height::MIN)..=(id, Height::MAX));
            let (&(_, bottom_height), bottom_hash) = rows.next().ok_or_else(|| {
                Error::DataIntegrityError(format!("no rows for branch {}", id))
            })?;
            let (top_height, top_hash) = match rows.next_back() {
                Some((&(_, h), hash)) => (h, *hash),
                None => (bottom_height, *bottom_hash),
            };

            let bottom = inner.by_hash.get(bottom_hash).ok_or_else(|| {
                Error::DataIntegrityError(format!("missing row for {}", bottom_hash))
            })?;
            let parent = match &bottom.parent_hash {
                Some(parent_hash) => inner
                    .by_hash
                    .get(parent_hash)
                    .map(|info| info.branch)
                    .unwrap_or(NO_BRANCH),
                None => NO_BRANCH,
            };

            branches.insert(
                id,
                BranchInfo {
                    id,
                    top: top_hash,
                    top_height,
                    bottom: *bottom_hash,
                    bottom_height,
                    parent,
                    parent_hash: bottom.parent_hash,
                    synced_to_genesis: false,
                    forks: BTreeSet::new(),
                },
            );
        }

        Ok(branches)
    }

    fn store(&self, info: &TipsetInfo, rename: Option<&RenameBranch>) -> Result<(), Error> {
        let mut inner = self.inner.write();

        if let Some(rename) = rename {
            let moved: Vec<(Height, TipsetHash)> = inner
                .by_position
                .range((rename.old_id, rename.above_height + 1)..=(rename.old_id, Height::MAX))
                .map(|(&(_, height), hash)| (height, *hash))
                .collect();
            for (height, hash) in moved {
                inner.by_position.remove(&(rename.old_id, height));
                inner.by_position.insert((rename.new_id, height), hash);
                if let Some(row) = inner.by_hash.get_mut(&hash) {
                    row.branch = rename.new_id;
                }
            }
        }

        let hash = info.hash();
        inner
            .by_position
            .insert((info.branch, info.height), hash);
        inner.by_hash.insert(hash, info.clone());
        Ok(())
    }

    fn get(&self, hash: &TipsetHash) -> Result<Option<TipsetInfo>, Error> {
        Ok(self.inner.read().by_hash.get(hash).cloned())
    }

    fn get_by_position(
        &self,
        branch: BranchId,
        height: Height,
    ) -> Result<Option<TipsetInfo>, Error> {
        let inner = self.inner.read();
        match inner.by_position.get(&(branch, height)) {
            Some(hash) => Ok(inner.by_hash.get(hash).cloned()),
            None => Ok(None),
        }
    }

    fn walk(
        &self,
        branch: BranchId,
        from_height: Height,
        limit: usize,
        cb: &mut dyn FnMut(TipsetInfo) -> bool,
    ) -> Result<(), Error> {
        // snapshot the page to keep the lock scope tight
        let rows: Vec<TipsetInfo> = {
            let inner = self.inner.read();
            inner
                .by_position
                .range((branch, from_height)..=(branch, Height::MAX))
                .take(limit)
                .filter_map(|(_, hash)| inner.by_hash.get(hash).cloned())
                .collect()
        };
        for row in rows {
            if !cb(row) {
                break;
            }
        }
        Ok(())
    }
}

/// Index of tipset metadata with a bounded row cache in front of the backend.
#[derive(Debug)]
pub struct IndexDb<B> {
    backend: B,
    cache: LruCache<TipsetHash, Arc<TipsetInfo>>,
}

impl<B: IndexDbBackend> IndexDb<B> {
    pub fn new(backend: B, cache_capacity: NonZeroUsize) -> Self {
        Self {
            backend,
            cache: LruCache::new(cache_capacity),
        }
    }

    /// Loads the branch graph recorded by the backend.
    pub fn init(&mut self) -> Result<BTreeMap<BranchId, BranchInfo>, Error> {
        self.cache.clear();
        self.backend.load_branches()
    }

    pub fn store_genesis(&mut self, genesis_tipset: &Tipset) -> Result<(), Error> {
        let info = TipsetInfo {
            key: genesis_tipset.key().clone(),
            branch: GENESIS_BRANCH,
            height: 0,
            parent_hash: None,
        };
        self.store(info, None)
    }

    /// Persists a row, applying a branch rename in the same batch. Cached
    /// rows are fixed up to match the rename.
    pub fn store(&mut self, info: TipsetInfo, rename: Option<&RenameBranch>) -> Result<(), Error> {
        debug!("store: {}:{}:{}", info.height, info.branch, info.hash());

        self.backend.store(&info, rename)?;
        if let Some(rename) = rename {
            for (_, row) in self.cache.iter_mut() {
                if row.branch == rename.old_id && row.height > rename.above_height {
                    Arc::make_mut(row).branch = rename.new_id;
                }
            }
        }
        self.cache.put(info.hash(), Arc::new(info));
        Ok(())
    }

    pub fn contains(&mut self, hash: &TipsetHash) -> Result<bool, Error> {
        Ok(self.get_opt(hash)?.is_some())
    }

    pub fn get_opt(&mut self, hash: &TipsetHash) -> Result<Option<Arc<TipsetInfo>>, Error> {
        if let Some(info) = self.cache.get(hash) {
            return Ok(Some(info.clone()));
        }
        match self.backend.get(hash)? {
            Some(info) => {
                let info = Arc::new(info);
                self.cache.put(*hash, info.clone());
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    pub fn get(&mut self, hash: &TipsetHash) -> Result<Arc<TipsetInfo>, Error> {
        self.get_opt(hash)?
            .ok_or_else(|| Error::NotFound(format!("tipset {}", hash)))
    }

    pub fn get_by_position(
        &mut self,
        branch: BranchId,
        height: Height,
    ) -> Result<Arc<TipsetInfo>, Error> {
        let info = self
            .backend
            .get_by_position(branch, height)?
            .ok_or_else(|| Error::NotFound(format!("tipset at {}:{}", branch, height)))?;
        let hash = info.hash();
        if let Some(cached) = self.cache.get(&hash) {
            return Ok(cached.clone());
        }
        let info = Arc::new(info);
        self.cache.put(hash, info.clone());
        Ok(info)
    }

    /// Walks one branch upward through `[from_height, to_height]`, at most
    /// `limit` rows, while the callback keeps returning `true`.
    pub fn walk_forward(
        &mut self,
        branch: BranchId,
        from_height: Height,
        to_height: Height,
        limit: usize,
        cb: &mut dyn FnMut(Arc<TipsetInfo>) -> bool,
    ) -> Result<(), Error> {
        if to_height < from_height || limit == 0 {
            return Ok(());
        }
        let span = (to_height - from_height + 1) as usize;
        let limit = limit.min(span);

        let cache = &mut self.cache;
        self.backend.walk(branch, from_height, limit, &mut |info| {
            if info.height > to_height {
                return false;
            }
            let info = Arc::new(info);
            cache.put(info.hash(), info.clone());
            cb(info)
        })
    }

    /// Walks parent links downward from `from`, starting at its parent, and
    /// stops before delivering a row at or below `to_height`.
    pub fn walk_backward(
        &mut self,
        from: &TipsetHash,
        to_height: Height,
        cb: &mut dyn FnMut(Arc<TipsetInfo>) -> bool,
    ) -> Result<(), Error> {
        let mut info = self.get(from)?;
        loop {
            let parent_hash = match &info.parent_hash {
                Some(parent_hash) => *parent_hash,
                None => break,
            };
            info = self.get(&parent_hash)?;
            if info.height <= to_height {
                break;
            }
            if !cb(info.clone()) {
                break;
            }
        }
        Ok(())
    }
}
