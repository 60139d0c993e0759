// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::branches::{self, BranchId, Branches, RenameBranch, GENESIS_BRANCH, NO_BRANCH};
use crate::store::{Config, Error, IndexDb, IndexDbBackend, TipsetCache, TipsetInfo};
use blocks::{BlockHeader, Height, Tipset, TipsetHash, TipsetKeys};
use cid::Cid;
use ipld_blockstore::BlockStore;
use log::debug;
use std::sync::Arc;

/// Heads configuration changed callback. If both values are present then
/// it means that `added` replaces `removed`.
pub type HeadCallback = Box<dyn FnMut(Vec<TipsetHash>, Vec<TipsetHash>)>;

/// Returned by a walk callback to keep going or stop.
pub type WalkCallback<'a> = &'a mut dyn FnMut(Arc<Tipset>) -> bool;

/// Tipset-centric database facade combining the IPLD block store, the index
/// database and the in-memory branch graph. Emits head-set changes to the
/// subscriber installed with `start`.
pub struct ChainDb<BS, B> {
    ipld: BS,
    index_db: IndexDb<B>,
    branches: Branches,
    tipset_cache: TipsetCache,
    genesis_tipset: Option<Arc<Tipset>>,
    expected_genesis: Option<Cid>,
    head_callback: Option<HeadCallback>,
    initialized: bool,
    started: bool,
}

impl<BS, B> ChainDb<BS, B>
where
    BS: BlockStore,
    B: IndexDbBackend,
{
    pub fn new(ipld: BS, backend: B, config: &Config) -> Self {
        Self {
            ipld,
            index_db: IndexDb::new(backend, config.index_cache_size),
            branches: Branches::new(),
            tipset_cache: TipsetCache::new(config.tipset_cache_size),
            genesis_tipset: None,
            expected_genesis: None,
            head_callback: None,
            initialized: false,
            started: false,
        }
    }

    /// Loads the branch graph from the index database. An empty database is
    /// accepted only when `creating_new_db` is set; genesis then arrives via
    /// the first height-0 `store_tipset`. Inconsistent state is cleared
    /// before the error surfaces.
    pub fn init(&mut self, genesis_cid: Option<&Cid>, creating_new_db: bool) -> Result<(), Error> {
        self.initialized = false;
        self.genesis_tipset = None;
        self.expected_genesis = genesis_cid.copied();

        let branch_map = self.index_db.init()?;
        if branch_map.is_empty() {
            if !creating_new_db {
                return Err(Error::NoGenesis);
            }
            self.branches.clear();
            self.initialized = true;
            return Ok(());
        }

        if let Err(e) = self.branches.init(branch_map) {
            return Err(e.into());
        }

        match self.load_genesis() {
            Ok(genesis) => {
                if let Some(expected) = &self.expected_genesis {
                    if !genesis.cids().contains(expected) {
                        self.branches.clear();
                        return Err(Error::GenesisMismatch);
                    }
                }
                self.genesis_tipset = Some(genesis);
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                self.branches.clear();
                Err(e)
            }
        }
    }

    /// Installs the head-change subscriber and starts delivering events.
    pub fn start(&mut self, on_heads_changed: HeadCallback) -> Result<(), Error> {
        self.state_is_consistent()?;
        if self.genesis_tipset.is_none() {
            return Err(Error::NoGenesis);
        }
        self.head_callback = Some(on_heads_changed);
        self.started = true;
        Ok(())
    }

    pub fn state_is_consistent(&self) -> Result<(), Error> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    pub fn genesis_cid(&self) -> Result<&Cid, Error> {
        let genesis = self.genesis_tipset.as_ref().ok_or(Error::NoGenesis)?;
        genesis.cids().first().ok_or(Error::NoGenesis)
    }

    pub fn genesis_tipset(&self) -> Result<Arc<Tipset>, Error> {
        self.genesis_tipset.clone().ok_or(Error::NoGenesis)
    }

    pub fn tipset_is_stored(&mut self, hash: &TipsetHash) -> Result<bool, Error> {
        self.index_db.contains(hash)
    }

    /// Reports the currently known synced heads as one `added` batch.
    pub fn get_heads(&self, callback: &mut dyn FnMut(Vec<TipsetHash>, Vec<TipsetHash>)) {
        let added: Vec<TipsetHash> = self
            .branches
            .get_all_heads()
            .filter(|(_, branch)| branch.synced_to_genesis)
            .map(|(hash, _)| *hash)
            .collect();
        callback(Vec::new(), added);
    }

    pub fn get_tipset_by_hash(&mut self, hash: &TipsetHash) -> Result<Arc<Tipset>, Error> {
        if let Some(tipset) = self.tipset_cache.get(hash) {
            return Ok(tipset);
        }
        let info = self.index_db.get(hash)?;
        let tipset = self.load_tipset_from_ipld(&info.key)?;
        if tipset.key().hash() != *hash {
            return Err(Error::DataIntegrityError(format!(
                "indexed tipset {} reconstructs to a different hash",
                hash
            )));
        }
        self.tipset_cache.put(tipset.clone());
        Ok(tipset)
    }

    pub fn get_tipset_by_height(&mut self, height: Height) -> Result<Arc<Tipset>, Error> {
        let branch = self.branches.get_branch_at_height(height, true)?;
        let info = self.index_db.get_by_position(branch, height)?;
        let hash = info.hash();
        self.get_tipset_by_hash(&hash)
    }

    pub fn get_tipset_by_key(&mut self, key: &TipsetKeys) -> Result<Arc<Tipset>, Error> {
        if let Some(tipset) = self.tipset_cache.get(&key.hash()) {
            return Ok(tipset);
        }
        let tipset = self.load_tipset_from_ipld(key)?;
        self.tipset_cache.put(tipset.clone());
        Ok(tipset)
    }

    /// Chooses the tipset all height-indexed queries resolve against.
    pub fn set_current_head(&mut self, head: &TipsetHash) -> Result<(), Error> {
        let info = self.index_db.get(head)?;
        self.branches.set_current_head(info.branch, info.height)?;
        Ok(())
    }

    /// Read-only view of the branch graph.
    pub fn branches(&self) -> &Branches {
        &self.branches
    }

    /// Walks the current chain from `from` (exclusive) up towards `to`
    /// (inclusive), by child lookup through the index. Stops when the
    /// callback returns `false` or `limit` tipsets were delivered.
    pub fn walk_forward(
        &mut self,
        from: &Tipset,
        to: &Tipset,
        limit: usize,
        cb: WalkCallback<'_>,
    ) -> Result<(), Error> {
        let from_info = self.index_db.get(&from.key().hash())?;
        let to_info = self.index_db.get(&to.key().hash())?;
        let route = self.branches.get_route(from_info.branch, to_info.branch)?;

        let mut remaining = limit;
        for branch_id in route {
            if remaining == 0 {
                break;
            }
            let (bottom_height, top_height) = {
                let branch = self.branches.get_branch(branch_id)?;
                (branch.bottom_height, branch.top_height)
            };
            let from_height = bottom_height.max(from.height() + 1);
            let to_height = top_height.min(to.height());
            if from_height > to_height {
                continue;
            }

            let mut page = Vec::new();
            self.index_db
                .walk_forward(branch_id, from_height, to_height, remaining, &mut |info| {
                    page.push(info);
                    true
                })?;

            for info in page {
                let hash = info.hash();
                let tipset = self.get_tipset_by_hash(&hash)?;
                remaining -= 1;
                if !cb(tipset) || remaining == 0 {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Walks parent links down from `from` (exclusive) until the height
    /// drops to `to_height` or the callback stops the walk.
    pub fn walk_backward(
        &mut self,
        from: &TipsetHash,
        to_height: Height,
        cb: WalkCallback<'_>,
    ) -> Result<(), Error> {
        let mut info = self.index_db.get(from)?;
        loop {
            let parent_hash = match &info.parent_hash {
                Some(parent_hash) => *parent_hash,
                None => break,
            };
            info = self.index_db.get(&parent_hash)?;
            if info.height <= to_height {
                break;
            }
            let tipset = self.get_tipset_by_hash(&parent_hash)?;
            if !cb(tipset) {
                break;
            }
        }
        Ok(())
    }

    /// Deepest tipset that is an ancestor of both arguments: heights are
    /// equalized along parent links, then both sides step down in lockstep
    /// until the hashes meet.
    pub fn find_highest_common_ancestor(
        &mut self,
        a: &Arc<Tipset>,
        b: &Arc<Tipset>,
    ) -> Result<Arc<Tipset>, Error> {
        let mut a = a.clone();
        let mut b = b.clone();

        loop {
            if a.key().hash() == b.key().hash() {
                return Ok(a);
            }
            if a.height() >= b.height() {
                a = self.parent_of(&a)?;
            } else {
                b = self.parent_of(&b)?;
            }
        }
    }

    /// Stores a tipset, persisting its blocks to IPLD and its metadata row
    /// to the index, then updating the branch graph and delivering the head
    /// changes. Returns the parent key of the subgraph's unsynced bottom,
    /// the next thing the caller should fetch, or `None` once the subgraph
    /// reaches genesis.
    pub fn store_tipset(&mut self, tipset: Arc<Tipset>) -> Result<Option<TipsetKeys>, Error> {
        self.state_is_consistent()?;

        let hash = tipset.key().hash();
        if self.index_db.contains(&hash)? {
            return Ok(None);
        }

        if tipset.height() == 0 {
            if let Some(expected) = &self.expected_genesis {
                if !tipset.cids().contains(expected) {
                    return Err(Error::GenesisMismatch);
                }
            }
        }

        let parent_hash = tipset.parent_hash();
        if tipset.height() > 0 && parent_hash.is_none() {
            return Err(Error::BadTipset(format!(
                "tipset {} at height {} has no parents",
                hash,
                tipset.height()
            )));
        }

        let (parent_branch, parent_height) = match &parent_hash {
            Some(parent_hash) => match self.index_db.get_opt(parent_hash)? {
                Some(info) => (info.branch, info.height),
                None => (NO_BRANCH, 0),
            },
            None => (NO_BRANCH, 0),
        };

        let pos = self
            .branches
            .find_store_position(&tipset, parent_branch, parent_height)?;

        // a split is persisted by the index first, then mirrored in memory
        let split_bounds = match &pos.rename {
            Some(rename) if rename.split => Some(self.find_split_bounds(rename)?),
            _ => None,
        };

        for block in tipset.blocks() {
            self.ipld.put(block)?;
        }

        let info = TipsetInfo {
            key: tipset.key().clone(),
            branch: pos.assigned_branch,
            height: tipset.height(),
            parent_hash,
        };
        self.index_db.store(info, pos.rename.as_ref())?;

        if let (Some(rename), Some((new_top, new_bottom, new_bottom_height))) =
            (&pos.rename, &split_bounds)
        {
            self.branches
                .split_branch(new_top, new_bottom, *new_bottom_height, rename)?;
        }

        let changes = self.branches.store_tipset(&tipset, &pos)?;

        if tipset.height() == 0 {
            debug!("genesis stored: {}", hash);
            self.genesis_tipset = Some(tipset.clone());
        }
        self.tipset_cache.put(tipset);

        if !changes.removed.is_empty() || !changes.added.is_empty() {
            if let Some(callback) = &mut self.head_callback {
                if self.started {
                    callback(changes.removed, changes.added);
                }
            }
        }

        self.next_unsynced(pos.assigned_branch)
    }

    /// The stored bottom tipset of the unsynced subgraph containing `key`,
    /// if the subgraph has not reached genesis yet.
    pub fn get_unsynced_bottom(&mut self, key: &TipsetKeys) -> Result<Option<Arc<Tipset>>, Error> {
        let info = match self.index_db.get_opt(&key.hash())? {
            Some(info) => info,
            None => return Ok(None),
        };
        let (synced, bottom) = {
            let root = self.branches.get_root_branch(info.branch)?;
            (root.synced_to_genesis, root.bottom)
        };
        if synced {
            return Ok(None);
        }
        Ok(Some(self.get_tipset_by_hash(&bottom)?))
    }

    fn parent_of(&mut self, tipset: &Tipset) -> Result<Arc<Tipset>, Error> {
        let parent_hash = tipset
            .parent_hash()
            .ok_or(branches::Error::NoCommonRoot)?;
        self.get_tipset_by_hash(&parent_hash)
    }

    fn next_unsynced(&mut self, branch: BranchId) -> Result<Option<TipsetKeys>, Error> {
        let (synced, bottom) = {
            let root = self.branches.get_root_branch(branch)?;
            (root.synced_to_genesis, root.bottom)
        };
        if synced {
            return Ok(None);
        }
        let bottom_tipset = self.get_tipset_by_hash(&bottom)?;
        Ok(Some(bottom_tipset.parents().clone()))
    }

    /// Boundary tipsets of a pending split: the parent tipset keeps the old
    /// id as its new top, the first row above it becomes the fork's bottom.
    fn find_split_bounds(
        &mut self,
        rename: &RenameBranch,
    ) -> Result<(TipsetHash, TipsetHash, Height), Error> {
        let new_top = self
            .index_db
            .get_by_position(rename.old_id, rename.above_height)?
            .hash();

        let top_height = self.branches.get_branch(rename.old_id)?.top_height;
        let mut first_above: Option<Arc<TipsetInfo>> = None;
        self.index_db.walk_forward(
            rename.old_id,
            rename.above_height + 1,
            top_height,
            1,
            &mut |info| {
                first_above = Some(info);
                false
            },
        )?;
        let first_above = first_above.ok_or_else(|| {
            Error::DataIntegrityError(format!(
                "no tipset above split height {} in branch {}",
                rename.above_height, rename.old_id
            ))
        })?;

        Ok((new_top, first_above.hash(), first_above.height))
    }

    fn load_genesis(&mut self) -> Result<Arc<Tipset>, Error> {
        let bottom = self.branches.get_branch(GENESIS_BRANCH)?.bottom;
        let info = self.index_db.get(&bottom)?;
        let genesis = self.load_tipset_from_ipld(&info.key)?;
        if genesis.height() != 0 {
            return Err(Error::DataIntegrityError(
                "genesis branch bottom is not at height 0".to_string(),
            ));
        }
        Ok(genesis)
    }

    fn load_tipset_from_ipld(&mut self, key: &TipsetKeys) -> Result<Arc<Tipset>, Error> {
        let mut headers = Vec::with_capacity(key.cids().len());
        for cid in key.cids() {
            let header: BlockHeader = self.ipld.get(cid)?.ok_or_else(|| {
                Error::DataIntegrityError(format!("block {} not found in store", cid))
            })?;
            headers.push(header);
        }
        let tipset = Tipset::new(headers)?;
        if tipset.key() != key {
            return Err(Error::BadTipset(
                "blocks do not reconstruct the requested key".to_string(),
            ));
        }
        Ok(Arc::new(tipset))
    }
}
