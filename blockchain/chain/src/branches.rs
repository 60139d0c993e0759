// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use blocks::{Height, Tipset, TipsetHash};
use log::{error, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Identifier of a branch in the graph; an index into the branch map, never a
/// pointer.
pub type BranchId = u64;

/// Absent branch reference.
pub const NO_BRANCH: BranchId = 0;

/// Branch holding genesis, present iff genesis is loaded.
pub const GENESIS_BRANCH: BranchId = 1;

/// Branch graph error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("cannot load branch graph")]
    LoadError,
    #[error("no genesis branch in the graph")]
    NoGenesisBranch,
    #[error("parent hash expected for unsynced root branch")]
    ParentExpected,
    #[error("no current chain")]
    NoCurrentChain,
    #[error("branch not found")]
    BranchNotFound,
    #[error("head not found")]
    HeadNotFound,
    #[error("head is not synced to genesis")]
    HeadNotSynced,
    #[error("cycle detected in branch graph")]
    CycleDetected,
    #[error("cannot store tipset in branch graph")]
    StoreError,
    #[error("height mismatch")]
    HeightMismatch,
    #[error("no common root")]
    NoCommonRoot,
    #[error("no route between branches")]
    NoRoute,
}

/// Metadata of a maximal linear run of tipsets with no internal forks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub id: BranchId,
    pub top: TipsetHash,
    pub top_height: Height,
    pub bottom: TipsetHash,
    pub bottom_height: Height,
    /// Parent branch, `NO_BRANCH` for roots.
    pub parent: BranchId,
    /// Hash of the tipset the bottom links to, `None` for genesis.
    pub parent_hash: Option<TipsetHash>,
    /// The ancestor chain reaches genesis with no gaps.
    pub synced_to_genesis: bool,
    /// Ids of branches forking off the top of this branch.
    pub forks: BTreeSet<BranchId>,
}

/// Instruction to renumber part of a branch, either splitting it at
/// `above_height` or absorbing it into another branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameBranch {
    pub old_id: BranchId,
    pub new_id: BranchId,
    pub above_height: Height,
    pub split: bool,
}

/// Placement of a newly arriving tipset, computed before any mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePosition {
    pub assigned_branch: BranchId,
    pub at_bottom_of_branch: BranchId,
    pub on_top_of_branch: BranchId,
    pub rename: Option<RenameBranch>,
}

/// Batched change of the head set. If both vectors are non-empty, `added`
/// replaces `removed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadChanges {
    pub removed: Vec<TipsetHash>,
    pub added: Vec<TipsetHash>,
}

/// In-memory index of all observed chain forks.
///
/// Branches reference their parents by id; fork sets are materialized from
/// the parent edges. The graph owns every `BranchInfo`, external views are
/// shared read-only references.
#[derive(Debug, Default)]
pub struct Branches {
    all_branches: BTreeMap<BranchId, BranchInfo>,
    heads: BTreeMap<TipsetHash, BranchId>,
    /// Parent hash not yet in the graph -> branch whose bottom awaits it.
    unloaded_roots: HashMap<TipsetHash, BranchId>,
    /// Branches from genesis to the current top, keyed by their top height.
    current_chain: BTreeMap<Height, BranchId>,
    current_top_branch: BranchId,
    current_height: Height,
}

impl Branches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn empty(&self) -> bool {
        self.all_branches.is_empty()
    }

    /// All current heads: branches with no forks, including bottom holders of
    /// unloaded subgraphs.
    pub fn get_all_heads(&self) -> impl Iterator<Item = (&TipsetHash, &BranchInfo)> {
        self.heads
            .iter()
            .filter_map(|(hash, id)| self.all_branches.get(id).map(|b| (hash, b)))
    }

    pub fn get_branch(&self, id: BranchId) -> Result<&BranchInfo, Error> {
        self.all_branches.get(&id).ok_or(Error::BranchNotFound)
    }

    /// Root of the subgraph containing `id`, following parent edges.
    pub fn get_root_branch(&self, id: BranchId) -> Result<&BranchInfo, Error> {
        let mut id = id;
        for _ in 0..=self.all_branches.len() {
            let info = self.get_branch(id)?;
            if info.parent == NO_BRANCH {
                return Ok(info);
            }
            id = info.parent;
        }
        Err(Error::CycleDetected)
    }

    /// The branch on the current chain covering the given height.
    pub fn get_branch_at_height(&self, height: Height, must_exist: bool) -> Result<BranchId, Error> {
        if self.current_chain.is_empty() {
            return Err(Error::NoCurrentChain);
        }
        if height > self.current_height {
            return if must_exist {
                Err(Error::BranchNotFound)
            } else {
                Ok(NO_BRANCH)
            };
        }

        let genesis = self
            .all_branches
            .get(&GENESIS_BRANCH)
            .ok_or(Error::NoGenesisBranch)?;
        if height <= genesis.top_height {
            return Ok(GENESIS_BRANCH);
        }

        match self.current_chain.range(height..).next() {
            Some((_, id)) => Ok(*id),
            None => {
                if must_exist {
                    Err(Error::BranchNotFound)
                } else {
                    Ok(NO_BRANCH)
                }
            }
        }
    }

    /// Deepest branch that is an ancestor of both arguments.
    pub fn get_common_root(&self, a: BranchId, b: BranchId) -> Result<&BranchInfo, Error> {
        if a == NO_BRANCH || b == NO_BRANCH {
            return Err(Error::NoCommonRoot);
        }

        let mut a = a;
        let mut b = b;
        let mut branch_a = self.get_branch(a)?;
        let mut branch_b = self.get_branch(b)?;

        while a != b {
            if branch_a.bottom_height <= branch_b.bottom_height {
                b = branch_b.parent;
                if b == NO_BRANCH {
                    return Err(Error::NoCommonRoot);
                }
                branch_b = self.get_branch(b)?;
            } else {
                a = branch_a.parent;
                if a == NO_BRANCH {
                    return Err(Error::NoCommonRoot);
                }
                branch_a = self.get_branch(a)?;
            }
        }

        Ok(branch_a)
    }

    /// Inclusive root-to-leaf path of branch ids from `from` down to `to`.
    pub fn get_route(&self, from: BranchId, to: BranchId) -> Result<Vec<BranchId>, Error> {
        if from == NO_BRANCH || to == NO_BRANCH {
            return Err(Error::NoRoute);
        }

        let mut route = Vec::new();
        if from == to {
            route.push(from);
            return Ok(route);
        }

        let mut to = to;
        let mut route_found = false;
        loop {
            route.push(to);
            let info = self.get_branch(to)?;
            to = info.parent;
            if to == from {
                route_found = true;
                break;
            }
            if to == NO_BRANCH || to == GENESIS_BRANCH {
                break;
            }
        }

        if !route_found {
            return Err(Error::NoRoute);
        }

        route.push(from);
        route.reverse();
        Ok(route)
    }

    /// Rebuilds the current chain from genesis up to the given head branch.
    /// `NO_BRANCH` clears it.
    pub fn set_current_head(&mut self, head_branch: BranchId, height: Height) -> Result<(), Error> {
        if head_branch == NO_BRANCH {
            self.clear_current_chain();
            return Ok(());
        }

        if self.current_top_branch == head_branch {
            if self.current_height != height {
                let (_, top_id) = self
                    .current_chain
                    .iter()
                    .next_back()
                    .ok_or(Error::NoCurrentChain)?;
                let info = self.get_branch(*top_id)?;
                if info.top_height < height || info.bottom_height > height {
                    return Err(Error::HeightMismatch);
                }
                self.current_height = height;
            }
            return Ok(());
        }

        let info = match self.all_branches.get(&head_branch) {
            Some(info) => info,
            None => return Err(Error::HeadNotFound),
        };
        if !info.synced_to_genesis {
            return Err(Error::HeadNotSynced);
        }
        if info.top_height < height || info.bottom_height > height {
            return Err(Error::HeightMismatch);
        }

        self.current_height = height;
        self.current_chain.clear();
        self.current_top_branch = head_branch;

        // a guard to catch a cycle if it appears in the graph: db inconsistency
        let mut cycle_guard = self.all_branches.len() + 1;
        self.current_chain.insert(info.top_height, head_branch);

        let mut parent = info.parent;
        while parent != NO_BRANCH {
            cycle_guard -= 1;
            if cycle_guard == 0 {
                self.clear_current_chain();
                return Err(Error::CycleDetected);
            }

            let branch = match self.all_branches.get(&parent) {
                Some(branch) => branch,
                None => {
                    self.clear_current_chain();
                    return Err(Error::BranchNotFound);
                }
            };
            parent = branch.parent;
            self.current_chain.insert(branch.top_height, branch.id);
        }

        Ok(())
    }

    /// Computes where a newly arriving tipset will be placed, without
    /// mutating the graph.
    pub fn find_store_position(
        &self,
        tipset: &Tipset,
        parent_branch: BranchId,
        parent_height: Height,
    ) -> Result<StorePosition, Error> {
        let mut pos = StorePosition::default();

        let height = tipset.height();
        let hash = tipset.key().hash();

        if height == 0 {
            // inserting genesis
            if !self.empty() {
                return Err(Error::StoreError);
            }
            pos.assigned_branch = GENESIS_BRANCH;
            return Ok(pos);
        }

        if let Some(id) = self.unloaded_roots.get(&hash) {
            // the tipset will be linked to the bottom of an unloaded subgraph
            pos.at_bottom_of_branch = *id;
            pos.assigned_branch = *id;
        }

        debug_assert!(parent_branch == NO_BRANCH || parent_height < height);

        let mut next_id = self.new_branch_id();

        if parent_branch != NO_BRANCH {
            let info = self.get_branch(parent_branch)?;
            if parent_height > info.top_height || parent_height < info.bottom_height {
                return Err(Error::HeightMismatch);
            }

            pos.on_top_of_branch = parent_branch;

            if parent_height != info.top_height {
                // the parent sits inside the branch, a split must happen first
                pos.rename = Some(RenameBranch {
                    old_id: parent_branch,
                    new_id: next_id,
                    above_height: parent_height,
                    split: true,
                });
                next_id += 1;
            } else if info.forks.is_empty() {
                pos.assigned_branch = parent_branch;
                if pos.at_bottom_of_branch != NO_BRANCH {
                    // the unloaded subgraph merges into the parent branch
                    pos.rename = Some(RenameBranch {
                        old_id: pos.at_bottom_of_branch,
                        new_id: parent_branch,
                        above_height: 0,
                        split: false,
                    });
                }
            }
        }

        if pos.assigned_branch == NO_BRANCH {
            pos.assigned_branch = next_id;
        }

        Ok(pos)
    }

    /// Partitions an existing branch at `rename.above_height`: the old id
    /// keeps the lower part with `new_top` as its top, the new id takes the
    /// upper part starting at `new_bottom`.
    pub fn split_branch(
        &mut self,
        new_top: &TipsetHash,
        new_bottom: &TipsetHash,
        new_bottom_height: Height,
        rename: &RenameBranch,
    ) -> Result<(), Error> {
        debug_assert!(rename.old_id != NO_BRANCH);
        debug_assert!(rename.new_id != NO_BRANCH);
        debug_assert!(rename.new_id != rename.old_id);
        debug_assert!(!self.all_branches.contains_key(&rename.new_id));

        let parent = self.get_branch(rename.old_id)?.clone();

        debug_assert!(parent.top_height > rename.above_height);
        debug_assert!(parent.bottom_height <= rename.above_height);
        debug_assert!(new_bottom_height <= parent.top_height);
        debug_assert!(new_bottom_height > rename.above_height);

        let is_head = self.heads.remove(&parent.top).is_some();
        let mut in_current_chain = false;
        if !self.current_chain.is_empty() && parent.synced_to_genesis {
            if let Some(id) = self.current_chain.get(&parent.top_height) {
                if *id == parent.id {
                    self.current_chain.remove(&parent.top_height);
                    in_current_chain = true;
                }
            }
        }

        let mut fork = parent.clone();
        fork.id = rename.new_id;
        fork.bottom = *new_bottom;
        fork.bottom_height = new_bottom_height;
        fork.parent = parent.id;
        fork.parent_hash = Some(*new_top);
        for fork_child in fork.forks.iter() {
            if let Some(b) = self.all_branches.get_mut(fork_child) {
                b.parent = fork.id;
            }
        }

        if let Some(lower) = self.all_branches.get_mut(&rename.old_id) {
            lower.top = *new_top;
            lower.top_height = rename.above_height;
            lower.forks.clear();
            lower.forks.insert(fork.id);
        }

        if is_head {
            self.heads.insert(fork.top, fork.id);
        }
        if in_current_chain {
            self.current_chain.insert(rename.above_height, rename.old_id);
            self.current_chain.insert(fork.top_height, fork.id);
        }
        self.all_branches.insert(fork.id, fork);

        Ok(())
    }

    /// Stores genesis into an empty graph.
    pub fn store_genesis(&mut self, genesis_tipset: &Tipset) -> Result<(), Error> {
        if !self.empty() {
            return Err(Error::StoreError);
        }
        let pos = StorePosition {
            assigned_branch: GENESIS_BRANCH,
            ..Default::default()
        };
        self.store_tipset(genesis_tipset, &pos)?;
        Ok(())
    }

    /// Applies a tipset at its precomputed position, returning the resulting
    /// head set changes.
    pub fn store_tipset(
        &mut self,
        tipset: &Tipset,
        pos: &StorePosition,
    ) -> Result<HeadChanges, Error> {
        let mut changes = HeadChanges::default();

        let height = tipset.height();
        let hash = tipset.key().hash();
        let parent_hash = tipset.parent_hash();

        let new_standalone_branch =
            pos.at_bottom_of_branch == NO_BRANCH && pos.on_top_of_branch == NO_BRANCH;

        if new_standalone_branch {
            // branch id must be assigned at the moment
            self.new_branch(hash, height, parent_hash.as_ref(), pos);
            return Ok(changes);
        }

        let parent_hash = parent_hash.ok_or(Error::StoreError)?;
        debug_assert!(height > 0);

        let mut linked_to_bottom: Option<BranchId> = None;

        if pos.at_bottom_of_branch != NO_BRANCH {
            // link to the bottom of the unloaded subgraph
            let id = self.unloaded_roots.remove(&hash).ok_or(Error::StoreError)?;
            let b = self
                .all_branches
                .get_mut(&id)
                .ok_or(Error::BranchNotFound)?;

            debug_assert!(b.bottom_height > height);
            debug_assert!(b.parent == NO_BRANCH);
            debug_assert!(b.id == pos.at_bottom_of_branch);

            b.bottom_height = height;
            b.bottom = hash;
            b.parent_hash = Some(parent_hash);

            linked_to_bottom = Some(id);

            if pos.on_top_of_branch == NO_BRANCH {
                // still waiting for the new parent
                self.unloaded_roots.insert(parent_hash, id);
                return Ok(changes);
            }
        }

        debug_assert!(pos.on_top_of_branch != NO_BRANCH);

        if pos.assigned_branch == pos.on_top_of_branch {
            // linking without fork
            let parent_id = self.heads.remove(&parent_hash).ok_or(Error::StoreError)?;

            match linked_to_bottom {
                None => {
                    // appending tipset on top of a head
                    let parent_branch = self
                        .all_branches
                        .get_mut(&parent_id)
                        .ok_or(Error::BranchNotFound)?;
                    debug_assert!(parent_branch.top_height < height);
                    debug_assert!(parent_branch.forks.is_empty());

                    parent_branch.top_height = height;
                    parent_branch.top = hash;
                    let notify_change = parent_branch.synced_to_genesis;

                    self.heads.insert(hash, parent_id);

                    if notify_change {
                        changes.removed.push(parent_hash);
                        changes.added.push(hash);
                    }
                }
                Some(sub_id) => {
                    // merging branches by renaming
                    debug_assert!(sub_id == pos.at_bottom_of_branch);
                    self.merge_branches(sub_id, parent_id, &mut changes)?;
                }
            }

            return Ok(changes);
        }

        // make a fork from the non-head branch top
        {
            let branch = self.get_branch(pos.on_top_of_branch)?;
            debug_assert!(parent_hash == branch.top);
            debug_assert!(!self.heads.contains_key(&parent_hash));
            debug_assert!(!branch.forks.is_empty());
        }

        if linked_to_bottom.is_none() {
            self.new_branch(hash, height, Some(&parent_hash), pos);
        }

        let parent_synced = {
            let branch = self
                .all_branches
                .get_mut(&pos.on_top_of_branch)
                .ok_or(Error::BranchNotFound)?;
            branch.forks.insert(pos.assigned_branch);
            branch.synced_to_genesis
        };
        if let Some(b) = self.all_branches.get_mut(&pos.assigned_branch) {
            b.parent = pos.on_top_of_branch;
        }
        self.update_heads(pos.assigned_branch, parent_synced, &mut changes)?;

        Ok(changes)
    }

    pub fn clear(&mut self) {
        self.all_branches.clear();
        self.heads.clear();
        self.unloaded_roots.clear();
        self.clear_current_chain();
    }

    /// Installs a branch graph loaded from the index database. Fork sets and
    /// sync flags are rebuilt from parent edges; any inconsistency clears the
    /// graph again and surfaces an error.
    pub fn init(
        &mut self,
        all_branches: BTreeMap<BranchId, BranchInfo>,
    ) -> Result<HeadChanges, Error> {
        self.clear();

        let mut heads = HeadChanges::default();
        if all_branches.is_empty() {
            return Ok(heads);
        }

        let mut fork_edges: Vec<(BranchId, BranchId)> = Vec::new();
        let mut unloaded: Vec<(TipsetHash, BranchId)> = Vec::new();
        let mut genesis_found = false;

        for (id, b) in &all_branches {
            if *id != b.id || *id == NO_BRANCH {
                error!("cannot load graph: inconsistent branch id {}", id);
                return self.load_failed();
            }

            if b.top_height < b.bottom_height {
                error!(
                    "cannot load graph: heights inconsistent ({} and {}) for id {}",
                    b.top_height, b.bottom_height, b.id
                );
                return self.load_failed();
            }

            if b.parent != NO_BRANCH {
                if b.parent == b.id {
                    error!(
                        "cannot load graph: parent and branch id are the same ({})",
                        b.id
                    );
                    return self.load_failed();
                }
                match all_branches.get(&b.parent) {
                    None => {
                        error!(
                            "cannot load graph: parent {} not found for branch {}",
                            b.parent, b.id
                        );
                        return self.load_failed();
                    }
                    Some(parent) => {
                        if parent.top_height >= b.bottom_height {
                            error!(
                                "cannot load graph: parent height inconsistent ({} and {}) \
                                 for id {} and parent {}",
                                b.bottom_height, parent.top_height, b.id, b.parent
                            );
                            return self.load_failed();
                        }
                        fork_edges.push((b.parent, b.id));
                    }
                }
            } else if b.id == GENESIS_BRANCH {
                genesis_found = true;
            } else {
                match &b.parent_hash {
                    None => {
                        error!("cannot load graph: expected parent hash for branch id={}", b.id);
                        self.clear();
                        return Err(Error::ParentExpected);
                    }
                    Some(parent_hash) => unloaded.push((*parent_hash, b.id)),
                }
            }
        }

        if !genesis_found {
            self.clear();
            return Err(Error::NoGenesisBranch);
        }

        self.all_branches = all_branches;
        for b in self.all_branches.values_mut() {
            b.forks.clear();
            b.synced_to_genesis = false;
        }
        for (parent, child) in fork_edges {
            if let Some(b) = self.all_branches.get_mut(&parent) {
                b.forks.insert(child);
            }
        }
        for (parent_hash, id) in unloaded {
            self.unloaded_roots.insert(parent_hash, id);
        }

        self.update_heads(GENESIS_BRANCH, true, &mut heads)?;

        // unsynced heads also needed
        let dangling: Vec<(TipsetHash, BranchId)> = self
            .all_branches
            .values()
            .filter(|b| b.forks.is_empty() && !b.synced_to_genesis)
            .map(|b| (b.top, b.id))
            .collect();
        for (top, id) in dangling {
            self.heads.insert(top, id);
        }
        for b in self.all_branches.values() {
            if b.forks.len() == 1 {
                // intermediate state between splitBranch and storeTipset,
                // should not be stored
                warn!(
                    "inconsistent # of forks (1) for branch {}, must be merged",
                    b.id
                );
            }
        }

        Ok(heads)
    }

    fn load_failed(&mut self) -> Result<HeadChanges, Error> {
        self.clear();
        Err(Error::LoadError)
    }

    fn clear_current_chain(&mut self) {
        self.current_chain.clear();
        self.current_top_branch = NO_BRANCH;
        self.current_height = 0;
    }

    fn new_branch(
        &mut self,
        hash: TipsetHash,
        height: Height,
        parent_hash: Option<&TipsetHash>,
        pos: &StorePosition,
    ) {
        debug_assert!(pos.assigned_branch != NO_BRANCH);
        debug_assert!(!self.all_branches.contains_key(&pos.assigned_branch));

        let mut info = BranchInfo {
            id: pos.assigned_branch,
            top: hash,
            top_height: height,
            bottom: hash,
            bottom_height: height,
            parent: NO_BRANCH,
            parent_hash: parent_hash.copied(),
            synced_to_genesis: false,
            forks: BTreeSet::new(),
        };

        self.heads.insert(hash, info.id);

        match parent_hash {
            None => {
                // here is genesis
                debug_assert!(pos.assigned_branch == GENESIS_BRANCH);
                debug_assert!(height == 0);
                info.synced_to_genesis = true;
            }
            Some(parent_hash) => {
                debug_assert!(height > 0);
                // only a standalone branch awaits its parent; a fork made on
                // top of a known branch is linked right away
                if pos.on_top_of_branch == NO_BRANCH {
                    self.unloaded_roots.insert(*parent_hash, info.id);
                }
            }
        }

        self.all_branches.insert(info.id, info);
    }

    /// The surviving branch absorbs the subgraph rooted at `sub_id`; the
    /// subgraph's own record disappears.
    fn merge_branches(
        &mut self,
        sub_id: BranchId,
        parent_id: BranchId,
        changes: &mut HeadChanges,
    ) -> Result<(), Error> {
        let sub = self
            .all_branches
            .remove(&sub_id)
            .ok_or(Error::BranchNotFound)?;

        let (old_top, synced) = {
            let parent = self
                .all_branches
                .get_mut(&parent_id)
                .ok_or(Error::BranchNotFound)?;
            let old_top = parent.top;
            parent.top_height = sub.top_height;
            parent.top = sub.top;
            parent.forks = sub.forks.clone();
            (old_top, parent.synced_to_genesis)
        };

        // absorbed forks hang off the surviving id now
        for fork_id in sub.forks {
            if let Some(fork) = self.all_branches.get_mut(&fork_id) {
                fork.parent = parent_id;
            }
        }

        if synced {
            changes.removed.push(old_top);
        }
        self.update_heads(parent_id, synced, changes)
    }

    /// Recursively recomputes head membership below a branch, propagating
    /// the sync flag and announcing newly synced head tips.
    fn update_heads(
        &mut self,
        id: BranchId,
        synced: bool,
        changes: &mut HeadChanges,
    ) -> Result<(), Error> {
        let (top, forks) = {
            let branch = self
                .all_branches
                .get_mut(&id)
                .ok_or(Error::BranchNotFound)?;
            branch.synced_to_genesis = synced;
            (branch.top, branch.forks.clone())
        };

        if forks.is_empty() {
            self.heads.insert(top, id);
            if synced {
                changes.added.push(top);
            }
        } else {
            for fork in forks {
                self.update_heads(fork, synced, changes)?;
            }
        }
        Ok(())
    }

    fn new_branch_id(&self) -> BranchId {
        match self.all_branches.keys().next_back() {
            Some(max) => max + 1,
            None => GENESIS_BRANCH + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocks::{BlockHeader, Ticket, TipsetKeys};

    fn tipset(parent: Option<&Tipset>, height: Height, salt: u8) -> Tipset {
        let parents = match parent {
            Some(parent) => parent.key().clone(),
            None => TipsetKeys::default(),
        };
        let header = BlockHeader::new(parents, height, Ticket::new(vec![salt, 1]), height * 30);
        Tipset::new(vec![header]).unwrap()
    }

    fn record(
        id: BranchId,
        bottom: &Tipset,
        top: &Tipset,
        parent: BranchId,
        parent_hash: Option<TipsetHash>,
    ) -> BranchInfo {
        BranchInfo {
            id,
            top: top.key().hash(),
            top_height: top.height(),
            bottom: bottom.key().hash(),
            bottom_height: bottom.height(),
            parent,
            parent_hash,
            synced_to_genesis: false,
            forks: BTreeSet::new(),
        }
    }

    /// Structural invariants of the graph: acyclic parent edges, consistent
    /// fork sets, and head exclusivity.
    fn assert_invariants(branches: &Branches) {
        for branch in branches.all_branches.values() {
            // parent pointers terminate within |all_branches| steps
            let mut id = branch.id;
            let mut steps = 0;
            while id != NO_BRANCH {
                let info = branches.all_branches.get(&id).expect("parent must exist");
                id = info.parent;
                steps += 1;
                assert!(steps <= branches.all_branches.len(), "cycle in parent edges");
            }

            if branch.parent != NO_BRANCH {
                let parent = &branches.all_branches[&branch.parent];
                assert!(parent.top_height < branch.bottom_height);
                assert!(parent.forks.contains(&branch.id));
            }
            for fork in &branch.forks {
                assert_eq!(branches.all_branches[fork].parent, branch.id);
            }
            assert!(branch.bottom_height <= branch.top_height);
        }

        // heads are exactly the fork-less branch tops
        let expected: BTreeMap<TipsetHash, BranchId> = branches
            .all_branches
            .values()
            .filter(|b| b.forks.is_empty())
            .map(|b| (b.top, b.id))
            .collect();
        assert_eq!(branches.heads, expected);

        // unloaded roots await hashes that are the parent of exactly their branch bottom
        for (hash, id) in &branches.unloaded_roots {
            let branch = &branches.all_branches[id];
            assert_eq!(branch.parent, NO_BRANCH);
            assert_eq!(branch.parent_hash.as_ref(), Some(hash));
        }
    }

    fn linear_chain(len: usize) -> Vec<Tipset> {
        let mut chain = vec![tipset(None, 0, 0)];
        for height in 1..len as Height {
            let parent = chain.last().cloned();
            chain.push(tipset(parent.as_ref(), height, 0));
        }
        chain
    }

    #[test]
    fn genesis_only() {
        let mut branches = Branches::new();
        let genesis = tipset(None, 0, 0);
        branches.store_genesis(&genesis).unwrap();

        let heads: Vec<_> = branches.get_all_heads().collect();
        assert_eq!(heads.len(), 1);
        assert_eq!(*heads[0].0, genesis.key().hash());
        assert_eq!(heads[0].1.id, GENESIS_BRANCH);
        assert!(heads[0].1.synced_to_genesis);

        branches.set_current_head(GENESIS_BRANCH, 0).unwrap();
        assert_eq!(branches.get_branch_at_height(0, true).unwrap(), GENESIS_BRANCH);

        // second genesis is refused
        assert_eq!(
            branches.store_genesis(&genesis).unwrap_err(),
            Error::StoreError
        );
        assert_invariants(&branches);
    }

    #[test]
    fn linear_extension_announces_each_top() {
        let mut branches = Branches::new();
        let chain = linear_chain(6);
        branches.store_genesis(&chain[0]).unwrap();

        for (i, ts) in chain.iter().enumerate().skip(1) {
            let pos = branches
                .find_store_position(ts, GENESIS_BRANCH, chain[i - 1].height())
                .unwrap();
            assert_eq!(pos.assigned_branch, GENESIS_BRANCH);
            assert!(pos.rename.is_none());

            let changes = branches.store_tipset(ts, &pos).unwrap();
            assert_eq!(changes.removed, vec![chain[i - 1].key().hash()]);
            assert_eq!(changes.added, vec![ts.key().hash()]);
            assert_invariants(&branches);
        }

        let heads: Vec<_> = branches.get_all_heads().collect();
        assert_eq!(heads.len(), 1);
        assert_eq!(*heads[0].0, chain[5].key().hash());
    }

    #[test]
    fn standalone_branch_stays_silent_until_linked() {
        let mut branches = Branches::new();
        let chain = linear_chain(4);
        branches.store_genesis(&chain[0]).unwrap();

        // T1 extends genesis
        let pos = branches.find_store_position(&chain[1], GENESIS_BRANCH, 0).unwrap();
        branches.store_tipset(&chain[1], &pos).unwrap();

        // T3 arrives out of order, its parent T2 is unknown
        let pos = branches.find_store_position(&chain[3], NO_BRANCH, 0).unwrap();
        assert_eq!(pos.at_bottom_of_branch, NO_BRANCH);
        assert_eq!(pos.on_top_of_branch, NO_BRANCH);
        let sub_branch = pos.assigned_branch;
        assert_ne!(sub_branch, GENESIS_BRANCH);

        let changes = branches.store_tipset(&chain[3], &pos).unwrap();
        assert!(changes.removed.is_empty() && changes.added.is_empty());
        assert_invariants(&branches);
        assert_eq!(
            branches.unloaded_roots.get(&chain[2].key().hash()),
            Some(&sub_branch)
        );

        // T2 closes the gap: the subgraph merges into the main branch and one
        // batched head change replaces the old top
        let pos = branches
            .find_store_position(&chain[2], GENESIS_BRANCH, chain[1].height())
            .unwrap();
        assert_eq!(pos.at_bottom_of_branch, sub_branch);
        assert_eq!(pos.on_top_of_branch, GENESIS_BRANCH);
        assert_eq!(pos.assigned_branch, GENESIS_BRANCH);
        let rename = pos.rename.clone().unwrap();
        assert!(!rename.split);
        assert_eq!(rename.old_id, sub_branch);
        assert_eq!(rename.new_id, GENESIS_BRANCH);

        let changes = branches.store_tipset(&chain[2], &pos).unwrap();
        assert_eq!(changes.removed, vec![chain[1].key().hash()]);
        assert_eq!(changes.added, vec![chain[3].key().hash()]);
        assert_invariants(&branches);

        // the absorbed branch record is gone
        assert_eq!(branches.get_branch(sub_branch).unwrap_err(), Error::BranchNotFound);
        assert!(branches.unloaded_roots.is_empty());
    }

    #[test]
    fn bottom_link_rolls_the_awaited_parent() {
        let mut branches = Branches::new();
        let chain = linear_chain(6);
        branches.store_genesis(&chain[0]).unwrap();

        // T5 then T4 arrive, neither parent is known yet
        let pos = branches.find_store_position(&chain[5], NO_BRANCH, 0).unwrap();
        let sub_branch = pos.assigned_branch;
        branches.store_tipset(&chain[5], &pos).unwrap();

        let pos = branches.find_store_position(&chain[4], NO_BRANCH, 0).unwrap();
        assert_eq!(pos.at_bottom_of_branch, sub_branch);
        assert_eq!(pos.assigned_branch, sub_branch);
        assert_eq!(pos.on_top_of_branch, NO_BRANCH);

        let changes = branches.store_tipset(&chain[4], &pos).unwrap();
        assert!(changes.removed.is_empty() && changes.added.is_empty());
        assert_invariants(&branches);

        let info = branches.get_branch(sub_branch).unwrap();
        assert_eq!(info.bottom, chain[4].key().hash());
        assert_eq!(info.top, chain[5].key().hash());
        assert!(!info.synced_to_genesis);
        assert_eq!(
            branches.unloaded_roots.get(&chain[3].key().hash()),
            Some(&sub_branch)
        );
    }

    #[test]
    fn init_accepts_a_consistent_graph() {
        // genesis 0..0, trunk 1..5, two forks above it
        let genesis = tipset(None, 0, 0);
        let trunk_bottom = tipset(Some(&genesis), 1, 0);
        let trunk_top = tipset(Some(&trunk_bottom), 5, 0);
        let fork_a = tipset(Some(&trunk_top), 6, 1);
        let fork_a_top = tipset(Some(&fork_a), 8, 1);
        let fork_b = tipset(Some(&trunk_top), 6, 2);

        let mut map = BTreeMap::new();
        map.insert(GENESIS_BRANCH, record(GENESIS_BRANCH, &genesis, &genesis, NO_BRANCH, None));
        map.insert(
            2,
            record(2, &trunk_bottom, &trunk_top, GENESIS_BRANCH, Some(genesis.key().hash())),
        );
        map.insert(3, record(3, &fork_a, &fork_a_top, 2, Some(trunk_top.key().hash())));
        map.insert(4, record(4, &fork_b, &fork_b, 2, Some(trunk_top.key().hash())));

        let mut branches = Branches::new();
        let heads = branches.init(map).unwrap();
        assert_invariants(&branches);

        let mut added = heads.added.clone();
        added.sort();
        let mut expected = vec![fork_a_top.key().hash(), fork_b.key().hash()];
        expected.sort();
        assert_eq!(added, expected);

        // routes and common roots
        let route = branches.get_route(GENESIS_BRANCH, 3).unwrap();
        assert_eq!(route, vec![1, 2, 3]);
        assert_eq!(branches.get_route(2, 4).unwrap(), vec![2, 4]);
        assert_eq!(branches.get_route(3, 4).unwrap_err(), Error::NoRoute);

        // walking parent edges from the route's leaf reproduces it in reverse
        let mut walked = vec![3];
        while *walked.last().unwrap() != GENESIS_BRANCH {
            let parent = branches.get_branch(*walked.last().unwrap()).unwrap().parent;
            walked.push(parent);
        }
        walked.reverse();
        assert_eq!(route, walked);

        let root = branches.get_common_root(3, 4).unwrap();
        assert_eq!(root.id, 2);
        let root_rev = branches.get_common_root(4, 3).unwrap();
        assert_eq!(root_rev.id, root.id);
        assert_eq!(branches.get_common_root(2, 3).unwrap().id, 2);

        // current chain coverage after picking fork A's head
        branches.set_current_head(3, 8).unwrap();
        for height in 0..=8 {
            let id = branches.get_branch_at_height(height, true).unwrap();
            let info = branches.get_branch(id).unwrap();
            assert!(info.bottom_height <= height || id == GENESIS_BRANCH);
            assert!(height <= info.top_height);
        }
        assert_eq!(branches.get_branch_at_height(9, false).unwrap(), NO_BRANCH);
        assert_eq!(
            branches.get_branch_at_height(9, true).unwrap_err(),
            Error::BranchNotFound
        );

        // switching to the other fork rebuilds the chain
        branches.set_current_head(4, 6).unwrap();
        assert_eq!(branches.get_branch_at_height(6, true).unwrap(), 4);
        assert_eq!(branches.get_branch_at_height(5, true).unwrap(), 2);

        // clearing
        branches.set_current_head(NO_BRANCH, 0).unwrap();
        assert_eq!(
            branches.get_branch_at_height(0, true).unwrap_err(),
            Error::NoCurrentChain
        );
    }

    #[test]
    fn init_rejects_broken_graphs() {
        let genesis = tipset(None, 0, 0);
        let child = tipset(Some(&genesis), 1, 0);

        // no genesis branch
        let mut map = BTreeMap::new();
        map.insert(2, record(2, &child, &child, NO_BRANCH, Some(genesis.key().hash())));
        let mut branches = Branches::new();
        assert_eq!(branches.init(map).unwrap_err(), Error::NoGenesisBranch);
        assert!(branches.empty());

        // parent id missing from the map
        let mut map = BTreeMap::new();
        map.insert(GENESIS_BRANCH, record(GENESIS_BRANCH, &genesis, &genesis, NO_BRANCH, None));
        map.insert(3, record(3, &child, &child, 2, Some(genesis.key().hash())));
        assert_eq!(branches.init(map).unwrap_err(), Error::LoadError);
        assert!(branches.empty());

        // heights inverted
        let mut bad = record(2, &child, &child, GENESIS_BRANCH, Some(genesis.key().hash()));
        bad.bottom_height = 5;
        bad.top_height = 1;
        let mut map = BTreeMap::new();
        map.insert(GENESIS_BRANCH, record(GENESIS_BRANCH, &genesis, &genesis, NO_BRANCH, None));
        map.insert(2, bad);
        assert_eq!(branches.init(map).unwrap_err(), Error::LoadError);

        // overlapping parent heights
        let overlapping = record(2, &genesis, &child, GENESIS_BRANCH, Some(genesis.key().hash()));
        let mut map = BTreeMap::new();
        map.insert(GENESIS_BRANCH, record(GENESIS_BRANCH, &genesis, &genesis, NO_BRANCH, None));
        map.insert(2, overlapping);
        assert_eq!(branches.init(map).unwrap_err(), Error::LoadError);

        // dangling root without a parent hash
        let mut map = BTreeMap::new();
        map.insert(GENESIS_BRANCH, record(GENESIS_BRANCH, &genesis, &genesis, NO_BRANCH, None));
        map.insert(2, record(2, &child, &child, NO_BRANCH, None));
        assert_eq!(branches.init(map).unwrap_err(), Error::ParentExpected);
    }

    #[test]
    fn unsynced_head_cannot_become_current() {
        let mut branches = Branches::new();
        let chain = linear_chain(3);
        branches.store_genesis(&chain[0]).unwrap();

        let pos = branches.find_store_position(&chain[2], NO_BRANCH, 0).unwrap();
        let sub_branch = pos.assigned_branch;
        branches.store_tipset(&chain[2], &pos).unwrap();

        assert_eq!(
            branches.set_current_head(sub_branch, 2).unwrap_err(),
            Error::HeadNotSynced
        );
        assert_eq!(
            branches.set_current_head(99, 2).unwrap_err(),
            Error::HeadNotFound
        );

        branches.set_current_head(GENESIS_BRANCH, 0).unwrap();
        assert_eq!(
            branches.set_current_head(GENESIS_BRANCH, 7).unwrap_err(),
            Error::HeightMismatch
        );
    }

    #[test]
    fn root_branch_of_unloaded_subgraph() {
        let mut branches = Branches::new();
        let chain = linear_chain(5);
        branches.store_genesis(&chain[0]).unwrap();

        let pos = branches.find_store_position(&chain[4], NO_BRANCH, 0).unwrap();
        let sub_branch = pos.assigned_branch;
        branches.store_tipset(&chain[4], &pos).unwrap();

        let root = branches.get_root_branch(sub_branch).unwrap();
        assert_eq!(root.id, sub_branch);
        assert!(!root.synced_to_genesis);

        let genesis_root = branches.get_root_branch(GENESIS_BRANCH).unwrap();
        assert!(genesis_root.synced_to_genesis);
    }
}
