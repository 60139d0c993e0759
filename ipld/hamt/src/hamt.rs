// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::node::Leaf;
use crate::{key_to_indices, Error, Item, Node, DEFAULT_BIT_WIDTH, MAX_ARRAY_WIDTH};
use cid::Cid;
use ipld_blockstore::BlockStore;

/// Implementation of the HAMT data structure for IPLD.
///
/// Keys are strings, values opaque bytes. Subtrees referenced by CID are
/// fetched from the block store on first touch and replace the referencing
/// slot in place; `flush` writes loaded subtrees back bottom-up and leaves
/// the root as a CID.
#[derive(Debug)]
pub struct Hamt<'a, BS> {
    root: Item,
    store: &'a BS,
    bit_width: u32,
}

impl<'a, BS> PartialEq for Hamt<'a, BS> {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl<'a, BS> Hamt<'a, BS>
where
    BS: BlockStore,
{
    pub fn new(store: &'a BS) -> Self {
        Self::new_with_bit_width(store, DEFAULT_BIT_WIDTH)
    }

    /// Construct a HAMT with a custom index width. The width must match when
    /// the trie is later reopened from its root CID.
    pub fn new_with_bit_width(store: &'a BS, bit_width: u32) -> Self {
        Self {
            root: Item::Ptr(Box::default()),
            store,
            bit_width,
        }
    }

    /// Lazily instantiate a HAMT from this root link.
    pub fn load(cid: &Cid, store: &'a BS) -> Result<Self, Error> {
        Self::load_with_bit_width(cid, store, DEFAULT_BIT_WIDTH)
    }

    pub fn load_with_bit_width(cid: &Cid, store: &'a BS, bit_width: u32) -> Result<Self, Error> {
        if !store.has(cid)? {
            return Err(Error::CidNotFound(cid.to_string()));
        }
        Ok(Self {
            root: Item::Link(*cid),
            store,
            bit_width,
        })
    }

    /// Inserts a key-value pair into the HAMT, replacing any previous value.
    pub fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let indices = key_to_indices(key, self.bit_width, None);
        let (store, bit_width) = (self.store, self.bit_width);
        set_in(store, bit_width, self.root_node()?, &indices, key, value)
    }

    /// Returns the value corresponding to the key, or `NotFound`.
    pub fn get(&mut self, key: &str) -> Result<Vec<u8>, Error> {
        let indices = key_to_indices(key, self.bit_width, None);
        let store = self.store;
        get_in(store, self.root_node()?, &indices, key).map(|v| v.clone())
    }

    /// Returns `Ok(true)` if the key is present.
    pub fn contains(&mut self, key: &str) -> Result<bool, Error> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(Error::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Removes a key from the HAMT, or returns `NotFound`.
    pub fn remove(&mut self, key: &str) -> Result<(), Error> {
        let indices = key_to_indices(key, self.bit_width, None);
        let store = self.store;
        remove_in(store, self.root_node()?, &indices, key)
    }

    /// Serializes all loaded nodes to the block store bottom-up and returns
    /// the root CID. Structurally equal tries flush to identical CIDs.
    pub fn flush(&mut self) -> Result<Cid, Error> {
        flush_item(self.store, &mut self.root)?;
        self.cid().map(|cid| *cid)
    }

    /// Root CID of the trie; requires a preceding `flush`.
    pub fn cid(&self) -> Result<&Cid, Error> {
        match &self.root {
            Item::Link(cid) => Ok(cid),
            _ => Err(Error::ExpectedCid),
        }
    }

    /// In-order traversal over all entries, lazily loading subtrees.
    pub fn visit<F>(&mut self, visitor: &mut F) -> Result<(), Error>
    where
        F: FnMut(&str, &[u8]) -> Result<(), Error>,
    {
        visit_item(self.store, &mut self.root, visitor)
    }

    fn root_node(&mut self) -> Result<&mut Node, Error> {
        load_item(self.store, &mut self.root)?;
        match &mut self.root {
            Item::Ptr(node) => Ok(node),
            _ => unreachable!("root resolves to a node"),
        }
    }

    #[cfg(test)]
    pub(crate) fn root(&self) -> &Item {
        &self.root
    }
}

/// Resolves a CID slot into a loaded node, in place.
fn load_item<BS: BlockStore>(store: &BS, item: &mut Item) -> Result<(), Error> {
    if let Item::Link(cid) = item {
        let node: Node = store
            .get(cid)?
            .ok_or_else(|| Error::CidNotFound(cid.to_string()))?;
        *item = Item::Ptr(Box::new(node));
    }
    Ok(())
}

fn set_in<BS: BlockStore>(
    store: &BS,
    bit_width: u32,
    node: &mut Node,
    indices: &[u32],
    key: &str,
    value: Vec<u8>,
) -> Result<(), Error> {
    let (&index, rest) = indices.split_first().ok_or(Error::MaxDepth)?;

    let item = match node.items.get_mut(&index) {
        Some(item) => item,
        None => {
            let mut leaf = Leaf::new();
            leaf.insert(key.to_string(), value);
            node.items.insert(index, Item::Leaf(leaf));
            return Ok(());
        }
    };
    load_item(store, item)?;

    match item {
        Item::Ptr(child) => set_in(store, bit_width, child, rest, key, value),
        Item::Leaf(leaf) => {
            if leaf.contains_key(key) || leaf.len() < MAX_ARRAY_WIDTH {
                leaf.insert(key.to_string(), value);
                return Ok(());
            }
            // leaf is full: push it one level down, re-indexing every entry
            // by its own key suffix
            let mut child = Node::default();
            set_in(store, bit_width, &mut child, rest, key, value)?;
            for (k, v) in std::mem::take(leaf) {
                let suffix = key_to_indices(&k, bit_width, Some(indices.len()));
                set_in(store, bit_width, &mut child, &suffix, &k, v)?;
            }
            *item = Item::Ptr(Box::new(child));
            Ok(())
        }
        Item::Link(_) => unreachable!("item was loaded above"),
    }
}

fn get_in<'n, BS: BlockStore>(
    store: &BS,
    node: &'n mut Node,
    indices: &[u32],
    key: &str,
) -> Result<&'n Vec<u8>, Error> {
    let (&index, rest) = indices.split_first().ok_or(Error::MaxDepth)?;

    let item = node.items.get_mut(&index).ok_or(Error::NotFound)?;
    load_item(store, item)?;

    match item {
        Item::Ptr(child) => get_in(store, child, rest, key),
        Item::Leaf(leaf) => leaf.get(key).ok_or(Error::NotFound),
        Item::Link(_) => unreachable!("item was loaded above"),
    }
}

fn remove_in<BS: BlockStore>(
    store: &BS,
    node: &mut Node,
    indices: &[u32],
    key: &str,
) -> Result<(), Error> {
    let (&index, rest) = indices.split_first().ok_or(Error::MaxDepth)?;

    let item = node.items.get_mut(&index).ok_or(Error::NotFound)?;
    load_item(store, item)?;

    match item {
        Item::Ptr(child) => {
            remove_in(store, child, rest, key)?;
            clean_shard(item);
            return Ok(());
        }
        Item::Leaf(leaf) => {
            if !leaf.contains_key(key) {
                return Err(Error::NotFound);
            }
            if leaf.len() > 1 {
                leaf.remove(key);
                return Ok(());
            }
        }
        Item::Link(_) => unreachable!("item was loaded above"),
    }

    // last entry of the leaf: the whole slot goes
    node.items.remove(&index);
    Ok(())
}

/// Canonicalizes a subtree slot after a delete: a node left with a single
/// leaf is hoisted, and a node whose items are all leaves with at most
/// `MAX_ARRAY_WIDTH` entries in total collapses into one leaf. A single
/// remaining subtree link is kept as is.
fn clean_shard(item: &mut Item) {
    let node = match item {
        Item::Ptr(node) => node,
        _ => return,
    };
    match node.items.len() {
        1 => {
            let collapsed = match node.items.values_mut().next() {
                Some(Item::Leaf(leaf)) => std::mem::take(leaf),
                _ => return,
            };
            *item = Item::Leaf(collapsed);
        }
        n if n <= MAX_ARRAY_WIDTH => {
            let mut merged = Leaf::new();
            for sub in node.items.values() {
                let leaf = match sub {
                    Item::Leaf(leaf) => leaf,
                    _ => return,
                };
                for (k, v) in leaf {
                    merged.insert(k.clone(), v.clone());
                    if merged.len() > MAX_ARRAY_WIDTH {
                        return;
                    }
                }
            }
            *item = Item::Leaf(merged);
        }
        _ => {}
    }
}

fn flush_item<BS: BlockStore>(store: &BS, item: &mut Item) -> Result<(), Error> {
    if let Item::Ptr(node) = item {
        for sub in node.items.values_mut() {
            flush_item(store, sub)?;
        }
        let cid = store.put(&**node)?;
        *item = Item::Link(cid);
    }
    Ok(())
}

fn visit_item<BS, F>(store: &BS, item: &mut Item, visitor: &mut F) -> Result<(), Error>
where
    BS: BlockStore,
    F: FnMut(&str, &[u8]) -> Result<(), Error>,
{
    load_item(store, item)?;
    match item {
        Item::Ptr(node) => {
            for sub in node.items.values_mut() {
                visit_item(store, sub, visitor)?;
            }
        }
        Item::Leaf(leaf) => {
            for (k, v) in leaf.iter() {
                visitor(k, v)?;
            }
        }
        Item::Link(_) => unreachable!("item was loaded above"),
    }
    Ok(())
}
