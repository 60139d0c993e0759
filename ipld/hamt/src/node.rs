// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{Error as _, SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Entries of a single leaf slot, keyed by the full key string.
pub(crate) type Leaf = BTreeMap<String, Vec<u8>>;

/// One slot of a trie node.
///
/// A `Link` is an unloaded subtree; resolving it replaces the item in place
/// with a `Ptr`, so the loaded node is exclusively owned by its parent slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Item {
    Link(Cid),
    Ptr(Box<Node>),
    Leaf(Leaf),
}

/// Fixed-width bitmapped trie node; only occupied slots are materialized.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct Node {
    pub(crate) items: BTreeMap<u32, Item>,
}

/// Minimal big-endian bitmap with bit `k` set for every occupied slot `k`.
fn bitmap_bytes<I: Iterator<Item = u32>>(indices: I) -> Vec<u8> {
    let mut bytes: Vec<u8> = Vec::new();
    for index in indices {
        let byte = (index / 8) as usize;
        if byte >= bytes.len() {
            bytes.resize(byte + 1, 0);
        }
        bytes[byte] |= 1 << (index % 8);
    }
    bytes.reverse();
    bytes
}

fn bitmap_indices(bytes: &[u8]) -> Vec<u32> {
    let mut indices = Vec::new();
    for (i, byte) in bytes.iter().rev().enumerate() {
        for bit in 0..8u32 {
            if byte & (1 << bit) != 0 {
                indices.push(i as u32 * 8 + bit);
            }
        }
    }
    indices
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bitmap = bitmap_bytes(self.items.keys().copied());
        let pointers: Vec<&Item> = self.items.values().collect();
        (serde_bytes::Bytes::new(&bitmap), pointers).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (bitmap, pointers): (serde_bytes::ByteBuf, Vec<Item>) =
            Deserialize::deserialize(deserializer)?;
        let indices = bitmap_indices(&bitmap);
        if indices.len() != pointers.len() {
            return Err(de::Error::custom("pointer count does not match bitmap"));
        }
        Ok(Node {
            items: indices.into_iter().zip(pointers).collect(),
        })
    }
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Item::Link(cid) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("0", cid)?;
                map.end()
            }
            Item::Leaf(leaf) => {
                let entries: Vec<(&str, &serde_bytes::Bytes)> = leaf
                    .iter()
                    .map(|(k, v)| (k.as_str(), serde_bytes::Bytes::new(v)))
                    .collect();
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("1", &entries)?;
                map.end()
            }
            Item::Ptr(_) => Err(S::Error::custom("unflushed subtree is not serializable")),
        }
    }
}

struct ItemVisitor;

impl<'de> Visitor<'de> for ItemVisitor {
    type Value = Item;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a map from a pointer tag to a cid or leaf entries")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let tag: String = map
            .next_key()?
            .ok_or_else(|| de::Error::custom("empty pointer map"))?;
        match tag.as_str() {
            "0" => Ok(Item::Link(map.next_value()?)),
            "1" => {
                let entries: Vec<(String, serde_bytes::ByteBuf)> = map.next_value()?;
                Ok(Item::Leaf(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k, v.into_vec()))
                        .collect(),
                ))
            }
            other => Err(de::Error::custom(format!("unknown pointer tag {}", other))),
        }
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(ItemVisitor)
    }
}
