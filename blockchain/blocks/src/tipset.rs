// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{BlockHeader, Error, Height};
use cid::Cid;
use encoding::{blake2b_256, Cbor};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Digest uniquely identifying a tipset: the blake2b-256 hash of its ordered
/// block CID list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TipsetHash([u8; 32]);

impl TipsetHash {
    pub fn new(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for TipsetHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for TipsetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TipsetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TipsetHash({})", self)
    }
}

impl Serialize for TipsetHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::Bytes::new(&self.0).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TipsetHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bz: serde_bytes::ByteBuf = Deserialize::deserialize(deserializer)?;
        let digest: [u8; 32] = bz
            .as_ref()
            .try_into()
            .map_err(|_| de::Error::custom("tipset hash must be 32 bytes"))?;
        Ok(Self(digest))
    }
}

/// A set of CIDs forming a unique key for a tipset.
///
/// The CIDs are kept in the canonical iteration order of blocks in the tipset
/// (by ticket), so equal tipsets produce equal keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Ord, PartialOrd)]
pub struct TipsetKeys {
    cids: Vec<Cid>,
}

impl TipsetKeys {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self { cids }
    }

    /// Returns tipset header cids
    pub fn cids(&self) -> &[Cid] {
        &self.cids
    }

    /// Hash over the ordered CID list, identifying the tipset.
    pub fn hash(&self) -> TipsetHash {
        let mut ingest = Vec::new();
        for cid in &self.cids {
            ingest.extend_from_slice(&cid.to_bytes());
        }
        TipsetHash::new(blake2b_256(&ingest))
    }
}

impl Serialize for TipsetKeys {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.cids.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TipsetKeys {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let cids: Vec<Cid> = Deserialize::deserialize(deserializer)?;
        Ok(TipsetKeys { cids })
    }
}

impl Cbor for TipsetKeys {}

/// An immutable set of blocks at the same height with the same parent set.
/// Blocks in a tipset are canonically ordered by ticket.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tipset {
    blocks: Vec<BlockHeader>,
    key: TipsetKeys,
}

#[allow(clippy::len_without_is_empty)]
impl Tipset {
    /// Builds a new tipset from a collection of blocks.
    /// A valid tipset contains a non-empty collection of blocks that specify
    /// identical height and parents; block CIDs must be distinct.
    pub fn new(headers: Vec<BlockHeader>) -> Result<Self, Error> {
        if headers.is_empty() {
            return Err(Error::NoBlocks);
        }

        let mut sorted_headers = Vec::with_capacity(headers.len());

        for header in headers {
            if !sorted_headers.is_empty() {
                let first: &BlockHeader = &sorted_headers[0];
                if header.parents() != first.parents() {
                    return Err(Error::InvalidTipset("parent cids are not equal".to_string()));
                }
                if header.height() != first.height() {
                    return Err(Error::InvalidTipset("heights are not equal".to_string()));
                }
            }
            sorted_headers.push(header);
        }

        // canonical order; ticket ties are broken with the header CIDs
        sorted_headers
            .sort_by_key(|header| (header.ticket().vrfproof.clone(), header.cid().to_bytes()));

        let cids: Vec<Cid> = sorted_headers.iter().map(|h| *h.cid()).collect();
        for (i, cid) in cids.iter().enumerate() {
            if cids[..i].contains(cid) {
                return Err(Error::InvalidTipset("duplicate block cids".to_string()));
            }
        }

        Ok(Self {
            blocks: sorted_headers,
            key: TipsetKeys { cids },
        })
    }

    /// Returns the height of the tipset.
    pub fn height(&self) -> Height {
        self.blocks[0].height()
    }

    /// Returns all blocks in the tipset.
    pub fn blocks(&self) -> &[BlockHeader] {
        &self.blocks
    }

    /// Returns a key for the tipset.
    pub fn key(&self) -> &TipsetKeys {
        &self.key
    }

    /// Returns slice of CIDs for the current tipset.
    pub fn cids(&self) -> &[Cid] {
        self.key.cids()
    }

    /// Returns the CIDs of the parents of the blocks in the tipset.
    pub fn parents(&self) -> &TipsetKeys {
        self.blocks[0].parents()
    }

    /// Hash of the parent tipset key, `None` for genesis.
    pub fn parent_hash(&self) -> Option<TipsetHash> {
        if self.parents().cids().is_empty() {
            None
        } else {
            Some(self.parents().hash())
        }
    }

    /// Returns the number of blocks in the tipset.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns the smallest timestamp of all blocks in the tipset.
    pub fn min_timestamp(&self) -> u64 {
        self.blocks
            .iter()
            .map(|block| block.timestamp())
            .min()
            .expect("tipset is non-empty")
    }
}
