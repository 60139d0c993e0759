// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{Height, Ticket, TipsetKeys};
use cid::Cid;
use encoding::{cid_of_cbor, to_vec, Cbor};
use once_cell::sync::OnceCell;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Header of a single block within a tipset.
///
/// The header CID is computed over the DAG-CBOR encoding on first use and
/// cached; headers are immutable after construction.
#[derive(Debug, Clone)]
pub struct BlockHeader {
    /// The set of parents this block was based on. Typically one, but can be
    /// several in the case where there were multiple winning ticket-holders
    /// for a round.
    parents: TipsetKeys,
    height: Height,
    ticket: Ticket,
    /// Block creation time, in seconds since the Unix epoch
    timestamp: u64,
    cached_cid: OnceCell<Cid>,
}

impl BlockHeader {
    pub fn new(parents: TipsetKeys, height: Height, ticket: Ticket, timestamp: u64) -> Self {
        Self {
            parents,
            height,
            ticket,
            timestamp,
            cached_cid: OnceCell::new(),
        }
    }

    pub fn parents(&self) -> &TipsetKeys {
        &self.parents
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn ticket(&self) -> &Ticket {
        &self.ticket
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the content identifier of the header.
    pub fn cid(&self) -> &Cid {
        self.cached_cid
            .get_or_init(|| cid_of_cbor(&to_vec(self).expect("CBOR serialization failed")))
    }
}

impl PartialEq for BlockHeader {
    fn eq(&self, other: &Self) -> bool {
        self.parents == other.parents
            && self.height == other.height
            && self.ticket == other.ticket
            && self.timestamp == other.timestamp
    }
}

impl Eq for BlockHeader {}

impl Serialize for BlockHeader {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (&self.parents, &self.height, &self.ticket, &self.timestamp).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BlockHeader {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (parents, height, ticket, timestamp): (TipsetKeys, Height, Ticket, u64) =
            Deserialize::deserialize(deserializer)?;
        if height == 0 && !parents.cids().is_empty() {
            return Err(de::Error::custom("genesis header cannot have parents"));
        }
        Ok(Self {
            parents,
            height,
            ticket,
            timestamp,
            cached_cid: OnceCell::new(),
        })
    }
}

impl Cbor for BlockHeader {}
