// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};

/// A proof of the slot leadership of the block producer, used to order blocks
/// within a tipset.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket {
    #[serde(with = "serde_bytes")]
    pub vrfproof: Vec<u8>,
}

impl Ticket {
    pub fn new(vrfproof: Vec<u8>) -> Self {
        Self { vrfproof }
    }
}
