// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// HAMT Error
#[derive(Debug, Error)]
pub enum Error {
    /// Key was not found in the map
    #[error("Not found")]
    NotFound,
    /// Index path of a key was fully consumed without placement
    #[error("Maximum depth reached")]
    MaxDepth,
    /// Root has not been flushed to a CID yet
    #[error("Expected CID at root, flush first")]
    ExpectedCid,
    /// CID not found in store error
    #[error("Cid ({0}) did not match any in database")]
    CidNotFound(String),
    /// Error propagated from the block store
    #[error(transparent)]
    Store(#[from] ipld_blockstore::Error),
}

impl From<encoding::Error> for Error {
    fn from(e: encoding::Error) -> Self {
        Self::Store(e.into())
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;

        match (self, other) {
            (NotFound, NotFound) => true,
            (MaxDepth, MaxDepth) => true,
            (ExpectedCid, ExpectedCid) => true,
            (CidNotFound(a), CidNotFound(b)) => a == b,
            _ => false,
        }
    }
}
