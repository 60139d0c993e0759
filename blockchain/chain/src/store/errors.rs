// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::branches;
use thiserror::Error;

/// Chain database error
#[derive(Debug, Error)]
pub enum Error {
    /// The database has not been initialized yet
    #[error("chain db is not initialized")]
    NotInitialized,
    /// Tipset data is inconsistent, as described by the string parameter
    #[error("bad tipset: {0}")]
    BadTipset(String),
    /// No genesis tipset in the database
    #[error("no genesis tipset")]
    NoGenesis,
    /// Stored genesis differs from the expected one
    #[error("genesis mismatch")]
    GenesisMismatch,
    /// Stored data contradicts itself
    #[error("data integrity error: {0}")]
    DataIntegrityError(String),
    /// Key not found in the database
    #[error("{0} not found")]
    NotFound(String),
    /// Error originating from the branch graph
    #[error(transparent)]
    Branches(#[from] branches::Error),
    /// Error originating from constructing blockchain structures
    #[error(transparent)]
    Blockchain(#[from] blocks::Error),
    /// Error originating from the block store
    #[error(transparent)]
    BlockStore(#[from] ipld_blockstore::Error),
    /// Error originating from encoding arbitrary data
    #[error("{0}")]
    Encoding(String),
}

impl From<encoding::Error> for Error {
    fn from(e: encoding::Error) -> Error {
        Error::Encoding(e.to_string())
    }
}
