// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod errors;

pub use errors::Error;

use cid::Cid;
use db::Store;
use encoding::{cid_of_cbor, from_slice, to_vec};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Wrapper for database to handle inserting and retrieving IPLD data with CIDs.
///
/// Nodes are stored as DAG-CBOR payloads keyed by the blake2b-256 v1 CID of
/// their encoding.
pub trait BlockStore: Store {
    /// Get typed object from block store by CID.
    fn get<T>(&self, cid: &Cid) -> Result<Option<T>, Error>
    where
        T: DeserializeOwned,
    {
        match self.get_bytes(cid)? {
            Some(bz) => Ok(Some(from_slice(&bz)?)),
            None => Ok(None),
        }
    }

    /// Get raw bytes from block store by CID.
    fn get_bytes(&self, cid: &Cid) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.read(cid.to_bytes())?)
    }

    /// Put an object in the block store and return the CID identifier.
    fn put<S>(&self, obj: &S) -> Result<Cid, Error>
    where
        S: Serialize,
    {
        self.put_raw(to_vec(obj)?)
    }

    /// Put raw DAG-CBOR bytes in the block store and return the CID identifier.
    fn put_raw(&self, bytes: Vec<u8>) -> Result<Cid, Error> {
        let cid = cid_of_cbor(&bytes);
        self.write(cid.to_bytes(), &bytes)?;
        Ok(cid)
    }

    /// Write a block under a caller-provided CID.
    fn put_keyed(&self, cid: &Cid, bytes: &[u8]) -> Result<(), Error> {
        Ok(self.write(cid.to_bytes(), bytes)?)
    }

    /// Returns `Ok(true)` if the CID exists in the store.
    fn has(&self, cid: &Cid) -> Result<bool, Error> {
        Ok(self.exists(cid.to_bytes())?)
    }
}

impl<T: Store> BlockStore for T {}
