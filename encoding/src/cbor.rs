// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::multihash::{Code, MultihashDigest};
use cid::Cid;
use fvm_ipld_encoding::{from_slice, to_vec, DAG_CBOR};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Error;

/// Marker trait for types stored as DAG-CBOR blocks.
pub trait Cbor: Serialize + DeserializeOwned {
    /// Marshals the object into DAG-CBOR bytes.
    fn marshal_cbor(&self) -> Result<Vec<u8>, Error> {
        to_vec(self)
    }

    /// Unmarshals DAG-CBOR bytes into the object.
    fn unmarshal_cbor(bz: &[u8]) -> Result<Self, Error> {
        from_slice(bz)
    }

    /// Returns the content identifier of the marshalled object.
    fn cid(&self) -> Result<Cid, Error> {
        Ok(cid_of_cbor(&self.marshal_cbor()?))
    }
}

/// Builds the v1 CID of an already encoded DAG-CBOR payload.
pub fn cid_of_cbor(bz: &[u8]) -> Cid {
    Cid::new_v1(DAG_CBOR, Code::Blake2b256.digest(bz))
}
