// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod cbor;
mod hash;

pub use self::cbor::*;
pub use self::hash::*;

pub use fvm_ipld_encoding::{from_slice, to_vec, Error, DAG_CBOR};
