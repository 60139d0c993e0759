// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod branches;
mod store;

pub use self::branches::{
    BranchId, BranchInfo, Branches, HeadChanges, RenameBranch, StorePosition, GENESIS_BRANCH,
    NO_BRANCH,
};
pub use self::store::*;
