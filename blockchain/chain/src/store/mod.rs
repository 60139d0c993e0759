// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod chain_db;
mod config;
mod errors;
mod index_db;
mod tipset_cache;

pub use self::chain_db::*;
pub use self::config::*;
pub use self::errors::*;
pub use self::index_db::*;
pub use self::tipset_cache::*;
