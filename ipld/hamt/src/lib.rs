// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod error;
mod hamt;
mod hash_bits;
mod node;

pub use self::error::Error;
pub use self::hamt::Hamt;
pub use self::hash_bits::key_to_indices;
pub(crate) use self::node::{Item, Node};

/// Maximum number of entries a leaf may hold before it is split into a
/// subshard, and the collapse threshold used after deletes.
pub const MAX_ARRAY_WIDTH: usize = 3;

/// Index bits consumed per trie level unless overridden at construction.
pub const DEFAULT_BIT_WIDTH: u32 = 8;
