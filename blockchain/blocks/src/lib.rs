// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod block_header;
mod errors;
mod ticket;
mod tipset;

pub use block_header::BlockHeader;
pub use errors::Error;
pub use ticket::Ticket;
pub use tipset::{Tipset, TipsetHash, TipsetKeys};

/// Chain height of a tipset. Heights are not necessarily contiguous, a round
/// may produce no blocks.
pub type Height = u64;
