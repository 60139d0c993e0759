// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use blocks::{BlockHeader, Error, Ticket, Tipset, TipsetKeys};

fn template_header(ticket_p: Vec<u8>, height: u64, parents: TipsetKeys) -> BlockHeader {
    BlockHeader::new(parents, height, Ticket::new(ticket_p), height * 30)
}

fn genesis() -> Tipset {
    Tipset::new(vec![template_header(vec![0], 0, TipsetKeys::default())]).unwrap()
}

#[test]
fn empty_tipset_is_rejected() {
    assert_eq!(Tipset::new(vec![]).unwrap_err(), Error::NoBlocks);
}

#[test]
fn blocks_are_ordered_by_ticket() {
    let parents = genesis().key().clone();
    let b1 = template_header(vec![5, 5], 1, parents.clone());
    let b2 = template_header(vec![1, 1], 1, parents.clone());
    let b3 = template_header(vec![3, 3], 1, parents);

    let ts = Tipset::new(vec![b1.clone(), b2.clone(), b3.clone()]).unwrap();
    assert_eq!(ts.blocks(), &[b2, b3, b1]);
    assert_eq!(ts.len(), 3);
}

#[test]
fn key_hash_ignores_insertion_order() {
    let parents = genesis().key().clone();
    let b1 = template_header(vec![5], 1, parents.clone());
    let b2 = template_header(vec![1], 1, parents);

    let a = Tipset::new(vec![b1.clone(), b2.clone()]).unwrap();
    let b = Tipset::new(vec![b2, b1]).unwrap();
    assert_eq!(a.key(), b.key());
    assert_eq!(a.key().hash(), b.key().hash());
}

#[test]
fn mismatched_parents_are_rejected() {
    let g = genesis();
    let other = Tipset::new(vec![template_header(vec![9], 0, TipsetKeys::default())]).unwrap();
    assert_ne!(g.key(), other.key());

    let b1 = template_header(vec![1], 1, g.key().clone());
    let b2 = template_header(vec![2], 1, other.key().clone());
    assert_eq!(
        Tipset::new(vec![b1, b2]).unwrap_err(),
        Error::InvalidTipset("parent cids are not equal".to_string())
    );
}

#[test]
fn mismatched_heights_are_rejected() {
    let parents = genesis().key().clone();
    let b1 = template_header(vec![1], 1, parents.clone());
    let b2 = template_header(vec![2], 2, parents);
    assert_eq!(
        Tipset::new(vec![b1, b2]).unwrap_err(),
        Error::InvalidTipset("heights are not equal".to_string())
    );
}

#[test]
fn duplicate_blocks_are_rejected() {
    let parents = genesis().key().clone();
    let b1 = template_header(vec![1], 1, parents);
    assert_eq!(
        Tipset::new(vec![b1.clone(), b1]).unwrap_err(),
        Error::InvalidTipset("duplicate block cids".to_string())
    );
}

#[test]
fn genesis_has_no_parent_hash() {
    let g = genesis();
    assert_eq!(g.height(), 0);
    assert_eq!(g.parent_hash(), None);

    let child = Tipset::new(vec![template_header(vec![1], 1, g.key().clone())]).unwrap();
    assert_eq!(child.parent_hash(), Some(g.key().hash()));
}
