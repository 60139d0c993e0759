// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use db::{MemoryDB, Store};
use encoding::blake2b_256;

/// Content-addressed row the way the block store produces them: the key is
/// the digest of the payload.
fn block(payload: &[u8]) -> (Vec<u8>, Vec<u8>) {
    (blake2b_256(payload).to_vec(), payload.to_vec())
}

#[test]
fn stores_blocks_under_their_digest() {
    let db = MemoryDB::new();
    let (key, value) = block(b"genesis header");

    db.write(&key, &value).unwrap();
    assert_eq!(db.read(&key).unwrap(), Some(value));
    assert!(db.exists(&key).unwrap());
    assert_eq!(db.len(), 1);
}

#[test]
fn absent_digest_reads_none() {
    let db = MemoryDB::new();
    let (key, _) = block(b"header nobody stored");

    assert_eq!(db.read(&key).unwrap(), None);
    assert!(!db.exists(&key).unwrap());
    assert!(db.is_empty());
}

#[test]
fn rewriting_a_block_is_idempotent() {
    let db = MemoryDB::new();
    let (key, value) = block(b"tipset metadata row");

    // content-addressed payloads arrive more than once during sync
    db.write(&key, &value).unwrap();
    db.write(&key, &value).unwrap();
    assert_eq!(db.len(), 1);
    assert_eq!(db.read(&key).unwrap(), Some(value));
}

#[test]
fn delete_leaves_other_blocks_alone() {
    let db = MemoryDB::new();
    let (stale_key, stale_value) = block(b"orphaned fork header");
    let (live_key, live_value) = block(b"canonical header");

    db.write(&stale_key, &stale_value).unwrap();
    db.write(&live_key, &live_value).unwrap();
    db.delete(&stale_key).unwrap();

    assert!(!db.exists(&stale_key).unwrap());
    assert_eq!(db.read(&live_key).unwrap(), Some(live_value));
    assert_eq!(db.len(), 1);
}

#[test]
fn clones_share_the_same_map() {
    let db = MemoryDB::new();
    let reopened = db.clone();
    let (key, value) = block(b"header written before reopen");

    db.write(&key, &value).unwrap();
    assert_eq!(reopened.read(&key).unwrap(), Some(value));
    assert_eq!(reopened.len(), db.len());
}

#[test]
fn bulk_write_lands_every_row() {
    let db = MemoryDB::new();
    let rows: Vec<(Vec<u8>, Vec<u8>)> = [
        b"header at height 1".as_ref(),
        b"header at height 2".as_ref(),
        b"header at height 3".as_ref(),
    ]
    .iter()
    .map(|payload| block(payload))
    .collect();

    db.bulk_write(rows.clone()).unwrap();
    assert_eq!(db.len(), rows.len());
    for (key, value) in rows {
        assert_eq!(db.read(&key).unwrap(), Some(value));
    }
}

#[test]
fn bulk_delete_removes_only_named_keys() {
    let db = MemoryDB::new();
    let (gone_a, value_a) = block(b"pruned header a");
    let (gone_b, value_b) = block(b"pruned header b");
    let (kept, kept_value) = block(b"retained header");

    db.bulk_write([
        (gone_a.clone(), value_a),
        (gone_b.clone(), value_b),
        (kept.clone(), kept_value.clone()),
    ])
    .unwrap();

    db.bulk_delete(&[&gone_a, &gone_b]).unwrap();
    assert!(!db.exists(&gone_a).unwrap());
    assert!(!db.exists(&gone_b).unwrap());
    assert_eq!(db.read(&kept).unwrap(), Some(kept_value));
}
