// Copyright 2019-2023 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{Error, Store};
use ahash::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// In-memory KV store backing blocks and index rows in tests and ephemeral
/// nodes. Clones are cheap handles onto the same map, so a database can be
/// reopened over a store that is still held elsewhere.
#[derive(Debug, Default, Clone)]
pub struct MemoryDB {
    db: Arc<RwLock<HashMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryDB {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }
}

impl Store for MemoryDB {
    fn read<K>(&self, key: K) -> Result<Option<Vec<u8>>, Error>
    where
        K: AsRef<[u8]>,
    {
        let db = self.db.read();
        Ok(db.get(key.as_ref()).map(|value| value.to_vec()))
    }

    fn write<K, V>(&self, key: K, value: V) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut db = self.db.write();
        db.insert(key.as_ref().to_vec(), value.as_ref().to_vec());
        Ok(())
    }

    fn delete<K>(&self, key: K) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        let mut db = self.db.write();
        db.remove(key.as_ref());
        Ok(())
    }

    fn exists<K>(&self, key: K) -> Result<bool, Error>
    where
        K: AsRef<[u8]>,
    {
        let db = self.db.read();
        Ok(db.contains_key(key.as_ref()))
    }

    fn bulk_write(
        &self,
        values: impl IntoIterator<Item = (impl Into<Vec<u8>>, impl Into<Vec<u8>>)>,
    ) -> Result<(), Error> {
        // the whole batch lands under one lock, readers never see it half-applied
        let mut db = self.db.write();
        for (key, value) in values {
            db.insert(key.into(), value.into());
        }
        Ok(())
    }

    fn bulk_delete<K>(&self, keys: &[K]) -> Result<(), Error>
    where
        K: AsRef<[u8]>,
    {
        let mut db = self.db.write();
        for key in keys {
            db.remove(key.as_ref());
        }
        Ok(())
    }
}
