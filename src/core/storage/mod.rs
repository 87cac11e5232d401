// src/core/storage/mod.rs

//! The on-disk keyspace.
//!
//! A thin handle over an embedded log-structured store (`sled`). Keys are
//! scoped by namespace so clients authenticated into different namespaces
//! never observe each other's data.

use crate::core::StrataError;
use bytes::Bytes;

/// Separates the namespace prefix from the user key. 0x1F (unit separator)
/// cannot appear in a namespace name, which keeps prefixes unambiguous.
const NAMESPACE_SEP: u8 = 0x1f;

/// Shared, thread-safe handle to the server's keyspace.
#[derive(Debug, Clone)]
pub struct Storage {
    db: sled::Db,
}

impl Storage {
    /// Opens (creating if necessary) the database under `dir`.
    pub fn open(dir: &str) -> Result<Self, StrataError> {
        let db = sled::Config::new().path(dir).open()?;
        Ok(Self { db })
    }

    fn scoped_key(namespace: &str, key: &[u8]) -> Vec<u8> {
        let mut scoped = Vec::with_capacity(namespace.len() + 1 + key.len());
        scoped.extend_from_slice(namespace.as_bytes());
        scoped.push(NAMESPACE_SEP);
        scoped.extend_from_slice(key);
        scoped
    }

    pub fn set(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<(), StrataError> {
        self.db.insert(Self::scoped_key(namespace, key), value)?;
        Ok(())
    }

    pub fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Bytes>, StrataError> {
        let value = self.db.get(Self::scoped_key(namespace, key))?;
        Ok(value.map(|v| Bytes::copy_from_slice(&v)))
    }

    /// Removes each named key, returning how many actually existed.
    pub fn del(&self, namespace: &str, keys: &[Bytes]) -> Result<i64, StrataError> {
        let mut removed = 0;
        for key in keys {
            if self.db.remove(Self::scoped_key(namespace, key))?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Counts how many of the named keys exist; duplicates count twice.
    pub fn exists(&self, namespace: &str, keys: &[Bytes]) -> Result<i64, StrataError> {
        let mut found = 0;
        for key in keys {
            if self.db.contains_key(Self::scoped_key(namespace, key))? {
                found += 1;
            }
        }
        Ok(found)
    }

    /// Forces buffered writes to disk; called once during shutdown.
    pub fn flush(&self) -> Result<(), StrataError> {
        self.db.flush()?;
        Ok(())
    }
}
