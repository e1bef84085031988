// =============================================================================
// Matrixon Streams - Abstraction Module
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.12.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Storage engine seam. Services never talk to an engine directly: they read
//   through a `ReadView` (a repeatable-read snapshot or a read-committed
//   transaction) and write through a `Transaction`. Without a
//   `database_path` the engine runs on the volatile memory store, with one
//   it runs on redb.
//
// =============================================================================

use std::{collections::BTreeMap, ops::Bound};

use crate::{Config, Result};

pub mod engine;
pub mod locks;
pub mod memory;
pub mod redb;

pub use engine::{Engine, Snapshot, Transaction};

/// A key/value pair as stored in a tree
pub type KeyValue = (Vec<u8>, Vec<u8>);

/// Extra rows written together with a content-addressed insert
pub type ExtraWrites = Vec<(&'static str, Vec<u8>, Vec<u8>)>;

/// Buffered writes of one commit; `None` removes the row
pub(crate) type WriteSet = BTreeMap<(&'static str, Vec<u8>), Option<Vec<u8>>>;

pub trait KeyValueDatabaseEngine: Send + Sync {
    /// Opens the engine described by the configuration
    ///
    /// # Errors
    ///
    /// Returns a `Database` or `Io` error if the database cannot be opened.
    fn open(config: &Config) -> Result<Self>
    where
        Self: Sized;

    /// Flushes all pending changes to disk
    ///
    /// # Errors
    ///
    /// Returns an `Io` error if the flush operation fails.
    fn flush(&self) -> Result<()>;

    /// Returns memory usage statistics for the database
    fn memory_usage(&self) -> Result<String> {
        Ok("Current database engine does not support memory usage reporting.".to_owned())
    }

    /// Atomically increments the big-endian counter at `key` and commits.
    ///
    /// Used for identifiers whose allocation must never be undone, even if
    /// the transaction that asked for them rolls back.
    fn increment(&self, tree: &'static str, key: &[u8]) -> Result<u64>;

    /// Inserts `value` at `key` unless the key already exists, and commits.
    ///
    /// Returns the existing value if there was one, in which case nothing is
    /// written. Otherwise `extra` is written atomically with the new row.
    fn insert_if_absent(
        &self,
        tree: &'static str,
        key: &[u8],
        value: &[u8],
        extra: ExtraWrites,
    ) -> Result<Option<Vec<u8>>>;
}

/// Read access to the trees, either at a fixed point in time or through a
/// transaction.
pub trait ReadView: Send + Sync {
    /// Retrieves a value from the database
    fn get(&self, tree: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Returns the rows with keys inside the bounds, in key order or reverse
    /// key order, stopping after `limit` rows.
    fn scan(
        &self,
        tree: &'static str,
        from: Bound<Vec<u8>>,
        to: Bound<Vec<u8>>,
        backwards: bool,
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>>;

    /// Returns all rows whose key starts with `prefix`.
    fn scan_prefix(
        &self,
        tree: &'static str,
        prefix: &[u8],
        backwards: bool,
    ) -> Result<Vec<KeyValue>> {
        let (from, to) = prefix_bounds(prefix);
        self.scan(tree, from, to, backwards, None)
    }

    fn contains(&self, tree: &'static str, key: &[u8]) -> Result<bool> {
        Ok(self.get(tree, key)?.is_some())
    }
}

/// The key range covering every key that starts with `prefix`.
pub fn prefix_bounds(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return (Bound::Included(prefix.to_vec()), Bound::Excluded(upper));
        }
    }
    (Bound::Included(prefix.to_vec()), Bound::Unbounded)
}

pub(crate) fn range_is_valid(from: &Bound<Vec<u8>>, to: &Bound<Vec<u8>>) -> bool {
    match (from, to) {
        (Bound::Included(a), Bound::Included(b)) => a <= b,
        (Bound::Included(a), Bound::Excluded(b))
        | (Bound::Excluded(a), Bound::Included(b))
        | (Bound::Excluded(a), Bound::Excluded(b)) => a < b,
        _ => true,
    }
}

pub(crate) fn in_bounds(key: &[u8], from: &Bound<Vec<u8>>, to: &Bound<Vec<u8>>) -> bool {
    let lower = match from {
        Bound::Included(b) => key >= b.as_slice(),
        Bound::Excluded(b) => key > b.as_slice(),
        Bound::Unbounded => true,
    };
    let upper = match to {
        Bound::Included(b) => key <= b.as_slice(),
        Bound::Excluded(b) => key < b.as_slice(),
        Bound::Unbounded => true,
    };
    lower && upper
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_bounds() {
        let (from, to) = prefix_bounds(b"ab");
        assert_eq!(from, Bound::Included(b"ab".to_vec()));
        assert_eq!(to, Bound::Excluded(b"ac".to_vec()));

        let (_, to) = prefix_bounds(&[1, 0xff]);
        assert_eq!(to, Bound::Excluded(vec![2]));

        let (_, to) = prefix_bounds(&[0xff, 0xff]);
        assert_eq!(to, Bound::Unbounded);
    }

    #[test]
    fn test_in_bounds() {
        let (from, to) = prefix_bounds(&[7, 0xff]);
        assert!(in_bounds(&[7, 0xff, 1, 2], &from, &to));
        assert!(!in_bounds(&[7, 0xfe], &from, &to));
        assert!(!in_bounds(&[8], &from, &to));
    }
}
