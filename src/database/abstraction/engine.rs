// =============================================================================
// Matrixon Streams - Engine
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
//   The engine the services use: snapshots, read-committed transactions with
//   buffered writes and row locks, over either the volatile memory store or
//   the durable redb store.
//
// =============================================================================

use std::{
    collections::{BTreeMap, HashSet},
    ops::Bound,
    sync::Arc,
};

use ::redb::ReadTransaction;
use tracing::debug;

use super::{
    in_bounds,
    locks::{LockTable, RowLock},
    memory::MemoryStore,
    redb::{self as redb_store, RedbStore},
    ExtraWrites, KeyValue, KeyValueDatabaseEngine, ReadView, WriteSet,
};
use crate::{Config, Error, Result};

enum Store {
    Memory(MemoryStore),
    Redb(RedbStore),
}

pub struct Engine {
    store: Store,
    locks: LockTable,
}

impl Engine {
    /// An engine that keeps nothing on disk.
    pub fn volatile() -> Self {
        Self {
            store: Store::Memory(MemoryStore::default()),
            locks: LockTable::default(),
        }
    }

    /// Opens a repeatable-read view at the latest commit.
    ///
    /// A redb snapshot that cannot be opened fails every read made through
    /// it.
    pub fn snapshot(self: &Arc<Self>) -> Snapshot {
        let view = match &self.store {
            Store::Memory(store) => View::Memory(store.pin()),
            Store::Redb(store) => View::Redb(store.begin_read().map_err(|e| e.to_string())),
        };
        Snapshot {
            engine: Arc::clone(self),
            view,
        }
    }

    /// Starts a read-committed transaction.
    pub fn begin(self: &Arc<Self>) -> Transaction {
        Transaction {
            engine: Arc::clone(self),
            writes: WriteSet::new(),
            locks: Vec::new(),
            locked: HashSet::new(),
            finished: false,
        }
    }

    /// Reads the latest committed value, outside of any transaction.
    pub fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.store {
            Store::Memory(store) => Ok(store.get(tree, key, None)),
            Store::Redb(store) => redb_store::get(&store.begin_read()?, tree, key),
        }
    }

    fn scan_latest(
        &self,
        tree: &str,
        from: &Bound<Vec<u8>>,
        to: &Bound<Vec<u8>>,
        backwards: bool,
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        match &self.store {
            Store::Memory(store) => Ok(store.scan(tree, from, to, backwards, limit, None)),
            Store::Redb(store) => redb_store::scan(&store.begin_read()?, tree, from, to, backwards, limit),
        }
    }

    fn commit(&self, writes: WriteSet) -> Result<()> {
        match &self.store {
            Store::Memory(store) => store.commit(writes),
            Store::Redb(store) => store.commit(writes),
        }
    }
}

impl KeyValueDatabaseEngine for Engine {
    fn open(config: &Config) -> Result<Self> {
        let store = match &config.database_path {
            Some(path) => Store::Redb(RedbStore::open(path)?),
            None => Store::Memory(MemoryStore::default()),
        };
        Ok(Self {
            store,
            locks: LockTable::default(),
        })
    }

    /// Redb commits are durable when they return; nothing is buffered.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn memory_usage(&self) -> Result<String> {
        match &self.store {
            Store::Memory(store) => Ok(store.memory_usage()),
            Store::Redb(_) => Ok(format!("row locks: {}\n", self.locks.len())),
        }
    }

    fn increment(&self, tree: &'static str, key: &[u8]) -> Result<u64> {
        match &self.store {
            Store::Memory(store) => store.increment(tree, key),
            Store::Redb(store) => store.increment(tree, key),
        }
    }

    fn insert_if_absent(
        &self,
        tree: &'static str,
        key: &[u8],
        value: &[u8],
        extra: ExtraWrites,
    ) -> Result<Option<Vec<u8>>> {
        let mut writes = WriteSet::new();
        writes.insert((tree, key.to_vec()), Some(value.to_vec()));
        for (t, k, v) in extra {
            writes.insert((t, k), Some(v));
        }
        match &self.store {
            Store::Memory(store) => store.insert_if_absent(tree, key, writes),
            Store::Redb(store) => store.insert_if_absent(tree, key, writes),
        }
    }
}

enum View {
    /// Pinned commit sequence of the memory store
    Memory(u64),
    Redb(std::result::Result<ReadTransaction, String>),
}

/// Repeatable-read view of the database at one commit.
pub struct Snapshot {
    engine: Arc<Engine>,
    view: View,
}

impl Snapshot {
    fn redb(txn: &std::result::Result<ReadTransaction, String>) -> Result<&ReadTransaction> {
        txn.as_ref().map_err(|e| Error::Database(e.clone()))
    }
}

impl ReadView for Snapshot {
    fn get(&self, tree: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match (&self.engine.store, &self.view) {
            (Store::Memory(store), View::Memory(seq)) => Ok(store.get(tree, key, Some(*seq))),
            (_, View::Redb(txn)) => redb_store::get(Self::redb(txn)?, tree, key),
            _ => Err(Error::bad_database("Snapshot does not belong to this engine.")),
        }
    }

    fn scan(
        &self,
        tree: &'static str,
        from: Bound<Vec<u8>>,
        to: Bound<Vec<u8>>,
        backwards: bool,
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        match (&self.engine.store, &self.view) {
            (Store::Memory(store), View::Memory(seq)) => {
                Ok(store.scan(tree, &from, &to, backwards, limit, Some(*seq)))
            }
            (_, View::Redb(txn)) => redb_store::scan(Self::redb(txn)?, tree, &from, &to, backwards, limit),
            _ => Err(Error::bad_database("Snapshot does not belong to this engine.")),
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if let (Store::Memory(store), View::Memory(seq)) = (&self.engine.store, &self.view) {
            store.unpin(*seq);
        }
    }
}

/// Read-committed transaction with buffered writes.
///
/// Nothing is visible to other readers until [`Transaction::commit`].
/// Dropping an uncommitted transaction rolls it back. Row locks taken with
/// [`Transaction::lock_row`] are held until then.
pub struct Transaction {
    engine: Arc<Engine>,
    writes: WriteSet,
    locks: Vec<RowLock>,
    locked: HashSet<(&'static str, Vec<u8>)>,
    finished: bool,
}

impl Transaction {
    /// Locks a row for the rest of the transaction. Re-locking a row this
    /// transaction already holds is a no-op.
    pub async fn lock_row(&mut self, tree: &'static str, key: &[u8]) {
        if self.locked.contains(&(tree, key.to_vec())) {
            return;
        }
        let lock = self.engine.locks.lock(tree, key).await;
        self.locks.push(lock);
        self.locked.insert((tree, key.to_vec()));
    }

    pub fn insert(&mut self, tree: &'static str, key: &[u8], value: &[u8]) {
        self.writes.insert((tree, key.to_vec()), Some(value.to_vec()));
    }

    pub fn remove(&mut self, tree: &'static str, key: &[u8]) {
        self.writes.insert((tree, key.to_vec()), None);
    }

    /// Whether the transaction has buffered any writes.
    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    pub fn commit(mut self) -> Result<()> {
        let writes = std::mem::take(&mut self.writes);
        let count = writes.len();
        self.engine.commit(writes)?;
        self.finished = true;
        debug!("Committed transaction with {} writes", count);
        Ok(())
    }

    pub fn rollback(mut self) {
        self.writes.clear();
        self.finished = true;
    }
}

impl ReadView for Transaction {
    fn get(&self, tree: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.writes.get(&(tree, key.to_vec())) {
            return Ok(value.clone());
        }
        self.engine.get(tree, key)
    }

    fn scan(
        &self,
        tree: &'static str,
        from: Bound<Vec<u8>>,
        to: Bound<Vec<u8>>,
        backwards: bool,
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        let pending: Vec<_> = self
            .writes
            .iter()
            .filter(|((t, k), _)| *t == tree && in_bounds(k, &from, &to))
            .collect();

        if pending.is_empty() {
            return self.engine.scan_latest(tree, &from, &to, backwards, limit);
        }

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .engine
            .scan_latest(tree, &from, &to, false, None)?
            .into_iter()
            .collect();
        for ((_, key), value) in pending {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }

        let limit = limit.unwrap_or(usize::MAX);
        Ok(if backwards {
            merged.into_iter().rev().take(limit).collect()
        } else {
            merged.into_iter().take(limit).collect()
        })
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            debug!("Rolling back transaction with {} pending writes", self.writes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volatile() -> Arc<Engine> {
        Arc::new(Engine::volatile())
    }

    fn durable(dir: &tempfile::TempDir) -> Arc<Engine> {
        let config = Config {
            database_path: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        Arc::new(Engine::open(&config).unwrap())
    }

    fn check_snapshot_is_repeatable(engine: &Arc<Engine>) {
        let mut txn = engine.begin();
        txn.insert("t", b"a", b"1");
        txn.commit().unwrap();

        let snapshot = engine.snapshot();

        let mut txn = engine.begin();
        txn.insert("t", b"a", b"2");
        txn.insert("t", b"b", b"3");
        txn.commit().unwrap();

        assert_eq!(snapshot.get("t", b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(snapshot.scan_prefix("t", b"", false).unwrap().len(), 1);
        assert_eq!(engine.snapshot().get("t", b"a").unwrap(), Some(b"2".to_vec()));
    }

    fn check_scan_merges_pending_writes(engine: &Arc<Engine>) {
        let mut txn = engine.begin();
        txn.insert("t", b"a", b"1");
        txn.insert("t", b"c", b"3");
        txn.commit().unwrap();

        let mut txn = engine.begin();
        txn.insert("t", b"b", b"2");
        txn.remove("t", b"c");
        let keys: Vec<_> = txn
            .scan_prefix("t", b"", true)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec()]);
        drop(txn);
        assert!(engine.snapshot().get("t", b"b").unwrap().is_none());
    }

    fn check_increment_and_insert_if_absent(engine: &Arc<Engine>) {
        assert_eq!(engine.increment("c", b"n").unwrap(), 1);
        assert_eq!(engine.increment("c", b"n").unwrap(), 2);

        let extra = vec![("r", b"2".to_vec(), b"x".to_vec())];
        assert_eq!(engine.insert_if_absent("f", b"x", b"2", extra).unwrap(), None);
        let extra = vec![("r", b"3".to_vec(), b"y".to_vec())];
        assert_eq!(
            engine.insert_if_absent("f", b"x", b"3", extra).unwrap(),
            Some(b"2".to_vec())
        );
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.get("r", b"2").unwrap(), Some(b"x".to_vec()));
        assert_eq!(snapshot.get("r", b"3").unwrap(), None);
    }

    #[test]
    fn test_snapshot_is_repeatable() {
        check_snapshot_is_repeatable(&volatile());
        let dir = tempfile::tempdir().unwrap();
        check_snapshot_is_repeatable(&durable(&dir));
    }

    #[test]
    fn test_transaction_scan_merges_pending_writes() {
        check_scan_merges_pending_writes(&volatile());
        let dir = tempfile::tempdir().unwrap();
        check_scan_merges_pending_writes(&durable(&dir));
    }

    #[test]
    fn test_increment_and_insert_if_absent() {
        check_increment_and_insert_if_absent(&volatile());
        let dir = tempfile::tempdir().unwrap();
        check_increment_and_insert_if_absent(&durable(&dir));
    }

    #[test]
    fn test_unknown_tree_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let engine = durable(&dir);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.get("never", b"a").unwrap(), None);
        assert!(snapshot.scan_prefix("never", b"", false).unwrap().is_empty());
        assert_eq!(engine.begin().get("never", b"a").unwrap(), None);
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let engine = volatile();
        let mut txn = engine.begin();
        txn.insert("t", b"a", b"1");
        assert_eq!(txn.get("t", b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(engine.snapshot().get("t", b"a").unwrap(), None);

        drop(txn);
        assert_eq!(engine.snapshot().get("t", b"a").unwrap(), None);
        let Store::Memory(store) = &engine.store else {
            unreachable!()
        };
        assert_eq!(store.sequence(), 0);
    }

    #[test]
    fn test_versions_are_pruned_without_snapshots() {
        let engine = volatile();
        for i in 0..5u8 {
            let mut txn = engine.begin();
            txn.insert("t", b"k", &[i]);
            txn.commit().unwrap();
        }
        let usage = engine.memory_usage().unwrap();
        assert!(usage.contains("t: 1 rows, 1 versions"), "{usage}");

        let mut txn = engine.begin();
        txn.remove("t", b"k");
        txn.commit().unwrap();
        assert!(engine.snapshot().scan_prefix("t", b"", false).unwrap().is_empty());
        let Store::Memory(store) = &engine.store else {
            unreachable!()
        };
        assert_eq!(store.open_snapshots(), 0);
    }

    #[tokio::test]
    async fn test_row_lock_is_released_on_commit() {
        let engine = volatile();
        let mut first = engine.begin();
        first.lock_row("streamid", b"events").await;
        first.lock_row("streamid", b"events").await;

        let blocked = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let mut second = engine.begin();
                second.lock_row("streamid", b"events").await;
                second.get("streamid", b"events").unwrap()
            })
        };

        first.insert("streamid", b"events", &1u64.to_be_bytes());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());
        first.commit().unwrap();

        assert_eq!(blocked.await.unwrap(), Some(1u64.to_be_bytes().to_vec()));
    }

    #[test]
    fn test_redb_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = durable(&dir);
            let mut txn = engine.begin();
            txn.insert("t", b"a", b"1");
            txn.insert("t", b"b", b"2");
            txn.commit().unwrap();
            let mut txn = engine.begin();
            txn.remove("t", b"b");
            txn.commit().unwrap();
            assert_eq!(engine.increment("c", b"n").unwrap(), 1);
            engine.flush().unwrap();
        }

        let engine = durable(&dir);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.get("t", b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(snapshot.get("t", b"b").unwrap(), None);
        assert_eq!(engine.increment("c", b"n").unwrap(), 2);
    }
}
