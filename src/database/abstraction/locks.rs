// =============================================================================
// Matrixon Streams - Row Locks
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
//   Per-row async mutexes. A transaction that locks a row holds it until it
//   commits or rolls back, giving `SELECT ... FOR UPDATE` semantics.
//
// =============================================================================

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<Vec<u8>, Arc<AsyncMutex<()>>>;

#[derive(Default)]
pub struct LockTable {
    rows: Arc<Mutex<LockMap>>,
}

/// A held row lock. Dropping it releases the row.
pub struct RowLock {
    guard: Option<OwnedMutexGuard<()>>,
    rows: Arc<Mutex<LockMap>>,
    key: Vec<u8>,
}

impl LockTable {
    pub async fn lock(&self, tree: &str, key: &[u8]) -> RowLock {
        let mut full_key = tree.as_bytes().to_vec();
        full_key.push(0xff);
        full_key.extend_from_slice(key);

        let mutex = {
            let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(rows.entry(full_key.clone()).or_default())
        };

        RowLock {
            guard: Some(mutex.lock_owned().await),
            rows: Arc::clone(&self.rows),
            key: full_key,
        }
    }

    /// Number of rows with an entry in the table, held or awaited.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for RowLock {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table still refers to the mutex: nobody holds or waits
        if rows
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            rows.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_lock_serializes_same_row() {
        let table = Arc::new(LockTable::default());
        let first = table.lock("rooms", b"!a").await;

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                let _second = table.lock("rooms", b"!a").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_different_rows_do_not_block() {
        let table = LockTable::default();
        let _a = table.lock("rooms", b"!a").await;
        let _b = table.lock("rooms", b"!b").await;
        let _c = table.lock("streamid", b"!a").await;
        assert_eq!(table.len(), 3);
    }
}
