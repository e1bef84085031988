// =============================================================================
// Matrixon Streams - Redb Store
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
//   Durable store on redb, used when `database_path` is set. Each tree is a
//   `&[u8] -> &[u8]` table. Snapshots are redb read transactions, which are
//   isolated from later commits; every engine commit is one redb write
//   transaction.
//
// =============================================================================

use std::{ops::Bound, path::Path};

use ::redb::{
    AccessGuard, Database, ReadTransaction, ReadableDatabase, ReadableTable, StorageError, Table,
    TableDefinition, TableError, WriteTransaction,
};
use tracing::info;

use super::{range_is_valid, KeyValue, WriteSet};
use crate::{Error, Result};

const DATABASE_FILE: &str = "matrixon-streams.redb";

type TreeDefinition<'a> = TableDefinition<'a, &'static [u8], &'static [u8]>;

fn definition(tree: &str) -> TreeDefinition<'_> {
    TableDefinition::new(tree)
}

fn storage<E: Into<::redb::Error>>(e: E) -> Error {
    Error::Database(e.into().to_string())
}

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DATABASE_FILE);
        let db = Database::create(&path).map_err(storage)?;
        info!("✅ Opened redb database {}", path.display());
        Ok(Self { db })
    }

    /// A read transaction at the latest commit.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        self.db.begin_read().map_err(storage)
    }

    pub fn commit(&self, writes: WriteSet) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(storage)?;
        apply(&txn, writes)?;
        txn.commit().map_err(storage)
    }

    pub fn increment(&self, tree: &'static str, key: &[u8]) -> Result<u64> {
        let txn = self.db.begin_write().map_err(storage)?;
        let next = {
            let mut table = txn.open_table(definition(tree)).map_err(storage)?;
            let current = match table.get(key).map_err(storage)? {
                Some(bytes) => crate::utils::u64_from_bytes(bytes.value())?,
                None => 0,
            };
            let next = current + 1;
            table
                .insert(key, next.to_be_bytes().as_slice())
                .map_err(storage)?;
            next
        };
        txn.commit().map_err(storage)?;
        Ok(next)
    }

    pub fn insert_if_absent(&self, tree: &'static str, key: &[u8], writes: WriteSet) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_write().map_err(storage)?;
        let existing = txn
            .open_table(definition(tree))
            .map_err(storage)?
            .get(key)
            .map_err(storage)?
            .map(|v| v.value().to_vec());
        if existing.is_some() {
            txn.abort().map_err(storage)?;
            return Ok(existing);
        }
        apply(&txn, writes)?;
        txn.commit().map_err(storage)?;
        Ok(None)
    }
}

/// Writes a sorted write set, opening each table once.
fn apply(txn: &WriteTransaction, writes: WriteSet) -> Result<()> {
    let mut current: Option<(&'static str, Table<'_, &'static [u8], &'static [u8]>)> = None;
    for ((tree, key), value) in writes {
        if current.as_ref().map_or(true, |(name, _)| *name != tree) {
            drop(current.take());
            current = Some((tree, txn.open_table(definition(tree)).map_err(storage)?));
        }
        let Some((_, table)) = current.as_mut() else {
            continue;
        };
        match value {
            Some(value) => {
                table.insert(key.as_slice(), value.as_slice()).map_err(storage)?;
            }
            None => {
                table.remove(key.as_slice()).map_err(storage)?;
            }
        }
    }
    Ok(())
}

pub fn get(txn: &ReadTransaction, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
    let table = match txn.open_table(definition(tree)) {
        Ok(table) => table,
        // Nothing was ever written to the tree
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(storage(e)),
    };
    let value = table.get(key).map_err(storage)?.map(|v| v.value().to_vec());
    Ok(value)
}

pub fn scan(
    txn: &ReadTransaction,
    tree: &str,
    from: &Bound<Vec<u8>>,
    to: &Bound<Vec<u8>>,
    backwards: bool,
    limit: Option<usize>,
) -> Result<Vec<KeyValue>> {
    if !range_is_valid(from, to) {
        return Ok(Vec::new());
    }
    let table = match txn.open_table(definition(tree)) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
        Err(e) => return Err(storage(e)),
    };

    let bounds = (
        from.as_ref().map(|b| b.as_slice()),
        to.as_ref().map(|b| b.as_slice()),
    );
    let range = table.range::<&[u8]>(bounds).map_err(storage)?;
    let limit = limit.unwrap_or(usize::MAX);
    if backwards {
        collect_rows(range.rev(), limit)
    } else {
        collect_rows(range, limit)
    }
}

type Row<'a> = (AccessGuard<'a, &'static [u8]>, AccessGuard<'a, &'static [u8]>);

fn collect_rows<'a>(
    rows: impl Iterator<Item = std::result::Result<Row<'a>, StorageError>>,
    limit: usize,
) -> Result<Vec<KeyValue>> {
    rows.take(limit)
        .map(|row| {
            let (k, v) = row.map_err(storage)?;
            Ok((k.value().to_vec(), v.value().to_vec()))
        })
        .collect()
}
