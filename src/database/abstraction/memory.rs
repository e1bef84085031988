// =============================================================================
// Matrixon Streams - Memory Store
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
//   Volatile ordered key/value store with multi-version rows, used when no
//   `database_path` is configured.
//
//   Every commit gets a sequence number. A snapshot pins the sequence it
//   was opened at and keeps seeing exactly the rows committed up to it, so a
//   sync response built from one snapshot never observes half of a commit.
//
// =============================================================================

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard},
};

use super::{range_is_valid, KeyValue, WriteSet};
use crate::Result;

struct Version {
    seq: u64,
    value: Option<Vec<u8>>,
}

type Tree = BTreeMap<Vec<u8>, Vec<Version>>;

#[derive(Default)]
struct Inner {
    seq: u64,
    trees: HashMap<&'static str, Tree>,
}

impl Inner {
    fn visible(versions: &[Version], seq: u64) -> Option<&Vec<u8>> {
        versions
            .iter()
            .rev()
            .find(|v| v.seq <= seq)
            .and_then(|v| v.value.as_ref())
    }

    fn get(&self, tree: &str, key: &[u8], seq: u64) -> Option<Vec<u8>> {
        self.trees
            .get(tree)
            .and_then(|t| t.get(key))
            .and_then(|versions| Self::visible(versions, seq))
            .cloned()
    }

    fn scan(
        &self,
        tree: &str,
        from: &Bound<Vec<u8>>,
        to: &Bound<Vec<u8>>,
        backwards: bool,
        limit: Option<usize>,
        seq: u64,
    ) -> Vec<KeyValue> {
        let Some(t) = self.trees.get(tree) else {
            return Vec::new();
        };
        if !range_is_valid(from, to) {
            return Vec::new();
        }

        let range = t.range::<Vec<u8>, _>((from.as_ref(), to.as_ref()));
        let visible = |(k, versions): (&Vec<u8>, &Vec<Version>)| {
            Self::visible(versions, seq).map(|v| (k.clone(), v.clone()))
        };
        let limit = limit.unwrap_or(usize::MAX);
        if backwards {
            range.rev().filter_map(visible).take(limit).collect()
        } else {
            range.filter_map(visible).take(limit).collect()
        }
    }

    /// Appends a version for every write and drops versions no pinned
    /// snapshot can see anymore.
    fn apply(&mut self, seq: u64, writes: WriteSet, horizon: u64) {
        for ((tree, key), value) in writes {
            let t = self.trees.entry(tree).or_default();
            let versions = t.entry(key.clone()).or_default();
            versions.push(Version { seq, value });

            // Keep the newest version at or below the horizon and all later ones
            if let Some(keep_from) = versions.iter().rposition(|v| v.seq <= horizon) {
                versions.drain(..keep_from);
            }
            if versions.len() == 1 && versions[0].value.is_none() && versions[0].seq <= horizon {
                t.remove(&key);
            }
        }
        self.seq = seq;
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    /// Pinned snapshot sequence numbers and how many snapshots pin each.
    pins: Mutex<BTreeMap<u64, usize>>,
}

impl MemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn pins(&self) -> MutexGuard<'_, BTreeMap<u64, usize>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pins the latest commit for a snapshot and returns its sequence.
    pub fn pin(&self) -> u64 {
        let inner = self.read();
        let seq = inner.seq;
        *self.pins().entry(seq).or_default() += 1;
        seq
    }

    pub fn unpin(&self, seq: u64) {
        let mut pins = self.pins();
        if let Some(count) = pins.get_mut(&seq) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&seq);
            }
        }
    }

    /// Reads at `seq`, or at the latest commit when `seq` is `None`.
    pub fn get(&self, tree: &str, key: &[u8], seq: Option<u64>) -> Option<Vec<u8>> {
        let inner = self.read();
        let seq = seq.unwrap_or(inner.seq);
        inner.get(tree, key, seq)
    }

    pub fn scan(
        &self,
        tree: &str,
        from: &Bound<Vec<u8>>,
        to: &Bound<Vec<u8>>,
        backwards: bool,
        limit: Option<usize>,
        seq: Option<u64>,
    ) -> Vec<KeyValue> {
        let inner = self.read();
        let seq = seq.unwrap_or(inner.seq);
        inner.scan(tree, from, to, backwards, limit, seq)
    }

    /// Latest committed sequence number.
    pub fn sequence(&self) -> u64 {
        self.read().seq
    }

    /// Number of snapshots currently open.
    pub fn open_snapshots(&self) -> usize {
        self.pins().values().sum()
    }

    /// Applies a write set as one commit. The closure sees the latest
    /// committed state under the write lock, so read-modify-write is atomic.
    fn commit_with<T>(&self, build: impl FnOnce(&Inner) -> Result<(T, WriteSet)>) -> Result<T> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let (result, writes) = build(&inner)?;
        if writes.is_empty() {
            return Ok(result);
        }

        let seq = inner.seq + 1;
        // Versions at or below the oldest pin stay visible to that snapshot
        let horizon = self.pins().keys().next().copied().unwrap_or(seq);
        inner.apply(seq, writes, horizon);
        Ok(result)
    }

    pub fn commit(&self, writes: WriteSet) -> Result<()> {
        self.commit_with(|_| Ok(((), writes)))
    }

    pub fn increment(&self, tree: &'static str, key: &[u8]) -> Result<u64> {
        self.commit_with(|inner| {
            let current = inner
                .get(tree, key, inner.seq)
                .map(|bytes| crate::utils::u64_from_bytes(&bytes))
                .transpose()?
                .unwrap_or(0);
            let next = current + 1;
            let mut writes = WriteSet::new();
            writes.insert((tree, key.to_vec()), Some(next.to_be_bytes().to_vec()));
            Ok((next, writes))
        })
    }

    pub fn insert_if_absent(&self, tree: &'static str, key: &[u8], writes: WriteSet) -> Result<Option<Vec<u8>>> {
        self.commit_with(|inner| match inner.get(tree, key, inner.seq) {
            Some(existing) => Ok((Some(existing), WriteSet::new())),
            None => Ok((None, writes)),
        })
    }

    pub fn memory_usage(&self) -> String {
        let inner = self.read();
        let mut out = String::new();
        let mut names: Vec<&&str> = inner.trees.keys().collect();
        names.sort();
        for name in names {
            let tree = &inner.trees[*name];
            let versions: usize = tree.values().map(Vec::len).sum();
            out.push_str(&format!("{name}: {} rows, {versions} versions\n", tree.len()));
        }
        out.push_str(&format!("open snapshots: {}\n", self.open_snapshots()));
        out
    }
}
