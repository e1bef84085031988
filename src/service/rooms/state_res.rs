// =============================================================================
// Matrixon Streams - Fork State Merge
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
//   Merges the states at the tips of a forked room DAG. This is not the full
//   authorization-aware resolution algorithm: tuples all forks agree on are
//   kept, and a conflicted tuple goes to the event with the greatest depth,
//   then the greatest event ID.
//
// =============================================================================

use std::collections::{BTreeMap, BTreeSet};

use matrixon_core::types::{EventNid, StateEntry, StateKeyTuple};
use ruma::OwnedEventId;
use tracing::debug;

use crate::Result;

/// Merges several states into one. `rank` yields the depth and event ID of
/// a conflicted candidate.
pub fn resolve<F>(states: &[Vec<StateEntry>], mut rank: F) -> Result<Vec<StateEntry>>
where
    F: FnMut(EventNid) -> Result<(u64, OwnedEventId)>,
{
    let mut candidates: BTreeMap<StateKeyTuple, BTreeSet<EventNid>> = BTreeMap::new();
    for state in states {
        for entry in state {
            candidates.entry(entry.key).or_default().insert(entry.event_nid);
        }
    }

    let mut resolved = Vec::with_capacity(candidates.len());
    let mut conflicts = 0usize;
    for (key, event_nids) in candidates {
        let mut event_nids = event_nids.into_iter();
        let Some(first) = event_nids.next() else {
            continue;
        };
        let rest: Vec<_> = event_nids.collect();
        if rest.is_empty() {
            resolved.push(StateEntry::new(key, first));
            continue;
        }

        conflicts += 1;
        let mut winner = (rank(first)?, first);
        for event_nid in rest {
            let candidate = rank(event_nid)?;
            if candidate > winner.0 {
                winner = (candidate, event_nid);
            }
        }
        resolved.push(StateEntry::new(key, winner.1));
    }

    debug!(
        "Merged {} states into {} entries ({} conflicts)",
        states.len(),
        resolved.len(),
        conflicts
    );
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use matrixon_core::types::{EventStateKeyNid, EventTypeNid};
    use ruma::EventId;

    use super::*;

    fn entry(state_key: u64, event: u64) -> StateEntry {
        StateEntry::new(
            StateKeyTuple::new(EventTypeNid(1), EventStateKeyNid(state_key)),
            EventNid(event),
        )
    }

    fn rank(event_nid: EventNid) -> Result<(u64, OwnedEventId)> {
        // Events 10 and 11 share a depth; 12 is deeper
        let depth = if event_nid.get() == 12 { 5 } else { 3 };
        Ok((depth, EventId::parse(format!("$e{}", event_nid.get())).unwrap()))
    }

    #[test]
    fn test_unconflicted_entries_are_kept() {
        let merged = resolve(&[vec![entry(1, 10)], vec![entry(1, 10), entry(2, 20)]], rank).unwrap();
        assert_eq!(merged, vec![entry(1, 10), entry(2, 20)]);
    }

    #[test]
    fn test_deeper_event_wins() {
        let merged = resolve(&[vec![entry(1, 12)], vec![entry(1, 10)]], rank).unwrap();
        assert_eq!(merged, vec![entry(1, 12)]);
    }

    #[test]
    fn test_equal_depth_breaks_ties_by_event_id() {
        let a = resolve(&[vec![entry(1, 10)], vec![entry(1, 11)]], rank).unwrap();
        let b = resolve(&[vec![entry(1, 11)], vec![entry(1, 10)]], rank).unwrap();
        assert_eq!(a, vec![entry(1, 11)]);
        assert_eq!(a, b);
    }
}
