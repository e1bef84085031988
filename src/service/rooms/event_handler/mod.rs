// =============================================================================
// Matrixon Streams - Event Handler
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
//   The accept path. An event that passed authorization upstream is stored,
//   its state computed, the room frontier moved and the event published on
//   the PDU stream, all inside one room updater transaction. The notifier is
//   only told once that transaction committed.
//
// =============================================================================

use std::collections::{BTreeSet, HashSet};

use matrixon_core::types::{EventNid, Membership, RoomNid, StateSnapshotNid, StreamKind, StreamPosition};
use ruma::{EventId, OwnedEventId, OwnedUserId, UserId};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    pdu_metadata::RelationRecord,
    state_cache::{InviteRecord, MembershipRecord},
    state_res,
    timeline::StoredEvent,
    updater::RoomUpdater,
};
use crate::{
    database::abstraction::{ReadView, Transaction},
    service::{pdu::PduEvent, Services},
    Error, Result,
};

/// What accepting an event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Stored and published at this PDU stream position.
    Accepted(StreamPosition),
    /// Stored with the rejected marker. Nothing else moved.
    Rejected,
    /// The event was already stored. Nothing changed.
    Duplicate,
}

/// Stream positions to hand to the notifier after commit.
#[derive(Default)]
struct Published {
    pdu: StreamPosition,
    /// Users whose membership changed.
    members: Vec<OwnedUserId>,
    invite: Option<(OwnedUserId, StreamPosition)>,
    relation: Option<StreamPosition>,
}

pub struct Service;

impl Service {
    /// Accepts an event in room arrival order.
    ///
    /// `latest_event_ids` is the frontier upstream computed for the room
    /// after this event. It is only compared with ours.
    #[tracing::instrument(skip(self, services, pdu, latest_event_ids), fields(event_id = %pdu.event_id, room_id = %pdu.room_id))]
    pub async fn handle_accepted_event(
        &self,
        services: &Services,
        pdu: PduEvent,
        rejected: bool,
        latest_event_ids: Option<&[OwnedEventId]>,
    ) -> Result<Outcome> {
        let rooms = &services.rooms;
        let room_nid = rooms.short.get_or_create_room_nid(&pdu.room_id)?;
        let mut updater = RoomUpdater::begin(rooms, services.begin(), &pdu.room_id, room_nid).await?;

        if let Some(event_nid) = rooms.short.event_nid(&pdu.event_id)? {
            if rooms.timeline.get(updater.view(), event_nid)?.is_some() {
                debug!("Event {} is already stored", pdu.event_id);
                metrics::counter!("matrixon_events_duplicate_total").increment(1);
                updater.rollback();
                return Ok(Outcome::Duplicate);
            }
        }

        if is_create_event(&pdu) {
            if updater.room_exists() {
                return Err(Error::BadRequest(format!(
                    "room {} already has a create event",
                    pdu.room_id
                )));
            }
            let room_version = pdu
                .content
                .get("room_version")
                .and_then(Value::as_str)
                .unwrap_or("1");
            updater.set_room_version(room_version);
        } else if !updater.room_exists() {
            return Err(super::Service::room_not_found(&pdu.room_id));
        } else if pdu.prev_events.is_empty() {
            return Err(Error::BadRequest(format!(
                "event {} has no prev events",
                pdu.event_id
            )));
        }

        let state_before = self.state_before(services, &updater, &pdu)?;

        let event_nid = rooms.short.get_or_create_event_nid(&pdu.event_id)?;
        let (event_type_nid, state_key_nid) = match &pdu.state_key {
            Some(state_key) => {
                let tuple = rooms.short.get_or_create_state_key_tuple(&pdu.kind, state_key)?;
                (tuple.event_type_nid, Some(tuple.event_state_key_nid))
            }
            None => (rooms.short.get_or_create_event_type_nid(&pdu.kind)?, None),
        };
        let stored = StoredEvent {
            event_nid,
            room_nid,
            event_type_nid,
            state_key_nid,
            state_snapshot_nid: state_before,
            rejected,
            pdu,
        };
        rooms.timeline.insert_event(updater.txn_mut()?, &stored)?;

        if rejected {
            updater.commit()?;
            info!("🚫 Stored rejected event {}", stored.pdu.event_id);
            return Ok(Outcome::Rejected);
        }

        // An event others already point at arrived late: it is history, not
        // the new head of the room.
        let referenced = updater.is_referenced(&stored.pdu.event_id)?;
        let (latest, room_snapshot) = if referenced {
            (updater.latest_events().to_vec(), updater.current_state_snapshot())
        } else {
            let state_after = rooms.state_after(&stored)?;
            let mut prev_nids = HashSet::new();
            for prev in &stored.pdu.prev_events {
                prev_nids.extend(rooms.short.event_nid(prev)?);
            }

            let mut latest: Vec<EventNid> = updater
                .latest_events()
                .iter()
                .copied()
                .filter(|nid| !prev_nids.contains(nid))
                .collect();
            let forked = !latest.is_empty();
            latest.push(event_nid);

            let room_snapshot = if forked {
                debug!("Room {} has {} forward extremities", stored.pdu.room_id, latest.len());
                self.resolve(
                    services,
                    updater.view(),
                    room_nid,
                    &[updater.current_state_snapshot(), state_after],
                )?
            } else {
                state_after
            };
            (latest, room_snapshot)
        };

        if let Some(expected) = latest_event_ids {
            self.compare_frontier(services, &stored.pdu, &latest, expected)?;
        }

        let mut published = Published::default();
        if !updater.has_event_been_sent(event_nid)? {
            published = self
                .publish(services, updater.txn_mut()?, &stored, room_snapshot, referenced)
                .await?;
            updater.mark_event_as_sent(event_nid)?;
        }

        updater.set_latest_events(room_nid, latest, event_nid, room_snapshot)?;
        updater.commit()?;

        let notifier = &services.sync.notifier;
        let members: Vec<&UserId> = published.members.iter().map(|u| &**u).collect();
        notifier.on_new_event(published.pdu, &stored.pdu.room_id, &members);
        if let Some((user_id, position)) = &published.invite {
            notifier.on_new_invite(*position, user_id);
        }
        if let Some(position) = published.relation {
            notifier.on_new_relation(position, &stored.pdu.room_id);
        }

        metrics::counter!("matrixon_events_accepted_total").increment(1);
        info!(
            "📨 Accepted {} in {} at position {}",
            stored.pdu.event_id, stored.pdu.room_id, published.pdu
        );
        Ok(Outcome::Accepted(published.pdu))
    }

    /// The state before `pdu`: nothing for the create event, the state after
    /// the single prev event, or the merge of the states after every prev.
    fn state_before(
        &self,
        services: &Services,
        updater: &RoomUpdater<'_>,
        pdu: &PduEvent,
    ) -> Result<StateSnapshotNid> {
        let rooms = &services.rooms;
        let mut snapshots = BTreeSet::new();
        for prev in &pdu.prev_events {
            let prev_event = match rooms.short.event_nid(prev)? {
                Some(nid) => rooms.timeline.get(updater.view(), nid)?,
                None => None,
            }
            .ok_or_else(|| {
                Error::MissingState(format!("prev event {prev} of {} is unknown", pdu.event_id))
            })?;
            snapshots.insert(rooms.state_after(&prev_event)?);
        }

        let snapshots: Vec<_> = snapshots.into_iter().collect();
        match snapshots.as_slice() {
            [] => Ok(StateSnapshotNid::default()),
            [single] => Ok(*single),
            several => self.resolve(services, updater.view(), updater.room_nid(), several),
        }
    }

    fn resolve(
        &self,
        services: &Services,
        view: &dyn ReadView,
        room_nid: RoomNid,
        snapshots: &[StateSnapshotNid],
    ) -> Result<StateSnapshotNid> {
        let rooms = &services.rooms;
        if snapshots.iter().all(|nid| *nid == snapshots[0]) {
            return Ok(snapshots[0]);
        }

        let states = snapshots
            .iter()
            .map(|nid| rooms.state_compressor.snapshot_entries(*nid))
            .collect::<Result<Vec<_>>>()?;
        let resolved = state_res::resolve(&states, |event_nid| {
            let event = rooms.timeline.get_required(view, event_nid)?;
            Ok((event.pdu.depth, event.pdu.event_id))
        })?;
        rooms.state_compressor.add_state(room_nid, &[], &resolved)
    }

    /// Allocates the event's stream positions and writes everything that
    /// hangs off them.
    async fn publish(
        &self,
        services: &Services,
        txn: &mut Transaction,
        stored: &StoredEvent,
        room_snapshot: StateSnapshotNid,
        referenced: bool,
    ) -> Result<Published> {
        let rooms = &services.rooms;
        let pdu = &stored.pdu;
        let mut published = Published {
            pdu: services.globals.advance(txn, StreamKind::Pdu).await?,
            ..Default::default()
        };

        if !referenced {
            self.update_membership(services, txn, stored, room_snapshot, &mut published)
                .await?;
        }

        if pdu.kind == "m.room.redaction" {
            if let Some(target) = redacted_event_id(pdu) {
                self.redact(services, txn, pdu, &target)?;
            }
        }

        rooms.timeline.append_pdu(txn, published.pdu, &pdu.room_id, stored.event_nid)?;
        rooms.topology.insert_event_in_topology(txn, pdu, published.pdu)?;

        if let Some((parent, rel_type)) = pdu.relation() {
            let position = services.globals.advance(txn, StreamKind::Relations).await?;
            rooms.pdu_metadata.add_relation(
                txn,
                position,
                &RelationRecord {
                    room_id: pdu.room_id.clone(),
                    event_id: pdu.event_id.clone(),
                    parent,
                    rel_type,
                },
            )?;
            published.relation = Some(position);
        }

        Ok(published)
    }

    /// Applies a membership event that won its slot in the room's new
    /// current state.
    async fn update_membership(
        &self,
        services: &Services,
        txn: &mut Transaction,
        stored: &StoredEvent,
        room_snapshot: StateSnapshotNid,
        published: &mut Published,
    ) -> Result<()> {
        let rooms = &services.rooms;
        let pdu = &stored.pdu;
        let (Some(membership), Some(entry)) = (pdu.membership(), super::Service::state_entry(stored))
        else {
            return Ok(());
        };
        let Some(user_id) = pdu.state_key.as_deref().and_then(|key| UserId::parse(key).ok()) else {
            warn!("Membership event {} has an invalid state key", pdu.event_id);
            return Ok(());
        };

        let block_nids = rooms.state_compressor.block_nids(room_snapshot)?;
        let current = rooms
            .state_compressor
            .state_entries_for_tuples(&block_nids, &[entry.key])?;
        if current.first().map(|e| e.event_nid) != Some(stored.event_nid) {
            debug!("Membership event {} lost state resolution", pdu.event_id);
            return Ok(());
        }

        rooms.state_cache.update_membership(
            txn,
            &pdu.room_id,
            &user_id,
            &MembershipRecord {
                membership,
                event_id: pdu.event_id.clone(),
                position: published.pdu,
            },
        )?;

        match membership {
            Membership::Invite => {
                let position = services.globals.advance(txn, StreamKind::Invite).await?;
                rooms.state_cache.add_invite(
                    txn,
                    &user_id,
                    position,
                    &InviteRecord {
                        room_id: pdu.room_id.clone(),
                        event_id: pdu.event_id.clone(),
                        invite_event: pdu.to_room_value(),
                        retired: false,
                    },
                )?;
                published.invite = Some((user_id.clone(), position));
            }
            Membership::Join | Membership::Leave | Membership::Ban => {
                if let Some(invite) = rooms.state_cache.pending_invite(&*txn, &user_id, &pdu.room_id)? {
                    let position = services.globals.advance(txn, StreamKind::Invite).await?;
                    rooms.state_cache.retire_invite(txn, &user_id, position, invite)?;
                    published.invite = Some((user_id.clone(), position));
                }
            }
            Membership::Knock => {}
        }

        published.members.push(user_id);
        Ok(())
    }

    fn redact(&self, services: &Services, txn: &mut Transaction, redaction: &PduEvent, target: &EventId) -> Result<()> {
        let rooms = &services.rooms;
        let Some(target_nid) = rooms.short.event_nid(target)? else {
            debug!("Redaction target {} is unknown", target);
            return Ok(());
        };
        let Some(mut event) = rooms.timeline.get(&*txn, target_nid)? else {
            return Ok(());
        };
        if event.pdu.room_id != redaction.room_id {
            warn!("Redaction {} targets an event in another room", redaction.event_id);
            return Ok(());
        }

        event.pdu.redact(redaction);
        rooms.timeline.replace_event(txn, &event)
    }

    fn compare_frontier(
        &self,
        services: &Services,
        pdu: &PduEvent,
        latest: &[EventNid],
        expected: &[OwnedEventId],
    ) -> Result<()> {
        let ours = latest
            .iter()
            .map(|nid| services.rooms.short.event_id_from_nid(*nid))
            .collect::<Result<BTreeSet<_>>>()?;
        let theirs: BTreeSet<_> = expected.iter().cloned().collect();
        if ours != theirs {
            warn!(
                "Frontier of {} after {} differs from upstream: {:?} vs {:?}",
                pdu.room_id, pdu.event_id, ours, theirs
            );
        }
        Ok(())
    }
}

fn is_create_event(pdu: &PduEvent) -> bool {
    pdu.kind == "m.room.create" && pdu.state_key.as_deref() == Some("")
}

/// Older room versions carry the target at the top level, newer ones in the
/// content.
fn redacted_event_id(pdu: &PduEvent) -> Option<OwnedEventId> {
    pdu.redacts.clone().or_else(|| {
        pdu.content
            .get("redacts")
            .and_then(Value::as_str)
            .and_then(|id| EventId::parse(id).ok())
    })
}
