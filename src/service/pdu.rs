// =============================================================================
// Matrixon Streams - PDU Module
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
//   The room event (PDU) as stored and served: reference hashing, redaction
//   and conversion to the client format.
//
// =============================================================================

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ruma::{EventId, OwnedEventId, OwnedRoomId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use matrixon_core::types::Membership;

use crate::{utils::canonical_json, Error, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PduEvent {
    pub event_id: OwnedEventId,
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
    pub origin_server_ts: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub prev_events: Vec<OwnedEventId>,
    pub depth: u64,
    #[serde(default)]
    pub auth_events: Vec<OwnedEventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<OwnedEventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signatures: Option<Value>,
}

impl PduEvent {
    /// Parses an event, computing its ID from the content when it is absent
    /// and verifying it when present.
    pub fn from_json(mut value: Value) -> Result<Self> {
        let object = value
            .as_object_mut()
            .ok_or_else(|| Error::BadRequest("event is not a JSON object".to_owned()))?;

        let computed = gen_event_id(&Value::Object(object.clone()))?;
        match object.get("event_id").and_then(Value::as_str) {
            Some(given) if given != computed.as_str() => {
                return Err(Error::BadRequest(format!(
                    "event ID {given} does not match reference hash {computed}"
                )));
            }
            Some(_) => {}
            None => {
                object.insert("event_id".to_owned(), Value::String(computed.to_string()));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| Error::BadRequest(format!("invalid event: {e}")))
    }

    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// The membership carried by an `m.room.member` event.
    pub fn membership(&self) -> Option<Membership> {
        if self.kind != "m.room.member" {
            return None;
        }
        self.content
            .get("membership")
            .and_then(Value::as_str)
            .and_then(|m| m.parse().ok())
    }

    /// `(parent event, relation type)` from `m.relates_to`.
    pub fn relation(&self) -> Option<(OwnedEventId, String)> {
        let relates_to = self.content.get("m.relates_to")?;
        let parent = relates_to.get("event_id")?.as_str()?;
        let rel_type = relates_to.get("rel_type")?.as_str()?;
        let parent = EventId::parse(parent).ok()?;
        Some((parent, rel_type.to_owned()))
    }

    pub fn is_redacted(&self) -> bool {
        self.unsigned
            .as_ref()
            .is_some_and(|unsigned| unsigned.contains_key("redacted_because"))
    }

    /// Strips the content down to the keys that survive redaction and
    /// records the redaction event in `unsigned`.
    pub fn redact(&mut self, reason: &PduEvent) {
        let keep: &[&str] = match self.kind.as_str() {
            "m.room.member" => &["membership", "join_authorised_via_users_server"],
            "m.room.create" => &["creator", "room_version"],
            "m.room.join_rules" => &["join_rule", "allow"],
            "m.room.power_levels" => &[
                "ban",
                "events",
                "events_default",
                "invite",
                "kick",
                "redact",
                "state_default",
                "users",
                "users_default",
            ],
            "m.room.history_visibility" => &["history_visibility"],
            _ => &[],
        };

        let content = match &self.content {
            Value::Object(map) => map
                .iter()
                .filter(|(k, _)| keep.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            _ => Map::new(),
        };
        self.content = Value::Object(content);

        let mut unsigned = Map::new();
        unsigned.insert("redacted_because".to_owned(), reason.to_sync_value());
        self.unsigned = Some(unsigned);
        debug!("Redacted {} because of {}", self.event_id, reason.event_id);
    }

    /// The event as a client sees it in a sync timeline.
    pub fn to_sync_value(&self) -> Value {
        let mut event = json!({
            "event_id": self.event_id,
            "type": self.kind,
            "sender": self.sender,
            "origin_server_ts": self.origin_server_ts,
            "content": self.content,
        });
        if let Some(state_key) = &self.state_key {
            event["state_key"] = json!(state_key);
        }
        if let Some(redacts) = &self.redacts {
            event["redacts"] = json!(redacts);
        }
        if let Some(unsigned) = &self.unsigned {
            event["unsigned"] = Value::Object(unsigned.clone());
        }
        event
    }

    /// The event as served by room-scoped lookups, which also carry the room.
    pub fn to_room_value(&self) -> Value {
        let mut event = self.to_sync_value();
        event["room_id"] = json!(self.room_id);
        event
    }
}

/// Computes the reference-hash event ID of an event.
///
/// The hash covers the canonical JSON of the event without `event_id`,
/// `signatures` and `unsigned`.
pub fn gen_event_id(value: &Value) -> Result<OwnedEventId> {
    let mut object = value
        .as_object()
        .cloned()
        .ok_or_else(|| Error::BadRequest("event is not a JSON object".to_owned()))?;
    object.remove("event_id");
    object.remove("signatures");
    object.remove("unsigned");

    let hash = Sha256::digest(canonical_json(&Value::Object(object)).as_bytes());
    let id = format!("${}", URL_SAFE_NO_PAD.encode(hash));
    EventId::parse(id).map_err(|_| Error::bad_database("Generated event ID is invalid."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(body: &str) -> Value {
        json!({
            "room_id": "!room:example.org",
            "sender": "@alice:example.org",
            "origin_server_ts": 1,
            "type": "m.room.message",
            "content": { "body": body, "msgtype": "m.text" },
            "depth": 1,
            "prev_events": [],
            "auth_events": [],
        })
    }

    #[test]
    fn test_event_id_is_content_addressed() {
        let a = PduEvent::from_json(message("hi")).unwrap();
        let b = PduEvent::from_json(message("hi")).unwrap();
        let c = PduEvent::from_json(message("bye")).unwrap();
        assert_eq!(a.event_id, b.event_id);
        assert_ne!(a.event_id, c.event_id);
        assert!(a.event_id.as_str().starts_with('$'));
    }

    #[test]
    fn test_event_id_ignores_unsigned_and_signatures() {
        let plain = gen_event_id(&message("hi")).unwrap();
        let mut decorated = message("hi");
        decorated["unsigned"] = json!({ "age": 5 });
        decorated["signatures"] = json!({ "example.org": {} });
        assert_eq!(gen_event_id(&decorated).unwrap(), plain);
    }

    #[test]
    fn test_mismatched_event_id_is_rejected() {
        let mut value = message("hi");
        value["event_id"] = json!("$forged");
        assert!(matches!(PduEvent::from_json(value), Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_redaction_keeps_membership() {
        let mut member = PduEvent::from_json(json!({
            "room_id": "!room:example.org",
            "sender": "@bob:example.org",
            "origin_server_ts": 1,
            "type": "m.room.member",
            "state_key": "@bob:example.org",
            "content": { "membership": "join", "displayname": "Bob" },
            "depth": 2,
        }))
        .unwrap();
        let redaction = PduEvent::from_json(message("spam")).unwrap();

        member.redact(&redaction);
        assert_eq!(member.content, json!({ "membership": "join" }));
        assert!(member.is_redacted());
        assert_eq!(member.membership(), Some(Membership::Join));
    }

    #[test]
    fn test_relation_extraction() {
        let mut value = message("edit");
        value["content"]["m.relates_to"] = json!({
            "rel_type": "m.replace",
            "event_id": "$parent",
        });
        let pdu = PduEvent::from_json(value).unwrap();
        let (parent, rel_type) = pdu.relation().unwrap();
        assert_eq!(parent.as_str(), "$parent");
        assert_eq!(rel_type, "m.replace");
    }
}
