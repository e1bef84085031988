//! Core types for Matrixon streams
//!
//! Numeric identifiers (NIDs) stand in for the strings that events reference
//! over and over again. Stream and topology tokens are the opaque cursors
//! handed to clients.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Arrival-order sequence number within one named stream.
pub type StreamPosition = u64;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Zero is never assigned and marks "no value".
            pub const fn is_zero(self) -> bool {
                self.0 == 0
            }

            pub const fn to_be_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

numeric_id!(
    /// Numeric ID of a room.
    RoomNid
);
numeric_id!(
    /// Numeric ID of an event.
    EventNid
);
numeric_id!(
    /// Numeric ID of an event type string.
    EventTypeNid
);
numeric_id!(
    /// Numeric ID of a state key string.
    EventStateKeyNid
);
numeric_id!(
    /// Numeric ID of a content-addressed state block.
    StateBlockNid
);
numeric_id!(
    /// Numeric ID of a content-addressed state snapshot.
    StateSnapshotNid
);

/// A (type, state key) pair in NID form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateKeyTuple {
    pub event_type_nid: EventTypeNid,
    pub event_state_key_nid: EventStateKeyNid,
}

impl StateKeyTuple {
    pub const fn new(event_type_nid: EventTypeNid, event_state_key_nid: EventStateKeyNid) -> Self {
        Self {
            event_type_nid,
            event_state_key_nid,
        }
    }
}

/// One entry of room state: which event holds a (type, state key) pair.
///
/// Ordering is by tuple first, so a sorted list of entries can be binary
/// searched by tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: StateKeyTuple,
    pub event_nid: EventNid,
}

impl StateEntry {
    pub const fn new(key: StateKeyTuple, event_nid: EventNid) -> Self {
        Self { key, event_nid }
    }
}

/// Room membership states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

impl Membership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Membership::Join => "join",
            Membership::Invite => "invite",
            Membership::Leave => "leave",
            Membership::Ban => "ban",
            Membership::Knock => "knock",
        }
    }
}

impl FromStr for Membership {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "join" => Ok(Membership::Join),
            "invite" => Ok(Membership::Invite),
            "leave" => Ok(Membership::Leave),
            "ban" => Ok(Membership::Ban),
            "knock" => Ok(Membership::Knock),
            other => Err(Error::BadRequest(format!("unknown membership {other:?}"))),
        }
    }
}

/// The logical streams that carry positions in a [`StreamingToken`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKind {
    Pdu,
    Typing,
    Receipt,
    Invite,
    SendToDevice,
    AccountData,
    DeviceList,
    NotificationData,
    Presence,
    Relations,
}

impl StreamKind {
    pub const COUNT: usize = 10;

    /// Token order. Appending a kind at the end keeps old tokens parseable.
    pub const ALL: [StreamKind; Self::COUNT] = [
        StreamKind::Pdu,
        StreamKind::Typing,
        StreamKind::Receipt,
        StreamKind::Invite,
        StreamKind::SendToDevice,
        StreamKind::AccountData,
        StreamKind::DeviceList,
        StreamKind::NotificationData,
        StreamKind::Presence,
        StreamKind::Relations,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// The allocator counter backing this stream.
    pub const fn stream_name(self) -> &'static str {
        match self {
            StreamKind::Pdu => "events",
            StreamKind::Typing => "typing",
            StreamKind::Receipt => "receipt",
            StreamKind::Invite => "invite",
            StreamKind::SendToDevice => "send_to_device",
            StreamKind::AccountData => "account_data",
            StreamKind::DeviceList => "device_list",
            StreamKind::NotificationData => "notification",
            StreamKind::Presence => "presence",
            StreamKind::Relations => "relation",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stream_name())
    }
}

/// A set of stream kinds, used to scope what a sync request waits for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StreamSet(u16);

impl StreamSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self((1 << StreamKind::COUNT) - 1)
    }

    pub const fn only(kind: StreamKind) -> Self {
        Self(1 << kind.index())
    }

    pub const fn with(self, kind: StreamKind) -> Self {
        Self(self.0 | (1 << kind.index()))
    }

    pub const fn contains(self, kind: StreamKind) -> bool {
        self.0 & (1 << kind.index()) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = StreamKind> {
        StreamKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl Default for StreamSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<StreamKind> for StreamSet {
    fn from_iter<I: IntoIterator<Item = StreamKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), StreamSet::with)
    }
}

/// Composite cursor: one position per stream kind.
///
/// Serialized as `s{pdu}_{typing}_{receipt}_...` in [`StreamKind::ALL`]
/// order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StreamingToken {
    positions: [StreamPosition; StreamKind::COUNT],
}

impl StreamingToken {
    pub fn get(&self, kind: StreamKind) -> StreamPosition {
        self.positions[kind.index()]
    }

    pub fn set(&mut self, kind: StreamKind, position: StreamPosition) {
        self.positions[kind.index()] = position;
    }

    pub fn with(mut self, kind: StreamKind, position: StreamPosition) -> Self {
        self.set(kind, position);
        self
    }

    /// True if any stream in `streams` is ahead of `other`.
    pub fn is_after_in(&self, other: &StreamingToken, streams: StreamSet) -> bool {
        streams.iter().any(|kind| self.get(kind) > other.get(kind))
    }

    pub fn is_after(&self, other: &StreamingToken) -> bool {
        self.is_after_in(other, StreamSet::all())
    }

    /// Raise every position to at least the one in `other`.
    pub fn apply_updates(&mut self, other: &StreamingToken) {
        for kind in StreamKind::ALL {
            if other.get(kind) > self.get(kind) {
                self.set(kind, other.get(kind));
            }
        }
    }
}

impl fmt::Display for StreamingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("s")?;
        for (i, position) in self.positions.iter().enumerate() {
            if i > 0 {
                f.write_str("_")?;
            }
            write!(f, "{position}")?;
        }
        Ok(())
    }
}

impl FromStr for StreamingToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('s')
            .ok_or_else(|| Error::BadRequest(format!("invalid stream token {s:?}")))?;
        let parts: Vec<&str> = body.split('_').collect();
        if parts.is_empty() || parts.len() > StreamKind::COUNT {
            return Err(Error::BadRequest(format!("invalid stream token {s:?}")));
        }

        let mut token = StreamingToken::default();
        for (i, part) in parts.into_iter().enumerate() {
            token.positions[i] = part
                .parse()
                .map_err(|_| Error::BadRequest(format!("invalid stream token {s:?}")))?;
        }
        Ok(token)
    }
}

/// Causal cursor: (depth, stream position) of an event in a room.
///
/// Serialized as `t{depth}_{pdu_position}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopologyToken {
    pub depth: u64,
    pub pdu_position: StreamPosition,
}

impl TopologyToken {
    pub const fn new(depth: u64, pdu_position: StreamPosition) -> Self {
        Self {
            depth,
            pdu_position,
        }
    }
}

impl fmt::Display for TopologyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}_{}", self.depth, self.pdu_position)
    }
}

impl FromStr for TopologyToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::BadRequest(format!("invalid topology token {s:?}"));
        let body = s.strip_prefix('t').ok_or_else(invalid)?;
        let (depth, position) = body.split_once('_').ok_or_else(invalid)?;
        Ok(Self {
            depth: depth.parse().map_err(|_| invalid())?,
            pdu_position: position.parse().map_err(|_| invalid())?,
        })
    }
}

/// A pagination token in either ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaginationToken {
    Topology(TopologyToken),
    Stream(StreamingToken),
}

impl FromStr for PaginationToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with('t') {
            s.parse().map(PaginationToken::Topology)
        } else {
            s.parse().map(PaginationToken::Stream)
        }
    }
}

impl fmt::Display for PaginationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginationToken::Topology(token) => token.fmt(f),
            PaginationToken::Stream(token) => token.fmt(f),
        }
    }
}

/// Pagination direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "f")]
    Forward,
    #[serde(rename = "b")]
    Backward,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_token_roundtrip() {
        let token = StreamingToken::default()
            .with(StreamKind::Pdu, 42)
            .with(StreamKind::Receipt, 7)
            .with(StreamKind::Relations, 3);
        let text = token.to_string();
        assert_eq!(text, "s42_0_7_0_0_0_0_0_0_3");
        assert_eq!(text.parse::<StreamingToken>().unwrap(), token);
    }

    #[test]
    fn test_short_streaming_token_fills_zeroes() {
        let token: StreamingToken = "s9".parse().unwrap();
        assert_eq!(token.get(StreamKind::Pdu), 9);
        assert_eq!(token.get(StreamKind::Presence), 0);
    }

    #[test]
    fn test_invalid_tokens_are_rejected() {
        assert!("x1_2".parse::<StreamingToken>().is_err());
        assert!("s1_a".parse::<StreamingToken>().is_err());
        assert!("s1_2_3_4_5_6_7_8_9_10_11".parse::<StreamingToken>().is_err());
        assert!("t5".parse::<TopologyToken>().is_err());
        assert!("t5_x".parse::<TopologyToken>().is_err());
    }

    #[test]
    fn test_is_after_respects_stream_set() {
        let since = StreamingToken::default().with(StreamKind::Receipt, 4);
        let now = since.with(StreamKind::Typing, 9);

        assert!(now.is_after(&since));
        assert!(now.is_after_in(&since, StreamSet::only(StreamKind::Typing)));
        assert!(!now.is_after_in(&since, StreamSet::only(StreamKind::Receipt)));
    }

    #[test]
    fn test_apply_updates_takes_maximum() {
        let mut token = StreamingToken::default()
            .with(StreamKind::Pdu, 10)
            .with(StreamKind::Typing, 2);
        token.apply_updates(&StreamingToken::default().with(StreamKind::Pdu, 5).with(StreamKind::Typing, 8));
        assert_eq!(token.get(StreamKind::Pdu), 10);
        assert_eq!(token.get(StreamKind::Typing), 8);
    }

    #[test]
    fn test_pagination_token_dispatch() {
        match "t3_17".parse::<PaginationToken>().unwrap() {
            PaginationToken::Topology(t) => assert_eq!(t, TopologyToken::new(3, 17)),
            other => panic!("unexpected token {other:?}"),
        }
        assert!(matches!(
            "s1_2".parse::<PaginationToken>().unwrap(),
            PaginationToken::Stream(_)
        ));
    }

    #[test]
    fn test_state_entry_ordering_is_by_tuple() {
        let a = StateEntry::new(StateKeyTuple::new(EventTypeNid(1), EventStateKeyNid(2)), EventNid(99));
        let b = StateEntry::new(StateKeyTuple::new(EventTypeNid(2), EventStateKeyNid(1)), EventNid(1));
        assert!(a < b);
    }

    #[test]
    fn test_stream_set_iteration() {
        let set: StreamSet = [StreamKind::Typing, StreamKind::Presence].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![StreamKind::Typing, StreamKind::Presence]);
        assert!(!set.contains(StreamKind::Pdu));
        assert_eq!(StreamSet::all().iter().count(), StreamKind::COUNT);
    }
}
