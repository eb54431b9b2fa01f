//! Lifecycle and close bookkeeping.

use bytes::Bytes;
use strand_core::CloseFrame;

/// Lifecycle of a connection.
///
/// Transitions only move forward:
/// `Connecting -> Active -> Draining -> Closed`, with `Connecting -> Closed`
/// when the handshake fails and `Active -> Closed` on an immediate close or
/// a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// Handshake in progress; loops not started.
    Connecting,
    /// Both loops running.
    Active,
    /// Close requested; queued messages are still being flushed.
    Draining,
    /// Loops stopped and the transport released.
    Closed,
}

impl ConnectionState {
    /// Whether new messages may be enqueued.
    pub fn accepts_sends(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Active)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Active => "active",
            ConnectionState::Draining => "draining",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which end of the stream this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the stream; sends its header first.
    Client,
    /// Accepted the stream; reads the client header first.
    Server,
}

/// Who ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    /// `close` was called on this side, or a callback failed during setup.
    Local,
    /// The peer finished the stream.
    Peer,
    /// A read or write failed.
    Failure,
}

/// Passed to the closed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Who ended the connection.
    pub initiator: CloseInitiator,
    /// Close frame sent (local) or received (peer), if any.
    pub frame: Option<CloseFrame>,
}

impl CloseReason {
    pub(crate) fn local(frame: Option<CloseFrame>) -> Self {
        Self {
            initiator: CloseInitiator::Local,
            frame,
        }
    }

    pub(crate) fn peer(frame: Option<CloseFrame>) -> Self {
        Self {
            initiator: CloseInitiator::Peer,
            frame,
        }
    }

    pub(crate) fn failure() -> Self {
        Self {
            initiator: CloseInitiator::Failure,
            frame: None,
        }
    }

    /// Whether the peer ended the stream.
    pub fn closed_by_peer(&self) -> bool {
        self.initiator == CloseInitiator::Peer
    }

    /// Whether this side ended the stream.
    pub fn closed_locally(&self) -> bool {
        self.initiator == CloseInitiator::Local
    }
}

/// Header and trailer blobs exchanged on the stream.
///
/// Each slot is written at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Header sent by the client at connect.
    pub client_header: Option<Bytes>,
    /// Header sent by the server at connect.
    pub server_header: Option<Bytes>,
    /// Reason the server attached when it ended the stream.
    pub server_trailer: Option<Bytes>,
}

pub(crate) fn set_once(slot: &mut Option<Bytes>, value: Bytes) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    true
}
