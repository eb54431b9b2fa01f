//! Fan one payload out to many connections.

use std::sync::Arc;

use serde::Serialize;
use strand_core::{ConnectionId, MessageCodec, Transport, TransportError};

use super::core::Connection;
use super::error::ConnectionResult;
use super::handler::ConnectionHandler;

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections that were draining or closed and got nothing.
    pub skipped: Vec<ConnectionId>,
}

/// Encode `payload` once for transport `T` and queue it on every connection.
///
/// Draining or closed connections are skipped; they do not fail the
/// broadcast. Only the encoding can fail.
pub async fn broadcast<'a, T, H, I>(payload: &[u8], connections: I) -> ConnectionResult<BroadcastReport>
where
    T: Transport,
    H: ConnectionHandler<T>,
    I: IntoIterator<Item = &'a Arc<Connection<T, H>>>,
{
    let prepared = T::prepare(payload)?;
    let mut report = BroadcastReport::default();

    for connection in connections {
        match connection.send_prepared(prepared.clone()).await {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                tracing::debug!(connection = %connection.id(), "broadcast skipped: {}", err);
                report.skipped.push(connection.id());
            }
        }
    }

    tracing::debug!(
        delivered = report.delivered,
        skipped = report.skipped.len(),
        bytes = prepared.len(),
        "broadcast queued"
    );
    Ok(report)
}

/// Serialize `message` with `codec`, then [`broadcast`] the bytes.
pub async fn broadcast_message<'a, T, H, I, M, C>(
    message: &M,
    codec: &C,
    connections: I,
) -> ConnectionResult<BroadcastReport>
where
    T: Transport,
    H: ConnectionHandler<T>,
    I: IntoIterator<Item = &'a Arc<Connection<T, H>>>,
    M: Serialize,
    C: MessageCodec,
{
    let payload = codec.encode(message).map_err(TransportError::from)?;
    broadcast(&payload, connections).await
}
