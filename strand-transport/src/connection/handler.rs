//! Lifecycle callbacks.

use bytes::Bytes;
use strand_core::Transport;

use super::core::Connection;
use super::error::{ConnectionError, HandlerError};
use super::state::CloseReason;

/// Callbacks invoked by a [`Connection`] over its lifetime.
///
/// Every method has a no-op default, so an implementation only overrides
/// what it needs. Callbacks run on the connection's own tasks: `on_receive`
/// and `on_ping` on the receive loop, `on_closed` on the supervisor. Blocking
/// inside them stalls that loop.
///
/// Order per connection: `on_connect` -> `on_connected` -> `on_receive`* ->
/// `on_closed`. `on_closed` runs exactly once, and only if the handshake
/// succeeded.
pub trait ConnectionHandler<T: Transport>: Send + Sync + Sized + 'static {
    /// Value produced by `on_connect` and kept for the connection's lifetime
    /// (an authenticated identity, a session).
    type Bound: Send + Sync + 'static;

    /// Runs before any traffic.
    ///
    /// On the server the client header is already available through
    /// [`Connection::metadata`]; either role may set its own header with
    /// [`Connection::set_local_header`]. An error rejects the connection.
    fn on_connect(
        &self,
        _connection: &Connection<T, Self>,
    ) -> Result<Option<Self::Bound>, HandlerError> {
        Ok(None)
    }

    /// Runs once both loops are started. An error closes the connection.
    fn on_connected(&self, _connection: &Connection<T, Self>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Runs for every inbound message, in arrival order.
    ///
    /// An error is reported through [`ConnectionHandler::on_error`] and the
    /// loop keeps going.
    fn on_receive(
        &self,
        _connection: &Connection<T, Self>,
        _message: T::Inbound,
    ) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Runs for every ping. Returning `Some(payload)` writes a pong.
    ///
    /// An error ends the connection.
    fn on_ping(
        &self,
        _connection: &Connection<T, Self>,
        payload: &Bytes,
    ) -> Result<Option<Bytes>, HandlerError> {
        Ok(Some(payload.clone()))
    }

    /// Runs once, after both loops stopped and the transport was released.
    fn on_closed(&self, _connection: &Connection<T, Self>, _reason: &CloseReason) {}

    /// Reports a non-fatal problem: a callback error or a transport error that
    /// ended the connection. The peer finishing the stream is not reported.
    fn on_error(&self, connection: &Connection<T, Self>, context: &str, error: &ConnectionError) {
        tracing::warn!(connection = %connection.id(), "{}: {}", context, error);
    }
}
