//! The duplex connection engine.
//!
//! One [`Connection`] owns one transport and runs two tasks over it:
//!
//! - **receive loop**: reads inbound items, hands messages to
//!   [`ConnectionHandler::on_receive`], answers pings
//! - **transmit loop**: drains the primary and broadcast queues in FIFO order
//!   and writes each item under the write deadline
//!
//! A third task supervises them. When either loop exits (peer finished the
//! stream, I/O failure, close requested, panic) the shared stop token fires,
//! the other loop stops at its next await point, and the supervisor releases
//! the transport once and runs [`ConnectionHandler::on_closed`].

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::Mutex;
use strand_core::{
    CloseFrame, ConnectionId, Incoming, PreparedMessage, Readiness, Transport, TransportError,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::config::{self, ConnectionConfig};
use super::error::{ConnectionError, ConnectionResult, HandlerError};
use super::handler::ConnectionHandler;
use super::metrics::ConnectionMetrics;
use super::queue::{self, Outgoing, PendingCounter, QueueReceivers, SendQueues};
use super::state::{CloseReason, ConnectionState, Role, StreamMetadata, set_once};

type PanicPayload = Box<dyn Any + Send + 'static>;

/// A live duplex connection.
///
/// Created with [`Connection::accept`] (server role) or
/// [`Connection::connect`] (client role) and always handled through an
/// `Arc`: the loops keep their own references until they stop.
pub struct Connection<T: Transport, H: ConnectionHandler<T>> {
    id: ConnectionId,
    role: Role,
    config: ConnectionConfig,
    transport: T,
    handler: Arc<H>,
    queues: SendQueues<T::Outbound>,
    pending: PendingCounter,
    state: Mutex<ConnectionState>,
    /// Fires when the loops must stop.
    stop: CancellationToken,
    /// Fires after the closed callback returned.
    finished: CancellationToken,
    bound: OnceLock<H::Bound>,
    metadata: Mutex<StreamMetadata>,
    close_reason: Mutex<Option<CloseReason>>,
    metrics: Mutex<ConnectionMetrics>,
    panic: Mutex<Option<PanicPayload>>,
    /// Set when an immediate close dropped a frame half written.
    write_abandoned: AtomicBool,
}

impl<T: Transport, H: ConnectionHandler<T>> Connection<T, H> {
    /// Open the server side of a freshly accepted stream.
    ///
    /// Reads the client header, runs the connect callback, writes the server
    /// header, starts the loops, then runs the connected callback. If the
    /// connect callback fails, its error text is sent to the client as the
    /// close reason and no loop is started.
    pub async fn accept(
        transport: T,
        handler: Arc<H>,
        config: ConnectionConfig,
    ) -> ConnectionResult<Arc<Self>> {
        Self::open(Role::Server, transport, handler, config).await
    }

    /// Open the client side of a stream.
    ///
    /// Runs the connect callback, writes the client header, reads the server
    /// header, starts the loops, then runs the connected callback.
    pub async fn connect(
        transport: T,
        handler: Arc<H>,
        config: ConnectionConfig,
    ) -> ConnectionResult<Arc<Self>> {
        Self::open(Role::Client, transport, handler, config).await
    }

    async fn open(
        role: Role,
        transport: T,
        handler: Arc<H>,
        config: ConnectionConfig,
    ) -> ConnectionResult<Arc<Self>> {
        let (queues, receivers) = queue::channels(&config);
        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            role,
            config,
            transport,
            handler,
            queues,
            pending: PendingCounter::default(),
            state: Mutex::new(ConnectionState::Connecting),
            stop: CancellationToken::new(),
            finished: CancellationToken::new(),
            bound: OnceLock::new(),
            metadata: Mutex::new(StreamMetadata::default()),
            close_reason: Mutex::new(None),
            metrics: Mutex::new(ConnectionMetrics::new_at(Instant::now())),
            panic: Mutex::new(None),
            write_abandoned: AtomicBool::new(false),
        });
        tracing::debug!(connection = %connection.id, ?role, "opening connection");

        if let Err(err) = connection.handshake().await {
            connection.abort(&err).await;
            return Err(err);
        }

        Self::start(&connection, receivers);

        if let Err(err) = connection.handler.on_connected(&connection) {
            tracing::debug!(connection = %connection.id, "connected callback failed: {}", err);
            let frame =
                (role == Role::Server).then(|| CloseFrame::closed_by_server(err.to_string()));
            connection.close_inner(frame, true).await;
            connection.closed().await;
            return Err(ConnectionError::Connected(err));
        }

        Ok(connection)
    }

    async fn handshake(&self) -> ConnectionResult<()> {
        match self.role {
            Role::Server => {
                let client_header = self.read_peer_header().await?;
                self.store_peer_header(client_header);
                self.run_connect()?;
                let header = self.metadata.lock().server_header.clone().unwrap_or_default();
                self.transport.send_header(header).await?;
            }
            Role::Client => {
                self.run_connect()?;
                let header = self.metadata.lock().client_header.clone().unwrap_or_default();
                self.transport.send_header(header).await?;
                let server_header = self.read_peer_header().await?;
                self.store_peer_header(server_header);
            }
        }
        Ok(())
    }

    async fn read_peer_header(&self) -> ConnectionResult<Bytes> {
        let header = config::bounded(
            self.config.keepalive.read_wait,
            self.transport.receive_header(),
        )
        .await?;
        Ok(header)
    }

    fn run_connect(&self) -> ConnectionResult<()> {
        let bound = self
            .handler
            .on_connect(self)
            .map_err(ConnectionError::Handshake)?;
        if let Some(bound) = bound {
            // Only ever set here, once.
            let _ = self.bound.set(bound);
        }
        Ok(())
    }

    fn store_peer_header(&self, header: Bytes) {
        if header.is_empty() {
            return;
        }
        let mut metadata = self.metadata.lock();
        let slot = match self.role {
            Role::Server => &mut metadata.client_header,
            Role::Client => &mut metadata.server_header,
        };
        set_once(slot, header);
    }

    /// Tear down after a failed handshake. The loops never ran, so there is no
    /// closed callback.
    async fn abort(&self, err: &ConnectionError) {
        tracing::debug!(connection = %self.id, "handshake failed: {}", err);
        let frame = match (self.role, err) {
            (Role::Server, ConnectionError::Handshake(cause)) => {
                Some(CloseFrame::closed_by_server(cause.to_string()))
            }
            _ => None,
        };
        if let Some(frame) = &frame {
            set_once(
                &mut self.metadata.lock().server_trailer,
                Bytes::from(frame.reason.clone()),
            );
        }
        self.set_state(ConnectionState::Closed);
        self.record_close(CloseReason::local(frame.clone()));
        self.stop.cancel();
        if let Err(close_err) = self.release_transport(frame).await {
            tracing::debug!(connection = %self.id, "transport close after failed handshake: {}", close_err);
        }
        self.metrics.lock().closed_at = Some(Instant::now());
        self.finished.cancel();
    }

    fn start(this: &Arc<Self>, receivers: QueueReceivers<T::Outbound>) {
        {
            let mut state = this.state.lock();
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Active;
            }
        }
        this.metrics.lock().activated_at = Some(Instant::now());

        let receive = tokio::spawn(Arc::clone(this).receive_loop());
        let transmit = tokio::spawn(Arc::clone(this).transmit_loop(receivers));
        tokio::spawn(Arc::clone(this).supervise(receive, transmit));
        tracing::debug!(connection = %this.id, "connection active");
    }

    async fn receive_loop(self: Arc<Self>) {
        let _teardown = self.stop.clone().drop_guard();
        let keepalive = self.config.keepalive;
        let mut wait = keepalive.read_wait;

        loop {
            let next = tokio::select! {
                _ = self.stop.cancelled() => break,
                next = config::bounded(wait, self.transport.receive()) => next,
            };
            wait = keepalive.read_wait;

            match next {
                Ok(Incoming::Message(message)) => {
                    self.metrics.lock().record_received();
                    if let Err(err) = self.handler.on_receive(&self, message) {
                        self.report_callback_error("receive callback failed", err);
                    }
                }
                Ok(Incoming::Ping(payload)) => {
                    if let Err(err) = self.answer_ping(payload).await {
                        self.fail("ping handling failed", err);
                        break;
                    }
                    wait = keepalive.ping_wait;
                }
                Ok(Incoming::Pong(_)) => {
                    tracing::trace!(connection = %self.id, "pong received");
                }
                Err(TransportError::EndOfStream(frame)) => {
                    tracing::debug!(connection = %self.id, ?frame, "peer finished the stream");
                    if let (Some(frame), Role::Client) = (&frame, self.role) {
                        set_once(
                            &mut self.metadata.lock().server_trailer,
                            Bytes::from(frame.reason.clone()),
                        );
                    }
                    self.record_close(CloseReason::peer(frame));
                    break;
                }
                Err(err) => {
                    self.fail("read failed", err.into());
                    break;
                }
            }
        }
    }

    async fn answer_ping(&self, payload: Bytes) -> ConnectionResult<()> {
        let pong = self
            .handler
            .on_ping(self, &payload)
            .map_err(ConnectionError::Callback)?;
        let answered = pong.is_some();
        if let Some(pong) = pong {
            config::bounded(
                self.config.keepalive.pong_wait,
                self.transport.send_pong(pong),
            )
            .await?;
        }
        self.metrics.lock().record_ping(answered);
        Ok(())
    }

    async fn transmit_loop(self: Arc<Self>, mut receivers: QueueReceivers<T::Outbound>) {
        let _teardown = self.stop.clone().drop_guard();
        let write_wait = self.config.keepalive.write_wait;

        loop {
            let outgoing = tokio::select! {
                _ = self.stop.cancelled() => break,
                next = receivers.next() => match next {
                    Some(outgoing) => outgoing,
                    None => break,
                },
            };

            let prepared = matches!(outgoing, Outgoing::Prepared(_));
            let write = async {
                match outgoing {
                    Outgoing::Message(message) => self.transport.send(message).await,
                    Outgoing::Prepared(frame) => self.transport.send_prepared(&frame).await,
                }
            };
            // An immediate close abandons the write in flight.
            let result = tokio::select! {
                _ = self.stop.cancelled() => {
                    self.write_abandoned.store(true, Ordering::Release);
                    break;
                }
                result = config::bounded(write_wait, write) => result,
            };

            match result {
                Ok(()) => {
                    self.metrics.lock().record_sent(prepared);
                    self.pending.decrement();
                }
                Err(err) => {
                    self.fail("write failed", err.into());
                    break;
                }
            }
        }
    }

    async fn supervise(self: Arc<Self>, receive: JoinHandle<()>, transmit: JoinHandle<()>) {
        for (name, handle) in [("receive", receive), ("transmit", transmit)] {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::error!(connection = %self.id, "{} loop panicked", name);
                    self.record_close(CloseReason::failure());
                    let mut slot = self.panic.lock();
                    if slot.is_none() {
                        *slot = Some(err.into_panic());
                    }
                }
            }
        }
        self.finish().await;
    }

    async fn finish(&self) {
        self.set_state(ConnectionState::Closed);
        let reason = self
            .close_reason
            .lock()
            .clone()
            .unwrap_or_else(CloseReason::failure);

        let frame = if reason.closed_locally() {
            reason.frame.clone()
        } else {
            None
        };
        if let (Some(frame), Role::Server) = (&frame, self.role) {
            set_once(
                &mut self.metadata.lock().server_trailer,
                Bytes::from(frame.reason.clone()),
            );
        }

        if let Err(err) = self.release_transport(frame).await {
            if !err.is_end_of_stream() {
                self.handler
                    .on_error(self, "transport close failed", &ConnectionError::from(err));
            }
        }

        self.metrics.lock().closed_at = Some(Instant::now());
        self.handler.on_closed(self, &reason);
        tracing::debug!(connection = %self.id, initiator = ?reason.initiator, "connection closed");
        self.finished.cancel();
    }

    /// Close the transport, writing `frame` first under the write deadline.
    ///
    /// The frame is dropped when an earlier write was abandoned mid-frame: the
    /// peer could not parse it after the partial bytes.
    async fn release_transport(&self, frame: Option<CloseFrame>) -> Result<(), TransportError> {
        let frame = frame.filter(|_| !self.write_abandoned.load(Ordering::Acquire));
        config::bounded(self.config.keepalive.write_wait, self.transport.close(frame)).await
    }

    fn fail(&self, context: &str, err: ConnectionError) {
        // Errors caused by our own shutdown are not worth reporting.
        if !self.stop.is_cancelled() {
            self.handler.on_error(self, context, &err);
        }
        self.record_close(CloseReason::failure());
    }

    fn report_callback_error(&self, context: &str, err: HandlerError) {
        self.metrics.lock().record_callback_error();
        self.handler
            .on_error(self, context, &ConnectionError::Callback(err));
    }

    fn record_close(&self, reason: CloseReason) {
        let mut slot = self.close_reason.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if next > *state {
            *state = next;
        }
    }

    /// Count a message as pending, or refuse it if the connection is
    /// draining or closed. Holding the state lock while incrementing keeps a
    /// graceful close from missing a message admitted concurrently.
    fn admit(&self) -> ConnectionResult<()> {
        let state = self.state.lock();
        if self.stop.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        if state.accepts_sends() {
            self.pending.increment();
            return Ok(());
        }
        match *state {
            ConnectionState::Draining => Err(ConnectionError::Draining),
            _ => Err(ConnectionError::Closed),
        }
    }

    /// Queue a message for transmission.
    ///
    /// Waits while the send queue is full. Fails with
    /// [`ConnectionError::Draining`] or [`ConnectionError::Closed`] once a
    /// close has been requested. A message accepted here is written before a
    /// graceful close completes.
    pub async fn send(&self, message: T::Outbound) -> ConnectionResult<()> {
        self.admit()?;
        if self.queues.primary.send(message).await.is_err() {
            self.pending.decrement();
            return Err(ConnectionError::Closed);
        }
        self.metrics.lock().record_queued();
        Ok(())
    }

    /// Queue a message without waiting.
    ///
    /// Usable from callbacks, which cannot await. Fails with
    /// [`ConnectionError::QueueFull`] when the send queue is at capacity.
    pub fn try_send(&self, message: T::Outbound) -> ConnectionResult<()> {
        self.admit()?;
        match self.queues.primary.try_send(message) {
            Ok(()) => {
                self.metrics.lock().record_queued();
                Ok(())
            }
            Err(err) => {
                self.pending.decrement();
                Err(match err {
                    TrySendError::Full(_) => ConnectionError::QueueFull,
                    TrySendError::Closed(_) => ConnectionError::Closed,
                })
            }
        }
    }

    pub(crate) async fn send_prepared(&self, prepared: PreparedMessage) -> ConnectionResult<()> {
        self.admit()?;
        if self.queues.broadcast.send(prepared).await.is_err() {
            self.pending.decrement();
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }

    /// Close the connection.
    ///
    /// With `immediate == false`, waits until every accepted message has been
    /// written, then stops the loops. With `immediate == true`, stops the loops
    /// now and drops whatever is still queued. Returns once the stop has been
    /// requested; use [`Connection::closed`] to wait for the closed callback.
    /// Calling it again, or on a closed connection, does nothing.
    pub async fn close(&self, immediate: bool) {
        self.close_inner(None, immediate).await;
    }

    /// Like [`Connection::close`], telling the peer why with a
    /// [`strand_core::CLOSED_BY_SERVER`] close frame.
    pub async fn close_with_reason(&self, reason: impl Into<String>, immediate: bool) {
        self.close_inner(Some(CloseFrame::closed_by_server(reason)), immediate)
            .await;
    }

    async fn close_inner(&self, frame: Option<CloseFrame>, immediate: bool) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            if *state < ConnectionState::Draining {
                *state = ConnectionState::Draining;
            }
        }

        if !immediate {
            tracing::debug!(
                connection = %self.id,
                pending = self.pending.get(),
                "draining before close"
            );
            self.pending.wait_drained(&self.stop).await;
        }

        self.record_close(CloseReason::local(frame));
        self.stop.cancel();
    }

    /// Wait until the connection is fully closed and the closed callback has
    /// returned.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }

    /// Like [`Connection::closed`], but re-raises a panic from either loop in
    /// the caller's task.
    pub async fn join(&self) {
        self.closed().await;
        let payload = self.panic.lock().take();
        if let Some(payload) = payload {
            std::panic::resume_unwind(payload);
        }
    }

    /// Process-unique id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Client or server side.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connection reached `Closed`.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Messages accepted by `send` and not yet written.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// Value returned by the connect callback.
    pub fn bound_value(&self) -> Option<&H::Bound> {
        self.bound.get()
    }

    /// Headers and trailer seen so far.
    pub fn metadata(&self) -> StreamMetadata {
        self.metadata.lock().clone()
    }

    /// Set this side's header. Only valid inside the connect callback, once.
    pub fn set_local_header(&self, header: Bytes) -> ConnectionResult<()> {
        if self.state() != ConnectionState::Connecting {
            return Err(ConnectionError::MetadataLocked);
        }
        let mut metadata = self.metadata.lock();
        let slot = match self.role {
            Role::Server => &mut metadata.server_header,
            Role::Client => &mut metadata.client_header,
        };
        if set_once(slot, header) {
            Ok(())
        } else {
            Err(ConnectionError::MetadataLocked)
        }
    }

    /// Why the connection ended, once known.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }

    /// Snapshot of the traffic counters.
    pub fn metrics(&self) -> ConnectionMetrics {
        self.metrics.lock().clone()
    }

    /// The configuration in effect.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The callback set.
    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<T: Transport, H: ConnectionHandler<T>> Readiness for Connection<T, H> {
    fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Active
    }
}

impl<T: Transport, H: ConnectionHandler<T>> std::fmt::Debug for Connection<T, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}
