//! Shared fixtures: an in-memory transport the test drives by hand, and a
//! handler that records every callback.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use strand_transport::{
    CloseFrame, CloseReason, Connection, ConnectionError, ConnectionHandler, HandlerError,
    Incoming, PreparedMessage, Transport, TransportError, TransportResult,
};
use tokio::sync::{Notify, mpsc};

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// What the peer side feeds into the transport.
enum Feed {
    Header(Bytes),
    Item(Incoming<String>),
    End(Option<CloseFrame>),
    Fail(String),
}

/// What the connection wrote to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Header(Bytes),
    Message(String),
    Prepared(Bytes),
    Pong(Bytes),
}

struct Shared {
    feed: tokio::sync::Mutex<mpsc::UnboundedReceiver<Feed>>,
    sent: Mutex<Vec<Sent>>,
    paused: AtomicBool,
    resumed: Notify,
    fail_writes: AtomicBool,
    blocked_writes: AtomicUsize,
    hang_close: AtomicBool,
    close_calls: AtomicUsize,
    close_frame: Mutex<Option<CloseFrame>>,
}

/// Transport half handed to the connection under test.
pub struct MockTransport {
    shared: Arc<Shared>,
}

/// Test-side handle: feeds inbound items and inspects what was written.
#[derive(Clone)]
pub struct MockPeer {
    shared: Arc<Shared>,
    feed: mpsc::UnboundedSender<Feed>,
}

pub fn mock_pair() -> (MockTransport, MockPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        feed: tokio::sync::Mutex::new(rx),
        sent: Mutex::new(Vec::new()),
        paused: AtomicBool::new(false),
        resumed: Notify::new(),
        fail_writes: AtomicBool::new(false),
        blocked_writes: AtomicUsize::new(0),
        hang_close: AtomicBool::new(false),
        close_calls: AtomicUsize::new(0),
        close_frame: Mutex::new(None),
    });
    (
        MockTransport {
            shared: shared.clone(),
        },
        MockPeer { shared, feed: tx },
    )
}

impl MockPeer {
    pub fn header(&self, header: &'static [u8]) {
        let _ = self.feed.send(Feed::Header(Bytes::from_static(header)));
    }

    pub fn message(&self, text: &str) {
        let _ = self
            .feed
            .send(Feed::Item(Incoming::Message(text.to_string())));
    }

    pub fn ping(&self, payload: &'static [u8]) {
        let _ = self
            .feed
            .send(Feed::Item(Incoming::Ping(Bytes::from_static(payload))));
    }

    pub fn end(&self, frame: Option<CloseFrame>) {
        let _ = self.feed.send(Feed::End(frame));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.feed.send(Feed::Fail(reason.to_string()));
    }

    pub fn pause_writes(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume_writes(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.shared.resumed.notify_waiters();
    }

    /// Number of times a write found the stream paused and waited.
    pub fn blocked_writes(&self) -> usize {
        self.shared.blocked_writes.load(Ordering::Acquire)
    }

    /// Make `close` block forever, like a stream nobody reads any more.
    pub fn hang_close(&self) {
        self.shared.hang_close.store(true, Ordering::Release);
    }

    pub fn fail_writes(&self) {
        self.shared.fail_writes.store(true, Ordering::Release);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.shared.sent.lock().clone()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::Acquire)
    }

    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.shared.close_frame.lock().clone()
    }
}

impl MockTransport {
    async fn write(&self, sent: Sent) -> TransportResult<()> {
        loop {
            let resumed = self.shared.resumed.notified();
            if !self.shared.paused.load(Ordering::Acquire) {
                break;
            }
            self.shared.blocked_writes.fetch_add(1, Ordering::AcqRel);
            resumed.await;
        }
        if self.shared.fail_writes.load(Ordering::Acquire) {
            return Err(TransportError::Io(std::io::Error::other("broken pipe")));
        }
        self.shared.sent.lock().push(sent);
        Ok(())
    }

    async fn next_feed(&self) -> Option<Feed> {
        self.shared.feed.lock().await.recv().await
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Outbound = String;
    type Inbound = String;

    async fn send(&self, message: String) -> TransportResult<()> {
        self.write(Sent::Message(message)).await
    }

    async fn send_prepared(&self, prepared: &PreparedMessage) -> TransportResult<()> {
        self.write(Sent::Prepared(prepared.as_bytes().clone())).await
    }

    async fn send_pong(&self, payload: Bytes) -> TransportResult<()> {
        self.write(Sent::Pong(payload)).await
    }

    async fn receive(&self) -> TransportResult<Incoming<String>> {
        match self.next_feed().await {
            None => Err(TransportError::EndOfStream(None)),
            Some(Feed::Item(item)) => Ok(item),
            Some(Feed::End(frame)) => Err(TransportError::EndOfStream(frame)),
            Some(Feed::Fail(reason)) => Err(TransportError::Io(std::io::Error::other(reason))),
            Some(Feed::Header(_)) => Err(TransportError::Protocol("late header".to_string())),
        }
    }

    async fn send_header(&self, header: Bytes) -> TransportResult<()> {
        self.shared.sent.lock().push(Sent::Header(header));
        Ok(())
    }

    async fn receive_header(&self) -> TransportResult<Bytes> {
        match self.next_feed().await {
            Some(Feed::Header(header)) => Ok(header),
            None => Err(TransportError::EndOfStream(None)),
            Some(Feed::End(frame)) => Err(TransportError::EndOfStream(frame)),
            Some(_) => Err(TransportError::Protocol("expected header".to_string())),
        }
    }

    async fn close(&self, frame: Option<CloseFrame>) -> TransportResult<()> {
        self.shared.close_calls.fetch_add(1, Ordering::AcqRel);
        *self.shared.close_frame.lock() = frame;
        if self.shared.hang_close.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn prepare(payload: &[u8]) -> TransportResult<PreparedMessage> {
        Ok(PreparedMessage::new(payload.to_vec()))
    }
}

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect,
    Connected,
    Received(String),
    Closed(CloseReason),
    Error(String),
}

/// Handler that records callbacks and can be told to fail.
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<Event>>,
    /// Reject the handshake with this message.
    pub reject_connect: Option<String>,
    /// Fail the connected callback with this message.
    pub fail_connected: Option<String>,
    /// Header this side sends during the handshake.
    pub local_header: Option<&'static [u8]>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Received(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn closed_reasons(&self) -> Vec<CloseReason> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Closed(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: Event) {
        self.events.lock().push(event);
    }
}

pub type MockConnection = Connection<MockTransport, RecordingHandler>;

impl ConnectionHandler<MockTransport> for RecordingHandler {
    /// The peer's header as text, when there is one.
    type Bound = String;

    fn on_connect(&self, connection: &MockConnection) -> Result<Option<String>, HandlerError> {
        self.record(Event::Connect);
        if let Some(reason) = &self.reject_connect {
            return Err(reason.clone().into());
        }
        // Only the server has seen the peer's header at this point.
        let peer_header = connection.metadata().client_header;
        if let Some(header) = self.local_header {
            connection.set_local_header(Bytes::from_static(header))?;
        }
        Ok(peer_header.map(|h| String::from_utf8_lossy(&h).into_owned()))
    }

    fn on_connected(&self, _connection: &MockConnection) -> Result<(), HandlerError> {
        self.record(Event::Connected);
        match &self.fail_connected {
            Some(reason) => Err(reason.clone().into()),
            None => Ok(()),
        }
    }

    fn on_receive(&self, _connection: &MockConnection, message: String) -> Result<(), HandlerError> {
        if message == "panic" {
            panic!("receive callback panicked");
        }
        if message == "boom" {
            return Err("cannot handle boom".into());
        }
        self.record(Event::Received(message));
        Ok(())
    }

    fn on_closed(&self, _connection: &MockConnection, reason: &CloseReason) {
        self.record(Event::Closed(reason.clone()));
    }

    fn on_error(&self, _connection: &MockConnection, context: &str, error: &ConnectionError) {
        self.record(Event::Error(format!("{context}: {error}")));
    }
}
