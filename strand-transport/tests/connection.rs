//! Connection engine behavior against an in-memory transport.
//!
//! Covers the handshake in both roles, FIFO delivery in both directions,
//! graceful and immediate close, callback failures, deadlines and broadcast.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{Event, MockConnection, RecordingHandler, Sent, eventually, init_tracing, mock_pair};
use strand_transport::{
    CloseFrame, CloseInitiator, Connection, ConnectionConfig, ConnectionError, ConnectionState,
    KeepaliveConfig, Readiness, TransportError, broadcast,
};

async fn accept_default(
    handler: Arc<RecordingHandler>,
) -> (Arc<MockConnection>, common::MockPeer) {
    let (transport, peer) = mock_pair();
    peer.header(b"client-a");
    let connection = Connection::accept(transport, handler, ConnectionConfig::default())
        .await
        .expect("accept");
    (connection, peer)
}

#[tokio::test]
async fn test_server_handshake_exchanges_headers() {
    init_tracing();
    let handler = Arc::new(RecordingHandler {
        local_header: Some(b"server-b"),
        ..Default::default()
    });
    let (connection, peer) = accept_default(handler.clone()).await;

    assert_eq!(connection.state(), ConnectionState::Active);
    assert_eq!(connection.bound_value().map(String::as_str), Some("client-a"));
    let metadata = connection.metadata();
    assert_eq!(metadata.client_header, Some(Bytes::from_static(b"client-a")));
    assert_eq!(metadata.server_header, Some(Bytes::from_static(b"server-b")));
    assert_eq!(peer.sent(), vec![Sent::Header(Bytes::from_static(b"server-b"))]);
    assert_eq!(handler.events(), vec![Event::Connect, Event::Connected]);
    assert!(connection.is_ready());
}

#[tokio::test]
async fn test_client_handshake_sends_header_first() {
    init_tracing();
    let handler = Arc::new(RecordingHandler {
        local_header: Some(b"client-a"),
        ..Default::default()
    });
    let (transport, peer) = mock_pair();
    peer.header(b"server-b");

    let connection = Connection::connect(transport, handler.clone(), ConnectionConfig::default())
        .await
        .expect("connect");

    assert_eq!(peer.sent(), vec![Sent::Header(Bytes::from_static(b"client-a"))]);
    assert_eq!(
        connection.metadata().server_header,
        Some(Bytes::from_static(b"server-b"))
    );
    assert!(connection.bound_value().is_none());
}

#[tokio::test]
async fn test_inbound_messages_delivered_in_order() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    for n in 1..=5 {
        peer.message(&n.to_string());
    }
    eventually(|| handler.received().len() == 5).await;

    assert_eq!(handler.received(), vec!["1", "2", "3", "4", "5"]);
    assert_eq!(connection.metrics().messages_received, 5);
}

#[tokio::test]
async fn test_outbound_messages_written_in_order() {
    init_tracing();
    let (connection, peer) = accept_default(RecordingHandler::new()).await;

    for n in 0..20 {
        connection.send(format!("m{n}")).await.expect("send");
    }
    eventually(|| peer.sent_messages().len() == 20).await;

    let expected: Vec<String> = (0..20).map(|n| format!("m{n}")).collect();
    assert_eq!(peer.sent_messages(), expected);
    eventually(|| connection.pending() == 0).await;
}

#[tokio::test]
async fn test_graceful_close_flushes_accepted_messages() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    peer.pause_writes();
    for text in ["a", "b", "c"] {
        connection.send(text.to_string()).await.expect("send");
    }
    assert_eq!(connection.pending(), 3);

    let closer = tokio::spawn({
        let connection = connection.clone();
        async move { connection.close(false).await }
    });
    eventually(|| connection.state() == ConnectionState::Draining).await;

    assert!(matches!(
        connection.send("late".to_string()).await,
        Err(ConnectionError::Draining)
    ));
    assert!(!closer.is_finished());

    peer.resume_writes();
    closer.await.expect("closer task");
    connection.closed().await;

    assert_eq!(peer.sent_messages(), vec!["a", "b", "c"]);
    assert_eq!(peer.close_calls(), 1);
    assert_eq!(connection.state(), ConnectionState::Closed);

    let reasons = handler.closed_reasons();
    assert_eq!(reasons.len(), 1);
    assert_eq!(reasons[0].initiator, CloseInitiator::Local);
}

#[tokio::test]
async fn test_immediate_close_does_not_wait_for_queue() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    peer.pause_writes();
    connection.send("x".to_string()).await.expect("send");
    connection.send("y".to_string()).await.expect("send");

    connection.close(true).await;
    connection.closed().await;

    assert!(peer.sent_messages().len() < 2);
    assert_eq!(peer.close_calls(), 1);
    assert_eq!(handler.closed_reasons().len(), 1);
    assert!(!connection.is_ready());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    connection.close(false).await;
    connection.close(true).await;
    connection.closed().await;
    connection.close(false).await;

    assert_eq!(peer.close_calls(), 1);
    assert_eq!(handler.closed_reasons().len(), 1);
}

#[tokio::test]
async fn test_send_after_close_is_rejected() {
    init_tracing();
    let (connection, _peer) = accept_default(RecordingHandler::new()).await;

    connection.close(true).await;
    connection.closed().await;

    assert!(matches!(
        connection.send("nope".to_string()).await,
        Err(ConnectionError::Closed)
    ));
}

#[tokio::test]
async fn test_close_with_reason_sends_close_frame() {
    init_tracing();
    let (connection, peer) = accept_default(RecordingHandler::new()).await;

    connection.close_with_reason("maintenance", true).await;
    connection.closed().await;

    assert_eq!(
        peer.close_frame(),
        Some(CloseFrame::closed_by_server("maintenance"))
    );
    assert_eq!(
        connection.metadata().server_trailer,
        Some(Bytes::from_static(b"maintenance"))
    );
}

#[tokio::test]
async fn test_handshake_rejection_tears_down_without_loops() {
    init_tracing();
    let handler = Arc::new(RecordingHandler {
        reject_connect: Some("bad token".to_string()),
        ..Default::default()
    });
    let (transport, peer) = mock_pair();
    peer.header(b"client-a");

    let err = Connection::accept(transport, handler.clone(), ConnectionConfig::default())
        .await
        .expect_err("handshake must fail");

    assert!(matches!(err, ConnectionError::Handshake(_)));
    assert_eq!(peer.close_calls(), 1);
    assert_eq!(peer.close_frame(), Some(CloseFrame::closed_by_server("bad token")));
    assert!(peer.sent().is_empty());
    assert_eq!(handler.events(), vec![Event::Connect]);
}

#[tokio::test]
async fn test_connected_failure_closes_immediately() {
    init_tracing();
    let handler = Arc::new(RecordingHandler {
        fail_connected: Some("quota exceeded".to_string()),
        ..Default::default()
    });
    let (transport, peer) = mock_pair();
    peer.header(b"client-a");

    let err = Connection::accept(transport, handler.clone(), ConnectionConfig::default())
        .await
        .expect_err("connected callback must fail");

    assert!(matches!(err, ConnectionError::Connected(_)));
    assert_eq!(peer.close_calls(), 1);
    assert_eq!(
        peer.close_frame(),
        Some(CloseFrame::closed_by_server("quota exceeded"))
    );
    assert_eq!(handler.closed_reasons().len(), 1);
}

#[tokio::test]
async fn test_peer_close_reports_trailer_to_client() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (transport, peer) = mock_pair();
    peer.header(b"server-b");
    let connection = Connection::connect(transport, handler.clone(), ConnectionConfig::default())
        .await
        .expect("connect");

    peer.end(Some(CloseFrame::closed_by_server("session expired")));
    connection.closed().await;

    let reasons = handler.closed_reasons();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].closed_by_peer());
    assert_eq!(
        connection.metadata().server_trailer,
        Some(Bytes::from_static(b"session expired"))
    );
    assert_eq!(peer.close_calls(), 1);
    // A clean end of stream is not an error.
    assert!(handler.errors().is_empty());
}

#[tokio::test]
async fn test_receive_callback_error_keeps_loop_running() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    peer.message("boom");
    peer.message("fine");
    eventually(|| handler.received() == vec!["fine"]).await;

    assert_eq!(handler.errors().len(), 1);
    assert!(handler.errors()[0].contains("cannot handle boom"));
    assert_eq!(connection.state(), ConnectionState::Active);
    assert_eq!(connection.metrics().callback_errors, 1);
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    init_tracing();
    let (connection, peer) = accept_default(RecordingHandler::new()).await;

    peer.ping(b"are-you-there");
    eventually(|| peer.sent().contains(&Sent::Pong(Bytes::from_static(b"are-you-there")))).await;

    let metrics = connection.metrics();
    assert_eq!(metrics.pings_received, 1);
    assert_eq!(metrics.pongs_sent, 1);
}

#[tokio::test]
async fn test_read_error_closes_and_reports() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    peer.fail("connection reset");
    connection.closed().await;

    assert_eq!(handler.closed_reasons()[0].initiator, CloseInitiator::Failure);
    assert!(handler.errors().iter().any(|e| e.contains("connection reset")));
}

#[tokio::test]
async fn test_write_error_closes_connection() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    peer.fail_writes();
    connection.send("doomed".to_string()).await.expect("queued");
    connection.closed().await;

    assert_eq!(handler.closed_reasons()[0].initiator, CloseInitiator::Failure);
    assert!(handler.errors().iter().any(|e| e.starts_with("write failed")));
    assert_eq!(peer.close_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_read_deadline_closes_idle_connection() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (transport, peer) = mock_pair();
    peer.header(b"client-a");
    let config = ConnectionConfig::default().with_keepalive(KeepaliveConfig {
        read_wait: Duration::from_millis(100),
        ..KeepaliveConfig::disabled()
    });
    let connection = Connection::accept(transport, handler.clone(), config)
        .await
        .expect("accept");

    connection.closed().await;

    assert_eq!(handler.closed_reasons()[0].initiator, CloseInitiator::Failure);
    assert!(handler.errors().iter().any(|e| e.starts_with("read failed")));
}

#[tokio::test]
async fn test_local_header_is_locked_after_connect() {
    init_tracing();
    let (connection, _peer) = accept_default(RecordingHandler::new()).await;
    assert!(matches!(
        connection.set_local_header(Bytes::from_static(b"late")),
        Err(ConnectionError::MetadataLocked)
    ));
}

#[tokio::test]
async fn test_broadcast_skips_closed_connections() {
    init_tracing();
    let mut connections = Vec::new();
    let mut peers = Vec::new();
    for _ in 0..3 {
        let (connection, peer) = accept_default(RecordingHandler::new()).await;
        connections.push(connection);
        peers.push(peer);
    }

    connections[1].close(true).await;
    connections[1].closed().await;

    let report = broadcast(b"hello all", &connections).await.expect("broadcast");
    assert_eq!(report.delivered, 2);
    assert_eq!(report.skipped, vec![connections[1].id()]);

    let expected = Sent::Prepared(Bytes::from_static(b"hello all"));
    eventually(|| peers[0].sent().contains(&expected) && peers[2].sent().contains(&expected))
        .await;
    assert!(!peers[1].sent().contains(&expected));
}

#[tokio::test]
async fn test_loop_panic_closes_and_propagates_through_join() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    peer.message("panic");
    let joined = tokio::spawn({
        let connection = connection.clone();
        async move { connection.join().await }
    })
    .await;

    assert!(joined.expect_err("panic must propagate").is_panic());
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(handler.closed_reasons().len(), 1);
    assert_eq!(peer.close_calls(), 1);
}

#[tokio::test]
async fn test_try_send_reports_full_queue() {
    init_tracing();
    let (transport, peer) = mock_pair();
    peer.header(b"client-a");
    let config = ConnectionConfig::default().with_send_queue_capacity(1);
    let connection = Connection::accept(transport, RecordingHandler::new(), config)
        .await
        .expect("accept");

    peer.pause_writes();
    // One message in flight plus one queued is the most a capacity of one holds.
    let results: Vec<_> = (0..3)
        .map(|n| connection.try_send(format!("t{n}")))
        .collect();
    assert!(matches!(results[2], Err(ConnectionError::QueueFull)));
    assert!(results[0].is_ok());

    peer.resume_writes();
    eventually(|| connection.pending() == 0).await;
}

#[tokio::test(start_paused = true)]
async fn test_close_frame_write_is_bounded_by_write_wait() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (transport, peer) = mock_pair();
    peer.header(b"client-a");
    let config = ConnectionConfig::default().with_keepalive(KeepaliveConfig {
        write_wait: Duration::from_millis(100),
        ..KeepaliveConfig::disabled()
    });
    let connection = Connection::accept(transport, handler.clone(), config)
        .await
        .expect("accept");

    peer.hang_close();
    connection.close_with_reason("bye", false).await;
    tokio::time::timeout(Duration::from_secs(5), connection.closed())
        .await
        .expect("teardown must not wait on a stuck close frame");

    assert_eq!(handler.closed_reasons().len(), 1);
    assert!(handler.closed_reasons()[0].closed_locally());
    assert!(
        handler
            .errors()
            .iter()
            .any(|e| e.starts_with("transport close failed"))
    );
}

#[tokio::test]
async fn test_abandoned_write_skips_close_frame() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (connection, peer) = accept_default(handler.clone()).await;

    peer.pause_writes();
    connection.send("half".to_string()).await.expect("send");
    eventually(|| peer.blocked_writes() > 0).await;

    connection.close_with_reason("bye", true).await;
    connection.closed().await;

    assert_eq!(peer.close_calls(), 1);
    assert_eq!(peer.close_frame(), None);
    assert_eq!(
        connection.metadata().server_trailer,
        Some(Bytes::from_static(b"bye"))
    );
    assert_eq!(handler.closed_reasons().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_client_header_times_out_accept() {
    init_tracing();
    let handler = RecordingHandler::new();
    let (transport, peer) = mock_pair();
    let config = ConnectionConfig::default().with_keepalive(KeepaliveConfig {
        read_wait: Duration::from_millis(100),
        ..KeepaliveConfig::disabled()
    });

    let err = Connection::accept(transport, handler.clone(), config)
        .await
        .expect_err("a silent client must not hold accept");

    assert!(matches!(
        err,
        ConnectionError::Transport(TransportError::Timeout(_))
    ));
    assert_eq!(peer.close_calls(), 1);
    assert!(handler.events().is_empty());
}
