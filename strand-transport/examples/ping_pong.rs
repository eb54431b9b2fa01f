//! Ping-Pong Example: request/reply over real TCP sockets.
//!
//! Run as two separate processes:
//!
//! ```bash
//! # Terminal 1 - Start the server
//! cargo run --example ping_pong -- server
//!
//! # Terminal 2 - Run the client
//! cargo run --example ping_pong -- client
//! ```
//!
//! # Architecture
//!
//! The example shows:
//! - `FramedTransport` over `TcpStream` with the JSON codec
//! - the header handshake (the client names itself, the server binds the name)
//! - replies matched to requests through a `Correlator`
//! - a `HealthMonitor` watching the client connection
//! - a `ConnectionRegistry` of live server-side connections

use std::env;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strand_transport::{
    CloseReason, Connection, ConnectionConfig, ConnectionHandler, ConnectionId,
    ConnectionRegistry, CorrelationId, Correlator, FramedTransport, HandlerError, HealthHandler,
    HealthMonitor, JsonCodec,
};
use tokio::net::{TcpListener, TcpStream};

// ============================================================================
// Configuration
// ============================================================================

const SERVER_ADDR: &str = "127.0.0.1:4500";

// ============================================================================
// Message Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
enum PingMessage {
    Ping {
        id: CorrelationId,
        seq: u32,
        message: String,
    },
    Pong {
        id: CorrelationId,
        seq: u32,
        echo: String,
    },
}

type Link = FramedTransport<TcpStream, JsonCodec, PingMessage, PingMessage>;

// ============================================================================
// Server
// ============================================================================

type ServerConnection = Connection<Link, PingServer>;

struct PingServer {
    live: Arc<ConnectionRegistry<ConnectionId, String>>,
}

impl ConnectionHandler<Link> for PingServer {
    type Bound = String;

    fn on_connect(&self, connection: &ServerConnection) -> Result<Option<String>, HandlerError> {
        let header = connection.metadata().client_header.unwrap_or_default();
        let name = String::from_utf8(header.to_vec())?;
        connection.set_local_header(Bytes::from_static(b"ping-server"))?;
        Ok(Some(name))
    }

    fn on_connected(&self, connection: &ServerConnection) -> Result<(), HandlerError> {
        let name = connection.bound_value().cloned().unwrap_or_default();
        self.live.register(connection.id(), name.clone());
        println!("[server] {} connected as {} ({} live)", connection.id(), name, self.live.len());
        Ok(())
    }

    fn on_receive(&self, connection: &ServerConnection, message: PingMessage) -> Result<(), HandlerError> {
        if let PingMessage::Ping { id, seq, message } = message {
            println!("[server] ping #{seq}: {message}");
            connection.try_send(PingMessage::Pong {
                id,
                seq,
                echo: format!("pong: {message}"),
            })?;
        }
        Ok(())
    }

    fn on_closed(&self, connection: &ServerConnection, reason: &CloseReason) {
        self.live.remove(&connection.id());
        println!("[server] {} closed ({:?})", connection.id(), reason.initiator);
    }
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(SERVER_ADDR).await?;
    println!("[server] listening on {SERVER_ADDR}");
    let handler = Arc::new(PingServer {
        live: Arc::new(ConnectionRegistry::new()),
    });

    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            let transport = Link::new(stream, JsonCodec);
            match Connection::accept(transport, handler, ConnectionConfig::local_network()).await {
                Ok(connection) => connection.closed().await,
                Err(err) => eprintln!("[server] rejected {peer}: {err}"),
            }
        });
    }
}

// ============================================================================
// Client
// ============================================================================

type ClientConnection = Connection<Link, PingClient>;

struct PingClient {
    replies: Correlator<(u32, String)>,
}

impl ConnectionHandler<Link> for PingClient {
    type Bound = ();

    fn on_connect(&self, connection: &ClientConnection) -> Result<Option<()>, HandlerError> {
        connection.set_local_header(Bytes::from_static(b"ping-client"))?;
        Ok(None)
    }

    fn on_receive(&self, _connection: &ClientConnection, message: PingMessage) -> Result<(), HandlerError> {
        if let PingMessage::Pong { id, seq, echo } = message {
            self.replies.set(&id, (seq, echo))?;
        }
        Ok(())
    }
}

struct PrintHealth;

impl HealthHandler for PrintHealth {
    fn on_connected(&self, reconnect: bool) {
        println!("[client] link up (reconnect: {reconnect})");
    }

    fn on_disconnected(&self, closed_by_user: bool) {
        println!("[client] link down (closed by user: {closed_by_user})");
    }
}

async fn run_client() -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(SERVER_ADDR).await?;
    let handler = Arc::new(PingClient {
        replies: Correlator::new(),
    });
    let connection =
        Connection::connect(Link::new(stream, JsonCodec), handler.clone(), ConnectionConfig::local_network())
            .await?;
    let health = HealthMonitor::spawn(connection.clone(), PrintHealth, Duration::from_millis(100))?;

    for seq in 1..=5 {
        let (echo_seq, echo) = handler
            .replies
            .call(Duration::from_secs(5), |id| {
                let connection = connection.clone();
                async move {
                    connection
                        .send(PingMessage::Ping {
                            id,
                            seq,
                            message: format!("hello #{seq}"),
                        })
                        .await
                }
            })
            .await?;
        println!("[client] reply #{echo_seq}: {echo}");
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    connection.close(false).await;
    connection.closed().await;
    health.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match env::args().nth(1).as_deref() {
        Some("server") => run_server().await,
        Some("client") => run_client().await,
        _ => {
            eprintln!("usage: ping_pong <server|client>");
            Ok(())
        }
    }
}
