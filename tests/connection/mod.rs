//! Async driver integration tests over in-memory transports

mod lifecycle;
mod negotiation;

use h2_engine::{Connection, HeaderField, Result, SessionConfig, SessionHandle};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// Route engine logs to the test writer; `RUST_LOG` selects the level.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn request(path: &str) -> Vec<HeaderField> {
    vec![
        HeaderField::new(":method", "POST"),
        HeaderField::new(":scheme", "http"),
        HeaderField::new(":path", path),
        HeaderField::new(":authority", "localhost"),
    ]
}

pub fn response(status: &str) -> Vec<HeaderField> {
    vec![HeaderField::new(":status", status)]
}

/// Both ends of a running connection.
pub struct Pair {
    pub client: SessionHandle,
    pub server: SessionHandle,
    pub client_task: JoinHandle<Result<()>>,
    pub server_task: JoinHandle<Result<()>>,
}

pub fn connect_with(client: SessionConfig, server: SessionConfig) -> Pair {
    init_test_logging();
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (client, client_conn) = Connection::client(client_io, client);
    let (server, server_conn) = Connection::server(server_io, server);
    Pair {
        client,
        server,
        client_task: tokio::spawn(client_conn.run()),
        server_task: tokio::spawn(server_conn.run()),
    }
}

pub fn connect() -> Pair {
    connect_with(SessionConfig::client(), SessionConfig::server())
}

pub async fn read_body(stream: &mut h2_engine::StreamHandle) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(chunk) = stream.data().await {
        body.extend_from_slice(&chunk.unwrap());
    }
    body
}
