//! WebSocket server for accepting editor clients.
//!
//! Every accepted connection gets its own `Session` on the shared `Editor`.
//! The server only tracks connection lifecycle, surfaced as `ServerEvent`s
//! from `poll_event()`; message routing happens in the editor.

use crate::connection::{ClientConnection, ConnectionEvent};
use anyhow::Result;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use texsync_core::protocol::{MAX_MESSAGE_SIZE, Message};
use texsync_core::{Editor, Session, SessionId};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};

/// How long a client gets to finish the WebSocket handshake.
pub const UPGRADE_TIMEOUT: Duration = Duration::from_secs(10);

/// Event emitted by the server once a connection's lifecycle changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Handshake finished and a session is open
    Connected {
        conn_id: String,
        session: SessionId,
        addr: SocketAddr,
    },
    /// A connected client went away and its session was closed
    Disconnected { conn_id: String, session: SessionId },
}

/// WebSocket server managing client connections.
pub struct WebSocketServer {
    editor: Arc<Editor>,
    max_message_size: usize,
    /// Live connections indexed by conn_id
    connections: HashMap<String, ClientConnection>,
    /// Counter for generating connection IDs
    next_conn_id: u64,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl WebSocketServer {
    pub fn new(editor: Arc<Editor>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            editor,
            max_message_size: MAX_MESSAGE_SIZE,
            connections: HashMap::new(),
            next_conn_id: 1,
            event_tx,
            event_rx,
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("WebSocket server listening on {}", listen_addr);
        Ok(listener)
    }

    /// Handle a new incoming TCP connection.
    ///
    /// The WebSocket upgrade runs on its own task so a client that stalls
    /// mid-handshake never holds up the accept loop. A finished upgrade comes
    /// back through `poll_event()`, which opens the session.
    pub fn accept_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let event_tx = self.event_tx.clone();

        tokio::spawn(async move {
            let ws_stream = match timeout(UPGRADE_TIMEOUT, accept_async(stream)).await {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    // Health checks (like `nc -z`) connect and immediately close without
                    // completing the WebSocket handshake. Log these as debug, not error.
                    let err_str = e.to_string();
                    if err_str.contains("Handshake not finished")
                        || err_str.contains("Connection reset")
                        || err_str.contains("unexpected EOF")
                    {
                        debug!("Connection closed before upgrade from {}", addr);
                    } else {
                        error!("WebSocket upgrade failed for {}: {}", addr, e);
                    }
                    return;
                }
                Err(_) => {
                    warn!("WebSocket upgrade from {} timed out", addr);
                    return;
                }
            };

            let _ = event_tx.send(ConnectionEvent::Upgraded { ws_stream, addr });
        });
    }

    /// Wait for the next server event.
    ///
    /// Upgraded streams get a conn id and a session here; closed connections
    /// are dropped from the table.
    pub async fn poll_event(&mut self) -> Option<ServerEvent> {
        let event = self.event_rx.recv().await?;
        match event {
            ConnectionEvent::Upgraded { ws_stream, addr } => {
                let conn_id = format!("conn-{}", self.next_conn_id);
                self.next_conn_id += 1;

                let (session, outbox) = Session::open(Arc::clone(&self.editor));
                let session = session.with_max_message_size(self.max_message_size);
                let session_id = session.id();
                info!("New connection from {} ({}, {})", addr, conn_id, session_id);

                let conn = ClientConnection::new(
                    conn_id.clone(),
                    ws_stream,
                    session,
                    outbox,
                    self.event_tx.clone(),
                );
                self.connections.insert(conn_id.clone(), conn);

                Some(ServerEvent::Connected {
                    conn_id,
                    session: session_id,
                    addr,
                })
            }
            ConnectionEvent::Closed { conn_id, session } => {
                self.connections.remove(&conn_id);
                info!("Client disconnected: {} ({})", conn_id, session);
                Some(ServerEvent::Disconnected { conn_id, session })
            }
        }
    }

    /// Accept clients and clean up closed connections until `shutdown` resolves.
    ///
    /// Open connections are left alone; call `shutdown()` once pending
    /// edits have been flushed.
    pub async fn serve<F>(&mut self, listener: &TcpListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                // Accept new WebSocket connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            self.accept_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                // Open sessions for upgraded streams, clean up closed ones
                Some(_event) = self.poll_event() => {}

                _ = &mut shutdown => {
                    info!("Server no longer accepting connections");
                    break;
                }
            }
        }
    }

    /// Tell every client the channel is closing, then close all connections.
    pub async fn shutdown(&mut self) {
        self.editor.broadcast(&Message::Close { target: None });

        for (conn_id, mut conn) in self.connections.drain() {
            debug!("Closing {}", conn_id);
            conn.close().await;
        }
    }

    /// Get the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
