//! Individual client connection management.
//!
//! Each client connection wraps a WebSocket stream, handling the split
//! between read and write halves for async operation. Inbound frames go
//! straight to the connection's `Session`; everything the session's outbox
//! yields is written back as a text frame.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use texsync_core::protocol::Message as SyncMessage;
use texsync_core::session::{Session, SessionId};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// How long `close()` waits for queued outbound messages to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Event emitted by a connection or its upgrade task.
pub enum ConnectionEvent {
    /// WebSocket handshake finished; the server still has to open a session
    Upgraded {
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
    },
    /// Connection was closed by the client or by a transport error
    Closed { conn_id: String, session: SessionId },
}

impl fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upgraded { addr, .. } => f.debug_struct("Upgraded").field("addr", addr).finish(),
            Self::Closed { conn_id, session } => f
                .debug_struct("Closed")
                .field("conn_id", conn_id)
                .field("session", session)
                .finish(),
        }
    }
}

/// A single WebSocket connection to an editor client.
pub struct ClientConnection {
    /// Connection ID assigned by server (e.g., "conn-1")
    pub conn_id: String,
    pub session_id: SessionId,
    /// Write half of the WebSocket (wrapped for sharing across tasks)
    write: Arc<Mutex<WsSink>>,
    read_task: Option<JoinHandle<()>>,
    write_task: Option<JoinHandle<()>>,
}

impl ClientConnection {
    /// Create a new client connection from a WebSocket stream.
    ///
    /// Spawns a read task that feeds frames to `session`, and a write task
    /// that forwards the session's outbox to the client.
    pub fn new(
        conn_id: String,
        ws_stream: WebSocketStream<TcpStream>,
        session: Session,
        outbox: mpsc::UnboundedReceiver<SyncMessage>,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        let (write, read) = ws_stream.split();
        let write = Arc::new(Mutex::new(write));
        let session_id = session.id();

        let read_conn_id = conn_id.clone();
        let read_task = tokio::spawn(async move {
            Self::read_loop(read_conn_id, read, session, event_tx).await;
        });

        let write_conn_id = conn_id.clone();
        let write_half = Arc::clone(&write);
        let write_task = tokio::spawn(async move {
            Self::write_loop(write_conn_id, write_half, outbox).await;
        });

        Self {
            conn_id,
            session_id,
            write,
            read_task: Some(read_task),
            write_task: Some(write_task),
        }
    }

    /// Read loop that hands every data frame to the session.
    ///
    /// The session is owned by this task, so it is unregistered from the
    /// editor as soon as the loop ends.
    async fn read_loop(
        conn_id: String,
        mut read: SplitStream<WebSocketStream<TcpStream>>,
        session: Session,
        event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    ) {
        loop {
            match read.next().await {
                Some(Ok(msg)) => {
                    let data = match msg {
                        Message::Text(text) => text.into_bytes(),
                        Message::Binary(data) => data,
                        Message::Ping(_) | Message::Pong(_) => continue,
                        Message::Close(_) => {
                            debug!("Received close frame from {}", conn_id);
                            break;
                        }
                        Message::Frame(_) => continue,
                    };

                    debug!("Frame from {}: {} bytes", conn_id, data.len());
                    session.handle_frame(&data).await;
                }
                Some(Err(e)) => {
                    match e {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {
                            debug!("Connection {} closed", conn_id);
                        }
                        _ => {
                            error!("WebSocket error on {}: {}", conn_id, e);
                        }
                    }
                    break;
                }
                None => {
                    debug!("Connection {} stream ended", conn_id);
                    break;
                }
            }
        }

        let _ = event_tx.send(ConnectionEvent::Closed {
            conn_id: conn_id.clone(),
            session: session.id(),
        });
    }

    /// Write loop that serializes outbound messages as text frames.
    ///
    /// A bare `close` message is followed by a WebSocket close frame and ends
    /// the loop.
    async fn write_loop(
        conn_id: String,
        write: Arc<Mutex<WsSink>>,
        mut outbox: mpsc::UnboundedReceiver<SyncMessage>,
    ) {
        while let Some(msg) = outbox.recv().await {
            let closing = matches!(msg, SyncMessage::Close { target: None });

            let mut sink = write.lock().await;
            if let Err(e) = sink.send(Message::Text(msg.encode())).await {
                warn!("Failed to send {} to {}: {}", msg.type_name(), conn_id, e);
                break;
            }
            if closing {
                let _ = sink.send(Message::Close(None)).await;
                debug!("Sent close to {}", conn_id);
                break;
            }
        }
    }

    /// Close the connection gracefully.
    ///
    /// Waits briefly for the write task to flush anything already queued
    /// (including a server `close`), then tears down both tasks.
    pub async fn close(&mut self) {
        if let Some(task) = self.write_task.take() {
            if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
                debug!("Timed out draining {}", self.conn_id);
            }
        }

        if let Ok(mut write) = self.write.try_lock() {
            let _ = write.close().await;
        }

        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
        if let Some(task) = self.write_task.take() {
            task.abort();
        }
    }
}
