//! End-to-end tests for texsync-daemon.
//!
//! Runs the real server, batch ticker and on-disk storage, and drives it
//! with WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use texsync_core::{Editor, diff};
use texsync_daemon::{native_fs::NativeFs, server::WebSocketServer};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const TICK: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(5);

/// Test client that connects to the daemon.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{}", addr);
        let (ws, _) = connect_async(&url).await.expect("Failed to connect");
        Self { ws }
    }

    /// Send a JSON value as a text frame.
    async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .expect("Failed to send message");
    }

    /// Receive the next protocol message.
    async fn recv_json(&mut self) -> Value {
        let next = timeout(WAIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return text,
                    Some(Ok(Message::Binary(data))) => {
                        return String::from_utf8(data).expect("Binary frame is not UTF-8");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) => panic!("Connection closed unexpectedly"),
                    Some(Err(e)) => panic!("WebSocket error: {}", e),
                    None => panic!("Stream ended unexpectedly"),
                    _ => continue,
                }
            }
        })
        .await
        .expect("Timeout waiting for message");

        serde_json::from_str(&next).expect("Server sent invalid JSON")
    }

    /// Receive a message and check its type.
    async fn expect_type(&mut self, kind: &str) -> Value {
        let msg = self.recv_json().await;
        assert_eq!(msg["type"], kind, "unexpected message: {}", msg);
        msg
    }

    /// Assert nothing arrives for a few ticks.
    async fn expect_silence(&mut self) {
        let next = timeout(TICK * 4, self.ws.next()).await;
        assert!(next.is_err(), "expected no message, got {:?}", next);
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// A running daemon bound to a random port with storage in a temp dir.
struct TestDaemon {
    addr: SocketAddr,
    dir: TempDir,
    editor: Arc<Editor>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TestDaemon {
    async fn start() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let storage = NativeFs::open(dir.path())
            .await
            .expect("Failed to open storage root");
        let editor = Arc::new(Editor::new(Arc::new(storage)));
        let listener = WebSocketServer::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let (stop, stop_rx) = oneshot::channel::<()>();
        let task = {
            let editor = Arc::clone(&editor);
            tokio::spawn(async move {
                let (ticker_stop, ticker_rx) = oneshot::channel::<()>();
                let ticker = {
                    let editor = Arc::clone(&editor);
                    tokio::spawn(async move {
                        editor
                            .run(TICK, async {
                                let _ = ticker_rx.await;
                            })
                            .await;
                    })
                };

                let mut server = WebSocketServer::new(editor);
                server
                    .serve(&listener, async {
                        let _ = stop_rx.await;
                    })
                    .await;

                let _ = ticker_stop.send(());
                ticker.await.expect("Ticker panicked");
                server.shutdown().await;
            })
        };

        Self {
            addr,
            dir,
            editor,
            stop,
            task,
        }
    }

    fn read_file(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join(name)).ok()
    }

    async fn stop(self) -> TempDir {
        let _ = self.stop.send(());
        timeout(WAIT, self.task)
            .await
            .expect("Daemon did not stop")
            .expect("Daemon task panicked");
        self.dir
    }
}

fn edit(target: &str, old: &str, new: &str) -> Value {
    json!({
        "type": "edit",
        "target": target,
        "body": diff::compute(old, new),
    })
}

#[tokio::test]
async fn test_create_then_edit_persists_to_disk() {
    let daemon = TestDaemon::start().await;
    let mut client = TestClient::connect(daemon.addr).await;

    client.send_json(json!({"type": "create", "target": "x.txt"})).await;
    let ack = client.expect_type("ack").await;
    assert_eq!(ack["target"], "x.txt");
    assert_eq!(daemon.read_file("x.txt").as_deref(), Some(""));

    client.send_json(edit("x.txt", "", "hello")).await;
    let ack = client.expect_type("ack").await;
    assert_eq!(ack["body"]["revision"], 1);
    assert_eq!(daemon.read_file("x.txt").as_deref(), Some("hello"));

    client.close().await;
    daemon.stop().await;
}

#[tokio::test]
async fn test_stale_edit_reports_conflict_and_keeps_content() {
    let daemon = TestDaemon::start().await;
    let mut client = TestClient::connect(daemon.addr).await;

    client.send_json(edit("x.txt", "", "hello")).await;
    client.expect_type("ack").await;

    // Diff computed against a base the server no longer has
    client.send_json(edit("x.txt", "", "stale")).await;
    let err = client.expect_type("error").await;
    assert_eq!(err["body"]["kind"], "patch_conflict");
    assert_eq!(err["target"], "x.txt");

    // Channel is still usable and content is unchanged
    client.send_json(json!({"type": "fetch", "target": "x.txt"})).await;
    let content = client.expect_type("content").await;
    assert_eq!(content["body"]["text"], "hello");
    assert_eq!(daemon.read_file("x.txt").as_deref(), Some("hello"));

    client.close().await;
    daemon.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_is_answered_not_fatal() {
    let daemon = TestDaemon::start().await;
    let mut client = TestClient::connect(daemon.addr).await;

    client.send_text("this is not json").await;
    let err = client.expect_type("error").await;
    assert_eq!(err["body"]["kind"], "protocol_decode");

    client.send_json(json!({"type": "create", "target": "a.tex"})).await;
    client.expect_type("ack").await;

    client.close().await;
    daemon.stop().await;
}

#[tokio::test]
async fn test_path_traversal_is_rejected() {
    let daemon = TestDaemon::start().await;
    let mut client = TestClient::connect(daemon.addr).await;

    client
        .send_json(json!({"type": "create", "target": "../outside.tex"}))
        .await;
    let err = client.expect_type("error").await;
    assert_eq!(err["body"]["kind"], "invalid_path");
    assert!(daemon.editor.registry().is_empty());

    client.close().await;
    let dir = daemon.stop().await;
    assert!(!dir.path().parent().unwrap().join("outside.tex").exists());
}

#[tokio::test]
async fn test_edits_are_relayed_to_other_subscribers() {
    let daemon = TestDaemon::start().await;
    let mut alice = TestClient::connect(daemon.addr).await;
    let mut bob = TestClient::connect(daemon.addr).await;

    bob.send_json(json!({"type": "fetch", "target": "doc.tex"})).await;
    let content = bob.expect_type("content").await;
    assert_eq!(content["body"]["text"], "");

    alice.send_json(edit("doc.tex", "", "\\section{Intro}")).await;
    alice.expect_type("ack").await;

    let relay = bob.expect_type("edit").await;
    assert_eq!(relay["target"], "doc.tex");
    let ops: Vec<diff::DiffOp> = serde_json::from_value(relay["body"].clone()).unwrap();
    assert_eq!(diff::apply("", &ops).unwrap(), "\\section{Intro}");

    // The author does not get its own edit back
    alice.expect_silence().await;

    alice.close().await;
    bob.close().await;
    daemon.stop().await;
}

#[tokio::test]
async fn test_fetch_existing_file() {
    let daemon = TestDaemon::start().await;
    std::fs::create_dir_all(daemon.dir.path().join("chapters")).unwrap();
    std::fs::write(daemon.dir.path().join("chapters/one.tex"), "Once upon").unwrap();

    let mut client = TestClient::connect(daemon.addr).await;
    client
        .send_json(json!({"type": "fetch", "target": "chapters/one.tex"}))
        .await;
    let content = client.expect_type("content").await;
    assert_eq!(content["body"]["text"], "Once upon");
    assert_eq!(content["body"]["revision"], 0);

    client.close().await;
    daemon.stop().await;
}

#[tokio::test]
async fn test_shutdown_flushes_and_sends_close() {
    let daemon = TestDaemon::start().await;
    let mut client = TestClient::connect(daemon.addr).await;

    client.send_json(json!({"type": "create", "target": "a.tex"})).await;
    client.expect_type("ack").await;

    client.send_json(edit("a.tex", "", "last words")).await;
    let editor = Arc::clone(&daemon.editor);
    timeout(WAIT, async {
        while editor.queue().is_empty() && daemon.read_file("a.tex").as_deref() != Some("last words")
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Edit never reached the daemon");

    let dir = daemon.stop().await;

    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.tex")).unwrap(),
        "last words"
    );
    assert!(editor.queue().is_empty());

    // Ack from whichever tick applied the edit, then the server's close
    client.expect_type("ack").await;
    let close = client.expect_type("close").await;
    assert!(close.get("target").is_none());
}

#[tokio::test]
async fn test_disconnect_unregisters_session() {
    let daemon = TestDaemon::start().await;
    let client = TestClient::connect(daemon.addr).await;

    timeout(WAIT, async {
        while daemon.editor.session_count() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Session never registered");

    client.close().await;

    timeout(WAIT, async {
        while daemon.editor.session_count() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Session never unregistered");

    daemon.stop().await;
}

#[tokio::test]
async fn test_stalled_handshake_does_not_block_other_clients() {
    let daemon = TestDaemon::start().await;

    // Connects at the TCP level but never sends the upgrade request
    let stalled = TcpStream::connect(daemon.addr)
        .await
        .expect("Failed to open raw connection");

    let mut client = timeout(Duration::from_secs(2), TestClient::connect(daemon.addr))
        .await
        .expect("Second client could not connect while another handshake was pending");

    client.send_json(json!({"type": "create", "target": "a.tex"})).await;
    client.expect_type("ack").await;

    drop(stalled);
    client.close().await;
    daemon.stop().await;
}
