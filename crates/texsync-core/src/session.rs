//! Per-client session: turns inbound frames into queued commands or replies.
//!
//! A session is transport-agnostic. The daemon feeds it raw frames and
//! forwards whatever shows up on the outbound receiver.

use crate::command::Command;
use crate::editor::Editor;
use crate::error::SyncError;
use crate::path::validate_filename;
use crate::protocol::{self, MAX_MESSAGE_SIZE, Message};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifies a connected session for routing replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

pub struct Session {
    id: SessionId,
    editor: Arc<Editor>,
    max_message_size: usize,
}

impl Session {
    /// Register a session with the editor.
    ///
    /// The receiver yields every message addressed to this session: replies,
    /// acks, errors and relayed edits.
    pub fn open(editor: Arc<Editor>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (id, rx) = editor.open_session();
        let session = Self {
            id,
            editor,
            max_message_size: MAX_MESSAGE_SIZE,
        };
        (session, rx)
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Handle one inbound frame.
    ///
    /// Never fails: malformed input is answered with an `error` message and
    /// the session stays usable.
    pub async fn handle_frame(&self, data: &[u8]) {
        let message = match protocol::decode(data, self.max_message_size) {
            Ok(message) => message,
            Err(e) => {
                warn!("{}: rejecting frame: {}", self.id, e);
                self.reply_error(&SyncError::ProtocolDecode(e.to_string()));
                return;
            }
        };

        debug!("{}: received {}", self.id, message.type_name());
        self.handle_message(message).await;
    }

    pub async fn handle_message(&self, message: Message) {
        match message {
            Message::Create { target } => {
                if let Some(name) = self.submit(&target, Command::create) {
                    self.editor.subscribe(self.id, &name);
                }
            }
            Message::Edit { target, body } => {
                if let Some(name) = self.submit(&target, |name| Command::edit(name, body)) {
                    self.editor.subscribe(self.id, &name);
                }
            }
            Message::Remove { target } => {
                if let Some(name) = self.submit(&target, Command::remove) {
                    self.editor.unsubscribe(self.id, &name);
                }
            }
            Message::Fetch { target } => self.fetch(&target).await,
            Message::Close { target: Some(target) } => {
                if let Ok(name) = validate_filename(&target) {
                    self.editor.unsubscribe(self.id, &name);
                }
            }
            Message::Close { target: None } => {
                debug!("{}: client announced close", self.id);
            }
            other @ (Message::Ack { .. } | Message::Content { .. } | Message::Error { .. }) => {
                self.reply_error(&SyncError::ProtocolDecode(format!(
                    "'{}' messages are only sent by the server",
                    other.type_name()
                )));
            }
        }
    }

    /// Validate `target`, replying `invalid_path` if it is unusable.
    fn checked_name(&self, target: &str) -> Option<String> {
        match validate_filename(target) {
            Ok(name) => Some(name),
            Err(source) => {
                self.reply_error(&SyncError::InvalidPath {
                    filename: target.to_string(),
                    source,
                });
                None
            }
        }
    }

    /// Queue a command for a validated target. Returns the normalized name.
    fn submit(&self, target: &str, build: impl FnOnce(String) -> Command) -> Option<String> {
        let name = self.checked_name(target)?;
        self.editor.enqueue(build(name.clone()).from_session(self.id));
        Some(name)
    }

    async fn fetch(&self, target: &str) {
        let Some(name) = self.checked_name(target) else {
            return;
        };

        match self.editor.fetch(&name).await {
            Ok((text, revision)) => {
                self.editor.subscribe(self.id, &name);
                self.editor.send(self.id, Message::content(name, text, revision));
            }
            Err(e) => self.reply_error(&e),
        }
    }

    fn reply_error(&self, err: &SyncError) {
        self.editor.send(self.id, Message::error(err));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.editor.close_session(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffOp;
    use crate::fs::{FileSystem, InMemoryFs};

    fn setup() -> (Arc<Editor>, Arc<InMemoryFs>) {
        let fs = Arc::new(InMemoryFs::new());
        (Arc::new(Editor::new(fs.clone())), fs)
    }

    fn expect_error(rx: &mut mpsc::UnboundedReceiver<Message>, kind: &str) {
        match rx.try_recv().unwrap() {
            Message::Error { body, .. } => assert_eq!(body.kind, kind),
            other => panic!("expected {} error, got {:?}", kind, other),
        }
    }

    #[tokio::test]
    async fn test_edit_frame_is_queued_and_acked() {
        let (editor, fs) = setup();
        let (session, mut rx) = Session::open(editor.clone());

        session
            .handle_frame(br#"{"type":"edit","target":"x.txt","body":[{"op":"insert","position":0,"text":"hi"}]}"#)
            .await;
        assert_eq!(editor.queue().len(), 1);
        assert!(rx.try_recv().is_err());

        editor.tick().await;
        assert_eq!(rx.try_recv().unwrap(), Message::ack("x.txt", 1, 1));
        assert_eq!(fs.contents("x.txt").as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session_open() {
        let (editor, _fs) = setup();
        let (session, mut rx) = Session::open(editor.clone());

        session.handle_frame(b"{not json").await;
        expect_error(&mut rx, "protocol_decode");

        session.handle_frame(br#"{"type":"rename","target":"a"}"#).await;
        expect_error(&mut rx, "protocol_decode");

        session.handle_frame(br#"{"type":"create","target":"a.tex"}"#).await;
        assert_eq!(editor.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (editor, _fs) = setup();
        let (session, mut rx) = Session::open(editor.clone());
        let session = session.with_max_message_size(16);

        session
            .handle_frame(br#"{"type":"create","target":"a-very-long-name.tex"}"#)
            .await;
        expect_error(&mut rx, "protocol_decode");
        assert!(editor.queue().is_empty());
    }

    #[tokio::test]
    async fn test_traversal_target_is_rejected_before_queueing() {
        let (editor, _fs) = setup();
        let (session, mut rx) = Session::open(editor.clone());

        session
            .handle_message(Message::Create {
                target: "../etc/passwd".into(),
            })
            .await;
        expect_error(&mut rx, "invalid_path");
        assert!(editor.queue().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_replies_with_content() {
        let (editor, fs) = setup();
        fs.write("doc.tex", "\\section{A}").await.unwrap();
        let (session, mut rx) = Session::open(editor.clone());

        session
            .handle_message(Message::Fetch {
                target: "/doc.tex".into(),
            })
            .await;
        assert_eq!(
            rx.try_recv().unwrap(),
            Message::content("doc.tex", "\\section{A}", 0)
        );
    }

    #[tokio::test]
    async fn test_server_only_types_are_rejected() {
        let (editor, _fs) = setup();
        let (session, mut rx) = Session::open(editor.clone());

        session.handle_message(Message::ack("a.tex", 1, 1)).await;
        expect_error(&mut rx, "protocol_decode");
        assert!(editor.queue().is_empty());
    }

    #[tokio::test]
    async fn test_close_target_stops_relays() {
        let (editor, _fs) = setup();
        let (writer, _writer_rx) = Session::open(editor.clone());
        let (reader, mut reader_rx) = Session::open(editor.clone());

        reader
            .handle_message(Message::Create {
                target: "a.tex".into(),
            })
            .await;
        editor.tick().await;
        assert!(matches!(reader_rx.try_recv(), Ok(Message::Ack { .. })));

        reader
            .handle_message(Message::Close {
                target: Some("a.tex".into()),
            })
            .await;
        writer
            .handle_message(Message::Edit {
                target: "a.tex".into(),
                body: vec![DiffOp::insert(0, "x")],
            })
            .await;
        editor.tick().await;
        assert!(reader_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_unregisters_session() {
        let (editor, _fs) = setup();
        let (session, _rx) = Session::open(editor.clone());
        assert_eq!(editor.session_count(), 1);
        drop(session);
        assert_eq!(editor.session_count(), 0);
    }
}
