//! Typed message envelope.
//!
//! Wire format: `{"type":"edit","target":"main.tex","body":[...]}`. The
//! `type` discriminator selects the variant; `body` is type-specific.

use crate::diff::DiffOp;
use crate::error::SyncError;
use serde::{Deserialize, Serialize};

/// Acknowledges that a queued command was applied by a batch tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckBody {
    /// Sequence number the command was enqueued under
    pub seq: u64,
    /// File revision after the command was applied
    pub revision: u64,
}

/// Current content of a file, sent in reply to `fetch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBody {
    pub text: String,
    pub revision: u64,
}

/// Error report, `{ kind, message }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// One protocol message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Client: create (stage) a file
    Create { target: String },
    /// Client: apply a diff. Server: relay of a diff applied by another client
    Edit { target: String, body: Vec<DiffOp> },
    /// Client: unlist a file (backing storage is kept)
    Remove { target: String },
    /// Client: request current content
    Fetch { target: String },
    /// Client: stop receiving relays for `target`. Server: channel is closing
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// Server: command applied
    Ack { target: String, body: AckBody },
    /// Server: reply to `fetch`
    Content { target: String, body: ContentBody },
    /// Server: something went wrong
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        body: ErrorBody,
    },
}

impl Message {
    /// Wire name of this message's type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Create { .. } => "create",
            Message::Edit { .. } => "edit",
            Message::Remove { .. } => "remove",
            Message::Fetch { .. } => "fetch",
            Message::Close { .. } => "close",
            Message::Ack { .. } => "ack",
            Message::Content { .. } => "content",
            Message::Error { .. } => "error",
        }
    }

    /// Filename this message refers to, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            Message::Create { target }
            | Message::Edit { target, .. }
            | Message::Remove { target }
            | Message::Fetch { target }
            | Message::Ack { target, .. }
            | Message::Content { target, .. } => Some(target),
            Message::Close { target } | Message::Error { target, .. } => target.as_deref(),
        }
    }

    pub fn ack(target: impl Into<String>, seq: u64, revision: u64) -> Self {
        Message::Ack {
            target: target.into(),
            body: AckBody { seq, revision },
        }
    }

    pub fn content(target: impl Into<String>, text: impl Into<String>, revision: u64) -> Self {
        Message::Content {
            target: target.into(),
            body: ContentBody {
                text: text.into(),
                revision,
            },
        }
    }

    /// Build an `error` message from a core error.
    pub fn error(err: &SyncError) -> Self {
        Message::Error {
            target: err.filename().map(str::to_string),
            body: ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }

    /// Serialize to JSON text.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("Message serialization should not fail")
    }
}
