//! Commands queued for the next batch tick.

use crate::diff::DiffOp;
use crate::session::SessionId;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Create,
    Edit,
    Remove,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Create => "CREATE",
            CommandKind::Edit => "EDIT",
            CommandKind::Remove => "REMOVE",
        };
        f.write_str(name)
    }
}

/// A pending operation on one file.
///
/// Immutable once enqueued: the queue stamps `enqueued_at` and hands the
/// command back out only when draining.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    kind: CommandKind,
    target: String,
    payload: Vec<DiffOp>,
    enqueued_at: u64,
    origin: Option<SessionId>,
}

impl Command {
    fn new(kind: CommandKind, target: impl Into<String>, payload: Vec<DiffOp>) -> Self {
        Self {
            kind,
            target: target.into(),
            payload,
            enqueued_at: 0,
            origin: None,
        }
    }

    pub fn create(target: impl Into<String>) -> Self {
        Self::new(CommandKind::Create, target, Vec::new())
    }

    pub fn edit(target: impl Into<String>, ops: Vec<DiffOp>) -> Self {
        Self::new(CommandKind::Edit, target, ops)
    }

    pub fn remove(target: impl Into<String>) -> Self {
        Self::new(CommandKind::Remove, target, Vec::new())
    }

    /// Attribute the command to a session, so its ack or error is routed back.
    pub fn from_session(mut self, session: SessionId) -> Self {
        self.origin = Some(session);
        self
    }

    pub(crate) fn stamp(mut self, seq: u64) -> Self {
        self.enqueued_at = seq;
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn payload(&self) -> &[DiffOp] {
        &self.payload
    }

    /// Logical enqueue order, starting at 1. Zero until enqueued.
    pub fn enqueued_at(&self) -> u64 {
        self.enqueued_at
    }

    pub fn origin(&self) -> Option<SessionId> {
        self.origin
    }
}
