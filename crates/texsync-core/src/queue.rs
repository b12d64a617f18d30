//! Append-only command queue, drained wholesale on every batch tick.

use crate::command::Command;
use std::collections::HashMap;
use std::sync::Mutex;

struct QueueState {
    commands: Vec<Command>,
    /// Sequence number handed to the next enqueued command
    next_seq: u64,
}

/// Ordered queue of pending commands.
///
/// Any session may enqueue; only the batch tick drains. Sequence numbers are
/// assigned under the same lock as the append, so sequence order is queue order.
pub struct CommandQueue {
    state: Mutex<QueueState>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                commands: Vec::new(),
                next_seq: 1,
            }),
        }
    }

    /// Append a command and return its sequence number. Never blocks on I/O.
    pub fn enqueue(&self, command: Command) -> u64 {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.commands.push(command.stamp(seq));
        seq
    }

    /// Take everything queued so far, in enqueue order.
    pub fn drain(&self) -> Vec<Command> {
        let mut state = self.state.lock().unwrap();
        std::mem::take(&mut state.commands)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Group drained commands by target filename.
///
/// Order within a group is enqueue order. Groups appear in the order their
/// file was first referenced; callers must not rely on cross-file order.
pub fn group_by_target(commands: Vec<Command>) -> Vec<(String, Vec<Command>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Command>)> = Vec::new();

    for command in commands {
        match index.get(command.target()) {
            Some(&i) => groups[i].1.push(command),
            None => {
                index.insert(command.target().to_string(), groups.len());
                groups.push((command.target().to_string(), vec![command]));
            }
        }
    }

    groups
}
