//! Editor: the process-wide service object tying storage, registry, command
//! queue and connected sessions together.
//!
//! There is exactly one `Editor` per process. It is created at startup,
//! shared with every session through an `Arc`, and lives until shutdown.
//! Sessions only ever enqueue; the batch tick is the single consumer that
//! applies queued commands to file entities and schedules commits.

use crate::command::{Command, CommandKind};
use crate::error::{Result, SyncError};
use crate::file::FileStatus;
use crate::fs::FileSystem;
use crate::protocol::Message;
use crate::queue::{CommandQueue, group_by_target};
use crate::registry::{FileHandle, FileRegistry};
use crate::session::SessionId;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default interval between batch ticks.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(2500);

/// A command the tick applied successfully.
#[derive(Debug)]
pub struct AppliedCommand {
    pub command: Command,
    /// File revision right after the command ran
    pub revision: u64,
}

/// A command the tick rejected.
#[derive(Debug)]
pub struct FailedCommand {
    pub command: Command,
    pub error: SyncError,
}

/// Outcome of one batch tick (or flush).
#[derive(Debug, Default)]
pub struct BatchReport {
    pub applied: Vec<AppliedCommand>,
    pub failed: Vec<FailedCommand>,
    /// Files persisted during this batch
    pub committed: Vec<String>,
    /// Commits that failed; the files stay `Modified` and are retried next tick
    pub commit_failures: Vec<SyncError>,
    /// Clean files nobody subscribes to any more, dropped from memory
    pub evicted: Vec<String>,
}

impl BatchReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
            && self.failed.is_empty()
            && self.committed.is_empty()
            && self.commit_failures.is_empty()
            && self.evicted.is_empty()
    }
}

/// Per-session routing state.
struct SessionEntry {
    outbox: mpsc::UnboundedSender<Message>,
    /// Files whose applied edits are relayed to this session
    subscriptions: HashSet<String>,
}

/// The synchronization service.
pub struct Editor {
    fs: Arc<dyn FileSystem>,
    registry: FileRegistry,
    queue: CommandQueue,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    next_session_id: AtomicU64,
    /// Files that lost a subscriber since the last tick
    idle_candidates: Mutex<HashSet<String>>,
}

impl Editor {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            registry: FileRegistry::new(),
            queue: CommandQueue::new(),
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            idle_candidates: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Queue a command for the next tick. Returns its sequence number.
    pub fn enqueue(&self, command: Command) -> u64 {
        let target = command.target().to_string();
        let kind = command.kind();
        let seq = self.queue.enqueue(command);
        debug!("Queued {} {} (seq {})", kind, target, seq);
        seq
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Register a new session and return its id and outbound message stream.
    pub fn open_session(&self) -> (SessionId, mpsc::UnboundedReceiver<Message>) {
        let id = SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let (outbox, rx) = mpsc::unbounded_channel();

        let mut sessions = self.sessions.lock().unwrap();
        sessions.insert(
            id,
            SessionEntry {
                outbox,
                subscriptions: HashSet::new(),
            },
        );
        info!("Opened {} ({} active)", id, sessions.len());
        (id, rx)
    }

    /// Forget a session. Commands it already queued stay queued.
    ///
    /// Its subscriptions become eviction candidates for the next tick.
    pub fn close_session(&self, id: SessionId) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.remove(&id) {
            info!("Closed {} ({} active)", id, sessions.len());
            drop(sessions);
            self.idle_candidates
                .lock()
                .unwrap()
                .extend(entry.subscriptions);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Send a message to one session. Returns false if it is gone.
    pub fn send(&self, id: SessionId, message: Message) -> bool {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&id) {
            Some(entry) => entry.outbox.send(message).is_ok(),
            None => false,
        }
    }

    /// Send a message to every session.
    pub fn broadcast(&self, message: &Message) {
        let sessions = self.sessions.lock().unwrap();
        for (id, entry) in sessions.iter() {
            if entry.outbox.send(message.clone()).is_err() {
                debug!("Outbox for {} is closed", id);
            }
        }
    }

    pub fn subscribe(&self, id: SessionId, filename: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(entry) = sessions.get_mut(&id) {
            entry.subscriptions.insert(filename.to_string());
        }
    }

    pub fn unsubscribe(&self, id: SessionId, filename: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        let removed = sessions
            .get_mut(&id)
            .is_some_and(|entry| entry.subscriptions.remove(filename));
        drop(sessions);
        if removed {
            self.idle_candidates
                .lock()
                .unwrap()
                .insert(filename.to_string());
        }
    }

    fn has_subscribers(&self, filename: &str) -> bool {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .values()
            .any(|entry| entry.subscriptions.contains(filename))
    }

    // ========================================================================
    // Direct file access
    // ========================================================================

    /// Current content and revision of a file, staging it if needed.
    pub async fn fetch(&self, filename: &str) -> Result<(String, u64)> {
        let handle = self.registry.resolve(filename);
        let mut file = handle.lock().await;
        file.stage(self.fs.as_ref()).await?;
        Ok((file.read()?.to_string(), file.revision()))
    }

    /// Content of every open file, sorted by filename.
    pub async fn snapshot(&self) -> Vec<(String, String)> {
        let mut files = Vec::new();
        for (name, handle) in self.registry.handles() {
            let file = handle.lock().await;
            if let Ok(content) = file.read() {
                files.push((name, content.to_string()));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files
    }

    // ========================================================================
    // Batch processing
    // ========================================================================

    /// Drain the queue, apply every command, commit modified files, then
    /// evict clean files nobody subscribes to.
    ///
    /// Commands for the same file run in enqueue order. A failing command is
    /// reported and skipped; it never aborts the rest of the batch.
    pub async fn tick(&self) -> BatchReport {
        let commands = self.queue.drain();
        let mut report = BatchReport::default();

        for (target, group) in group_by_target(commands) {
            debug!("Processing {} command(s) for {}", group.len(), target);
            for command in group {
                match self.apply(&command, &mut report).await {
                    Ok(revision) => report.applied.push(AppliedCommand { command, revision }),
                    Err(error) => {
                        warn!(
                            "{} {} (seq {}) failed: {}",
                            command.kind(),
                            command.target(),
                            command.enqueued_at(),
                            error
                        );
                        report.failed.push(FailedCommand { command, error });
                    }
                }
            }
        }

        self.commit_modified(&mut report).await;
        self.evict_idle(&mut report).await;

        if !report.is_empty() {
            info!(
                "Batch: {} applied, {} failed, {} committed, {} commit failure(s), {} evicted",
                report.applied.len(),
                report.failed.len(),
                report.committed.len(),
                report.commit_failures.len(),
                report.evicted.len()
            );
        }

        self.dispatch(&report);
        report
    }

    async fn apply(&self, command: &Command, report: &mut BatchReport) -> Result<u64> {
        match command.kind() {
            CommandKind::Create => {
                let handle = self.registry.resolve(command.target());
                let mut file = handle.lock().await;
                file.stage(self.fs.as_ref()).await?;
                Ok(file.revision())
            }
            CommandKind::Edit => {
                let handle = self.registry.resolve(command.target());
                let mut file = handle.lock().await;
                // Edits on a closed file stage it first instead of failing
                file.stage(self.fs.as_ref()).await?;
                file.edit(command.payload().to_vec())?;
                Ok(file.revision())
            }
            CommandKind::Remove => self.remove(command.target(), report).await,
        }
    }

    /// Unlist a file, committing pending edits first so nothing is dropped.
    async fn remove(&self, filename: &str, report: &mut BatchReport) -> Result<u64> {
        let Some(handle) = self.registry.get(filename) else {
            return Ok(0);
        };

        let mut file = handle.lock().await;
        if file.status() == FileStatus::Modified {
            file.commit(self.fs.as_ref()).await?;
            report.committed.push(filename.to_string());
        }

        self.registry.remove(filename);
        Ok(file.revision())
    }

    async fn commit_modified(&self, report: &mut BatchReport) {
        let mut handles: Vec<(String, FileHandle)> = self.registry.handles();
        handles.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, handle) in handles {
            let mut file = handle.lock().await;
            if file.status() != FileStatus::Modified {
                continue;
            }
            match file.commit(self.fs.as_ref()).await {
                Ok(_) => report.committed.push(name),
                Err(e) => {
                    warn!("Commit failed, will retry next tick: {}", e);
                    report.commit_failures.push(e);
                }
            }
        }
    }

    /// Close and unlist candidates that no session subscribes to.
    ///
    /// Files still `Modified` (their commit failed this tick) stay registered
    /// and are tried again next tick.
    async fn evict_idle(&self, report: &mut BatchReport) {
        let mut candidates: Vec<String> = self.idle_candidates.lock().unwrap().drain().collect();
        candidates.sort();

        let mut retry = Vec::new();
        for name in candidates {
            if self.has_subscribers(&name) {
                continue;
            }
            let Some(handle) = self.registry.get(&name) else {
                continue;
            };

            let mut file = handle.lock().await;
            if file.status() == FileStatus::Modified {
                retry.push(name);
                continue;
            }
            file.close();
            self.registry.remove(&name);
            debug!("Evicted idle file {}", name);
            report.evicted.push(name);
        }

        if !retry.is_empty() {
            self.idle_candidates.lock().unwrap().extend(retry);
        }
    }

    /// Route acks and errors to originating sessions and relay applied edits
    /// to other subscribers of the same file.
    fn dispatch(&self, report: &BatchReport) {
        let sessions = self.sessions.lock().unwrap();

        for applied in &report.applied {
            let command = &applied.command;

            if let Some(entry) = command.origin().and_then(|id| sessions.get(&id)) {
                let ack = Message::ack(command.target(), command.enqueued_at(), applied.revision);
                let _ = entry.outbox.send(ack);
            }

            if command.kind() != CommandKind::Edit {
                continue;
            }
            for (id, entry) in sessions.iter() {
                if Some(*id) == command.origin() || !entry.subscriptions.contains(command.target()) {
                    continue;
                }
                let relay = Message::Edit {
                    target: command.target().to_string(),
                    body: command.payload().to_vec(),
                };
                let _ = entry.outbox.send(relay);
            }
        }

        for failed in &report.failed {
            if let Some(entry) = failed.command.origin().and_then(|id| sessions.get(&id)) {
                let _ = entry.outbox.send(Message::error(&failed.error));
            }
        }
    }

    /// Commit every modified file. Called on graceful shutdown.
    pub async fn flush(&self) -> BatchReport {
        let mut report = BatchReport::default();
        self.commit_modified(&mut report).await;
        info!(
            "Flushed {} file(s), {} failure(s)",
            report.committed.len(),
            report.commit_failures.len()
        );
        report
    }

    /// Run batch ticks every `period` until `shutdown` resolves, then process
    /// whatever is still queued and flush.
    pub async fn run<F>(&self, period: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = &mut shutdown => {
                    info!("Batch loop stopping");
                    break;
                }
            }
        }

        self.tick().await;
        self.flush().await;
    }
}
