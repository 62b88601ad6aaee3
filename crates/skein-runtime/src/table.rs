//! Process table: identity allocation, spawning, termination.
//!
//! The table owns every live process on the node. Local indexes come from
//! an atomic counter and are never reused. A terminated process's entry
//! lingers for a grace window with its mailbox closed, so late-arriving
//! mail is discarded rather than misdelivered, then the entry is removed.

use crate::error::SendError;
use crate::mailbox::Mailbox;
use crate::process::ProcessHandle;
use dashmap::DashMap;
use futures::FutureExt;
use skein_core::{Envelope, ExitNotice, ExitReason, NodeId, Pid};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// How long a terminated entry lingers, discarding late mail.
const DEFAULT_GRACE: Duration = Duration::from_millis(500);

struct TableInner {
    node: NodeId,
    next_index: AtomicU64,
    entries: DashMap<u64, ProcessHandle>,
    grace: Duration,
}

/// The node's table of live processes. Cheap to clone.
#[derive(Clone)]
pub struct ProcessTable {
    inner: Arc<TableInner>,
}

impl ProcessTable {
    /// Creates a table for processes owned by `node`.
    pub fn new(node: NodeId) -> Self {
        Self::with_grace(node, DEFAULT_GRACE)
    }

    /// Creates a table with an explicit termination grace window.
    pub fn with_grace(node: NodeId, grace: Duration) -> Self {
        Self {
            inner: Arc::new(TableInner {
                node,
                next_index: AtomicU64::new(0),
                entries: DashMap::new(),
                grace,
            }),
        }
    }

    /// Returns the owning node.
    pub fn node(&self) -> &NodeId {
        &self.inner.node
    }

    /// Spawns a process.
    ///
    /// `make` is handed the freshly allocated pid and the consumer half
    /// of the new mailbox, and returns the body future. The entry is
    /// registered before the body is scheduled, so the pid is a valid
    /// send target from the moment this returns (and from the moment the
    /// body observes it).
    pub fn spawn<F, Fut>(&self, make: F) -> Pid
    where
        F: FnOnce(Pid, Mailbox) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let index = self.inner.next_index.fetch_add(1, Ordering::Relaxed) + 1;
        let pid = Pid::new(self.inner.node.clone(), index);
        let (mailbox, sender) = Mailbox::new();
        let handle = ProcessHandle::new(pid.clone(), sender);
        self.inner.entries.insert(index, handle.clone());

        let body = make(pid.clone(), mailbox);
        let table = self.clone();
        let join = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(body).catch_unwind().await;
            let reason = match outcome {
                Ok(()) => ExitReason::Normal,
                Err(panic) => ExitReason::Failure(panic_message(panic)),
            };
            table.finish(index, reason);
        });
        handle.bind_task(join);

        tracing::trace!(pid = %pid, "spawned process");
        pid
    }

    /// Delivers an envelope to a local process.
    ///
    /// Errors mean "not delivered" (no such process, or terminated); the
    /// send router downgrades them to a logged drop.
    pub fn deliver(&self, index: u64, env: Envelope) -> Result<(), SendError> {
        match self.inner.entries.get(&index) {
            Some(handle) => handle.send_raw(env),
            None => Err(SendError::NotFound(Pid::new(
                self.inner.node.clone(),
                index,
            ))),
        }
    }

    /// Looks up a process handle.
    pub fn get(&self, index: u64) -> Option<ProcessHandle> {
        self.inner.entries.get(&index).map(|r| r.value().clone())
    }

    /// Registers `watcher` for a termination notice from process `index`.
    ///
    /// If the target is already gone the notice is delivered immediately.
    pub fn watch(&self, watcher: Pid, index: u64) {
        let target = Pid::new(self.inner.node.clone(), index);
        let immediate = match self.inner.entries.get(&index) {
            Some(handle) => match handle.add_watcher(watcher.clone()) {
                Ok(()) => None,
                Err(reason) => Some(reason),
            },
            None => Some(ExitReason::Failure("no such process".into())),
        };
        if let Some(reason) = immediate {
            self.notify_watcher(&watcher, target, reason);
        }
    }

    /// Links two local processes: each watches the other.
    pub fn link(&self, a: &Pid, b: &Pid) {
        self.watch(a.clone(), b.index());
        self.watch(b.clone(), a.index());
    }

    /// Terminates a process from outside, cancelling its pending
    /// receives and sends.
    pub fn kill(&self, index: u64, reason: ExitReason) {
        if let Some(handle) = self.get(index) {
            handle.abort_body();
            self.finish(index, reason);
        }
    }

    /// Number of live entries (including lingering terminated ones).
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Returns `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Pids of all entries.
    pub fn pids(&self) -> Vec<Pid> {
        self.inner
            .entries
            .iter()
            .map(|r| r.value().pid().clone())
            .collect()
    }

    /// Takes the join handle of a process, for callers that want to wait
    /// for its body to return.
    pub fn take_join(&self, index: u64) -> Option<tokio::task::JoinHandle<()>> {
        self.get(index).and_then(|h| h.take_join())
    }

    /// Waits until every live process has drained its mailbox (or
    /// terminated), up to `timeout`. Returns `true` if drained.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let drained = self
                .inner
                .entries
                .iter()
                .all(|r| !r.value().is_alive() || r.value().mailbox_len() == 0);
            if drained {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Cancels every process with [`ExitReason::Shutdown`] and clears the
    /// table.
    pub fn shutdown(&self) {
        let indexes: Vec<u64> = self.inner.entries.iter().map(|r| *r.key()).collect();
        for index in indexes {
            self.kill(index, ExitReason::Shutdown);
        }
        self.inner.entries.clear();
    }

    /// Marks a process terminated, notifies watchers, and schedules the
    /// grace-window removal.
    fn finish(&self, index: u64, reason: ExitReason) {
        let Some(handle) = self.get(index) else {
            return;
        };
        let Some(watchers) = handle.mark_terminated(reason.clone()) else {
            return;
        };

        let pid = handle.pid().clone();
        if !reason.is_normal() {
            tracing::debug!(pid = %pid, %reason, "process terminated");
        }
        for watcher in watchers {
            self.notify_watcher(&watcher, pid.clone(), reason.clone());
        }

        let table = self.clone();
        tokio::spawn(async move {
            sleep(table.inner.grace).await;
            table.inner.entries.remove(&index);
        });
    }

    fn notify_watcher(&self, watcher: &Pid, terminated: Pid, reason: ExitReason) {
        let notice = ExitNotice {
            pid: terminated,
            reason,
        };
        match Envelope::seal(&notice) {
            Ok(env) => {
                if self.deliver(watcher.index(), env).is_err() {
                    tracing::trace!(watcher = %watcher, "watcher gone, notice dropped");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to encode exit notice"),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "process body panicked".to_string()
    }
}
