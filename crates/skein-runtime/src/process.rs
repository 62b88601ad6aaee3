//! Process handles and state.
//!
//! A [`ProcessHandle`] is the runtime's view of one process: its pid, the
//! producer side of its mailbox, its status, and the set of local
//! watchers to notify when it terminates. Handles are held in the process
//! table and cloned wherever delivery needs them.

use crate::error::SendError;
use crate::mailbox::MailboxSender;
use parking_lot::Mutex;
use skein_core::{Envelope, ExitReason, Pid};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};

/// Observable status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The body is runnable or running.
    Running,
    /// The body is suspended in a receive.
    Waiting,
    /// The body has finished; the entry lingers for the grace window.
    Terminated,
}

struct ProcState {
    terminated: bool,
    reason: Option<ExitReason>,
    watchers: HashSet<Pid>,
}

/// Handle to one process in the table.
#[derive(Clone)]
pub struct ProcessHandle {
    pid: Pid,
    sender: MailboxSender,
    state: Arc<Mutex<ProcState>>,
    abort: Arc<Mutex<Option<AbortHandle>>>,
    join: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ProcessHandle {
    pub(crate) fn new(pid: Pid, sender: MailboxSender) -> Self {
        Self {
            pid,
            sender,
            state: Arc::new(Mutex::new(ProcState {
                terminated: false,
                reason: None,
                watchers: HashSet::new(),
            })),
            abort: Arc::new(Mutex::new(None)),
            join: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns this process's pid.
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// Appends an envelope to the process's mailbox.
    pub fn send_raw(&self, env: Envelope) -> Result<(), SendError> {
        self.sender
            .send(env)
            .map_err(|_| SendError::Closed(self.pid.clone()))
    }

    /// Returns the process status.
    pub fn status(&self) -> ProcessStatus {
        if self.state.lock().terminated {
            ProcessStatus::Terminated
        } else if self.sender.consumer_waiting() {
            ProcessStatus::Waiting
        } else {
            ProcessStatus::Running
        }
    }

    /// Returns `true` until the body has terminated.
    pub fn is_alive(&self) -> bool {
        !self.state.lock().terminated
    }

    /// Queued mail not yet consumed by the body.
    pub fn mailbox_len(&self) -> usize {
        self.sender.len()
    }

    /// Registers a local watcher to be notified on termination.
    ///
    /// Returns the stored exit reason instead if the process has already
    /// terminated, so the caller can deliver the notice immediately.
    pub(crate) fn add_watcher(&self, watcher: Pid) -> Result<(), ExitReason> {
        let mut st = self.state.lock();
        if st.terminated {
            return Err(st.reason.clone().unwrap_or_default());
        }
        st.watchers.insert(watcher);
        Ok(())
    }

    /// Marks the process terminated, closing its mailbox.
    ///
    /// Returns the watcher set the first time it is called; `None` on
    /// repeat calls so notices are sent exactly once.
    pub(crate) fn mark_terminated(&self, reason: ExitReason) -> Option<Vec<Pid>> {
        let watchers = {
            let mut st = self.state.lock();
            if st.terminated {
                return None;
            }
            st.terminated = true;
            st.reason = Some(reason);
            st.watchers.drain().collect()
        };
        self.sender.close();
        Some(watchers)
    }

    /// Attaches the tokio task backing this process.
    pub(crate) fn bind_task(&self, join: JoinHandle<()>) {
        *self.abort.lock() = Some(join.abort_handle());
        *self.join.lock() = Some(join);
    }

    /// Cancels the backing task, aborting any pending receive or
    /// backpressured send.
    pub(crate) fn abort_body(&self) {
        if let Some(abort) = self.abort.lock().as_ref() {
            abort.abort();
        }
    }

    /// Takes the join handle, if it has not been taken already.
    pub(crate) fn take_join(&self) -> Option<JoinHandle<()>> {
        self.join.lock().take()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("status", &self.status())
            .finish()
    }
}
