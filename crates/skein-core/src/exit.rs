//! Process termination reporting.
//!
//! An [`ExitReason`] describes why a process stopped. Observers that
//! linked to or monitored a process receive an [`ExitNotice`] in their
//! mailbox when it terminates; the notice is an ordinary typed message
//! and is matched by selective receive like any other.

use crate::Pid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The reason a process terminated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExitReason {
    /// The body returned.
    #[default]
    Normal,
    /// The node shut down while the process was still running.
    Shutdown,
    /// The body failed (panicked); carries a best-effort description.
    Failure(String),
    /// The process was terminated from outside.
    Killed,
}

impl ExitReason {
    /// Returns `true` for [`ExitReason::Normal`].
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => write!(f, "normal"),
            ExitReason::Shutdown => write!(f, "shutdown"),
            ExitReason::Failure(why) => write!(f, "failure: {}", why),
            ExitReason::Killed => write!(f, "killed"),
        }
    }
}

/// Termination notice delivered to linked and monitoring processes.
///
/// # Examples
///
/// ```
/// use skein_core::{ExitNotice, ExitReason, NodeId, Pid};
///
/// let pid = Pid::new(NodeId::new("h", 9000, 1), 4);
/// let notice = ExitNotice { pid: pid.clone(), reason: ExitReason::Normal };
/// assert!(notice.reason.is_normal());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitNotice {
    /// The process that terminated.
    pub pid: Pid,
    /// Why it terminated.
    pub reason: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Envelope, NodeId};

    #[test]
    fn normality() {
        assert!(ExitReason::Normal.is_normal());
        assert!(!ExitReason::Killed.is_normal());
        assert!(!ExitReason::Failure("boom".into()).is_normal());
        assert!(!ExitReason::Shutdown.is_normal());
    }

    #[test]
    fn notice_travels_as_envelope() {
        let notice = ExitNotice {
            pid: Pid::new(NodeId::new("h", 9000, 1), 9),
            reason: ExitReason::Failure("division by zero".into()),
        };
        let env = Envelope::seal(&notice).unwrap();
        let back: ExitNotice = env.open().unwrap();
        assert_eq!(back, notice);
    }

    #[test]
    fn display() {
        assert_eq!(ExitReason::Normal.to_string(), "normal");
        assert_eq!(
            ExitReason::Failure("x".into()).to_string(),
            "failure: x"
        );
    }
}
