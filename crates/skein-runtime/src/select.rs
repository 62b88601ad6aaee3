//! Multi-arm typed receive.
//!
//! A [`Selector`] declares which message types a receive is prepared to
//! handle and what to do with each. The mailbox delivers the oldest
//! envelope matching any declared arm; everything else stays queued.

use crate::error::ReceiveError;
use crate::mailbox::Mailbox;
use skein_core::{Envelope, Wire};
use std::time::Duration;

struct Arm<R> {
    tag: &'static str,
    decode: Box<dyn FnOnce(Envelope) -> Result<R, skein_core::DecodeError> + Send>,
}

/// A selective receive under construction.
///
/// # Examples
///
/// ```ignore
/// let outcome = ctx
///     .select::<String>()
///     .on(|s: String| s)
///     .on(|n: u64| format!("number {}", n))
///     .recv()
///     .await?;
/// ```
pub struct Selector<'a, R> {
    mailbox: &'a Mailbox,
    arms: Vec<Arm<R>>,
}

impl<'a, R> Selector<'a, R> {
    pub(crate) fn new(mailbox: &'a Mailbox) -> Self {
        Self {
            mailbox,
            arms: Vec::new(),
        }
    }

    /// Adds an arm accepting messages of type `T`.
    ///
    /// Arms are tried in declaration order when several match the same
    /// envelope tag; in practice tags are distinct per type, so order
    /// only matters for duplicate `on::<T>` calls (first wins).
    pub fn on<T, F>(mut self, handle: F) -> Self
    where
        T: Wire,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.arms.push(Arm {
            tag: T::type_tag(),
            decode: Box::new(move |env| env.open::<T>().map(handle)),
        });
        self
    }

    /// Waits for the oldest envelope matching any arm and runs that arm.
    pub async fn recv(self) -> Result<R, ReceiveError> {
        let tags = self.tags();
        let env = self
            .mailbox
            .recv_matching(&tags)
            .await
            .ok_or(ReceiveError::Closed)?;
        Self::dispatch(self.arms, env)
    }

    /// Like [`Selector::recv`] but gives up after `dur`, consuming
    /// nothing on expiry.
    pub async fn recv_timeout(self, dur: Duration) -> Result<R, ReceiveError> {
        let tags = self.tags();
        let env = self.mailbox.recv_matching_timeout(&tags, dur).await?;
        Self::dispatch(self.arms, env)
    }

    fn tags(&self) -> Vec<&'static str> {
        self.arms.iter().map(|a| a.tag).collect()
    }

    fn dispatch(arms: Vec<Arm<R>>, env: Envelope) -> Result<R, ReceiveError> {
        for arm in arms {
            if arm.tag == env.tag {
                return (arm.decode)(env).map_err(ReceiveError::from);
            }
        }
        unreachable!("mailbox returned an envelope no arm asked for")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Word(String);

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Num(i64);

    #[tokio::test]
    async fn dispatches_to_matching_arm() {
        let (mailbox, sender) = Mailbox::new();
        sender.send(Envelope::seal(&Num(3)).unwrap()).unwrap();

        let got = mailbox
            .select::<String>()
            .on(|w: Word| w.0)
            .on(|n: Num| format!("num {}", n.0))
            .recv()
            .await
            .unwrap();
        assert_eq!(got, "num 3");
    }

    #[tokio::test]
    async fn earliest_matching_wins_across_arms() {
        let (mailbox, sender) = Mailbox::new();
        sender.send(Envelope::seal(&Word("w".into())).unwrap()).unwrap();
        sender.send(Envelope::seal(&Num(1)).unwrap()).unwrap();

        // Both arms match something; the older envelope is taken.
        let got = mailbox
            .select::<&'static str>()
            .on(|_: Num| "num")
            .on(|_: Word| "word")
            .recv()
            .await
            .unwrap();
        assert_eq!(got, "word");
    }

    #[tokio::test]
    async fn timeout_surfaces() {
        let (mailbox, _sender) = Mailbox::new();
        let err = mailbox
            .select::<()>()
            .on(|_: Word| ())
            .recv_timeout(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::Timeout));
    }

    #[tokio::test]
    async fn closed_surfaces() {
        let (mailbox, _sender) = Mailbox::new();
        mailbox.close();
        let err = mailbox
            .select::<()>()
            .on(|_: Word| ())
            .recv()
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::Closed));
    }
}
