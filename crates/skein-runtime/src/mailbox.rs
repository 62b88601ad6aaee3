//! Process mailbox with selective receive.
//!
//! Each process owns one [`Mailbox`]; any number of producers hold cloned
//! [`MailboxSender`]s. The queue is an unbounded FIFO of sealed
//! [`Envelope`]s. A receive names the type tags it will accept: the first
//! (oldest) envelope whose tag matches is removed, everything else stays
//! in place for later receives.
//!
//! Every envelope gets a sequence number on arrival. A blocked receive
//! remembers the sequence watermark of its last scan and, when woken,
//! rescans only envelopes that arrived after it, so a long prefix of
//! retained non-matching mail is not walked again on every wakeup.

use crate::error::ReceiveError;
use parking_lot::Mutex;
use skein_core::Envelope;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Slot {
    seq: u64,
    env: Envelope,
}

struct State {
    entries: VecDeque<Slot>,
    next_seq: u64,
    closed: bool,
    waiting: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// The consuming end of a process mailbox. Exactly one per process.
pub struct Mailbox {
    inner: Arc<Inner>,
}

/// The producing end of a process mailbox. Cloned freely.
#[derive(Clone)]
pub struct MailboxSender {
    inner: Arc<Inner>,
}

impl Mailbox {
    /// Creates a mailbox, returning the consumer and producer halves.
    pub fn new() -> (Mailbox, MailboxSender) {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                entries: VecDeque::new(),
                next_seq: 0,
                closed: false,
                waiting: false,
            }),
            notify: Notify::new(),
        });
        (
            Mailbox {
                inner: inner.clone(),
            },
            MailboxSender { inner },
        )
    }

    /// Receives the oldest envelope regardless of tag.
    ///
    /// Returns `None` once the mailbox is closed and drained.
    pub async fn recv(&self) -> Option<Envelope> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut st = self.inner.state.lock();
                if let Some(slot) = st.entries.pop_front() {
                    st.waiting = false;
                    return Some(slot.env);
                }
                if st.closed {
                    st.waiting = false;
                    return None;
                }
                st.waiting = true;
            }
            notified.await;
        }
    }

    /// Receives the oldest envelope whose tag is one of `tags`.
    ///
    /// Non-matching envelopes are left in place, in order. Suspends until
    /// a matching envelope arrives; returns `None` if the mailbox closes
    /// with no match pending.
    pub async fn recv_matching(&self, tags: &[&str]) -> Option<Envelope> {
        // Everything below this watermark has already been scanned and
        // found non-matching; wakeups only look at newer arrivals.
        let mut scanned_below = 0u64;
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut st = self.inner.state.lock();
                let found = st
                    .entries
                    .iter()
                    .position(|s| s.seq >= scanned_below && tags.contains(&s.env.tag.as_str()));
                if let Some(pos) = found {
                    st.waiting = false;
                    // pos came from a scan under the same lock.
                    return st.entries.remove(pos).map(|s| s.env);
                }
                if st.closed {
                    st.waiting = false;
                    return None;
                }
                scanned_below = st.next_seq;
                st.waiting = true;
            }
            notified.await;
        }
    }

    /// [`Mailbox::recv`] with a deadline.
    pub async fn recv_timeout(&self, dur: Duration) -> Result<Envelope, ReceiveError> {
        match tokio::time::timeout(dur, self.recv()).await {
            Ok(Some(env)) => Ok(env),
            Ok(None) => Err(ReceiveError::Closed),
            Err(_) => Err(ReceiveError::Timeout),
        }
    }

    /// [`Mailbox::recv_matching`] with a deadline. On expiry no message is
    /// consumed.
    pub async fn recv_matching_timeout(
        &self,
        tags: &[&str],
        dur: Duration,
    ) -> Result<Envelope, ReceiveError> {
        match tokio::time::timeout(dur, self.recv_matching(tags)).await {
            Ok(Some(env)) => Ok(env),
            Ok(None) => Err(ReceiveError::Closed),
            Err(_) => Err(ReceiveError::Timeout),
        }
    }

    /// Removes and returns the oldest envelope if one is queued.
    pub fn try_recv(&self) -> Option<Envelope> {
        self.inner.state.lock().entries.pop_front().map(|s| s.env)
    }

    /// Opens a multi-arm typed receive over this mailbox.
    pub fn select<R>(&self) -> crate::Selector<'_, R> {
        crate::Selector::new(self)
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns `true` if no envelopes are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the mailbox. Queued envelopes can still be received;
    /// further sends fail.
    pub fn close(&self) {
        let mut st = self.inner.state.lock();
        st.closed = true;
        drop(st);
        self.inner.notify.notify_waiters();
    }
}

impl MailboxSender {
    /// Appends an envelope.
    ///
    /// Returns the envelope back if the mailbox is closed.
    pub fn send(&self, env: Envelope) -> Result<(), Envelope> {
        {
            let mut st = self.inner.state.lock();
            if st.closed {
                return Err(env);
            }
            let seq = st.next_seq;
            st.next_seq += 1;
            st.entries.push_back(Slot { seq, env });
        }
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Returns `true` if the mailbox is closed.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns `true` if no envelopes are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the consumer is suspended in a receive.
    pub(crate) fn consumer_waiting(&self) -> bool {
        self.inner.state.lock().waiting
    }

    /// Closes the mailbox from the runtime side (process termination).
    pub(crate) fn close(&self) {
        let mut st = self.inner.state.lock();
        st.closed = true;
        drop(st);
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use skein_core::Wire;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Text(String);

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Number(i64);

    fn text(s: &str) -> Envelope {
        Envelope::seal(&Text(s.into())).unwrap()
    }

    fn number(n: i64) -> Envelope {
        Envelope::seal(&Number(n)).unwrap()
    }

    #[tokio::test]
    async fn fifo_order() {
        let (mailbox, sender) = Mailbox::new();
        sender.send(number(1)).unwrap();
        sender.send(number(2)).unwrap();

        assert_eq!(mailbox.recv().await.unwrap().open::<Number>().unwrap(), Number(1));
        assert_eq!(mailbox.recv().await.unwrap().open::<Number>().unwrap(), Number(2));
    }

    #[tokio::test]
    async fn selective_receive_skips_and_retains() {
        let (mailbox, sender) = Mailbox::new();
        // Queue: [Number 1, Text "a", Number 2, Text "b"]
        sender.send(number(1)).unwrap();
        sender.send(text("a")).unwrap();
        sender.send(number(2)).unwrap();
        sender.send(text("b")).unwrap();

        let text_tag = [Text::type_tag()];
        let num_tag = [Number::type_tag()];

        let a = mailbox.recv_matching(&text_tag).await.unwrap();
        assert_eq!(a.open::<Text>().unwrap(), Text("a".into()));
        let b = mailbox.recv_matching(&text_tag).await.unwrap();
        assert_eq!(b.open::<Text>().unwrap(), Text("b".into()));

        // Skipped numbers are still there, in original order.
        let one = mailbox.recv_matching(&num_tag).await.unwrap();
        assert_eq!(one.open::<Number>().unwrap(), Number(1));
        let two = mailbox.recv_matching(&num_tag).await.unwrap();
        assert_eq!(two.open::<Number>().unwrap(), Number(2));
    }

    #[tokio::test]
    async fn blocked_receive_wakes_on_matching_arrival() {
        let (mailbox, sender) = Mailbox::new();
        sender.send(number(7)).unwrap();

        let recv = tokio::spawn(async move {
            mailbox.recv_matching(&[Text::type_tag()]).await
        });

        // Give the receiver time to scan and suspend past the number.
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.send(text("late")).unwrap();

        let env = recv.await.unwrap().unwrap();
        assert_eq!(env.open::<Text>().unwrap(), Text("late".into()));
    }

    #[tokio::test]
    async fn timeout_consumes_nothing() {
        let (mailbox, sender) = Mailbox::new();
        sender.send(number(5)).unwrap();

        let err = mailbox
            .recv_matching_timeout(&[Text::type_tag()], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ReceiveError::Timeout));

        // The non-matching envelope is still queued.
        assert_eq!(mailbox.len(), 1);
    }

    #[tokio::test]
    async fn close_rejects_sends_but_drains() {
        let (mailbox, sender) = Mailbox::new();
        sender.send(number(1)).unwrap();
        mailbox.close();

        assert!(sender.send(number(2)).is_err());
        assert!(mailbox.recv().await.is_some());
        assert!(mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_blocked_receiver() {
        let (mailbox, sender) = Mailbox::new();
        let recv = tokio::spawn(async move { mailbox.recv_matching(&[Text::type_tag()]).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        sender.close();
        assert!(recv.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn per_sender_order_with_two_senders() {
        let (mailbox, s1) = Mailbox::new();
        let s2 = s1.clone();

        for i in 0..10 {
            s1.send(number(i)).unwrap();
            s2.send(text(&format!("t{}", i))).unwrap();
        }

        // Each tagged sub-sequence comes out in the order it went in.
        let mut nums = Vec::new();
        let mut texts = Vec::new();
        while let Some(env) = mailbox.try_recv() {
            if env.is::<Number>() {
                nums.push(env.open::<Number>().unwrap().0);
            } else {
                texts.push(env.open::<Text>().unwrap().0);
            }
        }
        assert_eq!(nums, (0..10).collect::<Vec<_>>());
        assert_eq!(texts, (0..10).map(|i| format!("t{}", i)).collect::<Vec<_>>());
    }
}
