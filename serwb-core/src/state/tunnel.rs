//! Requester-side read tracking.
//!
//! The tunnel allows one read in flight; there is no transaction tag on
//! the wire, so a response is matched purely by address and word count.

use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::SerwbError;

/// Completion channel of a local bus transaction.
pub type Completion = oneshot::Sender<Result<Vec<u32>, SerwbError>>;

// ── PendingRead ──────────────────────────────────────────────────

/// The single outstanding read.
#[derive(Debug)]
pub struct PendingRead {
    /// Byte address of the first word requested.
    pub address: u32,
    /// Number of words requested.
    pub count: usize,
    /// When the request was queued for transmission.
    pub sent_at: Instant,
    /// Optional deadline; `None` waits for the response or a link reset.
    pub deadline: Option<Duration>,
    done: Completion,
}

impl PendingRead {
    pub fn new(address: u32, count: usize, deadline: Option<Duration>, done: Completion) -> Self {
        Self {
            address,
            count,
            sent_at: Instant::now(),
            deadline,
            done,
        }
    }

    /// Returns `true` if this read has exceeded its deadline.
    pub fn is_expired(&self) -> bool {
        match self.deadline {
            Some(d) => self.sent_at.elapsed() > d,
            None => false,
        }
    }

    /// Instant at which the read expires, if it can.
    pub fn expires_at(&self) -> Option<Instant> {
        self.deadline.map(|d| self.sent_at + d)
    }

    /// How long this read has been in flight.
    pub fn elapsed(&self) -> Duration {
        self.sent_at.elapsed()
    }

    /// Whether a response for `address` carrying `count` words answers this read.
    pub fn matches(&self, address: u32, count: usize) -> bool {
        self.address == address && self.count == count
    }

    /// Resolve the read. A caller that gave up waiting is not an error.
    pub fn complete(self, result: Result<Vec<u32>, SerwbError>) {
        let _ = self.done.send(result);
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_never_expires() {
        let (tx, _rx) = oneshot::channel();
        let p = PendingRead::new(0x200, 1, None, tx);
        assert!(!p.is_expired());
        assert!(p.expires_at().is_none());
    }

    #[test]
    fn zero_deadline_expires() {
        let (tx, _rx) = oneshot::channel();
        let p = PendingRead::new(0x200, 1, Some(Duration::ZERO), tx);
        std::thread::sleep(Duration::from_millis(2));
        assert!(p.is_expired());
        assert!(p.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn matches_address_and_count() {
        let (tx, _rx) = oneshot::channel();
        let p = PendingRead::new(0x200, 4, None, tx);
        assert!(p.matches(0x200, 4));
        assert!(!p.matches(0x204, 4));
        assert!(!p.matches(0x200, 1));
    }

    #[tokio::test]
    async fn completion_reaches_caller() {
        let (tx, rx) = oneshot::channel();
        PendingRead::new(0x10, 1, None, tx).complete(Ok(vec![5]));
        assert_eq!(rx.await.unwrap().unwrap(), vec![5]);
    }

    #[test]
    fn completion_without_waiter_is_harmless() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        PendingRead::new(0x10, 1, None, tx).complete(Err(SerwbError::LinkReset));
    }
}
