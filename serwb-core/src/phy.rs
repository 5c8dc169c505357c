//! In-memory model of the physical transport.
//!
//! Real hardware puts SERDES transceivers, clocking and delay calibration
//! here. The link core only needs a full-duplex stream of raw words, so
//! the model is a pair of bounded channels with an unknown receive phase
//! ([`BitSkew`]) and optional bit errors ([`ErrorInjector`]).

use tokio::sync::mpsc;
use tracing::trace;

use crate::code::word::RawWord;
use crate::error::SerwbError;

// ── BitSkew ──────────────────────────────────────────────────────

/// Delays a raw word stream by a fixed number of bits.
///
/// Models a deserializer that samples the line at an arbitrary phase:
/// each output word carries the tail of the previous input word followed
/// by the head of the current one.
#[derive(Debug, Clone)]
pub struct BitSkew {
    width: u32,
    bits: u32,
    carry: RawWord,
}

impl BitSkew {
    /// `bits` is reduced modulo `width`.
    pub fn new(width: u32, bits: u32) -> Self {
        Self {
            width,
            bits: bits % width,
            carry: 0,
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn apply(&mut self, raw: RawWord) -> RawWord {
        if self.bits == 0 {
            return raw;
        }
        let out = (self.carry << (self.width - self.bits)) | (raw >> self.bits);
        self.carry = raw & ((1 << self.bits) - 1);
        out
    }
}

// ── ErrorInjector ────────────────────────────────────────────────

/// Flips one bit every `interval` words. An interval of 0 disables it.
#[derive(Debug, Clone)]
pub struct ErrorInjector {
    width: u32,
    interval: u64,
    count: u64,
    bit: u32,
    injected: u64,
}

impl ErrorInjector {
    pub fn new(width: u32, interval: u64) -> Self {
        Self {
            width,
            interval,
            count: 0,
            bit: 0,
            injected: 0,
        }
    }

    /// Number of bits flipped so far.
    pub fn injected(&self) -> u64 {
        self.injected
    }

    pub fn apply(&mut self, raw: RawWord) -> RawWord {
        if self.interval == 0 {
            return raw;
        }
        self.count += 1;
        if self.count % self.interval != 0 {
            return raw;
        }
        // Walk the flipped position so every lane gets hit eventually.
        self.bit = (self.bit + 7) % self.width;
        self.injected += 1;
        trace!(bit = self.bit, "injecting bit error");
        raw ^ (1 << self.bit)
    }
}

// ── WirePort ─────────────────────────────────────────────────────

/// One end of a simulated full-duplex lane pair.
#[derive(Debug)]
pub struct WirePort {
    tx: mpsc::Sender<RawWord>,
    rx: mpsc::Receiver<RawWord>,
    skew: BitSkew,
    errors: Option<ErrorInjector>,
}

impl WirePort {
    /// Corrupt the receive direction of this port.
    pub fn with_errors(mut self, interval: u64) -> Self {
        self.errors = Some(ErrorInjector::new(self.skew.width, interval));
        self
    }

    /// Drive one raw word onto the line.
    pub async fn send(&self, raw: RawWord) -> Result<(), SerwbError> {
        self.tx.send(raw).await?;
        Ok(())
    }

    /// Sample one raw word from the line. `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<RawWord> {
        let raw = self.rx.recv().await?;
        let raw = match self.errors.as_mut() {
            Some(inj) => inj.apply(raw),
            None => raw,
        };
        Some(self.skew.apply(raw))
    }

    /// Receive skew in bits.
    pub fn skew(&self) -> u32 {
        self.skew.bits()
    }
}

/// Build two connected ports. `skew_ab` is the phase seen by `b` when
/// receiving from `a`, and the other way round for `skew_ba`.
pub fn wire_pair(width: u32, depth: usize, skew_ab: u32, skew_ba: u32) -> (WirePort, WirePort) {
    let (a_tx, b_rx) = mpsc::channel(depth);
    let (b_tx, a_rx) = mpsc::channel(depth);
    let a = WirePort {
        tx: a_tx,
        rx: a_rx,
        skew: BitSkew::new(width, skew_ba),
        errors: None,
    };
    let b = WirePort {
        tx: b_tx,
        rx: b_rx,
        skew: BitSkew::new(width, skew_ab),
        errors: None,
    };
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skew_shifts_stream() {
        let mut skew = BitSkew::new(40, 4);
        assert_eq!(skew.apply(0xAB_CDEF_0123), 0x0A_BCDE_F012);
        assert_eq!(skew.apply(0x45_6789_ABCD), 0x34_5678_9ABC);
    }

    #[test]
    fn zero_skew_is_identity() {
        let mut skew = BitSkew::new(40, 40);
        assert_eq!(skew.bits(), 0);
        assert_eq!(skew.apply(0xFF_FFFF_FFFF), 0xFF_FFFF_FFFF);
    }

    #[test]
    fn injector_flips_one_bit_per_interval() {
        let mut inj = ErrorInjector::new(40, 3);
        let out: Vec<u64> = (0..6).map(|_| inj.apply(0)).collect();
        assert_eq!(out.iter().filter(|w| **w != 0).count(), 2);
        assert!(out.iter().all(|w| w.count_ones() <= 1));
        assert_eq!(inj.injected(), 2);
    }

    #[tokio::test]
    async fn wire_pair_carries_words_both_ways() {
        let (a, mut b) = wire_pair(40, 4, 0, 0);
        a.send(0x12_3456_789A).await.unwrap();
        assert_eq!(b.recv().await, Some(0x12_3456_789A));

        b.send(7).await.unwrap();
        let mut a = a;
        assert_eq!(a.recv().await, Some(7));
    }

    #[tokio::test]
    async fn recv_ends_when_peer_dropped() {
        let (a, mut b) = wire_pair(40, 4, 0, 0);
        drop(a);
        assert_eq!(b.recv().await, None);
    }
}
