//! Bounded queues between the bus domain and the line domain.
//!
//! One queue per direction, each `depth` words deep. The line domain only
//! polls the transmit queue (it must produce a word every clock and falls
//! back to idle fill) and reserves space before decoding into the receive
//! queue, so a slow bus domain stalls the line instead of losing words.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::code::LinkWord;

/// Default queue depth per direction.
pub const DEFAULT_DEPTH: usize = 16;

// ── WordSource ───────────────────────────────────────────────────

/// Anything the transmitter can pull payload words from.
///
/// `None` means nothing is pending this clock; the transmitter then sends
/// idle fill.
pub trait WordSource {
    fn pull(&mut self) -> Option<LinkWord>;
}

impl WordSource for mpsc::Receiver<LinkWord> {
    fn pull(&mut self) -> Option<LinkWord> {
        match self.try_recv() {
            Ok(word) => Some(word),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// A source with nothing to send.
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl WordSource for Idle {
    fn pull(&mut self) -> Option<LinkWord> {
        None
    }
}

// ── ClockDomainBridge ────────────────────────────────────────────

/// A received data word with the datapath generation it was decoded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxWord {
    pub generation: u64,
    pub word: LinkWord,
}

/// Line-domain ends of the bridge.
#[derive(Debug)]
pub struct LineSide {
    /// Words to transmit, pulled once per line clock.
    pub tx: mpsc::Receiver<LinkWord>,
    /// Received data words towards the bus domain.
    pub rx: mpsc::Sender<RxWord>,
}

impl LineSide {
    /// Discard everything queued for transmission.
    pub fn flush_tx(&mut self) -> usize {
        let mut n = 0;
        while self.tx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}

/// Bus-domain ends of the bridge.
#[derive(Debug)]
pub struct BusSide {
    pub tx: mpsc::Sender<LinkWord>,
    pub rx: mpsc::Receiver<RxWord>,
}

pub struct ClockDomainBridge;

impl ClockDomainBridge {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(depth: usize) -> (LineSide, BusSide) {
        let (tx_in, tx_out) = mpsc::channel(depth);
        let (rx_in, rx_out) = mpsc::channel(depth);
        (
            LineSide {
                tx: tx_out,
                rx: rx_in,
            },
            BusSide {
                tx: tx_in,
                rx: rx_out,
            },
        )
    }
}
