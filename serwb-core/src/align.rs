//! Symbol-boundary recovery on the raw receive stream.
//!
//! The deserializer hands over `W = lanes * 10` bits per line clock with
//! an unknown phase. [`BitAligner`] keeps the last two raw words and
//! extracts the word that starts `offset` bits into that window, so the
//! aligned output trails the input by one word.
//!
//! ```text
//!   window = prev ‖ cur               (2W bits, prev most significant)
//!   aligned = window[offset .. offset + W]
//! ```
//!
//! While hunting, the aligner tests one offset at a time for a comma on
//! lane 0 and requests a bitslip when the offset keeps failing. Once
//! locked it watches for commas appearing off the symbol grid, which
//! means the phase moved.

use std::fmt;

use tracing::debug;

use crate::code::word::{RawWord, lane_code};
use crate::code::{SYMBOL_BITS, is_comma};
use crate::config::TrainingConfig;

/// 7-bit comma sequence of K28.5 in RD-.
const COMMA_SEQ_NEG: u8 = 0b0011111;
/// 7-bit comma sequence of K28.5 in RD+.
const COMMA_SEQ_POS: u8 = 0b1100000;

/// Consecutive words with an off-grid comma needed to drop lock. A single
/// line bit error can fake one.
const OFF_GRID_CONFIRM: u32 = 2;

// ── AlignStatus ──────────────────────────────────────────────────

/// Per-word aligner report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlignStatus {
    /// The receive window is all zeros (electrical idle).
    #[default]
    Idle,
    /// Hunting for a comma; no valid offset.
    Searching,
    /// Locked; the aligned word is on the symbol grid.
    Locked,
    /// Lock was dropped on this word. The aligner hunts again from offset 0.
    Lost,
    /// Every offset was tried without lock. Sticky until [`BitAligner::restart`].
    Exhausted,
}

impl fmt::Display for AlignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Searching => write!(f, "Searching"),
            Self::Locked => write!(f, "Locked"),
            Self::Lost => write!(f, "Lost"),
            Self::Exhausted => write!(f, "Exhausted"),
        }
    }
}

/// One aligned word plus what the aligner learned from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignOutput {
    /// The word at the current offset (meaningful only when locked).
    pub word: RawWord,
    pub status: AlignStatus,
    /// Lane 0 of `word` is K28.5.
    pub comma: bool,
    /// A bitslip was applied after this word.
    pub slipped: bool,
}

// ── BitAligner ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BitAligner {
    lanes: usize,
    width: u32,
    mask: u64,

    prev: RawWord,
    offset: u32,
    locked: bool,
    exhausted: bool,

    comma_run: u32,
    miss_run: u32,
    slips: u32,
    gap: u32,
    off_grid_run: u32,

    lock_threshold: u32,
    slip_dwell: u32,
    max_slips: u32,
    max_comma_gap: u32,
}

impl BitAligner {
    pub fn new(lanes: usize, cfg: &TrainingConfig) -> Self {
        let width = lanes as u32 * SYMBOL_BITS;
        Self {
            lanes,
            width,
            mask: (1u64 << width) - 1,
            prev: 0,
            offset: 0,
            locked: false,
            exhausted: false,
            comma_run: 0,
            miss_run: 0,
            slips: 0,
            gap: 0,
            off_grid_run: 0,
            lock_threshold: cfg.lock_threshold,
            slip_dwell: cfg.slip_dwell,
            max_slips: width * cfg.align_scans,
            max_comma_gap: cfg.max_comma_gap,
        }
    }

    /// The locked offset, `None` while hunting.
    pub fn offset(&self) -> Option<u32> {
        self.locked.then_some(self.offset)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Forget everything and hunt again from offset 0.
    pub fn restart(&mut self) {
        self.prev = 0;
        self.offset = 0;
        self.locked = false;
        self.exhausted = false;
        self.rehunt();
        self.slips = 0;
    }

    fn rehunt(&mut self) {
        self.comma_run = 0;
        self.miss_run = 0;
        self.gap = 0;
        self.off_grid_run = 0;
    }

    /// Feed one raw word from the deserializer.
    pub fn push(&mut self, raw: RawWord) -> AlignOutput {
        let raw = raw & self.mask;
        let window = ((self.prev as u128) << self.width) | raw as u128;
        self.prev = raw;

        let word = ((window >> (self.width - self.offset)) as u64) & self.mask;
        let comma = is_comma(lane_code(word, self.lanes, 0));
        let mut out = AlignOutput {
            word,
            status: AlignStatus::Searching,
            comma,
            slipped: false,
        };

        if self.locked {
            out.status = self.track(window, comma);
            return out;
        }
        if self.exhausted {
            out.status = AlignStatus::Exhausted;
            return out;
        }
        if window == 0 {
            out.status = AlignStatus::Idle;
            return out;
        }

        if comma {
            self.miss_run = 0;
            self.comma_run += 1;
            if self.comma_run >= self.lock_threshold {
                debug!(offset = self.offset, slips = self.slips, "bit aligner locked");
                self.locked = true;
                self.gap = 0;
                out.status = AlignStatus::Locked;
            }
            return out;
        }

        self.comma_run = 0;
        self.miss_run += 1;
        if self.miss_run >= self.slip_dwell {
            self.miss_run = 0;
            self.offset = (self.offset + 1) % self.width;
            self.slips += 1;
            out.slipped = true;
            if self.slips >= self.max_slips {
                debug!(slips = self.slips, "bit aligner exhausted every offset");
                self.exhausted = true;
                out.status = AlignStatus::Exhausted;
            }
        }
        out
    }

    /// Lock maintenance: comma cadence and off-grid commas.
    fn track(&mut self, window: u128, comma: bool) -> AlignStatus {
        if comma {
            self.gap = 0;
        } else {
            self.gap += 1;
        }

        match self.off_grid_comma(window) {
            Some(pos) => {
                self.off_grid_run += 1;
                if self.off_grid_run >= OFF_GRID_CONFIRM {
                    debug!(offset = self.offset, pos, "comma off the symbol grid, lock lost");
                    self.drop_lock();
                    return AlignStatus::Lost;
                }
            }
            None => self.off_grid_run = 0,
        }
        if self.gap > self.max_comma_gap {
            debug!(offset = self.offset, gap = self.gap, "comma cadence lost");
            self.drop_lock();
            return AlignStatus::Lost;
        }
        AlignStatus::Locked
    }

    fn drop_lock(&mut self) {
        self.locked = false;
        self.offset = 0;
        self.slips = 0;
        self.rehunt();
    }

    /// First bit position in the leading word of the window where a comma
    /// sequence starts without sitting on a symbol boundary.
    fn off_grid_comma(&self, window: u128) -> Option<u32> {
        let top = 2 * self.width;
        (0..self.width).find(|&p| {
            let seq = ((window >> (top - 7 - p)) & 0x7F) as u8;
            (seq == COMMA_SEQ_NEG || seq == COMMA_SEQ_POS)
                && (p + self.width - self.offset) % SYMBOL_BITS != 0
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
