//! Self-synchronising payload whitening.
//!
//! Multiplicative scrambler over `x^23 + x^18 + 1`, one bit at a time,
//! most significant bit of each 32-bit word first. The scrambler shifts
//! its output bits into the register and the descrambler shifts the bits
//! it receives, so after 23 received bits both registers hold the same
//! history. With 32-bit words the descrambler is in step from the second
//! data word on, whatever state either side started in.
//!
//! Control words are sent in the clear and do not clock the register.

use crate::bridge::WordSource;
use crate::code::LinkWord;
use crate::config::ScramblerConfig;

const LFSR_MASK: u32 = (1 << 23) - 1;
const TAP_A: u32 = 17;
const TAP_B: u32 = 22;
const SEED: u32 = 1;

#[derive(Debug, Clone)]
struct Lfsr {
    state: u32,
}

impl Lfsr {
    fn new() -> Self {
        Self { state: SEED }
    }

    fn feedback(&self) -> u32 {
        ((self.state >> TAP_A) ^ (self.state >> TAP_B)) & 1
    }

    fn shift(&mut self, bit: u32) {
        self.state = ((self.state << 1) | bit) & LFSR_MASK;
    }
}

// ── Scrambler ────────────────────────────────────────────────────

/// Transmit-side whitening plus the payload-mode word policy
/// (priming word, sync comma insertion, idle fill).
#[derive(Debug, Clone)]
pub struct Scrambler {
    lfsr: Lfsr,
    enabled: bool,
    sync_interval: u32,
    since_comma: u32,
    priming: bool,
}

impl Scrambler {
    pub fn new(cfg: &ScramblerConfig) -> Self {
        Self {
            lfsr: Lfsr::new(),
            enabled: cfg.enabled,
            sync_interval: cfg.sync_interval,
            since_comma: 0,
            priming: false,
        }
    }

    pub fn reset(&mut self) {
        self.lfsr = Lfsr::new();
        self.since_comma = 0;
        self.priming = false;
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.enabled = !bypass;
    }

    pub fn is_bypassed(&self) -> bool {
        !self.enabled
    }

    /// Arm the priming word sent ahead of the first payload word.
    pub fn start_payload(&mut self) {
        self.priming = true;
        self.since_comma = 0;
    }

    /// Whiten one word.
    pub fn scramble(&mut self, word: LinkWord) -> LinkWord {
        if word.is_control() || !self.enabled {
            return word;
        }
        let mut out = 0;
        for i in (0..32).rev() {
            let bit = ((word.data >> i) & 1) ^ self.lfsr.feedback();
            self.lfsr.shift(bit);
            out |= bit << i;
        }
        LinkWord::data(out)
    }

    /// Produce the next payload-mode line word.
    pub fn next_word<S: WordSource + ?Sized>(&mut self, source: &mut S) -> LinkWord {
        if self.priming {
            self.priming = false;
            self.since_comma += 1;
            return self.scramble(LinkWord::data(0));
        }
        if self.since_comma + 1 >= self.sync_interval {
            self.since_comma = 0;
            return LinkWord::COMMA;
        }
        match source.pull() {
            Some(word) => {
                let word = self.scramble(word);
                if word.is_control() {
                    self.since_comma = 0;
                } else {
                    self.since_comma += 1;
                }
                word
            }
            None => {
                self.since_comma = 0;
                LinkWord::COMMA
            }
        }
    }
}

// ── Descrambler ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Descrambler {
    lfsr: Lfsr,
    enabled: bool,
}

impl Descrambler {
    pub fn new(cfg: &ScramblerConfig) -> Self {
        Self {
            lfsr: Lfsr::new(),
            enabled: cfg.enabled,
        }
    }

    pub fn reset(&mut self) {
        self.lfsr = Lfsr::new();
    }

    pub fn set_bypass(&mut self, bypass: bool) {
        self.enabled = !bypass;
    }

    pub fn descramble(&mut self, word: LinkWord) -> LinkWord {
        if word.is_control() || !self.enabled {
            return word;
        }
        let mut out = 0;
        for i in (0..32).rev() {
            let bit = (word.data >> i) & 1;
            out |= (bit ^ self.lfsr.feedback()) << i;
            self.lfsr.shift(bit);
        }
        LinkWord::data(out)
    }
}

// ── Tests ────────────────────────────────────────────────────────
