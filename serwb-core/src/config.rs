//! Link configuration.
//!
//! Both endpoints must agree on everything except the training timers;
//! there is no negotiation on the wire.

use serde::{Deserialize, Serialize};

use crate::code::word::MAX_LANES;
use crate::error::SerwbError;

/// Top-level link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Number of parallel 8b/10b lanes in a link word (1..=4).
    pub lanes: usize,
    /// Link bring-up timers and thresholds.
    pub training: TrainingConfig,
    /// Payload whitening.
    pub scrambler: ScramblerConfig,
    /// Clock-domain bridge queues.
    pub bridge: BridgeConfig,
    /// Packet framing.
    pub framing: FramingConfig,
    /// Bus tunnel behaviour.
    pub tunnel: TunnelConfig,
}

/// Link training timers, all in line clocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Electrical idle driven in RESET so the peer sees the link drop.
    pub reset_dwell: u32,
    /// Comma transmission time before the alignment check starts.
    pub send_dwell: u32,
    /// Ticks allowed from entering training until the aligner locks.
    pub align_timeout: u32,
    /// Consecutive commas at one offset needed to declare lock.
    pub lock_threshold: u32,
    /// Non-comma words tolerated at one offset before slipping a bit.
    pub slip_dwell: u32,
    /// Full passes over every bit offset before giving up.
    pub align_scans: u32,
    /// Words without a comma after which a held lock is considered lost.
    pub max_comma_gap: u32,
    /// Clean ticks required in ALIGNED before payload is enabled.
    pub confirm_window: u32,
    /// Decode errors tolerated per error window while READY.
    pub error_tolerance: u32,
    /// Length of the error counting window.
    pub error_window: u32,
}

/// Scrambler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScramblerConfig {
    /// Whiten payload words. When false the scrambler is an identity.
    pub enabled: bool,
    /// A comma word is inserted every `sync_interval` payload-mode words.
    pub sync_interval: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Depth of each clock-domain queue, in words.
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramingConfig {
    /// Largest accepted frame payload, in words.
    pub max_payload_words: usize,
    /// A partially received frame with no new word for this long is dropped.
    pub frame_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Fail an outstanding read after this many milliseconds.
    /// `None` waits until the response arrives or the link resets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            lanes: MAX_LANES,
            training: TrainingConfig::default(),
            scrambler: ScramblerConfig::default(),
            bridge: BridgeConfig::default(),
            framing: FramingConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            reset_dwell: 16,
            send_dwell: 64,
            align_timeout: 4096,
            lock_threshold: 16,
            slip_dwell: 4,
            align_scans: 2,
            max_comma_gap: 2048,
            confirm_window: 512,
            error_tolerance: 8,
            error_window: 1024,
        }
    }
}

impl Default for ScramblerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval: 1024,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { depth: 16 }
    }
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_payload_words: 64,
            frame_timeout_ms: 50,
        }
    }
}

// ── Validation ───────────────────────────────────────────────────

/// Smallest useful frame: record header, address and one data word.
pub const MIN_PAYLOAD_WORDS: usize = 3;

/// Upper bound on a frame payload: a full 255-word burst plus its header.
pub const MAX_PAYLOAD_WORDS: usize = 257;

impl LinkConfig {
    /// Configuration with the standard timers and the given lane count.
    pub fn with_lanes(lanes: usize) -> Self {
        Self {
            lanes,
            ..Self::default()
        }
    }

    /// Reject zero timers and combinations that cannot train.
    pub fn validate(&self) -> Result<(), SerwbError> {
        if self.lanes == 0 || self.lanes > MAX_LANES {
            return Err(SerwbError::Config(format!(
                "lanes must be 1..={MAX_LANES}, got {}",
                self.lanes
            )));
        }

        let t = &self.training;
        let timers = [
            ("training.reset_dwell", t.reset_dwell),
            ("training.send_dwell", t.send_dwell),
            ("training.align_timeout", t.align_timeout),
            ("training.lock_threshold", t.lock_threshold),
            ("training.slip_dwell", t.slip_dwell),
            ("training.align_scans", t.align_scans),
            ("training.max_comma_gap", t.max_comma_gap),
            ("training.confirm_window", t.confirm_window),
            ("training.error_window", t.error_window),
            ("scrambler.sync_interval", self.scrambler.sync_interval),
        ];
        if let Some((name, _)) = timers.iter().find(|(_, v)| *v == 0) {
            return Err(SerwbError::Config(format!("{name} must be non-zero")));
        }
        if t.error_tolerance >= t.error_window {
            return Err(SerwbError::Config(
                "training.error_tolerance must be below training.error_window".into(),
            ));
        }
        if t.max_comma_gap <= self.scrambler.sync_interval {
            return Err(SerwbError::Config(
                "training.max_comma_gap must exceed scrambler.sync_interval".into(),
            ));
        }
        if self.framing.frame_timeout_ms == 0 {
            return Err(SerwbError::Config("framing.frame_timeout_ms must be non-zero".into()));
        }
        if self.bridge.depth == 0 {
            return Err(SerwbError::Config("bridge.depth must be non-zero".into()));
        }
        let words = self.framing.max_payload_words;
        if !(MIN_PAYLOAD_WORDS..=MAX_PAYLOAD_WORDS).contains(&words) {
            return Err(SerwbError::Config(format!(
                "framing.max_payload_words must be {MIN_PAYLOAD_WORDS}..={MAX_PAYLOAD_WORDS}, got {words}"
            )));
        }
        Ok(())
    }

    /// Width of a raw line word in bits.
    pub fn word_bits(&self) -> u32 {
        crate::code::word::raw_width(self.lanes)
    }

    /// Largest burst that fits in one frame.
    pub fn max_burst_words(&self) -> usize {
        self.framing.max_payload_words.saturating_sub(2).min(255)
    }
}

// ── Tests ────────────────────────────────────────────────────────
