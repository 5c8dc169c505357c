//! One end of the link, clocked word by word in the line domain.
//!
//! [`LinkEndpoint::tick`] is a single line clock: it takes the raw word
//! sampled from the deserializer, runs it through the aligner, decoder and
//! descrambler, steps the trainer, and returns the raw word to drive on the
//! transmit side.
//!
//! ```text
//!  rx_raw ─► BitAligner ─► WordDecoder ─► Descrambler ─► rx_word
//!                 │             │
//!                 └──► LinkTrainer ◄┘
//!                           │
//!  source ─► Scrambler ─► WordEncoder ─────────────────► tx_raw
//! ```

use tracing::{debug, trace};

use crate::align::{AlignStatus, BitAligner};
use crate::bridge::WordSource;
use crate::code::{LinkWord, RawWord, WordDecoder, WordEncoder};
use crate::config::LinkConfig;
use crate::error::SerwbError;
use crate::flags::{PhyStatus, TrainerActions};
use crate::scrambler::{Descrambler, Scrambler};
use crate::state::{LineSample, LinkRole, LinkState, LinkTrainer, TxMode};

// ── Status / control register ────────────────────────────────────

/// Snapshot of the status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub state: LinkState,
    /// Mirrors [`LinkState::is_ready`].
    pub ready: bool,
    /// Training failed; only [`Control::Reset`] clears it.
    pub error: bool,
    /// Incremented on every datapath reset.
    pub generation: u64,
    /// Decode errors seen since start-up.
    pub decode_errors: u64,
    /// Locked bit offset of the receive aligner.
    pub offset: Option<u32>,
    /// Physical status bits of the last line clock.
    pub phy: PhyStatus,
    pub scrambler_bypass: bool,
}

/// Writes to the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Force the trainer back to RESET (the only way out of ERROR).
    Reset,
    /// Send and expect payload in the clear.
    ScramblerBypass(bool),
}

/// Result of one line clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Raw word to drive on the transmit lanes.
    pub tx_raw: RawWord,
    /// Descrambled data word for the bus domain, if one was received.
    pub rx_word: Option<LinkWord>,
    /// The datapath was reset on this clock; queued transmit words are stale.
    pub datapath_reset: bool,
}

// ── LinkEndpoint ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct LinkEndpoint {
    trainer: LinkTrainer,
    aligner: BitAligner,
    decoder: WordDecoder,
    encoder: WordEncoder,
    scrambler: Scrambler,
    descrambler: Descrambler,
    mask: RawWord,
    generation: u64,
    decode_errors: u64,
    phy: PhyStatus,
}

impl LinkEndpoint {
    pub fn new(cfg: &LinkConfig, role: LinkRole) -> Result<Self, SerwbError> {
        cfg.validate()?;
        Ok(Self {
            trainer: LinkTrainer::new(role, cfg.training.clone()),
            aligner: BitAligner::new(cfg.lanes, &cfg.training),
            decoder: WordDecoder::new(cfg.lanes)?,
            encoder: WordEncoder::new(cfg.lanes)?,
            scrambler: Scrambler::new(&cfg.scrambler),
            descrambler: Descrambler::new(&cfg.scrambler),
            mask: (1 << cfg.word_bits()) - 1,
            generation: 0,
            decode_errors: 0,
            phy: PhyStatus::empty(),
        })
    }

    pub fn role(&self) -> LinkRole {
        self.trainer.role()
    }

    pub fn state(&self) -> LinkState {
        self.trainer.state()
    }

    /// Datapath generation, bumped on every datapath reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> LinkStatus {
        let state = self.trainer.state();
        LinkStatus {
            state,
            ready: state.is_ready(),
            error: state == LinkState::Error,
            generation: self.generation,
            decode_errors: self.decode_errors,
            offset: self.aligner.offset(),
            phy: self.phy,
            scrambler_bypass: self.scrambler.is_bypassed(),
        }
    }

    /// Apply a control register write. Takes effect on the next clock.
    pub fn apply(&mut self, control: Control) {
        match control {
            Control::Reset => {
                debug!(role = %self.role(), "reset requested");
                self.trainer.reset();
            }
            Control::ScramblerBypass(bypass) => {
                debug!(role = %self.role(), bypass, "scrambler bypass");
                self.scrambler.set_bypass(bypass);
                self.descrambler.set_bypass(bypass);
            }
        }
    }

    /// Run one line clock.
    ///
    /// `source` is only pulled while the trainer is in payload mode.
    pub fn tick<S: WordSource + ?Sized>(
        &mut self,
        rx_raw: RawWord,
        source: &mut S,
    ) -> Result<Tick, SerwbError> {
        let rx_raw = rx_raw & self.mask;
        let mut phy = PhyStatus::empty();
        phy.set(PhyStatus::RX_IDLE, rx_raw == 0);

        // ── Receive ──
        let aligned = self.aligner.push(rx_raw);
        phy.set(PhyStatus::BITSLIP_REQUEST, aligned.slipped);
        phy.set(PhyStatus::RX_COMMA, aligned.comma);

        // Damaged words still go through the descrambler so it stays in
        // step with the peer; the frame CRC rejects them downstream.
        let mut decoded = None;
        if aligned.status == AlignStatus::Locked {
            let (word, error) = self.decoder.decode_lossy(aligned.word);
            if let Some(e) = error {
                trace!(error = %e, "decode error");
                self.decode_errors += 1;
                phy.insert(PhyStatus::DECODE_ERROR);
            }
            decoded = Some(word);
        }

        // ── Train ──
        let effects = self.trainer.tick(LineSample {
            rx_idle: rx_raw == 0,
            align: aligned.status,
            decode_error: phy.contains(PhyStatus::DECODE_ERROR),
        });

        let datapath_reset = effects.actions.contains(TrainerActions::RESET_DATAPATH);
        if datapath_reset {
            self.decoder.reset();
            self.encoder.reset();
            self.scrambler.reset();
            self.descrambler.reset();
            self.generation += 1;
            debug!(role = %self.role(), generation = self.generation, "datapath reset");
        }
        if effects.actions.contains(TrainerActions::RESTART_ALIGNER) {
            self.aligner.restart();
        }
        if effects.actions.contains(TrainerActions::DELAY_CALIBRATE) {
            phy.insert(PhyStatus::DELAY_CALIBRATE);
        }
        if effects.actions.contains(TrainerActions::ENABLE_PAYLOAD) {
            self.scrambler.start_payload();
        }

        let rx_word = match decoded {
            Some(word) if !datapath_reset && self.trainer.state().forwards_rx() => {
                Some(self.descrambler.descramble(word)).filter(|w| !w.is_control())
            }
            _ => None,
        };

        // ── Transmit ──
        let tx_raw = match effects.tx {
            TxMode::Idle => {
                phy.insert(PhyStatus::TX_IDLE);
                0
            }
            TxMode::Comma => {
                phy.insert(PhyStatus::TX_COMMA);
                self.encoder.encode(LinkWord::COMMA)?
            }
            TxMode::Payload => {
                let word = self.scrambler.next_word(source);
                self.encoder.encode(word)?
            }
        };

        self.phy = phy;
        Ok(Tick {
            tx_raw,
            rx_word,
            datapath_reset,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
