//! Link bring-up state machine.
//!
//! Both ends run the same machine; the only role difference is that a
//! slave holds off training until it sees the master driving the line.
//! No message is exchanged: recognising commas is the whole contract.
//!
//! ```text
//!  Reset ──► SendTraining ──► WaitAlign ──► Aligned ──► Ready
//!    ▲            │               │            │          │
//!    │            └──────►  Error ◄┘            │          │
//!    └─────────────────────────────────────────┴──────────┘
//! ```
//!
//! [`transition`] is pure: it takes the current context and one event and
//! returns the next context plus the effects to apply on this line clock.

use std::fmt;

use tracing::{info, warn};

use crate::align::AlignStatus;
use crate::config::TrainingConfig;
use crate::flags::TrainerActions;

// ── Types ────────────────────────────────────────────────────────

/// Link training state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    /// Power-up or explicit reset. Drives electrical idle.
    #[default]
    Reset,
    /// Transmitting commas while the receive side hunts.
    SendTraining,
    /// Waiting for the aligner to lock.
    WaitAlign,
    /// Locked and decoding; confirming the lock before payload.
    Aligned,
    /// Payload flowing in both directions.
    Ready,
    /// Training failed. Only an explicit reset leaves this state.
    Error,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reset => write!(f, "RESET"),
            Self::SendTraining => write!(f, "SEND_TRAINING"),
            Self::WaitAlign => write!(f, "WAIT_ALIGN"),
            Self::Aligned => write!(f, "ALIGNED"),
            Self::Ready => write!(f, "READY"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl LinkState {
    /// The externally visible `ready` flag.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Aligned | Self::Ready)
    }

    /// Whether received words are forwarded to the bus domain.
    pub fn forwards_rx(&self) -> bool {
        self.is_ready()
    }
}

/// Which side provides the link clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkRole {
    Master,
    Slave,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Slave => write!(f, "slave"),
        }
    }
}

/// What the transmitter drives on this clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// Electrical idle (all-zero raw word).
    #[default]
    Idle,
    /// Comma fill.
    Comma,
    /// Scrambled payload with comma idle fill.
    Payload,
}

/// What the receive side observed on one line clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LineSample {
    /// The raw receive word was all zeros.
    pub rx_idle: bool,
    pub align: AlignStatus,
    /// The aligned word failed to decode.
    pub decode_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerEvent {
    /// One line clock elapsed.
    Tick(LineSample),
    /// Explicit reset from the control register.
    Reset,
}

/// Trainer state plus its timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrainerContext {
    pub state: LinkState,
    /// Ticks spent in the current state (dwell / confirmation).
    pub timer: u32,
    /// Ticks since training started, for the alignment timeout.
    pub training: u32,
    /// Decode errors in the current error window.
    pub errors: u32,
    /// Position inside the error window.
    pub window: u32,
}

impl TrainerContext {
    fn enter(state: LinkState) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }
}

/// Side effects of one transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    pub tx: TxMode,
    pub actions: TrainerActions,
}

impl Effects {
    fn tx(tx: TxMode) -> Self {
        Self {
            tx,
            actions: TrainerActions::empty(),
        }
    }
}

// ── Transition ───────────────────────────────────────────────────

/// Advance the trainer by one event.
pub fn transition(
    ctx: TrainerContext,
    event: TrainerEvent,
    role: LinkRole,
    cfg: &TrainingConfig,
) -> (TrainerContext, Effects) {
    let sample = match event {
        TrainerEvent::Reset => return (TrainerContext::default(), Effects::tx(TxMode::Idle)),
        TrainerEvent::Tick(sample) => sample,
    };

    let mut next = ctx;
    match ctx.state {
        LinkState::Reset => {
            next.timer += 1;
            if next.timer < cfg.reset_dwell {
                return (next, Effects::tx(TxMode::Idle));
            }
            let actions = TrainerActions::RESET_DATAPATH
                | TrainerActions::RESTART_ALIGNER
                | TrainerActions::DELAY_CALIBRATE;
            (
                TrainerContext::enter(LinkState::SendTraining),
                Effects {
                    tx: TxMode::Comma,
                    actions,
                },
            )
        }

        LinkState::SendTraining => {
            next.training += 1;
            // The slave dwells only while the master is driving the line.
            if role == LinkRole::Master || !sample.rx_idle {
                next.timer += 1;
            }
            if role == LinkRole::Slave && next.training >= cfg.align_timeout {
                return (TrainerContext::enter(LinkState::Error), Effects::tx(TxMode::Idle));
            }
            if next.timer >= cfg.send_dwell {
                next.state = LinkState::WaitAlign;
                next.timer = 0;
            }
            (next, Effects::tx(TxMode::Comma))
        }

        LinkState::WaitAlign => {
            next.training += 1;
            match sample.align {
                AlignStatus::Locked => {
                    (TrainerContext::enter(LinkState::Aligned), Effects::tx(TxMode::Comma))
                }
                AlignStatus::Exhausted => {
                    (TrainerContext::enter(LinkState::Error), Effects::tx(TxMode::Idle))
                }
                _ if next.training >= cfg.align_timeout => {
                    (TrainerContext::enter(LinkState::Error), Effects::tx(TxMode::Idle))
                }
                _ => (next, Effects::tx(TxMode::Comma)),
            }
        }

        LinkState::Aligned => {
            if link_dropped(&sample) {
                return (TrainerContext::enter(LinkState::Reset), Effects::tx(TxMode::Idle));
            }
            if sample.decode_error {
                next.timer = 0;
                return (next, Effects::tx(TxMode::Comma));
            }
            next.timer += 1;
            if next.timer >= cfg.confirm_window {
                return (
                    TrainerContext::enter(LinkState::Ready),
                    Effects {
                        tx: TxMode::Payload,
                        actions: TrainerActions::ENABLE_PAYLOAD,
                    },
                );
            }
            (next, Effects::tx(TxMode::Comma))
        }

        LinkState::Ready => {
            if link_dropped(&sample) {
                return (TrainerContext::enter(LinkState::Reset), Effects::tx(TxMode::Idle));
            }
            if sample.decode_error {
                next.errors += 1;
                if next.errors > cfg.error_tolerance {
                    return (TrainerContext::enter(LinkState::Reset), Effects::tx(TxMode::Idle));
                }
            }
            next.window += 1;
            if next.window >= cfg.error_window {
                next.window = 0;
                next.errors = 0;
            }
            (next, Effects::tx(TxMode::Payload))
        }

        LinkState::Error => (next, Effects::tx(TxMode::Idle)),
    }
}

/// Alignment gone, or the peer stopped driving the line.
fn link_dropped(sample: &LineSample) -> bool {
    sample.rx_idle || sample.align != AlignStatus::Locked
}

// ── LinkTrainer ──────────────────────────────────────────────────

/// Stateful wrapper around [`transition`] that logs state changes.
#[derive(Debug, Clone)]
pub struct LinkTrainer {
    ctx: TrainerContext,
    role: LinkRole,
    cfg: TrainingConfig,
}

impl LinkTrainer {
    pub fn new(role: LinkRole, cfg: TrainingConfig) -> Self {
        Self {
            ctx: TrainerContext::default(),
            role,
            cfg,
        }
    }

    pub fn state(&self) -> LinkState {
        self.ctx.state
    }

    pub fn context(&self) -> &TrainerContext {
        &self.ctx
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Process one line clock.
    pub fn tick(&mut self, sample: LineSample) -> Effects {
        self.apply(TrainerEvent::Tick(sample))
    }

    /// Force the trainer back to RESET.
    pub fn reset(&mut self) -> Effects {
        self.apply(TrainerEvent::Reset)
    }

    fn apply(&mut self, event: TrainerEvent) -> Effects {
        let prev = self.ctx;
        let (next, effects) = transition(prev, event, self.role, &self.cfg);
        if next.state != prev.state {
            match (prev.state, next.state) {
                (LinkState::Ready | LinkState::Aligned, LinkState::Reset) => warn!(
                    role = %self.role,
                    from = %prev.state,
                    errors = next.errors.max(prev.errors),
                    "link dropped, retraining"
                ),
                (_, LinkState::Error) => warn!(
                    role = %self.role,
                    from = %prev.state,
                    ticks = prev.training,
                    "link training failed"
                ),
                _ => info!(role = %self.role, from = %prev.state, to = %next.state, "link state"),
            }
        }
        self.ctx = next;
        effects
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TrainingConfig {
        TrainingConfig::default()
    }

    fn sample(align: AlignStatus) -> LineSample {
        LineSample {
            rx_idle: false,
            align,
            decode_error: false,
        }
    }

    fn idle() -> LineSample {
        LineSample {
            rx_idle: true,
            align: AlignStatus::Idle,
            decode_error: false,
        }
    }

    fn run(
        mut ctx: TrainerContext,
        role: LinkRole,
        s: LineSample,
        n: u32,
    ) -> (TrainerContext, Effects) {
        let mut fx = Effects::default();
        for _ in 0..n {
            (ctx, fx) = transition(ctx, TrainerEvent::Tick(s), role, &cfg());
        }
        (ctx, fx)
    }

    #[test]
    fn reset_idles_then_starts_training() {
        let c = cfg();
        let (ctx, fx) = run(TrainerContext::default(), LinkRole::Master, idle(), c.reset_dwell - 1);
        assert_eq!(ctx.state, LinkState::Reset);
        assert_eq!(fx.tx, TxMode::Idle);

        let (ctx, fx) = run(ctx, LinkRole::Master, idle(), 1);
        assert_eq!(ctx.state, LinkState::SendTraining);
        assert_eq!(fx.tx, TxMode::Comma);
        assert!(fx.actions.contains(
            TrainerActions::RESET_DATAPATH
                | TrainerActions::RESTART_ALIGNER
                | TrainerActions::DELAY_CALIBRATE
        ));
    }

    #[test]
    fn master_reaches_ready() {
        let c = cfg();
        let ctx = TrainerContext::enter(LinkState::SendTraining);
        let (ctx, _) = run(ctx, LinkRole::Master, idle(), c.send_dwell);
        assert_eq!(ctx.state, LinkState::WaitAlign);

        let (ctx, _) = run(ctx, LinkRole::Master, sample(AlignStatus::Searching), 100);
        assert_eq!(ctx.state, LinkState::WaitAlign);

        let (ctx, fx) = run(ctx, LinkRole::Master, sample(AlignStatus::Locked), 1);
        assert_eq!(ctx.state, LinkState::Aligned);
        assert_eq!(fx.tx, TxMode::Comma);
        assert!(ctx.state.is_ready());

        let (ctx, fx) = run(ctx, LinkRole::Master, sample(AlignStatus::Locked), c.confirm_window);
        assert_eq!(ctx.state, LinkState::Ready);
        assert_eq!(fx.tx, TxMode::Payload);
        assert!(fx.actions.contains(TrainerActions::ENABLE_PAYLOAD));
    }

    #[test]
    fn slave_waits_for_master_clock() {
        let c = cfg();
        let ctx = TrainerContext::enter(LinkState::SendTraining);
        let (ctx, _) = run(ctx, LinkRole::Slave, idle(), c.send_dwell * 4);
        assert_eq!(ctx.state, LinkState::SendTraining);
        assert_eq!(ctx.timer, 0);

        let (ctx, _) = run(ctx, LinkRole::Slave, sample(AlignStatus::Searching), c.send_dwell);
        assert_eq!(ctx.state, LinkState::WaitAlign);
    }

    #[test]
    fn slave_times_out_on_silent_line() {
        let c = cfg();
        let ctx = TrainerContext::enter(LinkState::SendTraining);
        let (ctx, fx) = run(ctx, LinkRole::Slave, idle(), c.align_timeout);
        assert_eq!(ctx.state, LinkState::Error);
        assert_eq!(fx.tx, TxMode::Idle);
    }

    #[test]
    fn no_comma_ever_reaches_error() {
        let c = cfg();
        let ctx = TrainerContext::enter(LinkState::SendTraining);
        let (ctx, _) = run(ctx, LinkRole::Master, idle(), c.align_timeout - 1);
        assert_eq!(ctx.state, LinkState::WaitAlign);
        let (ctx, _) = run(ctx, LinkRole::Master, idle(), 1);
        assert_eq!(ctx.state, LinkState::Error);
    }

    #[test]
    fn exhausted_aligner_is_fatal() {
        let ctx = TrainerContext::enter(LinkState::WaitAlign);
        let (ctx, _) = run(ctx, LinkRole::Master, sample(AlignStatus::Exhausted), 1);
        assert_eq!(ctx.state, LinkState::Error);
    }

    #[test]
    fn error_is_sticky_until_reset() {
        let ctx = TrainerContext::enter(LinkState::Error);
        let (ctx, fx) = run(ctx, LinkRole::Master, sample(AlignStatus::Locked), 10_000);
        assert_eq!(ctx.state, LinkState::Error);
        assert_eq!(fx.tx, TxMode::Idle);

        let (ctx, _) = transition(ctx, TrainerEvent::Reset, LinkRole::Master, &cfg());
        assert_eq!(ctx, TrainerContext::default());
    }

    #[test]
    fn decode_error_restarts_confirmation() {
        let c = cfg();
        let ctx = TrainerContext::enter(LinkState::Aligned);
        let (ctx, _) = run(ctx, LinkRole::Slave, sample(AlignStatus::Locked), c.confirm_window - 1);
        let bad = LineSample {
            decode_error: true,
            ..sample(AlignStatus::Locked)
        };
        let (ctx, _) = run(ctx, LinkRole::Slave, bad, 1);
        assert_eq!(ctx.state, LinkState::Aligned);
        assert_eq!(ctx.timer, 0);

        let (ctx, _) = run(ctx, LinkRole::Slave, sample(AlignStatus::Locked), c.confirm_window - 1);
        assert_eq!(ctx.state, LinkState::Aligned);
        let (ctx, _) = run(ctx, LinkRole::Slave, sample(AlignStatus::Locked), 1);
        assert_eq!(ctx.state, LinkState::Ready);
    }

    #[test]
    fn ready_tolerates_sparse_errors() {
        let c = cfg();
        let bad = LineSample {
            decode_error: true,
            ..sample(AlignStatus::Locked)
        };
        let mut ctx = TrainerContext::enter(LinkState::Ready);
        // Tolerance-many errors per window, forever.
        for _ in 0..10 {
            (ctx, _) = run(ctx, LinkRole::Master, bad, c.error_tolerance);
            (ctx, _) = run(
                ctx,
                LinkRole::Master,
                sample(AlignStatus::Locked),
                c.error_window - c.error_tolerance,
            );
            assert_eq!(ctx.state, LinkState::Ready);
        }
    }

    #[test]
    fn ready_resets_on_error_burst() {
        let c = cfg();
        let bad = LineSample {
            decode_error: true,
            ..sample(AlignStatus::Locked)
        };
        let ctx = TrainerContext::enter(LinkState::Ready);
        let (ctx, fx) = run(ctx, LinkRole::Master, bad, c.error_tolerance + 1);
        assert_eq!(ctx.state, LinkState::Reset);
        assert_eq!(fx.tx, TxMode::Idle);
    }

    #[test]
    fn alignment_loss_drops_link() {
        for state in [LinkState::Aligned, LinkState::Ready] {
            let ctx = TrainerContext::enter(state);
            let (ctx, _) = run(ctx, LinkRole::Master, sample(AlignStatus::Lost), 1);
            assert_eq!(ctx.state, LinkState::Reset);

            let ctx = TrainerContext::enter(state);
            let (ctx, _) = run(ctx, LinkRole::Master, idle(), 1);
            assert_eq!(ctx.state, LinkState::Reset);
        }
    }

    #[test]
    fn trainer_wrapper_tracks_state() {
        let mut t = LinkTrainer::new(LinkRole::Master, cfg());
        assert_eq!(t.state(), LinkState::Reset);
        for _ in 0..cfg().reset_dwell {
            t.tick(idle());
        }
        assert_eq!(t.state(), LinkState::SendTraining);
        let fx = t.reset();
        assert_eq!(fx.tx, TxMode::Idle);
        assert_eq!(t.state(), LinkState::Reset);
    }
}
