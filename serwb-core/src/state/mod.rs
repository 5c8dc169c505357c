pub mod link;
mod tunnel;

pub use link::{
    Effects, LineSample, LinkRole, LinkState, LinkTrainer, TrainerContext, TrainerEvent, TxMode,
    transition,
};
pub use tunnel::{Completion, PendingRead};
