pub mod model;
pub mod replay_buffer;
pub mod scaling;

pub use model::{Dispatch, DispatchOutcome, Verdict};
pub use replay_buffer::{ReplayBuffer, ReplayOutcome};
pub use scaling::{ScalingAction, ScalingPolicy, SlotView};
