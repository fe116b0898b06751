pub mod controller;
pub mod lane;
pub mod pipe;

pub use controller::{AdaptiveWorkerController, HelperSlot, PipeRegistry};
pub use lane::{AppRuntime, Lane};
pub use pipe::{PipeHandle, PipeMonitor, PipeSettings, PushPipe, ReplaySink};
