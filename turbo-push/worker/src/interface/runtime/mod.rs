//! 后台运行时任务

pub mod consumer;

pub use consumer::{ConsumerSettings, QueueConsumer};
