pub mod batch_consumer;

pub use batch_consumer::{BatchConsumerSettings, BatchPushConsumer};
