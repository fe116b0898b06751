pub mod queue_publisher;

pub use queue_publisher::QueueJobPublisher;
