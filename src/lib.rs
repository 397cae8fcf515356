pub mod consumer;
pub mod producer;
pub mod queue;

// Re-export the pipeline surface at the crate root
pub use consumer::{
    ConsumeError, Consumer, ConsumerConfig, ConsumerState, ConsumerStats, FailurePolicy,
    StopReason,
};
pub use producer::Producer;
pub use queue::{Envelope, QueueError, QueueStats, SharedQueue};
