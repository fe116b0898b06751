//! 推送领域模型
//!
//! - [`Payload`]：通知内容，序列化为网关要求的 `{"aps": {...}}` JSON
//! - [`NotificationJob`]：队列中流转的通知任务
//! - [`Priority`]：任务优先级

pub mod job;
pub mod payload;
pub mod priority;

pub use job::{JobError, NotificationJob, TOKEN_HEX_LENGTH, decode_device_token};
pub use payload::{Alert, MAX_PAYLOAD_LENGTH, Payload, PayloadAlert, PayloadError};
pub use priority::Priority;
