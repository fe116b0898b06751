//! 请求校验基础设施层

pub mod request_validator;

pub use request_validator::RequestValidatorImpl;

use crate::domain::errors::SubmissionError;
use crate::domain::model::PushRequestItem;

/// 请求校验器 trait
pub trait RequestValidator: Send + Sync {
    /// 校验 `POST /push` 的整批请求
    fn validate_push_request(&self, items: &[PushRequestItem]) -> Result<(), SubmissionError>;
}
