//! 请求校验器实现

use std::sync::Arc;

use turbo_push_core::model::decode_device_token;

use crate::domain::errors::SubmissionError;
use crate::domain::model::{PushRequestItem, TubeDirectory};

pub struct RequestValidatorImpl {
    directory: Arc<TubeDirectory>,
}

impl RequestValidatorImpl {
    pub fn new(directory: Arc<TubeDirectory>) -> Self {
        Self { directory }
    }
}

impl super::RequestValidator for RequestValidatorImpl {
    fn validate_push_request(&self, items: &[PushRequestItem]) -> Result<(), SubmissionError> {
        // 未注册的应用优先于其它错误
        if let Some(item) = items
            .iter()
            .find(|item| !self.directory.is_registered(&item.app_name))
        {
            return Err(SubmissionError::UnknownApp(item.app_name.clone()));
        }

        for (index, item) in items.iter().enumerate() {
            if item.tokens().next().is_none() {
                return Err(SubmissionError::MissingDeviceToken { index });
            }
            for token in item.tokens() {
                decode_device_token(token)
                    .map_err(|source| SubmissionError::InvalidDeviceToken { index, source })?;
            }
            item.payload
                .check_size()
                .map_err(|source| SubmissionError::PayloadTooLarge { index, source })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::validator::RequestValidator;
    use turbo_push_core::model::MAX_PAYLOAD_LENGTH;

    const TOKEN: &str = "abababababababababababababababababababababababababababababababab";

    fn validator() -> RequestValidatorImpl {
        RequestValidatorImpl::new(Arc::new(TubeDirectory::new(
            "push.{app}",
            "batch_push",
            ["demo".to_string()],
        )))
    }

    fn item(value: serde_json::Value) -> PushRequestItem {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_accepts_valid_request() {
        let items = vec![item(serde_json::json!({
            "app_name": "demo",
            "device_tokens": [TOKEN],
            "payload": {"alert": "hello"}
        }))];
        assert!(validator().validate_push_request(&items).is_ok());
    }

    #[test]
    fn test_unknown_app_wins_over_later_errors() {
        let items = vec![
            item(serde_json::json!({"app_name": "demo", "device_tokens": ["zz"]})),
            item(serde_json::json!({"app_name": "ghost", "device_tokens": [TOKEN]})),
        ];
        let err = validator().validate_push_request(&items).unwrap_err();
        assert_eq!(err.code(), "unknown_app_name");
    }

    #[test]
    fn test_rejects_missing_and_invalid_tokens() {
        let missing = vec![item(serde_json::json!({"app_name": "demo"}))];
        assert_eq!(
            validator().validate_push_request(&missing).unwrap_err().code(),
            "missing_device_token"
        );

        let invalid = vec![item(serde_json::json!({
            "app_name": "demo",
            "device_tokens": [TOKEN, "not-hex"]
        }))];
        assert_eq!(
            validator().validate_push_request(&invalid).unwrap_err().code(),
            "invalid_device_token"
        );
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let items = vec![item(serde_json::json!({
            "app_name": "demo",
            "device_token": TOKEN,
            "payload": {"alert": "x".repeat(MAX_PAYLOAD_LENGTH)}
        }))];
        assert_eq!(
            validator().validate_push_request(&items).unwrap_err().code(),
            "payload_too_large"
        );
    }
}
