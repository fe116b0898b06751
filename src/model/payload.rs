//! 通知 Payload
//!
//! 序列化后的字节数不得超过 [`MAX_PAYLOAD_LENGTH`]，超过即构造失败，永远不会被发送。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// 网关允许的最大 payload 字节数
pub const MAX_PAYLOAD_LENGTH: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// 结构化 alert
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PayloadAlert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(
        default,
        rename = "action-loc-key",
        alias = "action_loc_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub action_loc_key: Option<String>,
    #[serde(
        default,
        rename = "loc-key",
        alias = "loc_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub loc_key: Option<String>,
    #[serde(
        default,
        rename = "loc-args",
        alias = "loc_args",
        skip_serializing_if = "Option::is_none"
    )]
    pub loc_args: Option<Vec<String>>,
    #[serde(
        default,
        rename = "launch-image",
        alias = "launch_image",
        skip_serializing_if = "Option::is_none"
    )]
    pub launch_image: Option<String>,
}

impl PayloadAlert {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(body) = self.body.as_ref().filter(|b| !b.is_empty()) {
            map.insert("body".to_string(), Value::String(body.clone()));
        }
        if let Some(key) = &self.action_loc_key {
            map.insert("action-loc-key".to_string(), Value::String(key.clone()));
        }
        if let Some(key) = &self.loc_key {
            map.insert("loc-key".to_string(), Value::String(key.clone()));
        }
        if let Some(args) = &self.loc_args {
            map.insert(
                "loc-args".to_string(),
                Value::Array(args.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(image) = &self.launch_image {
            map.insert("launch-image".to_string(), Value::String(image.clone()));
        }
        Value::Object(map)
    }
}

/// alert：纯文本或结构化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alert {
    Text(String),
    Structured(PayloadAlert),
}

impl Alert {
    fn to_value(&self) -> Option<Value> {
        match self {
            Alert::Text(text) if text.is_empty() => None,
            Alert::Text(text) => Some(Value::String(text.clone())),
            Alert::Structured(alert) => Some(alert.to_value()),
        }
    }
}

impl From<&str> for Alert {
    fn from(text: &str) -> Self {
        Alert::Text(text.to_string())
    }
}

/// 通知内容
///
/// 队列任务中以字段形式（`alert` / `badge` / `sound` / `category` / `custom` /
/// `content_available`）传输，发送时通过 [`Payload::to_json_bytes`] 转换为网关格式。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub content_available: bool,
    /// 与 `aps` 同级的自定义字段；名为 `aps` 的键会被忽略
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

impl Payload {
    /// 构造并校验大小
    pub fn new(
        alert: Option<Alert>,
        badge: Option<i64>,
        sound: Option<String>,
        category: Option<String>,
        custom: Map<String, Value>,
        content_available: bool,
    ) -> Result<Self, PayloadError> {
        let payload = Self {
            alert,
            badge,
            sound,
            category,
            content_available,
            custom,
        };
        payload.check_size()?;
        Ok(payload)
    }

    /// 纯文本 alert 的便捷构造
    pub fn with_alert(text: impl Into<String>) -> Result<Self, PayloadError> {
        Self::new(
            Some(Alert::Text(text.into())),
            None,
            None,
            None,
            Map::new(),
            false,
        )
    }

    /// 网关格式的 JSON 对象
    pub fn to_value(&self) -> Value {
        let mut aps = Map::new();
        if let Some(alert) = self.alert.as_ref().and_then(Alert::to_value) {
            aps.insert("alert".to_string(), alert);
        }
        if let Some(sound) = self.sound.as_ref().filter(|s| !s.is_empty()) {
            aps.insert("sound".to_string(), Value::String(sound.clone()));
        }
        if let Some(badge) = self.badge {
            aps.insert("badge".to_string(), Value::from(badge));
        }
        if let Some(category) = self.category.as_ref().filter(|c| !c.is_empty()) {
            aps.insert("category".to_string(), Value::String(category.clone()));
        }
        if self.content_available {
            aps.insert("content-available".to_string(), Value::from(1));
        }

        let mut root = Map::new();
        root.insert("aps".to_string(), Value::Object(aps));
        for (key, value) in &self.custom {
            if key == "aps" {
                continue;
            }
            root.insert(key.clone(), value.clone());
        }
        Value::Object(root)
    }

    /// 紧凑 JSON（UTF-8，不转义非 ASCII 字符）
    pub fn to_json_bytes(&self) -> Vec<u8> {
        self.to_value().to_string().into_bytes()
    }

    pub fn encoded_len(&self) -> usize {
        self.to_json_bytes().len()
    }

    pub fn check_size(&self) -> Result<(), PayloadError> {
        let size = self.encoded_len();
        if size > MAX_PAYLOAD_LENGTH {
            return Err(PayloadError::TooLarge {
                size,
                max: MAX_PAYLOAD_LENGTH,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_alert_serialization() {
        let payload = Payload::with_alert("hello").unwrap();
        assert_eq!(payload.to_json_bytes(), br#"{"aps":{"alert":"hello"}}"#.to_vec());
    }

    #[test]
    fn test_empty_fields_omitted() {
        let payload = Payload {
            alert: Some(Alert::Text(String::new())),
            badge: Some(0),
            sound: Some(String::new()),
            category: None,
            content_available: true,
            custom: Map::new(),
        };
        assert_eq!(
            payload.to_value(),
            json!({"aps": {"badge": 0, "content-available": 1}})
        );
    }

    #[test]
    fn test_structured_alert_and_custom_keys() {
        let mut custom = Map::new();
        custom.insert("thread".to_string(), json!("t1"));
        custom.insert("aps".to_string(), json!({"evil": true}));
        let payload = Payload::new(
            Some(Alert::Structured(PayloadAlert {
                body: Some("hi".to_string()),
                loc_key: Some("GREETING".to_string()),
                loc_args: Some(vec!["a".to_string()]),
                ..Default::default()
            })),
            Some(3),
            Some("default".to_string()),
            Some("MSG".to_string()),
            custom,
            false,
        )
        .unwrap();

        assert_eq!(
            payload.to_value(),
            json!({
                "aps": {
                    "alert": {"body": "hi", "loc-key": "GREETING", "loc-args": ["a"]},
                    "badge": 3,
                    "sound": "default",
                    "category": "MSG"
                },
                "thread": "t1"
            })
        );
    }

    #[test]
    fn test_non_ascii_not_escaped() {
        let payload = Payload::with_alert("你好").unwrap();
        let text = String::from_utf8(payload.to_json_bytes()).unwrap();
        assert!(text.contains("你好"));
    }

    #[test]
    fn test_too_large_rejected_at_construction() {
        let err = Payload::with_alert("x".repeat(MAX_PAYLOAD_LENGTH)).unwrap_err();
        match err {
            PayloadError::TooLarge { size, max } => {
                assert!(size > MAX_PAYLOAD_LENGTH);
                assert_eq!(max, MAX_PAYLOAD_LENGTH);
            }
        }
    }

    #[test]
    fn test_exact_limit_accepted() {
        // {"aps":{"alert":""}} 的包装开销
        let overhead = br#"{"aps":{"alert":""}}"#.len();
        let payload = Payload::with_alert("y".repeat(MAX_PAYLOAD_LENGTH - overhead)).unwrap();
        assert_eq!(payload.encoded_len(), MAX_PAYLOAD_LENGTH);
    }

    #[test]
    fn test_job_field_format_round_trip() {
        let raw = json!({
            "alert": {"body": "b", "action_loc_key": "OPEN"},
            "badge": 1,
            "custom": {"k": 1}
        });
        let payload: Payload = serde_json::from_value(raw).unwrap();
        assert_eq!(
            payload.alert,
            Some(Alert::Structured(PayloadAlert {
                body: Some("b".to_string()),
                action_loc_key: Some("OPEN".to_string()),
                ..Default::default()
            }))
        );
        assert!(!payload.content_available);
        assert_eq!(payload.custom.get("k"), Some(&json!(1)));
    }

    #[test]
    fn test_custom_maps_are_independent() {
        let mut a = Payload::default();
        let b = Payload::default();
        a.custom.insert("x".to_string(), json!(1));
        assert!(b.custom.is_empty());
    }
}
