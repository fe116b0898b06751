//! 网关二进制帧编解码
//!
//! 出站（enhanced notification）：
//! `command(1)=1 | identifier(4) | expiry(4) | token_length(2)=32 | token(32) | payload_length(2) | payload(N)`
//!
//! 入站（error response）：`command(1)=8 | status(1) | identifier(4)`，共 6 字节。
//! 所有整数均为大端序。

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use turbo_push_core::model::{JobError, MAX_PAYLOAD_LENGTH, Payload, decode_device_token};
use turbo_push_core::{FailureClass, RetryableError};

pub const NOTIFICATION_COMMAND: u8 = 1;
pub const ERROR_RESPONSE_COMMAND: u8 = 8;
pub const ERROR_RESPONSE_LENGTH: usize = 6;
pub const TOKEN_LENGTH: usize = 32;

/// 固定头部长度：command + identifier + expiry + token_length + token + payload_length
const HEADER_LENGTH: usize = 1 + 4 + 4 + 2 + TOKEN_LENGTH + 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid device token: {0}")]
    InvalidToken(String),
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("short error frame: {len} bytes")]
    ShortFrame { len: usize },
    #[error("unexpected command byte {command} in error frame")]
    ProtocolViolation { command: u8 },
}

impl CodecError {
    /// 指标标签
    pub fn reason(&self) -> &'static str {
        match self {
            CodecError::InvalidToken(_) => "invalid_token",
            CodecError::PayloadTooLarge { .. } => "payload_too_large",
            CodecError::ShortFrame { .. } => "short_frame",
            CodecError::ProtocolViolation { .. } => "protocol_violation",
        }
    }
}

impl RetryableError for CodecError {
    fn failure_class(&self) -> FailureClass {
        match self {
            CodecError::InvalidToken(_) | CodecError::PayloadTooLarge { .. } => {
                FailureClass::Permanent
            }
            CodecError::ShortFrame { .. } | CodecError::ProtocolViolation { .. } => {
                FailureClass::Protocol
            }
        }
    }
}

/// 错误帧状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStatus {
    NoError,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    Shutdown,
    Unknown,
    /// 表中未列出的状态码
    Other(u8),
}

impl ErrorStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ErrorStatus::NoError,
            1 => ErrorStatus::ProcessingError,
            2 => ErrorStatus::MissingDeviceToken,
            3 => ErrorStatus::MissingTopic,
            4 => ErrorStatus::MissingPayload,
            5 => ErrorStatus::InvalidTokenSize,
            6 => ErrorStatus::InvalidTopicSize,
            7 => ErrorStatus::InvalidPayloadSize,
            8 => ErrorStatus::InvalidToken,
            10 => ErrorStatus::Shutdown,
            255 => ErrorStatus::Unknown,
            other => ErrorStatus::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ErrorStatus::NoError => 0,
            ErrorStatus::ProcessingError => 1,
            ErrorStatus::MissingDeviceToken => 2,
            ErrorStatus::MissingTopic => 3,
            ErrorStatus::MissingPayload => 4,
            ErrorStatus::InvalidTokenSize => 5,
            ErrorStatus::InvalidTopicSize => 6,
            ErrorStatus::InvalidPayloadSize => 7,
            ErrorStatus::InvalidToken => 8,
            ErrorStatus::Shutdown => 10,
            ErrorStatus::Unknown => 255,
            ErrorStatus::Other(code) => *code,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorStatus::NoError => "no errors encountered",
            ErrorStatus::ProcessingError => "processing error",
            ErrorStatus::MissingDeviceToken => "missing device token",
            ErrorStatus::MissingTopic => "missing topic",
            ErrorStatus::MissingPayload => "missing payload",
            ErrorStatus::InvalidTokenSize => "invalid token size",
            ErrorStatus::InvalidTopicSize => "invalid topic size",
            ErrorStatus::InvalidPayloadSize => "invalid payload size",
            ErrorStatus::InvalidToken => "invalid token",
            ErrorStatus::Shutdown => "shutdown",
            ErrorStatus::Unknown => "none (unknown)",
            ErrorStatus::Other(_) => "unrecognised status",
        }
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// 入站错误帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    pub status: ErrorStatus,
    pub identifier: u32,
}

impl ErrorFrame {
    pub fn new(status: ErrorStatus, identifier: u32) -> Self {
        Self { status, identifier }
    }

    pub fn to_bytes(&self) -> [u8; ERROR_RESPONSE_LENGTH] {
        let id = self.identifier.to_be_bytes();
        [
            ERROR_RESPONSE_COMMAND,
            self.status.code(),
            id[0],
            id[1],
            id[2],
            id[3],
        ]
    }
}

/// 编码一条通知帧
pub fn encode_notification(
    identifier: u32,
    expiry: u32,
    token_hex: &str,
    payload: &Payload,
) -> Result<Bytes, CodecError> {
    let token = decode_device_token(token_hex).map_err(|err| match err {
        JobError::InvalidToken(reason) => CodecError::InvalidToken(reason),
        other => CodecError::InvalidToken(other.to_string()),
    })?;

    let body = payload.to_json_bytes();
    if body.len() > MAX_PAYLOAD_LENGTH {
        return Err(CodecError::PayloadTooLarge {
            size: body.len(),
            max: MAX_PAYLOAD_LENGTH,
        });
    }

    let mut buf = BytesMut::with_capacity(HEADER_LENGTH + body.len());
    buf.put_u8(NOTIFICATION_COMMAND);
    buf.put_u32(identifier);
    buf.put_u32(expiry);
    buf.put_u16(TOKEN_LENGTH as u16);
    buf.put_slice(&token);
    buf.put_u16(body.len() as u16);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// 解码单次读取得到的错误帧
pub fn decode_error(buf: &[u8]) -> Result<ErrorFrame, CodecError> {
    if buf.len() < ERROR_RESPONSE_LENGTH {
        return Err(CodecError::ShortFrame { len: buf.len() });
    }
    if buf[0] != ERROR_RESPONSE_COMMAND {
        return Err(CodecError::ProtocolViolation { command: buf[0] });
    }
    let identifier = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
    Ok(ErrorFrame {
        status: ErrorStatus::from_code(buf[1]),
        identifier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    #[test]
    fn test_encode_layout() {
        let payload = Payload::with_alert("hi").unwrap();
        let frame = encode_notification(0x01020304, 0x0A0B0C0D, TOKEN, &payload).unwrap();
        let body = br#"{"aps":{"alert":"hi"}}"#;

        assert_eq!(frame.len(), HEADER_LENGTH + body.len());
        assert_eq!(frame[0], 1);
        assert_eq!(&frame[1..5], &[1, 2, 3, 4]);
        assert_eq!(&frame[5..9], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&frame[9..11], &[0, 32]);
        assert_eq!(frame[11], 0x00);
        assert_eq!(frame[12], 0x11);
        assert_eq!(frame[42], 0xff);
        assert_eq!(&frame[43..45], &(body.len() as u16).to_be_bytes());
        assert_eq!(&frame[45..], body);
    }

    #[test]
    fn test_invalid_token_rejected() {
        let payload = Payload::with_alert("hi").unwrap();
        for token in ["", "abc", &"g".repeat(64), &"a".repeat(66)] {
            let err = encode_notification(1, 0, token, &payload).unwrap_err();
            assert!(matches!(err, CodecError::InvalidToken(_)), "token {token:?}");
            assert_eq!(err.failure_class(), FailureClass::Permanent);
        }
    }

    #[test]
    fn test_oversized_payload_rechecked_at_encode() {
        // 直接构造结构体以绕过构造期校验
        let payload = Payload {
            alert: Some("x".repeat(MAX_PAYLOAD_LENGTH).as_str().into()),
            ..Default::default()
        };
        let err = encode_notification(1, 0, TOKEN, &payload).unwrap_err();
        assert!(matches!(err, CodecError::PayloadTooLarge { max: 2048, .. }));
    }

    #[test]
    fn test_decode_error_frame() {
        let frame = decode_error(&[8, 8, 0, 0, 0, 42]).unwrap();
        assert_eq!(frame.status, ErrorStatus::InvalidToken);
        assert_eq!(frame.identifier, 42);
        assert_eq!(frame.to_bytes(), [8, 8, 0, 0, 0, 42]);
    }

    #[test]
    fn test_decode_short_and_bad_command() {
        assert_eq!(
            decode_error(&[8, 1, 0]),
            Err(CodecError::ShortFrame { len: 3 })
        );
        assert_eq!(
            decode_error(&[]),
            Err(CodecError::ShortFrame { len: 0 })
        );
        assert_eq!(
            decode_error(&[1, 8, 0, 0, 0, 1]),
            Err(CodecError::ProtocolViolation { command: 1 })
        );
    }

    #[test]
    fn test_status_codes() {
        for code in [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 10, 255, 9, 128] {
            assert_eq!(ErrorStatus::from_code(code).code(), code);
        }
        assert_eq!(ErrorStatus::from_code(10), ErrorStatus::Shutdown);
        assert_eq!(ErrorStatus::from_code(9), ErrorStatus::Other(9));
    }
}
