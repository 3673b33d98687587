// rust_websocket_utils/src/message.rs

//! 定义 WebSocket 通信中使用的消息信封及其编解码。
//!
//! 线上每条消息都是一个 JSON 文本帧：
//!
//! ```json
//! {"type": "nodes", "data": [{"id": "n1", "score": 42}]}
//! ```
//!
//! `type` 决定消息路由到哪个频道，`data` 是不透明的业务载荷，由订阅方自行解释。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use common_models::ws_payloads::is_reserved_message_type;

use crate::error::WsError;

/// `Envelope` 是一次收发的解码结果：一个类型标签加上一个不透明的载荷。
///
/// 每条入站或出站帧对应一个临时的 `Envelope`，不做缓存。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    /// 消息类型，即频道名称，例如 `"feeds"`、`"ping"`。
    #[serde(rename = "type")]
    pub message_type: String,

    /// 消息载荷。对端省略 `data` 字段时为 `Value::Null`。
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// 由任意可序列化的载荷构造信封。
    pub fn new<T: Serialize>(message_type: impl Into<String>, payload: &T) -> Result<Self, WsError> {
        let data = serde_json::to_value(payload)
            .map_err(|e| WsError::SerializationError(format!("序列化载荷失败: {}", e)))?;
        Ok(Self {
            message_type: message_type.into(),
            data,
        })
    }

    /// 是否为心跳保留类型 (`ping` / `pong`)。
    pub fn is_reserved(&self) -> bool {
        is_reserved_message_type(&self.message_type)
    }

    /// 序列化为线上文本帧。
    pub fn to_text(&self) -> Result<String, WsError> {
        serde_json::to_string(self)
            .map_err(|e| WsError::SerializationError(format!("信封序列化为JSON失败: {}", e)))
    }
}

/// 将消息类型与载荷编码为线上文本帧 `{"type": ..., "data": ...}`。
pub fn encode<T: Serialize>(message_type: &str, payload: &T) -> Result<String, WsError> {
    Envelope::new(message_type, payload)?.to_text()
}

/// 将线上文本帧解码为 `Envelope`。
///
/// 以下情况返回 `WsError::MalformedMessage`：
/// - 文本不是合法 JSON；
/// - 顶层不是 JSON 对象；
/// - 缺少 `type` 字段，或 `type` 不是字符串。
pub fn decode(text: &str) -> Result<Envelope, WsError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| WsError::MalformedMessage(format!("不是合法的JSON: {}, 原始文本: '{}'", e, text)))?;

    let Value::Object(mut fields) = value else {
        return Err(WsError::MalformedMessage(format!("顶层不是JSON对象, 原始文本: '{}'", text)));
    };

    let message_type = match fields.remove("type") {
        Some(Value::String(message_type)) => message_type,
        Some(other) => {
            return Err(WsError::MalformedMessage(format!("'type' 字段不是字符串: {}", other)));
        }
        None => {
            return Err(WsError::MalformedMessage(format!("缺少 'type' 字段, 原始文本: '{}'", text)));
        }
    };

    Ok(Envelope {
        message_type,
        data: fields.remove("data").unwrap_or(Value::Null),
    })
}
