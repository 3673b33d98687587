//! 实时通信核心的错误类型定义模块。
//!
//! 错误分为两类：
//! - 需要调用方感知的：`ConnectFailed`、`NotConnected`、`OutboundTypeNotAllowed`、`Encode`、`Config`；
//! - 在核心内部就地恢复、只记录日志的：`MalformedMessage` (丢弃该帧)、`SubscriberFailure` (隔离该订阅者)。
//!
//! 任何一种都不会让连接被拆除，也不会以 panic 的形式越过调用边界。

use rust_websocket_utils::error::WsError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RealtimeError {
    /// 传输层在进入 Open 之前出错，或连接尝试被 `disconnect()` 取消。
    #[error("连接失败: {0}")]
    ConnectFailed(String),

    /// 连接不处于 Open 状态时尝试发送。
    #[error("未连接，无法发送消息")]
    NotConnected,

    /// 收到的帧无法解析为消息信封。
    #[error("消息格式错误: {0}")]
    MalformedMessage(String),

    /// 某个订阅者处理消息失败 (返回错误、载荷结构不匹配或 panic)。
    #[error("订阅者处理频道 '{channel}' 的消息失败: {reason}")]
    SubscriberFailure { channel: String, reason: String },

    /// 领域投影器只允许发送属于本领域的上行消息类型。
    #[error("领域 '{domain}' 不允许发送类型为 '{message_type}' 的消息")]
    OutboundTypeNotAllowed { domain: String, message_type: String },

    /// 上行载荷无法序列化。
    #[error("消息编码失败: {0}")]
    Encode(String),

    #[error("配置错误: {0}")]
    Config(String),
}

impl From<WsError> for RealtimeError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::MalformedMessage(detail) => RealtimeError::MalformedMessage(detail),
            WsError::SerializationError(detail) => RealtimeError::Encode(detail),
            WsError::NotConnected | WsError::SendErrorClosed => RealtimeError::NotConnected,
            other => RealtimeError::ConnectFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_error_mapping() {
        assert_eq!(
            RealtimeError::from(WsError::MalformedMessage("缺少 type".to_string())),
            RealtimeError::MalformedMessage("缺少 type".to_string())
        );
        assert_eq!(RealtimeError::from(WsError::SendErrorClosed), RealtimeError::NotConnected);
        assert!(matches!(
            RealtimeError::from(WsError::InvalidUrl("http://x".to_string())),
            RealtimeError::ConnectFailed(_)
        ));
    }
}
