// rust_websocket_utils/src/error.rs

//! 定义 WebSocket 工具库相关的错误类型。

use thiserror::Error;

/// WebSocket 工具库的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当 serde 序列化失败时返回。
    #[error("序列化错误: {0}")]
    SerializationError(String),

    /// 收到的文本帧不是合法的 `{"type", "data"}` 结构 (非 JSON、非对象或缺少 `type` 字段)。
    #[error("消息格式错误: {0}")]
    MalformedMessage(String),

    /// WebSocket 协议相关的错误，例如握手失败、连接被重置等。
    #[error("WebSocket协议错误: {0}")]
    WebSocketProtocolError(#[from] tokio_tungstenite::tungstenite::Error),

    /// 底层 I/O 错误。
    #[error("I/O错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 当尝试发送消息到一个已关闭的通道时发生。
    #[error("发送错误: 通道已关闭")]
    SendErrorClosed,

    /// 无效的 URL 格式，或不是 ws:// / wss:// 地址。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 未连接错误，当尝试在未建立连接时进行操作。
    #[error("未连接")]
    NotConnected,

    /// 通用消息错误，用于其他未明确分类的错误。
    #[error("消息错误: {0}")]
    Message(String),
}

impl WsError {
    /// 是否为单帧级别、可丢弃后继续接收的错误。
    ///
    /// 格式错误的帧只影响自身，连接本身仍然可用。
    pub fn is_frame_local(&self) -> bool {
        matches!(self, WsError::MalformedMessage(_) | WsError::Message(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_local_classification() {
        assert!(WsError::MalformedMessage("缺少 type 字段".to_string()).is_frame_local());
        assert!(!WsError::NotConnected.is_frame_local());
        assert!(!WsError::SendErrorClosed.is_frame_local());
    }
}
