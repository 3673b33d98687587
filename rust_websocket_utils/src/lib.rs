//! `rust_websocket_utils` 提供 WebSocket 通信的基础设施。
//!
//! 主要模块包括：
//! - `message`: 消息信封 `Envelope` 以及 `{"type", "data"}` 文本帧的编解码 (`encode` / `decode`)。
//! - `error`: 本库统一的错误类型 `WsError`。
//! - `client`: 客户端传输层，建立连接并收发信封。
//! - `server`: 服务端传输层，用于测试对端与模拟数据源。

pub mod client;
pub mod error;
pub mod message;
pub mod server;

pub use error::WsError;
pub use message::{Envelope, decode, encode};
