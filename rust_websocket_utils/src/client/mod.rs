// rust_websocket_utils/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! `transport` 子模块负责建立连接、拆分读写端以及收发 `Envelope` 文本帧。
//! 连接状态机、心跳与消息分发等上层逻辑不在本库内，由使用方实现。

pub mod transport;
