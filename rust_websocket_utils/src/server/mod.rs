// rust_websocket_utils/src/server/mod.rs

//! WebSocket 服务端模块。
//!
//! `transport` 子模块提供最小化的监听与握手逻辑，并把每个连接包装成
//! `ServerConnection` 交给上层回调，用于集成测试中的对端以及模拟数据源。

pub mod transport;
