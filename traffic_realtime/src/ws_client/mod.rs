// traffic_realtime/src/ws_client/mod.rs

//! WebSocket 客户端相关模块。
//!
//! - `connection_manager`: 连接状态机，负责连接的建立、收发与拆除；
//! - `keepalive`: 心跳监视器；
//! - `dispatcher`: 按频道把入站消息分发给订阅者。

pub mod connection_manager;
pub mod dispatcher;
pub mod keepalive;

pub use connection_manager::{ConnectionManager, ConnectionState};
pub use dispatcher::{ChannelDispatcher, DispatchReport, SubscriptionHandle};
pub use keepalive::{KeepaliveMonitor, KeepaliveSettings};
