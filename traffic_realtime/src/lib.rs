//! `traffic_realtime` 交通路网监控大屏的实时通信核心。
//!
//! 维护到数据源的单条 WebSocket 连接，把推送消息按频道分发给订阅者，
//! 并为视频源、节点拥堵、告警与聚合指标四个领域维护本地快照：
//!
//! - **`ws_client`**: 连接状态机 (`ConnectionManager`)、心跳监视器与频道分发器。
//! - **`projectors`**: 各领域的状态投影器。
//! - **`client`**: 面向界面层的门面 `RealtimeClient`。
//! - **`config`** / **`error`**: 配置加载与错误类型。

pub mod client;
pub mod config;
pub mod error;
pub mod projectors;
pub mod ws_client;

pub use client::RealtimeClient;
pub use config::AppConfig;
pub use error::RealtimeError;
pub use ws_client::{ConnectionState, SubscriptionHandle};
