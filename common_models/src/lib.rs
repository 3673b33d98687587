//! `common_models` 公共模型库 crate。
//!
//! 本 crate 集中定义了交通路网实时监控中各 Rust 组件 (`rust_websocket_utils`
//! 传输层、`traffic_realtime` 实时通信核心) 以及对端服务之间共享的数据结构：
//!
//! - **通用枚举 (`enums`)**: 视频源状态、拥堵等级、告警级别、信号灯相位等。
//! - **领域记录 (`traffic_models`)**: `FeedRecord`、`NodeCongestion`、`AlertRecord`、`KpiSnapshot`。
//! - **WebSocket 消息负载 (`ws_payloads`)**: 消息类型常量以及上行指令的 Payload 结构体。
//!
//! 所有模型都派生 `Serialize` / `Deserialize` / `Debug` / `Clone`，以 JSON 形式在线上传输。

pub mod enums;
pub mod traffic_models;
pub mod ws_payloads;

pub use enums::{AlertSeverity, CongestionLevel, FeedAction, FeedStatus, SignalPhase};
pub use traffic_models::{AlertRecord, FeedRecord, KpiSnapshot, Keyed, NodeCongestion, OneOrMany};
