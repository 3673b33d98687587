// common_models/src/ws_payloads.rs

//! WebSocket 通信中使用的消息类型常量与 Payload 结构体。
//!
//! 线上每一帧都是 `{"type": <消息类型>, "data": <载荷>}`，这里集中定义双方约定的
//! 消息类型字符串，避免在各处散落字面量。

use serde::{Deserialize, Serialize};

use crate::enums::{FeedAction, SignalPhase};

/// 保留类型：心跳探测。本端定时发送，也可能由对端主动发起。
pub const PING_MESSAGE_TYPE: &str = "ping";
/// 保留类型：心跳应答。
pub const PONG_MESSAGE_TYPE: &str = "pong";

/// 保留类型列表，这些消息只由心跳监视器处理，不会进入通用分发路径。
pub const RESERVED_MESSAGE_TYPES: [&str; 2] = [PING_MESSAGE_TYPE, PONG_MESSAGE_TYPE];

/// 视频源状态推送 (载荷为 `FeedRecord` 数组或单条记录)。
pub const FEEDS_MESSAGE_TYPE: &str = "feeds";
/// 节点拥堵遥测推送 (载荷为 `NodeCongestion` 数组或单条记录)。
pub const NODES_MESSAGE_TYPE: &str = "nodes";
/// 告警推送 (载荷为 `AlertRecord` 数组或单条记录)。
pub const ALERTS_MESSAGE_TYPE: &str = "alerts";
/// 聚合指标推送 (载荷为 `KpiSnapshot`)。
pub const METRICS_MESSAGE_TYPE: &str = "metrics";

/// 上行：视频源控制指令。
pub const FEED_COMMAND_MESSAGE_TYPE: &str = "feed_command";
/// 上行：信号灯相位切换指令。
pub const SIGNAL_PHASE_MESSAGE_TYPE: &str = "signal_phase";
/// 上行：告警确认。
pub const ALERT_ACK_MESSAGE_TYPE: &str = "alert_ack";
/// 上行：请求对端立即推送一份最新指标。
pub const METRICS_REFRESH_MESSAGE_TYPE: &str = "metrics_refresh";

/// 判断消息类型是否为保留的心跳类型。
pub fn is_reserved_message_type(message_type: &str) -> bool {
    RESERVED_MESSAGE_TYPES.contains(&message_type)
}

/// Ping 消息的载荷，线上表示为空对象 `{}`。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PingPayload {}

/// Pong 消息的载荷，线上表示为空对象 `{}`。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PongPayload {}

/// `feed_command` 消息载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeedCommandPayload {
    pub feed_id: String,
    pub action: FeedAction,
}

/// `signal_phase` 消息载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignalPhaseCommand {
    pub node_id: String,
    pub phase: SignalPhase,
    /// 相位保持时长，缺省时由信号机按自身配时方案决定。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
}

/// `alert_ack` 消息载荷。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlertAckPayload {
    pub alert_id: String,
}

/// `metrics_refresh` 消息载荷，空对象。
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MetricsRefreshPayload {}
