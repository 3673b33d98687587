//! 通用枚举模块。
//!
//! 本模块定义了交通路网实时监控中多个组件之间共享的枚举类型，
//! 例如视频源状态、拥堵等级、告警级别以及信号灯相位。
//!
//! 所有枚举在线上均以小写字符串表示 (`#[serde(rename_all = "lowercase")]`)，
//! 与对端约定的 JSON 协议保持一致。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 视频源 (摄像头推流) 的运行状态。
///
/// 对端可能新增状态值，无法识别的取值统一解析为 `Unknown`，
/// 以免整条 `feeds` 消息因为一个新状态而被丢弃。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    /// 正在推流。
    Running,
    /// 已停止。
    Stopped,
    /// 推流中但质量下降 (丢帧、码率过低等)。
    Degraded,
    /// 设备离线。
    Offline,
    /// 未知或尚未上报。
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FeedStatus::Running => "running",
            FeedStatus::Stopped => "stopped",
            FeedStatus::Degraded => "degraded",
            FeedStatus::Offline => "offline",
            FeedStatus::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// 路网节点的拥堵等级。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CongestionLevel {
    Free,
    Moderate,
    Heavy,
    Gridlock,
}

impl CongestionLevel {
    /// 根据 0~100 的拥堵评分推算等级，用于对端未给出 `level` 字段的情况。
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            CongestionLevel::Free
        } else if score < 50.0 {
            CongestionLevel::Moderate
        } else if score < 80.0 {
            CongestionLevel::Heavy
        } else {
            CongestionLevel::Gridlock
        }
    }
}

/// 告警级别。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// 信号灯相位，用于向上游下发相位切换指令。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SignalPhase {
    Red,
    Amber,
    Green,
    /// 黄闪 (夜间或故障降级模式)。
    Flashing,
}

/// 视频源控制动作。
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FeedAction {
    Start,
    Stop,
    Restart,
}
