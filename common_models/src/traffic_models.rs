//! 交通路网实时数据的领域记录模型。
//!
//! 这些结构体同时用于两条数据通路：
//! - 通过 WebSocket 实时推送的增量数据 (`feeds` / `nodes` / `alerts` / `metrics` 消息)；
//! - 由外部批量接口获取、再通过 seed 操作注入的初始数据。
//!
//! 每个记录都带有一个 `extra` 字段 (`#[serde(flatten)]`)，用于保留对端新增而本地
//! 尚未建模的字段，保证数据在注入与推送之间流转时不会丢失信息。
//! 记录中的时间戳仅作展示用途，状态合并时不参考它们。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::enums::{AlertSeverity, CongestionLevel, FeedStatus};

/// 以 `id` 为键的集合型领域记录。
///
/// 状态投影器依赖该 trait 实现“同 id 整条替换”的合并语义。
pub trait Keyed {
    /// 记录的唯一标识。
    fn key(&self) -> &str;

    /// 未建模字段的只读视图，投影器通过它识别 `"removed": true` 之类的约定字段。
    fn extra_fields(&self) -> &Map<String, Value>;
}

/// 视频源状态记录。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub id: String,
    #[serde(default)]
    pub status: FeedStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 摄像头所在的路网节点。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedRecord {
    pub fn new(id: impl Into<String>, status: FeedStatus) -> Self {
        Self {
            id: id.into(),
            status,
            name: None,
            node_id: None,
            updated_at: None,
            extra: Map::new(),
        }
    }
}

impl Keyed for FeedRecord {
    fn key(&self) -> &str {
        &self.id
    }

    fn extra_fields(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// 路网节点拥堵遥测记录。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeCongestion {
    pub id: String,
    /// 拥堵评分，约定范围 0~100。
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<CongestionLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeCongestion {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
            level: None,
            updated_at: None,
            extra: Map::new(),
        }
    }

    /// 对端给出的等级优先，否则按评分推算。
    pub fn effective_level(&self) -> CongestionLevel {
        self.level.unwrap_or_else(|| CongestionLevel::from_score(self.score))
    }
}

impl Keyed for NodeCongestion {
    fn key(&self) -> &str {
        &self.id
    }

    fn extra_fields(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// 告警记录。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub id: String,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raised_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AlertRecord {
    pub fn new(id: impl Into<String>, severity: AlertSeverity, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            severity,
            message: message.into(),
            node_id: None,
            acknowledged: false,
            raised_at: None,
            extra: Map::new(),
        }
    }
}

impl Keyed for AlertRecord {
    fn key(&self) -> &str {
        &self.id
    }

    fn extra_fields(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// 全路网聚合指标快照 (`metrics` 消息)，标量型领域，只保留最新一份。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct KpiSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub congestion_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_alerts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_feeds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 集合型消息的载荷既可以是记录数组，也可以是单条记录对象。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}
