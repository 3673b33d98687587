// traffic_realtime/src/projectors/mod.rs

//! 状态投影器。
//!
//! 每个领域一个投影器，构造时向频道分发器订阅本领域的频道，把推送消息合并为一份本地快照：
//!
//! | 领域 | 频道 | 允许的上行类型 | 投影器 |
//! |------|------|----------------|--------|
//! | feeds | `feeds` | `feed_command` | `KeyedProjector<FeedRecord>` |
//! | nodes | `nodes` | `signal_phase` | `KeyedProjector<NodeCongestion>` |
//! | alerts | `alerts` | `alert_ack` | `KeyedProjector<AlertRecord>` (启用删除标记) |
//! | kpis | `metrics` | `metrics_refresh` | `ScalarProjector<KpiSnapshot>` |
//!
//! 合并语义为按到达顺序的“后到者胜”：集合型领域按 `id` 整条替换 (不做字段级合并)，
//! 标量领域整体替换。记录里内嵌的时间戳不参与判断。
//! 快照在断开与重连之间保留，只有显式的 `seed` / `clear` 会重置它们。

pub mod keyed;
pub mod scalar;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::warn;
use serde::Serialize;

use common_models::ws_payloads::{
    ALERT_ACK_MESSAGE_TYPE, ALERTS_MESSAGE_TYPE, FEED_COMMAND_MESSAGE_TYPE, FEEDS_MESSAGE_TYPE,
    METRICS_MESSAGE_TYPE, METRICS_REFRESH_MESSAGE_TYPE, NODES_MESSAGE_TYPE, SIGNAL_PHASE_MESSAGE_TYPE,
};

use crate::error::RealtimeError;
use crate::ws_client::connection_manager::ConnectionManager;

pub use keyed::KeyedProjector;
pub use scalar::ScalarProjector;

/// 一个数据领域：名称、订阅的频道以及允许发送的上行消息类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Domain {
    pub name: &'static str,
    pub channel: &'static str,
    pub outbound_types: &'static [&'static str],
}

pub const FEEDS_DOMAIN: Domain = Domain {
    name: "feeds",
    channel: FEEDS_MESSAGE_TYPE,
    outbound_types: &[FEED_COMMAND_MESSAGE_TYPE],
};

pub const NODES_DOMAIN: Domain = Domain {
    name: "nodes",
    channel: NODES_MESSAGE_TYPE,
    outbound_types: &[SIGNAL_PHASE_MESSAGE_TYPE],
};

pub const ALERTS_DOMAIN: Domain = Domain {
    name: "alerts",
    channel: ALERTS_MESSAGE_TYPE,
    outbound_types: &[ALERT_ACK_MESSAGE_TYPE],
};

pub const KPIS_DOMAIN: Domain = Domain {
    name: "kpis",
    channel: METRICS_MESSAGE_TYPE,
    outbound_types: &[METRICS_REFRESH_MESSAGE_TYPE],
};

impl Domain {
    pub fn allows(&self, message_type: &str) -> bool {
        self.outbound_types.contains(&message_type)
    }
}

/// 投影器的数据就绪标记与更新计数，供读任务中的订阅回调与调用方共享。
#[derive(Debug, Default)]
pub(crate) struct ProjectionStatus {
    has_data: AtomicBool,
    updates_received: AtomicU64,
}

impl ProjectionStatus {
    pub(crate) fn mark_seeded(&self) {
        self.has_data.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_update(&self) {
        self.updates_received.fetch_add(1, Ordering::SeqCst);
        self.has_data.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.has_data.store(false, Ordering::SeqCst);
    }

    pub(crate) fn has_data(&self) -> bool {
        self.has_data.load(Ordering::SeqCst)
    }

    pub(crate) fn updates_received(&self) -> u64 {
        self.updates_received.load(Ordering::SeqCst)
    }
}

/// 限定在某个领域内的上行发送。
pub(crate) fn scoped_send<T: Serialize>(
    domain: &Domain,
    connection: &Arc<ConnectionManager>,
    message_type: &str,
    payload: &T,
) -> Result<(), RealtimeError> {
    if !domain.allows(message_type) {
        let err = RealtimeError::OutboundTypeNotAllowed {
            domain: domain.name.to_string(),
            message_type: message_type.to_string(),
        };
        warn!("[Projector:{}] {}", domain.name, err);
        return Err(err);
    }
    connection.send(message_type, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_outbound_scopes() {
        assert!(FEEDS_DOMAIN.allows("feed_command"));
        assert!(!FEEDS_DOMAIN.allows("alert_ack"));
        assert!(ALERTS_DOMAIN.allows("alert_ack"));
        assert!(!KPIS_DOMAIN.allows("ping"));
        assert_eq!(KPIS_DOMAIN.channel, "metrics");
    }

    #[test]
    fn test_projection_status() {
        let status = ProjectionStatus::default();
        assert!(!status.has_data());
        status.mark_update();
        status.mark_update();
        assert!(status.has_data());
        assert_eq!(status.updates_received(), 2);
        status.reset();
        assert!(!status.has_data());
        assert_eq!(status.updates_received(), 2);
    }
}
