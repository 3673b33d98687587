// traffic_realtime/src/projectors/keyed.rs

//! 集合型领域的投影器：以记录 `id` 为键，同 id 整条替换。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use common_models::{Keyed, OneOrMany};

use crate::error::RealtimeError;
use crate::projectors::{Domain, ProjectionStatus, scoped_send};
use crate::ws_client::connection_manager::ConnectionManager;
use crate::ws_client::dispatcher::SubscriptionHandle;

/// 删除标记字段：启用后，`"removed": true` 的记录会从快照中移除而不是写入。
pub const REMOVED_FIELD: &str = "removed";

pub struct KeyedProjector<T> {
    domain: Domain,
    records: Arc<RwLock<BTreeMap<String, T>>>,
    status: Arc<ProjectionStatus>,
    tombstones: Arc<AtomicBool>,
    connection: Arc<ConnectionManager>,
    subscription: SubscriptionHandle,
}

impl<T> KeyedProjector<T>
where
    T: Keyed + Clone + DeserializeOwned + Send + Sync + 'static,
{
    /// 创建投影器并订阅该领域的频道。载荷可以是记录数组，也可以是单条记录。
    pub fn new(domain: Domain, connection: Arc<ConnectionManager>) -> Self {
        let records: Arc<RwLock<BTreeMap<String, T>>> = Arc::new(RwLock::new(BTreeMap::new()));
        let status = Arc::new(ProjectionStatus::default());
        let tombstones = Arc::new(AtomicBool::new(false));

        let subscription = {
            let records = Arc::clone(&records);
            let status = Arc::clone(&status);
            let tombstones = Arc::clone(&tombstones);
            connection
                .dispatcher()
                .subscribe::<OneOrMany<T>, _>(domain.channel, move |batch| {
                    let batch = batch.into_vec();
                    let count = batch.len();
                    merge(&mut records.write(), batch, tombstones.load(Ordering::SeqCst));
                    status.mark_update();
                    debug!("[Projector:{}] 合并了 {} 条推送记录。", domain.name, count);
                })
        };
        info!("[Projector:{}] 已订阅频道 '{}'", domain.name, domain.channel);

        Self {
            domain,
            records,
            status,
            tombstones,
            connection,
            subscription,
        }
    }

    /// 启用删除标记约定。
    pub fn with_tombstones(self) -> Self {
        self.tombstones.store(true, Ordering::SeqCst);
        self
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// 当前快照，按 id 排序。
    pub fn snapshot(&self) -> Vec<T> {
        self.records.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// 用外部批量获取的数据重置快照。之后到达的推送仍按 id 覆盖。
    pub fn seed(&self, records: Vec<T>) {
        let count = records.len();
        {
            let mut map = self.records.write();
            map.clear();
            merge(&mut map, records, self.tombstones.load(Ordering::SeqCst));
        }
        self.status.mark_seeded();
        info!("[Projector:{}] 已注入 {} 条初始记录。", self.domain.name, count);
    }

    /// 清空快照，并把领域标记为尚无数据。
    pub fn clear(&self) {
        self.records.write().clear();
        self.status.reset();
        info!("[Projector:{}] 快照已清空。", self.domain.name);
    }

    /// 是否已被注入数据或收到过至少一次推送。
    pub fn has_data(&self) -> bool {
        self.status.has_data()
    }

    /// 已合并的推送消息数量。
    pub fn updates_received(&self) -> u64 {
        self.status.updates_received()
    }

    /// 发送一条本领域允许的上行消息，其他类型返回 `OutboundTypeNotAllowed`。
    pub fn send<P: Serialize>(&self, message_type: &str, payload: &P) -> Result<(), RealtimeError> {
        scoped_send(&self.domain, &self.connection, message_type, payload)
    }
}

impl<T> Drop for KeyedProjector<T> {
    fn drop(&mut self) {
        self.connection.dispatcher().unsubscribe(&self.subscription);
    }
}

fn merge<T: Keyed>(map: &mut BTreeMap<String, T>, batch: Vec<T>, tombstones: bool) {
    for record in batch {
        if tombstones && record.extra_fields().get(REMOVED_FIELD) == Some(&Value::Bool(true)) {
            map.remove(record.key());
        } else {
            map.insert(record.key().to_string(), record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projectors::{ALERTS_DOMAIN, FEEDS_DOMAIN};
    use crate::ws_client::dispatcher::ChannelDispatcher;
    use crate::ws_client::keepalive::KeepaliveSettings;
    use common_models::{AlertRecord, AlertSeverity, FeedRecord, FeedStatus};
    use rust_websocket_utils::Envelope;
    use serde_json::json;

    fn offline_connection() -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            "ws://127.0.0.1:1/ws",
            KeepaliveSettings::default(),
            Arc::new(ChannelDispatcher::new()),
        ))
    }

    fn push(connection: &ConnectionManager, message_type: &str, data: Value) {
        connection.dispatcher().dispatch(&Envelope {
            message_type: message_type.to_string(),
            data,
        });
    }

    #[test]
    fn test_seed_then_update_replaces_record() {
        let connection = offline_connection();
        let feeds: KeyedProjector<FeedRecord> = KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection));
        assert!(!feeds.has_data());

        feeds.seed(vec![FeedRecord::new("feed1", FeedStatus::Running)]);
        assert!(feeds.has_data());
        assert_eq!(feeds.updates_received(), 0);

        push(&connection, "feeds", json!([{"id": "feed1", "status": "stopped"}]));

        let snapshot = feeds.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].status, FeedStatus::Stopped);
        assert!(feeds.get("feed2").is_none());
        assert_eq!(feeds.updates_received(), 1);
    }

    #[test]
    fn test_full_replace_drops_unsent_fields() {
        let connection = offline_connection();
        let feeds: KeyedProjector<FeedRecord> = KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection));

        push(&connection, "feeds", json!({"id": "cam-7", "status": "running", "name": "东门", "bitrate": 4096}));
        push(&connection, "feeds", json!({"id": "cam-7", "status": "degraded"}));

        let record = feeds.get("cam-7").unwrap();
        assert_eq!(record.status, FeedStatus::Degraded);
        assert!(record.name.is_none());
        assert!(record.extra.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted_and_seed_resets() {
        let connection = offline_connection();
        let feeds: KeyedProjector<FeedRecord> = KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection));
        push(&connection, "feeds", json!([{"id": "b"}, {"id": "a"}, {"id": "c"}]));
        let ids: Vec<String> = feeds.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        feeds.seed(vec![FeedRecord::new("z", FeedStatus::Offline)]);
        assert_eq!(feeds.len(), 1);
        assert!(feeds.get("a").is_none());
    }

    #[test]
    fn test_malformed_payload_leaves_snapshot_untouched() {
        let connection = offline_connection();
        let feeds: KeyedProjector<FeedRecord> = KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection));
        feeds.seed(vec![FeedRecord::new("feed1", FeedStatus::Running)]);

        push(&connection, "feeds", json!("not a record"));
        push(&connection, "feeds", json!([{"status": "stopped"}]));

        assert_eq!(feeds.snapshot(), vec![FeedRecord::new("feed1", FeedStatus::Running)]);
        assert_eq!(feeds.updates_received(), 0);
    }

    #[test]
    fn test_tombstones_remove_records() {
        let connection = offline_connection();
        let alerts: KeyedProjector<AlertRecord> =
            KeyedProjector::new(ALERTS_DOMAIN, Arc::clone(&connection)).with_tombstones();
        alerts.seed(vec![
            AlertRecord::new("a1", AlertSeverity::Warning, "路口拥堵"),
            AlertRecord::new("a2", AlertSeverity::Critical, "信号机离线"),
        ]);

        push(&connection, "alerts", json!({"id": "a1", "severity": "warning", "message": "路口拥堵", "removed": true}));

        assert!(alerts.get("a1").is_none());
        assert!(alerts.get("a2").is_some());
    }

    #[test]
    fn test_without_tombstones_removed_flag_is_kept() {
        let connection = offline_connection();
        let feeds: KeyedProjector<FeedRecord> = KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection));
        push(&connection, "feeds", json!({"id": "feed1", "removed": true}));
        let record = feeds.get("feed1").unwrap();
        assert_eq!(record.extra.get(REMOVED_FIELD), Some(&json!(true)));
    }

    #[test]
    fn test_clear_and_drop_unsubscribes() {
        let connection = offline_connection();
        {
            let feeds: KeyedProjector<FeedRecord> = KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection));
            feeds.seed(vec![FeedRecord::new("feed1", FeedStatus::Running)]);
            feeds.clear();
            assert!(feeds.is_empty());
            assert!(!feeds.has_data());
            assert_eq!(connection.dispatcher().subscriber_count("feeds"), 1);
        }
        assert_eq!(connection.dispatcher().subscriber_count("feeds"), 0);
    }

    #[test]
    fn test_scoped_send_rejects_foreign_types() {
        let connection = offline_connection();
        let feeds: KeyedProjector<FeedRecord> = KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection));
        let err = feeds.send("alert_ack", &json!({"alert_id": "a1"})).unwrap_err();
        assert_eq!(
            err,
            RealtimeError::OutboundTypeNotAllowed {
                domain: "feeds".to_string(),
                message_type: "alert_ack".to_string(),
            }
        );
        // 允许的类型在未连接时得到 NotConnected
        assert_eq!(
            feeds.send("feed_command", &json!({"feed_id": "feed1", "action": "restart"})),
            Err(RealtimeError::NotConnected)
        );
    }
}
