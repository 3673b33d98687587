// traffic_realtime/src/client.rs

//! 面向界面层的实时数据门面。
//!
//! `RealtimeClient` 由宿主显式创建并以 `Arc` 共享，持有唯一的连接管理器与四个领域投影器，
//! 使用结束后调用 `shutdown()` 显式拆除。

use std::sync::Arc;

use log::info;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use common_models::ws_payloads::{
    ALERT_ACK_MESSAGE_TYPE, AlertAckPayload, FEED_COMMAND_MESSAGE_TYPE, FeedCommandPayload,
    METRICS_REFRESH_MESSAGE_TYPE, MetricsRefreshPayload, SIGNAL_PHASE_MESSAGE_TYPE, SignalPhaseCommand,
};
use common_models::{AlertRecord, FeedRecord, KpiSnapshot, NodeCongestion};

use crate::config::AppConfig;
use crate::error::RealtimeError;
use crate::projectors::{ALERTS_DOMAIN, FEEDS_DOMAIN, KPIS_DOMAIN, KeyedProjector, NODES_DOMAIN, ScalarProjector};
use crate::ws_client::connection_manager::{ConnectionManager, ConnectionState};
use crate::ws_client::dispatcher::{ChannelDispatcher, SubscriptionHandle};
use crate::ws_client::keepalive::KeepaliveSettings;

/// 连接处于 Errored 时展示给用户的提示。原始传输错误只写日志，不直接暴露。
const CONNECTION_ERROR_MESSAGE: &str = "实时数据连接异常，请检查网络后重试。";

pub struct RealtimeClient {
    connection: Arc<ConnectionManager>,
    feeds: KeyedProjector<FeedRecord>,
    nodes: KeyedProjector<NodeCongestion>,
    alerts: KeyedProjector<AlertRecord>,
    kpis: ScalarProjector<KpiSnapshot>,
}

impl RealtimeClient {
    /// 校验配置后创建门面。配置无效时返回 `RealtimeError::Config`。
    pub fn new(config: &AppConfig) -> Result<Self, RealtimeError> {
        config.validate()?;
        Ok(Self::with_settings(config.ws_url.clone(), KeepaliveSettings::from(config)))
    }

    pub fn with_settings(url: impl Into<String>, keepalive: KeepaliveSettings) -> Self {
        let dispatcher = Arc::new(ChannelDispatcher::new());
        let connection = Arc::new(ConnectionManager::new(url, keepalive, dispatcher));
        let client = Self {
            feeds: KeyedProjector::new(FEEDS_DOMAIN, Arc::clone(&connection)),
            nodes: KeyedProjector::new(NODES_DOMAIN, Arc::clone(&connection)),
            alerts: KeyedProjector::new(ALERTS_DOMAIN, Arc::clone(&connection)).with_tombstones(),
            kpis: ScalarProjector::new(KPIS_DOMAIN, Arc::clone(&connection)),
            connection,
        };
        info!("[RealtimeClient] 已创建，目标地址: {}", client.connection.url());
        client
    }

    /// 确保连接已建立。并发调用合并为同一次连接尝试。
    pub async fn ensure_connected(&self) -> Result<(), RealtimeError> {
        self.connection.connect().await
    }

    /// 显式拆除连接。快照保留，之后仍可再次 `ensure_connected()`。
    pub async fn shutdown(&self) {
        info!("[RealtimeClient] 正在关闭实时连接...");
        self.connection.disconnect().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_changes()
    }

    /// 连接曾进入过 Open，且至少一个领域已有数据 (注入或推送) 时为真。
    pub fn is_ready(&self) -> bool {
        self.connection.has_opened()
            && (self.feeds.has_data() || self.nodes.has_data() || self.alerts.has_data() || self.kpis.has_data())
    }

    /// 连接处于 Errored 时返回面向用户的错误提示。
    pub fn error(&self) -> Option<String> {
        (self.connection.state() == ConnectionState::Errored).then(|| CONNECTION_ERROR_MESSAGE.to_string())
    }

    pub fn feeds(&self) -> Vec<FeedRecord> {
        self.feeds.snapshot()
    }

    pub fn feed(&self, id: &str) -> Option<FeedRecord> {
        self.feeds.get(id)
    }

    pub fn nodes(&self) -> Vec<NodeCongestion> {
        self.nodes.snapshot()
    }

    pub fn node(&self, id: &str) -> Option<NodeCongestion> {
        self.nodes.get(id)
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.snapshot()
    }

    pub fn alert(&self, id: &str) -> Option<AlertRecord> {
        self.alerts.get(id)
    }

    pub fn kpis(&self) -> Option<KpiSnapshot> {
        self.kpis.snapshot()
    }

    pub fn seed_feeds(&self, records: Vec<FeedRecord>) {
        self.feeds.seed(records);
    }

    pub fn seed_nodes(&self, records: Vec<NodeCongestion>) {
        self.nodes.seed(records);
    }

    pub fn seed_alerts(&self, records: Vec<AlertRecord>) {
        self.alerts.seed(records);
    }

    pub fn seed_kpis(&self, snapshot: KpiSnapshot) {
        self.kpis.seed(snapshot);
    }

    /// 发送任意类型的上行消息 (不受领域限制)。
    pub fn send<T: Serialize>(&self, message_type: &str, payload: &T) -> Result<(), RealtimeError> {
        self.connection.send(message_type, payload)
    }

    /// 订阅额外的频道。载荷结构与 `T` 不匹配时记为该订阅者的失败，不影响其他订阅者。
    pub fn subscribe<T, F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.connection.dispatcher().subscribe(channel, handler)
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.connection.dispatcher().unsubscribe(handle)
    }

    pub fn send_signal_phase(&self, command: &SignalPhaseCommand) -> Result<(), RealtimeError> {
        self.nodes.send(SIGNAL_PHASE_MESSAGE_TYPE, command)
    }

    pub fn acknowledge_alert(&self, alert_id: impl Into<String>) -> Result<(), RealtimeError> {
        let payload = AlertAckPayload { alert_id: alert_id.into() };
        self.alerts.send(ALERT_ACK_MESSAGE_TYPE, &payload)
    }

    pub fn send_feed_command(&self, command: &FeedCommandPayload) -> Result<(), RealtimeError> {
        self.feeds.send(FEED_COMMAND_MESSAGE_TYPE, command)
    }

    pub fn request_metrics_refresh(&self) -> Result<(), RealtimeError> {
        self.kpis.send(METRICS_REFRESH_MESSAGE_TYPE, &MetricsRefreshPayload {})
    }

    /// 底层连接管理器 (诊断用)。
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }
}
