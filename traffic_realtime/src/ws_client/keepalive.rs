// traffic_realtime/src/ws_client/keepalive.rs

//! 心跳监视器。
//!
//! 连接进入 Open 时启动，离开 Open (对端关闭、传输错误或主动断开) 时停止，且每次运行只停止一次。
//! 运行期间按固定间隔发送 `{"type":"ping","data":{}}`；收到对端的 `ping` 时立即回复一条 `pong`，
//! 这条被动应答路径与定时器无关。
//!
//! 监视器只记录 Pong 的到达时间，超过 `间隔 + 宽限时间` 未收到 Pong 时记录告警日志，
//! 但从不主动关闭连接。连接的拆除由连接管理器负责。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

use common_models::ws_payloads::{PING_MESSAGE_TYPE, PONG_MESSAGE_TYPE, PingPayload, PongPayload};
use rust_websocket_utils::message::encode;

use crate::config::AppConfig;
use crate::error::RealtimeError;

/// Ping 间隔的下限。`tokio::time::interval` 不接受零间隔。
const MIN_PING_INTERVAL: Duration = Duration::from_millis(1);

/// 心跳参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    /// Ping 发送间隔。
    pub interval: Duration,
    /// 在一个间隔之外再额外等待 Pong 的时间，超出后记录告警。
    pub pong_grace: Duration,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            pong_grace: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for KeepaliveSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            pong_grace: config.pong_grace(),
        }
    }
}

pub struct KeepaliveMonitor {
    settings: KeepaliveSettings,
    task: Mutex<Option<JoinHandle<()>>>,
    /// 本次运行的起始时间，尚未收到 Pong 时以它作为超时判断的基准。
    started_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_pong_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    pings_sent: Arc<AtomicU64>,
    pongs_sent: AtomicU64,
    stop_count: AtomicU64,
}

impl KeepaliveMonitor {
    pub fn new(mut settings: KeepaliveSettings) -> Self {
        if settings.interval < MIN_PING_INTERVAL {
            warn!(
                "[Keepalive] Ping 间隔 {:?} 过小，改用 {:?}。",
                settings.interval, MIN_PING_INTERVAL
            );
            settings.interval = MIN_PING_INTERVAL;
        }
        Self {
            settings,
            task: Mutex::new(None),
            started_at: Arc::new(RwLock::new(None)),
            last_pong_at: Arc::new(RwLock::new(None)),
            pings_sent: Arc::new(AtomicU64::new(0)),
            pongs_sent: AtomicU64::new(0),
            stop_count: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> KeepaliveSettings {
        self.settings
    }

    /// 启动定时 Ping 任务，Ping 帧写入给定的出站队列。
    ///
    /// 必须在 tokio 运行时内调用。若上一次运行尚未停止，会先将其停止。
    pub fn start(&self, outbound: UnboundedSender<Message>) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            warn!("[Keepalive] 启动时发现上一次的心跳任务仍在运行，先将其停止。");
            previous.abort();
            self.stop_count.fetch_add(1, Ordering::SeqCst);
        }

        *self.started_at.write() = Some(Utc::now());
        *self.last_pong_at.write() = None;

        let settings = self.settings;
        let started_at = Arc::clone(&self.started_at);
        let last_pong_at = Arc::clone(&self.last_pong_at);
        let pings_sent = Arc::clone(&self.pings_sent);
        *task = Some(tokio::spawn(run_ping_loop(settings, outbound, started_at, last_pong_at, pings_sent)));
        info!(
            "[Keepalive] 心跳任务已启动，间隔 {:?}，Pong 宽限 {:?}。",
            settings.interval, settings.pong_grace
        );
    }

    /// 停止心跳任务。只有真正停止了一个运行中的任务时才返回 `true` 并计数。
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                let stops = self.stop_count.fetch_add(1, Ordering::SeqCst) + 1;
                info!("[Keepalive] 心跳任务已停止 (累计停止 {} 次)。", stops);
                true
            }
            None => {
                debug!("[Keepalive] 心跳任务未在运行，忽略停止请求。");
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// 对端发来 `ping` 时立即回复一条 `pong`。
    pub fn reply_pong(&self, outbound: &UnboundedSender<Message>) -> Result<(), RealtimeError> {
        let text = encode(PONG_MESSAGE_TYPE, &PongPayload {})?;
        outbound
            .send(Message::Text(text))
            .map_err(|_| RealtimeError::NotConnected)?;
        self.pongs_sent.fetch_add(1, Ordering::SeqCst);
        debug!("[Keepalive] 已回复对端的 Ping。");
        Ok(())
    }

    /// 记录一次 Pong 的到达时间。
    pub fn record_pong(&self) {
        *self.last_pong_at.write() = Some(Utc::now());
        debug!("[Keepalive] 收到 Pong。");
    }

    pub fn last_pong_at(&self) -> Option<DateTime<Utc>> {
        *self.last_pong_at.read()
    }

    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::SeqCst)
    }

    pub fn pongs_sent(&self) -> u64 {
        self.pongs_sent.load(Ordering::SeqCst)
    }

    /// 心跳任务被有效停止的累计次数。
    pub fn stop_count(&self) -> u64 {
        self.stop_count.load(Ordering::SeqCst)
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_ping_loop(
    settings: KeepaliveSettings,
    outbound: UnboundedSender<Message>,
    started_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    last_pong_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    pings_sent: Arc<AtomicU64>,
) {
    let overdue_after = settings.interval + settings.pong_grace;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + settings.interval, settings.interval);

    loop {
        ticker.tick().await;

        let reference = (*last_pong_at.read()).or(*started_at.read());
        let elapsed = reference.and_then(|at| Utc::now().signed_duration_since(at).to_std().ok());
        if elapsed.is_some_and(|elapsed| elapsed > overdue_after) {
            warn!(
                "[Keepalive] Pong 响应超时 (超过 {:?} 未收到 Pong)，连接可能已失效。",
                overdue_after
            );
        }

        let text = match encode(PING_MESSAGE_TYPE, &PingPayload {}) {
            Ok(text) => text,
            Err(e) => {
                warn!("[Keepalive] 编码 Ping 消息失败: {}", e);
                continue;
            }
        };
        pings_sent.fetch_add(1, Ordering::SeqCst);
        if outbound.send(Message::Text(text)).is_err() {
            pings_sent.fetch_sub(1, Ordering::SeqCst);
            debug!("[Keepalive] 出站队列已关闭，心跳任务结束。");
            break;
        }
        debug!("[Keepalive] Ping 消息已发送。");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn fast_settings() -> KeepaliveSettings {
        KeepaliveSettings {
            interval: Duration::from_millis(20),
            pong_grace: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_pings_are_emitted_and_stop_is_counted_once() {
        let monitor = KeepaliveMonitor::new(fast_settings());
        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor.start(tx);
        assert!(monitor.is_running());

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("等待 Ping 超时")
            .expect("出站队列意外关闭");
        match frame {
            Message::Text(text) => assert_eq!(text, r#"{"type":"ping","data":{}}"#),
            other => panic!("非预期的帧: {:?}", other),
        }
        assert!(monitor.pings_sent() >= 1);

        assert!(monitor.stop());
        assert!(!monitor.stop());
        assert_eq!(monitor.stop_count(), 1);
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_reply_pong_is_independent_of_timer() {
        let monitor = KeepaliveMonitor::new(KeepaliveSettings::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        monitor.reply_pong(&tx).unwrap();
        assert_eq!(monitor.pongs_sent(), 1);
        assert_eq!(rx.try_recv().unwrap(), Message::Text(r#"{"type":"pong","data":{}}"#.to_string()));
        assert!(rx.try_recv().is_err(), "每个 Ping 只应回复一条 Pong");
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_record_pong_sets_timestamp() {
        let monitor = KeepaliveMonitor::new(KeepaliveSettings::default());
        assert!(monitor.last_pong_at().is_none());
        monitor.record_pong();
        assert!(monitor.last_pong_at().is_some());
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised_to_minimum_and_keeps_pinging() {
        let monitor = KeepaliveMonitor::new(KeepaliveSettings {
            interval: Duration::ZERO,
            pong_grace: Duration::ZERO,
        });
        assert_eq!(monitor.settings().interval, MIN_PING_INTERVAL);

        let (tx, mut rx) = mpsc::unbounded_channel();
        monitor.start(tx);
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("等待 Ping 超时")
                .expect("出站队列意外关闭");
        }
        assert!(monitor.is_running(), "心跳任务不应因零间隔而退出");
        assert!(monitor.stop());
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = AppConfig::default();
        config.heartbeat_interval_seconds = 5;
        config.pong_grace_seconds = 2;
        let settings = KeepaliveSettings::from(&config);
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert_eq!(settings.pong_grace, Duration::from_secs(2));
    }
}
