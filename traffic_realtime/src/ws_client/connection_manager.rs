// traffic_realtime/src/ws_client/connection_manager.rs

//! 连接管理器。
//!
//! 持有到数据源的唯一一条 WebSocket 连接，驱动以下状态机：
//!
//! ```text
//! Idle --connect--> Connecting --open--> Open --close--> Closed
//!                        |                 |
//!                        +-----error-------+--error--> Errored
//! Closed / Errored --connect--> Connecting (全新的传输实例)
//! ```
//!
//! 每个传输实例对应三个后台任务：
//! - 读任务：按到达顺序解码入站帧，`ping` / `pong` 交给心跳监视器，其余交给频道分发器；
//! - 写任务：把无界出站队列中的帧依次写入 WebSocket Sink；
//! - 心跳任务：见 [`KeepaliveMonitor`]。
//!
//! 每次发起连接都会递增代数 (generation)。旧代数的任务在回调时会被识别并忽略，
//! 因此 `disconnect()` 之后迟到的连接结果不会影响新的状态。
//! 不做自动重连，也不设连接超时，是否重试由调用方决定。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::SinkExt;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

use common_models::ws_payloads::{PING_MESSAGE_TYPE, PONG_MESSAGE_TYPE};
use rust_websocket_utils::client::transport::{self, ClientConnection, ClientWsReceiver, ClientWsSink};
use rust_websocket_utils::message::{Envelope, encode};

use crate::error::RealtimeError;
use crate::ws_client::dispatcher::ChannelDispatcher;
use crate::ws_client::keepalive::{KeepaliveMonitor, KeepaliveSettings};

/// 主动断开时等待写任务把 Close 帧刷出的最长时间。
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    /// 传输出错后停留在此状态，直到下一次 `connect()` 或 `disconnect()`，不会自行迁移到 Closed。
    /// 期间可通过 `last_error()` 读取原始错误。
    Errored,
}

impl ConnectionState {
    /// 处于该状态时 `connect()` 会发起一次新的连接尝试。
    pub fn accepts_new_attempt(self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Errored => "errored",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个已进入 Open 的传输实例及其后台任务。
struct ActiveTransport {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ActiveTransport {
    /// 发送 Close 帧并等待写任务结束，读任务直接中止。
    async fn shutdown(self) {
        let ActiveTransport { generation, outbound, reader, writer } = self;
        reader.abort();
        if outbound.send(Message::Close(None)).is_err() {
            debug!("[ConnectionManager] 第 {} 代连接的写任务已结束，跳过 Close 帧。", generation);
        }
        drop(outbound);

        let writer_abort = writer.abort_handle();
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
            warn!("[ConnectionManager] 第 {} 代连接的 Close 帧未能在 {:?} 内发出，强制中止写任务。", generation, CLOSE_FLUSH_TIMEOUT);
            writer_abort.abort();
        }
    }
}

pub struct ConnectionManager {
    url: String,
    dispatcher: Arc<ChannelDispatcher>,
    keepalive: KeepaliveMonitor,
    state_tx: watch::Sender<ConnectionState>,
    /// 每次发起连接或主动断开都会递增，用于识别过期任务的回调。
    generation: AtomicU64,
    /// 状态迁移与传输实例的安装/拆除都在这把锁下完成。
    active: Mutex<Option<ActiveTransport>>,
    pending_attempt: Mutex<Option<JoinHandle<()>>>,
    connect_attempts: AtomicU64,
    has_opened: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, keepalive: KeepaliveSettings, dispatcher: Arc<ChannelDispatcher>) -> Self {
        let url = url.into();
        info!("[ConnectionManager] 正在初始化，目标地址: {}", url);
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            url,
            dispatcher,
            keepalive: KeepaliveMonitor::new(keepalive),
            state_tx,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
            pending_attempt: Mutex::new(None),
            connect_attempts: AtomicU64::new(0),
            has_opened: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    /// 建立连接，直到进入 Open 或失败。
    ///
    /// 幂等：已有连接尝试在进行中或连接已打开时，不会发起第二次尝试，而是等待同一个结果。
    /// 传输在打开前出错，或尝试被 `disconnect()` 取消时返回 `RealtimeError::ConnectFailed`。
    pub async fn connect(self: &Arc<Self>) -> Result<(), RealtimeError> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            let mut new_generation = None;
            self.state_tx.send_if_modified(|state| {
                if state.accepts_new_attempt() {
                    *state = ConnectionState::Connecting;
                    new_generation = Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1);
                    true
                } else {
                    false
                }
            });
            if let Some(generation) = new_generation {
                self.begin_attempt(generation);
                break;
            }

            let current = *state_rx.borrow_and_update();
            if current != ConnectionState::Closing {
                debug!("[ConnectionManager] 当前状态为 {}，复用已有的连接结果。", current);
                break;
            }
            // 主动断开尚未完成，等它落定后再决定是否发起新的尝试
            state_rx
                .wait_for(|state| *state != ConnectionState::Closing)
                .await
                .map(|_| ())
                .map_err(|_| RealtimeError::ConnectFailed("连接状态通道已关闭".to_string()))?;
        }

        let outcome = state_rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state)
            .map_err(|_| RealtimeError::ConnectFailed("连接状态通道已关闭".to_string()))?;

        match outcome {
            ConnectionState::Open => Ok(()),
            ConnectionState::Errored => Err(RealtimeError::ConnectFailed(
                self.last_error().unwrap_or_else(|| "未知的传输错误".to_string()),
            )),
            other => Err(RealtimeError::ConnectFailed(format!("连接尝试已被取消 (当前状态: {})", other))),
        }
    }

    fn begin_attempt(self: &Arc<Self>, generation: u64) {
        let attempts = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "[ConnectionManager] 发起第 {} 次连接尝试 (第 {} 代)，目标地址: {}",
            attempts, generation, self.url
        );
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.run_attempt(generation).await });
        if let Some(previous) = self.pending_attempt.lock().replace(handle) {
            previous.abort();
        }
    }

    async fn run_attempt(self: Arc<Self>, generation: u64) {
        match transport::connect_client(&self.url).await {
            Ok(connection) => {
                if let Err(mut stale) = self.install_transport(generation, connection) {
                    info!("[ConnectionManager] 第 {} 代连接已过期 (期间发生了主动断开)，关闭迟到的连接。", generation);
                    let _ = stale.close().await;
                }
            }
            Err(e) => self.on_connect_failed(generation, e.to_string()),
        }
    }

    /// 安装新打开的传输实例并进入 Open。代数过期或状态已不是 Connecting 时把连接原样退回。
    fn install_transport(self: &Arc<Self>, generation: u64, connection: ClientConnection) -> Result<(), ClientConnection> {
        let mut active = self.active.lock();
        let current = *self.state_tx.borrow();
        if self.generation.load(Ordering::SeqCst) != generation || current != ConnectionState::Connecting {
            return Err(connection);
        }

        let ClientConnection { ws_sender, ws_receiver } = connection;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(generation, ws_sender, outbound_rx));
        let reader = tokio::spawn(Arc::clone(self).run_reader(generation, ws_receiver, outbound_tx.clone()));
        *active = Some(ActiveTransport {
            generation,
            outbound: outbound_tx.clone(),
            reader,
            writer,
        });

        self.keepalive.start(outbound_tx);
        *self.last_error.lock() = None;
        self.has_opened.store(true, Ordering::SeqCst);
        self.state_tx.send_replace(ConnectionState::Open);
        info!("[ConnectionManager] 第 {} 代连接已打开: {}", generation, self.url);
        Ok(())
    }

    fn on_connect_failed(&self, generation: u64, reason: String) {
        let _active = self.active.lock();
        let current = *self.state_tx.borrow();
        if self.generation.load(Ordering::SeqCst) != generation || current != ConnectionState::Connecting {
            debug!("[ConnectionManager] 忽略第 {} 代过期连接尝试的失败: {}", generation, reason);
            return;
        }
        error!("[ConnectionManager] 连接到 {} 失败: {}", self.url, reason);
        *self.last_error.lock() = Some(reason);
        self.state_tx.send_replace(ConnectionState::Errored);
    }

    async fn run_reader(
        self: Arc<Self>,
        generation: u64,
        mut ws_receiver: ClientWsReceiver,
        outbound: mpsc::UnboundedSender<Message>,
    ) {
        let failure = loop {
            match transport::receive_message(&mut ws_receiver).await {
                Some(Ok(envelope)) => self.handle_inbound(envelope, &outbound),
                Some(Err(e)) if e.is_frame_local() => {
                    warn!("[ConnectionManager] 丢弃无法解析的入站帧: {}", RealtimeError::from(e));
                }
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        };
        self.on_transport_end(generation, failure);
    }

    /// 入站消息按到达顺序处理：先拦截心跳保留类型，其余交给分发器。
    fn handle_inbound(&self, envelope: Envelope, outbound: &mpsc::UnboundedSender<Message>) {
        match envelope.message_type.as_str() {
            PING_MESSAGE_TYPE => {
                if let Err(e) = self.keepalive.reply_pong(outbound) {
                    warn!("[ConnectionManager] 回复 Pong 失败: {}", e);
                }
            }
            PONG_MESSAGE_TYPE => self.keepalive.record_pong(),
            _ => {
                let report = self.dispatcher.dispatch(&envelope);
                trace!(
                    "[ConnectionManager] 频道 '{}' 分发完成: 成功 {}，失败 {}",
                    envelope.message_type, report.delivered, report.failed
                );
            }
        }
    }

    fn on_transport_end(&self, generation: u64, failure: Option<String>) {
        let finished = {
            let mut active = self.active.lock();
            if active.as_ref().map(|t| t.generation) != Some(generation) {
                debug!("[ConnectionManager] 第 {} 代连接已被替换或拆除，忽略其结束事件。", generation);
                return;
            }
            let finished = active.take();
            self.keepalive.stop();
            match failure {
                Some(reason) => {
                    error!("[ConnectionManager] 连接出错: {}", reason);
                    *self.last_error.lock() = Some(reason);
                    self.state_tx.send_replace(ConnectionState::Errored);
                }
                None => {
                    info!("[ConnectionManager] 对端关闭了连接。");
                    self.state_tx.send_replace(ConnectionState::Closed);
                }
            }
            finished
        };
        if let Some(transport) = finished {
            transport.writer.abort();
        }
    }

    /// 主动断开。幂等：Idle 或已 Closed 时什么也不做。
    ///
    /// 停止心跳 (只停一次)，打开状态下发送 Close 帧，取消进行中的连接尝试，最终进入 Closed。
    /// 拆除在独立任务中完成，调用方中途丢弃这个 future 时连接仍会落到 Closed。
    pub async fn disconnect(self: &Arc<Self>) {
        enum Step {
            Nothing(ConnectionState),
            AwaitClosing,
            Teardown(JoinHandle<()>),
        }

        let step = {
            let mut active = self.active.lock();
            let current = *self.state_tx.borrow();
            match current {
                ConnectionState::Idle | ConnectionState::Closed => Step::Nothing(current),
                ConnectionState::Closing => Step::AwaitClosing,
                ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Errored => {
                    self.generation.fetch_add(1, Ordering::SeqCst);
                    self.keepalive.stop();
                    self.state_tx.send_replace(ConnectionState::Closing);
                    info!("[ConnectionManager] 正在从 {} 状态主动断开...", current);
                    if let Some(attempt) = self.pending_attempt.lock().take() {
                        attempt.abort();
                    }
                    let transport = active.take();
                    let manager = Arc::clone(self);
                    Step::Teardown(tokio::spawn(async move { manager.finish_teardown(transport).await }))
                }
            }
        };

        match step {
            Step::Nothing(state) => debug!("[ConnectionManager] 当前状态为 {}，无需断开。", state),
            Step::AwaitClosing => {
                let mut state_rx = self.state_tx.subscribe();
                let _ = state_rx.wait_for(|state| *state != ConnectionState::Closing).await;
            }
            Step::Teardown(teardown) => {
                if let Err(e) = teardown.await {
                    warn!("[ConnectionManager] 拆除任务异常结束: {}", e);
                    self.mark_closed();
                }
            }
        }
    }

    async fn finish_teardown(&self, transport: Option<ActiveTransport>) {
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Closing {
                *state = ConnectionState::Closed;
                true
            } else {
                false
            }
        });
        if changed {
            info!("[ConnectionManager] 连接已关闭。");
        }
    }

    /// 发送一条消息。只有在 Open 状态下才会成功，否则返回 `RealtimeError::NotConnected`。
    pub fn send<T: Serialize>(&self, message_type: &str, payload: &T) -> Result<(), RealtimeError> {
        let state = self.state();
        if state != ConnectionState::Open {
            warn!(
                "[ConnectionManager] 当前状态为 {}，无法发送类型为 '{}' 的消息。",
                state, message_type
            );
            return Err(RealtimeError::NotConnected);
        }

        let text = encode(message_type, payload)?;
        let active = self.active.lock();
        let Some(transport) = active.as_ref() else {
            warn!("[ConnectionManager] 连接已拆除，无法发送类型为 '{}' 的消息。", message_type);
            return Err(RealtimeError::NotConnected);
        };
        transport.outbound.send(Message::Text(text)).map_err(|_| {
            warn!("[ConnectionManager] 出站队列已关闭，无法发送类型为 '{}' 的消息。", message_type);
            RealtimeError::NotConnected
        })?;
        debug!("[ConnectionManager] 类型为 '{}' 的消息已进入出站队列。", message_type);
        Ok(())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// 订阅状态变化。
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// 是否曾经进入过 Open。一旦为真便不再回落。
    pub fn has_opened(&self) -> bool {
        self.has_opened.load(Ordering::SeqCst)
    }

    /// 最近一次传输错误的原始描述，下一次进入 Open 时清除。
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// 已创建的传输实例数量 (诊断用)。
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn keepalive(&self) -> &KeepaliveMonitor {
        &self.keepalive
    }

    pub fn dispatcher(&self) -> &Arc<ChannelDispatcher> {
        &self.dispatcher
    }
}

/// 写任务：把出站队列中的帧依次写入 Sink，写出 Close 帧或队列关闭后结束。
async fn run_writer(generation: u64, mut ws_sender: ClientWsSink, mut outbound_rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outbound_rx.recv().await {
        let is_close = matches!(message, Message::Close(_));
        if let Err(e) = ws_sender.send(message).await {
            warn!("[ConnectionManager] 第 {} 代连接写出消息失败: {}", generation, e);
            break;
        }
        if is_close {
            break;
        }
    }
    let _ = ws_sender.close().await;
    debug!("[ConnectionManager] 第 {} 代连接的写任务已结束。", generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_models::ws_payloads::FEEDS_MESSAGE_TYPE;
    use rust_websocket_utils::server::transport::{ServerConnection, ServerTransport};
    use serde_json::json;

    fn manager_for(url: &str) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            url,
            KeepaliveSettings::default(),
            Arc::new(ChannelDispatcher::new()),
        ))
    }

    /// 绑定一个随机端口后立即释放，得到一个大概率无人监听的地址。
    async fn unused_local_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[test]
    fn test_state_helpers() {
        assert!(ConnectionState::Idle.accepts_new_attempt());
        assert!(ConnectionState::Errored.accepts_new_attempt());
        assert!(!ConnectionState::Connecting.accepts_new_attempt());
        assert!(!ConnectionState::Open.accepts_new_attempt());
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }

    #[tokio::test]
    async fn test_send_when_idle_is_not_connected() {
        let manager = manager_for("ws://127.0.0.1:1/ws");
        let result = manager.send(FEEDS_MESSAGE_TYPE, &json!({"id": "feed1"}));
        assert_eq!(result, Err(RealtimeError::NotConnected));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_is_noop() {
        let manager = manager_for("ws://127.0.0.1:1/ws");
        manager.disconnect().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.keepalive().stop_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_enters_errored() {
        let manager = manager_for(&unused_local_url().await);
        let result = manager.connect().await;
        assert!(matches!(result, Err(RealtimeError::ConnectFailed(_))));
        assert_eq!(manager.state(), ConnectionState::Errored);
        assert!(manager.last_error().is_some());
        assert!(!manager.has_opened());
        assert_eq!(manager.connect_attempts(), 1);
        assert!(!manager.keepalive().is_running());

        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.keepalive().stop_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_url_fails_without_panicking() {
        let manager = manager_for("http://127.0.0.1:8088/ws");
        assert!(matches!(manager.connect().await, Err(RealtimeError::ConnectFailed(_))));
        assert_eq!(manager.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_stale_generation_hands_the_connection_back() {
        let server = ServerTransport::bind("127.0.0.1:0").await.expect("绑定测试服务端失败");
        let url = format!("ws://{}", server.local_addr());
        let server_handle = tokio::spawn(server.serve(|mut conn: ServerConnection, _peer| async move {
            while let Some(Ok(_)) = conn.receive_message().await {}
        }));
        let manager = manager_for(&url);

        // 第 1 代的尝试完成时，主动断开已把代数推进到 2
        manager.generation.store(2, Ordering::SeqCst);
        manager.state_tx.send_replace(ConnectionState::Connecting);
        let connection = transport::connect_client(&url).await.expect("连接测试服务端失败");
        let Err(mut stale) = manager.install_transport(1, connection) else {
            panic!("过期代数的连接不应被安装");
        };
        let _ = stale.close().await;

        // 状态已不是 Connecting 时同样退回
        manager.state_tx.send_replace(ConnectionState::Closed);
        let connection = transport::connect_client(&url).await.expect("连接测试服务端失败");
        assert!(manager.install_transport(2, connection).is_err());

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(!manager.has_opened());
        assert!(!manager.keepalive().is_running());
        assert!(manager.active.lock().is_none());
        server_handle.abort();
    }
}
