// traffic_realtime/src/ws_client/dispatcher.rs

//! 频道分发器。
//!
//! 按消息类型 (频道) 维护订阅者列表，把解码后的信封载荷分发给该频道的所有订阅者。
//! 订阅者在存储层统一为无类型的 `Fn(&Value) -> Result<(), String>`，
//! 类型化订阅 (`subscribe::<T>`) 在边界处完成反序列化，结构不匹配视为该订阅者失败。
//!
//! 分发时先复制出当前频道的处理函数列表再逐个调用，调用期间不持有注册表的锁，
//! 所以处理函数内部可以安全地订阅或取消订阅。

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, trace, warn};
use rust_websocket_utils::Envelope;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use common_models::ws_payloads::is_reserved_message_type;

use crate::error::RealtimeError;

/// 无类型的订阅处理函数。
pub type RawHandler = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// 订阅句柄，用于取消订阅。只会移除创建它的那一次注册。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: String,
    id: Uuid,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// 一次分发的结果统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// 成功处理该消息的订阅者数量。
    pub delivered: usize,
    /// 返回错误或 panic 的订阅者数量。
    pub failed: usize,
}

#[derive(Default)]
pub struct ChannelDispatcher {
    channels: DashMap<String, Vec<(Uuid, RawHandler)>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个无类型订阅者。同一频道可以有任意多个订阅者，调用顺序不做保证。
    pub fn subscribe_raw<F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        let channel = channel.into();
        let id = Uuid::new_v4();
        if is_reserved_message_type(&channel) {
            warn!(
                "[Dispatcher] 频道 '{}' 是保留的心跳类型，订阅可以注册但永远不会收到消息。",
                channel
            );
        }
        self.channels
            .entry(channel.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("[Dispatcher] 新订阅 {} 注册到频道 '{}'", id, channel);
        SubscriptionHandle { channel, id }
    }

    /// 注册一个类型化订阅者：载荷先反序列化为 `T`，失败时记为该订阅者的 `SubscriberFailure`。
    pub fn subscribe<T, F>(&self, channel: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_raw(channel, move |data: &Value| {
            let payload = T::deserialize(data).map_err(|e| format!("载荷结构与订阅类型不匹配: {}", e))?;
            handler(payload);
            Ok(())
        })
    }

    /// 取消一次订阅。返回是否真的移除了一条注册；频道为空时连同频道一起移除。
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let (removed, now_empty) = match self.channels.get_mut(&handle.channel) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(id, _)| *id != handle.id);
                (entry.len() < before, entry.is_empty())
            }
            None => (false, false),
        };
        if now_empty {
            self.channels.remove_if(&handle.channel, |_, handlers| handlers.is_empty());
        }
        if removed {
            debug!("[Dispatcher] 订阅 {} 已从频道 '{}' 移除", handle.id, handle.channel);
        }
        removed
    }

    /// 把信封载荷分发给分发时刻注册在该频道下的所有订阅者。
    ///
    /// 保留类型 (`ping` / `pong`) 不会被分发。单个订阅者的失败被隔离并记录日志，
    /// 不影响其他订阅者。
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchReport {
        let mut report = DispatchReport::default();
        if envelope.is_reserved() {
            trace!("[Dispatcher] 保留类型 '{}' 不进入分发路径", envelope.message_type);
            return report;
        }

        let handlers: Vec<RawHandler> = match self.channels.get(&envelope.message_type) {
            Some(entry) => entry.value().iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => {
                debug!("[Dispatcher] 频道 '{}' 没有订阅者，消息被忽略", envelope.message_type);
                return report;
            }
        };

        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&envelope.data)));
            let reason = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(reason)) => reason,
                Err(panic) => panic_reason(panic.as_ref()),
            };
            report.failed += 1;
            let failure = RealtimeError::SubscriberFailure {
                channel: envelope.message_type.clone(),
                reason,
            };
            warn!("[Dispatcher] {}", failure);
        }
        report
    }

    /// 当前有订阅者的频道数量。
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|entry| entry.len()).unwrap_or(0)
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("处理函数 panic: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("处理函数 panic: {}", msg)
    } else {
        "处理函数 panic".to_string()
    }
}
