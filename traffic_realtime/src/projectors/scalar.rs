// traffic_realtime/src/projectors/scalar.rs

//! 标量领域的投影器：每次推送整体替换当前值。

use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::RealtimeError;
use crate::projectors::{Domain, ProjectionStatus, scoped_send};
use crate::ws_client::connection_manager::ConnectionManager;
use crate::ws_client::dispatcher::SubscriptionHandle;

pub struct ScalarProjector<T> {
    domain: Domain,
    value: Arc<RwLock<Option<T>>>,
    status: Arc<ProjectionStatus>,
    connection: Arc<ConnectionManager>,
    subscription: SubscriptionHandle,
}

impl<T> ScalarProjector<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(domain: Domain, connection: Arc<ConnectionManager>) -> Self {
        let value: Arc<RwLock<Option<T>>> = Arc::new(RwLock::new(None));
        let status = Arc::new(ProjectionStatus::default());

        let subscription = {
            let value = Arc::clone(&value);
            let status = Arc::clone(&status);
            connection.dispatcher().subscribe::<T, _>(domain.channel, move |latest| {
                *value.write() = Some(latest);
                status.mark_update();
                debug!("[Projector:{}] 当前值已被推送替换。", domain.name);
            })
        };
        info!("[Projector:{}] 已订阅频道 '{}'", domain.name, domain.channel);

        Self {
            domain,
            value,
            status,
            connection,
            subscription,
        }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn snapshot(&self) -> Option<T> {
        self.value.read().clone()
    }

    pub fn seed(&self, value: T) {
        *self.value.write() = Some(value);
        self.status.mark_seeded();
        info!("[Projector:{}] 已注入初始值。", self.domain.name);
    }

    pub fn clear(&self) {
        *self.value.write() = None;
        self.status.reset();
        info!("[Projector:{}] 当前值已清空。", self.domain.name);
    }

    pub fn has_data(&self) -> bool {
        self.status.has_data()
    }

    pub fn updates_received(&self) -> u64 {
        self.status.updates_received()
    }

    pub fn send<P: Serialize>(&self, message_type: &str, payload: &P) -> Result<(), RealtimeError> {
        scoped_send(&self.domain, &self.connection, message_type, payload)
    }
}

impl<T> Drop for ScalarProjector<T> {
    fn drop(&mut self) {
        self.connection.dispatcher().unsubscribe(&self.subscription);
    }
}
