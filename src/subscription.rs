//! Tracks subscription intent independent of live subscription state, and
//! drives suspend/resubscribe/fail transitions as devices come and go.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::engine::PeEngine;
use crate::identity::DeviceIdentity;
use crate::muid::Muid;
use crate::transport::EndpointId;
use crate::tracker::{DeviceEvent, Tracker};
use crate::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Suspended,
    Failed,
}

#[derive(Debug, Clone)]
struct Intent {
    resource: String,
    muid_at_subscribe_time: Muid,
    device_identity: DeviceIdentity,
    state: SubscriptionState,
    subscribe_id: Option<String>,
    retry_attempts: u32,
}

#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Subscribed { resource: String, subscribe_id: String },
    Suspended { resource: String },
    Restored { resource: String, subscribe_id: String },
    Failed { resource: String },
    Notification { resource: String, body: Vec<u8> },
}

struct Inner {
    config: Config,
    engine: Arc<PeEngine>,
    tracker: Arc<Tracker>,
    intents: StdMutex<HashMap<String, Intent>>,
    events_tx: broadcast::Sender<SupervisorEvent>,
}

/// Drives subscription lifecycle independent of any single device
/// connection: a subscription intent outlives device loss and is retried
/// against whichever device later announces a matching identity.
pub struct SubscriptionSupervisor {
    inner: Arc<Inner>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SubscriptionSupervisor {
    pub fn new(config: Config, engine: Arc<PeEngine>, tracker: Arc<Tracker>) -> Self {
        let (events_tx, _) = broadcast::channel(128);
        SubscriptionSupervisor {
            inner: Arc::new(Inner {
                config,
                engine,
                tracker,
                intents: StdMutex::new(HashMap::new()),
                events_tx,
            }),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn start(&self) {
        let inner = self.inner.clone();
        let mut device_events = inner.tracker.events();
        let mut notifications = inner.engine.notifications();

        let device_task = tokio::spawn({
            let inner = inner.clone();
            async move {
                while let Ok(event) = device_events.recv().await {
                    handle_device_event(&inner, event).await;
                }
            }
        });

        let notify_task = tokio::spawn({
            let inner = inner.clone();
            async move {
                while let Ok(notification) = notifications.recv().await {
                    let _ = inner.events_tx.send(SupervisorEvent::Notification { resource: notification.resource, body: notification.body });
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(device_task);
        tasks.push(notify_task);
    }

    pub fn stop(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }

    /// Subscribe to `resource` on `destination`, recording an intent that
    /// survives device loss so it can be retried automatically.
    pub async fn subscribe(&self, resource: &str, muid: Muid, destination: &EndpointId, identity: DeviceIdentity) -> crate::error::Result<String> {
        let response = self.inner.engine.subscribe(resource, muid, destination, self.inner.config.chunk_timeout).await?;
        let subscribe_id = response.header.subscribe_id.clone().ok_or_else(|| crate::error::Error::InvalidResponse("subscribe reply missing subscribeId".into()))?;

        self.inner.intents.lock().unwrap().insert(
            resource.to_string(),
            Intent {
                resource: resource.to_string(),
                muid_at_subscribe_time: muid,
                device_identity: identity,
                state: SubscriptionState::Subscribed,
                subscribe_id: Some(subscribe_id.clone()),
                retry_attempts: 0,
            },
        );
        let _ = self.inner.events_tx.send(SupervisorEvent::Subscribed { resource: resource.to_string(), subscribe_id: subscribe_id.clone() });
        Ok(subscribe_id)
    }
}

impl Drop for SubscriptionSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn handle_device_event(inner: &Arc<Inner>, event: DeviceEvent) {
    match event {
        DeviceEvent::Lost(muid) => suspend_matching(inner, muid),
        DeviceEvent::Discovered(entry) => try_restore(inner, entry.muid, entry.identity, entry.destination).await,
    }
}

fn suspend_matching(inner: &Arc<Inner>, muid: Muid) {
    let mut intents = inner.intents.lock().unwrap();
    let mut suspended = Vec::new();
    for intent in intents.values_mut() {
        if intent.muid_at_subscribe_time == muid && intent.state == SubscriptionState::Subscribed {
            intent.state = SubscriptionState::Suspended;
            suspended.push(intent.resource.clone());
        }
    }
    drop(intents);
    for resource in suspended {
        let _ = inner.events_tx.send(SupervisorEvent::Suspended { resource });
    }
}

async fn try_restore(inner: &Arc<Inner>, muid: Muid, identity: DeviceIdentity, destination: Option<EndpointId>) {
    let Some(destination) = destination else { return };

    let candidates: Vec<String> = {
        let intents = inner.intents.lock().unwrap();
        intents
            .values()
            .filter(|i| i.state == SubscriptionState::Suspended && i.device_identity == identity)
            .map(|i| i.resource.clone())
            .collect()
    };

    for resource in candidates {
        tokio::time::sleep(inner.config.resubscribe_delay).await;

        let attempts = {
            let mut intents = inner.intents.lock().unwrap();
            let Some(intent) = intents.get_mut(&resource) else { continue };
            if intent.state != SubscriptionState::Suspended {
                continue;
            }
            intent.retry_attempts += 1;
            intent.retry_attempts
        };

        if attempts > inner.config.max_retry_attempts {
            let mut intents = inner.intents.lock().unwrap();
            if let Some(intent) = intents.get_mut(&resource) {
                intent.state = SubscriptionState::Failed;
            }
            drop(intents);
            let _ = inner.events_tx.send(SupervisorEvent::Failed { resource });
            continue;
        }

        match inner.engine.subscribe(&resource, muid, &destination, inner.config.chunk_timeout).await {
            Ok(response) => {
                if let Some(subscribe_id) = response.header.subscribe_id.clone() {
                    let mut intents = inner.intents.lock().unwrap();
                    if let Some(intent) = intents.get_mut(&resource) {
                        intent.state = SubscriptionState::Subscribed;
                        intent.muid_at_subscribe_time = muid;
                        intent.subscribe_id = Some(subscribe_id.clone());
                        intent.retry_attempts = 0;
                    }
                    drop(intents);
                    let _ = inner.events_tx.send(SupervisorEvent::Restored { resource, subscribe_id });
                }
            }
            Err(err) => {
                log::debug!("resubscribe to {resource} failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_state_transitions_are_distinct() {
        assert_ne!(SubscriptionState::Subscribed, SubscriptionState::Suspended);
        assert_ne!(SubscriptionState::Suspended, SubscriptionState::Failed);
    }
}
