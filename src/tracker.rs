//! CI discovery: periodic broadcast, device table, endpoint resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::codec::{self, DiscoveryBody, ParsedMessage};
use crate::config::Config;
use crate::identity::DeviceIdentity;
use crate::muid::Muid;
use crate::transport::{resolve_destination, EndpointId, InboundPacket, Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub muid: Muid,
    pub identity: DeviceIdentity,
    pub category_support: crate::identity::CategorySupport,
    pub source: Option<EndpointId>,
    pub destination: Option<EndpointId>,
}

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Discovered(DeviceEntry),
    Lost(Muid),
}

struct TrackedDevice {
    entry: DeviceEntry,
    last_seen: Instant,
}

struct Inner {
    own_muid: Muid,
    config: Config,
    transport: Arc<dyn Transport>,
    devices: StdMutex<HashMap<Muid, TrackedDevice>>,
    events_tx: broadcast::Sender<DeviceEvent>,
}

/// Owns the device table and the three background loops (discovery,
/// receive, timeout) that keep it current. Each loop holds only a `Weak`
/// reference to `Inner`, so dropping every `Tracker` handle lets the tasks
/// notice on their next wakeup and exit instead of being kept alive forever.
pub struct Tracker {
    inner: Arc<Inner>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Tracker {
    pub fn new(own_muid: Muid, config: Config, transport: Arc<dyn Transport>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Tracker {
            inner: Arc::new(Inner {
                own_muid,
                config,
                transport,
                devices: StdMutex::new(HashMap::new()),
                events_tx,
            }),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn devices(&self) -> Vec<DeviceEntry> {
        self.inner.devices.lock().unwrap().values().map(|d| d.entry.clone()).collect()
    }

    pub fn device(&self, muid: Muid) -> Option<DeviceEntry> {
        self.inner.devices.lock().unwrap().get(&muid).map(|d| d.entry.clone())
    }

    pub fn destination(&self, muid: Muid) -> Option<EndpointId> {
        self.inner.devices.lock().unwrap().get(&muid).and_then(|d| d.entry.destination.clone())
    }

    pub fn start(&self) {
        let weak = Arc::downgrade(&self.inner);
        let discovery = tokio::spawn(discovery_loop(weak.clone()));
        let weak2 = Arc::downgrade(&self.inner);
        let receive = tokio::spawn(receive_loop(weak2));
        let weak3 = Arc::downgrade(&self.inner);
        let timeout = tokio::spawn(timeout_loop(weak3));
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(discovery);
        tasks.push(receive);
        tasks.push(timeout);
    }

    /// Idempotent: aborts background tasks if any are running.
    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn discovery_loop(inner: Weak<Inner>) {
    loop {
        let Some(inner) = inner.upgrade() else { return };
        let interval = inner.config.discovery_interval;
        let message = codec::build_discovery_inquiry(inner.own_muid, &inner.config.device_identity, inner.config.category_support, inner.config.max_sysex_size, inner.config.ci_version);
        for destination in inner.transport.destinations() {
            if let Err(err) = inner.transport.send(&destination.id, &message).await {
                log::debug!("discovery send to {} failed: {err}", destination.id);
            }
        }
        drop(inner);
        tokio::time::sleep(interval).await;
    }
}

async fn receive_loop(inner: Weak<Inner>) {
    let Some(strong) = inner.upgrade() else { return };
    let mut inbound = strong.transport.inbound();
    drop(strong);

    while let Some(packet) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else { return };
        handle_packet(&inner, packet).await;
    }
}

async fn handle_packet(inner: &Arc<Inner>, packet: InboundPacket) {
    let parsed = match codec::parse(&packet.bytes) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::debug!("dropping unparseable CI message: {err}");
            return;
        }
    };
    {
        let header = parsed.header();
        if header.source_muid == inner.own_muid {
            return;
        }
        if header.destination_muid != inner.own_muid && !header.destination_muid.is_broadcast() {
            return;
        }
    }

    match parsed {
        ParsedMessage::DiscoveryInquiry(header, body) => {
            register_device(inner, header.source_muid, &body, packet.source.clone());
            if inner.config.respond_to_discovery {
                let reply = codec::build_discovery_reply(
                    inner.own_muid,
                    header.source_muid,
                    &inner.config.device_identity,
                    inner.config.category_support,
                    inner.config.max_sysex_size,
                    0,
                    0,
                    inner.config.ci_version,
                );
                if let Some(destination) = packet.source.clone() {
                    if let Err(err) = inner.transport.send(&destination, &reply).await {
                        log::debug!("discovery reply send failed: {err}");
                    }
                }
            }
        }
        ParsedMessage::DiscoveryReply(header, body) => {
            register_device(inner, header.source_muid, &body, packet.source.clone());
        }
        ParsedMessage::InvalidateMuid(header, body) => {
            let target = if body.target_muid.is_broadcast() { header.source_muid } else { body.target_muid };
            remove_device(inner, target);
        }
        _ => {}
    }
}

fn register_device(inner: &Arc<Inner>, muid: Muid, body: &DiscoveryBody, source: Option<EndpointId>) {
    let destination = source.as_ref().and_then(|s| resolve_destination(inner.transport.as_ref(), s));
    let entry = DeviceEntry {
        muid,
        identity: body.identity.clone(),
        category_support: body.category_support,
        source,
        destination,
    };
    let mut devices = inner.devices.lock().unwrap();
    devices.insert(muid, TrackedDevice { entry: entry.clone(), last_seen: Instant::now() });
    drop(devices);
    let _ = inner.events_tx.send(DeviceEvent::Discovered(entry));
}

fn remove_device(inner: &Arc<Inner>, muid: Muid) {
    let removed = inner.devices.lock().unwrap().remove(&muid).is_some();
    if removed {
        let _ = inner.events_tx.send(DeviceEvent::Lost(muid));
    }
}

async fn timeout_loop(inner: Weak<Inner>) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let Some(inner) = inner.upgrade() else { return };
        let timeout = inner.config.device_timeout;
        let now = Instant::now();
        let expired: Vec<Muid> = {
            let devices = inner.devices.lock().unwrap();
            devices.iter().filter(|(_, d)| now.duration_since(d.last_seen) > timeout).map(|(&muid, _)| muid).collect()
        };
        for muid in expired {
            remove_device(&inner, muid);
        }
    }
}
