//! A pure Rust implementation of MIDI Capability Inquiry (MIDI-CI) and
//! Property Exchange: a bit-exact wire codec, a Request ID/chunk-aware
//! transaction engine, a device discovery tracker, and a subscription
//! supervisor, all driven through a transport-agnostic boundary.
#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod chunk;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod framer;
pub mod identity;
pub mod muid;
pub mod request_id;
pub mod subscription;
pub mod tracker;
pub mod transaction;
pub mod transport;

pub use config::Config;
pub use engine::{PeEngine, PeNotification, PeResponse};
pub use error::{Error, Result};
pub use framer::SysExFramer;
pub use identity::{CategorySupport, DeviceIdentity, ManufacturerId};
pub use muid::Muid;
pub use request_id::RequestIdPool;
pub use subscription::{SubscriptionState, SubscriptionSupervisor, SupervisorEvent};
pub use tracker::{DeviceEntry, DeviceEvent, Tracker};
pub use transaction::TransactionManager;
pub use transport::{Endpoint, EndpointId, InboundPacket, SetupChange, Transport};

use std::sync::Arc;

/// Wires together the discovery tracker, transaction manager, PE engine,
/// and subscription supervisor over one shared transport.
pub struct MidiCi {
    pub tracker: Arc<Tracker>,
    pub engine: Arc<PeEngine>,
    pub subscriptions: Arc<SubscriptionSupervisor>,
    transactions: Arc<TransactionManager>,
}

impl MidiCi {
    pub fn new(own_muid: Muid, config: Config, transport: Arc<dyn Transport>) -> Self {
        let transactions = Arc::new(TransactionManager::new(config.request_id_cooldown, config.chunk_timeout, config.max_inflight_per_device));
        let tracker = Arc::new(Tracker::new(own_muid, config.clone(), transport.clone()));
        let engine = Arc::new(PeEngine::new(own_muid, config.ci_version, transport, transactions.clone()));
        let subscriptions = Arc::new(SubscriptionSupervisor::new(config, engine.clone(), tracker.clone()));
        MidiCi { tracker, engine, subscriptions, transactions }
    }

    pub fn start(&self) {
        self.tracker.start();
        self.engine.start();
        self.subscriptions.start();
    }

    /// Stop every background task, resolve outstanding callers with
    /// `Cancelled`, and release all Request IDs without cooldown. Idempotent.
    pub async fn stop(&self) {
        self.subscriptions.stop();
        self.engine.stop();
        self.tracker.stop();
        self.transactions.shutdown().await;
    }

    pub async fn diagnostics(&self) -> transaction::Diagnostics {
        self.transactions.diagnostics().await
    }
}
