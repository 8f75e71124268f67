//! Shared test harness: an in-memory transport that hands back whatever is
//! pushed onto its inbound channel, used by the end-to-end scenario tests to
//! stand in for a simulated remote device without any real MIDI I/O.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use midi_ci::{Endpoint, EndpointId, InboundPacket, Result, SetupChange, Transport};

pub struct LoopbackTransport {
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundPacket>>>,
}

impl LoopbackTransport {
    pub fn new() -> (Self, mpsc::Sender<InboundPacket>) {
        let (tx, rx) = mpsc::channel(32);
        (LoopbackTransport { inbound_rx: Mutex::new(Some(rx)) }, tx)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, _destination: &EndpointId, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn inbound(&self) -> mpsc::Receiver<InboundPacket> {
        self.inbound_rx.lock().unwrap().take().expect("inbound taken twice in test")
    }

    fn destinations(&self) -> Vec<Endpoint> {
        vec![]
    }

    fn sources(&self) -> Vec<Endpoint> {
        vec![]
    }

    fn find_matching_destination(&self, _source: &EndpointId) -> Option<EndpointId> {
        None
    }

    fn setup_changed(&self) -> mpsc::Receiver<SetupChange> {
        mpsc::channel(1).1
    }
}

pub fn endpoint(id: &str) -> EndpointId {
    EndpointId(id.to_string())
}

pub fn packet(bytes: Vec<u8>) -> InboundPacket {
    InboundPacket { bytes, source: None, timestamp: Instant::now() }
}
