//! The boundary between the protocol core and whatever carries bytes.
//!
//! The core never opens a MIDI port itself; it is handed something that
//! implements [`Transport`] and drives discovery, PE, and subscriptions
//! entirely through that trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(pub String);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub online: bool,
}

#[derive(Debug, Clone)]
pub struct InboundPacket {
    pub bytes: Vec<u8>,
    pub source: Option<EndpointId>,
    pub timestamp: std::time::Instant,
}

#[derive(Debug, Clone)]
pub enum SetupChange {
    DestinationAdded(Endpoint),
    DestinationRemoved(EndpointId),
    SourceAdded(Endpoint),
    SourceRemoved(EndpointId),
}

/// Bytes in, bytes out, plus the endpoint bookkeeping the tracker needs to
/// resolve which destination a reply belongs on. Implementors own the real
/// MIDI I/O; this crate only ever calls through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, destination: &EndpointId, bytes: &[u8]) -> Result<()>;

    /// A receiver of every inbound packet, ordered per source endpoint.
    /// Cloning the handle fans out from one underlying stream; the trait
    /// does not mandate whether each call returns a fresh subscription or a
    /// shared one, only that per-source ordering is preserved for whichever
    /// consumer relies on it.
    fn inbound(&self) -> mpsc::Receiver<InboundPacket>;

    fn destinations(&self) -> Vec<Endpoint>;

    fn sources(&self) -> Vec<Endpoint>;

    /// Entity-based pairing: the destination belonging to the same physical
    /// device grouping as `source`, if the transport can determine one.
    fn find_matching_destination(&self, source: &EndpointId) -> Option<EndpointId>;

    fn setup_changed(&self) -> mpsc::Receiver<SetupChange>;
}

/// Resolution priority from a discovered source endpoint to the destination
/// PE requests must be sent on. Devices commonly multi-home: a discovery
/// inquiry may arrive on one endpoint while replies must go to a different
/// one belonging to the same device.
pub fn resolve_destination(transport: &dyn Transport, source: &EndpointId) -> Option<EndpointId> {
    let destinations = transport.destinations();

    if let Some(module) = destinations.iter().find(|d| d.name.to_lowercase().contains("module")) {
        return Some(module.id.clone());
    }

    if let Some(paired) = transport.find_matching_destination(source) {
        return Some(paired);
    }

    let sources = transport.sources();
    if let Some(source_endpoint) = sources.iter().find(|s| &s.id == source) {
        if let Some(exact) = destinations.iter().find(|d| d.name == source_endpoint.name) {
            return Some(exact.id.clone());
        }
        if source_endpoint.name.contains("In") {
            let swapped = source_endpoint.name.replacen("In", "Out", 1);
            if let Some(matched) = destinations.iter().find(|d| d.name == swapped) {
                return Some(matched.id.clone());
            }
        }
    }

    None
}
