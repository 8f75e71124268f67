//! High-level Property Exchange API: `get`/`set`/`subscribe`/`unsubscribe`,
//! built on top of the transaction manager and a dedicated receive task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{self, header as pe_header, mcoded7, ParsedMessage, PeHeaderFields, SubscribeCommand};
use crate::error::{Error, Result};
use crate::muid::Muid;
use crate::transaction::TransactionManager;
use crate::transport::{EndpointId, Transport};

#[derive(Debug, Clone)]
pub struct PeResponse {
    pub status: u16,
    pub header: PeHeaderFields,
    pub decoded_body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PeNotification {
    pub subscribe_id: String,
    pub resource: String,
    pub body: Vec<u8>,
}

struct ActiveSubscription {
    resource: String,
    destination: Muid,
}

struct Inner {
    own_muid: Muid,
    ci_version: u8,
    transport: Arc<dyn Transport>,
    transactions: Arc<TransactionManager>,
    pending: StdMutex<HashMap<u8, oneshot::Sender<PendingOutcome>>>,
    subscribe_pending: StdMutex<HashMap<u8, oneshot::Sender<PendingOutcome>>>,
    active_subscriptions: StdMutex<HashMap<String, ActiveSubscription>>,
    notifications_tx: broadcast::Sender<PeNotification>,
}

enum PendingOutcome {
    Reply { header: PeHeaderFields, body: Vec<u8> },
    Cancelled,
}

/// Owns the receive task and every suspended caller. Dropping the last
/// handle does not by itself stop the receive task; call `stop()` (or let
/// `Drop` do it) to abort it and resolve outstanding callers with `Cancelled`.
pub struct PeEngine {
    inner: Arc<Inner>,
    receive_task: StdMutex<Option<JoinHandle<()>>>,
}

impl PeEngine {
    pub fn new(own_muid: Muid, ci_version: u8, transport: Arc<dyn Transport>, transactions: Arc<TransactionManager>) -> Self {
        let (notifications_tx, _) = broadcast::channel(256);
        PeEngine {
            inner: Arc::new(Inner {
                own_muid,
                ci_version,
                transport,
                transactions,
                pending: StdMutex::new(HashMap::new()),
                subscribe_pending: StdMutex::new(HashMap::new()),
                active_subscriptions: StdMutex::new(HashMap::new()),
                notifications_tx,
            }),
            receive_task: StdMutex::new(None),
        }
    }

    pub fn start(&self) {
        let inner = self.inner.clone();
        let mut inbound = inner.transport.inbound();
        let task = tokio::spawn(async move {
            while let Some(packet) = inbound.recv().await {
                handle_inbound(&inner, &packet.bytes).await;
            }
        });
        *self.receive_task.lock().unwrap() = Some(task);
    }

    /// Idempotent: aborts the receive task and resolves every suspended
    /// caller with `Cancelled`.
    pub fn stop(&self) {
        if let Some(task) = self.receive_task.lock().unwrap().take() {
            task.abort();
        }
        for (_, tx) in self.inner.pending.lock().unwrap().drain() {
            let _ = tx.send(PendingOutcome::Cancelled);
        }
        for (_, tx) in self.inner.subscribe_pending.lock().unwrap().drain() {
            let _ = tx.send(PendingOutcome::Cancelled);
        }
    }

    pub fn notifications(&self) -> broadcast::Receiver<PeNotification> {
        self.inner.notifications_tx.subscribe()
    }

    pub async fn diagnostics(&self) -> crate::transaction::Diagnostics {
        self.inner.transactions.diagnostics().await
    }

    pub async fn get(&self, resource: &str, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        self.get_full(resource, None, None, None, destination, endpoint, timeout).await
    }

    pub async fn get_with_resource_id(&self, resource: &str, res_id: &str, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        self.get_full(resource, Some(res_id), None, None, destination, endpoint, timeout).await
    }

    pub async fn get_with_range(&self, resource: &str, offset: u32, limit: u32, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        self.get_full(resource, None, Some(offset), Some(limit), destination, endpoint, timeout).await
    }

    async fn get_full(&self, resource: &str, res_id: Option<&str>, offset: Option<u32>, limit: Option<u32>, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        let id = self.inner.transactions.begin(destination, timeout).await.ok_or(Error::RequestIdExhausted)?;
        let header = pe_header::build_get_header(resource, res_id, offset, limit);
        let message = codec::build_pe_get_inquiry(self.inner.own_muid, destination, id, &header, self.inner.ci_version);
        self.send_and_await(id, resource, destination, endpoint, message, timeout, false).await
    }

    pub async fn set(&self, resource: &str, data: &[u8], destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        let id = self.inner.transactions.begin(destination, timeout).await.ok_or(Error::RequestIdExhausted)?;
        let header = pe_header::build_get_header(resource, None, None, None);
        let message = codec::build_pe_set_inquiry(self.inner.own_muid, destination, id, &header, 1, 1, data, self.inner.ci_version);
        self.send_and_await(id, resource, destination, endpoint, message, timeout, false).await
    }

    pub async fn subscribe(&self, resource: &str, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        let id = self.inner.transactions.begin(destination, timeout).await.ok_or(Error::RequestIdExhausted)?;
        let header = pe_header::build_subscribe_header(resource, SubscribeCommand::Start, None);
        let message = codec::build_pe_subscribe_inquiry(self.inner.own_muid, destination, id, &header, self.inner.ci_version);
        let response = self.send_and_await(id, resource, destination, endpoint, message, timeout, true).await?;
        if let Some(subscribe_id) = response.header.subscribe_id.clone() {
            self.inner.active_subscriptions.lock().unwrap().insert(subscribe_id, ActiveSubscription { resource: resource.to_string(), destination });
        }
        Ok(response)
    }

    pub async fn unsubscribe(&self, subscribe_id: &str, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        let resource = self
            .inner
            .active_subscriptions
            .lock()
            .unwrap()
            .get(subscribe_id)
            .map(|s| s.resource.clone())
            .ok_or_else(|| Error::InvalidResponse(format!("no active subscription {subscribe_id}")))?;

        let id = self.inner.transactions.begin(destination, timeout).await.ok_or(Error::RequestIdExhausted)?;
        let header = pe_header::build_subscribe_header(&resource, SubscribeCommand::End, Some(subscribe_id));
        let message = codec::build_pe_subscribe_inquiry(self.inner.own_muid, destination, id, &header, self.inner.ci_version);
        let response = self.send_and_await(id, &resource, destination, endpoint, message, timeout, true).await?;
        self.inner.active_subscriptions.lock().unwrap().remove(subscribe_id);
        Ok(response)
    }

    pub async fn get_device_info(&self, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        self.get("DeviceInfo", destination, endpoint, timeout).await
    }

    pub async fn get_resource_list(&self, destination: Muid, endpoint: &EndpointId, timeout: Duration) -> Result<PeResponse> {
        self.get("ResourceList", destination, endpoint, timeout).await
    }

    async fn send_and_await(&self, id: u8, resource: &str, destination: Muid, endpoint: &EndpointId, message: Vec<u8>, timeout: Duration, is_subscribe: bool) -> Result<PeResponse> {
        let (tx, rx) = oneshot::channel();
        let map = if is_subscribe { &self.inner.subscribe_pending } else { &self.inner.pending };
        map.lock().unwrap().insert(id, tx);

        let guard = PendingGuard {
            inner: self.inner.clone(),
            id,
            is_subscribe,
            armed: true,
        };

        if let Err(err) = self.inner.transport.send(endpoint, &message).await {
            log::debug!("PE send to {destination} failed: {err}");
            drop(guard);
            self.inner.transactions.cancel(id).await;
            return Err(Error::Transport(err.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(PendingOutcome::Reply { header, body })) => {
                std::mem::forget(guard);
                let decoded_body = if header.is_mcoded7() { mcoded7::decode(&body) } else { body };
                let status = header.status.unwrap_or(200);
                if (200..300).contains(&status) {
                    Ok(PeResponse { status, header, decoded_body })
                } else {
                    Err(Error::DeviceError { status, message: header.message })
                }
            }
            Ok(Ok(PendingOutcome::Cancelled)) => {
                std::mem::forget(guard);
                Err(Error::Cancelled)
            }
            Ok(Err(_)) => {
                std::mem::forget(guard);
                Err(Error::Cancelled)
            }
            Err(_) => {
                drop(guard);
                Err(Error::Timeout(Some(resource.to_string())))
            }
        }
    }
}

impl Drop for PeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PendingGuard {
    inner: Arc<Inner>,
    id: u8,
    is_subscribe: bool,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let map = if self.is_subscribe { &self.inner.subscribe_pending } else { &self.inner.pending };
        map.lock().unwrap().remove(&self.id);
        let transactions = self.inner.transactions.clone();
        let id = self.id;
        tokio::spawn(async move {
            transactions.cancel(id).await;
        });
    }
}

async fn handle_inbound(inner: &Arc<Inner>, bytes: &[u8]) {
    let parsed = match codec::parse(bytes) {
        Ok(parsed) => parsed,
        Err(err) => {
            log::debug!("dropping unparseable PE message: {err}");
            return;
        }
    };

    let header = parsed.header();
    if header.destination_muid != inner.own_muid && !header.destination_muid.is_broadcast() {
        return;
    }

    match parsed {
        ParsedMessage::PeGetReply(_, body) | ParsedMessage::PeSetReply(_, body) => {
            complete_reply(inner, body.request_id, body.this_chunk, body.num_chunks, &body.header, &body.body, false).await;
        }
        ParsedMessage::PeSubscribeReply(_, body) => {
            complete_reply(inner, body.request_id, body.this_chunk, body.num_chunks, &body.header, &body.body, true).await;
        }
        ParsedMessage::PeNotify(_, body) => {
            deliver_notification(inner, &body.header, &body.body);
        }
        ParsedMessage::Nak(_, nak) => {
            fail_transaction(inner, nak.original_transaction, nak.status as u16, nak.message).await;
        }
        _ => {}
    }
}

async fn complete_reply(inner: &Arc<Inner>, request_id: u8, this_chunk: u16, num_chunks: u16, header_bytes: &[u8], body_bytes: &[u8], is_subscribe: bool) {
    use crate::transaction::ProcessChunkOutcome;

    match inner.transactions.process_chunk(request_id, this_chunk, num_chunks, header_bytes, body_bytes).await {
        ProcessChunkOutcome::Complete { header: header_bytes, body } => {
            let header = match pe_header::parse_header_fields(&header_bytes) {
                Ok(header) => header,
                Err(err) => {
                    log::debug!("dropping PE reply with unparseable header: {err}");
                    return;
                }
            };
            let map = if is_subscribe { &inner.subscribe_pending } else { &inner.pending };
            if let Some(tx) = map.lock().unwrap().remove(&request_id) {
                let _ = tx.send(PendingOutcome::Reply { header, body });
            }
        }
        ProcessChunkOutcome::Incomplete { .. } => {}
        ProcessChunkOutcome::UnknownRequestId => {
            log::debug!("PE reply for unknown or closed request id {request_id}, dropping");
        }
    }
}

fn deliver_notification(inner: &Arc<Inner>, header_bytes: &[u8], body: &[u8]) {
    let header = match pe_header::parse_header_fields(header_bytes) {
        Ok(header) => header,
        Err(err) => {
            log::debug!("dropping notify with unparseable header: {err}");
            return;
        }
    };
    let Some(subscribe_id) = header.subscribe_id else { return };

    let resource = inner.active_subscriptions.lock().unwrap().get(&subscribe_id).map(|s| s.resource.clone());
    let Some(resource) = resource else {
        log::debug!("dropping notify for unknown subscribeId {subscribe_id}");
        return;
    };

    let _ = inner.notifications_tx.send(PeNotification { subscribe_id, resource, body: body.to_vec() });
}

async fn fail_transaction(inner: &Arc<Inner>, request_id: u8, status: u16, message: Option<String>) {
    inner.transactions.complete_with_error(request_id).await;

    // A NAK carries no dialect tag, so the outstanding caller could be
    // waiting in either map depending on whether it was a get/set or a
    // subscribe/unsubscribe inquiry.
    let tx = inner.pending.lock().unwrap().remove(&request_id).or_else(|| inner.subscribe_pending.lock().unwrap().remove(&request_id));
    if let Some(tx) = tx {
        let _ = tx.send(PendingOutcome::Reply {
            header: PeHeaderFields { status: Some(status), message, ..Default::default() },
            body: Vec::new(),
        });
    }
}
