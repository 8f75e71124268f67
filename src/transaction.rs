//! Couples the request ID pool, chunk assembler, per-device inflight limits,
//! and transaction timeouts into one disciplined owner.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::chunk::{ChunkAssembler, ChunkOutcome};
use crate::muid::Muid;
use crate::request_id::RequestIdPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessChunkOutcome {
    Incomplete { received: u16, total: u16 },
    Complete { header: Vec<u8>, body: Vec<u8> },
    UnknownRequestId,
}

#[derive(Debug, Clone)]
pub struct TimedOutTransaction {
    pub request_id: u8,
    pub destination: Muid,
    pub received: u16,
    pub total: u16,
    pub partial: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub in_use: usize,
    pub cooling: usize,
    pub available: usize,
    pub waiter_queue_lengths: HashMap<Muid, usize>,
    pub oldest_transaction_age: Option<Duration>,
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inUse={} cooling={} available={} waiters={} oldestTransactionAge={:?}",
            self.in_use,
            self.cooling,
            self.available,
            self.waiter_queue_lengths.values().sum::<usize>(),
            self.oldest_transaction_age,
        )
    }
}

#[derive(Debug)]
struct Transaction {
    destination: Muid,
    timeout: Duration,
    timeout_at: Instant,
    started_at: Instant,
}

struct WaiterSlot {
    ticket: u64,
    notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

struct Inner {
    pool: RequestIdPool,
    assembler: ChunkAssembler,
    transactions: HashMap<u8, Transaction>,
    per_device_inflight: HashMap<Muid, u32>,
    per_device_waiters: HashMap<Muid, VecDeque<WaiterSlot>>,
    max_inflight_per_device: u32,
    next_waiter_ticket: u64,
}

impl Inner {
    fn wake_one_waiter(&mut self, muid: Muid) {
        if let Some(queue) = self.per_device_waiters.get_mut(&muid) {
            while let Some(slot) = queue.pop_front() {
                if !slot.cancelled.load(Ordering::Acquire) {
                    slot.notify.notify_one();
                    break;
                }
            }
            if queue.is_empty() {
                self.per_device_waiters.remove(&muid);
            }
        }
    }

    fn release_transaction(&mut self, now: Instant, id: u8) -> Option<Muid> {
        self.assembler.abandon(id);
        let tx = self.transactions.remove(&id)?;
        self.pool.release(id, now);
        let slot = self.per_device_inflight.entry(tx.destination).or_insert(0);
        *slot = slot.saturating_sub(1);
        if *slot == 0 {
            self.per_device_inflight.remove(&tx.destination);
        }
        Some(tx.destination)
    }
}

/// Owns the allocator, the chunk reassembly buffer, and the per-device
/// inflight throttle. All mutation funnels through one lock so a release and
/// the waiter it wakes observe a consistent view of the pool.
pub struct TransactionManager {
    inner: Arc<Mutex<Inner>>,
}

impl TransactionManager {
    pub fn new(id_cooldown: Duration, chunk_timeout: Duration, max_inflight_per_device: u32) -> Self {
        TransactionManager {
            inner: Arc::new(Mutex::new(Inner {
                pool: RequestIdPool::new(id_cooldown),
                assembler: ChunkAssembler::new(chunk_timeout),
                transactions: HashMap::new(),
                per_device_inflight: HashMap::new(),
                per_device_waiters: HashMap::new(),
                max_inflight_per_device,
                next_waiter_ticket: 0,
            })),
        }
    }

    /// Begin a new transaction to `destination`. Returns `None` if the pool
    /// is exhausted; otherwise suspends the caller on the per-device FIFO
    /// queue until a slot frees, then allocates an ID.
    pub async fn begin(&self, destination: Muid, timeout: Duration) -> Option<u8> {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();

                if inner.pool.available_count(now) == 0 {
                    return None;
                }

                let inflight = *inner.per_device_inflight.get(&destination).unwrap_or(&0);
                if inflight < inner.max_inflight_per_device {
                    match inner.pool.acquire(now) {
                        Some(id) => {
                            *inner.per_device_inflight.entry(destination).or_insert(0) += 1;
                            inner.transactions.insert(
                                id,
                                Transaction {
                                    destination,
                                    timeout,
                                    timeout_at: now + timeout,
                                    started_at: now,
                                },
                            );
                            return Some(id);
                        }
                        None => return None,
                    }
                }

                let notify = Arc::new(Notify::new());
                let cancelled = Arc::new(AtomicBool::new(false));
                let ticket = inner.next_waiter_ticket;
                inner.next_waiter_ticket += 1;
                inner.per_device_waiters.entry(destination).or_default().push_back(WaiterSlot {
                    ticket,
                    notify: notify.clone(),
                    cancelled: cancelled.clone(),
                });
                (notify, cancelled, ticket)
            };

            let (notify, cancelled, ticket) = wait;
            let guard = CancelGuard { inner: self.inner.clone(), destination, ticket, cancelled };
            notify.notified().await;
            guard.defuse();
        }
    }

    /// Feed one inbound chunk for `id`. `UnknownRequestId` means no active
    /// transaction exists: a late reply, a duplicate, or a cancelled
    /// transaction — callers should drop it silently rather than surface it
    /// as a timeout.
    pub async fn process_chunk(&self, id: u8, this_chunk: u16, num_chunks: u16, header: &[u8], body: &[u8]) -> ProcessChunkOutcome {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if !inner.transactions.contains_key(&id) {
            return ProcessChunkOutcome::UnknownRequestId;
        }

        match inner.assembler.add_chunk(now, id, this_chunk, num_chunks, header, body) {
            ChunkOutcome::Complete { header, body } => {
                if let Some(destination) = inner.release_transaction(now, id) {
                    inner.wake_one_waiter(destination);
                }
                ProcessChunkOutcome::Complete { header, body }
            }
            ChunkOutcome::Incomplete { received, total } => {
                if let Some(tx) = inner.transactions.get_mut(&id) {
                    tx.timeout_at = now + tx.timeout;
                }
                ProcessChunkOutcome::Incomplete { received, total }
            }
            ChunkOutcome::Timeout { .. } | ChunkOutcome::UnknownRequestId { .. } => ProcessChunkOutcome::UnknownRequestId,
        }
    }

    /// Cancel a transaction, releasing its ID and inflight slot. Idempotent.
    pub async fn cancel(&self, id: u8) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some(destination) = inner.release_transaction(now, id) {
            inner.wake_one_waiter(destination);
        }
    }

    /// Same resource-release path as `cancel`, used when a device reported
    /// an error status for the transaction rather than the caller cancelling.
    pub async fn complete_with_error(&self, id: u8) {
        self.cancel(id).await;
    }

    /// Cancel every transaction addressed to `muid`, e.g. on device loss.
    pub async fn cancel_all(&self, muid: Muid) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let ids: Vec<u8> = inner.transactions.iter().filter(|(_, tx)| tx.destination == muid).map(|(&id, _)| id).collect();
        for id in ids {
            inner.release_transaction(now, id);
        }
        inner.per_device_waiters.remove(&muid);
        inner.per_device_inflight.remove(&muid);
    }

    /// Composite shutdown step: cancel every live transaction and wake every
    /// waiter with nothing, then empty the pool without cooldown so a
    /// restart is not throttled by stale cooldown state.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.transactions.clear();
        inner.assembler.clear();
        inner.pool.release_all();
        for (_, queue) in inner.per_device_waiters.drain() {
            for slot in queue {
                slot.notify.notify_one();
            }
        }
        inner.per_device_inflight.clear();
    }

    /// Enumerate and release transactions that have aged past their deadline.
    pub async fn check_timeouts(&self, now: Instant) -> Vec<TimedOutTransaction> {
        let mut inner = self.inner.lock().await;
        let expired: Vec<u8> = inner.transactions.iter().filter(|(_, tx)| now >= tx.timeout_at).map(|(&id, _)| id).collect();

        let mut out = Vec::with_capacity(expired.len());
        for id in expired {
            let destination = inner.transactions.get(&id).map(|tx| tx.destination);
            let chunk_timeouts = inner.assembler.check_timeouts(now);
            let partial = chunk_timeouts.into_iter().find_map(|outcome| match outcome {
                ChunkOutcome::Timeout { request_id, received, total, partial } if request_id == id => Some((received, total, partial)),
                _ => None,
            });

            if let Some(destination) = inner.release_transaction(now, id) {
                inner.wake_one_waiter(destination);
                let (received, total, partial) = partial.unwrap_or((0, 0, None));
                out.push(TimedOutTransaction { request_id: id, destination, received, total, partial });
            }
        }
        out
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        Diagnostics {
            in_use: inner.pool.in_use_count(),
            cooling: inner.pool.cooling_count(now),
            available: inner.pool.available_count(now),
            waiter_queue_lengths: inner.per_device_waiters.iter().map(|(&m, q)| (m, q.len())).collect(),
            oldest_transaction_age: inner.transactions.values().map(|tx| now.duration_since(tx.started_at)).max(),
        }
    }
}

struct CancelGuard {
    inner: Arc<Mutex<Inner>>,
    destination: Muid,
    ticket: u64,
    cancelled: Arc<AtomicBool>,
}

impl CancelGuard {
    fn defuse(self) {
        std::mem::forget(self);
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);

        // Splice this slot out of the FIFO immediately rather than leaving it
        // for `wake_one_waiter` to skip past lazily — if this destination's
        // queue never gets popped again (device vanishes without a
        // `cancel_all`), a lazily-skipped entry would sit there forever and
        // `diagnostics().waiter_queue_lengths` would over-report it.
        let inner = self.inner.clone();
        let destination = self.destination;
        let ticket = self.ticket;
        tokio::spawn(async move {
            let mut inner = inner.lock().await;
            if let Some(queue) = inner.per_device_waiters.get_mut(&destination) {
                queue.retain(|slot| slot.ticket != ticket);
                if queue.is_empty() {
                    inner.per_device_waiters.remove(&destination);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_allocates_and_process_chunk_completes() {
        let tm = TransactionManager::new(Duration::ZERO, Duration::from_secs(1), 4);
        let dest = Muid::new(1).unwrap();
        let id = tm.begin(dest, Duration::from_secs(1)).await.unwrap();
        let outcome = tm.process_chunk(id, 1, 1, b"hdr", b"body").await;
        assert_eq!(outcome, ProcessChunkOutcome::Complete { header: b"hdr".to_vec(), body: b"body".to_vec() });
    }

    #[tokio::test]
    async fn process_chunk_for_unknown_id_is_distinct_from_timeout() {
        let tm = TransactionManager::new(Duration::ZERO, Duration::from_secs(1), 4);
        let outcome = tm.process_chunk(99, 1, 1, b"", b"").await;
        assert_eq!(outcome, ProcessChunkOutcome::UnknownRequestId);
    }

    #[tokio::test]
    async fn per_device_inflight_throttles_and_release_wakes_waiter() {
        let tm = Arc::new(TransactionManager::new(Duration::ZERO, Duration::from_secs(5), 1));
        let dest = Muid::new(2).unwrap();
        let first = tm.begin(dest, Duration::from_secs(5)).await.unwrap();

        let tm2 = tm.clone();
        let waiter = tokio::spawn(async move { tm2.begin(dest, Duration::from_secs(5)).await });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tm.cancel(first).await;
        let second = waiter.await.unwrap();
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn aborted_waiter_is_spliced_out_of_the_queue_immediately() {
        let tm = Arc::new(TransactionManager::new(Duration::ZERO, Duration::from_secs(5), 1));
        let dest = Muid::new(6).unwrap();
        let first = tm.begin(dest, Duration::from_secs(5)).await.unwrap();

        let tm2 = tm.clone();
        let waiter = tokio::spawn(async move { tm2.begin(dest, Duration::from_secs(5)).await });
        tokio::task::yield_now().await;
        assert_eq!(tm.diagnostics().await.waiter_queue_lengths.get(&dest), Some(&1));

        // Aborting drops the `begin` future (and its `CancelGuard`) without
        // ever waking through `wake_one_waiter`; nothing else will ever pop
        // this destination's queue again until the splice-on-drop runs.
        waiter.abort();
        let _ = waiter.await;

        // Give the detached cleanup task spawned from `Drop` a chance to run.
        for _ in 0..100 {
            if tm.diagnostics().await.waiter_queue_lengths.get(&dest).is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(tm.diagnostics().await.waiter_queue_lengths.get(&dest), None);

        tm.cancel(first).await;
    }

    #[tokio::test]
    async fn cancel_all_releases_every_transaction_for_a_device() {
        let tm = TransactionManager::new(Duration::ZERO, Duration::from_secs(5), 8);
        let dest = Muid::new(3).unwrap();
        let a = tm.begin(dest, Duration::from_secs(5)).await.unwrap();
        let b = tm.begin(dest, Duration::from_secs(5)).await.unwrap();
        tm.cancel_all(dest).await;
        let diag = tm.diagnostics().await;
        assert_eq!(diag.available, 128);
        // both ids freed means a fresh begin succeeds without suspending
        let c = tm.begin(dest, Duration::from_secs(5)).await;
        assert!(c.is_some());
        let _ = (a, b);
    }

    #[tokio::test]
    async fn shutdown_releases_everything_without_cooldown() {
        let tm = TransactionManager::new(Duration::from_secs(100), Duration::from_secs(5), 8);
        let dest = Muid::new(5).unwrap();
        tm.begin(dest, Duration::from_secs(5)).await.unwrap();
        tm.shutdown().await;
        let diag = tm.diagnostics().await;
        assert_eq!(diag.available, 128);
        assert_eq!(diag.cooling, 0);
    }

    #[tokio::test]
    async fn check_timeouts_releases_expired_transactions() {
        let tm = TransactionManager::new(Duration::ZERO, Duration::from_secs(5), 8);
        let dest = Muid::new(4).unwrap();
        let id = tm.begin(dest, Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(15)).await;
        let timed_out = tm.check_timeouts(Instant::now()).await;
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].request_id, id);
    }
}
