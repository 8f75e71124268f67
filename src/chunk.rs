//! Reassembles multi-chunk Property Exchange bodies keyed by request ID.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Incomplete { received: u16, total: u16 },
    Complete { header: Vec<u8>, body: Vec<u8> },
    Timeout { request_id: u8, received: u16, total: u16, partial: Option<Vec<u8>> },
    UnknownRequestId { request_id: u8 },
}

#[derive(Debug)]
struct Assembly {
    total: u16,
    header: Option<Vec<u8>>,
    chunks: HashMap<u16, Vec<u8>>,
    last_activity: Instant,
}

impl Assembly {
    fn received(&self) -> u16 {
        self.chunks.len() as u16
    }

    fn is_complete(&self) -> bool {
        self.received() >= self.total
    }

    fn assembled_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for idx in 1..=self.total {
            if let Some(chunk) = self.chunks.get(&idx) {
                body.extend_from_slice(chunk);
            }
        }
        body
    }
}

/// Keyed by 7-bit request ID, buffers chunked PE bodies until every chunk
/// has arrived, an assembly ages past its timeout, or it is abandoned.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    chunk_timeout: Duration,
    assemblies: HashMap<u8, Assembly>,
}

impl ChunkAssembler {
    pub fn new(chunk_timeout: Duration) -> Self {
        ChunkAssembler {
            chunk_timeout,
            assemblies: HashMap::new(),
        }
    }

    /// Feed one chunk. Re-receiving an already-buffered `this_chunk` replaces
    /// its bytes without incrementing the received count.
    pub fn add_chunk(&mut self, now: Instant, request_id: u8, this_chunk: u16, num_chunks: u16, header_data: &[u8], property_data: &[u8]) -> ChunkOutcome {
        let assembly = self.assemblies.entry(request_id).or_insert_with(|| Assembly {
            total: num_chunks,
            header: None,
            chunks: HashMap::new(),
            last_activity: now,
        });

        if assembly.header.is_none() && !header_data.is_empty() {
            assembly.header = Some(header_data.to_vec());
        }
        assembly.chunks.insert(this_chunk, property_data.to_vec());
        assembly.last_activity = now;

        if assembly.is_complete() {
            let assembly = self.assemblies.remove(&request_id).expect("just inserted");
            ChunkOutcome::Complete {
                header: assembly.header.unwrap_or_default(),
                body: assembly.assembled_body(),
            }
        } else {
            ChunkOutcome::Incomplete {
                received: assembly.received(),
                total: assembly.total,
            }
        }
    }

    /// Drop an assembly, e.g. on transaction cancellation.
    pub fn abandon(&mut self, request_id: u8) {
        self.assemblies.remove(&request_id);
    }

    pub fn has_assembly(&self, request_id: u8) -> bool {
        self.assemblies.contains_key(&request_id)
    }

    /// Drop every in-flight assembly, e.g. during shutdown.
    pub fn clear(&mut self) {
        self.assemblies.clear();
    }

    /// Enumerate assemblies that have aged past `chunk_timeout`, removing them.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<ChunkOutcome> {
        let expired: Vec<u8> = self
            .assemblies
            .iter()
            .filter(|(_, a)| now.duration_since(a.last_activity) >= self.chunk_timeout)
            .map(|(&id, _)| id)
            .collect();

        expired
            .into_iter()
            .map(|id| {
                let assembly = self.assemblies.remove(&id).expect("just listed");
                let partial = if assembly.chunks.is_empty() { None } else { Some(assembly.assembled_body()) };
                ChunkOutcome::Timeout {
                    request_id: id,
                    received: assembly.received(),
                    total: assembly.total,
                    partial,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_completes_immediately() {
        let mut a = ChunkAssembler::new(Duration::from_secs(1));
        let now = Instant::now();
        let out = a.add_chunk(now, 5, 1, 1, b"header", b"body");
        assert_eq!(out, ChunkOutcome::Complete { header: b"header".to_vec(), body: b"body".to_vec() });
    }

    #[test]
    fn multi_chunk_assembles_in_order() {
        let mut a = ChunkAssembler::new(Duration::from_secs(1));
        let now = Instant::now();
        assert_eq!(a.add_chunk(now, 5, 2, 3, b"", b"B"), ChunkOutcome::Incomplete { received: 1, total: 3 });
        assert_eq!(a.add_chunk(now, 5, 1, 3, b"hdr", b"A"), ChunkOutcome::Incomplete { received: 2, total: 3 });
        let out = a.add_chunk(now, 5, 3, 3, b"", b"C");
        assert_eq!(out, ChunkOutcome::Complete { header: b"hdr".to_vec(), body: b"ABC".to_vec() });
    }

    #[test]
    fn re_receiving_a_chunk_replaces_without_recounting() {
        let mut a = ChunkAssembler::new(Duration::from_secs(1));
        let now = Instant::now();
        assert_eq!(a.add_chunk(now, 5, 1, 2, b"", b"stale"), ChunkOutcome::Incomplete { received: 1, total: 2 });
        assert_eq!(a.add_chunk(now, 5, 1, 2, b"", b"fresh"), ChunkOutcome::Incomplete { received: 1, total: 2 });
        let out = a.add_chunk(now, 5, 2, 2, b"", b"tail");
        assert_eq!(out, ChunkOutcome::Complete { header: Vec::new(), body: b"freshtail".to_vec() });
    }

    #[test]
    fn aged_assembly_surfaces_as_timeout_with_partial() {
        let mut a = ChunkAssembler::new(Duration::from_millis(10));
        let t0 = Instant::now();
        a.add_chunk(t0, 7, 1, 2, b"", b"only-half");
        let outcomes = a.check_timeouts(t0 + Duration::from_millis(20));
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            ChunkOutcome::Timeout { request_id, received, total, partial } => {
                assert_eq!(*request_id, 7);
                assert_eq!(*received, 1);
                assert_eq!(*total, 2);
                assert_eq!(partial.as_deref(), Some(&b"only-half"[..]));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert!(!a.has_assembly(7));
    }

    #[test]
    fn abandon_removes_assembly_state() {
        let mut a = ChunkAssembler::new(Duration::from_secs(1));
        let now = Instant::now();
        a.add_chunk(now, 9, 1, 2, b"", b"x");
        assert!(a.has_assembly(9));
        a.abandon(9);
        assert!(!a.has_assembly(9));
    }

    #[test]
    fn unstarted_timeout_check_yields_nothing() {
        let mut a = ChunkAssembler::new(Duration::from_millis(5));
        assert!(a.check_timeouts(Instant::now()).is_empty());
    }
}
