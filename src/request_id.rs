//! 7-bit Request ID pool with cooldown and deterministic wrap-around.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

pub const POOL_SIZE: u8 = 128;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

/// A pool of 128 7-bit Request IDs, each `free`, `in_use`, or `cooling`.
///
/// Release always happens-before the next acquisition that can observe the
/// ID as free; the cooldown further delays observability so a late/duplicate
/// response for a closed transaction can never be misattributed to a new
/// transaction sharing the same ID.
#[derive(Debug)]
pub struct RequestIdPool {
    cooldown: Duration,
    next_id: u8,
    in_use: HashSet<u8>,
    cooling: HashMap<u8, Instant>,
}

impl RequestIdPool {
    pub fn new(cooldown: Duration) -> Self {
        RequestIdPool {
            cooldown,
            next_id: 0,
            in_use: HashSet::new(),
            cooling: HashMap::new(),
        }
    }

    fn evict_expired_cooldowns(&mut self, now: Instant) {
        self.cooling.retain(|_, &mut released_at| now.duration_since(released_at) < self.cooldown);
    }

    /// Acquire a fresh ID, probing up to 128 positions starting at `next_id`.
    pub fn acquire(&mut self, now: Instant) -> Option<u8> {
        self.evict_expired_cooldowns(now);
        for _ in 0..POOL_SIZE {
            let candidate = self.next_id;
            self.next_id = (self.next_id + 1) % POOL_SIZE;
            if !self.in_use.contains(&candidate) && !self.cooling.contains_key(&candidate) {
                self.in_use.insert(candidate);
                return Some(candidate);
            }
        }
        None
    }

    /// Release an ID back to the pool; it enters cooldown before becoming
    /// acquirable again. A no-op if the ID was not in use.
    pub fn release(&mut self, id: u8, now: Instant) {
        if self.in_use.remove(&id) && !self.cooldown.is_zero() {
            self.cooling.insert(id, now);
        }
    }

    /// Release every in-use ID without cooldown; used at shutdown.
    pub fn release_all(&mut self) {
        self.in_use.clear();
        self.cooling.clear();
    }

    /// Test hook: empty the cooling map immediately.
    pub fn force_expire_all_cooldowns(&mut self) {
        self.cooling.clear();
    }

    pub fn available_count(&self, now: Instant) -> usize {
        POOL_SIZE as usize - self.in_use_count() - self.cooling_count(now)
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    pub fn cooling_count(&self, now: Instant) -> usize {
        self.cooling
            .values()
            .filter(|&&released_at| now.duration_since(released_at) < self.cooldown)
            .count()
    }

    pub fn is_in_use(&self, id: u8) -> bool {
        self.in_use.contains(&id)
    }

    pub fn is_cooling(&self, id: u8, now: Instant) -> bool {
        self.cooling
            .get(&id)
            .map(|&released_at| now.duration_since(released_at) < self.cooldown)
            .unwrap_or(false)
    }
}

impl Default for RequestIdPool {
    fn default() -> Self {
        RequestIdPool::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_distinct_ids_up_to_pool_size() {
        let mut pool = RequestIdPool::new(Duration::ZERO);
        let now = Instant::now();
        let mut seen = HashSet::new();
        for _ in 0..POOL_SIZE {
            let id = pool.acquire(now).expect("pool should not be exhausted yet");
            assert!(seen.insert(id), "ID {id} acquired twice while still in use");
        }
        assert!(pool.acquire(now).is_none());
    }

    #[test]
    fn release_enters_cooldown_before_reacquisition() {
        let mut pool = RequestIdPool::new(Duration::from_millis(50));
        let t0 = Instant::now();
        let id = pool.acquire(t0).unwrap();
        pool.release(id, t0);
        assert!(pool.is_cooling(id, t0));
        // Exhaust the other 127 to force probing back onto `id`.
        for _ in 0..(POOL_SIZE as usize - 1) {
            pool.acquire(t0);
        }
        assert!(pool.acquire(t0).is_none(), "id should still be cooling");
    }

    #[test]
    fn cooldown_expires_after_period() {
        let mut pool = RequestIdPool::new(Duration::from_millis(10));
        let t0 = Instant::now();
        let id = pool.acquire(t0).unwrap();
        pool.release(id, t0);
        let t1 = t0 + Duration::from_millis(20);
        // drain the rest
        for _ in 0..(POOL_SIZE as usize - 1) {
            pool.acquire(t1);
        }
        pool.release_all();
        let reacquired = pool.acquire(t1);
        assert!(reacquired.is_some());
    }

    #[test]
    fn release_all_resets_available_count() {
        let mut pool = RequestIdPool::new(Duration::from_secs(2));
        let now = Instant::now();
        for _ in 0..10 {
            pool.acquire(now);
        }
        pool.release_all();
        assert_eq!(pool.available_count(now), POOL_SIZE as usize);
    }

    #[test]
    fn release_of_unknown_id_is_noop() {
        let mut pool = RequestIdPool::default();
        let now = Instant::now();
        pool.release(42, now); // never acquired
        assert_eq!(pool.available_count(now), POOL_SIZE as usize);
    }

    #[test]
    fn force_expire_all_cooldowns_test_hook() {
        let mut pool = RequestIdPool::new(Duration::from_secs(100));
        let now = Instant::now();
        let id = pool.acquire(now).unwrap();
        pool.release(id, now);
        assert!(pool.is_cooling(id, now));
        pool.force_expire_all_cooldowns();
        assert!(!pool.is_cooling(id, now));
    }

    #[test]
    fn wrap_around_is_deterministic() {
        let mut pool = RequestIdPool::new(Duration::ZERO);
        let now = Instant::now();
        let first = pool.acquire(now).unwrap();
        assert_eq!(first, 0);
        let second = pool.acquire(now).unwrap();
        assert_eq!(second, 1);
    }
}
