//! Tunables shared across the discovery tracker, transaction manager, and
//! PE engine. All fields have defaults matching the spec's illustrative
//! values; callers override selectively via the builder methods.

use std::time::Duration;

use crate::identity::{CategorySupport, DeviceIdentity};

#[derive(Debug, Clone)]
pub struct Config {
    pub discovery_interval: Duration,
    pub device_timeout: Duration,
    pub request_id_cooldown: Duration,
    pub max_inflight_per_device: u32,
    pub framer_buffer_ceiling: usize,
    pub chunk_timeout: Duration,
    pub respond_to_discovery: bool,
    pub resubscribe_delay: Duration,
    pub max_retry_attempts: u32,
    pub ci_version: u8,
    pub device_identity: DeviceIdentity,
    pub category_support: CategorySupport,
    pub max_sysex_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            discovery_interval: Duration::from_secs(5),
            device_timeout: Duration::from_secs(15),
            request_id_cooldown: Duration::from_secs(2),
            max_inflight_per_device: 4,
            framer_buffer_ceiling: crate::framer::DEFAULT_CEILING,
            chunk_timeout: Duration::from_secs(10),
            respond_to_discovery: true,
            resubscribe_delay: Duration::from_secs(3),
            max_retry_attempts: 5,
            ci_version: 0x02,
            device_identity: DeviceIdentity::default(),
            category_support: CategorySupport::PROPERTY_EXCHANGE,
            max_sysex_size: 512,
        }
    }
}

impl Config {
    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn with_device_timeout(mut self, timeout: Duration) -> Self {
        self.device_timeout = timeout;
        self
    }

    pub fn with_request_id_cooldown(mut self, cooldown: Duration) -> Self {
        self.request_id_cooldown = cooldown;
        self
    }

    pub fn with_max_inflight_per_device(mut self, max: u32) -> Self {
        self.max_inflight_per_device = max;
        self
    }

    pub fn with_framer_buffer_ceiling(mut self, ceiling: usize) -> Self {
        self.framer_buffer_ceiling = ceiling;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    pub fn with_respond_to_discovery(mut self, respond: bool) -> Self {
        self.respond_to_discovery = respond;
        self
    }

    pub fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_device_identity(mut self, identity: DeviceIdentity) -> Self {
        self.device_identity = identity;
        self
    }

    pub fn with_category_support(mut self, support: CategorySupport) -> Self {
        self.category_support = support;
        self
    }

    pub fn with_max_sysex_size(mut self, size: u32) -> Self {
        self.max_sysex_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.discovery_interval, Duration::from_secs(5));
        assert_eq!(cfg.device_timeout, Duration::from_secs(15));
        assert!(cfg.respond_to_discovery);
    }

    #[test]
    fn builder_methods_override_selectively() {
        let cfg = Config::default().with_max_inflight_per_device(1).with_respond_to_discovery(false);
        assert_eq!(cfg.max_inflight_per_device, 1);
        assert!(!cfg.respond_to_discovery);
        assert_eq!(cfg.device_timeout, Duration::from_secs(15));
    }
}
