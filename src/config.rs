use std::net::SocketAddr;
use std::time::Duration;

use crate::ofp_header::SUPPORTED_VERSIONS;

pub const DEFAULT_OPENFLOW_PORT: u16 = 6653;

/// Controller configuration, consumed read-only once the controller is built.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub listen_addresses: Vec<SocketAddr>,
    /// Listener callback threads.
    pub worker_count: usize,
    pub idle_check_interval: Duration,
    /// Silence after which a connection is probed with an echo request.
    pub max_idle: Duration,
    /// Time allowed for each echo probe before the next one.
    pub echo_interval: Duration,
    pub max_echo_attempts: u32,
    pub pending_age_out: Duration,
    pub pending_sweep_interval: Duration,
    pub hybrid_mode: bool,
    /// Skip the SetConfig of the basic handshake.
    pub suppress_set_config: bool,
    pub miss_send_len: u16,
    /// Queued message events per listener worker before new ones are dropped.
    pub listener_queue_capacity: usize,
    /// Encoded messages queued per connection writer.
    pub writer_queue_capacity: usize,
    /// How long the post-handshake pipeline waits on each barrier.
    pub barrier_timeout: Duration,
    /// Versions offered during negotiation, lowest first.
    pub versions: Vec<u8>,
}

impl Default for ControllerConfig {
    fn default() -> ControllerConfig {
        ControllerConfig {
            listen_addresses: vec![SocketAddr::from(([0, 0, 0, 0], DEFAULT_OPENFLOW_PORT))],
            worker_count: 4,
            idle_check_interval: Duration::from_millis(500),
            max_idle: Duration::from_millis(5000),
            echo_interval: Duration::from_millis(5000),
            max_echo_attempts: 5,
            pending_age_out: Duration::from_secs(120),
            pending_sweep_interval: Duration::from_secs(10),
            hybrid_mode: false,
            suppress_set_config: false,
            miss_send_len: 0xffff,
            listener_queue_capacity: 2000,
            writer_queue_capacity: 1000,
            barrier_timeout: Duration::from_secs(5),
            versions: SUPPORTED_VERSIONS.to_vec(),
        }
    }
}

impl ControllerConfig {
    pub fn with_listen_addresses(mut self, addrs: Vec<SocketAddr>) -> Self {
        self.listen_addresses = addrs;
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    pub fn with_idle_detection(
        mut self,
        check_interval: Duration,
        max_idle: Duration,
        echo_interval: Duration,
        max_echo_attempts: u32,
    ) -> Self {
        self.idle_check_interval = check_interval;
        self.max_idle = max_idle;
        self.echo_interval = echo_interval;
        self.max_echo_attempts = max_echo_attempts;
        self
    }

    pub fn with_pending_age_out(mut self, age_out: Duration, sweep_interval: Duration) -> Self {
        self.pending_age_out = age_out;
        self.pending_sweep_interval = sweep_interval;
        self
    }

    pub fn with_hybrid_mode(mut self, hybrid: bool) -> Self {
        self.hybrid_mode = hybrid;
        self
    }

    pub fn with_suppress_set_config(mut self, suppress: bool) -> Self {
        self.suppress_set_config = suppress;
        self
    }

    pub fn with_listener_queue_capacity(mut self, capacity: usize) -> Self {
        self.listener_queue_capacity = capacity;
        self
    }

    pub fn with_barrier_timeout(mut self, timeout: Duration) -> Self {
        self.barrier_timeout = timeout;
        self
    }

    pub fn with_versions(mut self, versions: &[u8]) -> Self {
        let mut versions = versions.to_vec();
        versions.sort();
        versions.dedup();
        self.versions = versions;
        self
    }

    pub fn highest_version(&self) -> u8 {
        self.versions.last().cloned().unwrap_or(0)
    }

    /// Upper bound on the time a silent peer survives before teardown.
    pub fn zombie_deadline(&self) -> Duration {
        self.max_idle + self.echo_interval * self.max_echo_attempts + self.idle_check_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.max_echo_attempts, 5);
        assert_eq!(config.highest_version(), 4);
        assert_eq!(config.listen_addresses[0].port(), 6653);
    }

    #[test]
    fn test_builders() {
        let config = ControllerConfig::default()
            .with_worker_count(0)
            .with_versions(&[4, 1, 4])
            .with_idle_detection(
                Duration::from_millis(10),
                Duration::from_millis(100),
                Duration::from_millis(50),
                2,
            );
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.versions, vec![1, 4]);
        assert_eq!(config.zombie_deadline(), Duration::from_millis(210));
    }
}
