//! Runtime configuration. Constructible with sane defaults (`new`) or
//! from `AGENTCORE_*` environment variables (`from_env`), mirroring the
//! constructor/`Display` shape the teacher uses for its server configs.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Idle duration after which a live instance is reaped (`spec.md` §6).
    pub deactivation_interval: Duration,
    /// Default deadline for unary `channel` calls.
    pub request_timeout: Duration,
    /// Ceiling for HTTP/broker transport reconnect backoff.
    pub reconnect_backoff_cap: Duration,
    /// Overall window for aggregating broadcast discovery replies.
    pub discovery_aggregate_timeout: Duration,
    /// Stop aggregating discovery replies once this many distinct names
    /// have been collected.
    pub discovery_max_replies: usize,
    /// Bounded-channel size for newly activated instances.
    pub inbox_capacity: usize,
    /// HTTP gateway binding: the interface/port a gateway listens on.
    pub http_bind_addr: String,
    /// HTTP gateway binding: the base URL clients use to reach it.
    pub http_external_base_url: String,
    /// Broker binding: the NATS server URL.
    pub nats_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            deactivation_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            reconnect_backoff_cap: Duration::from_secs(30),
            discovery_aggregate_timeout: Duration::from_millis(500),
            discovery_max_replies: 64,
            inbox_capacity: 32,
            http_bind_addr: "127.0.0.1:8089".to_string(),
            http_external_base_url: "http://127.0.0.1:8089".to_string(),
            nats_url: "nats://127.0.0.1:4222".to_string(),
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `AGENTCORE_DEACTIVATION_INTERVAL_MS`,
    /// `AGENTCORE_REQUEST_TIMEOUT_MS`, `AGENTCORE_RECONNECT_BACKOFF_CAP_MS`,
    /// `AGENTCORE_DISCOVERY_AGGREGATE_TIMEOUT_MS`,
    /// `AGENTCORE_DISCOVERY_MAX_REPLIES`, `AGENTCORE_INBOX_CAPACITY`,
    /// `AGENTCORE_HTTP_BIND_ADDR`, `AGENTCORE_HTTP_EXTERNAL_BASE_URL`, and
    /// `AGENTCORE_NATS_URL`; any variable that is unset or unparsable
    /// falls back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            deactivation_interval: env_millis(
                "AGENTCORE_DEACTIVATION_INTERVAL_MS",
                defaults.deactivation_interval,
            ),
            request_timeout: env_millis("AGENTCORE_REQUEST_TIMEOUT_MS", defaults.request_timeout),
            reconnect_backoff_cap: env_millis(
                "AGENTCORE_RECONNECT_BACKOFF_CAP_MS",
                defaults.reconnect_backoff_cap,
            ),
            discovery_aggregate_timeout: env_millis(
                "AGENTCORE_DISCOVERY_AGGREGATE_TIMEOUT_MS",
                defaults.discovery_aggregate_timeout,
            ),
            discovery_max_replies: env_usize(
                "AGENTCORE_DISCOVERY_MAX_REPLIES",
                defaults.discovery_max_replies,
            ),
            inbox_capacity: env_usize("AGENTCORE_INBOX_CAPACITY", defaults.inbox_capacity),
            http_bind_addr: std::env::var("AGENTCORE_HTTP_BIND_ADDR")
                .unwrap_or(defaults.http_bind_addr),
            http_external_base_url: std::env::var("AGENTCORE_HTTP_EXTERNAL_BASE_URL")
                .unwrap_or(defaults.http_external_base_url),
            nats_url: std::env::var("AGENTCORE_NATS_URL").unwrap_or(defaults.nats_url),
        }
    }

    /// The periodic tick the reaper scans the live table at; derived
    /// from `deactivation_interval` so short intervals (tests) reap
    /// promptly without a separate knob.
    #[must_use]
    pub fn reap_tick(&self) -> Duration {
        (self.deactivation_interval / 4).max(Duration::from_millis(10))
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

impl fmt::Display for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[deactivation={:?} request_timeout={:?} http={} nats={}]",
            self.deactivation_interval, self.request_timeout, self.http_bind_addr, self.nats_url
        )
    }
}
