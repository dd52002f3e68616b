/// Configuration management
use crate::error::{Result, SyncError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://127.0.0.1:5000/api";
const DEFAULT_PUSH_ADDR: &str = "127.0.0.1:5001";

/// Reconnect behavior after a transport error.
///
/// `max_retries == 0` disables reconnection entirely: a dropped push channel
/// stays `Disconnected` until the credential is bound again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after a drop (0 = never)
    pub max_retries: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Jitter fraction applied to every delay (0.0..=1.0)
    pub jitter_pct: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_pct: 0.2,
        }
    }
}

impl ReconnectPolicy {
    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Delay before retry number `attempt` (1-based), or `None` once retries are exhausted
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let exp = 2u32.saturating_pow(attempt - 1);
        let base = self
            .base_delay
            .checked_mul(exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        Some(apply_jitter(base, self.jitter_pct))
    }
}

fn apply_jitter(duration: Duration, jitter_pct: f64) -> Duration {
    let jitter_pct = jitter_pct.clamp(0.0, 1.0);
    if jitter_pct == 0.0 {
        return duration;
    }
    let delta = rand::thread_rng().gen_range(-jitter_pct..=jitter_pct);
    let jittered = (duration.as_millis() as f64 * (1.0 + delta)).max(1.0);
    Duration::from_millis(jittered.round() as u64)
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the collaborator REST API
    pub api_base_url: String,

    /// Push channel address (host:port)
    pub push_addr: String,

    /// Per-request timeout for REST calls
    pub request_timeout: Duration,

    /// TCP connect timeout for the push channel
    pub connection_timeout: Duration,

    /// Time allowed for the push handshake to be acknowledged
    pub handshake_timeout: Duration,

    /// Idle interval after which a ping is sent on the push channel
    pub keepalive_interval: Duration,

    /// Search quiescence window
    pub search_debounce: Duration,

    /// Abort in-flight searches once a newer one is dispatched
    pub search_cancel_superseded: bool,

    /// Capacity of the inbound event queue feeding the dispatch loop
    pub inbound_buffer: usize,

    /// Capacity of the outbound frame queue of a live connection
    pub outbound_buffer: usize,

    /// Reconnect/backoff policy for the push channel
    pub reconnect: ReconnectPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            push_addr: DEFAULT_PUSH_ADDR.to_string(),
            request_timeout: Duration::from_secs(15),
            connection_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
            search_debounce: Duration::from_millis(300),
            search_cancel_superseded: false,
            inbound_buffer: 256,
            outbound_buffer: 64,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--api-url" => {
                    config.api_base_url = flag_value(args, i, "--api-url")?.to_string();
                    i += 2;
                }
                "--push-addr" => {
                    config.push_addr = flag_value(args, i, "--push-addr")?.to_string();
                    i += 2;
                }
                "--debounce-ms" => {
                    let ms = parse_u64(flag_value(args, i, "--debounce-ms")?, "--debounce-ms")?;
                    config.search_debounce = Duration::from_millis(ms);
                    i += 2;
                }
                "--reconnect-retries" => {
                    let v = flag_value(args, i, "--reconnect-retries")?;
                    config.reconnect.max_retries = v.parse::<u32>().map_err(|_| {
                        SyncError::Config("--reconnect-retries must be a number".to_string())
                    })?;
                    i += 2;
                }
                "--cancel-superseded" => {
                    config.search_cancel_superseded = true;
                    i += 1;
                }
                other => {
                    return Err(SyncError::Config(format!(
                        "Unknown argument '{}'. Usage: {} [--api-url <url>] [--push-addr <host:port>] [--debounce-ms <ms>] [--reconnect-retries <n>] [--cancel-superseded]",
                        other,
                        args.first().map(String::as_str).unwrap_or("agora-sync")
                    )));
                }
            }
        }

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Env overrides (nice for scripts)
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("AGORA_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(addr) = std::env::var("AGORA_PUSH_ADDR") {
            self.push_addr = addr;
        }
        if let Some(ms) = env_u64("AGORA_SEARCH_DEBOUNCE_MS") {
            self.search_debounce = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("AGORA_RECONNECT_MAX_RETRIES") {
            self.reconnect.max_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = env_u64("AGORA_RECONNECT_BASE_MS") {
            self.reconnect.base_delay = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = env_u64("AGORA_RECONNECT_MAX_MS") {
            self.reconnect.max_delay = Duration::from_millis(ms.max(1));
        }
        if let Some(pct) = std::env::var("AGORA_RECONNECT_JITTER_PCT")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
        {
            self.reconnect.jitter_pct = pct.clamp(0.0, 1.0);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(SyncError::Config("API base URL must not be empty".to_string()));
        }
        if self.push_addr.is_empty() {
            return Err(SyncError::Config("Push address must not be empty".to_string()));
        }
        if self.keepalive_interval.is_zero() {
            return Err(SyncError::Config("Keepalive interval must be non-zero".to_string()));
        }
        if self.inbound_buffer == 0 || self.outbound_buffer == 0 {
            return Err(SyncError::Config("Channel buffers must be non-zero".to_string()));
        }
        if self.reconnect.base_delay > self.reconnect.max_delay {
            return Err(SyncError::Config(
                "Reconnect base delay exceeds max delay".to_string(),
            ));
        }
        Ok(())
    }
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| SyncError::Config(format!("{} requires an argument", flag)))
}

fn parse_u64(value: &str, flag: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| SyncError::Config(format!("{} must be a valid number", flag)))
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok())
}
