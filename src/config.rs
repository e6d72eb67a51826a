//! Server-wide configuration (ambient; ported from the shape of the
//! teacher's `ServerOptions`, extended with the knobs SPEC_FULL §3 names).

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the engine, dispatcher, and store. Constructible via
/// `Default`, overridable by the example binary's CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Clamp bounds for a client-supplied long-poll `timeout` query param.
    pub long_poll_timeout_min: Duration,
    pub long_poll_timeout_max: Duration,
    pub long_poll_timeout_default: Duration,

    pub sse_max_duration: Duration,
    pub sse_keepalive_interval: Duration,

    pub cursor_ttl: Duration,
    /// 32-byte HMAC secret. Generated on first use if absent.
    pub cursor_secret: Option<[u8; 32]>,

    pub max_record_size: Option<usize>,
    pub default_read_length: u64,

    /// Soft cap on concurrent long-poll/SSE waiters (spec §5).
    pub max_waiters: usize,

    /// `None` selects the in-memory store; `Some(dir)` selects the
    /// blocking-file store rooted at `dir`.
    pub data_dir: Option<PathBuf>,
    pub file_store_fd_lru_capacity: usize,

    pub enable_compression: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4437,
            long_poll_timeout_min: Duration::from_secs(1),
            long_poll_timeout_max: Duration::from_secs(60),
            long_poll_timeout_default: Duration::from_secs(30),
            sse_max_duration: Duration::from_secs(60),
            sse_keepalive_interval: Duration::from_secs(15),
            cursor_ttl: Duration::from_secs(600),
            cursor_secret: None,
            max_record_size: None,
            default_read_length: u64::MAX,
            max_waiters: 10_000,
            data_dir: None,
            file_store_fd_lru_capacity: 1024,
            enable_compression: true,
        }
    }
}

impl Config {
    /// Clamp a client-supplied long-poll timeout into the configured bounds.
    pub fn clamp_long_poll_timeout(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(d) => d.clamp(self.long_poll_timeout_min, self.long_poll_timeout_max),
            None => self.long_poll_timeout_default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_timeout_to_configured_bounds() {
        let config = Config::default();
        assert_eq!(
            config.clamp_long_poll_timeout(Some(Duration::from_secs(5000))),
            config.long_poll_timeout_max
        );
        assert_eq!(
            config.clamp_long_poll_timeout(Some(Duration::from_millis(1))),
            config.long_poll_timeout_min
        );
        assert_eq!(
            config.clamp_long_poll_timeout(None),
            config.long_poll_timeout_default
        );
    }
}
