//! Server configuration parsed from environment variables.
//!
//! Every knob has a default; unparseable values fall back to it rather than
//! aborting startup.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 64;
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Buffered frames per websocket connection before peers start dropping.
    pub outbox_capacity: usize,
    /// Maximum live sessions per channel.
    pub max_subscribers: usize,
    /// Failure reports retained for `/api/diagnostics`.
    pub diagnostics_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Build config from the process environment.
    ///
    /// - `PORT`: default 3000
    /// - `SYNC_OUTBOX_CAPACITY`: default 256
    /// - `SYNC_MAX_SUBSCRIBERS`: default 64
    /// - `DIAGNOSTICS_CAPACITY`: default 128
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parse_or(&lookup, "PORT", DEFAULT_PORT),
            outbox_capacity: parse_nonzero_or(&lookup, "SYNC_OUTBOX_CAPACITY", DEFAULT_OUTBOX_CAPACITY),
            max_subscribers: parse_nonzero_or(&lookup, "SYNC_MAX_SUBSCRIBERS", DEFAULT_MAX_SUBSCRIBERS),
            diagnostics_capacity: parse_nonzero_or(&lookup, "DIAGNOSTICS_CAPACITY", DEFAULT_DIAGNOSTICS_CAPACITY),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

// tokio channels panic on zero capacity.
fn parse_nonzero_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    match parse_or(lookup, key, default) {
        0 => default,
        n => n,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
