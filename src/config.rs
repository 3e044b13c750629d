//! Service configuration from environment variables.
//!
//! | Variable                   | Default                  |
//! |----------------------------|--------------------------|
//! | `POLLER_LOG_LEVEL`         | `info`                   |
//! | `POLLER_REDIS_URL`         | `redis://127.0.0.1:6379` |
//! | `POLLER_HTTP_ADDR`         | `0.0.0.0:9002`           |
//! | `POLLER_INTERVAL_SECS`     | `60`                     |
//! | `POLLER_PIPELINES_CHANNEL` | `pipelines`              |
//! | `POLLER_CONTROL_CHANNEL`   | `pollers`                |

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::Level;

use crate::poller::git::DEFAULT_POLL_INTERVAL_SECS;

pub const DEFAULT_LOG_LEVEL: Level = Level::INFO;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:9002";
pub const DEFAULT_PIPELINES_CHANNEL: &str = "pipelines";
pub const DEFAULT_CONTROL_CHANNEL: &str = "pollers";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: Level,

    pub redis_url: String,

    /// Address the HTTP control surface listens on.
    pub http_addr: SocketAddr,

    /// Time between two checks of a watched branch.
    pub poll_interval: Duration,

    /// Channel pipeline events are published on.
    pub pipelines_channel: String,

    /// Channel control messages are received on.
    pub control_channel: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: DEFAULT_LOG_LEVEL,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            http_addr: default_http_addr(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            pipelines_channel: DEFAULT_PIPELINES_CHANNEL.to_string(),
            control_channel: DEFAULT_CONTROL_CHANNEL.to_string(),
        }
    }
}

/// A set variable whose value was ignored in favour of the default.
///
/// Configuration is read before logging is set up, so these are handed back to
/// the caller to report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {var} {value:?}, using the default")]
pub struct Fallback {
    pub var: &'static str,
    pub value: String,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> (Self, Vec<Fallback>) {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, falling back to defaults for
    /// unset, empty or unparsable values. Unparsable values are returned
    /// alongside the configuration.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<Fallback>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();
        let mut fallbacks = Vec::new();

        let log_level = parse_or(
            get("POLLER_LOG_LEVEL"),
            "POLLER_LOG_LEVEL",
            defaults.log_level,
            &mut fallbacks,
            |raw| raw.parse::<Level>().ok(),
        );
        let http_addr = parse_or(
            get("POLLER_HTTP_ADDR"),
            "POLLER_HTTP_ADDR",
            defaults.http_addr,
            &mut fallbacks,
            |raw| raw.parse().ok(),
        );
        let poll_interval = parse_or(
            get("POLLER_INTERVAL_SECS"),
            "POLLER_INTERVAL_SECS",
            defaults.poll_interval,
            &mut fallbacks,
            |raw| {
                raw.parse::<u64>()
                    .ok()
                    .filter(|&secs| secs > 0)
                    .map(Duration::from_secs)
            },
        );

        let config = Config {
            log_level,
            redis_url: get("POLLER_REDIS_URL").unwrap_or(defaults.redis_url),
            http_addr,
            poll_interval,
            pipelines_channel: get("POLLER_PIPELINES_CHANNEL").unwrap_or(defaults.pipelines_channel),
            control_channel: get("POLLER_CONTROL_CHANNEL").unwrap_or(defaults.control_channel),
        };
        (config, fallbacks)
    }
}

/// Parses `raw` if set, recording a [`Fallback`] when it doesn't parse.
fn parse_or<T>(
    raw: Option<String>,
    var: &'static str,
    default: T,
    fallbacks: &mut Vec<Fallback>,
    parse: impl FnOnce(&str) -> Option<T>,
) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match parse(raw.trim()) {
        Some(value) => value,
        None => {
            fallbacks.push(Fallback { var, value: raw });
            default
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9002))
}
