//! Node configuration.
//!
//! Mirrors the layering the rest of this codebase family uses: a plain
//! struct with a [`Default`] impl carrying the paper's reference constants,
//! overridable either by literal construction or by [`Config::from_env`].

use std::net::Ipv4Addr;
use std::time::Duration;

/// The full set of tunables the node recognises (§4.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Local IPv4 address this node listens and dials from.
    pub bind_addr: Ipv4Addr,

    /// Local TCP port this node listens on.
    pub bind_port: u16,

    /// Maximum number of peers in the active view.
    pub active_size: u8,

    /// Maximum number of identifiers in the passive view.
    pub passive_size: u8,

    /// Active Random Walk Length: initial TTL for FORWARDJOIN and SHUFFLE.
    pub arwl: u8,

    /// Passive Random Walk Length: TTL at which a forward-join target is
    /// added to the passive view of an intermediate node.
    pub prwl: u8,

    /// Number of active-view identifiers sampled into a shuffle xlist.
    pub k_active: u8,

    /// Number of passive-view identifiers sampled into a shuffle xlist.
    pub k_passive: u8,

    /// Interval between shuffle ticks. `None` disables periodic shuffling.
    pub shuffle_period: Option<Duration>,

    /// Generic receive timeout used by the connection FSM and handshakes.
    pub timeout: Duration,

    /// Socket send timeout.
    pub send_timeout: Duration,
}

impl Default for Config {
    /// The paper's reference constants.
    fn default() -> Self {
        Self {
            bind_addr: Ipv4Addr::UNSPECIFIED,
            bind_port: 0,
            active_size: Self::DEFAULT_ACTIVE_SIZE,
            passive_size: Self::DEFAULT_PASSIVE_SIZE,
            arwl: Self::DEFAULT_ARWL,
            prwl: Self::DEFAULT_PRWL,
            k_active: Self::DEFAULT_K_ACTIVE,
            k_passive: Self::DEFAULT_K_PASSIVE,
            shuffle_period: Some(Duration::from_secs(Self::DEFAULT_SHUFFLE_PERIOD_SECS)),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            send_timeout: Duration::from_secs(Self::DEFAULT_SEND_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub const DEFAULT_ACTIVE_SIZE: u8 = 4;
    pub const DEFAULT_PASSIVE_SIZE: u8 = 24;
    pub const DEFAULT_ARWL: u8 = 5;
    pub const DEFAULT_PRWL: u8 = 2;
    pub const DEFAULT_K_ACTIVE: u8 = 2;
    pub const DEFAULT_K_PASSIVE: u8 = 2;
    pub const DEFAULT_SHUFFLE_PERIOD_SECS: u64 = 60;
    pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
    pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;

    /// Builds a config by reading `HYPARVIEW_*` environment variables,
    /// falling back to [`Default`] for anything unset. Intended for the
    /// reference binary, not a requirement for embedding this crate.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("HYPARVIEW_BIND_ADDR") {
            if let Ok(addr) = v.parse() {
                config.bind_addr = addr;
            }
        }
        if let Some(v) = env_parse::<u16>("HYPARVIEW_BIND_PORT") {
            config.bind_port = v;
        }
        if let Some(v) = env_parse::<u8>("HYPARVIEW_ACTIVE_SIZE") {
            config.active_size = v;
        }
        if let Some(v) = env_parse::<u8>("HYPARVIEW_PASSIVE_SIZE") {
            config.passive_size = v;
        }
        if let Some(v) = env_parse::<u8>("HYPARVIEW_ARWL") {
            config.arwl = v;
        }
        if let Some(v) = env_parse::<u8>("HYPARVIEW_PRWL") {
            config.prwl = v;
        }
        if let Some(v) = env_parse::<u8>("HYPARVIEW_K_ACTIVE") {
            config.k_active = v;
        }
        if let Some(v) = env_parse::<u8>("HYPARVIEW_K_PASSIVE") {
            config.k_passive = v;
        }
        if let Some(v) = env_parse::<u64>("HYPARVIEW_SHUFFLE_PERIOD_MS") {
            config.shuffle_period = if v == 0 { None } else { Some(Duration::from_millis(v)) };
        }
        if let Some(v) = env_parse::<u64>("HYPARVIEW_TIMEOUT_MS") {
            config.timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>("HYPARVIEW_SEND_TIMEOUT_MS") {
            config.send_timeout = Duration::from_millis(v);
        }

        config
    }

    /// Derives active/passive view sizes from an estimated network size,
    /// the way `⌈ln(N)⌉ + C` is used to size HyParView overlays in
    /// practice. This is a convenience constructor; the primary path is
    /// literal sizes via [`Default`] or struct-literal construction.
    pub fn for_network_size(network_size: usize, active_c: u8, passive_factor: u8) -> Self {
        let active_size = ((network_size.max(1) as f64).ln().ceil() as u8).saturating_add(active_c).max(1);
        let passive_size = active_size.saturating_mul(passive_factor).max(active_size);
        Self {
            active_size,
            passive_size,
            ..Self::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
