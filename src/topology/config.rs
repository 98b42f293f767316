//! Configuration for topology and node managers.
//!
//! # Configuration Profiles
//!
//! ```rust,no_run
//! use topokeeper::topology::{TopologyConfig, TopologyProfile};
//!
//! // Development profile - quick reconnects, short timeouts
//! let dev_config = TopologyConfig::from_profile(TopologyProfile::Development);
//!
//! // Production profile - patient reconnects, conservative timeouts
//! let prod_config = TopologyConfig::from_profile(TopologyProfile::Production);
//! ```

use std::time::Duration;

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_INITIAL_STATE_RETRIES, DEFAULT_MAILBOX_CAPACITY,
    DEFAULT_RECONNECT_MAX_ATTEMPTS, DEFAULT_RECONNECT_MAX_DELAY, DEFAULT_RECONNECT_MIN_DELAY,
    DEFAULT_RPC_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT,
};
use crate::types::MemberId;

/// Validated configuration profiles.
///
/// | Profile | Reconnect | Timeouts | Use Case |
/// |---------|-----------|----------|----------|
/// | Development | 100ms..2s, 3 attempts | Short | Local testing against simulators |
/// | Production | 500ms..30s, 10 attempts | Conservative | Real device fleets |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyProfile {
    /// Fast feedback while developing against simulated devices.
    ///
    /// **Not suitable for production use.**
    Development,

    /// Balanced configuration for managing real devices.
    Production,
}

impl TopologyProfile {
    pub fn description(&self) -> &'static str {
        match self {
            TopologyProfile::Development => "Local development against simulated devices",
            TopologyProfile::Production => "Managing real device fleets",
        }
    }

    pub fn all() -> &'static [TopologyProfile] {
        &[TopologyProfile::Development, TopologyProfile::Production]
    }
}

impl std::fmt::Display for TopologyProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyProfile::Development => write!(f, "development"),
            TopologyProfile::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for TopologyProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(TopologyProfile::Development),
            "production" | "prod" => Ok(TopologyProfile::Production),
            _ => Err(format!(
                "Unknown profile '{}'. Valid profiles: development, production",
                s
            )),
        }
    }
}

/// Reconnect schedule for lost device sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Attempts before the node manager gives up and waits in Initializing.
    pub max_attempts: usize,
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_RECONNECT_MIN_DELAY,
            max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
            jitter: true,
        }
    }
}

/// Settings shared by a topology manager and the node managers it owns.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// This process's identity in role elections.
    pub member_id: MemberId,

    /// Bound of every manager mailbox.
    pub mailbox_capacity: usize,

    pub reconnect: ReconnectConfig,

    /// Time allowed for a device session to come up.
    pub connect_timeout: Duration,

    /// Time a manager waits for in-flight connects when demoted or shut down.
    pub shutdown_timeout: Duration,

    /// Time an RPC may spend in the backend.
    pub rpc_timeout: Duration,

    /// Attempts made to fetch the initial state on topology promotion.
    pub initial_state_retries: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            member_id: MemberId::new("member-1"),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            reconnect: ReconnectConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            initial_state_retries: DEFAULT_INITIAL_STATE_RETRIES,
        }
    }
}

impl TopologyConfig {
    /// Create a configuration from a profile.
    pub fn from_profile(profile: TopologyProfile) -> Self {
        let base = Self::default();

        match profile {
            TopologyProfile::Development => Self {
                reconnect: ReconnectConfig {
                    min_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(2),
                    max_attempts: 3,
                    jitter: false,
                },
                connect_timeout: Duration::from_secs(5),
                shutdown_timeout: Duration::from_secs(2),
                rpc_timeout: Duration::from_secs(10),
                initial_state_retries: 2,
                ..base
            },
            TopologyProfile::Production => base,
        }
    }

    /// Create configuration from the profile named by `TOPOKEEPER_PROFILE`.
    ///
    /// Falls back to the production profile when unset or unrecognized.
    pub fn from_profile_env() -> Self {
        let profile = std::env::var("TOPOKEEPER_PROFILE")
            .ok()
            .and_then(|s| s.parse::<TopologyProfile>().ok())
            .unwrap_or(TopologyProfile::Production);

        tracing::info!(
            profile = %profile,
            description = profile.description(),
            "Using topology profile"
        );
        Self::from_profile(profile)
    }

    /// Load configuration from environment variables.
    ///
    /// Starts from `from_profile_env()` and overrides:
    /// - `TOPOKEEPER_MEMBER_ID`
    /// - `TOPOKEEPER_MAILBOX_CAPACITY`
    /// - `TOPOKEEPER_RECONNECT_MIN_DELAY_MS` / `TOPOKEEPER_RECONNECT_MAX_DELAY_MS`
    /// - `TOPOKEEPER_RECONNECT_MAX_ATTEMPTS`, `TOPOKEEPER_RECONNECT_JITTER`
    /// - `TOPOKEEPER_CONNECT_TIMEOUT_SECS`, `TOPOKEEPER_SHUTDOWN_TIMEOUT_SECS`,
    ///   `TOPOKEEPER_RPC_TIMEOUT_SECS`
    /// - `TOPOKEEPER_INITIAL_STATE_RETRIES`
    ///
    /// Malformed numbers are errors; the result is validated before returning.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::from_profile_env();

        if let Ok(member_id) = std::env::var("TOPOKEEPER_MEMBER_ID") {
            config.member_id = MemberId::new(member_id);
        }
        if let Some(capacity) = parse_env::<usize>("TOPOKEEPER_MAILBOX_CAPACITY")? {
            config.mailbox_capacity = capacity;
        }
        if let Some(ms) = parse_env::<u64>("TOPOKEEPER_RECONNECT_MIN_DELAY_MS")? {
            config.reconnect.min_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_env::<u64>("TOPOKEEPER_RECONNECT_MAX_DELAY_MS")? {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_env::<usize>("TOPOKEEPER_RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = attempts;
        }
        if let Ok(v) = std::env::var("TOPOKEEPER_RECONNECT_JITTER") {
            config.reconnect.jitter = v.to_lowercase() != "false" && v != "0";
        }
        if let Some(secs) = parse_env::<u64>("TOPOKEEPER_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("TOPOKEEPER_SHUTDOWN_TIMEOUT_SECS")? {
            config.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("TOPOKEEPER_RPC_TIMEOUT_SECS")? {
            config.rpc_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_env::<usize>("TOPOKEEPER_INITIAL_STATE_RETRIES")? {
            config.initial_state_retries = retries;
        }

        config.validate().map_err(|errors| errors.join("; "))?;
        Ok(config)
    }

    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.member_id.as_str().trim().is_empty() {
            errors.push("member_id must not be empty".to_string());
        }
        if self.mailbox_capacity == 0 {
            errors.push("mailbox_capacity must be greater than 0".to_string());
        }
        if self.reconnect.min_delay.is_zero() {
            errors.push("reconnect.min_delay must be greater than 0".to_string());
        }
        if self.reconnect.min_delay > self.reconnect.max_delay {
            errors.push(format!(
                "reconnect.min_delay ({:?}) must not exceed reconnect.max_delay ({:?})",
                self.reconnect.min_delay, self.reconnect.max_delay
            ));
        }
        if self.reconnect.max_attempts == 0 {
            errors.push("reconnect.max_attempts must be at least 1".to_string());
        }
        if self.connect_timeout.is_zero() {
            errors.push("connect_timeout must be greater than 0".to_string());
        }
        if self.rpc_timeout.is_zero() {
            errors.push("rpc_timeout must be greater than 0".to_string());
        }
        if self.shutdown_timeout.is_zero() {
            errors.push("shutdown_timeout must be greater than 0".to_string());
        }
        if self.initial_state_retries == 0 {
            errors.push("initial_state_retries must be at least 1".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| format!("Invalid {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}
