//! Integration tests for TopologyConfig::from_env()
//!
//! These tests verify profile selection, overrides, and rejection of malformed
//! or invalid values read from the environment.

use std::env;
use std::time::Duration;

use serial_test::serial;
use topokeeper::topology::{TopologyConfig, TopologyProfile};

/// All environment variables read by TopologyConfig::from_env().
const ALL_CONFIG_ENV_VARS: &[&str] = &[
    "TOPOKEEPER_PROFILE",
    "TOPOKEEPER_MEMBER_ID",
    "TOPOKEEPER_MAILBOX_CAPACITY",
    "TOPOKEEPER_RECONNECT_MIN_DELAY_MS",
    "TOPOKEEPER_RECONNECT_MAX_DELAY_MS",
    "TOPOKEEPER_RECONNECT_MAX_ATTEMPTS",
    "TOPOKEEPER_RECONNECT_JITTER",
    "TOPOKEEPER_CONNECT_TIMEOUT_SECS",
    "TOPOKEEPER_SHUTDOWN_TIMEOUT_SECS",
    "TOPOKEEPER_RPC_TIMEOUT_SECS",
    "TOPOKEEPER_INITIAL_STATE_RETRIES",
];

/// Run `f` with exactly `vars` set among the config variables.
///
/// Callers are `#[serial]`; every config variable is saved, cleared, and
/// restored afterwards.
fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let originals: Vec<_> = ALL_CONFIG_ENV_VARS
        .iter()
        .map(|k| (*k, env::var(*k).ok()))
        .collect();

    for key in ALL_CONFIG_ENV_VARS {
        unsafe { env::remove_var(key) };
    }
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    for (key, original) in originals {
        match original {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
    }

    result
}

// ============================================================================
// Profiles
// ============================================================================

#[test]
#[serial]
fn test_from_env_defaults_to_production() {
    with_env_vars(&[], || {
        let config = TopologyConfig::from_env().expect("Should parse config");
        let production = TopologyConfig::from_profile(TopologyProfile::Production);
        assert_eq!(config.reconnect, production.reconnect);
        assert_eq!(config.member_id.as_str(), "member-1");
        assert_eq!(config.rpc_timeout, production.rpc_timeout);
    });
}

#[test]
#[serial]
fn test_from_env_selects_development_profile() {
    with_env_vars(&[("TOPOKEEPER_PROFILE", "dev")], || {
        let config = TopologyConfig::from_env().expect("Should parse config");
        assert_eq!(config.reconnect.min_delay, Duration::from_millis(100));
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, 3);
        assert!(!config.reconnect.jitter);
        assert_eq!(config.initial_state_retries, 2);
    });
}

#[test]
#[serial]
fn test_unknown_profile_falls_back_to_production() {
    with_env_vars(&[("TOPOKEEPER_PROFILE", "staging")], || {
        let config = TopologyConfig::from_env().expect("Should parse config");
        let production = TopologyConfig::from_profile(TopologyProfile::Production);
        assert_eq!(config.reconnect, production.reconnect);
    });
}

// ============================================================================
// Overrides
// ============================================================================

#[test]
#[serial]
fn test_from_env_overrides_profile_values() {
    with_env_vars(
        &[
            ("TOPOKEEPER_PROFILE", "development"),
            ("TOPOKEEPER_MEMBER_ID", "member-7"),
            ("TOPOKEEPER_MAILBOX_CAPACITY", "32"),
            ("TOPOKEEPER_RECONNECT_MIN_DELAY_MS", "50"),
            ("TOPOKEEPER_RECONNECT_MAX_DELAY_MS", "400"),
            ("TOPOKEEPER_RECONNECT_MAX_ATTEMPTS", "6"),
            ("TOPOKEEPER_RECONNECT_JITTER", "true"),
            ("TOPOKEEPER_CONNECT_TIMEOUT_SECS", "3"),
            ("TOPOKEEPER_SHUTDOWN_TIMEOUT_SECS", "4"),
            ("TOPOKEEPER_RPC_TIMEOUT_SECS", "20"),
            ("TOPOKEEPER_INITIAL_STATE_RETRIES", "8"),
        ],
        || {
            let config = TopologyConfig::from_env().expect("Should parse config");
            assert_eq!(config.member_id.as_str(), "member-7");
            assert_eq!(config.mailbox_capacity, 32);
            assert_eq!(config.reconnect.min_delay, Duration::from_millis(50));
            assert_eq!(config.reconnect.max_delay, Duration::from_millis(400));
            assert_eq!(config.reconnect.max_attempts, 6);
            assert!(config.reconnect.jitter);
            assert_eq!(config.connect_timeout, Duration::from_secs(3));
            assert_eq!(config.shutdown_timeout, Duration::from_secs(4));
            assert_eq!(config.rpc_timeout, Duration::from_secs(20));
            assert_eq!(config.initial_state_retries, 8);
        },
    );
}

#[test]
#[serial]
fn test_jitter_disabled_by_false_or_zero() {
    for value in ["false", "FALSE", "0"] {
        with_env_vars(&[("TOPOKEEPER_RECONNECT_JITTER", value)], || {
            let config = TopologyConfig::from_env().expect("Should parse config");
            assert!(!config.reconnect.jitter, "jitter left on for {value}");
        });
    }
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
#[serial]
fn test_malformed_number_is_error() {
    with_env_vars(&[("TOPOKEEPER_MAILBOX_CAPACITY", "lots")], || {
        let err = TopologyConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("TOPOKEEPER_MAILBOX_CAPACITY"));
    });
}

#[test]
#[serial]
fn test_negative_timeout_is_error() {
    with_env_vars(&[("TOPOKEEPER_RPC_TIMEOUT_SECS", "-5")], || {
        assert!(TopologyConfig::from_env().is_err());
    });
}

#[test]
#[serial]
fn test_invalid_values_fail_validation() {
    with_env_vars(
        &[
            ("TOPOKEEPER_RECONNECT_MIN_DELAY_MS", "5000"),
            ("TOPOKEEPER_RECONNECT_MAX_DELAY_MS", "100"),
            ("TOPOKEEPER_INITIAL_STATE_RETRIES", "0"),
        ],
        || {
            let message = TopologyConfig::from_env().unwrap_err().to_string();
            assert!(message.contains("reconnect.min_delay"));
            assert!(message.contains("initial_state_retries"));
            assert!(message.contains("; "));
        },
    );
}

#[test]
#[serial]
fn test_blank_member_id_fails_validation() {
    with_env_vars(&[("TOPOKEEPER_MEMBER_ID", "   ")], || {
        let message = TopologyConfig::from_env().unwrap_err().to_string();
        assert!(message.contains("member_id"));
    });
}

// ============================================================================
// Validation without the environment
// ============================================================================

#[test]
fn test_every_profile_validates() {
    for profile in TopologyProfile::all() {
        assert!(TopologyConfig::from_profile(*profile).validate().is_ok());
        assert!(!profile.description().is_empty());
    }
}

#[test]
fn test_zero_timeouts_are_reported() {
    let config = TopologyConfig {
        connect_timeout: Duration::ZERO,
        shutdown_timeout: Duration::ZERO,
        rpc_timeout: Duration::ZERO,
        ..TopologyConfig::default()
    };
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 3);
}
