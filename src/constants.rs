//! Centralized protocol and configuration constants.
//!
//! # Categories
//!
//! - **Protocol Constants**: namespaces and element names of the management protocol
//! - **Coordination Constants**: mailbox sizes and lifecycle timeouts
//! - **Reconnect Constants**: backoff bounds for device sessions

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Base namespace of the management protocol (`rpc`, `rpc-reply`, `ok`, `rpc-error`).
pub const BASE_NAMESPACE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Root element of a reply document.
pub const RPC_REPLY_ELEMENT: &str = "rpc-reply";

/// Acknowledgement element for RPCs without output.
pub const OK_ELEMENT: &str = "ok";

/// Local name of an RPC output container.
pub const OUTPUT_LOCAL_NAME: &str = "output";

/// Local name of an RPC input container.
pub const INPUT_LOCAL_NAME: &str = "input";

// =============================================================================
// Coordination Constants
// =============================================================================

/// Default capacity of a manager mailbox.
///
/// Senders wait when the mailbox is full, so this bounds memory per actor.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default capacity of the lifecycle event broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Default time allowed for a device session to be established.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a manager waits for in-flight work when shutting down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time an RPC may spend in the backend before it is failed.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of attempts made to fetch the topology initial state.
pub const DEFAULT_INITIAL_STATE_RETRIES: usize = 5;

// =============================================================================
// Reconnect Constants
// =============================================================================

/// First reconnect delay after a lost session.
pub const DEFAULT_RECONNECT_MIN_DELAY: Duration = Duration::from_millis(500);

/// Upper bound of a single reconnect delay.
pub const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Reconnect attempts before the node manager gives up and demotes itself.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: usize = 10;
