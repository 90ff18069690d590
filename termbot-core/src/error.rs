// ABOUTME: Typed errors for the session/dispatch/output pipeline
// ABOUTME: These cross component boundaries; anyhow stays internal to each component

use thiserror::Error;

/// Errors raised by the Terminal Driver (facade over the multiplexer binary).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("no session for tab {tab_id}")]
    SessionMissing { tab_id: String },
    #[error("multiplexer process failed: {0}")]
    DriverFault(String),
    #[error("multiplexer operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors raised by the Tag-Session Registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tab {tab_id} not found")]
    NotFound { tab_id: String },
    #[error("user {user_id} already has a tab named {display_name}")]
    DuplicateName {
        user_id: String,
        display_name: String,
    },
    #[error("durable store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by the atomic-rewrite durable store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read store file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse store file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write store file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthDenyReason {
    #[error("not whitelisted")]
    NotWhitelisted,
    #[error("ip mismatch")]
    IpMismatch,
    #[error("key expired")]
    Expired,
    #[error("bad key")]
    BadKey,
}

/// Reasons a command can be rejected by the Command Policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyRejectReason {
    #[error("command exceeds the configured length limit")]
    TooLong,
    #[error("command matched a blocked pattern")]
    Blocked,
    #[error("command did not match any allowed pattern")]
    NotAllowlisted,
}

/// Top-level error surface the Dispatcher reasons about.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("authentication denied: {0}")]
    AuthDenied(AuthDenyReason),
    #[error("locked out until {until_unix}")]
    LockedOut { until_unix: i64 },
    #[error("policy rejected: {0}")]
    PolicyRejected(PolicyRejectReason),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("an edit session is already open, finish it first")]
    EditConflict,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
