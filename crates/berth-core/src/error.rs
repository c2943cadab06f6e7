//! Error kinds for berth.
//!
//! Every failure that can cross the volume-plugin boundary is one of
//! these kinds. `Display` renders a stable `Kind: detail` string for the
//! protocol's `Err` field, and `from_err_string` recovers the kind on
//! the far side.

use thiserror::Error;

/// Result type alias used across the workspace.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("InvalidArgs: {0}")]
    InvalidArgs(String),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("AlreadyExists: {0}")]
    AlreadyExists(String),

    /// A conditional update observed a stored record that differs from
    /// the caller's prior value.
    #[error("VersionMismatch: {0}")]
    VersionMismatch(String),

    /// The claim retries were exhausted; another host keeps winning.
    #[error("ClaimContested: {0}")]
    ClaimContested(String),

    /// No member is in this host's zone with a dead or sentinel owner.
    #[error("NoEligibleMember: {0}")]
    NoEligibleMember(String),

    #[error("ServiceNotReady: {0}")]
    ServiceNotReady(String),

    /// Config file content does not match its recorded MD5.
    #[error("CorruptConfig: {0}")]
    CorruptConfig(String),

    #[error("CloudError: {0}")]
    CloudError(String),

    /// Catalog store or transport failure.
    #[error("DbError: {0}")]
    DbError(String),

    /// Kernel unmount returned EBUSY; the container has open files.
    #[error("Busy: {0}")]
    Busy(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable kind name, independent of the detail message.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidArgs(_) => "InvalidArgs",
            CoreError::NotFound(_) => "NotFound",
            CoreError::AlreadyExists(_) => "AlreadyExists",
            CoreError::VersionMismatch(_) => "VersionMismatch",
            CoreError::ClaimContested(_) => "ClaimContested",
            CoreError::NoEligibleMember(_) => "NoEligibleMember",
            CoreError::ServiceNotReady(_) => "ServiceNotReady",
            CoreError::CorruptConfig(_) => "CorruptConfig",
            CoreError::CloudError(_) => "CloudError",
            CoreError::DbError(_) => "DbError",
            CoreError::Busy(_) => "Busy",
            CoreError::Timeout(_) => "Timeout",
            CoreError::Internal(_) => "Internal",
        }
    }

    /// Is this worth one more try against the same backend?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::VersionMismatch(_) | CoreError::Timeout(_) | CoreError::DbError(_)
        )
    }

    /// Recover a `CoreError` from a protocol `Err` string produced by
    /// `Display`. Unrecognized strings map to `Internal`.
    pub fn from_err_string(s: &str) -> CoreError {
        let (kind, detail) = match s.split_once(": ") {
            Some((k, d)) => (k, d.to_string()),
            None => (s, String::new()),
        };
        match kind {
            "InvalidArgs" => CoreError::InvalidArgs(detail),
            "NotFound" => CoreError::NotFound(detail),
            "AlreadyExists" => CoreError::AlreadyExists(detail),
            "VersionMismatch" => CoreError::VersionMismatch(detail),
            "ClaimContested" => CoreError::ClaimContested(detail),
            "NoEligibleMember" => CoreError::NoEligibleMember(detail),
            "ServiceNotReady" => CoreError::ServiceNotReady(detail),
            "CorruptConfig" => CoreError::CorruptConfig(detail),
            "CloudError" => CoreError::CloudError(detail),
            "DbError" => CoreError::DbError(detail),
            "Busy" => CoreError::Busy(detail),
            "Timeout" => CoreError::Timeout(detail),
            "Internal" => CoreError::Internal(detail),
            _ => CoreError::Internal(s.to_string()),
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Internal(e.to_string())
    }
}
