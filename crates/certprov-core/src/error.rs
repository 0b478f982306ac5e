use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Coarse classification of every failure a provisioning attempt can surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid scope, path or endpoint
    Configuration,
    /// Certificate store missing, corrupt or not decryptable
    Store,
    /// The store holds no certificate with a private key
    NoUsableCertificate,
    /// Network failure that may succeed on a later attempt
    TransientNetwork,
    /// The service refused the presented certificate
    AuthenticationRejected,
    /// The service answered with something the client does not understand
    ProtocolViolation,
    /// Registration finished with a disabled or failed status
    RegistrationRefused,
    /// The attempt was cancelled by the caller
    Cancelled,
    /// An identity handle was used after release
    HandleReleased,
    /// Key decoding or signing failed
    Crypto,
}

impl ErrorKind {
    /// Returns true if an operation failing with this kind may be retried
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork)
    }

    /// Stable snake_case name, as used in machine-readable output
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Store => "store",
            Self::NoUsableCertificate => "no_usable_certificate",
            Self::TransientNetwork => "transient_network",
            Self::AuthenticationRejected => "authentication_rejected",
            Self::ProtocolViolation => "protocol_violation",
            Self::RegistrationRefused => "registration_refused",
            Self::Cancelled => "cancelled",
            Self::HandleReleased => "handle_released",
            Self::Crypto => "crypto",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while loading a certificate container
#[derive(Error, Debug)]
pub enum StoreError {
    /// The configured path does not resolve to a file
    #[error("certificate store not found: {}", path.display())]
    NotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// The bytes are not a valid certificate container
    #[error("certificate store {} is unreadable: {reason}", path.display())]
    Unreadable {
        /// Path of the container
        path: PathBuf,
        /// Parser or I/O detail
        reason: String,
    },

    /// A passphrase is required and was absent or wrong
    #[error("certificate store {} could not be decrypted: {reason}", path.display())]
    DecryptionFailed {
        /// Path of the container
        path: PathBuf,
        /// What failed to decrypt
        reason: String,
    },
}

impl StoreError {
    /// Path of the store this error refers to
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::NotFound { path }
            | Self::Unreadable { path, .. }
            | Self::DecryptionFailed { path, .. } => path,
        }
    }

    /// Returns true if supplying the right passphrase could fix this error
    #[must_use]
    pub const fn needs_passphrase(&self) -> bool {
        matches!(self, Self::DecryptionFailed { .. })
    }
}

/// Errors that can occur while provisioning a device
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Certificate store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No certificate in the store carries a private key
    #[error("{origin} did not contain any certificate with a private key")]
    NoUsableCertificate {
        /// Where the certificates were loaded from
        origin: String,
    },

    /// Connection failed and the retry ceiling was reached (or the failure
    /// happened past the connect phase, where no retry is attempted)
    #[error("network failure after {attempts} attempt(s): {message}")]
    TransientNetwork {
        /// Connection attempts made
        attempts: u32,
        /// Last transport error
        message: String,
    },

    /// The service rejected the certificate
    #[error("authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// Unexpected or malformed response
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Cancelled by the caller
    #[error("provisioning cancelled")]
    Cancelled,

    /// The identity handle was released before use
    #[error("identity handle has been released")]
    HandleReleased,

    /// Key decoding or signing failed
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl ProvisionError {
    /// Classify this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Store(_) => ErrorKind::Store,
            Self::NoUsableCertificate { .. } => ErrorKind::NoUsableCertificate,
            Self::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            Self::AuthenticationRejected(_) => ErrorKind::AuthenticationRejected,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::HandleReleased => ErrorKind::HandleReleased,
            Self::Crypto(_) => ErrorKind::Crypto,
        }
    }

    /// Returns true if the error is retryable
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Returns true if the error is due to authentication
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthenticationRejected(_))
    }
}
