//! Centralized error types for the upcast core library.
//!
//! Each subsystem defines its own `thiserror` enum next to the code that
//! raises it. This module re-exports them, maps every one of them to a
//! machine-readable code, and folds them into [`UpcastError`], whose variants
//! follow the control plane's failure taxonomy:
//!
//! - protocol violations abort a handshake and discard the session
//! - transport failures surface to whoever requested the session
//! - configuration faults abort initialisation after releasing resources
//!
//! Invariant violations (duplicate queue consumer, send after the shutdown
//! sentinel, mismatched secret length) are not represented here at all: they
//! panic at the call site.

use serde::Serialize;
use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::crypto::CryptoError;
pub use crate::host::ModuleError;
pub use crate::mq::QueueError;
pub use crate::props::PropertyError;
pub use crate::raop::RaopError;
pub use crate::registry::RegistryError;
pub use crate::rtsp::{RtspError, TransportError};
pub use crate::sink::ControlError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code.
    fn code(&self) -> &'static str;
}

impl ErrorCode for QueueError {
    fn code(&self) -> &'static str {
        match self {
            Self::Disposed(_) => "queue_disposed",
            Self::Disconnected(_) => "queue_disconnected",
            Self::Abandoned(_) => "reply_abandoned",
        }
    }
}

impl ErrorCode for RegistryError {
    fn code(&self) -> &'static str {
        match self {
            Self::DuplicateIdentity(_) => "duplicate_identity",
        }
    }
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connection_refused",
            Self::Io(_) => "transport_io",
            Self::NotConnected => "not_connected",
            Self::Malformed(_) => "malformed_response",
        }
    }
}

impl ErrorCode for RtspError {
    fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "rtsp_transport",
            Self::Status { .. } => "rtsp_error_status",
        }
    }
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::PublicKey(_) => "invalid_public_key",
            Self::Encrypt(_) => "key_wrap_failed",
        }
    }
}

impl ErrorCode for RaopError {
    fn code(&self) -> &'static str {
        match self {
            Self::Rtsp(inner) => inner.code(),
            Self::Crypto(inner) => inner.code(),
            Self::InvalidState { .. } => "invalid_state",
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::Syntax(_) => "invalid_module_args",
            Self::UnknownKey(_) => "unknown_module_arg",
            Self::MissingKey(_) => "missing_module_arg",
            Self::Invalid(_) => "invalid_config",
        }
    }
}

impl ErrorCode for ModuleError {
    fn code(&self) -> &'static str {
        match self {
            Self::LoadFailed { .. } => "module_load_failed",
            Self::ServiceMissing { .. } => "service_missing",
            Self::InitFailed { .. } => "module_init_failed",
            Self::Config(inner) => inner.code(),
            Self::Thread(_) => "thread_spawn_failed",
        }
    }
}

impl ErrorCode for ControlError {
    fn code(&self) -> &'static str {
        match self {
            Self::Queue(inner) => inner.code(),
            Self::Action(_) => "action_failed",
            Self::Unbound => "service_unbound",
            Self::BadResponse { .. } => "bad_action_response",
            Self::UnexpectedReply(_) => "unexpected_reply",
        }
    }
}

impl ErrorCode for PropertyError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "property_not_found",
            Self::AlreadyExists(_) => "property_exists",
        }
    }
}

/// Application-wide error type for the control plane.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum UpcastError {
    /// Unexpected state transition or a missing mandatory header.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Connection refused, or a send/receive error on the session transport.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Missing required argument, or a service the remote device does not offer.
    #[error("Configuration fault: {0}")]
    ConfigurationFault(String),

    /// A cross-thread queue could not deliver a message.
    #[error("Queue error: {0}")]
    Queue(String),

    /// The device registry rejected a mutation.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Key wrapping or cipher setup failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The named-secret store rejected an operation.
    #[error("Property error: {0}")]
    Property(String),
}

impl UpcastError {
    /// Returns a machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::TransportFailure(_) => "transport_failure",
            Self::ConfigurationFault(_) => "configuration_fault",
            Self::Queue(_) => "queue_error",
            Self::Registry(_) => "registry_error",
            Self::Crypto(_) => "crypto_error",
            Self::Property(_) => "property_error",
        }
    }

    /// Whether the caller may reasonably try the same operation again.
    ///
    /// The core never retries on its own; this only informs callers that own
    /// a retry policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }
}

/// Convenient Result alias for application-wide operations.
pub type UpcastResult<T> = Result<T, UpcastError>;

impl From<QueueError> for UpcastError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err.to_string())
    }
}

impl From<RegistryError> for UpcastError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err.to_string())
    }
}

impl From<TransportError> for UpcastError {
    fn from(err: TransportError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}

impl From<RtspError> for UpcastError {
    fn from(err: RtspError) -> Self {
        Self::TransportFailure(err.to_string())
    }
}

impl From<CryptoError> for UpcastError {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<RaopError> for UpcastError {
    fn from(err: RaopError) -> Self {
        match err {
            RaopError::Rtsp(inner) => inner.into(),
            RaopError::Crypto(inner) => inner.into(),
            RaopError::InvalidState { .. } => Self::ProtocolViolation(err.to_string()),
        }
    }
}

impl From<ConfigError> for UpcastError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigurationFault(err.to_string())
    }
}

impl From<ModuleError> for UpcastError {
    fn from(err: ModuleError) -> Self {
        Self::ConfigurationFault(err.to_string())
    }
}

impl From<ControlError> for UpcastError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::Queue(inner) => inner.into(),
            ControlError::Action(_) => Self::TransportFailure(err.to_string()),
            ControlError::Unbound => Self::ConfigurationFault(err.to_string()),
            ControlError::BadResponse { .. } | ControlError::UnexpectedReply(_) => {
                Self::ProtocolViolation(err.to_string())
            }
        }
    }
}

impl From<PropertyError> for UpcastError {
    fn from(err: PropertyError) -> Self {
        Self::Property(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raop::RtspState;

    #[test]
    fn invalid_state_maps_to_protocol_violation() {
        let err: UpcastError = RaopError::InvalidState {
            expected: RtspState::Record,
            actual: RtspState::Setup,
        }
        .into();
        assert_eq!(err.code(), "protocol_violation");
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable_by_callers() {
        let err: UpcastError = TransportError::NotConnected.into();
        assert_eq!(err.code(), "transport_failure");
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_module_arg_is_a_configuration_fault() {
        let err = ConfigError::MissingKey("udn".into());
        assert_eq!(err.code(), "missing_module_arg");
        let err: UpcastError = err.into();
        assert_eq!(err.code(), "configuration_fault");
    }

    #[test]
    fn unbound_control_is_a_configuration_fault() {
        assert_eq!(ControlError::Unbound.code(), "service_unbound");
        let err: UpcastError = ControlError::Unbound.into();
        assert_eq!(err.code(), "configuration_fault");

        let err: UpcastError = ControlError::Queue(QueueError::Disposed("q".into())).into();
        assert_eq!(err.code(), "queue_error");
    }

    #[test]
    fn duplicate_identity_code() {
        let err = RegistryError::DuplicateIdentity("uuid:abc".into());
        assert_eq!(err.code(), "duplicate_identity");
    }
}
