//! Error types for KNX discovery following M-ERRORS-CANONICAL-STRUCTS guideline.
//!
//! This module provides structured error types with backtraces and helper
//! methods for error information. Every error is cheap to clone so that a
//! completed [`SearchHandle`](crate::discovery::SearchHandle) can hand out its
//! outcome any number of times.

use core::fmt;
use std::backtrace::Backtrace;
use std::io;
use std::sync::Arc;

/// Result type alias for KNX operations.
pub type Result<T> = core::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Protocol error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolErrorKind {
    InvalidFrame,
    UnsupportedVersion,
    UnsupportedServiceType,
    UnexpectedServiceType,
    BufferTooSmall,
    PayloadTooLarge,
    InvalidDib,
    MissingDib,
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportErrorKind {
    BindFailed,
    MulticastJoinFailed,
    SendFailed,
    ReceiveFailed,
    WorkerSpawnFailed,
    InterfaceLookupFailed,
}

/// Argument error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArgumentErrorKind {
    PortOutOfRange,
    NegativeTimeout,
    InvalidAddress,
    UnknownInterface,
    InvalidConfigValue,
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX discovery error types.
///
/// This is the main error type returned by all discovery operations.
#[derive(Debug, Clone)]
pub enum KnxError {
    /// Malformed caller input, raised before any network action
    InvalidArgument(ArgumentError),
    /// A datagram could not be decoded as the expected KNXnet/IP response
    Protocol(ProtocolError),
    /// Socket creation or socket I/O failed
    Transport(TransportError),
    /// No valid response arrived within the bound
    Timeout,
    /// The search handle was cancelled, or its session was stopped
    Cancelled,
    /// A blocking call was asked to abandon its wait
    Interrupted,
}

// =============================================================================
// Structured Error Types
// =============================================================================

/// Protocol error with backtrace
#[derive(Debug, Clone)]
pub struct ProtocolError {
    kind: ProtocolErrorKind,
    backtrace: Arc<Backtrace>,
}

impl ProtocolError {
    pub(crate) fn new(kind: ProtocolErrorKind) -> Self {
        Self {
            kind,
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Check if this is an invalid frame error
    pub fn is_invalid_frame(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::InvalidFrame)
    }

    /// Check if this is an unsupported version error
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::UnsupportedVersion)
    }

    /// Check if a well-formed frame carried a service other than the expected one
    pub fn is_unexpected_service(&self) -> bool {
        matches!(
            self.kind,
            ProtocolErrorKind::UnexpectedServiceType | ProtocolErrorKind::UnsupportedServiceType
        )
    }

    /// Check if the datagram was too short for the structure being parsed
    pub fn is_truncated(&self) -> bool {
        matches!(self.kind, ProtocolErrorKind::BufferTooSmall)
    }

    /// Captured backtrace (empty unless `RUST_BACKTRACE` is set)
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

/// Transport error with the underlying I/O error and backtrace
#[derive(Debug, Clone)]
pub struct TransportError {
    kind: TransportErrorKind,
    source: Option<Arc<io::Error>>,
    backtrace: Arc<Backtrace>,
}

impl TransportError {
    pub(crate) fn new(kind: TransportErrorKind, source: Option<io::Error>) -> Self {
        Self {
            kind,
            source: source.map(Arc::new),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }

    /// Check if the local socket could not be created or bound
    pub fn is_bind_failed(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::BindFailed | TransportErrorKind::MulticastJoinFailed
        )
    }

    /// Check if a send or receive on an open socket failed
    pub fn is_io_failed(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::SendFailed | TransportErrorKind::ReceiveFailed
        )
    }

    /// The operating system error kind, if the failure came from a socket call
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.source.as_ref().map(|e| e.kind())
    }

    /// Captured backtrace (empty unless `RUST_BACKTRACE` is set)
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

/// Argument error carrying the rejected value, if numeric
#[derive(Debug, Clone)]
pub struct ArgumentError {
    kind: ArgumentErrorKind,
    value: Option<i64>,
}

impl ArgumentError {
    pub(crate) fn new(kind: ArgumentErrorKind, value: Option<i64>) -> Self {
        Self { kind, value }
    }

    /// Check if a port was negative or above 65535
    pub fn is_port_out_of_range(&self) -> bool {
        matches!(self.kind, ArgumentErrorKind::PortOutOfRange)
    }

    /// Check if a timeout was negative
    pub fn is_negative_timeout(&self) -> bool {
        matches!(self.kind, ArgumentErrorKind::NegativeTimeout)
    }

    /// The rejected numeric value
    pub fn value(&self) -> Option<i64> {
        self.value
    }
}

// =============================================================================
// Convenience Constructors for KnxError
// =============================================================================

impl KnxError {
    // Protocol errors
    pub(crate) fn invalid_frame() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidFrame))
    }

    pub(crate) fn unsupported_version() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedVersion))
    }

    pub(crate) fn unsupported_service_type() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedServiceType))
    }

    pub(crate) fn unexpected_service_type() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnexpectedServiceType))
    }

    pub(crate) fn buffer_too_small() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::BufferTooSmall))
    }

    pub(crate) fn payload_too_large() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::PayloadTooLarge))
    }

    pub(crate) fn invalid_dib() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidDib))
    }

    pub(crate) fn missing_dib() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::MissingDib))
    }

    // Transport errors
    pub(crate) fn bind_failed(source: io::Error) -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::BindFailed, Some(source)))
    }

    pub(crate) fn multicast_join_failed(source: io::Error) -> Self {
        Self::Transport(TransportError::new(
            TransportErrorKind::MulticastJoinFailed,
            Some(source),
        ))
    }

    pub(crate) fn send_failed(source: io::Error) -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SendFailed, Some(source)))
    }

    pub(crate) fn receive_failed(source: Option<io::Error>) -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::ReceiveFailed, source))
    }

    pub(crate) fn worker_spawn_failed(source: io::Error) -> Self {
        Self::Transport(TransportError::new(
            TransportErrorKind::WorkerSpawnFailed,
            Some(source),
        ))
    }

    pub(crate) fn interface_lookup_failed(source: io::Error) -> Self {
        Self::Transport(TransportError::new(
            TransportErrorKind::InterfaceLookupFailed,
            Some(source),
        ))
    }

    // Argument errors
    pub(crate) fn port_out_of_range(port: i64) -> Self {
        Self::InvalidArgument(ArgumentError::new(
            ArgumentErrorKind::PortOutOfRange,
            Some(port),
        ))
    }

    pub(crate) fn negative_timeout(timeout: i64) -> Self {
        Self::InvalidArgument(ArgumentError::new(
            ArgumentErrorKind::NegativeTimeout,
            Some(timeout),
        ))
    }

    pub(crate) fn invalid_address() -> Self {
        Self::InvalidArgument(ArgumentError::new(ArgumentErrorKind::InvalidAddress, None))
    }

    pub(crate) fn unknown_interface() -> Self {
        Self::InvalidArgument(ArgumentError::new(ArgumentErrorKind::UnknownInterface, None))
    }

    pub(crate) fn invalid_config_value() -> Self {
        Self::InvalidArgument(ArgumentError::new(
            ArgumentErrorKind::InvalidConfigValue,
            None,
        ))
    }

    // Predicates

    /// Check if this is an `InvalidArgument` error
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Check if this is a `Protocol` error
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Check if this is a `Transport` error
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Check if this is a `Timeout`
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    /// Check if this is a `Cancelled` outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this is an `Interrupted` outcome
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::InvalidArgument(e) => match e.value {
                Some(value) => write!(f, "Invalid argument: {:?} ({value})", e.kind),
                None => write!(f, "Invalid argument: {:?}", e.kind),
            },
            KnxError::Protocol(e) => write!(f, "Protocol error: {:?}", e.kind),
            KnxError::Transport(e) => match &e.source {
                Some(source) => write!(f, "Transport error: {:?}: {source}", e.kind),
                None => write!(f, "Transport error: {:?}", e.kind),
            },
            KnxError::Timeout => write!(f, "Operation timeout"),
            KnxError::Cancelled => write!(f, "Search cancelled"),
            KnxError::Interrupted => write!(f, "Interrupted while waiting"),
        }
    }
}

impl std::error::Error for KnxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KnxError::Transport(e) => e
                .source
                .as_deref()
                .map(|e| e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_predicates() {
        assert!(KnxError::Timeout.is_timeout());
        assert!(KnxError::Cancelled.is_cancelled());
        assert!(KnxError::Interrupted.is_interrupted());
        assert!(KnxError::port_out_of_range(-1).is_invalid_argument());
        assert!(KnxError::invalid_frame().is_protocol());
        assert!(!KnxError::invalid_frame().is_transport());
    }

    #[test]
    fn test_argument_error_keeps_value() {
        let KnxError::InvalidArgument(e) = KnxError::port_out_of_range(0x10000) else {
            panic!("expected argument error");
        };
        assert!(e.is_port_out_of_range());
        assert_eq!(e.value(), Some(0x10000));
    }

    #[test]
    fn test_transport_error_source() {
        let err = KnxError::bind_failed(io::Error::from(io::ErrorKind::AddrInUse));
        assert!(err.source().is_some());
        let KnxError::Transport(t) = &err else {
            panic!("expected transport error");
        };
        assert!(t.is_bind_failed());
        assert_eq!(t.io_kind(), Some(io::ErrorKind::AddrInUse));
    }

    #[test]
    fn test_clone_preserves_kind() {
        let err = KnxError::unexpected_service_type();
        let copy = err.clone();
        match copy {
            KnxError::Protocol(p) => assert!(p.is_unexpected_service()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(KnxError::Timeout.to_string(), "Operation timeout");
        assert_eq!(
            KnxError::negative_timeout(-1).to_string(),
            "Invalid argument: NegativeTimeout (-1)"
        );
    }
}
