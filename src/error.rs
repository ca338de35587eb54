//! Error types.
//!
//! Two disjoint taxonomies are used throughout this crate: [`IoErrorKind`] for failures
//! arising from the kernel, sockets, HCI or parameter validation, and [`AttErrorKind`] for
//! failures reported over the Attribute Protocol itself (including the synthetic codes this
//! crate synthesizes for protocol violations, timeouts and cancellation).

use std::fmt;

/// A result with [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned by this crate.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Detailed error message.
    pub message: String,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind, message: String::new() }
    }

    pub(crate) fn msg(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// The ATT error code carried by this error, if it is a [`ErrorKind::Att`] error.
    pub fn att_code(&self) -> Option<u8> {
        match &self.kind {
            ErrorKind::Att(att) => Some(att.code()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", &self.kind)
        } else {
            write!(f, "{}: {}", &self.kind, &self.message)
        }
    }
}

impl std::error::Error for Error {}

/// Top-level error kind: either a transport/validation failure or an ATT-layer failure.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ErrorKind {
    /// {0}
    Io(IoErrorKind),
    /// {0}
    Att(AttErrorKind),
}

/// BT I/O error kind — failures from the kernel, socket, HCI layer, or parameter validation.
///
/// Corresponds to the "BT I/O error" taxonomy.
#[derive(Clone, Debug, displaydoc::Display, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum IoErrorKind {
    /// invalid argument: {0}
    InvalidArgument(String),
    /// not connected
    NotConnected,
    /// already connected
    AlreadyConnected,
    /// connection refused
    ConnectionRefused,
    /// no memory
    NoMemory,
    /// operation timed out
    Timeout,
    /// connection reset by peer
    ResetByPeer,
    /// underlying OS error (errno {0})
    Os(i32),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as K;
        let kind = match err.kind() {
            K::NotConnected => IoErrorKind::NotConnected,
            K::AlreadyExists => IoErrorKind::AlreadyConnected,
            K::ConnectionRefused => IoErrorKind::ConnectionRefused,
            K::TimedOut => IoErrorKind::Timeout,
            K::ConnectionReset => IoErrorKind::ResetByPeer,
            _ => IoErrorKind::Os(err.raw_os_error().unwrap_or(0)),
        };
        Self::msg(ErrorKind::Io(kind), err.to_string())
    }
}

#[cfg(feature = "bluetoothd")]
impl From<dbus::Error> for Error {
    fn from(err: dbus::Error) -> Self {
        log::trace!("DBus error {}: {}", err.name().unwrap_or_default(), err.message().unwrap_or_default());
        Self::msg(ErrorKind::Io(IoErrorKind::Os(0)), err.message().unwrap_or_default().to_string())
    }
}

impl From<crate::addr::InvalidAddress> for Error {
    fn from(err: crate::addr::InvalidAddress) -> Self {
        Self::msg(ErrorKind::Io(IoErrorKind::InvalidArgument(err.0.clone())), err.to_string())
    }
}

/// GATT error kind — failures reported over ATT, including the synthetic transport codes.
///
/// The numeric value matches the wire ATT error code (§7 of the protocol table) for the
/// variants below `0x80`; values `0x80` and above are synthesized locally by the transport
/// and never appear on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AttErrorKind {
    /// Invalid handle (0x01).
    InvalidHandle,
    /// Read not permitted (0x02).
    ReadNotPermitted,
    /// Write not permitted (0x03).
    WriteNotPermitted,
    /// Invalid PDU (0x04).
    InvalidPdu,
    /// Insufficient authentication (0x05).
    InsufficientAuthentication,
    /// Request not supported (0x06).
    RequestNotSupported,
    /// Invalid offset (0x07).
    InvalidOffset,
    /// Insufficient authorization (0x08).
    InsufficientAuthorization,
    /// Prepare queue full (0x09).
    PrepareQueueFull,
    /// Attribute not found (0x0A).
    AttributeNotFound,
    /// Attribute not long (0x0B).
    AttributeNotLong,
    /// Insufficient encryption key size (0x0C).
    InsufficientEncryptionKeySize,
    /// Invalid attribute value length (0x0D).
    InvalidAttributeValueLength,
    /// Unlikely error (0x0E).
    UnlikelyError,
    /// Insufficient encryption (0x0F).
    InsufficientEncryption,
    /// Unsupported group type (0x10).
    UnsupportedGroupType,
    /// Insufficient resources (0x11).
    InsufficientResources,
    /// Some other, application-specific or reserved ATT error code.
    Other(u8),
    /// Synthetic: local IO error (0x80).
    LocalIo,
    /// Synthetic: request timed out (0x81).
    Timeout,
    /// Synthetic: request aborted because an earlier request on the same transport failed (0x82).
    Aborted,
}

impl AttErrorKind {
    /// Decodes an ATT error code (wire value) or one of the synthetic transport codes.
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::InvalidHandle,
            0x02 => Self::ReadNotPermitted,
            0x03 => Self::WriteNotPermitted,
            0x04 => Self::InvalidPdu,
            0x05 => Self::InsufficientAuthentication,
            0x06 => Self::RequestNotSupported,
            0x07 => Self::InvalidOffset,
            0x08 => Self::InsufficientAuthorization,
            0x09 => Self::PrepareQueueFull,
            0x0A => Self::AttributeNotFound,
            0x0B => Self::AttributeNotLong,
            0x0C => Self::InsufficientEncryptionKeySize,
            0x0D => Self::InvalidAttributeValueLength,
            0x0E => Self::UnlikelyError,
            0x0F => Self::InsufficientEncryption,
            0x10 => Self::UnsupportedGroupType,
            0x11 => Self::InsufficientResources,
            0x80 => Self::LocalIo,
            0x81 => Self::Timeout,
            0x82 => Self::Aborted,
            other => Self::Other(other),
        }
    }

    /// The wire (or synthetic) code this variant represents.
    pub fn code(&self) -> u8 {
        match self {
            Self::InvalidHandle => 0x01,
            Self::ReadNotPermitted => 0x02,
            Self::WriteNotPermitted => 0x03,
            Self::InvalidPdu => 0x04,
            Self::InsufficientAuthentication => 0x05,
            Self::RequestNotSupported => 0x06,
            Self::InvalidOffset => 0x07,
            Self::InsufficientAuthorization => 0x08,
            Self::PrepareQueueFull => 0x09,
            Self::AttributeNotFound => 0x0A,
            Self::AttributeNotLong => 0x0B,
            Self::InsufficientEncryptionKeySize => 0x0C,
            Self::InvalidAttributeValueLength => 0x0D,
            Self::UnlikelyError => 0x0E,
            Self::InsufficientEncryption => 0x0F,
            Self::UnsupportedGroupType => 0x10,
            Self::InsufficientResources => 0x11,
            Self::Other(code) => *code,
            Self::LocalIo => 0x80,
            Self::Timeout => 0x81,
            Self::Aborted => 0x82,
        }
    }

    /// Whether this is one of the codes synthesized locally (never seen on the wire).
    pub fn is_synthetic(&self) -> bool {
        self.code() >= 0x80
    }
}

impl fmt::Display for AttErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ATT error 0x{:02X} ({:?})", self.code(), self)
    }
}

#[cfg(feature = "serde")]
#[derive(serde::Serialize, serde::Deserialize)]
struct AttErrorKindShadow(u8);

#[cfg(feature = "serde")]
impl serde::Serialize for AttErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        AttErrorKindShadow(self.code()).serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for AttErrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let shadow = AttErrorKindShadow::deserialize(deserializer)?;
        Ok(Self::from_code(shadow.0))
    }
}

impl Error {
    /// Builds a GATT error from a wire/synthetic ATT status code.
    pub(crate) fn att(code: u8) -> Self {
        Self::new(ErrorKind::Att(AttErrorKind::from_code(code)))
    }

    /// Shorthand for a BT I/O `InvalidArgument` error.
    pub(crate) fn invalid_arg(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::msg(ErrorKind::Io(IoErrorKind::InvalidArgument(message.clone())), message)
    }

    /// Shorthand for a BT I/O `NotConnected` error.
    pub(crate) fn not_connected() -> Self {
        Self::new(ErrorKind::Io(IoErrorKind::NotConnected))
    }
}
