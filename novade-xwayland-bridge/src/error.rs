//! Error types of the Xwayland data bridge.
//!
//! Only two conditions ever leave the bridge as a hard error: the atom table
//! could not be resolved at startup, and the X connection went away. Every
//! other failure (malformed INCR framing, a peer window that vanished, a
//! stalled transfer) is a [`TransferError`] that the component which hit it
//! logs and turns into an empty result for whoever was waiting.

use novade_core::error::CoreError;
use thiserror::Error;

use crate::x11::{Atom, Window};

/// Errors reported by an [`XConnection`](crate::x11::XConnection).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XError {
    #[error("BadWindow: window {0:#x} does not exist")]
    BadWindow(Window),

    #[error("BadAtom: atom {0} is not interned")]
    BadAtom(Atom),

    /// Property data whose length is not a whole number of elements, or an
    /// append with a different type/format than the existing value.
    #[error("BadMatch: {0}")]
    BadMatch(String),

    #[error("BadValue: {0}")]
    BadValue(String),

    #[error("The X connection was closed")]
    ConnectionClosed,

    /// Any other failure reported by a real X server connection.
    #[error("X protocol error: {0}")]
    Protocol(String),
}

impl XError {
    /// Whether the connection itself is unusable, as opposed to one request failing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, XError::ConnectionClosed)
    }
}

/// Failures of a single selection or drag data transfer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("{len} bytes cannot be split into {format}-bit elements")]
    Misaligned { len: usize, format: u8 },

    #[error("unsupported property format {0}")]
    InvalidFormat(u8),

    #[error("malformed INCR transfer: {0}")]
    MalformedIncr(String),

    #[error("the peer did not answer in time")]
    Timeout,

    #[error("peer window {0:#x} disappeared during the transfer")]
    PeerGone(Window),

    #[error(transparent)]
    X(#[from] XError),
}

/// Resolving the well-known atoms failed; the bridge cannot start.
#[derive(Debug, Error)]
#[error("failed to intern {count} well-known atoms: {source}")]
pub struct AtomTableError {
    pub count: usize,
    #[source]
    pub source: XError,
}

/// Top-level error of the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Atom table error: {0}")]
    Atoms(#[from] AtomTableError),

    #[error("X11 error: {0}")]
    X(#[from] XError),

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Wayland data device error: {0}")]
    DataDevice(#[from] crate::wayland::DataDeviceError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the bridge has to stop. Everything else is logged and absorbed.
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Atoms(_) => true,
            BridgeError::X(e) => e.is_fatal(),
            BridgeError::Transfer(TransferError::X(e)) => e.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_loss_is_fatal() {
        assert!(BridgeError::X(XError::ConnectionClosed).is_fatal());
        assert!(BridgeError::Transfer(TransferError::X(XError::ConnectionClosed)).is_fatal());
        assert!(!BridgeError::X(XError::BadWindow(0x20_0001)).is_fatal());
        assert!(!BridgeError::Transfer(TransferError::Timeout).is_fatal());
    }

    #[test]
    fn test_misaligned_message() {
        let err = TransferError::Misaligned { len: 7, format: 32 };
        assert_eq!(err.to_string(), "7 bytes cannot be split into 32-bit elements");
    }

    #[test]
    fn test_atom_table_error_is_fatal() {
        let err: BridgeError = AtomTableError { count: 42, source: XError::ConnectionClosed }.into();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("42 well-known atoms"));
    }
}
