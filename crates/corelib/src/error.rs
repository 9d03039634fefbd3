//! Error types shared by every peer group.
//!
//! Addresses are carried as their `Display` rendering so a single,
//! non-generic error type works for terminal and overlay groups alike.

use std::io;

use thiserror::Error;

use crate::codec::EncodeFailure;

/// Result type alias for peer group and channel operations.
pub type Result<T> = std::result::Result<T, PeerGroupError>;

/// Errors surfaced by peer group and channel operations.
///
/// Per-message decode problems are not represented here: they are delivered
/// as [`ChannelEvent::DecodingError`](crate::ChannelEvent::DecodingError) on
/// the channel that received the bytes.
#[derive(Debug, Error)]
pub enum PeerGroupError {
    /// The transport could not be set up (e.g. bind address already in use).
    #[error("failed to initialize peer group at {address}: {source}")]
    Initialization {
        address: String,
        #[source]
        source: io::Error,
    },

    /// `client()` could not produce a channel to the target address.
    #[error("failed to set up channel to {to}: {source}")]
    ChannelSetup {
        to: String,
        #[source]
        source: io::Error,
    },

    /// The remote or local side of the channel has gone away.
    #[error("channel from {from} to {to} is broken")]
    ChannelBroken { from: String, to: String },

    /// `send` after the channel was closed locally.
    #[error("channel from {from} to {to} is already closed")]
    ChannelAlreadyClosed { from: String, to: String },

    /// Encoded message exceeds the transport's size bound.
    #[error("message of {size} bytes to {to} exceeds the transport MTU")]
    MessageMtu { to: String, size: usize },

    /// The transport refused to write an otherwise valid message.
    #[error("failed to send message to {to}: {source}")]
    Transport {
        to: String,
        #[source]
        source: io::Error,
    },

    /// The codec could not encode an outgoing message.
    #[error(transparent)]
    Encode(#[from] EncodeFailure),

    /// Logical address has no entry in the routing table.
    #[error("no route to logical address {0}")]
    AddressResolution(String),
}

impl PeerGroupError {
    /// Build an initialization error from a bind/setup failure.
    pub fn initialization(address: impl ToString, source: io::Error) -> Self {
        PeerGroupError::Initialization {
            address: address.to_string(),
            source,
        }
    }

    /// Build a channel setup error naming the target address.
    pub fn channel_setup(to: impl ToString, source: io::Error) -> Self {
        PeerGroupError::ChannelSetup {
            to: to.to_string(),
            source,
        }
    }

    /// True for errors the caller may reasonably retry.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PeerGroupError::ChannelSetup { .. } | PeerGroupError::Transport { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_endpoints() {
        let err = PeerGroupError::ChannelAlreadyClosed {
            from: "127.0.0.1:1000".into(),
            to: "127.0.0.1:2000".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:1000"));
        assert!(msg.contains("127.0.0.1:2000"));

        let err = PeerGroupError::MessageMtu {
            to: "127.0.0.1:2000".into(),
            size: 20000,
        };
        assert!(err.to_string().contains("20000"));
    }

    #[test]
    fn test_retriable_classification() {
        let setup = PeerGroupError::channel_setup(
            "10.0.0.1:9",
            io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert!(setup.is_retriable());

        let init = PeerGroupError::initialization(
            "0.0.0.0:1",
            io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        );
        assert!(!init.is_retriable());
    }
}
