//! Core contracts for the peer-to-peer networking substrate.
//!
//! This crate provides the transport-independent abstractions:
//! - Address types (`Address`, `NodeId`)
//! - The codec boundary (`Codec`, `BincodeCodec`, `JsonCodec`)
//! - The channel contract and its inbound events
//! - The peer group contract, terminal and non-terminal roles
//! - The shared error taxonomy

pub mod address;
pub mod channel;
pub mod codec;
pub mod error;
pub mod peer_group;

pub use address::{Address, NodeId};
pub use channel::{Channel, ChannelEvent};
pub use codec::{BincodeCodec, Codec, DecodeFailure, EncodeFailure, JsonCodec};
pub use error::{PeerGroupError, Result};
pub use peer_group::{
    NonTerminalPeerGroup, PeerGroup, ServerStream, Subscribers, TerminalPeerGroup,
};
