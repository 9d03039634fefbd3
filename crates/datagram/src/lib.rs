//! Connectionless (UDP) transport for the peer group contract.
//!
//! This crate provides:
//! - Virtual channels synthesized per `(remote, local)` address pair
//! - A concurrent channel registry with publish-once demultiplexing
//! - A periodic sweep reclaiming closed channels
//! - MTU-bounded sends

pub mod channel;
pub mod config;
mod demux;
pub mod peer_group;
pub mod registry;
mod sweep;

pub use channel::{ChannelId, ChannelRole, UdpChannel};
pub use config::{UdpConfig, MAX_MESSAGE_SIZE};
pub use peer_group::UdpPeerGroup;
pub use registry::ChannelRegistry;
