//! Overlay peer groups layered over another peer group.
//!
//! This crate provides:
//! - A logical-to-underlying routing table
//! - The enrollment control protocol (`EnrolMe` / `Enrolled`)
//! - `SimplePeerGroup`, a non-terminal group that translates logical
//!   addresses and frames application traffic for the inner group

pub mod channel;
pub mod config;
mod enrolment;
pub mod message;
pub mod peer_group;
pub mod routing;

pub use channel::OverlayChannel;
pub use config::SimpleConfig;
pub use message::{OverlayMessage, PeerMessage};
pub use peer_group::{SimpleChannel, SimplePeerGroup};
pub use routing::RoutingTable;
