//! CLI for running and talking to overlay nodes.
//!
//! Provides commands for:
//! - Running a node that prints (and optionally echoes) inbound messages
//! - Enrolling and sending a single message to a logical address
//! - Enrolling and printing the resulting routing table

pub mod commands;
pub mod config;

pub use commands::{Command, CommandResult};
pub use config::CliConfig;
