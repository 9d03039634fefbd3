//! Command implementations.

use std::fmt;
use std::net::SocketAddr;

use anyhow::Context;
use clap::Subcommand;
use corelib::{Channel, ChannelEvent, NodeId, PeerGroup};
use datagram::UdpPeerGroup;
use overlay::{OverlayMessage, SimplePeerGroup};
use tracing::{info, warn};

use crate::config::{CliConfig, NodeArgs};

/// Frame carried by the UDP transport under the overlay.
pub type Frame = OverlayMessage<NodeId, SocketAddr, String>;

/// Overlay node over UDP exchanging text messages.
pub type Node = SimplePeerGroup<NodeId, SocketAddr, String, UdpPeerGroup<Frame>>;

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run until Ctrl-C, printing inbound messages.
    Run {
        /// Send every inbound message back to its sender.
        #[arg(long)]
        echo: bool,
    },
    /// Enroll, send one message to a logical address, and exit.
    Send {
        #[arg(long)]
        to: NodeId,
        message: String,
    },
    /// Enroll and print the routing table.
    Table,
}

/// Outcome of a command, printed by the binary.
#[derive(Debug)]
pub enum CommandResult {
    Stopped { received: usize },
    Sent { to: NodeId },
    Table(Vec<(NodeId, SocketAddr)>),
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Stopped { received } => {
                write!(f, "stopped after {received} inbound channels")
            }
            CommandResult::Sent { to } => write!(f, "sent to {to}"),
            CommandResult::Table(entries) => {
                for (id, address) in entries {
                    writeln!(f, "{id} {address}")?;
                }
                Ok(())
            }
        }
    }
}

pub fn build_node(args: &NodeArgs) -> Node {
    SimplePeerGroup::new(
        args.overlay_config(),
        UdpPeerGroup::with_bincode(args.udp_config()),
    )
}

/// Start the node, run the command, and shut the node down.
pub async fn execute(config: &CliConfig) -> anyhow::Result<CommandResult> {
    let node = build_node(&config.node);
    if let Err(e) = node.initialize().await {
        // Release the listener even when enrollment failed.
        let _ = node.shutdown().await;
        return Err(e).with_context(|| format!("failed to start node {}", config.node.node_id));
    }

    let result = match &config.command {
        Command::Run { echo } => serve(&node, *echo).await,
        Command::Send { to, message } => node
            .send_message(*to, message.clone())
            .await
            .map(|()| CommandResult::Sent { to: *to })
            .with_context(|| format!("failed to send to {to}")),
        Command::Table => {
            let mut entries = node.routing_table().snapshot();
            entries.sort();
            Ok(CommandResult::Table(entries))
        }
    };

    node.shutdown().await.context("failed to shut down node")?;
    result
}

async fn serve(node: &Node, echo: bool) -> anyhow::Result<CommandResult> {
    let mut server = node.server();
    let mut received = 0;
    info!(node = %node.process_address(), "serving; press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            channel = server.next() => {
                let Some(channel) = channel else { break };
                received += 1;
                tokio::spawn(async move {
                    while let Some(event) = channel.next_event().await {
                        match event {
                            ChannelEvent::MessageReceived(text) => {
                                println!("{}: {text}", channel.to());
                                if echo {
                                    if let Err(e) = channel.send(text).await {
                                        warn!(to = %channel.to(), "echo failed: {e}");
                                    }
                                }
                            }
                            ChannelEvent::DecodingError(failure) => {
                                warn!(from = %channel.to(), "{failure}");
                            }
                            ChannelEvent::UnexpectedError(e) => {
                                warn!(from = %channel.to(), "channel error: {e}");
                            }
                        }
                    }
                });
            }
        }
    }

    Ok(CommandResult::Stopped { received })
}
