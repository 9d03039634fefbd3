//! Command-line configuration.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser};
use corelib::NodeId;
use datagram::{UdpConfig, MAX_MESSAGE_SIZE};
use overlay::SimpleConfig;

use crate::commands::{self, Command};

/// Run or talk to a peer group overlay node.
#[derive(Debug, Parser)]
#[command(name = "peernode", version)]
pub struct CliConfig {
    #[command(flatten)]
    pub node: NodeArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings shared by every command.
#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    /// Logical address of this node, in hex.
    #[arg(long)]
    pub node_id: NodeId,

    /// UDP endpoint to listen on.
    #[arg(long, default_value = "0.0.0.0:7000")]
    pub bind: SocketAddr,

    /// Endpoint advertised to peers (defaults to --bind). Required when --bind
    /// is a wildcard address such as the default.
    #[arg(long)]
    pub process_address: Option<SocketAddr>,

    /// Bootstrap peer as NODE_ID=HOST:PORT. Repeatable.
    #[arg(long = "known-peer", value_parser = parse_known_peer)]
    pub known_peers: Vec<(NodeId, SocketAddr)>,

    /// Seconds before the first channel sweep.
    #[arg(long, default_value_t = 60)]
    pub cleanup_delay_secs: u64,

    /// Seconds between channel sweeps.
    #[arg(long, default_value_t = 60)]
    pub cleanup_period_secs: u64,

    /// Largest encoded message accepted by send, in bytes.
    #[arg(long, default_value_t = MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Seconds to wait for the enrollment reply.
    #[arg(long, default_value_t = 10)]
    pub enrolment_timeout_secs: u64,
}

impl NodeArgs {
    pub fn udp_config(&self) -> UdpConfig {
        UdpConfig::new(self.bind)
            .with_process_address(self.process_address.unwrap_or(self.bind))
            .with_clean_up(
                Duration::from_secs(self.cleanup_delay_secs),
                Duration::from_secs(self.cleanup_period_secs),
            )
            .with_max_message_size(self.max_message_size)
    }

    pub fn overlay_config(&self) -> SimpleConfig<NodeId, SocketAddr> {
        SimpleConfig::new(self.node_id)
            .with_known_peers(self.known_peers.iter().copied())
            .with_enrolment_timeout(Duration::from_secs(self.enrolment_timeout_secs))
    }
}

fn parse_known_peer(s: &str) -> Result<(NodeId, SocketAddr), String> {
    let (id, address) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NODE_ID=HOST:PORT, got `{s}`"))?;
    let id = id
        .parse::<NodeId>()
        .map_err(|e| format!("invalid node id `{id}`: {e}"))?;
    let address = address
        .parse::<SocketAddr>()
        .map_err(|e| format!("invalid address `{address}`: {e}"))?;
    Ok((id, address))
}

impl CliConfig {
    /// Install logging, start a runtime and execute the command.
    pub fn run(self) -> anyhow::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();

        let runtime = tokio::runtime::Runtime::new()?;
        let result = runtime.block_on(commands::execute(&self))?;
        println!("{result}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_peer() {
        let (id, address) = parse_known_peer("1f=127.0.0.1:7001").unwrap();
        assert_eq!(id, NodeId(0x1f));
        assert_eq!(address, "127.0.0.1:7001".parse::<SocketAddr>().unwrap());

        assert!(parse_known_peer("127.0.0.1:7001").is_err());
        assert!(parse_known_peer("zz=127.0.0.1:7001").is_err());
        assert!(parse_known_peer("1=nowhere").is_err());
    }

    #[test]
    fn test_defaults_follow_transport_defaults() {
        let config = CliConfig::try_parse_from(["peernode", "--node-id", "a", "table"]).unwrap();
        let udp = config.node.udp_config();
        assert_eq!(udp.bind_address, "0.0.0.0:7000".parse::<SocketAddr>().unwrap());
        assert_eq!(udp.process_address, udp.bind_address);
        assert_eq!(udp.clean_up_period, Duration::from_secs(60));
        assert_eq!(udp.max_message_size, MAX_MESSAGE_SIZE);

        let overlay = config.node.overlay_config();
        assert_eq!(overlay.process_address, NodeId(0xa));
        assert!(overlay.is_seed());
    }

    #[test]
    fn test_send_with_known_peers() {
        let config = CliConfig::try_parse_from([
            "peernode",
            "--node-id",
            "2",
            "--bind",
            "127.0.0.1:7002",
            "--process-address",
            "198.51.100.2:7002",
            "--known-peer",
            "1=127.0.0.1:7001",
            "send",
            "--to",
            "1",
            "hello",
        ])
        .unwrap();

        assert_eq!(
            config.node.udp_config().process_address,
            "198.51.100.2:7002".parse::<SocketAddr>().unwrap()
        );
        let overlay = config.node.overlay_config();
        assert_eq!(
            overlay.known_peers.get(&NodeId(1)),
            Some(&"127.0.0.1:7001".parse::<SocketAddr>().unwrap())
        );
        match config.command {
            Command::Send { to, message } => {
                assert_eq!(to, NodeId(1));
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
