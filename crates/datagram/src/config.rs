//! Configuration for the UDP peer group.

use std::net::SocketAddr;
use std::time::Duration;

/// Practical ceiling for one encoded message, well under the IP datagram limit.
pub const MAX_MESSAGE_SIZE: usize = 16384;

/// Default delay before the first cleanup sweep and between sweeps.
pub const DEFAULT_CLEAN_UP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for a [`UdpPeerGroup`](crate::UdpPeerGroup).
#[derive(Clone, Debug)]
pub struct UdpConfig {
    /// Endpoint the listener binds to.
    pub bind_address: SocketAddr,

    /// Endpoint advertised to peers. Defaults to `bind_address`; set it when
    /// the group is reachable through a different address (e.g. port mapping).
    ///
    /// A wildcard IP (`0.0.0.0`, `::`) is advertised as is and peers cannot
    /// reach it, so wildcard binds need an explicit process address. A port of
    /// 0 is resolved to the bound port after `initialize`.
    pub process_address: SocketAddr,

    /// Delay before the first registry sweep.
    pub clean_up_initial_delay: Duration,

    /// Period between registry sweeps. Must be non-zero.
    pub clean_up_period: Duration,

    /// Largest encoded message `send` accepts.
    pub max_message_size: usize,
}

impl UdpConfig {
    /// Configuration listening on `bind_address` with default timings.
    pub fn new(bind_address: SocketAddr) -> Self {
        Self {
            bind_address,
            process_address: bind_address,
            clean_up_initial_delay: DEFAULT_CLEAN_UP_INTERVAL,
            clean_up_period: DEFAULT_CLEAN_UP_INTERVAL,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_process_address(mut self, process_address: SocketAddr) -> Self {
        self.process_address = process_address;
        self
    }

    /// Override the sweep schedule.
    pub fn with_clean_up(mut self, initial_delay: Duration, period: Duration) -> Self {
        self.clean_up_initial_delay = initial_delay;
        self.clean_up_period = period;
        self
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_address_defaults_to_bind_address() {
        let bind: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let config = UdpConfig::new(bind);
        assert_eq!(config.process_address, bind);
        assert_eq!(config.clean_up_period, Duration::from_secs(60));
        assert_eq!(config.max_message_size, 16384);

        let public: SocketAddr = "203.0.113.7:4000".parse().unwrap();
        let config = config.with_process_address(public);
        assert_eq!(config.bind_address, bind);
        assert_eq!(config.process_address, public);
    }
}
