//! Configuration for the overlay peer group.

use std::collections::HashMap;
use std::time::Duration;

use corelib::Address;

/// How long `initialize` waits for the `Enrolled` reply by default.
pub const DEFAULT_ENROLMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`SimplePeerGroup`](crate::SimplePeerGroup).
///
/// `A` is the logical address type, `U` the inner group's address type.
#[derive(Clone, Debug)]
pub struct SimpleConfig<A, U> {
    /// This node's logical address.
    pub process_address: A,

    /// Bootstrap peers, logical -> underlying. Empty means this node is a seed.
    pub known_peers: HashMap<A, U>,

    /// Upper bound on waiting for the enrolment reply.
    pub enrolment_timeout: Duration,
}

impl<A: Address, U> SimpleConfig<A, U> {
    /// Seed configuration: no known peers.
    pub fn new(process_address: A) -> Self {
        Self {
            process_address,
            known_peers: HashMap::new(),
            enrolment_timeout: DEFAULT_ENROLMENT_TIMEOUT,
        }
    }

    pub fn with_known_peer(mut self, address: A, underlying: U) -> Self {
        self.known_peers.insert(address, underlying);
        self
    }

    pub fn with_known_peers(mut self, peers: impl IntoIterator<Item = (A, U)>) -> Self {
        self.known_peers.extend(peers);
        self
    }

    pub fn with_enrolment_timeout(mut self, timeout: Duration) -> Self {
        self.enrolment_timeout = timeout;
        self
    }

    /// True if this node bootstraps the overlay on its own.
    pub fn is_seed(&self) -> bool {
        self.known_peers.is_empty()
    }
}
