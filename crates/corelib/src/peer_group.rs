//! The peer group contract and its server-stream plumbing.
//!
//! Every transport and overlay implements [`PeerGroup`]. Groups that talk to a
//! transport directly are [`TerminalPeerGroup`]s; groups that wrap another
//! group and translate its addresses are [`NonTerminalPeerGroup`]s.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::address::Address;
use crate::channel::Channel;
use crate::error::Result;

/// A named endpoint that produces outbound channels and observes inbound ones.
///
/// # Lifecycle
///
/// 1. Construct with its configuration.
/// 2. [`initialize`](PeerGroup::initialize) exactly once.
/// 3. Use [`client`](PeerGroup::client) / [`server`](PeerGroup::server).
/// 4. [`shutdown`](PeerGroup::shutdown).
#[async_trait]
pub trait PeerGroup: Send + Sync + 'static {
    type Address: Address;
    type Message: Send + 'static;
    type Channel: Channel<Address = Self::Address, Message = Self::Message>;

    /// The address this group is reachable at, stable for its lifetime.
    fn process_address(&self) -> Self::Address;

    /// One-time setup: bind the listener, or enroll into an overlay.
    async fn initialize(&self) -> Result<()>;

    /// Produce a channel to `to`.
    ///
    /// # Errors
    /// `PeerGroupError::ChannelSetup` naming `to` if the transport cannot
    /// reach it (overlays add `AddressResolution`).
    async fn client(&self, to: Self::Address) -> Result<Self::Channel>;

    /// Subscribe to inbound channels.
    ///
    /// Each call is an independent subscription observing channels first seen
    /// after the call. Every inbound channel is surfaced once per
    /// subscription, at first observation. The stream ends on shutdown.
    fn server(&self) -> ServerStream<Self::Channel>;

    /// Release the listener, background tasks and open channels.
    async fn shutdown(&self) -> Result<()>;
}

/// Marker for groups that talk directly to a transport.
pub trait TerminalPeerGroup: PeerGroup {}

/// A group layered over exactly one inner group.
pub trait NonTerminalPeerGroup: PeerGroup {
    type Inner: PeerGroup;

    fn inner(&self) -> &Self::Inner;
}

/// Stream of inbound channels returned by [`PeerGroup::server`].
#[derive(Debug)]
pub struct ServerStream<C> {
    rx: mpsc::UnboundedReceiver<C>,
}

impl<C> ServerStream<C> {
    /// Next newly observed inbound channel; `None` after shutdown.
    pub async fn next(&mut self) -> Option<C> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`next`](ServerStream::next).
    pub fn try_next(&mut self) -> Option<C> {
        self.rx.try_recv().ok()
    }
}

/// Fan-out of newly observed inbound channels to every live subscription.
///
/// Dropped subscriptions are pruned on the next publish.
#[derive(Debug)]
pub struct Subscribers<C> {
    inner: Mutex<SubscriberList<C>>,
}

#[derive(Debug)]
struct SubscriberList<C> {
    senders: Vec<mpsc::UnboundedSender<C>>,
    closed: bool,
}

impl<C: Clone> Subscribers<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SubscriberList {
                senders: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Open a new subscription. After [`close`](Subscribers::close) the
    /// returned stream is already finished.
    pub fn subscribe(&self) -> ServerStream<C> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.senders.push(tx);
        }
        ServerStream { rx }
    }

    /// Deliver `channel` to every live subscription, returning how many got it.
    pub fn publish(&self, channel: &C) -> usize {
        let mut inner = self.inner.lock();
        inner.senders.retain(|tx| tx.send(channel.clone()).is_ok());
        inner.senders.len()
    }

    /// End every subscription and refuse new ones.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.senders.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Clone> Default for Subscribers<C> {
    fn default() -> Self {
        Self::new()
    }
}
