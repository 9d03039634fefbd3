//! Overlay peer group translating logical addresses over an inner group.
//!
//! # Enrollment
//!
//! 1. `initialize` maps our own logical address to the inner group's process
//!    address.
//! 2. With no known peers the node is a seed and is ready at once.
//! 3. Otherwise one known peer is picked, mapped, and sent `EnrolMe` over a
//!    dedicated control channel. Its `Enrolled` reply replaces our table.
//!
//! A node receiving `EnrolMe` adds the mapping and replies with its full
//! table. There is no retry, no conflict resolution between concurrent
//! enrollments and no eviction of stale mappings.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use corelib::{
    Address, Channel, NonTerminalPeerGroup, PeerGroup, PeerGroupError, Result, ServerStream,
    Subscribers,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use crate::channel::{pump, Delivery, OverlayChannel};
use crate::config::SimpleConfig;
use crate::enrolment::ControlPlane;
use crate::message::{OverlayMessage, PeerMessage};
use crate::routing::RoutingTable;

/// Overlay channel type produced by a [`SimplePeerGroup`] over `G`.
pub type SimpleChannel<A, U, M, G> = OverlayChannel<A, U, M, <G as PeerGroup>::Channel>;

/// Background pumps and the accept loop, aborted on shutdown.
#[derive(Default)]
struct Tasks(Mutex<Vec<JoinHandle<()>>>);

impl Tasks {
    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.0.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    fn abort_all(&self) {
        for task in self.0.lock().drain(..) {
            task.abort();
        }
    }
}

/// Non-terminal peer group with a flat, enrollment-built routing table.
pub struct SimplePeerGroup<A, U, M, G: PeerGroup> {
    config: SimpleConfig<A, U>,
    inner: G,
    routing_table: Arc<RoutingTable<A, U>>,
    control: Arc<ControlPlane<A, U>>,
    subscribers: Arc<Subscribers<SimpleChannel<A, U, M, G>>>,
    tasks: Arc<Tasks>,
}

impl<A, U, M, G> SimplePeerGroup<A, U, M, G>
where
    A: Address,
    U: Address,
    M: Send + 'static,
    G: PeerGroup<Address = U, Message = OverlayMessage<A, U, M>>,
{
    pub fn new(config: SimpleConfig<A, U>, inner: G) -> Self {
        let routing_table = Arc::new(RoutingTable::new());
        Self {
            config,
            inner,
            control: Arc::new(ControlPlane::new(Arc::clone(&routing_table))),
            routing_table,
            subscribers: Arc::new(Subscribers::new()),
            tasks: Arc::new(Tasks::default()),
        }
    }

    pub fn config(&self) -> &SimpleConfig<A, U> {
        &self.config
    }

    pub fn routing_table(&self) -> &RoutingTable<A, U> {
        &self.routing_table
    }

    /// Resolve `to`, send one message, and close the channel.
    ///
    /// # Errors
    /// `AddressResolution` if `to` is not in the routing table, otherwise
    /// whatever the inner group's `client`/`send` report.
    pub async fn send_message(&self, to: A, payload: M) -> Result<()> {
        let channel = self.client(to).await?;
        let sent = channel.send(payload).await;
        channel.close().await?;
        sent
    }

    fn resolve(&self, to: &A) -> Result<U> {
        self.routing_table
            .resolve(to)
            .ok_or_else(|| PeerGroupError::AddressResolution(to.to_string()))
    }

    fn start_accepting(&self) {
        let mut server = self.inner.server();
        let control = Arc::clone(&self.control);
        let subscribers = Arc::clone(&self.subscribers);
        let local = self.config.process_address.clone();
        let tasks = Arc::clone(&self.tasks);

        self.tasks.track(tokio::spawn(async move {
            while let Some(channel) = server.next().await {
                debug!(via = %channel.to(), "inbound inner channel");
                let delivery = Delivery::Inbound {
                    local: local.clone(),
                    subscribers: Arc::clone(&subscribers),
                    published: None,
                };
                tasks.track(tokio::spawn(pump(channel, Arc::clone(&control), delivery)));
            }
        }));
    }

    async fn enrol(&self, peer: A, peer_underlying: U) -> Result<()> {
        let own = self.config.process_address.clone();
        self.routing_table.insert(peer.clone(), peer_underlying.clone());

        let acknowledged = self.control.expect_enrolment();
        let channel = self.inner.client(peer_underlying.clone()).await?;
        self.tasks.track(tokio::spawn(pump(
            channel.clone(),
            Arc::clone(&self.control),
            Delivery::ControlOnly,
        )));

        info!(%own, %peer, %peer_underlying, "requesting enrollment");
        let request = OverlayMessage::Control(PeerMessage::EnrolMe {
            address: own.clone(),
            underlying: self.inner.process_address(),
        });
        let outcome = match channel.send(request).await {
            Ok(()) => time::timeout(self.config.enrolment_timeout, acknowledged).await,
            Err(e) => {
                let _ = channel.close().await;
                return Err(e);
            }
        };
        // The control channel carries nothing after the reply.
        channel.close().await?;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PeerGroupError::initialization(
                &own,
                io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    format!("control channel to {peer} ended before enrollment"),
                ),
            )),
            Err(_) => {
                let waited = self.config.enrolment_timeout;
                Err(PeerGroupError::initialization(
                    &own,
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no enrollment reply from {peer} within {waited:?}"),
                    ),
                ))
            }
        }
    }
}

#[async_trait]
impl<A, U, M, G> PeerGroup for SimplePeerGroup<A, U, M, G>
where
    A: Address,
    U: Address,
    M: Send + 'static,
    G: PeerGroup<Address = U, Message = OverlayMessage<A, U, M>>,
{
    type Address = A;
    type Message = M;
    type Channel = SimpleChannel<A, U, M, G>;

    fn process_address(&self) -> A {
        self.config.process_address.clone()
    }

    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await?;

        let own = self.config.process_address.clone();
        self.routing_table.insert(own.clone(), self.inner.process_address());
        self.start_accepting();

        let bootstrap = self
            .config
            .known_peers
            .iter()
            .next()
            .map(|(peer, underlying)| (peer.clone(), underlying.clone()));

        match bootstrap {
            None => {
                info!(%own, "no known peers, starting as seed");
                Ok(())
            }
            Some((peer, underlying)) => {
                self.enrol(peer, underlying).await?;
                info!(%own, peers = self.routing_table.len(), "enrolled into overlay");
                Ok(())
            }
        }
    }

    async fn client(&self, to: A) -> Result<Self::Channel> {
        let underlying = self.resolve(&to)?;
        let inner = self.inner.client(underlying).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.tasks.track(tokio::spawn(pump(
            inner.clone(),
            Arc::clone(&self.control),
            Delivery::Direct(tx),
        )));

        Ok(OverlayChannel::new(
            to,
            self.config.process_address.clone(),
            inner,
            rx,
        ))
    }

    fn server(&self) -> ServerStream<Self::Channel> {
        self.subscribers.subscribe()
    }

    async fn shutdown(&self) -> Result<()> {
        self.tasks.abort_all();
        self.subscribers.close();
        self.inner.shutdown().await
    }
}

impl<A, U, M, G> NonTerminalPeerGroup for SimplePeerGroup<A, U, M, G>
where
    A: Address,
    U: Address,
    M: Send + 'static,
    G: PeerGroup<Address = U, Message = OverlayMessage<A, U, M>>,
{
    type Inner = G;

    fn inner(&self) -> &G {
        &self.inner
    }
}
