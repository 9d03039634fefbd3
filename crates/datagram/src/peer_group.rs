//! Terminal peer group over UDP.
//!
//! Owns one listener socket and a [`ChannelRegistry`]. Inbound datagrams are
//! demultiplexed into server channels; `client()` creates a channel with its
//! own connected socket. A background sweep reclaims closed entries.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use corelib::{
    BincodeCodec, Channel, Codec, PeerGroup, PeerGroupError, Result, ServerStream, Subscribers,
    TerminalPeerGroup,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::channel::{ChannelId, UdpChannel};
use crate::config::UdpConfig;
use crate::demux::{self, Listener};
use crate::registry::ChannelRegistry;
use crate::sweep;

/// Background state that exists between `initialize` and `shutdown`.
struct Running {
    local: SocketAddr,
    listener: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

/// Peer group over a connectionless UDP socket.
///
/// # Example
///
/// ```no_run
/// use corelib::{Channel, PeerGroup};
/// use datagram::{UdpConfig, UdpPeerGroup};
///
/// # async fn demo() -> corelib::Result<()> {
/// let config = UdpConfig::new("127.0.0.1:7000".parse().unwrap());
/// let group = UdpPeerGroup::<String>::with_bincode(config);
/// group.initialize().await?;
/// let channel = group.client("127.0.0.1:7001".parse().unwrap()).await?;
/// channel.send("hello".to_string()).await?;
/// group.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct UdpPeerGroup<M> {
    config: UdpConfig,
    codec: Arc<dyn Codec<M>>,
    registry: Arc<ChannelRegistry<M>>,
    subscribers: Arc<Subscribers<UdpChannel<M>>>,
    running: Mutex<Option<Running>>,
}

impl<M: Send + 'static> UdpPeerGroup<M> {
    pub fn new(config: UdpConfig, codec: impl Codec<M>) -> Self {
        Self {
            config,
            codec: Arc::new(codec),
            registry: Arc::new(ChannelRegistry::new()),
            subscribers: Arc::new(Subscribers::new()),
            running: Mutex::new(None),
        }
    }

    /// Group using the default bincode wire codec.
    pub fn with_bincode(config: UdpConfig) -> Self
    where
        BincodeCodec<M>: Codec<M>,
    {
        Self::new(config, BincodeCodec::new())
    }

    pub fn config(&self) -> &UdpConfig {
        &self.config
    }

    /// Address the listener is actually bound to, once initialized.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local)
    }

    /// Number of channels currently tracked, including closed ones awaiting
    /// the sweep.
    pub fn channel_count(&self) -> usize {
        self.registry.len()
    }

    fn unspecified_for(to: &SocketAddr) -> SocketAddr {
        match to {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        }
    }
}

#[async_trait]
impl<M: Send + 'static> PeerGroup for UdpPeerGroup<M> {
    type Address = SocketAddr;
    type Message = M;
    type Channel = UdpChannel<M>;

    /// The configured process address. A port of 0 is replaced by the port
    /// actually bound once the group is initialized.
    fn process_address(&self) -> SocketAddr {
        let advertised = self.config.process_address;
        match self.local_address() {
            Some(bound) if advertised.port() == 0 => (advertised.ip(), bound.port()).into(),
            _ => advertised,
        }
    }

    async fn initialize(&self) -> Result<()> {
        let bind = self.config.bind_address;
        if self.config.clean_up_period.is_zero() {
            return Err(PeerGroupError::initialization(
                bind,
                io::Error::new(io::ErrorKind::InvalidInput, "clean-up period must be non-zero"),
            ));
        }
        if self.running.lock().is_some() {
            return Err(PeerGroupError::initialization(
                bind,
                io::Error::new(io::ErrorKind::AlreadyExists, "peer group already initialized"),
            ));
        }

        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| PeerGroupError::initialization(bind, e))?;
        let local = socket
            .local_addr()
            .map_err(|e| PeerGroupError::initialization(bind, e))?;

        let listener = Listener {
            socket: Arc::new(socket),
            local,
            registry: Arc::clone(&self.registry),
            subscribers: Arc::clone(&self.subscribers),
            codec: Arc::clone(&self.codec),
            max_message_size: self.config.max_message_size,
        };
        let listener = tokio::spawn(listener.run());
        let sweeper = tokio::spawn(sweep::run(
            Arc::downgrade(&self.registry),
            self.config.clean_up_initial_delay,
            self.config.clean_up_period,
        ));

        *self.running.lock() = Some(Running {
            local,
            listener,
            sweeper,
        });
        info!(%local, process_address = %self.config.process_address, "UDP peer group listening");
        Ok(())
    }

    async fn client(&self, to: SocketAddr) -> Result<UdpChannel<M>> {
        let socket = UdpSocket::bind(Self::unspecified_for(&to))
            .await
            .map_err(|e| PeerGroupError::channel_setup(to, e))?;
        socket
            .connect(to)
            .await
            .map_err(|e| PeerGroupError::channel_setup(to, e))?;
        let local = socket
            .local_addr()
            .map_err(|e| PeerGroupError::channel_setup(to, e))?;

        let socket = Arc::new(socket);
        let id = ChannelId::new(to, local);
        let channel = UdpChannel::client(
            id,
            Arc::clone(&socket),
            Arc::clone(&self.codec),
            self.config.max_message_size,
        );

        if let Err(existing) = self.registry.register_client(channel.clone()) {
            error!(channel = %id, ?existing, "live channel already owns fresh client socket");
            return Err(PeerGroupError::channel_setup(
                to,
                io::Error::new(io::ErrorKind::AddrInUse, format!("channel {id} already exists")),
            ));
        }

        let reader = tokio::spawn(demux::read_client(
            socket,
            id,
            Arc::downgrade(&self.registry),
            Arc::clone(&self.codec),
        ));
        channel.attach_reader(reader);

        debug!(channel = %id, "opened client channel");
        Ok(channel)
    }

    fn server(&self) -> ServerStream<UdpChannel<M>> {
        self.subscribers.subscribe()
    }

    async fn shutdown(&self) -> Result<()> {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.listener.abort();
            running.sweeper.abort();
            // Awaiting the aborted tasks guarantees the listener socket is
            // dropped, freeing the bind address.
            let _ = running.listener.await;
            let _ = running.sweeper.await;
            info!(local = %running.local, "UDP peer group stopped listening");
        }

        self.subscribers.close();
        for channel in self.registry.drain() {
            channel.close().await?;
        }
        Ok(())
    }
}

impl<M: Send + 'static> TerminalPeerGroup for UdpPeerGroup<M> {}
