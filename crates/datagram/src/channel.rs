//! Virtual channels over a connectionless socket.
//!
//! UDP has no connection identity, so a channel is synthesized per
//! `(remote, local)` address pair. Two roles exist:
//!
//! - **Client** channels are created by `client()`. Each owns a fresh socket
//!   connected to the remote, and closing the channel releases it.
//! - **Server** channels are created by the listener on first contact from a
//!   remote. They share the listener socket through a weak reference and must
//!   never close it.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use corelib::{Channel, ChannelEvent, Codec, PeerGroupError, Result};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Key of a virtual channel: the remote and local ends of the flow.
///
/// Computed identically for every datagram of the same flow, so it is the
/// registry key for both roles.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ChannelId {
    pub remote: SocketAddr,
    pub local: SocketAddr,
}

impl ChannelId {
    pub fn new(remote: SocketAddr, local: SocketAddr) -> Self {
        Self { remote, local }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.remote)
    }
}

/// Which side created the channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChannelRole {
    Client,
    Server,
}

enum SocketHandle {
    /// Client channel: owns its connected socket until close.
    Owned(Mutex<Option<Arc<UdpSocket>>>),
    /// Server channel: borrows the listener socket.
    Shared(Weak<UdpSocket>),
}

struct Shared<M> {
    id: ChannelId,
    role: ChannelRole,
    open: AtomicBool,
    socket: SocketHandle,
    codec: Arc<dyn Codec<M>>,
    max_message_size: usize,
    events_tx: Mutex<Option<mpsc::UnboundedSender<ChannelEvent<M>>>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent<M>>>,
    /// Receive loop of a client channel, aborted on close.
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// A virtual channel to one remote UDP endpoint.
pub struct UdpChannel<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for UdpChannel<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M> fmt::Debug for UdpChannel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpChannel")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("open", &self.shared.open.load(Ordering::Acquire))
            .finish()
    }
}

impl<M: Send + 'static> UdpChannel<M> {
    fn with_socket(
        id: ChannelId,
        role: ChannelRole,
        socket: SocketHandle,
        codec: Arc<dyn Codec<M>>,
        max_message_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                id,
                role,
                open: AtomicBool::new(true),
                socket,
                codec,
                max_message_size,
                events_tx: Mutex::new(Some(tx)),
                events_rx: tokio::sync::Mutex::new(rx),
                reader: Mutex::new(None),
            }),
        }
    }

    /// Channel created by `client()`, owning its connected socket.
    pub(crate) fn client(
        id: ChannelId,
        socket: Arc<UdpSocket>,
        codec: Arc<dyn Codec<M>>,
        max_message_size: usize,
    ) -> Self {
        Self::with_socket(
            id,
            ChannelRole::Client,
            SocketHandle::Owned(Mutex::new(Some(socket))),
            codec,
            max_message_size,
        )
    }

    /// Channel created by the listener, sharing the listener socket.
    pub(crate) fn server(
        id: ChannelId,
        socket: Weak<UdpSocket>,
        codec: Arc<dyn Codec<M>>,
        max_message_size: usize,
    ) -> Self {
        Self::with_socket(
            id,
            ChannelRole::Server,
            SocketHandle::Shared(socket),
            codec,
            max_message_size,
        )
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn role(&self) -> ChannelRole {
        self.shared.role
    }

    /// Local end of the flow.
    pub fn local_address(&self) -> SocketAddr {
        self.shared.id.local
    }

    /// Hand the receive loop to the channel so close can stop it.
    pub(crate) fn attach_reader(&self, reader: JoinHandle<()>) {
        let mut slot = self.shared.reader.lock();
        if self.is_open() {
            *slot = Some(reader);
        } else {
            reader.abort();
        }
    }

    /// Push an inbound event. Returns false if the channel no longer accepts
    /// events.
    pub(crate) fn deliver(&self, event: ChannelEvent<M>) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.shared.events_tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn already_closed(&self) -> PeerGroupError {
        PeerGroupError::ChannelAlreadyClosed {
            from: self.shared.id.local.to_string(),
            to: self.shared.id.remote.to_string(),
        }
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        match &self.shared.socket {
            SocketHandle::Owned(slot) => slot.lock().clone().ok_or_else(|| self.already_closed()),
            SocketHandle::Shared(weak) => {
                weak.upgrade().ok_or_else(|| PeerGroupError::ChannelBroken {
                    from: self.shared.id.local.to_string(),
                    to: self.shared.id.remote.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl<M: Send + 'static> Channel for UdpChannel<M> {
    type Address = SocketAddr;
    type Message = M;

    fn to(&self) -> &SocketAddr {
        &self.shared.id.remote
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    async fn send(&self, message: M) -> Result<()> {
        if !self.is_open() {
            return Err(self.already_closed());
        }

        let bytes = self.shared.codec.encode(&message)?;
        if bytes.len() > self.shared.max_message_size {
            return Err(PeerGroupError::MessageMtu {
                to: self.shared.id.remote.to_string(),
                size: bytes.len(),
            });
        }

        let socket = self.socket()?;
        let to = self.shared.id.remote;
        let written = match self.shared.role {
            ChannelRole::Client => socket.send(&bytes).await,
            ChannelRole::Server => socket.send_to(&bytes, to).await,
        };
        written.map_err(|source| PeerGroupError::Transport {
            to: to.to_string(),
            source,
        })?;

        trace!(channel = %self.shared.id, len = bytes.len(), "sent datagram");
        Ok(())
    }

    async fn next_event(&self) -> Option<ChannelEvent<M>> {
        let mut rx = self.shared.events_rx.lock().await;
        if !self.is_open() {
            return None;
        }
        let event = rx.recv().await?;
        // Events that lost the race against close are dropped.
        if self.is_open() {
            Some(event)
        } else {
            None
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.shared.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(reader) = self.shared.reader.lock().take() {
            reader.abort();
        }
        if let SocketHandle::Owned(slot) = &self.shared.socket {
            slot.lock().take();
        }
        // Completes the inbound stream.
        self.shared.events_tx.lock().take();

        debug!(channel = %self.shared.id, role = ?self.shared.role, "closed channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::BincodeCodec;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn detached_server(port: u16) -> UdpChannel<String> {
        UdpChannel::server(
            ChannelId::new(addr(port), addr(1)),
            Weak::new(),
            Arc::new(BincodeCodec::<String>::new()),
            64,
        )
    }

    #[tokio::test]
    async fn test_close_flips_once_and_rejects_send() {
        let channel = detached_server(5000);
        assert!(channel.is_open());

        channel.close().await.unwrap();
        channel.close().await.unwrap();
        assert!(!channel.is_open());

        let err = channel.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, PeerGroupError::ChannelAlreadyClosed { .. }));
    }

    #[tokio::test]
    async fn test_queued_events_are_not_delivered_after_close() {
        let channel = detached_server(5001);
        assert!(channel.deliver(ChannelEvent::MessageReceived("a".to_string())));
        assert!(channel.deliver(ChannelEvent::MessageReceived("b".to_string())));

        let first = channel.next_event().await.and_then(ChannelEvent::into_message);
        assert_eq!(first.as_deref(), Some("a"));

        channel.close().await.unwrap();
        assert!(channel.next_event().await.is_none());
        assert!(!channel.deliver(ChannelEvent::MessageReceived("c".to_string())));
    }

    #[tokio::test]
    async fn test_server_channel_without_listener_is_broken() {
        let channel = detached_server(5002);
        let err = channel.send("hi".to_string()).await.unwrap_err();
        assert!(matches!(err, PeerGroupError::ChannelBroken { .. }));
    }

    #[tokio::test]
    async fn test_mtu_checked_before_touching_socket() {
        let channel = detached_server(5003);
        let err = channel.send("x".repeat(100)).await.unwrap_err();
        match err {
            // 8-byte length prefix + 100 bytes.
            PeerGroupError::MessageMtu { size, .. } => assert_eq!(size, 108),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_close_releases_client_socket() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let local = socket.local_addr().unwrap();
        let channel = UdpChannel::<String>::client(
            ChannelId::new(addr(5004), local),
            Arc::clone(&socket),
            Arc::new(BincodeCodec::<String>::new()),
            64,
        );
        assert_eq!(Arc::strong_count(&socket), 2);

        channel.close().await.unwrap();
        assert_eq!(Arc::strong_count(&socket), 1);
    }
}
