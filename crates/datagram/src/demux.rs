//! Inbound demultiplexing: turning datagrams into per-channel events.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use corelib::{ChannelEvent, Codec, Subscribers};
use tokio::net::UdpSocket;
use tracing::{debug, error, trace, warn};

use crate::channel::{ChannelId, UdpChannel};
use crate::registry::ChannelRegistry;

/// Receive buffer size; large enough for any IPv4/IPv6 UDP payload so
/// oversized datagrams are still read whole.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 65_535;

/// OS notifications that a previous send hit a closed port. Expected noise
/// for UDP, never worth more than a debug line.
fn is_unreachable_notice(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

fn decode_event<M: 'static>(codec: &dyn Codec<M>, payload: &[u8]) -> ChannelEvent<M> {
    match codec.decode(payload) {
        Ok(message) => ChannelEvent::MessageReceived(message),
        Err(failure) => ChannelEvent::DecodingError(failure),
    }
}

/// Server-side receive loop over the shared listener socket.
pub(crate) struct Listener<M> {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) local: SocketAddr,
    pub(crate) registry: Arc<ChannelRegistry<M>>,
    pub(crate) subscribers: Arc<Subscribers<UdpChannel<M>>>,
    pub(crate) codec: Arc<dyn Codec<M>>,
    pub(crate) max_message_size: usize,
}

impl<M: Send + 'static> Listener<M> {
    /// Runs until the task is aborted. A single bad datagram never ends it.
    pub(crate) async fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, remote)) => self.dispatch(remote, &buf[..len]),
                Err(e) if is_unreachable_notice(&e) => {
                    debug!(local = %self.local, "ignoring unreachable notification: {e}");
                }
                Err(e) => {
                    warn!(local = %self.local, "listener receive failed: {e}");
                }
            }
        }
    }

    /// Route one datagram to its channel, creating and publishing the channel
    /// on first contact.
    pub(crate) fn dispatch(&self, remote: SocketAddr, payload: &[u8]) {
        let id = ChannelId::new(remote, self.local);
        let (channel, created) = self.registry.get_or_create(id, || {
            UdpChannel::server(
                id,
                Arc::downgrade(&self.socket),
                Arc::clone(&self.codec),
                self.max_message_size,
            )
        });

        if created {
            let subscribers = self.subscribers.publish(&channel);
            debug!(channel = %id, subscribers, "new inbound channel");
        }

        trace!(channel = %id, len = payload.len(), "received datagram");
        if !channel.deliver(decode_event(self.codec.as_ref(), payload)) {
            debug!(channel = %id, "dropped datagram for channel closing concurrently");
        }
    }
}

/// Receive loop of a client channel's connected socket.
pub(crate) async fn read_client<M: Send + 'static>(
    socket: Arc<UdpSocket>,
    id: ChannelId,
    registry: Weak<ChannelRegistry<M>>,
    codec: Arc<dyn Codec<M>>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let received = socket.recv(&mut buf).await;
        let Some(registry) = registry.upgrade() else {
            break;
        };
        let received = received.map(|len| &buf[..len]);
        route_client(&registry, id, codec.as_ref(), received);
    }
}

/// Hand one receive result of a client socket to its channel.
///
/// Inbound datagrams are looked up in the registry like the server side; a
/// missing entry means the egress channel vanished and is reported, not fatal.
fn route_client<M: Send + 'static>(
    registry: &ChannelRegistry<M>,
    id: ChannelId,
    codec: &dyn Codec<M>,
    received: io::Result<&[u8]>,
) {
    match (received, registry.get(&id)) {
        (Ok(payload), Some(channel)) => {
            trace!(channel = %id, len = payload.len(), "received datagram");
            channel.deliver(decode_event(codec, payload));
        }
        (Ok(payload), None) => {
            error!(channel = %id, len = payload.len(), "inbound datagram has no egress channel");
        }
        (Err(e), _) if is_unreachable_notice(&e) => {
            debug!(channel = %id, "remote unreachable: {e}");
        }
        (Err(e), Some(channel)) => {
            channel.deliver(ChannelEvent::UnexpectedError(e));
        }
        (Err(e), None) => {
            warn!(channel = %id, "receive failed with no channel to report to: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{BincodeCodec, Channel};

    async fn listener() -> Listener<String> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let local = socket.local_addr().unwrap();
        Listener {
            socket,
            local,
            registry: Arc::new(ChannelRegistry::new()),
            subscribers: Arc::new(Subscribers::new()),
            codec: Arc::new(BincodeCodec::<String>::new()),
            max_message_size: 1024,
        }
    }

    fn encoded(s: &str) -> Vec<u8> {
        BincodeCodec::<String>::new().encode(&s.to_string()).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_dispatch_publishes_once_per_remote() {
        let listener = listener().await;
        let mut server = listener.subscribers.subscribe();
        let remote: SocketAddr = "127.0.0.1:40001".parse().unwrap();

        listener.dispatch(remote, &encoded("one"));
        listener.dispatch(remote, &encoded("two"));

        let channel = server.try_next().expect("published");
        assert!(server.try_next().is_none());
        assert_eq!(channel.to(), &remote);

        let first = channel.next_event().await.and_then(ChannelEvent::into_message);
        let second = channel.next_event().await.and_then(ChannelEvent::into_message);
        assert_eq!(first.as_deref(), Some("one"));
        assert_eq!(second.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_decode_failure_is_delivered_as_event() {
        let listener = listener().await;
        let mut server = listener.subscribers.subscribe();
        let remote: SocketAddr = "127.0.0.1:40002".parse().unwrap();

        // Length prefix claims far more bytes than follow.
        listener.dispatch(remote, &[0xff, 0xff, 0, 0, 0, 0, 0, 0]);

        let channel = server.try_next().expect("published");
        match channel.next_event().await {
            Some(ChannelEvent::DecodingError(failure)) => assert_eq!(failure.len, 8),
            other => panic!("expected decoding error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_republish_after_close() {
        let listener = listener().await;
        let mut server = listener.subscribers.subscribe();
        let remote: SocketAddr = "127.0.0.1:40003".parse().unwrap();

        listener.dispatch(remote, &encoded("hello"));
        let first = server.try_next().expect("published");
        first.close().await.unwrap();

        listener.dispatch(remote, &encoded("again"));
        let second = server.try_next().expect("republished after close");
        assert!(second.is_open());
        let msg = second.next_event().await.and_then(ChannelEvent::into_message);
        assert_eq!(msg.as_deref(), Some("again"));
    }

    async fn registered_client(registry: &ChannelRegistry<String>) -> UdpChannel<String> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let local = socket.local_addr().unwrap();
        let remote: SocketAddr = "127.0.0.1:40010".parse().unwrap();
        let channel = UdpChannel::client(
            ChannelId::new(remote, local),
            socket,
            Arc::new(BincodeCodec::<String>::new()),
            1024,
        );
        registry.register_client(channel.clone()).unwrap();
        channel
    }

    #[tokio::test]
    async fn test_client_receive_failure_is_delivered_as_event() {
        let registry = ChannelRegistry::new();
        let channel = registered_client(&registry).await;
        let codec = BincodeCodec::<String>::new();

        let failure = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        route_client(&registry, channel.id(), &codec, Err(failure));

        match channel.next_event().await {
            Some(ChannelEvent::UnexpectedError(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("expected unexpected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_client_unreachable_notice_is_not_delivered() {
        let registry = ChannelRegistry::new();
        let channel = registered_client(&registry).await;
        let codec = BincodeCodec::<String>::new();

        for kind in [io::ErrorKind::ConnectionRefused, io::ErrorKind::ConnectionReset] {
            route_client(&registry, channel.id(), &codec, Err(io::Error::from(kind)));
        }
        route_client(&registry, channel.id(), &codec, Ok(encoded("after").as_slice()));

        // The first event is the datagram, the notices left no trace.
        let msg = channel.next_event().await.and_then(ChannelEvent::into_message);
        assert_eq!(msg.as_deref(), Some("after"));
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_client_datagram_without_channel_is_dropped() {
        let registry = ChannelRegistry::<String>::new();
        let channel = registered_client(&registry).await;
        let codec = BincodeCodec::<String>::new();
        registry.drain();

        route_client(&registry, channel.id(), &codec, Ok(encoded("orphan").as_slice()));
        assert!(registry.is_empty());
    }
}
