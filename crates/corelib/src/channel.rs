//! The channel contract: one remote peer, one message type.

use std::io;

use async_trait::async_trait;

use crate::address::Address;
use crate::codec::DecodeFailure;
use crate::error::Result;

/// Everything that can arrive on a channel's inbound stream besides its end.
#[derive(Debug)]
pub enum ChannelEvent<M> {
    /// A payload that decoded to the channel's message type.
    MessageReceived(M),
    /// A payload attributed to this channel that the codec rejected.
    DecodingError(DecodeFailure),
    /// Any other transport anomaly attributed to this channel.
    UnexpectedError(io::Error),
}

impl<M> ChannelEvent<M> {
    /// The message, if this event carries one.
    pub fn into_message(self) -> Option<M> {
        match self {
            ChannelEvent::MessageReceived(m) => Some(m),
            _ => None,
        }
    }
}

/// A bidirectional conversation with a single remote peer.
///
/// State machine: `Open -> Closed`, one way. Handles are cheap to clone and
/// all clones share the same state, so a channel can be sent to one task
/// while another reads its events.
///
/// # Invariants
///
/// - Once [`is_open`](Channel::is_open) returns false it never returns true.
/// - After [`close`](Channel::close) completes, [`next_event`](Channel::next_event)
///   returns `None`.
/// - [`send`](Channel::send) on a closed channel fails with
///   `PeerGroupError::ChannelAlreadyClosed` and puts nothing on the wire.
#[async_trait]
pub trait Channel: Clone + Send + Sync + 'static {
    type Address: Address;
    type Message: Send + 'static;

    /// Remote endpoint of this channel.
    fn to(&self) -> &Self::Address;

    fn is_open(&self) -> bool;

    /// Encode and deliver one message to [`to`](Channel::to).
    async fn send(&self, message: Self::Message) -> Result<()>;

    /// Next inbound event in arrival order; `None` once the channel is closed.
    async fn next_event(&self) -> Option<ChannelEvent<Self::Message>>;

    /// Close the channel. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}
