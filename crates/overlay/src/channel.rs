//! Overlay channels and the task that feeds them from inner channels.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use corelib::{Address, Channel, ChannelEvent, Result, Subscribers};
use tokio::sync::mpsc;
use tracing::debug;

use crate::enrolment::{ControlPlane, Handled};
use crate::message::OverlayMessage;

/// A channel addressed by logical address, riding on one inner channel.
pub struct OverlayChannel<A, U, M, C> {
    to: A,
    local: A,
    inner: C,
    events: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent<M>>>>,
    _underlying: PhantomData<fn() -> U>,
}

impl<A: Clone, U, M, C: Clone> Clone for OverlayChannel<A, U, M, C> {
    fn clone(&self) -> Self {
        Self {
            to: self.to.clone(),
            local: self.local.clone(),
            inner: self.inner.clone(),
            events: Arc::clone(&self.events),
            _underlying: PhantomData,
        }
    }
}

impl<A: fmt::Debug, U, M, C: fmt::Debug> fmt::Debug for OverlayChannel<A, U, M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverlayChannel")
            .field("to", &self.to)
            .field("local", &self.local)
            .field("inner", &self.inner)
            .finish()
    }
}

impl<A, U, M, C> OverlayChannel<A, U, M, C> {
    pub(crate) fn new(
        to: A,
        local: A,
        inner: C,
        events: mpsc::UnboundedReceiver<ChannelEvent<M>>,
    ) -> Self {
        Self {
            to,
            local,
            inner,
            events: Arc::new(tokio::sync::Mutex::new(events)),
            _underlying: PhantomData,
        }
    }

    /// The inner channel carrying this overlay channel's traffic.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<A, U, M, C> Channel for OverlayChannel<A, U, M, C>
where
    A: Address,
    U: Address,
    M: Send + 'static,
    C: Channel<Address = U, Message = OverlayMessage<A, U, M>>,
{
    type Address = A;
    type Message = M;

    fn to(&self) -> &A {
        &self.to
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    async fn send(&self, message: M) -> Result<()> {
        self.inner
            .send(OverlayMessage::Application {
                from: self.local.clone(),
                payload: message,
            })
            .await
    }

    async fn next_event(&self) -> Option<ChannelEvent<M>> {
        let mut events = self.events.lock().await;
        if !self.is_open() {
            return None;
        }
        let event = events.recv().await?;
        if self.is_open() {
            Some(event)
        } else {
            None
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Where application traffic read from an inner channel goes.
pub(crate) enum Delivery<A, U, M, C> {
    /// Feeds an overlay channel created by `client()`.
    Direct(mpsc::UnboundedSender<ChannelEvent<M>>),
    /// The dedicated enrollment channel; application traffic is dropped.
    ControlOnly,
    /// Inner inbound channel: an overlay channel is published on the first
    /// application message, control-only peers are never published.
    Inbound {
        local: A,
        subscribers: Arc<Subscribers<OverlayChannel<A, U, M, C>>>,
        published: Option<mpsc::UnboundedSender<ChannelEvent<M>>>,
    },
}

impl<A, U, M, C> Delivery<A, U, M, C>
where
    A: Address,
    U: Address,
    M: Send + 'static,
    C: Channel<Address = U, Message = OverlayMessage<A, U, M>>,
{
    /// Inbound flow that never carried application traffic.
    fn is_unclaimed(&self) -> bool {
        matches!(self, Delivery::Inbound { published: None, .. })
    }

    /// Route one application message. Returns false once nobody holds the
    /// overlay side of `inner` any more.
    fn application(&mut self, inner: &C, from: A, payload: M) -> bool {
        let event = ChannelEvent::MessageReceived(payload);
        match self {
            Delivery::Direct(tx)
            | Delivery::Inbound {
                published: Some(tx),
                ..
            } => tx.send(event).is_ok(),
            Delivery::ControlOnly => {
                debug!(%from, via = %inner.to(), "application message on control channel");
                true
            }
            Delivery::Inbound {
                local,
                subscribers,
                published,
            } => {
                let (tx, rx) = mpsc::unbounded_channel();
                let _ = tx.send(event);
                let channel = OverlayChannel::new(from.clone(), local.clone(), inner.clone(), rx);
                let count = subscribers.publish(&channel);
                if count == 0 {
                    debug!(%from, via = %inner.to(), "no overlay subscribers, dropping flow");
                    return false;
                }
                debug!(%from, via = %inner.to(), subscribers = count, "new overlay channel");
                *published = Some(tx);
                true
            }
        }
    }

    fn other(&mut self, inner: &C, event: ChannelEvent<M>) {
        match self {
            Delivery::Direct(tx)
            | Delivery::Inbound {
                published: Some(tx),
                ..
            } => {
                let _ = tx.send(event);
            }
            _ => debug!(via = %inner.to(), "dropping unattributed error event on inner channel"),
        }
    }
}

async fn release<C: Channel>(inner: &C) {
    if let Err(e) = inner.close().await {
        debug!(via = %inner.to(), "closing inner channel failed: {e}");
    }
}

/// Read `inner` until it ends, applying control messages and routing the rest.
///
/// Inbound flows nobody claims are closed here so the inner group can sweep
/// them: an answered `EnrolMe` with no application traffic, or application
/// traffic without a live overlay receiver.
pub(crate) async fn pump<A, U, M, C>(
    inner: C,
    control: Arc<ControlPlane<A, U>>,
    mut delivery: Delivery<A, U, M, C>,
) where
    A: Address,
    U: Address,
    M: Send + 'static,
    C: Channel<Address = U, Message = OverlayMessage<A, U, M>>,
{
    while let Some(event) = inner.next_event().await {
        match event {
            ChannelEvent::MessageReceived(OverlayMessage::Control(message)) => {
                let handled = control.handle(message, &inner).await;
                if handled == Handled::Answered && delivery.is_unclaimed() {
                    release(&inner).await;
                }
            }
            ChannelEvent::MessageReceived(OverlayMessage::Application { from, payload }) => {
                if !delivery.application(&inner, from, payload) {
                    release(&inner).await;
                }
            }
            ChannelEvent::DecodingError(failure) => {
                delivery.other(&inner, ChannelEvent::DecodingError(failure));
            }
            ChannelEvent::UnexpectedError(e) => {
                delivery.other(&inner, ChannelEvent::UnexpectedError(e));
            }
        }
    }
    debug!(via = %inner.to(), "inner channel ended");
}
