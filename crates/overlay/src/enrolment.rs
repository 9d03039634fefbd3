//! Handling of enrollment control messages.

use std::sync::Arc;

use corelib::{Address, Channel};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::message::{OverlayMessage, PeerMessage};
use crate::routing::RoutingTable;

/// What handling one control message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Handled {
    /// Answered an `EnrolMe` with our table.
    Answered,
    /// Adopted the table carried by an `Enrolled`.
    Adopted,
}

/// Applies control messages to the routing table and answers enrollments.
pub(crate) struct ControlPlane<A, U> {
    routing_table: Arc<RoutingTable<A, U>>,
    /// Completed when our own enrollment is acknowledged.
    enrolled: Mutex<Option<oneshot::Sender<()>>>,
}

impl<A: Address, U: Address> ControlPlane<A, U> {
    pub(crate) fn new(routing_table: Arc<RoutingTable<A, U>>) -> Self {
        Self {
            routing_table,
            enrolled: Mutex::new(None),
        }
    }

    /// Arm the enrollment notification before sending `EnrolMe`.
    pub(crate) fn expect_enrolment(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.enrolled.lock() = Some(tx);
        rx
    }

    /// Dispatch one control message received on `channel`.
    pub(crate) async fn handle<M, C>(&self, message: PeerMessage<A, U>, channel: &C) -> Handled
    where
        M: Send + 'static,
        C: Channel<Address = U, Message = OverlayMessage<A, U, M>>,
    {
        match message {
            PeerMessage::EnrolMe {
                address,
                underlying,
            } => {
                self.routing_table.insert(address.clone(), underlying.clone());
                info!(%address, %underlying, peers = self.routing_table.len(), "peer enrolled");

                let reply = PeerMessage::Enrolled {
                    address,
                    underlying,
                    routing_table: self.routing_table.snapshot(),
                };
                if let Err(e) = channel.send(OverlayMessage::Control(reply)).await {
                    warn!(to = %channel.to(), "failed to answer enrollment: {e}");
                }
                Handled::Answered
            }
            PeerMessage::Enrolled {
                address,
                routing_table,
                ..
            } => {
                let peers = routing_table.len();
                self.routing_table.replace(routing_table);
                info!(%address, peers, "enrollment acknowledged, routing table replaced");

                match self.enrolled.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(());
                    }
                    None => debug!(%address, "unsolicited enrollment reply"),
                }
                Handled::Adopted
            }
        }
    }
}
