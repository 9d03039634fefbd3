//! Wire messages carried by the inner peer group.
//!
//! Control and application traffic share one codec and one inner message
//! type; the enum tag tells them apart.

use serde::{Deserialize, Serialize};

/// Enrollment control protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage<A, U> {
    /// A node asks to join, announcing its logical and underlying addresses.
    EnrolMe { address: A, underlying: U },

    /// Reply to `EnrolMe`: echoes the requester and carries the full table.
    Enrolled {
        address: A,
        underlying: U,
        routing_table: Vec<(A, U)>,
    },
}

/// Frame exchanged over the inner group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverlayMessage<A, U, M> {
    Control(PeerMessage<A, U>),

    /// Application payload, tagged with the sender's logical address so the
    /// receiver can name the channel regardless of the transport source port.
    Application { from: A, payload: M },
}
