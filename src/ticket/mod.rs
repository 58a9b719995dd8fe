//! Correlation Protocol
//!
//! Every operation submitted to the engine carries a ticket. A ticket has a
//! strictly increasing identity and a reference count with one reference per
//! consumer that will eventually report in: the operation callback always,
//! the timeout callback when a deadline was requested.
//!
//! ```text
//! new_ticket ──→ hand_out (op) ──→ [hand_out (timer)] ──→ submit
//!                                                         │
//!        release (op callback) ←──────────────────────────┤
//!        release (timer fires)  ←─────────────────────────┘
//!        refs == 0 → timeout record + ticket back to their pools
//! ```
//!
//! The slot backing a ticket is the token the engine sees, so a slot must
//! never be recycled while a consumer is still outstanding; otherwise a
//! late event for an old operation would be attributed to a newer one.
//!
//! In synchronous mode a callback is authoritative only if the identity
//! returned by [`TicketBook::release`] equals the highest identity issued.

pub mod book;
pub mod timeout;

pub use book::{BookStats, TicketBook};
pub use timeout::TimeoutRecord;

use crate::pool::SlotId;
use std::fmt;

/// Ticket identity, unique and increasing per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TicketId(pub u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the ticket was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpKind {
    #[default]
    Get,
    Store,
    Remove,
    /// Deadline of an async drain; has no operation consumer
    Drain,
}

impl OpKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OpKind::Get => "get",
            OpKind::Store => "set",
            OpKind::Remove => "remove",
            OpKind::Drain => "drain",
        }
    }
}

/// How completions for a ticket are routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Accepted only while the ticket is the highest issued
    #[default]
    Sync,
    /// Always pushed to the result ring under its own identity
    Async,
}

/// A pooled correlation ticket
#[derive(Debug, Default)]
pub struct Ticket {
    pub id: TicketId,
    /// Outstanding consumers (0..=2)
    pub refs: u8,
    /// Linked timeout record, if a deadline was armed
    pub timeout: Option<SlotId>,
    pub kind: OpKind,
    pub mode: DispatchMode,
}
