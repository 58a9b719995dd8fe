//! Ticket issue, hand-out and release

use super::{DispatchMode, OpKind, Ticket, TicketId, TimeoutRecord};
use crate::error::Result;
use crate::pool::{PoolStats, SlabPool, SlotId};
use crate::transport::{LoopHandle, Token};
use tracing::{debug, trace};

/// Tickets and timeout records of one connection
#[derive(Debug)]
pub struct TicketBook {
    pub(super) tickets: SlabPool<Ticket>,
    pub(super) timeouts: SlabPool<TimeoutRecord>,
    highest: TicketId,
}

/// Live/free counts of both pools
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BookStats {
    pub tickets: PoolStats,
    pub timeouts: PoolStats,
}

impl TicketBook {
    /// Create the book with one warm slab in each pool
    pub fn new(max_slabs: Option<usize>) -> Result<Self> {
        Ok(Self {
            tickets: SlabPool::preallocated("ticket", max_slabs)?,
            timeouts: SlabPool::preallocated("timeout", max_slabs)?,
            highest: TicketId::default(),
        })
    }

    /// Build the book from explicitly configured pools
    pub fn with_pools(tickets: SlabPool<Ticket>, timeouts: SlabPool<TimeoutRecord>) -> Self {
        Self {
            tickets,
            timeouts,
            highest: TicketId::default(),
        }
    }

    /// Issue a ticket with the next identity and no references
    pub fn new_ticket(&mut self, kind: OpKind, mode: DispatchMode) -> Result<SlotId> {
        let slot = self.tickets.allocate()?;
        self.highest = TicketId(self.highest.0 + 1);
        let id = self.highest;
        if let Some(ticket) = self.tickets.get_mut(slot) {
            *ticket = Ticket {
                id,
                refs: 0,
                timeout: None,
                kind,
                mode,
            };
        }
        debug!(ticket = id.0, kind = kind.as_str(), ?mode, "Issued ticket");
        Ok(slot)
    }

    /// Register one more consumer and return the token it reports with
    pub fn hand_out(&mut self, slot: SlotId) -> Token {
        if let Some(ticket) = self.tickets.get_mut(slot) {
            ticket.refs += 1;
        } else {
            debug_assert!(false, "hand_out on a free ticket slot {}", slot);
        }
        Token::from(slot)
    }

    /// Drop one consumer's reference and return the ticket identity.
    ///
    /// When the last reference goes, the timeout record (its timer
    /// unregistered) and the ticket return to their pools. `None` means the
    /// token does not name a live ticket.
    pub fn release<L>(&mut self, lp: &mut L, slot: SlotId) -> Option<TicketId>
    where
        L: LoopHandle + ?Sized,
    {
        let ticket = self.tickets.get_mut(slot)?;
        let id = ticket.id;
        ticket.refs = ticket.refs.saturating_sub(1);
        if ticket.refs > 0 {
            return Some(id);
        }

        if let Some(record_slot) = ticket.timeout.take() {
            if let Some(record) = self.timeouts.get(record_slot) {
                if let (false, Some(handle)) = (record.fired, record.handle) {
                    lp.cancel_timer(handle);
                }
            }
            let released = self.timeouts.release(record_slot);
            debug_assert!(released.is_ok(), "timeout record freed twice");
        }
        let released = self.tickets.release(slot);
        debug_assert!(released.is_ok(), "ticket freed twice");
        trace!(ticket = id.0, "Ticket returned to pool");
        Some(id)
    }

    pub fn get(&self, slot: SlotId) -> Option<&Ticket> {
        self.tickets.get(slot)
    }

    /// Highest identity issued so far
    pub fn highest(&self) -> TicketId {
        self.highest
    }

    /// Whether `id` is still the current synchronous ticket
    pub fn is_current(&self, id: TicketId) -> bool {
        id == self.highest
    }

    pub fn stats(&self) -> BookStats {
        BookStats {
            tickets: self.tickets.stats(),
            timeouts: self.timeouts.stats(),
        }
    }

    /// Tear both pools down at once, returning the live records reclaimed
    pub fn clear(&mut self) -> (usize, usize) {
        (self.tickets.clear(), self.timeouts.clear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TimerHandle;

    #[derive(Default)]
    struct NoTimers {
        cancelled: Vec<TimerHandle>,
    }

    impl LoopHandle for NoTimers {
        fn cancel_timer(&mut self, handle: TimerHandle) -> bool {
            self.cancelled.push(handle);
            true
        }
    }

    #[test]
    fn test_identities_strictly_increase() -> Result<()> {
        let mut book = TicketBook::new(None)?;
        let mut lp = NoTimers::default();
        let mut last = TicketId::default();
        for _ in 0..600 {
            let slot = book.new_ticket(OpKind::Get, DispatchMode::Sync)?;
            book.hand_out(slot);
            let id = book.release(&mut lp, slot).unwrap();
            assert!(id > last);
            last = id;
        }
        // released every time, so a single slot was recycled throughout
        assert_eq!(book.stats().tickets.carved, 1);
        Ok(())
    }

    #[test]
    fn test_ticket_survives_until_all_consumers_report() -> Result<()> {
        let mut book = TicketBook::new(None)?;
        let mut lp = NoTimers::default();

        let slot = book.new_ticket(OpKind::Get, DispatchMode::Sync)?;
        book.hand_out(slot);
        book.hand_out(slot);

        assert_eq!(book.release(&mut lp, slot), Some(TicketId(1)));
        assert!(book.get(slot).is_some());
        assert_eq!(book.stats().tickets.live, 1);

        // a new ticket must not land on the pinned slot
        let other = book.new_ticket(OpKind::Store, DispatchMode::Sync)?;
        assert_ne!(other, slot);

        assert_eq!(book.release(&mut lp, slot), Some(TicketId(1)));
        assert!(book.get(slot).is_none());
        assert_eq!(book.release(&mut lp, slot), None);
        Ok(())
    }

    #[test]
    fn test_current_tracks_highest() -> Result<()> {
        let mut book = TicketBook::new(None)?;
        let a = book.new_ticket(OpKind::Get, DispatchMode::Sync)?;
        let a_id = book.get(a).unwrap().id;
        assert!(book.is_current(a_id));

        book.new_ticket(OpKind::Get, DispatchMode::Sync)?;
        assert!(!book.is_current(a_id));
        assert_eq!(book.highest(), TicketId(2));
        Ok(())
    }

    #[test]
    fn test_clear_counts_outstanding() -> Result<()> {
        let mut book = TicketBook::new(None)?;
        for _ in 0..3 {
            let slot = book.new_ticket(OpKind::Remove, DispatchMode::Async)?;
            book.hand_out(slot);
        }
        assert_eq!(book.clear(), (3, 0));
        Ok(())
    }
}
