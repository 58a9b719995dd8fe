//! Timeout Subsystem
//!
//! A deadline is a second consumer of its ticket. Arming takes a record
//! from the timeout pool, hands out a reference, registers a one-shot timer
//! and links the record to the ticket so the timer is unregistered when the
//! ticket finally returns to its pool.

use super::book::TicketBook;
use crate::error::{Error, Result};
use crate::pool::SlotId;
use crate::transport::{LoopHandle, TimerHandle, Transport};
use std::time::Duration;
use tracing::trace;

/// Pooled timeout registration
#[derive(Debug, Default)]
pub struct TimeoutRecord {
    pub handle: Option<TimerHandle>,
    /// Set once the timer callback ran (or the timer was cancelled)
    pub fired: bool,
}

impl TicketBook {
    /// Arm a one-shot deadline for the ticket in `slot`.
    ///
    /// On error nothing was handed out; the caller still owns the ticket
    /// and must release it.
    pub fn arm_timeout<T>(&mut self, transport: &mut T, slot: SlotId, after: Duration) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        if self.tickets.get(slot).is_none() {
            return Err(Error::InvalidArgument(format!(
                "cannot arm timeout on free ticket {}",
                slot
            )));
        }
        let record_slot = self
            .timeouts
            .allocate()
            .map_err(|e| Error::OutOfMemory(format!("failed to allocate timeout event: {}", e)))?;

        let token = self.hand_out(slot);
        let handle = transport.arm_timer(after, token);
        if let Some(record) = self.timeouts.get_mut(record_slot) {
            record.handle = Some(handle);
            record.fired = false;
        }
        if let Some(ticket) = self.tickets.get_mut(slot) {
            ticket.timeout = Some(record_slot);
        }
        trace!(?handle, after_us = after.as_micros() as u64, "Armed timeout");
        Ok(())
    }

    /// Record that the timer of `slot` has fired, before its reference is
    /// released
    pub fn mark_timer_fired(&mut self, slot: SlotId) {
        let record_slot = self.tickets.get(slot).and_then(|t| t.timeout);
        if let Some(record) = record_slot.and_then(|r| self.timeouts.get_mut(r)) {
            record.fired = true;
        }
    }

    /// Cancel the still-pending timer of `slot` and drop its reference.
    ///
    /// Returns false when there is no timer, it already fired, or the loop
    /// could no longer stop it; the timer then cleans up when it fires.
    pub fn cancel_timeout<L>(&mut self, lp: &mut L, slot: SlotId) -> bool
    where
        L: LoopHandle + ?Sized,
    {
        let Some(record_slot) = self.tickets.get(slot).and_then(|t| t.timeout) else {
            return false;
        };
        let Some(record) = self.timeouts.get_mut(record_slot) else {
            return false;
        };
        let Some(handle) = record.handle.filter(|_| !record.fired) else {
            return false;
        };
        if !lp.cancel_timer(handle) {
            return false;
        }
        record.fired = true;
        self.release(lp, slot);
        true
    }
}
