//! Per-connection callback context
//!
//! The context is what the event loop calls back into. It is handed to
//! every `run_iteration` explicitly, so no loop callback can ever observe
//! another connection's state.

use super::ring::ResultRing;
use super::{ConnectionOptions, Outcome};
use crate::config::TimerPolicy;
use crate::error::{Error, Result};
use crate::metrics;
use crate::pool::SlotId;
use crate::ticket::{DispatchMode, TicketBook};
use crate::transport::{Completion, EventHandler, LoopEvent, LoopHandle};
use std::ops::ControlFlow;
use tracing::{trace, warn};

/// Result slots of the call currently pumping the loop
#[derive(Debug, Default)]
pub(super) struct CallState {
    pub outcome: Option<Outcome>,
    pub timed_out: bool,
    pub internal_error: Option<Error>,
}

impl CallState {
    pub fn is_resolved(&self) -> bool {
        self.internal_error.is_some() || self.timed_out || self.outcome.is_some()
    }

    /// Collapse the slots into the single result of the call.
    ///
    /// Internal errors win over operation errors, which win over a timeout.
    pub fn finish(&mut self) -> Result<Outcome> {
        if let Some(e) = self.internal_error.take() {
            return Err(e);
        }
        match self.outcome.take() {
            Some(Outcome::Failed(e)) => Err(e),
            _ if self.timed_out => Err(Error::Timeout),
            Some(outcome) => Ok(outcome),
            None => Err(Error::Failure("operation left unresolved".to_string())),
        }
    }
}

#[derive(Debug)]
pub(super) struct Context {
    pub book: TicketBook,
    pub call: CallState,
    pub connected: bool,
    pub async_enabled: bool,
    pub async_limit: usize,
    pub async_count: usize,
    pub ring: ResultRing,
    pub timer_policy: TimerPolicy,
}

impl Context {
    pub fn new(options: &ConnectionOptions) -> Result<Self> {
        Ok(Self {
            book: TicketBook::new(options.max_slabs)?,
            call: CallState::default(),
            connected: false,
            async_enabled: false,
            async_limit: options.async_limit,
            async_count: 0,
            ring: ResultRing::with_capacity(options.async_limit * 2),
            timer_policy: options.timer_policy,
        })
    }

    /// Reset the per-call slots; every public call starts here
    pub fn begin_call(&mut self) {
        self.call = CallState::default();
    }

    pub fn publish_pool_gauges(&self) {
        let stats = self.book.stats();
        metrics::update_pool_live("ticket", stats.tickets.live);
        metrics::update_pool_live("timeout", stats.timeouts.live);
    }

    fn on_completion(
        &mut self,
        lp: &mut dyn LoopHandle,
        slot: SlotId,
        completion: Completion,
    ) -> ControlFlow<()> {
        let Some((kind, mode)) = self.book.get(slot).map(|t| (t.kind, t.mode)) else {
            warn!(%slot, "Completion for a token with no live ticket");
            return ControlFlow::Continue(());
        };
        let Some(id) = self.book.release(lp, slot) else {
            return ControlFlow::Continue(());
        };
        let outcome = Outcome::from_completion(kind, completion);
        trace!(ticket = id.0, kind = kind.as_str(), outcome = outcome.label(), "Completion");

        match mode {
            DispatchMode::Async => {
                self.async_count = self.async_count.saturating_sub(1);
                metrics::ASYNC_PENDING.dec();
                metrics::record_operation(kind.as_str(), outcome.label());
                self.ring.push(id, outcome);
                ControlFlow::Continue(())
            }
            DispatchMode::Sync if !self.book.is_current(id) => {
                trace!(ticket = id.0, highest = self.book.highest().0, "Discarding stale completion");
                metrics::record_stale("completion");
                ControlFlow::Continue(())
            }
            DispatchMode::Sync => {
                metrics::record_operation(kind.as_str(), outcome.label());
                self.call.outcome = Some(outcome);
                if self.timer_policy == TimerPolicy::Eager {
                    self.book.cancel_timeout(lp, slot);
                }
                ControlFlow::Break(())
            }
        }
    }

    fn on_timer(&mut self, lp: &mut dyn LoopHandle, slot: SlotId) -> ControlFlow<()> {
        self.book.mark_timer_fired(slot);
        let Some(id) = self.book.release(lp, slot) else {
            warn!(%slot, "Timer for a token with no live ticket");
            return ControlFlow::Continue(());
        };
        if self.book.is_current(id) {
            trace!(ticket = id.0, "Deadline reached");
            metrics::TIMEOUTS_TOTAL.inc();
            self.call.timed_out = true;
            ControlFlow::Break(())
        } else {
            trace!(ticket = id.0, "Stale timer cleaned up");
            metrics::record_stale("timer");
            ControlFlow::Continue(())
        }
    }
}

impl EventHandler for Context {
    fn handle(&mut self, lp: &mut dyn LoopHandle, event: LoopEvent) -> ControlFlow<()> {
        match event {
            LoopEvent::Connected => {
                self.connected = true;
                ControlFlow::Break(())
            }
            LoopEvent::ConnectionError { status, message } => {
                warn!(status = %status, message = message.as_deref().unwrap_or(""), "Connection error");
                metrics::record_connection_error(status.as_str());
                self.call.internal_error = Some(status.into_connection_error(message.as_deref()));
                ControlFlow::Break(())
            }
            LoopEvent::Completed { token, completion } => {
                self.on_completion(lp, SlotId::from(token), completion)
            }
            LoopEvent::TimerFired { token } => self.on_timer(lp, SlotId::from(token)),
        }
    }
}
