//! Async batch queue
//!
//! In async mode operations are admitted up to the admission limit and
//! return their ticket identity at once. Completions land in the result
//! ring in delivery order and are collected with [`Connection::drain`].

use super::{
    deadline, Connection, Outcome, RemoveOptions, SetOptions, MAX_ADMISSION_LIMIT,
    MIN_ADMISSION_LIMIT,
};
use crate::error::{Error, Result};
use crate::metrics;
use crate::ticket::{DispatchMode, OpKind, TicketId};
use crate::transport::{LoopStatus, Request, Transport};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, warn};

impl<T: Transport> Connection<T> {
    pub fn enable_async(&mut self) {
        self.ctx.async_enabled = true;
        let wanted = self.ctx.ring.capacity().max(self.ctx.async_limit * 2);
        self.ctx.ring.resize(wanted);
        info!(limit = self.ctx.async_limit, "Async mode enabled");
    }

    /// Leave async mode. Operations still in flight keep their async
    /// routing and are buffered when they complete.
    pub fn disable_async(&mut self) {
        self.ctx.async_enabled = false;
        info!(pending = self.ctx.async_count, "Async mode disabled");
    }

    pub fn is_async(&self) -> bool {
        self.ctx.async_enabled
    }

    /// Change the admission limit; the ring is reshaped to `2 * limit`
    /// without losing buffered results
    pub fn set_admission_limit(&mut self, limit: usize) -> Result<()> {
        if !(MIN_ADMISSION_LIMIT..=MAX_ADMISSION_LIMIT).contains(&limit) {
            return Err(Error::InvalidArgument(format!(
                "async limit {} outside {}..={}",
                limit, MIN_ADMISSION_LIMIT, MAX_ADMISSION_LIMIT
            )));
        }
        self.ctx.async_limit = limit;
        self.ctx.ring.resize(limit * 2);
        debug!(limit, capacity = self.ctx.ring.capacity(), "Admission limit changed");
        Ok(())
    }

    pub fn admission_limit(&self) -> usize {
        self.ctx.async_limit
    }

    /// Async operations submitted and not yet completed
    pub fn pending_count(&self) -> usize {
        self.ctx.async_count
    }

    /// Completed results waiting to be drained
    pub fn buffered_count(&self) -> usize {
        self.ctx.ring.len()
    }

    pub fn submit_get(&mut self, key: impl AsRef<[u8]>, touch: Option<Duration>) -> Result<TicketId> {
        let request = Request::Get {
            key: Bytes::copy_from_slice(key.as_ref()),
            touch,
        };
        self.submit_async(OpKind::Get, request)
    }

    /// Submit a store; `options.timeout` does not apply to async operations
    pub fn submit_set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: SetOptions,
    ) -> Result<TicketId> {
        let request = Request::Store {
            key: Bytes::copy_from_slice(key.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            ttl: options.ttl,
            cas: options.cas,
            mode: options.mode,
        };
        self.submit_async(OpKind::Store, request)
    }

    pub fn submit_remove(&mut self, key: impl AsRef<[u8]>, options: RemoveOptions) -> Result<TicketId> {
        let request = Request::Remove {
            key: Bytes::copy_from_slice(key.as_ref()),
            cas: options.cas,
        };
        self.submit_async(OpKind::Remove, request)
    }

    fn admit(&self) -> Result<()> {
        if !self.ctx.async_enabled {
            return Err(Error::Failure("async mode is not enabled".to_string()));
        }
        if self.ctx.async_count >= self.ctx.async_limit {
            metrics::record_rejection("async_limit");
            return Err(Error::AdmissionLimitExceeded("async limit reached".to_string()));
        }
        if self.ctx.ring.is_full() {
            metrics::record_rejection("results_pending");
            return Err(Error::AdmissionLimitExceeded(
                "too many results pending".to_string(),
            ));
        }
        Ok(())
    }

    fn submit_async(&mut self, kind: OpKind, request: Request) -> Result<TicketId> {
        self.admit()?;
        self.ctx.begin_call();

        let slot = self.ctx.book.new_ticket(kind, DispatchMode::Async)?;
        let id = self.ctx.book.highest();
        let token = self.ctx.book.hand_out(slot);
        if let Err(status) = self.transport.submit(token, request) {
            self.ctx.book.release(&mut self.transport, slot);
            return Err(status.into_error());
        }
        self.ctx.async_count += 1;
        metrics::ASYNC_PENDING.inc();
        Ok(id)
    }

    /// Collect completed results, oldest first.
    ///
    /// Pumps the loop until nothing is in flight or `timeout` elapses. On a
    /// connection error the error is returned and buffered results stay
    /// available for the next drain.
    pub fn drain(&mut self, timeout: Option<Duration>) -> Result<Vec<(TicketId, Outcome)>> {
        if !self.ctx.async_enabled {
            return Err(Error::Failure("async mode is not enabled".to_string()));
        }
        self.ctx.begin_call();

        let mut deadline_slot = None;
        if let Some(after) = deadline(timeout).filter(|_| self.ctx.async_count > 0) {
            let slot = self.ctx.book.new_ticket(OpKind::Drain, DispatchMode::Async)?;
            if let Err(e) = self.ctx.book.arm_timeout(&mut self.transport, slot, after) {
                self.ctx.book.release(&mut self.transport, slot);
                return Err(e);
            }
            deadline_slot = Some(slot);
        }

        while self.ctx.async_count > 0 && !self.ctx.call.is_resolved() {
            if self.transport.run_iteration(&mut self.ctx) == LoopStatus::Idle {
                warn!(
                    pending = self.ctx.async_count,
                    "Loop idle with async operations outstanding"
                );
                break;
            }
        }

        // a drain deadline stays current until the next ticket, so it never outlives its drain
        if let Some(slot) = deadline_slot.filter(|_| !self.ctx.call.timed_out) {
            self.ctx.book.cancel_timeout(&mut self.transport, slot);
        }
        self.ctx.publish_pool_gauges();
        if let Some(e) = self.ctx.call.internal_error.take() {
            return Err(e);
        }
        let entries = self.ctx.ring.take_all();
        debug!(
            drained = entries.len(),
            pending = self.ctx.async_count,
            timed_out = self.ctx.call.timed_out,
            "Drained async results"
        );
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::{Connection, ConnectionOptions, GetOptions, Outcome};
    use crate::error::{Error, Result};
    use crate::status::StatusCode;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::ConnectParams;
    use std::time::Duration;

    fn open_async(limit: usize) -> Result<Connection<MemoryTransport>> {
        let options = ConnectionOptions {
            async_limit: limit,
            ..Default::default()
        };
        let mut conn = Connection::open(MemoryTransport::new(), ConnectParams::default(), options)?;
        conn.enable_async();
        Ok(conn)
    }

    #[test]
    fn test_submit_requires_async_mode() -> Result<()> {
        let mut conn = open_async(4)?;
        conn.disable_async();
        assert_eq!(
            conn.submit_get("k", None),
            Err(Error::Failure("async mode is not enabled".to_string()))
        );
        assert!(conn.drain(None).is_err());
        Ok(())
    }

    #[test]
    fn test_limit_bounds() -> Result<()> {
        let mut conn = open_async(4)?;
        assert!(matches!(conn.set_admission_limit(0), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            conn.set_admission_limit(16385),
            Err(Error::InvalidArgument(_))
        ));
        conn.set_admission_limit(16384)?;
        assert_eq!(conn.admission_limit(), 16384);
        Ok(())
    }

    #[test]
    fn test_full_ring_applies_backpressure() -> Result<()> {
        let mut conn = open_async(1)?;
        assert_eq!(conn.ctx.ring.capacity(), 2);

        // completions of async tickets are buffered even while a sync call pumps
        for key in ["a", "b"] {
            conn.enable_async();
            conn.submit_get(key, None)?;
            conn.disable_async();
            conn.get("other", GetOptions::default())?;
        }
        conn.enable_async();
        assert_eq!(conn.pending_count(), 0);
        assert_eq!(conn.buffered_count(), 2);
        assert_eq!(
            conn.submit_get("c", None),
            Err(Error::AdmissionLimitExceeded(
                "too many results pending".to_string()
            ))
        );

        assert_eq!(conn.drain(None)?.len(), 2);
        conn.submit_get("c", None)?;
        Ok(())
    }

    #[test]
    fn test_connection_error_keeps_buffered_results() -> Result<()> {
        let mut conn = open_async(4)?;
        conn.transport_mut()
            .set_key_latency("late", Duration::from_millis(50));
        let first = conn.submit_get("early", None)?;
        conn.submit_get("late", None)?;
        conn.transport_mut().inject_connection_error(
            Duration::from_millis(10),
            StatusCode::NetworkError,
            "connection reset",
        );

        let err = conn.drain(None).unwrap_err();
        assert_eq!(err, Error::ConnectionFailure("connection reset".to_string()));
        assert_eq!(conn.buffered_count(), 1);

        let entries = conn.drain(None)?;
        assert_eq!(entries[0], (first, Outcome::NotFound));
        assert_eq!(entries.len(), 2);
        Ok(())
    }
}
