//! Synchronous bridge
//!
//! Each call issues a fresh ticket, which makes it the only current one,
//! submits the request and pumps the loop until that ticket resolves.
//! Late events of earlier calls are drained along the way without touching
//! the result slots.

use super::{deadline, Connection, Fetched, GetOptions, Outcome, RemoveOptions, SetOptions};
use crate::error::{Error, Result};
use crate::ticket::{DispatchMode, OpKind};
use crate::transport::{Cas, Request, Transport};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

impl<T: Transport> Connection<T> {
    /// Fetch a value; `Ok(None)` when the key does not exist
    pub fn get(&mut self, key: impl AsRef<[u8]>, options: GetOptions) -> Result<Option<Fetched>> {
        let request = Request::Get {
            key: Bytes::copy_from_slice(key.as_ref()),
            touch: options.touch,
        };
        match self.execute(OpKind::Get, request, options.timeout)? {
            Outcome::Value { value, cas } => Ok(Some(Fetched {
                value,
                cas: options.with_cas.then_some(cas),
            })),
            Outcome::NotFound => Ok(None),
            other => Err(unexpected(OpKind::Get, &other)),
        }
    }

    /// Store a value and return its new version stamp
    pub fn set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: SetOptions,
    ) -> Result<Cas> {
        let request = Request::Store {
            key: Bytes::copy_from_slice(key.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            ttl: options.ttl,
            cas: options.cas,
            mode: options.mode,
        };
        match self.execute(OpKind::Store, request, options.timeout)? {
            Outcome::Stored { cas } => Ok(cas),
            other => Err(unexpected(OpKind::Store, &other)),
        }
    }

    pub fn remove(&mut self, key: impl AsRef<[u8]>, options: RemoveOptions) -> Result<()> {
        let request = Request::Remove {
            key: Bytes::copy_from_slice(key.as_ref()),
            cas: options.cas,
        };
        match self.execute(OpKind::Remove, request, options.timeout)? {
            Outcome::Removed => Ok(()),
            other => Err(unexpected(OpKind::Remove, &other)),
        }
    }

    fn execute(&mut self, kind: OpKind, request: Request, timeout: Option<Duration>) -> Result<Outcome> {
        if self.ctx.async_enabled {
            return Err(Error::Failure(
                "synchronous operation while async mode is enabled".to_string(),
            ));
        }
        self.ctx.begin_call();

        let slot = self.ctx.book.new_ticket(kind, DispatchMode::Sync)?;
        let token = self.ctx.book.hand_out(slot);
        if let Some(after) = deadline(timeout) {
            if let Err(e) = self.ctx.book.arm_timeout(&mut self.transport, slot, after) {
                self.ctx.book.release(&mut self.transport, slot);
                return Err(e);
            }
        }
        if let Err(status) = self.transport.submit(token, request) {
            debug!(status = %status, kind = kind.as_str(), "Submit rejected by engine");
            self.ctx.book.cancel_timeout(&mut self.transport, slot);
            self.ctx.book.release(&mut self.transport, slot);
            return Err(status.into_error());
        }

        let pumped = self.pump();
        self.ctx.publish_pool_gauges();
        pumped?;
        self.ctx.call.finish()
    }
}

fn unexpected(kind: OpKind, outcome: &Outcome) -> Error {
    Error::Failure(format!("unexpected {} outcome for {}", outcome.label(), kind.as_str()))
}
