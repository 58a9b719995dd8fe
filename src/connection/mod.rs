//! Connection to a key-value engine
//!
//! A [`Connection`] owns one transport together with the ticket and timeout
//! pools and the callback context that the transport's loop drives.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────── Connection<T> ────────────────┐
//!  get/set ──┤ sync bridge ── pump ──┐                        │
//!  submit_* ─┤ admission ── submit ──┼──→ T: Transport ──┐    │
//!  drain ────┤ ResultRing ←──────────┘         │          │    │
//!            │                    run_iteration(&mut Context)  │
//!            │ Context { TicketBook, CallState, ring, .. } ←┘  │
//!            └────────────────────────────────────────────────┘
//! ```
//!
//! Teardown (explicit [`Connection::close`] or drop) shuts the transport
//! down first, so no callback can run against pools that are being torn
//! down, then reclaims every pooled record.

mod batch;
mod context;
mod ring;
mod sync;

pub use ring::ResultRing;
pub use crate::transport::StoreMode;

use crate::config::{ClientConfig, TimerPolicy};
use crate::error::{Error, Result};
use crate::metrics;
use crate::status::StatusCode;
use crate::ticket::{BookStats, OpKind};
use crate::transport::{Cas, Completion, ConnectParams, LoopStatus, Transport};
use bytes::Bytes;
use context::Context;
use std::time::Duration;
use tracing::{debug, info};

/// Smallest and largest admission limits accepted
pub const MIN_ADMISSION_LIMIT: usize = 1;
pub const MAX_ADMISSION_LIMIT: usize = 16384;
pub const DEFAULT_ADMISSION_LIMIT: usize = 20;

/// Settings fixed when the connection opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub async_limit: usize,
    pub timer_policy: TimerPolicy,
    /// Cap on slabs per pool; `None` grows until allocation fails
    pub max_slabs: Option<usize>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            async_limit: DEFAULT_ADMISSION_LIMIT,
            timer_policy: TimerPolicy::default(),
            max_slabs: None,
        }
    }
}

impl From<&ClientConfig> for ConnectionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            async_limit: config.async_limit,
            timer_policy: config.timer_policy,
            max_slabs: config.max_slabs,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub timeout: Option<Duration>,
    /// Reset the key's expiry while reading
    pub touch: Option<Duration>,
    /// Return the version stamp alongside the value
    pub with_cas: bool,
}

impl GetOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn touch(mut self, ttl: Duration) -> Self {
        self.touch = Some(ttl);
        self
    }

    pub fn with_cas(mut self) -> Self {
        self.with_cas = true;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub timeout: Option<Duration>,
    pub ttl: Option<Duration>,
    /// Only write if the stored version stamp still matches
    pub cas: Option<Cas>,
    pub mode: StoreMode,
}

impl SetOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cas(mut self, cas: Cas) -> Self {
        self.cas = Some(cas);
        self
    }

    pub fn mode(mut self, mode: StoreMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub timeout: Option<Duration>,
    pub cas: Option<Cas>,
}

impl RemoveOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cas(mut self, cas: Cas) -> Self {
        self.cas = Some(cas);
        self
    }
}

/// Value returned by a successful synchronous get
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub value: Bytes,
    /// Present only when requested with [`GetOptions::with_cas`]
    pub cas: Option<Cas>,
}

/// Result of one operation as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Value { value: Bytes, cas: Cas },
    Stored { cas: Cas },
    Removed,
    /// Read of a missing key; a valid empty result
    NotFound,
    Failed(Error),
}

impl Outcome {
    /// Map an engine completion through the error taxonomy
    pub(crate) fn from_completion(kind: OpKind, completion: Completion) -> Self {
        match (kind, completion) {
            (OpKind::Get, Completion::NotFound)
            | (OpKind::Get, Completion::Failed(StatusCode::KeyENoEnt)) => Outcome::NotFound,
            (_, Completion::NotFound) => Outcome::Failed(StatusCode::KeyENoEnt.into_error()),
            (_, Completion::Failed(status)) => Outcome::Failed(status.into_error()),
            (OpKind::Get, Completion::Success { value, cas }) => Outcome::Value {
                value: value.unwrap_or_default(),
                cas,
            },
            (OpKind::Store, Completion::Success { cas, .. }) => Outcome::Stored { cas },
            (OpKind::Remove | OpKind::Drain, Completion::Success { .. }) => Outcome::Removed,
        }
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Value { .. } => "value",
            Outcome::Stored { .. } => "stored",
            Outcome::Removed => "removed",
            Outcome::NotFound => "not_found",
            Outcome::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Records reclaimed by teardown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownStats {
    pub tickets: usize,
    pub timeouts: usize,
    pub discarded_results: usize,
}

/// An open connection; single-threaded, one call at a time
#[derive(Debug)]
pub struct Connection<T: Transport> {
    transport: T,
    ctx: Context,
    params: ConnectParams,
    open: bool,
}

impl<T: Transport> Connection<T> {
    /// Connect and wait for the engine to confirm.
    ///
    /// On failure the transport is shut down and nothing stays allocated.
    pub fn open(mut transport: T, params: ConnectParams, options: ConnectionOptions) -> Result<Self> {
        if !(MIN_ADMISSION_LIMIT..=MAX_ADMISSION_LIMIT).contains(&options.async_limit) {
            transport.shutdown();
            return Err(Error::InvalidArgument(format!(
                "async limit {} outside {}..={}",
                options.async_limit, MIN_ADMISSION_LIMIT, MAX_ADMISSION_LIMIT
            )));
        }
        let ctx = match Context::new(&options) {
            Ok(ctx) => ctx,
            Err(e) => {
                transport.shutdown();
                return Err(e);
            }
        };
        metrics::init_metrics();

        // from here on Drop performs the teardown
        let mut conn = Self {
            transport,
            ctx,
            params,
            open: true,
        };
        conn.connect()?;
        info!(
            host = conn.params.host(),
            bucket = conn.params.bucket(),
            async_limit = options.async_limit,
            timer_policy = ?options.timer_policy,
            "Connection opened"
        );
        Ok(conn)
    }

    fn connect(&mut self) -> Result<()> {
        self.ctx.begin_call();
        self.transport
            .connect(&self.params)
            .map_err(|status| status.into_connection_error(None))?;

        while !self.ctx.connected {
            if let Some(e) = self.ctx.call.internal_error.take() {
                return Err(e);
            }
            if self.transport.run_iteration(&mut self.ctx) == LoopStatus::Idle
                && !self.ctx.connected
                && self.ctx.call.internal_error.is_none()
            {
                return Err(Error::ConnectionFailure(
                    "event loop idle before connection was established".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Shut the transport down and reclaim every pooled record
    pub fn close(mut self) -> TeardownStats {
        self.teardown()
    }

    fn teardown(&mut self) -> TeardownStats {
        self.open = false;
        self.transport.shutdown();
        let (tickets, timeouts) = self.ctx.book.clear();
        let discarded_results = self.ctx.ring.take_all().len();
        metrics::ASYNC_PENDING.sub(self.ctx.async_count as i64);
        self.ctx.async_count = 0;
        self.ctx.publish_pool_gauges();
        info!(tickets, timeouts, discarded_results, "Connection closed");
        TeardownStats {
            tickets,
            timeouts,
            discarded_results,
        }
    }

    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    pub fn pool_stats(&self) -> BookStats {
        self.ctx.book.stats()
    }

    pub fn timer_policy(&self) -> TimerPolicy {
        self.ctx.timer_policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Direct access to the engine, e.g. for fault injection
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Run the loop until the current call resolves
    fn pump(&mut self) -> Result<()> {
        while !self.ctx.call.is_resolved() {
            if self.transport.run_iteration(&mut self.ctx) == LoopStatus::Idle
                && !self.ctx.call.is_resolved()
            {
                debug!(highest = self.ctx.book.highest().0, "Loop idle with call unresolved");
                return Err(Error::Failure(
                    "event loop idle with operation unresolved".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        if self.open {
            self.teardown();
        }
    }
}

/// Zero means "no deadline"
fn deadline(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|d| !d.is_zero())
}
