//! Transport boundary
//!
//! The key-value engine is an external collaborator with a purely
//! asynchronous, callback-driven interface. This module fixes the contract
//! the correlation layer relies on:
//!
//! 1. **Submit**: hand the engine a request plus an opaque [`Token`]
//! 2. **Run**: one loop iteration processes ready I/O and due timers,
//!    delivering [`LoopEvent`]s to an [`EventHandler`]
//! 3. **Stop**: a handler returning `ControlFlow::Break` makes the current
//!    iteration return promptly
//!
//! Every accepted submission yields exactly one `Completed` event. Timers
//! yield exactly one `TimerFired` event unless cancelled first.
//!
//! # Architecture
//!
//! ```text
//! Connection ──submit(token, req)──→ Transport ──I/O──→ store
//!     ↑                                   │
//!     └──── handle(loop, LoopEvent) ←─────┘  (inside run_iteration)
//! ```

pub mod memory;

use crate::pool::SlotId;
use crate::status::StatusCode;
use bytes::Bytes;
use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;

/// Version stamp returned with values and accepted by conditional writes
pub type Cas = u64;

/// Opaque correlation token passed through the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<SlotId> for Token {
    fn from(slot: SlotId) -> Self {
        Token(slot.to_raw())
    }
}

impl From<Token> for SlotId {
    fn from(token: Token) -> Self {
        SlotId::from_raw(token.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:#x})", self.0)
    }
}

/// Handle of a one-shot timer registered with the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// How a store request treats an existing value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    /// Upsert
    #[default]
    Set,
    /// Exclusive create; fails with `KEY_EEXISTS` if the key is present
    Add,
    /// Update only; fails with `KEY_ENOENT` if the key is absent
    Replace,
}

/// A single key-value request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get {
        key: Bytes,
        /// Reset the expiry while reading (get-and-touch)
        touch: Option<Duration>,
    },
    Store {
        key: Bytes,
        value: Bytes,
        ttl: Option<Duration>,
        cas: Option<Cas>,
        mode: StoreMode,
    },
    Remove {
        key: Bytes,
        cas: Option<Cas>,
    },
}

impl Request {
    pub fn key(&self) -> &Bytes {
        match self {
            Request::Get { key, .. } | Request::Store { key, .. } | Request::Remove { key, .. } => {
                key
            }
        }
    }
}

/// Engine-side result of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// `value` is present for reads only
    Success { value: Option<Bytes>, cas: Cas },
    NotFound,
    Failed(StatusCode),
}

/// Event delivered by one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    /// The connection handshake started by `connect` finished
    Connected,
    Completed { token: Token, completion: Completion },
    TimerFired { token: Token },
    /// Connection-level failure, not tied to any token
    ConnectionError {
        status: StatusCode,
        message: Option<String>,
    },
}

/// Whether an iteration found anything to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Progress,
    /// No pending I/O and no armed timers: nothing will ever be delivered
    Idle,
}

/// Loop operations available from inside a callback
pub trait LoopHandle {
    /// Unregister a pending timer. Returns true if it will no longer fire.
    fn cancel_timer(&mut self, handle: TimerHandle) -> bool;
}

/// Receiver of loop events; the explicit context of every callback
pub trait EventHandler {
    fn handle(&mut self, lp: &mut dyn LoopHandle, event: LoopEvent) -> ControlFlow<()>;
}

/// Asynchronous key-value engine with its own event loop
pub trait Transport: LoopHandle {
    /// Start connecting; completion is reported through the loop
    fn connect(&mut self, params: &ConnectParams) -> Result<(), StatusCode>;

    /// Submit a request. On `Err` no completion will ever be delivered.
    fn submit(&mut self, token: Token, request: Request) -> Result<(), StatusCode>;

    /// Register a one-shot timer
    fn arm_timer(&mut self, after: Duration, token: Token) -> TimerHandle;

    /// Process ready I/O and due timers
    fn run_iteration(&mut self, handler: &mut dyn EventHandler) -> LoopStatus;

    /// Drop every pending request and timer without invoking callbacks
    fn shutdown(&mut self);
}

/// Connection parameters; empty strings mean "engine default"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub bucket: Option<String>,
}

impl ConnectParams {
    pub fn new(host: &str, user: &str, password: &str, bucket: &str) -> Self {
        fn non_empty(s: &str) -> Option<String> {
            (!s.is_empty()).then(|| s.to_string())
        }
        Self {
            host: non_empty(host),
            user: non_empty(user),
            password: non_empty(password),
            bucket: non_empty(bucket),
        }
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn bucket(&self) -> &str {
        self.bucket.as_deref().unwrap_or("default")
    }
}
