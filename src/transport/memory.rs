//! In-memory engine for testing and local use
//!
//! `MemoryTransport` behaves like a callback-driven key-value client: every
//! request is answered through the event loop after a (virtual) latency,
//! timers live on the same loop, and faults can be injected. Time is a
//! virtual clock that jumps to the next due event on each iteration, so
//! tests are deterministic and never sleep.

use super::{
    Cas, Completion, ConnectParams, EventHandler, LoopEvent, LoopHandle, LoopStatus, Request,
    StoreMode, TimerHandle, Token, Transport,
};
use crate::status::StatusCode;
use bytes::Bytes;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    cas: Cas,
    expires_at: Option<Duration>,
}

impl Entry {
    fn is_live(&self, now: Duration) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<Bytes, Entry>,
    last_cas: Cas,
}

/// Shared in-memory key space
///
/// Cloning shares the data, so several transports can act as independent
/// connections to the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys stored (expired keys included until touched)
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Execute a request against the store at virtual time `now`
    pub fn apply(&self, request: &Request, now: Duration) -> Completion {
        let mut state = self.state.lock();
        let expired = state
            .entries
            .get(request.key())
            .is_some_and(|e| !e.is_live(now));
        if expired {
            state.entries.remove(request.key());
        }

        match request {
            Request::Get { key, touch } => match state.entries.get_mut(key) {
                Some(entry) => {
                    if let Some(ttl) = touch {
                        entry.expires_at = expiry(now, *ttl);
                    }
                    Completion::Success {
                        value: Some(entry.value.clone()),
                        cas: entry.cas,
                    }
                }
                None => Completion::NotFound,
            },
            Request::Store {
                key,
                value,
                ttl,
                cas,
                mode,
            } => {
                let existing = state.entries.get(key).map(|e| e.cas);
                match (existing, cas, mode) {
                    (None, Some(_), _) | (None, None, StoreMode::Replace) => {
                        return Completion::NotFound
                    }
                    (Some(current), Some(expected), _) if current != *expected => {
                        return Completion::Failed(StatusCode::KeyEExists)
                    }
                    (Some(_), None, StoreMode::Add) => {
                        return Completion::Failed(StatusCode::KeyEExists)
                    }
                    _ => {}
                }
                state.last_cas += 1;
                let new_cas = state.last_cas;
                state.entries.insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        cas: new_cas,
                        expires_at: ttl.and_then(|t| expiry(now, t)),
                    },
                );
                Completion::Success {
                    value: None,
                    cas: new_cas,
                }
            }
            Request::Remove { key, cas } => {
                let Some(current) = state.entries.get(key).map(|e| e.cas) else {
                    return Completion::NotFound;
                };
                if cas.is_some_and(|expected| expected != current) {
                    return Completion::Failed(StatusCode::KeyEExists);
                }
                state.entries.remove(key);
                Completion::Success {
                    value: None,
                    cas: current,
                }
            }
        }
    }
}

/// Zero means "never expires"
fn expiry(now: Duration, ttl: Duration) -> Option<Duration> {
    (!ttl.is_zero()).then(|| now + ttl)
}

/// Counters describing what the engine did, shared with its creator
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    counters: Arc<Mutex<ProbeCounters>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeCounters {
    pub submitted: u64,
    pub completions_delivered: u64,
    pub timers_fired: u64,
    pub connection_errors: u64,
    /// Requests and timers dropped by `shutdown`
    pub discarded_on_shutdown: u64,
    pub shutdowns: u64,
}

impl EngineProbe {
    pub fn snapshot(&self) -> ProbeCounters {
        *self.counters.lock()
    }

    fn update(&self, f: impl FnOnce(&mut ProbeCounters)) {
        f(&mut self.counters.lock());
    }
}

#[derive(Debug)]
enum Pending {
    Event(LoopEvent),
    Timer { handle: TimerHandle, token: Token },
}

#[derive(Debug)]
struct Scheduled {
    due: Duration,
    seq: u64,
    pending: Pending,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Simulated asynchronous engine with a virtual-time event loop
#[derive(Debug)]
pub struct MemoryTransport {
    store: MemoryStore,
    now: Duration,
    seq: u64,
    queue: BinaryHeap<Reverse<Scheduled>>,
    /// Timers registered and not yet fired or cancelled
    armed: HashSet<TimerHandle>,
    next_timer: u64,
    latency: Duration,
    key_latency: HashMap<Bytes, Duration>,
    lost_keys: HashSet<Bytes>,
    injected: VecDeque<StatusCode>,
    refusal: Option<(StatusCode, String)>,
    connect_latency: Duration,
    connected: bool,
    shut_down: bool,
    probe: EngineProbe,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Engine over a fresh store, answering after 1ms
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            now: Duration::ZERO,
            seq: 0,
            queue: BinaryHeap::new(),
            armed: HashSet::new(),
            next_timer: 0,
            latency: Duration::from_millis(1),
            key_latency: HashMap::new(),
            lost_keys: HashSet::new(),
            injected: VecDeque::new(),
            refusal: None,
            connect_latency: Duration::ZERO,
            connected: false,
            shut_down: false,
            probe: EngineProbe::default(),
        }
    }

    pub fn with_store(mut self, store: MemoryStore) -> Self {
        self.store = store;
        self
    }

    /// Default reply latency
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Reply latency for one key, overriding the default
    pub fn set_key_latency(&mut self, key: impl Into<Bytes>, latency: Duration) {
        self.key_latency.insert(key.into(), latency);
    }

    /// Accept requests for `key` but never answer them
    pub fn lose_replies_for(&mut self, key: impl Into<Bytes>) {
        self.lost_keys.insert(key.into());
    }

    /// Answer the next submitted request with `status` instead of running it
    pub fn fail_next(&mut self, status: StatusCode) {
        self.injected.push_back(status);
    }

    /// Deliver a connection-level error `after` from now
    pub fn inject_connection_error(&mut self, after: Duration, status: StatusCode, message: &str) {
        let due = self.now + after;
        self.schedule(
            due,
            Pending::Event(LoopEvent::ConnectionError {
                status,
                message: Some(message.to_string()),
            }),
        );
    }

    /// Make every connect attempt fail through the loop
    pub fn refuse_connections(&mut self, status: StatusCode, message: &str) {
        self.refusal = Some((status, message.to_string()));
    }

    /// Move the virtual clock forward without running the loop
    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }

    pub fn armed_timers(&self) -> usize {
        self.armed.len()
    }

    /// Completions scheduled but not yet delivered
    pub fn pending_replies(&self) -> usize {
        self.queue
            .iter()
            .filter(|Reverse(s)| matches!(s.pending, Pending::Event(LoopEvent::Completed { .. })))
            .count()
    }

    fn schedule(&mut self, due: Duration, pending: Pending) {
        self.seq += 1;
        self.queue.push(Reverse(Scheduled {
            due,
            seq: self.seq,
            pending,
        }));
    }

    /// Drop cancelled timers from the head of the queue
    fn skip_cancelled(&mut self) {
        while let Some(Reverse(top)) = self.queue.peek() {
            match top.pending {
                Pending::Timer { handle, .. } if !self.armed.contains(&handle) => {
                    self.queue.pop();
                }
                _ => break,
            }
        }
    }
}

impl LoopHandle for MemoryTransport {
    fn cancel_timer(&mut self, handle: TimerHandle) -> bool {
        self.armed.remove(&handle)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), StatusCode> {
        if self.shut_down {
            return Err(StatusCode::NetworkError);
        }
        debug!(host = params.host(), bucket = params.bucket(), "Connecting to memory engine");
        let due = self.now + self.connect_latency;
        let event = match &self.refusal {
            Some((status, message)) => LoopEvent::ConnectionError {
                status: *status,
                message: Some(message.clone()),
            },
            None => LoopEvent::Connected,
        };
        self.schedule(due, Pending::Event(event));
        Ok(())
    }

    fn submit(&mut self, token: Token, request: Request) -> Result<(), StatusCode> {
        if self.shut_down || !self.connected {
            return Err(StatusCode::NetworkError);
        }
        self.probe.update(|c| c.submitted += 1);

        let key = request.key().clone();
        if self.lost_keys.contains(&key) {
            trace!(%token, "Reply will be lost");
            return Ok(());
        }
        let completion = match self.injected.pop_front() {
            Some(status) => Completion::Failed(status),
            None => self.store.apply(&request, self.now),
        };
        let due = self.now + self.key_latency.get(&key).copied().unwrap_or(self.latency);
        self.schedule(due, Pending::Event(LoopEvent::Completed { token, completion }));
        Ok(())
    }

    fn arm_timer(&mut self, after: Duration, token: Token) -> TimerHandle {
        self.next_timer += 1;
        let handle = TimerHandle(self.next_timer);
        self.armed.insert(handle);
        let due = self.now + after;
        self.schedule(due, Pending::Timer { handle, token });
        handle
    }

    fn run_iteration(&mut self, handler: &mut dyn EventHandler) -> LoopStatus {
        if self.shut_down {
            return LoopStatus::Idle;
        }
        self.skip_cancelled();
        let Some(Reverse(next)) = self.queue.peek() else {
            return LoopStatus::Idle;
        };
        self.now = self.now.max(next.due);

        while let Some(Reverse(top)) = self.queue.peek() {
            if top.due > self.now {
                break;
            }
            let Some(Reverse(scheduled)) = self.queue.pop() else {
                break;
            };
            let event = match scheduled.pending {
                Pending::Timer { handle, token } => {
                    if !self.armed.remove(&handle) {
                        continue;
                    }
                    self.probe.update(|c| c.timers_fired += 1);
                    LoopEvent::TimerFired { token }
                }
                Pending::Event(event) => {
                    match &event {
                        LoopEvent::Connected => self.connected = true,
                        LoopEvent::Completed { .. } => {
                            self.probe.update(|c| c.completions_delivered += 1)
                        }
                        LoopEvent::ConnectionError { .. } => {
                            self.probe.update(|c| c.connection_errors += 1)
                        }
                        LoopEvent::TimerFired { .. } => {}
                    }
                    event
                }
            };
            if handler.handle(self, event).is_break() {
                break;
            }
        }
        LoopStatus::Progress
    }

    fn shutdown(&mut self) {
        let discarded = self
            .queue
            .iter()
            .filter(|Reverse(s)| match s.pending {
                Pending::Timer { handle, .. } => self.armed.contains(&handle),
                Pending::Event(_) => true,
            })
            .count() as u64;
        self.queue.clear();
        self.armed.clear();
        self.connected = false;
        self.shut_down = true;
        self.probe.update(|c| {
            c.discarded_on_shutdown += discarded;
            c.shutdowns += 1;
        });
        debug!(discarded, "Memory engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::ControlFlow;

    #[derive(Default)]
    struct Recorder {
        events: Vec<LoopEvent>,
        stop_on_first: bool,
    }

    impl EventHandler for Recorder {
        fn handle(&mut self, _lp: &mut dyn LoopHandle, event: LoopEvent) -> ControlFlow<()> {
            self.events.push(event);
            if self.stop_on_first {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    fn connected() -> MemoryTransport {
        let mut t = MemoryTransport::new();
        t.connect(&ConnectParams::default()).unwrap();
        let mut r = Recorder::default();
        t.run_iteration(&mut r);
        assert_eq!(r.events, vec![LoopEvent::Connected]);
        t
    }

    fn get(key: &'static str) -> Request {
        Request::Get {
            key: Bytes::from_static(key.as_bytes()),
            touch: None,
        }
    }

    fn set(key: &'static str, value: &'static str, mode: StoreMode, cas: Option<Cas>) -> Request {
        Request::Store {
            key: Bytes::from_static(key.as_bytes()),
            value: Bytes::from_static(value.as_bytes()),
            ttl: None,
            cas,
            mode,
        }
    }

    #[test]
    fn test_store_basic_ops() {
        let store = MemoryStore::new();
        let now = Duration::ZERO;

        assert_eq!(store.apply(&get("k"), now), Completion::NotFound);

        let Completion::Success { cas, .. } = store.apply(&set("k", "v", StoreMode::Set, None), now)
        else {
            panic!("set failed");
        };
        assert_eq!(
            store.apply(&get("k"), now),
            Completion::Success {
                value: Some(Bytes::from_static(b"v")),
                cas
            }
        );

        let remove = Request::Remove {
            key: Bytes::from_static(b"k"),
            cas: None,
        };
        assert!(matches!(store.apply(&remove, now), Completion::Success { .. }));
        assert_eq!(store.apply(&remove, now), Completion::NotFound);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_conditional_writes() {
        let store = MemoryStore::new();
        let now = Duration::ZERO;

        assert_eq!(
            store.apply(&set("k", "v", StoreMode::Replace, None), now),
            Completion::NotFound
        );
        let Completion::Success { cas, .. } = store.apply(&set("k", "v", StoreMode::Add, None), now)
        else {
            panic!("add failed");
        };
        assert_eq!(
            store.apply(&set("k", "w", StoreMode::Add, None), now),
            Completion::Failed(StatusCode::KeyEExists)
        );
        assert_eq!(
            store.apply(&set("k", "w", StoreMode::Set, Some(cas + 100)), now),
            Completion::Failed(StatusCode::KeyEExists)
        );
        let Completion::Success { cas: newer, .. } =
            store.apply(&set("k", "w", StoreMode::Set, Some(cas)), now)
        else {
            panic!("cas write failed");
        };
        assert_ne!(newer, cas);
    }

    #[test]
    fn test_store_expiry_and_touch() {
        let store = MemoryStore::new();
        let write = Request::Store {
            key: Bytes::from_static(b"t"),
            value: Bytes::from_static(b"x"),
            ttl: Some(Duration::from_secs(10)),
            cas: None,
            mode: StoreMode::Set,
        };
        store.apply(&write, Duration::ZERO);

        let touch = Request::Get {
            key: Bytes::from_static(b"t"),
            touch: Some(Duration::from_secs(30)),
        };
        assert!(matches!(
            store.apply(&touch, Duration::from_secs(5)),
            Completion::Success { .. }
        ));
        // first deadline passed, touched one has not
        assert!(matches!(
            store.apply(&get("t"), Duration::from_secs(20)),
            Completion::Success { .. }
        ));
        assert_eq!(
            store.apply(&get("t"), Duration::from_secs(40)),
            Completion::NotFound
        );
    }

    #[test]
    fn test_delivery_follows_latency_not_submission_order() {
        let mut t = connected();
        t.set_key_latency("slow", Duration::from_millis(50));
        t.submit(Token(1), get("slow")).unwrap();
        t.submit(Token(2), get("fast")).unwrap();

        let mut r = Recorder::default();
        while t.run_iteration(&mut r) == LoopStatus::Progress {}
        let tokens: Vec<u64> = r
            .events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::Completed { token, .. } => Some(token.raw()),
                _ => None,
            })
            .collect();
        assert_eq!(tokens, vec![2, 1]);
        assert_eq!(t.now(), Duration::from_millis(50));
    }

    #[test]
    fn test_break_stops_iteration_early() {
        let mut t = connected();
        t.submit(Token(1), get("a")).unwrap();
        t.submit(Token(2), get("b")).unwrap();

        let mut r = Recorder {
            stop_on_first: true,
            ..Default::default()
        };
        t.run_iteration(&mut r);
        assert_eq!(r.events.len(), 1);
        assert_eq!(t.pending_replies(), 1);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut t = connected();
        let keep = t.arm_timer(Duration::from_millis(5), Token(7));
        let drop = t.arm_timer(Duration::from_millis(3), Token(8));
        assert!(t.cancel_timer(drop));
        assert!(!t.cancel_timer(drop));

        let mut r = Recorder::default();
        while t.run_iteration(&mut r) == LoopStatus::Progress {}
        assert_eq!(r.events, vec![LoopEvent::TimerFired { token: Token(7) }]);
        assert!(!t.cancel_timer(keep), "fired timers cannot be cancelled");
    }

    #[test]
    fn test_lost_reply_and_injected_failure() {
        let mut t = connected();
        t.lose_replies_for("gone");
        t.fail_next(StatusCode::ETmpFail);
        t.submit(Token(1), get("gone")).unwrap();
        t.submit(Token(2), get("x")).unwrap();

        let mut r = Recorder::default();
        while t.run_iteration(&mut r) == LoopStatus::Progress {}
        assert_eq!(
            r.events,
            vec![LoopEvent::Completed {
                token: Token(2),
                completion: Completion::Failed(StatusCode::ETmpFail)
            }]
        );
        assert_eq!(t.probe().snapshot().submitted, 2);
    }

    #[test]
    fn test_shutdown_discards_without_callbacks() {
        let mut t = connected();
        t.submit(Token(1), get("a")).unwrap();
        t.arm_timer(Duration::from_secs(1), Token(1));
        t.shutdown();

        let mut r = Recorder::default();
        assert_eq!(t.run_iteration(&mut r), LoopStatus::Idle);
        assert!(r.events.is_empty());
        assert_eq!(t.submit(Token(2), get("b")), Err(StatusCode::NetworkError));

        let probe = t.probe().snapshot();
        assert_eq!(probe.discarded_on_shutdown, 2);
        assert_eq!(probe.shutdowns, 1);
    }

    #[test]
    fn test_refused_connection_reports_through_loop() {
        let mut t = MemoryTransport::new();
        t.refuse_connections(StatusCode::UnknownHost, "no such host");
        t.connect(&ConnectParams::default()).unwrap();

        let mut r = Recorder::default();
        t.run_iteration(&mut r);
        assert_eq!(
            r.events,
            vec![LoopEvent::ConnectionError {
                status: StatusCode::UnknownHost,
                message: Some("no such host".to_string())
            }]
        );
        assert_eq!(t.submit(Token(1), get("a")), Err(StatusCode::NetworkError));
    }
}
