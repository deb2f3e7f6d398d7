//! One transport session's outbound queue with prioritized backpressure.
//!
//! # Purpose
//! A `Connector` decouples a user cell from one gRPC stream, WebSocket or
//! long-poll request. It owns a bounded FIFO of events and sheds load when
//! the consumer is slow: low-priority traffic is dropped outright, higher
//! priority traffic may displace the oldest queued event.
//!
//! # Lifecycle
//! Created on transport attach, closed exactly once on detach, cell stop or
//! hub shutdown. The cancellation token is a child of the transport
//! session's token, so a dying session short-circuits pending sends.
use crate::event::{Event, EventPriority};
use herald_common::ids::{ConnId, UserId};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Connector {
    id: ConnId,
    user_id: UserId,
    capacity: usize,
    queue: Mutex<VecDeque<Arc<Event>>>,
    // Wakes receivers when an event lands.
    readable: Notify,
    // Wakes blocked senders when a slot frees up.
    writable: Notify,
    cancel: CancellationToken,
    closed: AtomicBool,
    last_activity_ns: AtomicI64,
    dropped: AtomicU64,
}

impl Connector {
    /// Build a session connector whose lifetime is tied to `session`.
    pub fn new(session: &CancellationToken, user_id: UserId, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            id: ConnId::new(),
            user_id,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Notify::new(),
            writable: Notify::new(),
            cancel: session.child_token(),
            closed: AtomicBool::new(false),
            last_activity_ns: AtomicI64::new(unix_nanos()),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Events shed by this session so far. Monotonically non-decreasing.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn last_activity_ns(&self) -> i64 {
        self.last_activity_ns.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue an event for this session.
    ///
    /// Fast path is non-blocking; a full queue triggers the shedding policy
    /// below. Never blocks past `timeout`, and returns `false` after close
    /// or session cancellation.
    pub async fn send(&self, ev: Arc<Event>, timeout: Duration) -> bool {
        if self.is_closed() || self.cancel.is_cancelled() {
            return false;
        }
        if self.try_enqueue(&ev) {
            return true;
        }
        self.shed_or_wait(ev, timeout).await
    }

    /// Next event for the transport to write.
    ///
    /// After close the remaining queue is drained first; `None` is the
    /// signal to end the session.
    pub async fn recv(&self) -> Option<Arc<Event>> {
        loop {
            if let Some(ev) = self.lock_queue().pop_front() {
                self.writable.notify_one();
                return Some(ev);
            }
            if self.is_closed() || self.cancel.is_cancelled() {
                return None;
            }
            tokio::select! {
                _ = self.readable.notified() => {}
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Terminate the session. Idempotent: repeat calls have no effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        // Wake every parked sender and receiver so they observe the closure.
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        tracing::trace!(conn_id = %self.id, user_id = %self.user_id, "connector closed");
    }

    fn try_enqueue(&self, ev: &Arc<Event>) -> bool {
        {
            let mut queue = self.lock_queue();
            if queue.len() >= self.capacity {
                return false;
            }
            queue.push_back(Arc::clone(ev));
        }
        self.touch();
        self.readable.notify_one();
        true
    }

    async fn shed_or_wait(&self, ev: Arc<Event>, timeout: Duration) -> bool {
        // Low-priority traffic never displaces anything; shed immediately.
        if ev.priority() <= EventPriority::Low {
            self.count_drop();
            return false;
        }

        // Displace the oldest queued event when it is strictly lower
        // priority than the incoming one.
        {
            let mut queue = self.lock_queue();
            if let Some(oldest) = queue.pop_front() {
                if oldest.priority() < ev.priority() {
                    queue.push_back(ev);
                    drop(queue);
                    // The displaced event is the one counted as lost.
                    self.count_drop();
                    self.touch();
                    self.readable.notify_one();
                    return true;
                }
                // Same or higher priority: put it back at the head.
                queue.push_front(oldest);
            }
        }

        // Wait for the consumer to free a slot, bounded by `timeout`.
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = self.cancel.cancelled() => break,
                _ = self.writable.notified() => {
                    if self.is_closed() {
                        break;
                    }
                    if self.try_enqueue(&ev) {
                        return true;
                    }
                }
            }
        }
        self.count_drop();
        false
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Arc<Event>>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn touch(&self) {
        self.last_activity_ns.store(unix_nanos(), Ordering::Relaxed);
    }

    fn count_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("herald_connector_dropped_total").increment(1);
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or_default()
}
