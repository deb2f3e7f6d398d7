//! Per-user delivery actor.
//!
//! # Purpose
//! A `Cell` serializes fan-out for one user: a bounded mailbox decouples
//! producers from slow consumers, and a single loop task multiplexes every
//! mailbox event to all of the user's attached sessions. Slow sessions cost
//! at most the per-send budget, never the loop or the hub.
//!
//! # Lifecycle
//! Spawned on the user's first registration, reclaimed by the hub evictor
//! once idle, or stopped during shutdown. Stopping cascades a close to
//! every attached connector.
use crate::connector::Connector;
use crate::event::{unix_millis, Event};
use herald_common::ids::{ConnId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// After one blocking receive, drain up to this many more events before
// returning to the select. Smooths bursts without starving the scheduler.
const DRAIN_BURST: usize = 63;

#[derive(Debug)]
pub struct Cell {
    user_id: UserId,
    mailbox: mpsc::Sender<Arc<Event>>,
    sessions: RwLock<HashMap<ConnId, Arc<Connector>>>,
    done: CancellationToken,
    last_activity_ms: AtomicI64,
}

impl Cell {
    /// Create the actor and start its delivery loop.
    ///
    /// `send_timeout` is the per-session budget the loop grants each
    /// connector before moving on.
    pub fn spawn(user_id: UserId, mailbox_size: usize, send_timeout: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(mailbox_size.max(1));
        let cell = Arc::new(Self {
            user_id,
            mailbox: tx,
            sessions: RwLock::new(HashMap::new()),
            done: CancellationToken::new(),
            last_activity_ms: AtomicI64::new(unix_millis()),
        });
        tokio::spawn(run_delivery_loop(
            Arc::clone(&cell),
            rx,
            send_timeout,
        ));
        cell
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Non-blocking enqueue into the mailbox; `false` means the mailbox is
    /// full (or the actor already stopped) and the event was shed.
    pub fn push(&self, ev: Arc<Event>) -> bool {
        self.touch();
        self.mailbox.try_send(ev).is_ok()
    }

    pub fn attach(&self, conn: Arc<Connector>) {
        self.write_sessions().insert(conn.id(), conn);
        self.touch();
    }

    /// Remove and close one session. Returns `true` iff the session set
    /// became empty. The cell itself stays alive for cheap reconnects;
    /// reclaiming it is the evictor's job.
    pub fn detach(&self, conn_id: ConnId) -> bool {
        let (removed, empty) = {
            let mut sessions = self.write_sessions();
            let removed = sessions.remove(&conn_id);
            (removed, sessions.is_empty())
        };
        self.touch();
        if let Some(conn) = removed {
            conn.close();
        }
        empty
    }

    pub fn session_count(&self) -> usize {
        self.read_sessions().len()
    }

    /// Eligible for reclamation: no sessions and quiet past `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        if !self.read_sessions().is_empty() {
            return false;
        }
        let idle_ms = unix_millis() - self.last_activity_ms.load(Ordering::Relaxed);
        idle_ms > timeout.as_millis() as i64
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    /// Signal the loop to exit and close every attached session.
    /// Idempotent.
    pub fn stop(&self) {
        self.done.cancel();
        let drained: Vec<Arc<Connector>> = {
            let mut sessions = self.write_sessions();
            sessions.drain().map(|(_, conn)| conn).collect()
        };
        for conn in drained {
            conn.close();
        }
    }

    async fn deliver(&self, ev: Arc<Event>, timeout: Duration) {
        // Snapshot under the read lock and release it before any await, so
        // a stalled session never blocks attach/detach.
        let sessions: Vec<Arc<Connector>> = {
            let guard = self.read_sessions();
            if guard.is_empty() {
                return;
            }
            guard.values().cloned().collect()
        };
        for conn in sessions {
            conn.send(Arc::clone(&ev), timeout).await;
        }
    }

    fn touch(&self) {
        self.last_activity_ms.store(unix_millis(), Ordering::Relaxed);
    }

    fn read_sessions(&self) -> RwLockReadGuard<'_, HashMap<ConnId, Arc<Connector>>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_sessions(&self) -> RwLockWriteGuard<'_, HashMap<ConnId, Arc<Connector>>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_delivery_loop(
    cell: Arc<Cell>,
    mut mailbox: mpsc::Receiver<Arc<Event>>,
    send_timeout: Duration,
) {
    loop {
        tokio::select! {
            _ = cell.done.cancelled() => return,
            received = mailbox.recv() => {
                let Some(ev) = received else { return };
                cell.deliver(ev, send_timeout).await;
                // Burst drain: amortize wakeup cost while bounding the time
                // spent away from the cancellation check.
                for _ in 0..DRAIN_BURST {
                    match mailbox.try_recv() {
                        Ok(next) => cell.deliver(next, send_timeout).await,
                        Err(_) => break,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, EventPayload, EventPriority};
    use herald_common::model::DisconnectedPayload;

    fn event(user_id: UserId, priority: EventPriority) -> Arc<Event> {
        Arc::new(Event::system(
            user_id,
            EventKind::Disconnected,
            priority,
            EventPayload::Disconnected(DisconnectedPayload {
                reason: "test".into(),
                code: None,
            }),
        ))
    }

    #[tokio::test]
    async fn detach_reports_emptiness_and_closes() {
        let user = UserId::new();
        let cell = Cell::spawn(user, 8, Duration::from_millis(250));
        let session = CancellationToken::new();
        let first = Connector::new(&session, user, 4);
        let second = Connector::new(&session, user, 4);
        cell.attach(Arc::clone(&first));
        cell.attach(Arc::clone(&second));
        assert_eq!(cell.session_count(), 2);

        assert!(!cell.detach(first.id()));
        assert!(first.is_closed());
        assert!(!second.is_closed());

        assert!(cell.detach(second.id()));
        assert!(second.is_closed());
        cell.stop();
    }

    #[tokio::test]
    async fn idle_requires_no_sessions_and_quiet_period() {
        let user = UserId::new();
        let cell = Cell::spawn(user, 8, Duration::from_millis(250));
        let session = CancellationToken::new();
        let conn = Connector::new(&session, user, 4);
        cell.attach(Arc::clone(&conn));

        tokio::time::sleep(Duration::from_millis(30)).await;
        // Attached sessions keep the cell warm regardless of quiet time.
        assert!(!cell.is_idle(Duration::from_millis(5)));

        cell.detach(conn.id());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cell.is_idle(Duration::from_millis(5)));
        assert!(!cell.is_idle(Duration::from_secs(60)));
        cell.stop();
    }

    #[tokio::test]
    async fn push_sheds_when_mailbox_is_full() {
        let user = UserId::new();
        // Long per-send budget so the loop parks on the saturated session.
        let cell = Cell::spawn(user, 2, Duration::from_secs(2));
        let session = CancellationToken::new();
        let conn = Connector::new(&session, user, 1);
        // Saturate the session queue so deliveries block.
        assert!(conn.send(event(user, EventPriority::High), Duration::from_millis(10)).await);
        cell.attach(Arc::clone(&conn));

        // The loop takes this one and parks inside the session send.
        assert!(cell.push(event(user, EventPriority::High)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cell.push(event(user, EventPriority::High)));
        assert!(cell.push(event(user, EventPriority::High)));
        // Mailbox capacity exhausted while nothing is consumed.
        assert!(!cell.push(event(user, EventPriority::High)));
        cell.stop();
    }

    #[tokio::test]
    async fn push_fails_once_the_loop_exited() {
        let user = UserId::new();
        let cell = Cell::spawn(user, 4, Duration::from_millis(250));
        cell.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cell.push(event(user, EventPriority::Normal)));
    }
}
