//! Lock-sharded registry of user cells plus the idle evictor.
//!
//! # Purpose
//! Owns every active [`Cell`] behind a fixed number of independently locked
//! shards so the broadcast hot path only ever contends with neighbors that
//! hash to the same shard. A background evictor reclaims cells that have
//! been quiet with no sessions.
//!
//! # Design notes
//! Unregister deliberately leaves the cell in place: rapid reconnects
//! (page refresh, transport switch) then reuse the existing actor instead
//! of paying for a fresh spawn.
use crate::cell::Cell;
use crate::connector::Connector;
use crate::event::Event;
use herald_common::ids::{ConnId, UserId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Number of registry shards. A power of two so a single UUID byte maps
/// onto a shard with a mask instead of a modulo.
pub const SHARD_COUNT: usize = 256;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How often the evictor sweeps the shards.
    pub eviction_interval: Duration,
    /// Quiet period after which a session-less cell becomes reclaimable.
    pub idle_timeout: Duration,
    /// Mailbox capacity per cell; also the default session buffer size.
    pub mailbox_size: usize,
    /// Per-session budget the delivery loop grants each send.
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            eviction_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(600),
            mailbox_size: 1024,
            send_timeout: Duration::from_millis(250),
        }
    }
}

// Padded to a cache line so neighboring shard locks do not false-share.
#[repr(align(64))]
#[derive(Debug, Default)]
struct Shard {
    cells: RwLock<HashMap<UserId, Arc<Cell>>>,
}

impl Shard {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<UserId, Arc<Cell>>> {
        self.cells.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<UserId, Arc<Cell>>> {
        self.cells.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry snapshot for the metrics/diagnostics surface.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub total_users: usize,
    pub total_sessions: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shards: Vec<ShardStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub shard_id: usize,
    pub cells: usize,
}

/// Sharded cell registry. One per process.
#[derive(Debug)]
pub struct Hub {
    shards: Vec<Shard>,
    config: HubConfig,
    stop: CancellationToken,
    down: AtomicBool,
}

impl Hub {
    /// Build the registry and start the evictor task.
    /// Must be called from within a tokio runtime.
    pub fn new(config: HubConfig) -> Arc<Self> {
        let shards = (0..SHARD_COUNT).map(|_| Shard::default()).collect();
        let hub = Arc::new(Self {
            shards,
            config,
            stop: CancellationToken::new(),
            down: AtomicBool::new(false),
        });
        tokio::spawn(run_evictor(Arc::clone(&hub)));
        hub
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Whether a cell for this user lives on this node. This is the
    /// horizontal-scaling boundary the inbound binder filters on.
    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.shard(user_id).read().contains_key(&user_id)
    }

    /// Dispatch an event to the target user's mailbox.
    /// Returns `false` when the user is not local or the mailbox is full.
    pub fn broadcast(&self, ev: Arc<Event>) -> bool {
        let cell = self.shard(ev.user_id()).read().get(&ev.user_id()).cloned();
        let Some(cell) = cell else {
            metrics::counter!("herald_broadcast_total", "result" => "no_cell").increment(1);
            return false;
        };
        if cell.push(ev) {
            metrics::counter!("herald_broadcast_total", "result" => "delivered").increment(1);
            true
        } else {
            metrics::counter!("herald_broadcast_total", "result" => "mailbox_full").increment(1);
            false
        }
    }

    /// Attach a session, spawning the user's cell on first contact.
    pub fn register(&self, conn: Arc<Connector>) {
        let user_id = conn.user_id();
        let cell = {
            let mut cells = self.shard(user_id).write();
            Arc::clone(cells.entry(user_id).or_insert_with(|| {
                metrics::gauge!("herald_cells_active").increment(1.0);
                Cell::spawn(user_id, self.config.mailbox_size, self.config.send_timeout)
            }))
        };
        cell.attach(conn);
    }

    /// Detach and close one session. The cell itself survives until the
    /// evictor finds it idle.
    pub fn unregister(&self, user_id: UserId, conn_id: ConnId) {
        let cell = self.shard(user_id).read().get(&user_id).cloned();
        if let Some(cell) = cell {
            cell.detach(conn_id);
        }
    }

    /// Tear down every cell and session. Single-shot: repeat calls are
    /// no-ops.
    pub fn shutdown(&self) {
        if self.down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop.cancel();
        let mut stopped = 0usize;
        for shard in &self.shards {
            let drained: Vec<Arc<Cell>> = {
                let mut cells = shard.write();
                cells.drain().map(|(_, cell)| cell).collect()
            };
            for cell in drained {
                cell.stop();
                stopped += 1;
            }
        }
        if stopped > 0 {
            metrics::gauge!("herald_cells_active").decrement(stopped as f64);
        }
        tracing::info!(cells = stopped, "hub shut down");
    }

    pub fn stats(&self) -> HubStats {
        let mut stats = HubStats {
            total_users: 0,
            total_sessions: 0,
            shards: Vec::new(),
        };
        for (shard_id, shard) in self.shards.iter().enumerate() {
            let cells = shard.read();
            if cells.is_empty() {
                continue;
            }
            stats.total_users += cells.len();
            stats.total_sessions += cells.values().map(|cell| cell.session_count()).sum::<usize>();
            stats.shards.push(ShardStats {
                shard_id,
                cells: cells.len(),
            });
        }
        stats
    }

    fn shard(&self, user_id: UserId) -> &Shard {
        // v4 UUID bytes are uniform; one byte picks the shard.
        let index = user_id.as_uuid().as_bytes()[15] as usize & (SHARD_COUNT - 1);
        &self.shards[index]
    }

    fn sweep(&self) {
        let mut reaped = 0usize;
        // One shard at a time keeps the hot path responsive mid-sweep.
        for shard in &self.shards {
            let idle: Vec<Arc<Cell>> = {
                let mut cells = shard.write();
                let expired: Vec<UserId> = cells
                    .iter()
                    .filter(|(_, cell)| cell.is_idle(self.config.idle_timeout))
                    .map(|(user_id, _)| *user_id)
                    .collect();
                expired
                    .into_iter()
                    .filter_map(|user_id| cells.remove(&user_id))
                    .collect()
            };
            for cell in idle {
                cell.stop();
                reaped += 1;
            }
        }
        if reaped > 0 {
            metrics::counter!("herald_cells_evicted_total").increment(reaped as u64);
            metrics::gauge!("herald_cells_active").decrement(reaped as f64);
            tracing::debug!(reaped, "reclaimed idle user cells");
        }
    }
}

async fn run_evictor(hub: Arc<Hub>) {
    let period = hub.config.eviction_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = hub.stop.cancelled() => return,
            _ = ticker.tick() => hub.sweep(),
        }
    }
}
