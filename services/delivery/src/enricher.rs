//! Participant identity enrichment with a bounded cache.
//!
//! # Purpose
//! Turns bare peer IDs into peers carrying display name and issuer
//! metadata. Lookups are cache-aside over a bounded LRU keyed by peer ID;
//! remote failures degrade gracefully to the original peer so delivery
//! never blocks on enrichment.
use crate::contacts::{ContactDirectory, ContactQuery};
use herald_common::model::{Peer, PeerKind};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct PeerEnricher {
    directory: Arc<dyn ContactDirectory>,
    cache: PeerCache,
}

impl PeerEnricher {
    pub fn new(directory: Arc<dyn ContactDirectory>, cache_capacity: usize) -> Self {
        Self {
            directory,
            cache: PeerCache::new(cache_capacity),
        }
    }

    /// Enrich both participants of a message concurrently.
    ///
    /// Network failures never fail the pair; the affected peer is returned
    /// as-is.
    pub async fn resolve_peers(&self, from: Peer, to: Peer, domain_id: i64) -> (Peer, Peer) {
        tokio::join!(
            self.resolve_peer(from, domain_id),
            self.resolve_peer(to, domain_id),
        )
    }

    pub async fn resolve_peer(&self, peer: Peer, domain_id: i64) -> Peer {
        // Absent participants carry nothing to enrich.
        if peer.id.is_nil() {
            return peer;
        }
        let key = peer.id.to_string();
        if let Some(hit) = self.cache.get(&key) {
            metrics::counter!("herald_enricher_cache_total", "result" => "hit").increment(1);
            return hit;
        }
        metrics::counter!("herald_enricher_cache_total", "result" => "miss").increment(1);

        let enriched = match peer.kind {
            Some(PeerKind::User) => self.from_directory(peer, domain_id).await,
            Some(PeerKind::Chat) => placeholder(peer, "Peer Chat"),
            Some(PeerKind::Channel) => placeholder(peer, "Peer Channel"),
            // Bots and uninitialized kinds carry no directory identity.
            Some(PeerKind::Bot) | None => peer,
        };

        // Fallback results are cached too; a peer the directory does not
        // know stays unknown until capacity pressure evicts it.
        self.cache.insert(key, enriched.clone());
        enriched
    }

    async fn from_directory(&self, mut peer: Peer, domain_id: i64) -> Peer {
        let query = ContactQuery {
            ids: vec![peer.id.to_string()],
            domain_id,
            size: 1,
        };
        let records = match self.directory.search(query).await {
            Ok(records) => records,
            Err(err) => {
                // Graceful degradation: the message keeps moving unenriched.
                metrics::counter!("herald_enricher_lookup_failures_total").increment(1);
                tracing::debug!(peer_id = %peer.id, error = %err, "contact lookup failed");
                return peer;
            }
        };
        let Some(record) = records.into_iter().next() else {
            return peer;
        };
        let name = if record.name.is_empty() {
            record.username
        } else {
            record.name
        };
        if !name.is_empty() {
            peer.name = Some(name);
        }
        if !record.subject.is_empty() {
            peer.sub = Some(record.subject);
        }
        if !record.issuer_id.is_empty() {
            peer.issuer = Some(record.issuer_id);
        }
        peer
    }
}

fn placeholder(mut peer: Peer, label: &str) -> Peer {
    if peer.name.is_none() {
        let id = peer.id.to_string();
        peer.name = Some(format!("{label} ({})", &id[..8]));
    }
    peer
}

// Bounded identity cache. Entries never expire by time; they are displaced
// only by capacity pressure, least recently used first.
struct PeerCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: HashMap<String, CacheSlot>,
    tick: u64,
}

struct CacheSlot {
    peer: Peer,
    last_used: u64,
}

impl PeerCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    fn get(&self, key: &str) -> Option<Peer> {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let slot = inner.entries.get_mut(key)?;
        slot.last_used = tick;
        Some(slot.peer.clone())
    }

    fn insert(&self, key: String, peer: Peer) {
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.capacity {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(victim, _)| victim.clone());
            if let Some(victim) = victim {
                inner.entries.remove(&victim);
            }
        }
        inner.entries.insert(
            key,
            CacheSlot {
                peer,
                last_used: tick,
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
