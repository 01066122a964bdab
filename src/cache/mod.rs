// Receipt snapshots for the checkout return page. Display only: never consulted
// for order state or authorization.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ReceiptSnapshot {
    pub order_number: String,
    pub shipping_summary: String,
    pub payment_summary: String,
    pub total: Decimal,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ReceiptSnapshot,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: ReceiptSnapshot, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Receipts keyed by order number, each living for a fixed TTL.
#[derive(Debug, Clone)]
pub struct ReceiptCache {
    store: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ReceiptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, snapshot: ReceiptSnapshot) {
        self.store.insert(
            snapshot.order_number.clone(),
            CacheEntry::new(snapshot, self.ttl),
        );
    }

    /// Expired entries are dropped on read.
    pub fn get(&self, order_number: &str) -> Option<ReceiptSnapshot> {
        let expired = match self.store.get(order_number) {
            Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.store
                .remove_if(order_number, |_, entry| entry.is_expired());
        }
        None
    }

    pub fn remove(&self, order_number: &str) {
        self.store.remove(order_number);
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.store.len();
        self.store.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.store.len())
    }

    /// Sweeps expired receipts every `every` until the returned handle is
    /// aborted or the runtime shuts down.
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = cache.len(), "expired receipts purged");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl Default for ReceiptCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(24 * 60 * 60))
    }
}
