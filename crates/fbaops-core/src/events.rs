//! Run-scoped tallies of find-or-create outcomes.
//!
//! Each ingestion run owns its own [`RunCounters`] and threads it through the
//! reconciliation chain, so concurrent runs never mix their counts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sku,
    Asin,
    AsinSku,
    MinimumSellingPrice,
    AfnInventoryDailyUpdate,
    SellingPriceHistory,
    EanAsin,
    FbaFee,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Sku,
        EntityKind::Asin,
        EntityKind::AsinSku,
        EntityKind::MinimumSellingPrice,
        EntityKind::AfnInventoryDailyUpdate,
        EntityKind::SellingPriceHistory,
        EntityKind::EanAsin,
        EntityKind::FbaFee,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Sku => "sku",
            EntityKind::Asin => "asin",
            EntityKind::AsinSku => "asin_sku",
            EntityKind::MinimumSellingPrice => "minimum_selling_price",
            EntityKind::AfnInventoryDailyUpdate => "afn_inventory_daily_update",
            EntityKind::SellingPriceHistory => "selling_price_history",
            EntityKind::EanAsin => "ean_asin",
            EntityKind::FbaFee => "fba_fee",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Created,
    Found,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEvent {
    pub entity: EntityKind,
    pub outcome: RecordOutcome,
    pub id: i64,
}

impl RecordEvent {
    pub fn created(entity: EntityKind, id: i64) -> Self {
        Self {
            entity,
            outcome: RecordOutcome::Created,
            id,
        }
    }

    pub fn found(entity: EntityKind, id: i64) -> Self {
        Self {
            entity,
            outcome: RecordOutcome::Found,
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub created: u64,
    pub found: u64,
}

/// Point-in-time copy of a run's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts(pub BTreeMap<EntityKind, OutcomeCounts>);

impl RunCounts {
    pub fn get(&self, entity: EntityKind) -> OutcomeCounts {
        self.0.get(&entity).copied().unwrap_or_default()
    }

    pub fn total_created(&self) -> u64 {
        self.0.values().map(|c| c.created).sum()
    }

    /// `sku created=1 found=2, asin ...` for the end-of-run log line.
    pub fn summary_line(&self) -> String {
        self.0
            .iter()
            .filter(|(_, c)| c.created + c.found > 0)
            .map(|(kind, c)| format!("{} created={} found={}", kind.as_str(), c.created, c.found))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Default)]
struct EntityCounters {
    created: AtomicU64,
    found: AtomicU64,
}

#[derive(Debug)]
pub struct RunCounters {
    listening: AtomicBool,
    counters: [EntityCounters; 8],
}

impl Default for RunCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCounters {
    pub fn new() -> Self {
        Self {
            listening: AtomicBool::new(false),
            counters: Default::default(),
        }
    }

    /// Zeroes the counters and starts accepting events.
    pub fn start(&self) {
        self.zero();
        self.listening.store(true, Ordering::SeqCst);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Tallies one event; returns `false` when the counters are not listening.
    pub fn record(&self, event: RecordEvent) -> bool {
        if !self.is_listening() {
            return false;
        }
        let counters = &self.counters[event.entity.index()];
        match event.outcome {
            RecordOutcome::Created => counters.created.fetch_add(1, Ordering::Relaxed),
            RecordOutcome::Found => counters.found.fetch_add(1, Ordering::Relaxed),
        };
        debug!(
            entity = event.entity.as_str(),
            outcome = ?event.outcome,
            id = event.id,
            "record event"
        );
        true
    }

    pub fn get_counts(&self) -> RunCounts {
        RunCounts(
            EntityKind::ALL
                .iter()
                .map(|kind| {
                    let c = &self.counters[kind.index()];
                    (
                        *kind,
                        OutcomeCounts {
                            created: c.created.load(Ordering::Relaxed),
                            found: c.found.load(Ordering::Relaxed),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Stops accepting events and zeroes the counters.
    pub fn stop_and_reset(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.zero();
    }

    fn zero(&self) {
        for c in &self.counters {
            c.created.store(0, Ordering::Relaxed);
            c.found.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn events_before_start_are_ignored() {
        let counters = RunCounters::new();
        assert!(!counters.record(RecordEvent::created(EntityKind::Sku, 1)));
        assert_eq!(counters.get_counts().get(EntityKind::Sku), OutcomeCounts::default());
    }

    #[test]
    fn counts_are_tallied_per_entity_and_outcome() {
        let counters = RunCounters::new();
        counters.start();
        counters.record(RecordEvent::created(EntityKind::Sku, 1));
        counters.record(RecordEvent::found(EntityKind::Sku, 1));
        counters.record(RecordEvent::found(EntityKind::Sku, 2));
        counters.record(RecordEvent::created(EntityKind::AsinSku, 9));

        let counts = counters.get_counts();
        assert_eq!(counts.get(EntityKind::Sku), OutcomeCounts { created: 1, found: 2 });
        assert_eq!(counts.get(EntityKind::AsinSku).created, 1);
        assert_eq!(counts.total_created(), 2);
        assert_eq!(counts.summary_line(), "sku created=1 found=2, asin_sku created=1 found=0");
    }

    #[test]
    fn stop_and_reset_isolates_consecutive_runs() {
        let counters = RunCounters::new();
        counters.start();
        counters.record(RecordEvent::created(EntityKind::Asin, 3));
        counters.stop_and_reset();
        assert!(!counters.record(RecordEvent::created(EntityKind::Asin, 4)));

        counters.start();
        assert_eq!(counters.get_counts().get(EntityKind::Asin).created, 0);
    }

    #[test]
    fn concurrent_recording_is_lossless() {
        let counters = Arc::new(RunCounters::new());
        counters.start();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        counters.record(RecordEvent::found(EntityKind::FbaFee, t * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.get_counts().get(EntityKind::FbaFee).found, 8000);
    }
}
