//! Per-challenge leaderboard cache with invalidate-on-write semantics.
//!
//! Views are immutable value objects published behind an `Arc` and replaced
//! wholesale on rebuild, never mutated in place, so a read racing a rebuild
//! observes either the prior view or the new one. Invalidation only marks
//! the affected challenge stale and keeps the old view around: if a rebuild
//! fails at the store, readers get the last-known-good view flagged as
//! degraded instead of an error.

use crate::store::{BestEntry, Store, StoreError};
use log::{debug, warn};
use serde::Serialize;
use shared::scoring::ScoringPolicy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One ranked leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub player: String,
    pub score: i64,
    pub timestamp: i64,
    pub is_tied: bool,
}

/// Immutable ranked view of one challenge. Published atomically by reference;
/// a new generation is assigned on every rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardView {
    pub challenge: String,
    pub generation: u64,
    pub entries: Vec<LeaderboardEntry>,
}

/// A cache read: the view plus whether it is known to be stale because the
/// most recent rebuild attempt failed.
#[derive(Debug, Clone)]
pub struct LeaderboardRead {
    pub view: Arc<LeaderboardView>,
    pub degraded: bool,
}

#[derive(Default)]
struct Slot {
    view: Option<Arc<LeaderboardView>>,
    fresh: bool,
    /// Bumped by every invalidation. A rebuild only publishes as fresh if the
    /// epoch it started from is still current, so an invalidation delivered
    /// mid-rebuild leaves the slot stale and the next read rebuilds again.
    epoch: u64,
    build_lock: Arc<Mutex<()>>,
}

/// Lazily-built, per-challenge memoized leaderboard views.
pub struct LeaderboardCache {
    store: Store,
    policy: ScoringPolicy,
    max_entries: usize,
    slots: RwLock<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl LeaderboardCache {
    pub fn new(store: Store, policy: ScoringPolicy, max_entries: usize) -> Self {
        Self {
            store,
            policy,
            max_entries,
            slots: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Challenge identity is case-insensitive, matching the store.
    fn key(challenge: &str) -> String {
        challenge.trim().to_lowercase()
    }

    /// Returns the cached view for `challenge`, rebuilding from the store on
    /// a miss or after invalidation. Concurrent readers of a fresh view share
    /// one `Arc`; concurrent rebuilders of the same challenge serialize on a
    /// per-challenge build lock so only one hits the store.
    pub async fn get(&self, challenge: &str) -> Result<LeaderboardRead, StoreError> {
        let key = Self::key(challenge);

        if let Some(read) = self.fresh_view(&key).await {
            return Ok(read);
        }

        let build_lock = {
            let mut slots = self.slots.write().await;
            Arc::clone(&slots.entry(key.clone()).or_default().build_lock)
        };
        let _build = build_lock.lock().await;

        // Another task may have rebuilt while we waited for the lock.
        if let Some(read) = self.fresh_view(&key).await {
            return Ok(read);
        }

        // Snapshot the invalidation epoch before reading the store, so a
        // write committed during the rebuild is not masked by the publish.
        let epoch_at_start = {
            let slots = self.slots.read().await;
            slots.get(&key).map(|slot| slot.epoch).unwrap_or(0)
        };

        match self.build_view(&key).await {
            Ok(view) => {
                let view = Arc::new(view);
                let mut slots = self.slots.write().await;
                let slot = slots.entry(key).or_default();
                slot.view = Some(Arc::clone(&view));
                slot.fresh = slot.epoch == epoch_at_start;
                Ok(LeaderboardRead {
                    view,
                    degraded: false,
                })
            }
            Err(e) => {
                let slots = self.slots.read().await;
                match slots.get(&key).and_then(|slot| slot.view.clone()) {
                    Some(view) => {
                        warn!("leaderboard rebuild for {key} failed ({e}), serving stale view");
                        Ok(LeaderboardRead {
                            view,
                            degraded: true,
                        })
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Marks one challenge's view stale. Never global: unrelated challenges
    /// keep their views and rebuild storms stay contained.
    pub async fn invalidate(&self, challenge: &str) {
        let key = Self::key(challenge);
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(&key) {
            slot.fresh = false;
            slot.epoch += 1;
            debug!("invalidated leaderboard view for {key}");
        }
    }

    /// Generation assigned to the most recently built view; monotonic.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn fresh_view(&self, key: &str) -> Option<LeaderboardRead> {
        let slots = self.slots.read().await;
        let slot = slots.get(key)?;
        if !slot.fresh {
            return None;
        }
        slot.view.as_ref().map(|view| LeaderboardRead {
            view: Arc::clone(view),
            degraded: false,
        })
    }

    async fn build_view(&self, key: &str) -> Result<LeaderboardView, StoreError> {
        let store = self.store.clone();
        let challenge = key.to_string();
        let rows = tokio::task::spawn_blocking(move || store.best_per_player(&challenge))
            .await
            .map_err(|_| StoreError::WorkerGone)??;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LeaderboardView {
            challenge: key.to_string(),
            generation,
            entries: assign_ranks(rows, self.policy.allow_ties(), self.max_entries),
        })
    }
}

/// Assigns competition ranks over rows already ordered best-first.
///
/// With `allow_ties`, equal scores share a rank number but keep their stable
/// display order and are marked as tied; without it, ranks are strictly
/// positional.
fn assign_ranks(rows: Vec<BestEntry>, allow_ties: bool, max_entries: usize) -> Vec<LeaderboardEntry> {
    let rows: Vec<BestEntry> = rows.into_iter().take(max_entries).collect();
    let mut entries = Vec::with_capacity(rows.len());
    let mut current_rank = 1;
    let mut previous_score: Option<i64> = None;

    for (i, row) in rows.iter().enumerate() {
        if !allow_ties || previous_score.is_some_and(|p| p != row.score) {
            current_rank = i + 1;
        }

        let tied_with_prev = i > 0 && rows[i - 1].score == row.score;
        let tied_with_next = i + 1 < rows.len() && rows[i + 1].score == row.score;

        entries.push(LeaderboardEntry {
            rank: current_rank,
            player: row.player.clone(),
            score: row.score,
            timestamp: row.timestamp,
            is_tied: allow_ties && (tied_with_prev || tied_with_next),
        });
        previous_score = Some(row.score);
    }
    entries
}
