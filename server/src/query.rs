//! Read-side API consumed by the external web layer.
//!
//! Leaderboards are served through the cache; everything else reads the
//! store directly. There are no write paths here, and display orientation
//! (ascending for golf, descending for standard) is inherited from the
//! scoring policy rather than re-derived.

use crate::cache::{LeaderboardCache, LeaderboardEntry};
use crate::store::{PlayerRanking, ProfileEntry, Store, StoreError};
use std::sync::Arc;

/// A leaderboard reply: ranked entries plus whether the data is known stale
/// because the latest rebuild failed.
#[derive(Debug, Clone)]
pub struct LeaderboardReply {
    pub challenge: String,
    pub entries: Vec<LeaderboardEntry>,
    pub degraded: bool,
}

pub struct QueryService {
    store: Store,
    cache: Arc<LeaderboardCache>,
    max_entries: usize,
    rankings_enabled: bool,
}

impl QueryService {
    pub fn new(
        store: Store,
        cache: Arc<LeaderboardCache>,
        max_entries: usize,
        rankings_enabled: bool,
    ) -> Self {
        Self {
            store,
            cache,
            max_entries,
            rankings_enabled,
        }
    }

    pub async fn list_challenges(&self) -> Result<Vec<String>, StoreError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.list_challenges())
            .await
            .map_err(|_| StoreError::WorkerGone)?
    }

    /// Ranked leaderboard for one challenge, truncated to
    /// `min(limit, max_leaderboard_entries)`.
    pub async fn leaderboard(
        &self,
        challenge: &str,
        limit: usize,
    ) -> Result<LeaderboardReply, StoreError> {
        let read = self.cache.get(challenge).await?;
        let limit = limit.min(self.max_entries);
        Ok(LeaderboardReply {
            challenge: read.view.challenge.clone(),
            entries: read.view.entries.iter().take(limit).cloned().collect(),
            degraded: read.degraded,
        })
    }

    pub async fn player_profile(&self, player: &str) -> Result<Vec<ProfileEntry>, StoreError> {
        let store = self.store.clone();
        let player = player.trim().to_string();
        tokio::task::spawn_blocking(move || store.player_profile(&player))
            .await
            .map_err(|_| StoreError::WorkerGone)?
    }

    /// Aggregate player standings; `None` when the feature is disabled.
    pub async fn player_rankings(&self) -> Result<Option<Vec<PlayerRanking>>, StoreError> {
        if !self.rankings_enabled {
            return Ok(None);
        }
        let store = self.store.clone();
        let rankings = tokio::task::spawn_blocking(move || store.player_rankings())
            .await
            .map_err(|_| StoreError::WorkerGone)??;
        Ok(Some(rankings))
    }

    /// Compact text scoreboard written back to TCP submitters.
    pub async fn scoreboard_text(&self, challenge: &str) -> Result<String, StoreError> {
        let reply = self.leaderboard(challenge, 10).await?;
        if reply.entries.is_empty() {
            return Ok(format!("{} scoreboard:\nNo entries yet!\n", reply.challenge));
        }

        let mut out = format!("{} scoreboard:\n{}\n", reply.challenge, "=".repeat(30));
        for entry in &reply.entries {
            let tie_marker = if entry.is_tied { " (tie)" } else { "" };
            out.push_str(&format!(
                "{:2}. {:<15} Score: {:4}{}\n",
                entry.rank, entry.player, entry.score, tie_marker
            ));
        }
        if reply.degraded {
            out.push_str("(standings may be slightly stale)\n");
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LeaderboardCache;
    use shared::config::Config;
    use shared::scoring::{NormalizedSubmission, ScoringPolicy};
    use tempfile::TempDir;

    fn submission(player: &str, challenge: &str, score: i64) -> NormalizedSubmission {
        NormalizedSubmission {
            player: player.to_string(),
            challenge: challenge.to_string(),
            score,
            solution: Some("x".to_string()),
        }
    }

    fn service(max_entries: usize, rankings_enabled: bool) -> (TempDir, Store, QueryService) {
        let dir = TempDir::new().unwrap();
        let policy = ScoringPolicy::from_config(&Config::default());
        let store = Store::open(&dir.path().join("scores.db"), policy.clone()).unwrap();
        let cache = Arc::new(LeaderboardCache::new(
            store.clone(),
            policy,
            max_entries,
        ));
        let query = QueryService::new(store.clone(), cache, max_entries, rankings_enabled);
        (dir, store, query)
    }

    #[tokio::test]
    async fn leaderboard_respects_caller_limit() {
        let (_dir, store, query) = service(100, true);
        for i in 0..5 {
            store
                .record_submission(&submission(&format!("p{i}"), "crypto1", i), None)
                .unwrap();
        }

        let reply = query.leaderboard("crypto1", 3).await.unwrap();
        assert_eq!(reply.entries.len(), 3);
        assert_eq!(reply.entries[0].score, 0);
    }

    #[tokio::test]
    async fn leaderboard_limit_is_capped_by_config() {
        let (_dir, store, query) = service(2, true);
        for i in 0..5 {
            store
                .record_submission(&submission(&format!("p{i}"), "crypto1", i), None)
                .unwrap();
        }

        let reply = query.leaderboard("crypto1", 50).await.unwrap();
        assert_eq!(reply.entries.len(), 2);
    }

    #[tokio::test]
    async fn rankings_gated_on_feature_flag() {
        let (_dir, store, query) = service(100, false);
        store
            .record_submission(&submission("Alice", "crypto1", 1), None)
            .unwrap();
        assert!(query.player_rankings().await.unwrap().is_none());

        let (_dir2, store2, query2) = service(100, true);
        store2
            .record_submission(&submission("Alice", "crypto1", 1), None)
            .unwrap();
        let rankings = query2.player_rankings().await.unwrap().unwrap();
        assert_eq!(rankings.len(), 1);
    }

    #[tokio::test]
    async fn scoreboard_text_lists_ranked_players() {
        let (_dir, store, query) = service(100, true);
        store
            .record_submission(&submission("Alice", "crypto1", 45), None)
            .unwrap();
        store
            .record_submission(&submission("Bob", "crypto1", 67), None)
            .unwrap();

        let text = query.scoreboard_text("crypto1").await.unwrap();
        assert!(text.starts_with("crypto1 scoreboard:"));
        let alice = text.find("Alice").unwrap();
        let bob = text.find("Bob").unwrap();
        assert!(alice < bob, "golf ranks the lower score first");
    }

    #[tokio::test]
    async fn scoreboard_text_for_unknown_challenge() {
        let (_dir, _store, query) = service(100, true);
        let text = query.scoreboard_text("ghost").await.unwrap();
        assert!(text.contains("No entries yet!"));
    }
}
