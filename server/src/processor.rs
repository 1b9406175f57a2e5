//! Submission processing: one raw line in, one accepted/rejected outcome out.
//!
//! This is the only write path. Validation failures never touch the store,
//! and an accepted submission invalidates exactly the affected challenge's
//! cached view, so the cache cannot go stale relative to a write it was told
//! about.

use crate::cache::LeaderboardCache;
use crate::store::{Store, StoreError, SubmissionId};
use log::debug;
use shared::scoring::{ScoringPolicy, ValidationError};
use std::sync::Arc;

/// Outcome of processing a single submission line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Persisted; carries the row id and the normalized challenge name the
    /// submission landed on.
    Accepted {
        id: SubmissionId,
        challenge: String,
    },
    /// Rejected by the scoring policy; nothing was written.
    Rejected(ValidationError),
}

pub struct SubmissionProcessor {
    policy: ScoringPolicy,
    store: Store,
    cache: Arc<LeaderboardCache>,
}

impl SubmissionProcessor {
    pub fn new(policy: ScoringPolicy, store: Store, cache: Arc<LeaderboardCache>) -> Self {
        Self {
            policy,
            store,
            cache,
        }
    }

    /// Validates, persists and acknowledges one submission line.
    ///
    /// Returns `Ok(Rejected(..))` for policy violations (the client's fault)
    /// and `Err(StoreError)` for storage faults (the system's fault); the
    /// two are never conflated. Storage faults are not retried here: a
    /// silent retry could record the submission twice.
    pub async fn process(
        &self,
        raw_line: &str,
        origin: Option<&str>,
    ) -> Result<SubmissionOutcome, StoreError> {
        let submission = match self.policy.validate_line(raw_line) {
            Ok(submission) => submission,
            Err(e) => {
                debug!("rejected submission from {origin:?}: {e}");
                return Ok(SubmissionOutcome::Rejected(e));
            }
        };

        let challenge = submission.challenge.clone();
        let store = self.store.clone();
        let origin = origin.map(str::to_owned);
        let id = tokio::task::spawn_blocking(move || {
            store.record_submission(&submission, origin.as_deref())
        })
        .await
        .map_err(|_| StoreError::WorkerGone)??;

        self.cache.invalidate(&challenge).await;
        Ok(SubmissionOutcome::Accepted { id, challenge })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::Config;
    use tempfile::TempDir;

    fn processor() -> (TempDir, Store, Arc<LeaderboardCache>, SubmissionProcessor) {
        let dir = TempDir::new().unwrap();
        let policy = ScoringPolicy::from_config(&Config::default());
        let store = Store::open(&dir.path().join("scores.db"), policy.clone()).unwrap();
        let cache = Arc::new(LeaderboardCache::new(store.clone(), policy.clone(), 100));
        let processor = SubmissionProcessor::new(policy, store.clone(), Arc::clone(&cache));
        (dir, store, cache, processor)
    }

    #[tokio::test]
    async fn accepted_line_is_persisted() {
        let (_dir, store, _cache, processor) = processor();
        let outcome = processor
            .process("Alice,crypto1,45,print(1)", Some("127.0.0.1"))
            .await
            .unwrap();

        match outcome {
            SubmissionOutcome::Accepted { challenge, .. } => {
                assert_eq!(challenge, "crypto1");
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
        assert_eq!(store.submission_count("crypto1").unwrap(), 1);
    }

    #[tokio::test]
    async fn rejected_line_never_touches_the_store() {
        let (_dir, store, _cache, processor) = processor();
        let outcome = processor.process("Carol,crypto1,50", None).await.unwrap();

        assert_eq!(
            outcome,
            SubmissionOutcome::Rejected(ValidationError::MissingSolution)
        );
        assert_eq!(store.submission_count("crypto1").unwrap(), 0);
        assert!(store.list_challenges().unwrap().is_empty());
    }

    #[tokio::test]
    async fn acceptance_invalidates_the_affected_view() {
        let (_dir, _store, cache, processor) = processor();
        processor
            .process("Alice,crypto1,45,print(1)", None)
            .await
            .unwrap();
        let before = cache.get("crypto1").await.unwrap();

        processor
            .process("Bob,crypto1,30,print(2)", None)
            .await
            .unwrap();
        let after = cache.get("crypto1").await.unwrap();

        assert!(after.view.generation > before.view.generation);
        assert_eq!(after.view.entries[0].player, "Bob");
    }

    #[tokio::test]
    async fn acceptance_leaves_other_views_untouched() {
        let (_dir, _store, cache, processor) = processor();
        processor
            .process("Alice,web1,45,print(1)", None)
            .await
            .unwrap();
        let web = cache.get("web1").await.unwrap();

        processor
            .process("Bob,crypto1,30,print(2)", None)
            .await
            .unwrap();

        let web_again = cache.get("web1").await.unwrap();
        assert!(std::sync::Arc::ptr_eq(&web.view, &web_again.view));
    }
}
