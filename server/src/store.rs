//! Transactional SQLite persistence for players, challenges and submissions.
//!
//! The store is the single source of truth. Submissions are append-only:
//! resubmitting never updates a row, it inserts a new one, and "best per
//! player" is computed at read time. The database runs in WAL mode so
//! concurrent writers serialize at the storage layer instead of failing.

use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use shared::scoring::{NormalizedSubmission, ScoringPolicy};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Busy timeout for lock contention between connections.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Storage-layer fault, kept distinct from `ValidationError` so callers can
/// classify bad input versus system failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("identity is empty after normalization")]
    EmptyIdentity,
    #[error("store lock poisoned")]
    Poisoned,
    #[error("storage worker terminated unexpectedly")]
    WorkerGone,
}

/// Identifier of a persisted submission row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionId(pub i64);

/// One player's best submission for a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestEntry {
    pub player: String,
    pub score: i64,
    pub timestamp: i64,
}

/// One row of a player's submission history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub challenge: String,
    pub score: i64,
    pub solution: Option<String>,
    pub timestamp: i64,
}

/// Aggregate standing of one player across all challenges.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRanking {
    pub rank: usize,
    pub player: String,
    pub challenges_entered: usize,
    pub total_score: i64,
    pub avg_score: f64,
    pub best_score: i64,
    pub last_activity: i64,
}

/// Milliseconds since the Unix epoch; used for submission timestamps and
/// first-seen markers. Millisecond resolution plus the row id tie-break keeps
/// "earliest submission wins" deterministic.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

/// SQLite-backed store. Cheap to clone; clones share one connection guarded
/// by a mutex, and SQLite's WAL discipline handles cross-process writers.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    policy: ScoringPolicy,
}

impl Store {
    /// Opens (creating if needed) the database at `path` and applies the
    /// schema and pragmas.
    pub fn open(path: &Path, policy: ScoringPolicy) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS players (
                 name TEXT PRIMARY KEY COLLATE NOCASE,
                 first_seen INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS challenges (
                 name TEXT PRIMARY KEY COLLATE NOCASE,
                 first_seen INTEGER NOT NULL,
                 category TEXT
             );
             CREATE TABLE IF NOT EXISTS submissions (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 player TEXT NOT NULL COLLATE NOCASE REFERENCES players(name),
                 challenge TEXT NOT NULL COLLATE NOCASE REFERENCES challenges(name),
                 score INTEGER NOT NULL,
                 solution TEXT,
                 timestamp INTEGER NOT NULL,
                 origin TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_challenge_score
                 ON submissions(challenge, score, timestamp);
             CREATE INDEX IF NOT EXISTS idx_challenge_player
                 ON submissions(challenge, player);",
        )?;

        info!("store opened at {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            policy,
        })
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Persists one submission atomically: the submission row and any
    /// newly-required player/challenge rows are created in a single
    /// transaction, so a crash never leaves a dangling reference.
    pub fn record_submission(
        &self,
        submission: &NormalizedSubmission,
        origin: Option<&str>,
    ) -> Result<SubmissionId, StoreError> {
        if submission.player.trim().is_empty() || submission.challenge.trim().is_empty() {
            return Err(StoreError::EmptyIdentity);
        }

        let now = now_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO players (name, first_seen) VALUES (?1, ?2)",
            params![submission.player, now],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO challenges (name, first_seen) VALUES (?1, ?2)",
            params![submission.challenge, now],
        )?;
        tx.execute(
            "INSERT INTO submissions (player, challenge, score, solution, timestamp, origin)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                submission.player,
                submission.challenge,
                submission.score,
                submission.solution,
                now,
                origin
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!(
            "recorded submission {} for {} in {} with score {}",
            id, submission.player, submission.challenge, submission.score
        );
        Ok(SubmissionId(id))
    }

    /// Returns each player's best submission for `challenge`, best first.
    ///
    /// "Best" follows the scoring policy's orientation, tie-broken by the
    /// earliest timestamp then the lowest row id, so the selection is
    /// deterministic even among exact ties.
    pub fn best_per_player(&self, challenge: &str) -> Result<Vec<BestEntry>, StoreError> {
        let dir = self.policy.sort_order();
        let sql = format!(
            "WITH ranked AS (
                 SELECT player, score, timestamp,
                        ROW_NUMBER() OVER (
                            PARTITION BY player
                            ORDER BY score {dir}, timestamp ASC, id ASC
                        ) AS rn
                 FROM submissions
                 WHERE challenge = ?1
             )
             SELECT player, score, timestamp
             FROM ranked
             WHERE rn = 1
             ORDER BY score {dir}, timestamp ASC"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![challenge], |row| {
            Ok(BestEntry {
                player: row.get(0)?,
                score: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All challenge names that have received at least one submission.
    pub fn list_challenges(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT name FROM challenges ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Full submission history for one player across all challenges, best
    /// scores first, most recent first among equals.
    pub fn player_profile(&self, player: &str) -> Result<Vec<ProfileEntry>, StoreError> {
        let dir = self.policy.sort_order();
        let sql = format!(
            "SELECT challenge, score, solution, timestamp
             FROM submissions
             WHERE player = ?1
             ORDER BY score {dir}, timestamp DESC"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![player], |row| {
            Ok(ProfileEntry {
                challenge: row.get(0)?,
                score: row.get(1)?,
                solution: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Aggregate player standings across all challenges, most challenges
    /// entered first.
    pub fn player_rankings(&self) -> Result<Vec<PlayerRanking>, StoreError> {
        let best = self.policy.aggregate();
        let total_dir = self.policy.sort_order();
        let sql = format!(
            "SELECT player,
                    COUNT(DISTINCT challenge) AS challenges_entered,
                    SUM(score) AS total_score,
                    AVG(score) AS avg_score,
                    {best} AS best_score,
                    MAX(timestamp) AS last_activity
             FROM submissions
             GROUP BY player
             ORDER BY challenges_entered DESC, total_score {total_dir}, avg_score {total_dir}"
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut rankings = Vec::new();
        for (rank, row) in rows.enumerate() {
            let (player, challenges_entered, total_score, avg_score, best_score, last_activity) =
                row?;
            rankings.push(PlayerRanking {
                rank: rank + 1,
                player,
                challenges_entered: challenges_entered as usize,
                total_score,
                avg_score,
                best_score,
                last_activity,
            });
        }
        Ok(rankings)
    }

    /// Test-only fault injection: drops the submissions table so every later
    /// read or write fails at the storage layer.
    #[cfg(test)]
    pub(crate) fn drop_submissions_table(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("DROP TABLE submissions").unwrap();
    }

    /// Number of persisted submissions for one challenge.
    pub fn submission_count(&self, challenge: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM submissions WHERE challenge = ?1",
                params![challenge],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::{Config, ScoringType};
    use tempfile::TempDir;

    fn submission(player: &str, challenge: &str, score: i64) -> NormalizedSubmission {
        NormalizedSubmission {
            player: player.to_string(),
            challenge: challenge.to_string(),
            score,
            solution: Some(format!("solve_{player}")),
        }
    }

    fn golf_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let policy = ScoringPolicy::from_config(&Config::default());
        let store = Store::open(&dir.path().join("scores.db"), policy).unwrap();
        (dir, store)
    }

    fn standard_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.scoring.scoring_type = ScoringType::Standard;
        let policy = ScoringPolicy::from_config(&config);
        let store = Store::open(&dir.path().join("scores.db"), policy).unwrap();
        (dir, store)
    }

    #[test]
    fn record_creates_player_and_challenge_rows() {
        let (_dir, store) = golf_store();
        let id = store
            .record_submission(&submission("Alice", "crypto1", 45), Some("127.0.0.1"))
            .unwrap();
        assert!(id.0 > 0);

        assert_eq!(store.list_challenges().unwrap(), vec!["crypto1".to_string()]);
        assert_eq!(store.submission_count("crypto1").unwrap(), 1);
    }

    #[test]
    fn golf_orders_lowest_score_first() {
        let (_dir, store) = golf_store();
        store
            .record_submission(&submission("Bob", "crypto1", 67), None)
            .unwrap();
        store
            .record_submission(&submission("Alice", "crypto1", 45), None)
            .unwrap();

        let best = store.best_per_player("crypto1").unwrap();
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].player, "Alice");
        assert_eq!(best[0].score, 45);
        assert_eq!(best[1].player, "Bob");
    }

    #[test]
    fn standard_orders_highest_score_first() {
        let (_dir, store) = standard_store();
        store
            .record_submission(&submission("Alice", "pwn1", 1200), None)
            .unwrap();
        store
            .record_submission(&submission("Bob", "pwn1", 1500), None)
            .unwrap();

        let best = store.best_per_player("pwn1").unwrap();
        assert_eq!(best[0].player, "Bob");
        assert_eq!(best[0].score, 1500);
        assert_eq!(best[1].player, "Alice");
    }

    #[test]
    fn resubmission_is_append_only_and_best_wins() {
        let (_dir, store) = golf_store();
        store
            .record_submission(&submission("Alice", "crypto1", 80), None)
            .unwrap();
        store
            .record_submission(&submission("Alice", "crypto1", 45), None)
            .unwrap();
        store
            .record_submission(&submission("Alice", "crypto1", 60), None)
            .unwrap();

        // History is retained; the best submission is selected at read time.
        assert_eq!(store.submission_count("crypto1").unwrap(), 3);
        let best = store.best_per_player("crypto1").unwrap();
        assert_eq!(best.len(), 1);
        assert_eq!(best[0].score, 45);
    }

    #[test]
    fn tied_scores_pick_earliest_submission() {
        let (_dir, store) = golf_store();
        store
            .record_submission(&submission("Alice", "crypto1", 50), None)
            .unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store
            .record_submission(&submission("Alice", "crypto1", 50), None)
            .unwrap();

        let best = store.best_per_player("crypto1").unwrap();
        assert_eq!(best.len(), 1);
        let history = store.player_profile("Alice").unwrap();
        assert_eq!(history.len(), 2);
        // Best entry carries the earlier timestamp.
        let earliest = history.iter().map(|e| e.timestamp).min().unwrap();
        assert_eq!(best[0].timestamp, earliest);
    }

    #[test]
    fn player_identity_is_case_insensitive() {
        let (_dir, store) = golf_store();
        store
            .record_submission(&submission("Alice", "crypto1", 50), None)
            .unwrap();
        store
            .record_submission(&submission("ALICE", "crypto1", 40), None)
            .unwrap();

        let best = store.best_per_player("crypto1").unwrap();
        assert_eq!(best.len(), 1, "same player under case-insensitive identity");
        assert_eq!(best[0].score, 40);
    }

    #[test]
    fn challenge_identity_is_case_insensitive() {
        let (_dir, store) = golf_store();
        store
            .record_submission(&submission("Alice", "Crypto1", 50), None)
            .unwrap();
        store
            .record_submission(&submission("Bob", "crypto1", 40), None)
            .unwrap();

        assert_eq!(store.list_challenges().unwrap().len(), 1);
        assert_eq!(store.best_per_player("CRYPTO1").unwrap().len(), 2);
    }

    #[test]
    fn profile_round_trips_solution_text() {
        let (_dir, store) = golf_store();
        let sub = NormalizedSubmission {
            player: "Alice".to_string(),
            challenge: "crypto1".to_string(),
            score: 45,
            solution: Some("print(1, 2, 3)  # tricky, commas".to_string()),
        };
        store.record_submission(&sub, None).unwrap();

        let profile = store.player_profile("Alice").unwrap();
        assert_eq!(profile.len(), 1);
        assert_eq!(profile[0].challenge, "crypto1");
        assert_eq!(profile[0].score, 45);
        assert_eq!(profile[0].solution, sub.solution);
    }

    #[test]
    fn empty_identity_is_rejected_before_any_write() {
        let (_dir, store) = golf_store();
        let bad = NormalizedSubmission {
            player: "  ".to_string(),
            challenge: "crypto1".to_string(),
            score: 1,
            solution: None,
        };
        assert!(matches!(
            store.record_submission(&bad, None),
            Err(StoreError::EmptyIdentity)
        ));
        assert_eq!(store.submission_count("crypto1").unwrap(), 0);
        assert!(store.list_challenges().unwrap().is_empty());
    }

    #[test]
    fn player_rankings_aggregate_across_challenges() {
        let (_dir, store) = golf_store();
        store
            .record_submission(&submission("Alice", "crypto1", 10), None)
            .unwrap();
        store
            .record_submission(&submission("Alice", "web1", 30), None)
            .unwrap();
        store
            .record_submission(&submission("Bob", "crypto1", 20), None)
            .unwrap();

        let rankings = store.player_rankings().unwrap();
        assert_eq!(rankings.len(), 2);
        assert_eq!(rankings[0].player, "Alice");
        assert_eq!(rankings[0].rank, 1);
        assert_eq!(rankings[0].challenges_entered, 2);
        assert_eq!(rankings[0].total_score, 40);
        assert_eq!(rankings[0].best_score, 10);
        assert_eq!(rankings[1].player, "Bob");
        assert_eq!(rankings[1].rank, 2);
    }
}
