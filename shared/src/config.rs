//! Runtime configuration snapshot.
//!
//! The configuration is loaded once at startup and treated as immutable for
//! the process lifetime. Missing fields fall back to defaults via
//! `#[serde(default)]`, so a partial config file behaves like a merge with
//! the default configuration. Invalid values are repaired with a warning
//! rather than aborting startup.

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Direction in which scores are ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScoringType {
    /// Lower numeric score is better (code golf style).
    #[default]
    Golf,
    /// Higher numeric score is better.
    Standard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub scoring_type: ScoringType,
    pub allow_ties: bool,
    pub show_scores: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            scoring_type: ScoringType::Golf,
            allow_ties: true,
            show_scores: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub solutions_enabled: bool,
    pub player_rankings_enabled: bool,
    pub live_updates: bool,
    pub challenge_categories: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            solutions_enabled: true,
            player_rankings_enabled: true,
            live_updates: true,
            challenge_categories: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub theme: String,
    pub show_timestamps: bool,
    pub show_client_ips: bool,
    pub max_leaderboard_entries: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: "competitive".to_string(),
            show_timestamps: true,
            show_client_ips: false,
            max_leaderboard_entries: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub require_solutions: bool,
    pub max_solution_length: usize,
    pub allowed_file_types: Vec<String>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            require_solutions: true,
            max_solution_length: 10_000,
            allowed_file_types: [".py", ".sh", ".txt", ".c", ".cpp", ".java", ".js"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Full configuration snapshot consumed by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ctf_name: String,
    pub scoring: ScoringConfig,
    pub features: FeaturesConfig,
    pub ui: UiConfig,
    pub submission: SubmissionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ctf_name: "CTF Scoreboard".to_string(),
            scoring: ScoringConfig::default(),
            features: FeaturesConfig::default(),
            ui: UiConfig::default(),
            submission: SubmissionConfig::default(),
        }
    }
}

const KNOWN_THEMES: [&str; 3] = ["competitive", "classic", "minimal"];

impl Config {
    /// Loads configuration from a JSON file, falling back to defaults when
    /// the file is missing or unparseable, then repairs invalid values.
    pub fn load(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    warn!(
                        "error loading config from {}: {}, using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        config.repair();
        config
    }

    /// Replaces out-of-range values with their defaults, logging each repair.
    pub fn repair(&mut self) {
        if !KNOWN_THEMES.contains(&self.ui.theme.as_str()) {
            warn!("invalid theme {:?}, using 'competitive'", self.ui.theme);
            self.ui.theme = "competitive".to_string();
        }
        if self.submission.max_solution_length == 0 {
            warn!("invalid max_solution_length, using 10000");
            self.submission.max_solution_length = 10_000;
        }
        if self.ui.max_leaderboard_entries == 0 {
            warn!("invalid max_leaderboard_entries, using 100");
            self.ui.max_leaderboard_entries = 100;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_expected_policy() {
        let config = Config::default();
        assert_eq!(config.ctf_name, "CTF Scoreboard");
        assert_eq!(config.scoring.scoring_type, ScoringType::Golf);
        assert!(config.scoring.allow_ties);
        assert!(config.submission.require_solutions);
        assert_eq!(config.submission.max_solution_length, 10_000);
        assert_eq!(config.ui.max_leaderboard_entries, 100);
        assert!(config
            .submission
            .allowed_file_types
            .contains(&".py".to_string()));
    }

    #[test]
    fn partial_json_merges_with_defaults() {
        let json = r#"{"scoring": {"scoring_type": "standard"}, "ctf_name": "My CTF"}"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.ctf_name, "My CTF");
        assert_eq!(config.scoring.scoring_type, ScoringType::Standard);
        // Untouched sections keep their defaults
        assert!(config.scoring.allow_ties);
        assert!(config.submission.require_solutions);
        assert_eq!(config.ui.max_leaderboard_entries, 100);
    }

    #[test]
    fn repair_fixes_invalid_values() {
        let mut config = Config::default();
        config.ui.theme = "neon".to_string();
        config.submission.max_solution_length = 0;
        config.ui.max_leaderboard_entries = 0;

        config.repair();

        assert_eq!(config.ui.theme, "competitive");
        assert_eq!(config.submission.max_solution_length, 10_000);
        assert_eq!(config.ui.max_leaderboard_entries, 100);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/ctf_config.json"));
        assert_eq!(config.ctf_name, "CTF Scoreboard");
    }

    #[test]
    fn scoring_type_roundtrips_lowercase() {
        assert_eq!(serde_json::to_string(&ScoringType::Golf).unwrap(), "\"golf\"");
        let parsed: ScoringType = serde_json::from_str("\"standard\"").unwrap();
        assert_eq!(parsed, ScoringType::Standard);
    }
}
