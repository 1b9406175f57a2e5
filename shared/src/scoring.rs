//! Scoring policy: score comparison and submission validation.
//!
//! A [`ScoringPolicy`] is a pure snapshot of the scoring-related configuration.
//! It is the single source of truth for score ordering: every component that
//! ranks scores (SQL queries, cached leaderboard views) derives its direction
//! from here instead of re-implementing the comparison.

use crate::config::{Config, ScoringType};
use crate::{MAX_CHALLENGE_LEN, MAX_NAME_LEN};
use thiserror::Error;

/// Result of comparing submission `a` against submission `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreCmp {
    /// `a` ranks above `b`.
    Better,
    /// `a` ranks below `b`.
    Worse,
    Equal,
}

/// Rejection reasons for a raw submission line.
///
/// These are terse on purpose: the message text is written verbatim to the
/// submitting client as a negative acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid message format, expected: name,challenge,score,solve_code")]
    MissingSolution,
    #[error("invalid message format, expected: name,challenge,score[,solve_code]")]
    TooFewFields,
    #[error("name cannot be empty")]
    EmptyName,
    #[error("name too long (max {max} characters)", max = MAX_NAME_LEN)]
    NameTooLong,
    #[error("challenge cannot be empty")]
    EmptyChallenge,
    #[error("challenge too long (max {max} characters)", max = MAX_CHALLENGE_LEN)]
    ChallengeTooLong,
    #[error("score must be a valid integer")]
    InvalidScore,
    #[error("score must be non-negative")]
    NegativeScore,
    #[error("solve code cannot be empty")]
    EmptySolution,
    #[error("solve code too long (max {0} characters)")]
    SolutionTooLong(usize),
    #[error("solution file type {0} is not allowed")]
    DisallowedFileType(String),
    #[error("line exceeds maximum length")]
    LineTooLong,
    #[error("invalid character encoding")]
    InvalidEncoding,
}

/// A submission line after parsing and normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSubmission {
    pub player: String,
    pub challenge: String,
    pub score: i64,
    pub solution: Option<String>,
}

/// Raw line split into its fields. The 3-vs-4 field distinction is resolved
/// exactly once, here, instead of being re-branched downstream.
#[derive(Debug, PartialEq, Eq)]
enum SubmissionLine<'a> {
    WithSolution {
        name: &'a str,
        challenge: &'a str,
        score: &'a str,
        solution: &'a str,
    },
    WithoutSolution {
        name: &'a str,
        challenge: &'a str,
        score: &'a str,
    },
}

/// Immutable scoring policy derived from the configuration snapshot.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    scoring_type: ScoringType,
    allow_ties: bool,
    require_solutions: bool,
    max_solution_length: usize,
    allowed_file_types: Vec<String>,
}

impl ScoringPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scoring_type: config.scoring.scoring_type,
            allow_ties: config.scoring.allow_ties,
            require_solutions: config.submission.require_solutions,
            max_solution_length: config.submission.max_solution_length,
            allowed_file_types: config.submission.allowed_file_types.clone(),
        }
    }

    pub fn scoring_type(&self) -> ScoringType {
        self.scoring_type
    }

    pub fn allow_ties(&self) -> bool {
        self.allow_ties
    }

    pub fn require_solutions(&self) -> bool {
        self.require_solutions
    }

    pub fn max_solution_length(&self) -> usize {
        self.max_solution_length
    }

    /// Compares score `a` against score `b` under the active scoring type.
    pub fn compare(&self, a: i64, b: i64) -> ScoreCmp {
        if a == b {
            return ScoreCmp::Equal;
        }
        let a_better = match self.scoring_type {
            ScoringType::Golf => a < b,
            ScoringType::Standard => a > b,
        };
        if a_better {
            ScoreCmp::Better
        } else {
            ScoreCmp::Worse
        }
    }

    /// SQL sort direction placing the best score first.
    pub fn sort_order(&self) -> &'static str {
        match self.scoring_type {
            ScoringType::Golf => "ASC",
            ScoringType::Standard => "DESC",
        }
    }

    /// SQL aggregate selecting the best score of a group.
    pub fn aggregate(&self) -> &'static str {
        match self.scoring_type {
            ScoringType::Golf => "MIN(score)",
            ScoringType::Standard => "MAX(score)",
        }
    }

    /// Validates and normalizes one raw submission line.
    ///
    /// Fails fast: the first violated rule is returned and later rules are
    /// not evaluated. On success the returned submission has trimmed names
    /// and a parsed score; identity normalization beyond trimming
    /// (case-insensitivity) is the store's concern.
    pub fn validate_line(&self, raw: &str) -> Result<NormalizedSubmission, ValidationError> {
        let line = self.split_line(raw.trim_matches(&['\0', '\r', '\n', ' ', '\t'][..]))?;

        let (name, challenge, score_str, solution) = match line {
            SubmissionLine::WithSolution {
                name,
                challenge,
                score,
                solution,
            } => (name, challenge, score, Some(solution)),
            SubmissionLine::WithoutSolution {
                name,
                challenge,
                score,
            } => (name, challenge, score, None),
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ValidationError::NameTooLong);
        }

        let challenge = challenge.trim();
        if challenge.is_empty() {
            return Err(ValidationError::EmptyChallenge);
        }
        if challenge.chars().count() > MAX_CHALLENGE_LEN {
            return Err(ValidationError::ChallengeTooLong);
        }

        let score: i64 = score_str
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidScore)?;
        if score < 0 {
            return Err(ValidationError::NegativeScore);
        }

        let solution = match solution {
            Some(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(ValidationError::EmptySolution);
                }
                if text.chars().count() > self.max_solution_length {
                    return Err(ValidationError::SolutionTooLong(self.max_solution_length));
                }
                if let Some(ext) = infer_file_type(text) {
                    if !self.allowed_file_types.iter().any(|a| a == ext) {
                        return Err(ValidationError::DisallowedFileType(ext.to_string()));
                    }
                }
                Some(text.to_string())
            }
            None => None,
        };

        Ok(NormalizedSubmission {
            player: name.to_string(),
            challenge: challenge.to_string(),
            score,
            solution,
        })
    }

    /// Splits a line on commas into the 3- or 4-field protocol shape. The
    /// solution field is the remainder of the line, so it may itself contain
    /// commas.
    fn split_line<'a>(&self, line: &'a str) -> Result<SubmissionLine<'a>, ValidationError> {
        let parts: Vec<&str> = line.splitn(4, ',').collect();
        match parts.as_slice() {
            [name, challenge, score, solution] => Ok(SubmissionLine::WithSolution {
                name,
                challenge,
                score,
                solution,
            }),
            [name, challenge, score] => {
                if self.require_solutions {
                    Err(ValidationError::MissingSolution)
                } else {
                    Ok(SubmissionLine::WithoutSolution {
                        name,
                        challenge,
                        score,
                    })
                }
            }
            _ => Err(ValidationError::TooFewFields),
        }
    }
}

/// Best-effort file type inference from solution text.
///
/// Only unambiguous markers are sniffed (shebang interpreter, C include);
/// solutions whose type cannot be inferred pass the file-type check.
fn infer_file_type(solution: &str) -> Option<&'static str> {
    let first_line = solution.lines().next().unwrap_or("");
    if let Some(interp) = first_line.strip_prefix("#!") {
        if interp.contains("python") {
            return Some(".py");
        }
        if interp.ends_with("sh") || interp.contains("sh ") {
            return Some(".sh");
        }
        return None;
    }
    if first_line.starts_with("#include") {
        return Some(".c");
    }
    None
}
