//! Domain types shared between the scoreboard server and the test client.
//!
//! This crate is deliberately free of I/O: it holds the runtime configuration
//! snapshot and the scoring policy (comparison, line parsing, validation) so
//! both can be unit tested without a database or a socket.

pub mod config;
pub mod scoring;

/// Maximum accepted player name length, in characters.
pub const MAX_NAME_LEN: usize = 30;
/// Maximum accepted challenge name length, in characters.
pub const MAX_CHALLENGE_LEN: usize = 64;

pub use config::{Config, ScoringType};
pub use scoring::{NormalizedSubmission, ScoreCmp, ScoringPolicy, ValidationError};
