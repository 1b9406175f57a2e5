//! Scoreboard server: TCP submission ingestion, scoring, storage, and
//! leaderboard queries.
//!
//! The write path runs raw lines through [`processor::SubmissionProcessor`]
//! into the append-only [`store::Store`]; reads go through the per-challenge
//! [`cache::LeaderboardCache`] and the [`query::QueryService`] facade.
//! [`network::IngestServer`] ties the pipeline to a TCP listener.

pub mod cache;
pub mod network;
pub mod processor;
pub mod query;
pub mod store;
