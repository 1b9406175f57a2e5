use clap::Parser;
use log::{error, info};
use server::cache::LeaderboardCache;
use server::network::IngestServer;
use server::processor::SubmissionProcessor;
use server::query::QueryService;
use server::store::Store;
use shared::config::Config;
use shared::scoring::ScoringPolicy;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Main-method of the application.
/// Parses command-line arguments, loads the configuration, then wires the
/// storage, cache and ingest pipeline and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// SQLite database file
        #[clap(short, long, default_value = "scoreboard.db")]
        db: PathBuf,
        /// JSON configuration file
        #[clap(short, long, default_value = "ctf_config.json")]
        config: PathBuf,
        /// Maximum submissions processed concurrently
        #[clap(long, default_value = "64")]
        max_inflight: usize,
    }

    env_logger::init();
    let args = Args::parse();

    // Load (and repair, if needed) the competition configuration
    let config = Config::load(&args.config);
    info!(
        "starting {} ({:?} scoring)",
        config.ctf_name, config.scoring.scoring_type
    );

    let policy = ScoringPolicy::from_config(&config);
    let store = Store::open(&args.db, policy.clone())?;

    let cache = Arc::new(LeaderboardCache::new(
        store.clone(),
        policy.clone(),
        config.ui.max_leaderboard_entries,
    ));
    let processor = Arc::new(SubmissionProcessor::new(
        policy,
        store.clone(),
        Arc::clone(&cache),
    ));
    let query = Arc::new(QueryService::new(
        store,
        Arc::clone(&cache),
        config.ui.max_leaderboard_entries,
        config.features.player_rankings_enabled,
    ));

    let address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&address).await?;
    let server = Arc::new(IngestServer::new(
        processor,
        query,
        &config,
        args.max_inflight,
    ));

    // Spawn the accept loop
    let server_handle = tokio::spawn(async move { server.run(listener).await });

    // Handle shutdown gracefully
    tokio::select! {
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("ingest server failed: {e}"),
                Err(e) => error!("ingest task panicked: {e}"),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down gracefully");
        }
    }

    Ok(())
}
