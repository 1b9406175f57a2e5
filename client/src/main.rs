//! Test client for the scoreboard server.
//!
//! Sends a single demo submission by default, or populates the server with
//! randomized challenges, players and scores when `--generate` is given.

use clap::Parser;
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server host to connect to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Generate bulk test data instead of a single submission
    #[clap(long)]
    generate: bool,
    /// Number of challenges to populate in generate mode
    #[clap(long, default_value = "50")]
    challenges: usize,
}

const FIRST_NAMES: &[&str] = &[
    "Alice", "Bob", "Charlie", "Diana", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack", "Kate",
    "Leo", "Maya", "Noah", "Olivia", "Paul", "Quinn", "Ruby", "Sam", "Tina", "Uma", "Victor",
    "Wendy", "Xander", "Yara", "Zoe", "Adam", "Bella", "Carl", "Delia", "Ethan", "Fiona",
    "George", "Hannah", "Ian", "Julia", "Kevin", "Luna", "Max", "Nina", "Oscar", "Penny",
    "Quincy", "Rachel", "Steve", "Tessa", "Ulrich", "Vera", "Will", "Ximena", "York", "Zara",
];

const CHALLENGE_PREFIXES: &[&str] = &["C", "W", "P", "R", "M", "S", "O", "F"];

const SOLVE_TEMPLATES: &[&str] = &[
    "#!/usr/bin/env python3\\nprint(open('flag.txt').read())",
    "print(flag)",
    "#!/bin/sh\\ncat flag.txt",
    "exec(bytes.fromhex(payload))",
];

/// Scores that several players are nudged onto so ties show up on the board.
const TIE_SCORES: &[i64] = &[10, 25, 50, 100, 150, 200];

/// Sends one submission line and returns the server's scoreboard reply.
async fn send_score(
    host: &str,
    port: u16,
    player: &str,
    challenge: &str,
    score: i64,
    solution: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect((host, port)).await?;
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let mut welcome = String::new();
    reader.read_line(&mut welcome).await?;

    let line = format!("{player},{challenge},{score},{solution}\n");
    write_half.write_all(line.as_bytes()).await?;
    write_half.shutdown().await?;

    let mut response = String::new();
    reader.read_to_string(&mut response).await?;
    Ok(response)
}

/// Populates the server with randomized challenges and players, mirroring a
/// plausible competition shape: 3-15 players per challenge, occasional ties.
async fn generate_test_data(args: &Args) {
    let mut rng = rand::thread_rng();

    let mut challenges = Vec::with_capacity(args.challenges);
    while challenges.len() < args.challenges {
        let prefix = CHALLENGE_PREFIXES.choose(&mut rng).copied().unwrap_or("C");
        let name = format!("{}{}", prefix, rng.gen_range(1..1000));
        if !challenges.contains(&name) {
            challenges.push(name);
        }
    }

    info!("generating data for {} challenges", challenges.len());
    let mut total = 0usize;

    for challenge in &challenges {
        let num_players = rng.gen_range(3..=15);
        let mut players: Vec<&str> = FIRST_NAMES.to_vec();
        players.shuffle(&mut rng);
        players.truncate(num_players);

        for player in players {
            let mut score = rng.gen_range(1..=300);
            // 15% chance to land on a shared score so ties occur
            if rng.gen_bool(0.15) {
                score = *TIE_SCORES.choose(&mut rng).unwrap_or(&50);
            }
            let solution = SOLVE_TEMPLATES.choose(&mut rng).copied().unwrap_or("x");

            match send_score(&args.host, args.port, player, challenge, score, solution).await {
                Ok(_) => total += 1,
                Err(e) => warn!("failed to submit {player},{challenge},{score}: {e}"),
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    info!(
        "test data generation complete: {} entries across {} challenges",
        total,
        challenges.len()
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    if args.generate {
        generate_test_data(&args).await;
        return Ok(());
    }

    let response = send_score(
        &args.host,
        args.port,
        "TestUser",
        "Demo",
        42,
        "print('Hello World!')",
    )
    .await?;
    println!("{response}");
    Ok(())
}
