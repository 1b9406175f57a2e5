//! TCP ingest server for score submissions.
//!
//! Per connection: `Connected -> Reading -> Dispatched -> Closed`. Lines are
//! read with a byte cap so a single client cannot grow memory unboundedly,
//! idle connections are closed after a timeout, and the connection is always
//! closed deterministically whatever the outcome.
//!
//! Backpressure is two-tier: a bounded semaphore caps how many submissions
//! are processed at once (waiters queue on `acquire`), and an admission bound
//! on top refuses connections outright once the waiting room is full, so
//! fan-in converts to bounded, predictable resource use.

use crate::processor::{SubmissionOutcome, SubmissionProcessor};
use crate::query::QueryService;
use log::{debug, error, info, warn};
use shared::config::Config;
use shared::scoring::ValidationError;
use shared::{MAX_CHALLENGE_LEN, MAX_NAME_LEN};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Idle/read timeout per connection.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connections allowed to wait for a processing slot before new ones are
/// refused outright.
const WAITING_ROOM: usize = 64;

/// Result of one bounded line read.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// Peer closed the connection.
    Eof,
    /// A complete line is in the buffer (newline stripped by the caller).
    Line,
    /// The line exceeded the byte cap; the connection should be dropped.
    Oversized,
}

/// Reads one newline-terminated line into `buf`, never buffering more than
/// `max` bytes plus the newline. A partial line cut off by a disconnect is
/// discarded, not processed.
async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut limited = reader.take((max + 1) as u64);
    let n = limited.read_until(b'\n', buf).await?;
    if buf.last() != Some(&b'\n') {
        if n > max {
            return Ok(LineRead::Oversized);
        }
        return Ok(LineRead::Eof);
    }
    Ok(LineRead::Line)
}

/// Consumes input up to the end of an oversized line (bounded to `cap`
/// bytes), so the error reply is not lost to a connection reset caused by
/// unread data. Returns once a newline is seen, EOF is hit, or the cap runs
/// out.
async fn discard_rest_of_line<R>(reader: &mut R, cap: usize) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut remaining = cap;
    while remaining > 0 {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let n = available.len().min(remaining);
                reader.consume(n);
                remaining -= n;
            }
        }
    }
    Ok(())
}

/// Welcome banner sent to every client; the format hint depends on whether
/// solutions are required.
fn welcome_banner(config: &Config) -> String {
    let format_msg = if config.submission.require_solutions {
        "name,challenge,score,solve_code"
    } else {
        "name,challenge,score[,solve_code]"
    };
    format!(
        "Welcome to {}! Please submit your score in format: {}\n",
        config.ctf_name, format_msg
    )
}

pub struct IngestServer {
    processor: Arc<SubmissionProcessor>,
    query: Arc<QueryService>,
    welcome: String,
    max_line_bytes: usize,
    inflight: Arc<Semaphore>,
    admission: Arc<Semaphore>,
}

impl IngestServer {
    pub fn new(
        processor: Arc<SubmissionProcessor>,
        query: Arc<QueryService>,
        config: &Config,
        max_inflight: usize,
    ) -> Self {
        // Field limits are in characters while the read cap is in bytes, so
        // allow the UTF-8 worst case of 4 bytes per character; score digits
        // and commas get a fixed allowance on top.
        let max_line_bytes =
            (config.submission.max_solution_length + MAX_NAME_LEN + MAX_CHALLENGE_LEN) * 4 + 32;
        Self {
            processor,
            query,
            welcome: welcome_banner(config),
            max_line_bytes,
            inflight: Arc::new(Semaphore::new(max_inflight)),
            admission: Arc::new(Semaphore::new(max_inflight + WAITING_ROOM)),
        }
    }

    /// Accept loop; spawns one task per connection.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        info!("ingest server listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                server.handle_connection(stream, peer).await;
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        debug!("client connected: {peer}");

        let _admit = match self.admission.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("refusing connection from {peer}: server at capacity");
                let _ = stream
                    .write_all(b"Error: server busy, try again later\n")
                    .await;
                let _ = stream.shutdown().await;
                return;
            }
        };

        if let Err(e) = self.serve_client(&mut stream, peer).await {
            debug!("transport error with {peer}: {e}");
        }
        let _ = stream.shutdown().await;
        debug!("client disconnected: {peer}");
    }

    /// Reads submission lines until disconnect, idle timeout, or a fatal
    /// input error. Each line produces exactly one reply.
    async fn serve_client(&self, stream: &mut TcpStream, peer: SocketAddr) -> io::Result<()> {
        let (read_half, mut write_half) = stream.split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(self.welcome.as_bytes()).await?;

        let mut buf = Vec::with_capacity(1024);
        loop {
            let read = match timeout(
                IDLE_TIMEOUT,
                read_bounded_line(&mut reader, &mut buf, self.max_line_bytes),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    debug!("closing idle connection from {peer}");
                    break;
                }
            };

            match read {
                LineRead::Eof => break,
                LineRead::Oversized => {
                    warn!("oversized line from {peer}");
                    let reply = format!("Error: {}\n", ValidationError::LineTooLong);
                    write_half.write_all(reply.as_bytes()).await?;
                    let _ = timeout(
                        IDLE_TIMEOUT,
                        discard_rest_of_line(&mut reader, 64 * 1024),
                    )
                    .await;
                    break;
                }
                LineRead::Line => {
                    let Ok(text) = std::str::from_utf8(&buf) else {
                        let reply = format!("Error: {}\n", ValidationError::InvalidEncoding);
                        write_half.write_all(reply.as_bytes()).await?;
                        break;
                    };
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let response = self.dispatch(text, peer).await;
                    write_half.write_all(response.as_bytes()).await?;
                }
            }
        }
        Ok(())
    }

    /// Runs one submission through the processor under the concurrency
    /// ceiling and renders the wire reply.
    async fn dispatch(&self, line: &str, peer: SocketAddr) -> String {
        let permit = match self.inflight.acquire().await {
            Ok(permit) => permit,
            Err(_) => return "Error: server shutting down\n".to_string(),
        };
        let origin = peer.ip().to_string();
        let outcome = self.processor.process(line, Some(&origin)).await;
        drop(permit);

        match outcome {
            Ok(SubmissionOutcome::Accepted { id, challenge }) => {
                match self.query.scoreboard_text(&challenge).await {
                    Ok(text) => text,
                    Err(e) => {
                        error!("scoreboard read after accept failed: {e}");
                        format!("OK: submission {} recorded\n", id.0)
                    }
                }
            }
            Ok(SubmissionOutcome::Rejected(e)) => format!("Error: {e}\n"),
            Err(e) => {
                error!("storage fault while processing submission from {peer}: {e}");
                "Error: server error occurred, submission not recorded\n".to_string()
            }
        }
    }
}
