//! CPU profiling
//!
//! Provides on-demand CPU profiles in pprof protobuf format and an optional
//! continuous profiler that pushes collapsed stacks to a Pyroscope-compatible
//! collector. Only one profiler can sample the process at a time.

use chrono::Utc;
use pprof::{ProfilerGuardBuilder, Report};
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ExporterError, Result};

/// Default length of an on-demand profile
pub const DEFAULT_PROFILE_SECONDS: u64 = 30;
/// Upper bound for an on-demand profile
pub const MAX_PROFILE_SECONDS: u64 = 300;

/// Samples per second
const SAMPLE_FREQUENCY: i32 = 100;
/// Length of each continuous profiling window
const PUSH_WINDOW: Duration = Duration::from_secs(10);
/// How often a running sampler checks for shutdown
const STOP_POLL: Duration = Duration::from_millis(100);
const BLOCKLIST: &[&str] = &["libc", "libgcc", "pthread", "vdso"];

/// Clamp a requested profile length to the supported range
pub fn profile_duration(seconds: Option<u64>) -> Duration {
    let seconds = seconds
        .unwrap_or(DEFAULT_PROFILE_SECONDS)
        .clamp(1, MAX_PROFILE_SECONDS);
    Duration::from_secs(seconds)
}

/// Sample the process for `duration`, blocking the calling thread
///
/// Sampling ends early once `stop` reads true; the report then covers the
/// time sampled so far.
fn sample(duration: Duration, stop: &watch::Receiver<bool>) -> Result<Report> {
    let guard = ProfilerGuardBuilder::default()
        .frequency(SAMPLE_FREQUENCY)
        .blocklist(BLOCKLIST)
        .build()?;

    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || *stop.borrow() {
            break;
        }
        std::thread::sleep(remaining.min(STOP_POLL));
    }

    Ok(guard.report().build()?)
}

/// Capture a CPU profile and encode it as a pprof protobuf
///
/// The capture is cut short when `stop` flips to true.
pub async fn cpu_profile(duration: Duration, stop: watch::Receiver<bool>) -> Result<Vec<u8>> {
    debug!(seconds = duration.as_secs(), "Capturing CPU profile");
    tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        let profile = sample(duration, &stop)?.pprof()?;
        Ok(prost::Message::encode_to_vec(&profile))
    })
    .await?
}

/// Join one stack, root first, into a collapsed-stack line
fn fold_stack<'a>(thread: &str, frames_leaf_first: impl DoubleEndedIterator<Item = &'a str>) -> String {
    let mut line = String::from(if thread.is_empty() { "unknown" } else { thread });
    for frame in frames_leaf_first.rev() {
        line.push(';');
        line.push_str(frame);
    }
    line
}

/// Render a report in collapsed-stack ("folded") format
pub fn render_folded(report: &Report) -> String {
    let mut out = String::new();
    for (frames, count) in &report.data {
        let names: Vec<String> = frames
            .frames
            .iter()
            .flat_map(|symbols| symbols.iter().map(|s| s.name()))
            .collect();
        let line = fold_stack(&frames.thread_name, names.iter().map(String::as_str));
        let _ = writeln!(out, "{line} {count}");
    }
    out
}

/// Background task pushing CPU samples to a profiling collector
pub struct ContinuousProfiler {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ContinuousProfiler {
    /// Start pushing profiles for `app_name` to the collector at `addr`
    pub fn start(addr: &str, app_name: &str) -> Result<Self> {
        let ingest_url = ingest_url(addr)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        info!(url = %ingest_url, "Starting continuous profiling");
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(push_loop(
            client,
            ingest_url,
            format!("{app_name}.cpu"),
            stop_rx,
        ));
        Ok(Self { stop, task })
    }

    /// Stop pushing; a window in progress is dropped
    ///
    /// The sampling thread notices within 100ms and exits.
    pub fn stop(self) {
        let _ = self.stop.send(true);
        self.task.abort();
    }
}

fn ingest_url(addr: &str) -> Result<reqwest::Url> {
    let url = format!("{}/ingest", addr.trim_end_matches('/'));
    reqwest::Url::parse(&url).map_err(|e| ExporterError::InvalidAddress(format!("{addr}: {e}")))
}

async fn push_loop(
    client: reqwest::Client,
    url: reqwest::Url,
    name: String,
    stop: watch::Receiver<bool>,
) {
    while !*stop.borrow() {
        let from = Utc::now().timestamp();
        let window_stop = stop.clone();
        let folded = tokio::task::spawn_blocking(move || {
            sample(PUSH_WINDOW, &window_stop).map(|r| render_folded(&r))
        })
        .await;
        let until = Utc::now().timestamp();

        let body = match folded {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to sample CPU profile");
                tokio::time::sleep(PUSH_WINDOW).await;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "CPU sampling task failed");
                continue;
            }
        };

        if let Err(e) = upload(&client, &url, &name, from, until, body).await {
            warn!(error = %e, "Failed to upload CPU profile");
        }
    }
}

async fn upload(
    client: &reqwest::Client,
    url: &reqwest::Url,
    name: &str,
    from: i64,
    until: i64,
    body: String,
) -> Result<()> {
    let query = [
        ("name", name.to_string()),
        ("from", from.to_string()),
        ("until", until.to_string()),
        ("format", "folded".to_string()),
        ("sampleRate", SAMPLE_FREQUENCY.to_string()),
        ("spyName", "pprof-rs".to_string()),
        ("units", "samples".to_string()),
        ("aggregationType", "sum".to_string()),
    ];

    client
        .post(url.clone())
        .query(&query)
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
