//! hotfn-sim — replays a timed event stream against a load balancer.
//!
//! The simulator clears the fleet through the balancer's `/clear`, then
//! fires every event at its offset on its own task, so invocations overlap
//! exactly as the stream describes. Each completion prints
//! `(<s>s) <name> in <ms>ms [<status>]`; with a log file every call is
//! also recorded as `start_ms end_ms name body`.

pub mod events;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, warn};

use hotfn_api::client;
use hotfn_core::epoch_millis;

pub use events::{Event, EventError, load_events, parse_events};

/// Outcome of one simulated invocation.
#[derive(Debug, Clone)]
pub struct Record {
    pub event: Event,
    pub start_ms: i64,
    pub end_ms: i64,
    /// HTTP status line, or the transport error.
    pub status: String,
    pub ok: bool,
    pub body: String,
}

impl Record {
    pub fn latency_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Totals over a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub invocations: usize,
    pub failures: usize,
    pub mean_latency_ms: f64,
}

impl Summary {
    fn from_records(records: &[Record]) -> Self {
        let invocations = records.len();
        let failures = records.iter().filter(|r| !r.ok).count();
        let mean_latency_ms = if invocations == 0 {
            0.0
        } else {
            records.iter().map(|r| r.latency_ms() as f64).sum::<f64>() / invocations as f64
        };
        Self {
            invocations,
            failures,
            mean_latency_ms,
        }
    }
}

/// Run `events` against the balancer at `lb_url` and wait for all of them.
pub async fn run_simulation(
    lb_url: &str,
    events: Vec<Event>,
    log_path: Option<&Path>,
) -> anyhow::Result<Summary> {
    let lb_url = lb_url.trim_end_matches('/').to_string();

    let cleared = client::get(&format!("{lb_url}/clear"), None)
        .await
        .context("failed to clear the fleet")?;
    if !cleared.status.is_success() {
        bail!("clear returned {}: {}", cleared.status, cleared.text());
    }
    info!(events = events.len(), %lb_url, "simulation started");

    let origin = Instant::now();
    let tasks = events.into_iter().map(|event| {
        let lb_url = lb_url.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(origin + Duration::from_millis(event.start_ms)).await;
            let record = invoke(&lb_url, event).await;
            println!(
                "({}s) {} in {}ms [{}]",
                record.event.start_ms / 1000,
                record.event.function,
                record.latency_ms(),
                record.status
            );
            record
        })
    });

    let mut records = Vec::new();
    for joined in join_all(tasks).await {
        match joined {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "simulation task failed"),
        }
    }

    if let Some(path) = log_path {
        write_log(path, &records)
            .with_context(|| format!("failed to write log {}", path.display()))?;
    }

    let summary = Summary::from_records(&records);
    info!(
        invocations = summary.invocations,
        failures = summary.failures,
        mean_latency_ms = summary.mean_latency_ms,
        "simulation finished"
    );
    Ok(summary)
}

async fn invoke(lb_url: &str, event: Event) -> Record {
    let url = format!("{lb_url}/execute?name={}", urlencoding::encode(&event.function));
    let start_ms = epoch_millis();
    let result = client::get(&url, None).await;
    let end_ms = epoch_millis();

    match result {
        Ok(resp) => Record {
            start_ms,
            end_ms,
            status: resp.status.to_string(),
            ok: resp.status.is_success(),
            body: resp.text(),
            event,
        },
        Err(e) => Record {
            start_ms,
            end_ms,
            status: format!("error: {e}"),
            ok: false,
            body: String::new(),
            event,
        },
    }
}

fn write_log(path: &Path, records: &[Record]) -> std::io::Result<()> {
    let mut ordered: Vec<&Record> = records.iter().collect();
    ordered.sort_by_key(|r| r.end_ms);

    let mut out = BufWriter::new(File::create(path)?);
    for r in ordered {
        writeln!(out, "{} {} {} {}", r.start_ms, r.end_ms, r.event.function, r.body)?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::routing::get;

    use super::*;

    async fn fake_balancer(clears: Arc<AtomicUsize>) -> String {
        let router = Router::new()
            .route(
                "/clear",
                get(move || {
                    let clears = clears.clone();
                    async move {
                        clears.fetch_add(1, Ordering::SeqCst);
                        "{\"nodes\":[]}"
                    }
                }),
            )
            .route(
                "/execute",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    match params.get("name").map(String::as_str) {
                        Some("broken") => (StatusCode::INTERNAL_SERVER_ERROR, "{\"error\":true}".to_string()),
                        Some(name) => (StatusCode::OK, format!("{{\"ran\":\"{name}\"}}")),
                        None => (StatusCode::BAD_REQUEST, String::new()),
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn replays_events_and_writes_log() {
        let clears = Arc::new(AtomicUsize::new(0));
        let lb = fake_balancer(clears.clone()).await;
        let events = parse_events("0,resize\n20,thumb\n40,broken\n").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("sim.log");
        let summary = run_simulation(&lb, events, Some(&log)).await.unwrap();

        assert_eq!(clears.load(Ordering::SeqCst), 1);
        assert_eq!(summary.invocations, 3);
        assert_eq!(summary.failures, 1);
        assert!(summary.mean_latency_ms >= 0.0);

        let content = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let resize = lines.iter().find(|l| l.contains(" resize ")).unwrap();
        let fields: Vec<&str> = resize.splitn(4, ' ').collect();
        assert!(fields[0].parse::<i64>().unwrap() <= fields[1].parse::<i64>().unwrap());
        assert_eq!(fields[3], "{\"ran\":\"resize\"}");
    }

    #[tokio::test]
    async fn unreachable_balancer_is_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = run_simulation(&format!("http://{addr}"), Vec::new(), None).await;
        assert!(result.is_err());
    }

    #[test]
    fn empty_summary_has_zero_mean() {
        let summary = Summary::from_records(&[]);
        assert_eq!(summary.invocations, 0);
        assert_eq!(summary.mean_latency_ms, 0.0);
    }
}
