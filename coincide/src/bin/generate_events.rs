//! Generate a synthetic event index and run a sample correlation query.
//!
//! Usage:
//!     cargo run --release --bin generate-events -- --events 100000 --output /tmp/events
//!
//! Without `--output` the index lives in memory and is dropped on exit.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use coincide::{
    EventDocument, EventIndex, EventSchema, MatchCriteria, SearchOptions, TargetIdentifier, TimeWindowRequest,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

const USERS: &[&str] = &["ann", "bob", "carol", "dave", "erin", "frank", "grace", "heidi"];
const HOSTS: &[&str] = &["web-1", "web-2", "db-1", "cache-1"];

#[derive(Parser)]
#[command(name = "generate-events")]
#[command(about = "Build a synthetic event index and correlate one event against it")]
struct Cli {
    /// Index directory; in-memory when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of events to generate
    #[arg(short, long, default_value_t = 10_000)]
    events: usize,

    /// Events per commit (each commit adds a segment)
    #[arg(long, default_value_t = 2_500)]
    batch: usize,

    /// Events are spread over this many hours, starting 2024-01-01
    #[arg(long, default_value_t = 24)]
    span_hours: i64,

    /// Correlation window in milliseconds
    #[arg(long, default_value_t = coincide::DEFAULT_TIME_INTERVAL_MS)]
    time_interval: i64,

    /// Required value matches within one field
    #[arg(long, default_value_t = 1)]
    min_match: i64,

    /// RNG seed, for reproducible indices
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("coincide=debug"),
        _ => EnvFilter::new("coincide=trace"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn random_event(rng: &mut StdRng, i: usize, span_ms: i64) -> EventDocument {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let login = start + Duration::milliseconds(rng.gen_range(0..span_ms));
    let mut event = EventDocument::new(format!("evt-{i}"))
        .keyword("user", USERS[rng.gen_range(0..USERS.len())])
        .keyword("host", HOSTS[rng.gen_range(0..HOSTS.len())])
        .at("login_at", login);

    // Some sessions log in more than once
    for _ in 0..rng.gen_range(0..3) {
        let again = login + Duration::milliseconds(rng.gen_range(0..600_000));
        event = event.at("login_at", again);
    }
    event.at("logout_at", login + Duration::milliseconds(rng.gen_range(1_000..3_600_000)))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let schema = EventSchema::new(["user", "host"], ["login_at", "logout_at"])?;
    let index = match &cli.output {
        Some(path) => EventIndex::new(path, schema).with_context(|| format!("opening {}", path.display()))?,
        None => EventIndex::new_in_memory(schema)?,
    };

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let span_ms = cli.span_hours.max(1) * 3_600_000;
    let batch = cli.batch.max(1);

    println!("Generating {} events...", cli.events);
    let t0 = Instant::now();
    for i in 0..cli.events {
        index.add_event(&random_event(&mut rng, i, span_ms))?;
        if (i + 1) % batch == 0 {
            index.commit()?;
            println!("  {} / {}", i + 1, cli.events);
        }
    }
    index.commit()?;
    println!(
        "Indexed {} events in {} segments ({:.1}s)",
        index.num_docs(),
        index.num_segments(),
        t0.elapsed().as_secs_f64()
    );

    if cli.events == 0 {
        return Ok(());
    }

    let target = format!("evt-{}", rng.gen_range(0..cli.events));
    let criteria = MatchCriteria::parse(&["login_at", "logout_at"], cli.min_match, cli.time_interval)?;
    let request = TimeWindowRequest::new(TargetIdentifier::key(&target), criteria)?;

    let t1 = Instant::now();
    let keys = index.correlated_keys(&request, &SearchOptions::default(), &CancellationToken::new())?;
    println!(
        "{} events correlated with {} within {}ms ({:.1}ms)",
        keys.len(),
        target,
        cli.time_interval,
        t1.elapsed().as_secs_f64() * 1000.0
    );
    for key in keys.iter().take(10) {
        println!("  {key}");
    }
    Ok(())
}
