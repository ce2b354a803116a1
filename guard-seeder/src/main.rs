mod telemetry;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use reqwest::Client;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use telemetry::{generate_reading, Fault};

/// Backfills a fleet of simulated machines through the ingestion endpoint.
#[derive(Debug, Parser)]
#[command(name = "guard-seeder", version)]
struct Args {
    /// Base URL of a running guard server
    #[arg(long, env = "SERVER_URL", default_value = "http://localhost:3000")]
    server: String,

    /// Machines are numbered from 2; 01 is the live feed device
    #[arg(long, env = "DEVICES", default_value_t = 15)]
    devices: u32,

    #[arg(long, env = "READINGS_PER_DEVICE", default_value_t = 50)]
    readings: u32,

    /// Machine numbers that get a fault profile
    #[arg(long, value_delimiter = ',', default_value = "6,7,9,12")]
    faulty: Vec<u32>,

    /// Minutes between consecutive backfilled readings
    #[arg(long, default_value_t = 15)]
    interval_minutes: i64,

    #[arg(long, default_value = "IND-MACHINE-")]
    prefix: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(
        "Seeding {} devices x {} readings into {}",
        args.devices.saturating_sub(1),
        args.readings,
        args.server
    );

    let client = Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("building HTTP client")?;
    let url = format!("{}/api/device/data", args.server.trim_end_matches('/'));
    let mut rng = rand::thread_rng();
    let now = Utc::now();

    let mut sent = 0u64;
    let mut failed = 0u64;

    for n in 2..=args.devices {
        let device_id = format!("{}{:02}", args.prefix, n);
        let fault = Fault::for_machine(n, &args.faulty);

        // Oldest first so the device ends on its newest state.
        for j in (0..args.readings).rev() {
            let ts = now - ChronoDuration::minutes(args.interval_minutes * j as i64);
            let reading = generate_reading(&mut rng, &device_id, ts, fault);

            match client.post(&url).json(&reading).send().await {
                Ok(resp) if resp.status().is_success() => sent += 1,
                Ok(resp) => {
                    failed += 1;
                    warn!("{} rejected reading: HTTP {}", device_id, resp.status());
                }
                Err(e) => {
                    failed += 1;
                    warn!("Failed to post reading for {}: {}", device_id, e);
                }
            }
        }
        info!("Seeded {} ({:?})", device_id, fault);
    }

    info!("Seeding complete: {} sent, {} failed", sent, failed);
    if sent == 0 && failed > 0 {
        bail!("server at {} accepted no readings", args.server);
    }
    Ok(())
}
