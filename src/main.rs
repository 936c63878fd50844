mod aggregate;
mod catalog;
mod config;
mod error;
mod geo;
mod locator;
mod probe;
mod runner;
mod scoring;
mod selection;
mod session;
mod traits;
mod types;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::Settings;
use probe::Iperf3Probe;
use session::{Plan, Session};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use traits::ThroughputProbe;
use types::TestResult;

#[derive(Parser)]
#[command(name = "netblast")]
#[command(about = "Geo-aware multi-server network benchmark (iperf3)", long_about = None)]
struct Cli {
    /// Settings file (TOML). Defaults to ~/.config/netblast/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// IP geolocation endpoint
    #[arg(long, global = true, value_name = "URL")]
    geo_url: Option<String>,

    /// Show debug logs on stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected self location
    Locate,
    /// Choose test servers without running any tests
    Plan(SelectArgs),
    /// Test throughput against the selected servers and rank them
    Run {
        #[command(flatten)]
        select: SelectArgs,

        /// Test duration per attempt in seconds
        #[arg(long, value_name = "SECS")]
        duration: Option<u64>,

        /// Print ranked results as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct SelectArgs {
    /// Local bandwidth from a previous speed test, in Mbps (0 = unknown)
    #[arg(long, value_name = "MBPS")]
    bandwidth: Option<f64>,

    /// Maximum number of servers to test
    #[arg(long, value_name = "N")]
    max_servers: Option<usize>,

    /// iperf3 server list feed
    #[arg(long, value_name = "URL")]
    feed_url: Option<String>,
}

impl SelectArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(n) = self.max_servers {
            if n > config::MAX_SERVERS {
                eprintln!("Testing at most {} servers at once.", config::MAX_SERVERS);
            }
            settings.max_servers = n.clamp(1, config::MAX_SERVERS);
            settings.fallback_pool = settings.fallback_pool.max(settings.max_servers);
        }
        if let Some(ref url) = self.feed_url {
            settings.feed_url = url.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(url) = cli.geo_url {
        settings.geo_url = url;
    }

    match cli.command {
        Commands::Locate => handle_locate(settings).await?,
        Commands::Plan(select) => {
            select.apply(&mut settings);
            handle_plan(settings, select.bandwidth).await?
        }
        Commands::Run {
            select,
            duration,
            json,
        } => {
            select.apply(&mut settings);
            if let Some(secs) = duration {
                settings.test_duration_secs = secs;
            }
            handle_run(settings.sanitized(), select.bandwidth, json).await?
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "netblast=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

// --- Handlers ---

async fn handle_locate(settings: Settings) -> Result<()> {
    let session = Session::new(settings)?;
    let loc = session.locate().await.context("could not determine self location")?;

    println!(
        "Self location: {}, {}, {} ({:.4}, {:.4})",
        loc.city, loc.region, loc.country, loc.latitude, loc.longitude
    );
    if !loc.ip.is_empty() {
        println!("Public IP: {}", loc.ip);
    }
    Ok(())
}

async fn handle_plan(settings: Settings, bandwidth: Option<f64>) -> Result<()> {
    let session = Session::new(settings)?;

    println!("Getting self location and server list...");
    let plan = session.plan(bandwidth).await.context("netblast aborted")?;
    print_plan(&plan);
    Ok(())
}

async fn handle_run(settings: Settings, bandwidth: Option<f64>, json: bool) -> Result<()> {
    let probe = Iperf3Probe::new(&settings);
    if let Err(e) = probe.ensure_available() {
        eprintln!("Consider installing iperf3, e.g. 'sudo apt install iperf3'.");
        return Err(e).context("cannot run netblast");
    }

    let session = Session::new(settings)?;

    if !json {
        println!("Getting self location and server list...");
    }
    let plan = session.plan(bandwidth).await.context("netblast aborted")?;

    if json {
        let results = session.execute(&plan, &probe, false).await;
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    print_plan(&plan);
    if plan.is_empty() {
        return Ok(());
    }

    println!("Running parallel {} tests...", probe.name());
    let results = session.execute(&plan, &probe, true).await;

    println!(); // Newline after progress bar
    print_results(&results);

    Ok(())
}

// --- Output ---

fn print_plan(plan: &Plan) {
    let origin = &plan.origin;
    println!(
        "Self location: {}, {}, {} ({:.4}, {:.4})",
        origin.city, origin.region, origin.country, origin.latitude, origin.longitude
    );
    println!(
        "Estimated connection speed: {:.2} Mbps ({:.2} Gbps)",
        plan.user_bandwidth_mbps,
        plan.user_bandwidth_mbps / 1000.0
    );

    if plan.is_empty() {
        println!(
            "No eligible servers ({} usable entries in the server list).",
            plan.catalog_size
        );
        return;
    }

    println!("Selected {} servers:", plan.selected.len());
    for (i, c) in plan.selected.iter().enumerate() {
        println!(
            "  {}. {} ({}) - {} km - {} ({:.0} Gbps) - score {:.1}",
            i + 1,
            c.server.location(),
            c.server.host,
            c.distance_km,
            c.server.provider,
            c.server.advertised_bandwidth_gbps,
            c.score
        );
    }
}

fn format_mbps(value: f64) -> String {
    if value > 0.0 {
        format!("{:.2}", value)
    } else {
        "N/A".to_string()
    }
}

fn print_results(results: &[TestResult]) {
    println!(
        "{:<4} {:<24} {:<30} {:<10} {:>15} {:>15}",
        "RANK", "LOCATION", "HOST", "CAPACITY", "DOWNLOAD (Mbps)", "UPLOAD (Mbps)"
    );
    println!("{}", "-".repeat(103));

    for r in results {
        let capacity = if r.capacity.is_empty() {
            "Unknown".to_string()
        } else {
            format!("{} Gbps", r.capacity)
        };

        println!(
            "{:<4} {:<24} {:<30} {:<10} {:>15} {:>15}",
            r.rank,
            r.location,
            format!("{}:{}", r.host, r.port),
            capacity,
            format_mbps(r.download_mbps),
            format_mbps(r.upload_mbps)
        );
    }
    println!("{}", "-".repeat(103));

    let failed = results.iter().filter(|r| !r.has_download()).count();
    if failed > 0 {
        println!("{} of {} servers could not be measured.", failed, results.len());
    }
}
