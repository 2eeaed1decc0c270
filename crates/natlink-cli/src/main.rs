//! natlink CLI
//!
//! NAT classification, connectivity advice and UDP hole punching from the shell.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use natlink_traversal::{
    DetectionResult, HolePunchError, NatBehavior, NatTraversal, NatType, should_use_turn,
};
use std::net::SocketAddrV4;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{Spinner, format_probability, format_rtt};

/// natlink - find your NAT, then get through it
#[derive(Parser)]
#[command(name = "natlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify the local NAT
    Detect {
        /// Ignore the cached classification
        #[arg(short, long)]
        force: bool,

        /// Print the full result, evidence included, as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check every configured STUN server
    Servers,

    /// Probe one server repeatedly for symmetric NAT behavior
    Symmetric,

    /// Recommend a connection method for a peer
    Advise {
        /// Peer NAT type (open, full-cone, restricted, port-restricted, symmetric)
        #[arg(long)]
        peer_nat: Option<NatType>,
    },

    /// Punch a UDP path to a peer
    Punch {
        /// Peer public endpoint (ip:port)
        #[arg(required = true)]
        peer: SocketAddrV4,

        /// Peer NAT type, if known
        #[arg(long)]
        peer_nat: Option<NatType>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let traversal = NatTraversal::new(config.traversal)?;

    match cli.command {
        Commands::Detect { force, json } => detect(&traversal, force, json).await?,
        Commands::Servers => check_servers(&traversal).await,
        Commands::Symmetric => symmetric(&traversal).await,
        Commands::Advise { peer_nat } => advise(&traversal, peer_nat).await,
        Commands::Punch { peer, peer_nat } => punch(&traversal, peer, peer_nat).await?,
    }

    Ok(())
}

/// Classify and print the local NAT
async fn detect(traversal: &NatTraversal, force: bool, json: bool) -> anyhow::Result<()> {
    let spinner = Spinner::new("Classifying NAT...");
    let result = traversal.detect_nat_type(force).await;
    spinner.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(result.as_ref())?);
        return Ok(());
    }

    print_detection(&result);
    Ok(())
}

fn print_detection(result: &DetectionResult) {
    let behavior = &result.behavior;
    println!("NAT type: {}", behavior.nat_type);
    println!("  Mapping: {:?}", behavior.mapping);
    match result.evidence.filtering_basis {
        Some(basis) => println!("  Filtering: {:?} ({basis:?})", behavior.filtering),
        None => println!("  Filtering: {:?}", behavior.filtering),
    }
    match result.public_endpoint {
        Some(endpoint) => println!("  Public endpoint: {endpoint}"),
        None => println!("  Public endpoint: unknown"),
    }
    if let Some(server) = &result.evidence.responding_server {
        println!("  Answered by: {server}");
    }
    println!("  Relay advised: {}", should_use_turn(result));

    for note in &result.evidence.notes {
        println!("  Note: {note}");
    }
}

/// Health-check every configured STUN server
async fn check_servers(traversal: &NatTraversal) {
    let spinner = Spinner::new("Querying STUN servers...");
    let results = traversal.probe_servers().await;
    spinner.finish_and_clear();

    println!("STUN servers:");
    for probe in &results {
        match &probe.result {
            Ok(reply) => println!(
                "  {:<32} ok     {:<22} {}",
                probe.server.to_string(),
                reply.mapped.to_string(),
                format_rtt(probe.elapsed)
            ),
            Err(e) => println!("  {:<32} FAILED {e}", probe.server.to_string()),
        }
    }

    let healthy = results.iter().filter(|p| p.result.is_ok()).count();
    println!();
    println!("{healthy}/{} servers reachable", results.len());
}

/// Repeated-probe symmetric check
async fn symmetric(traversal: &NatTraversal) {
    let spinner = Spinner::new("Probing for symmetric NAT...");
    let report = traversal.detect_symmetric().await;
    spinner.finish_and_clear();

    let Some(report) = report else {
        println!("No STUN servers configured");
        return;
    };

    let ports: Vec<String> = report
        .samples
        .iter()
        .map(|s| s.mapped_port.to_string())
        .collect();
    println!("Likely symmetric: {}", report.likely_symmetric);
    if let Some(signal) = report.signal {
        println!("  Signal: {signal:?}");
    }
    if report.is_heuristic() {
        println!("  (timing heuristic only, may be a false positive)");
    }
    println!("  Mapped ports: {}", ports.join(", "));
    println!("  Failed probes: {}", report.failures);
    if let Some(variance) = report.timing_variance_ms2 {
        println!("  Timing variance: {variance:.1} ms²");
    }
}

/// Recommend a connection method
async fn advise(traversal: &NatTraversal, peer_nat: Option<NatType>) {
    let peer = peer_nat.map(NatBehavior::from_nat_type);
    let report = traversal.recommend(peer.as_ref()).await;

    println!("Recommended: {}", report.recommended_method);
    println!("  Compatible: {}", report.compatible);
    println!(
        "  Success probability: {}",
        format_probability(report.success_probability)
    );
    println!("  {}", report.notes);
}

/// Punch a path to `peer`; Ctrl+C cancels and releases the socket
async fn punch(
    traversal: &NatTraversal,
    peer: SocketAddrV4,
    peer_nat: Option<NatType>,
) -> anyhow::Result<()> {
    let peer_behavior = peer_nat.map(NatBehavior::from_nat_type);
    let spinner = Spinner::new(&format!("Punching to {peer}..."));

    let result = tokio::select! {
        result = traversal.establish_hole_punch(peer, peer_behavior.as_ref()) => result,
        _ = tokio::signal::ctrl_c() => Err(HolePunchError::Cancelled),
    };

    match result {
        Ok(outcome) => {
            spinner.finish_and_clear();
            println!("Established {} <-> {}", outcome.local, outcome.remote);
            println!("  Strategy: {}", outcome.strategy);
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message(format!("Punch to {peer} failed"));
            let relays = traversal.turn_servers();
            if relays.is_empty() {
                println!("Fall back to a relay (none configured)");
            } else {
                println!("Fall back to a relay: {}", relays.join(", "));
            }
            Err(e.into())
        }
    }
}
