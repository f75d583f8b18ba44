use clap::Parser;
use flow_strata::config::StackConfig;
use flow_strata::stack::{NetworkStack, StackCounters};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

mod process;

use process::ReadSummary;

#[derive(Parser, Debug)]
#[command(name = "pcap-reader")]
#[command(about = "Feed a PCAP capture through a flow-strata network stack", long_about = None)]
struct Args {
    /// Path to the PCAP file to read
    #[arg(short, long, value_name = "FILE")]
    pcap: PathBuf,

    /// JSON stack configuration, flags below override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// flow inactivity timeout in seconds
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// maximum number of TCP flows
    #[arg(long, value_name = "N")]
    tcp_flows: Option<usize>,

    /// maximum number of UDP flows
    #[arg(long, value_name = "N")]
    udp_flows: Option<usize>,

    /// enable the byte frequency engine
    #[arg(short, long)]
    frequencies: bool,

    /// disable the NIDS engine
    #[arg(long)]
    no_nids: bool,

    /// print up to N flows per table at the end
    #[arg(long, value_name = "N")]
    show_flows: Option<usize>,

    /// dump one line per packet
    #[arg(short, long)]
    dump_packet: bool,

    /// print statistics at the end
    #[arg(short, long)]
    stats: bool,

    /// print a JSON counter snapshot at the end
    #[arg(short, long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    capture: ReadSummary,
    stack: StackCounters,
}

fn load_config(args: &Args) -> Result<StackConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read config {path:?}: {e}"))?;
            serde_json::from_str(&text).map_err(|e| format!("Invalid config {path:?}: {e}"))?
        }
        None => StackConfig::default(),
    };

    if let Some(secs) = args.timeout {
        config.flows_timeout = Duration::from_secs(secs);
    }
    if let Some(n) = args.tcp_flows {
        config.total_tcp_flows = n;
    }
    if let Some(n) = args.udp_flows {
        config.total_udp_flows = n;
    }
    if args.frequencies {
        config.enable_frequency_engine = true;
    }
    if args.no_nids {
        config.enable_nids_engine = false;
    }
    config.preallocated_flows = config
        .preallocated_flows
        .min(config.total_tcp_flows)
        .min(config.total_udp_flows);
    Ok(config)
}

fn run(args: &Args) -> Result<(), String> {
    let config = load_config(args)?;
    let mut stack = NetworkStack::new(config).map_err(|e| e.to_string())?;

    info!("Reading PCAP file: {:?}", args.pcap);
    let summary = process::process_pcap(&args.pcap, &mut stack, args.dump_packet)?;

    info!(
        "Total packets processed: {}, {:.3}M pkt/sec, {:.3} Gbps",
        summary.packets,
        summary.packets_per_sec() / 1_000_000.0,
        summary.gbps()
    );

    if let Some(limit) = args.show_flows {
        let mut out = String::new();
        stack
            .show_flows(&mut out, limit)
            .map_err(|e| format!("Failed to format flows: {e}"))?;
        print!("{out}");
    }
    if args.stats {
        println!("{}", stack.statistics());
    }
    if args.json {
        let report = Report {
            capture: summary,
            stack: stack.counters(),
        };
        let json = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{json}");
    }

    let drained = stack.drain_flows();
    info!(drained, "flows released");
    Ok(())
}

fn main() {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        error!("Failed to process PCAP file: {}", e);
        std::process::exit(1);
    }
    info!("PCAP processing completed!");
}
