//! tl-detector CLI
//!
//! Runs the threat detection pipeline over a local event file.

use clap::Parser;
use tl_cli_common::{format_bytes, format_duration, format_number, init_logging};
use tl_pipeline::StatsSnapshot;

mod args;
mod run;

use args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Initialize logging (to stderr, so stdout is clean for output)
    init_logging(args.log_level)?;
    let stats_json = args.stats_json;

    match run::execute(args).await {
        Ok(stats) => {
            report(&stats);
            if stats_json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

/// Report results to stderr.
fn report(stats: &StatsSnapshot) {
    eprintln!();
    eprintln!("Detection completed:");
    eprintln!("  Lines read:      {}", format_number(stats.lines_read));
    eprintln!("  Skipped:         {}", format_number(stats.records_skipped));
    eprintln!("  Records written: {}", format_number(stats.records_written));
    eprintln!(
        "  Labels:          {} malicious, {} benign, {} unknown",
        format_number(stats.malicious),
        format_number(stats.benign),
        format_number(stats.unknown)
    );
    eprintln!("  Bytes read:      {}", format_bytes(stats.bytes_read));
    eprintln!("  Bytes written:   {}", format_bytes(stats.bytes_written));

    if let Some(duration) = stats.duration().and_then(|d| d.to_std().ok()) {
        eprintln!("  Duration:        {}", format_duration(duration));
    }
    if let Some(rate) = stats.records_per_second() {
        eprintln!(
            "  Throughput:      {} records/sec",
            format_number(rate as u64)
        );
    }

    let inference = &stats.inference;
    if inference.retries > 0 || inference.chunks_exhausted > 0 || inference.circuit_rejections > 0 {
        eprintln!(
            "  Inference:       {} calls, {} retries, {} chunks degraded, {} rejected by breaker",
            format_number(inference.calls),
            format_number(inference.retries),
            format_number(inference.chunks_exhausted),
            format_number(inference.circuit_rejections)
        );
    }
}
