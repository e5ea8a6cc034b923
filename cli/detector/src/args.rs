//! CLI argument definitions for tl-detector.

use clap::Parser;
use std::path::PathBuf;
pub use tl_cli_common::LogLevel;

/// Scores newline-delimited network events for threats.
///
/// Reads JSON events (optionally gzip or zstd compressed), scores every
/// payload, labels it against the threshold and writes one JSON line per
/// event in input order.
///
/// ## Examples
///
/// Run with defaults:
///   tl-detector -i data/network_traffic.jsonl
///
/// Use a config file and append to an existing result file:
///   tl-detector -c detector.yaml --append
#[derive(Parser, Debug)]
#[command(name = "tl-detector")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short = 'c', long, env = "TL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Input file (overrides the config file)
    #[arg(short = 'i', long)]
    pub input: Option<PathBuf>,

    /// Output file (overrides the config file)
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Append to the output file instead of replacing it
    #[arg(long)]
    pub append: bool,

    /// Malicious threshold in [0, 1] (overrides the config file)
    #[arg(short = 't', long)]
    pub threshold: Option<f64>,

    /// Print final statistics as JSON to stdout
    #[arg(long)]
    pub stats_json: bool,

    /// Log level
    #[arg(short = 'l', long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}
