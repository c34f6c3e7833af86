/*
cargo run --release --bin analyze_requests -- \
    --file requests.jsonl \
    --group-size 5 \
    --output-dir analysis_results
*/

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use mrqa_tools::{logging, report, requests};

/// Per-group dispersion statistics (Gini, CV, MAD) over a requests.jsonl log.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON Lines file with kv_cache_tokens / new_tokens per request
    #[arg(long, default_value = "requests.jsonl")]
    file: PathBuf,

    /// Number of consecutive requests per group
    #[arg(long = "group-size", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    group_size: u64,

    /// Where request_stats.csv is written (created if missing)
    #[arg(long = "output-dir", default_value = "analysis_results")]
    output_dir: PathBuf,

    #[arg(long = "log-dir", default_value = "logs")]
    log_dir: PathBuf,

    /// Debug output on the terminal
    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // ----- parse CLI --------------------------------------------------------
    let cli = Cli::parse();

    // ----- initialise logging -----------------------------------------------
    let log_path = logging::init(&cli.log_dir, "analyze_requests", cli.verbose)?;

    println!("Analyzing file: {}", cli.file.display());
    println!("Group size: {}", cli.group_size);
    info!("Started - file: {:?}, group_size: {}, log: {:?}", cli.file, cli.group_size, log_path);

    // ----- load requests ----------------------------------------------------
    let file = File::open(&cli.file).with_context(|| format!("Reading {}", cli.file.display()))?;
    let loaded = requests::load_requests(BufReader::new(file))
        .with_context(|| format!("Loading {}", cli.file.display()))?;
    if !loaded.skipped_lines.is_empty() {
        warn!("{} unparseable lines skipped", loaded.skipped_lines.len());
    }

    // ----- grouped statistics -----------------------------------------------
    let rows = requests::compute_grouped_stats(&loaded.records, cli.group_size as usize)
        .with_context(|| format!("Analyzing {}", cli.file.display()))?;

    // ----- write CSV + report -----------------------------------------------
    fs::create_dir_all(&cli.output_dir)
        .with_context(|| format!("Creating {}", cli.output_dir.display()))?;
    let csv_path = cli.output_dir.join(report::STATS_CSV_NAME);
    let out = File::create(&csv_path).with_context(|| format!("Writing {}", csv_path.display()))?;
    report::write_csv(&rows, BufWriter::new(out))
        .with_context(|| format!("Writing {}", csv_path.display()))?;
    println!("Statistics saved to: {}", csv_path.display());

    for line in report::dispersion_lines(&rows) {
        debug!("{line}");
    }

    // compute_grouped_stats always ends with the Global row
    if let Some(global) = rows.last() {
        println!();
        for line in report::global_summary(global) {
            println!("{line}");
        }
        println!();
        for line in report::interpret(global) {
            println!("{line}");
        }
    }

    info!("Finished - {} groups written", rows.len() - 1);
    Ok(())
}
