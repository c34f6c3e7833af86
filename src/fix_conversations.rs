/*
cargo run --release --bin fix_conversations -- \
    --input ShareGPT.json \
    --output ShareGPT_fixed.json
*/

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use mrqa_tools::{
    conversation,
    logging,
    repair::{self, RepairReport, Repairer},
};

const MAX_IDS_LISTED: usize = 20;
const TOP_TALLIES: usize = 10;

/// Drop unusable conversations and repair the turn lists of the rest.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON array of conversation records
    #[arg(long, default_value = "ShareGPT.json")]
    input: PathBuf,

    /// Repaired output (default: <input stem>_fixed.json)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not re-read and validate the written file
    #[arg(long = "skip-validate")]
    skip_validate: bool,

    #[arg(long = "log-dir", default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // ----- parse CLI --------------------------------------------------------
    let cli = Cli::parse();

    // ----- initialise logging -----------------------------------------------
    logging::init(&cli.log_dir, "fix_conversations", cli.verbose)?;

    let output = cli
        .output
        .clone()
        .unwrap_or_else(|| conversation::default_fixed_path(&cli.input));
    println!("Processing: {}", cli.input.display());
    println!("Repaired file: {}", output.display());
    info!("Started - input: {:?}, output: {:?}", cli.input, output);

    // ----- repair -----------------------------------------------------------
    let data = conversation::read_conversations(&cli.input)?;

    let pb = ProgressBar::new(data.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {pos}/{len} {wide_bar:.cyan/blue} {elapsed_precise}")?
            .progress_chars("=>-"),
    );
    let mut repairer = Repairer::new();
    let mut fixed = Vec::with_capacity(data.len());
    for conv in data {
        if let Some(conv) = repairer.repair(conv) {
            fixed.push(conv);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    let report = repairer.finish();

    // ----- write output -----------------------------------------------------
    conversation::write_conversations(&output, &fixed)?;
    info!("{} conversations written to {:?}", fixed.len(), output);
    print_summary(&report);

    if cli.skip_validate {
        return Ok(());
    }

    // ----- validate ---------------------------------------------------------
    println!("\nValidating: {}", output.display());
    let written = conversation::read_conversations(&output)?;
    let counts = repair::validate_fixed(&written);
    if counts.is_clean() {
        println!("✅ Validation passed, no issues found.");
        info!("Finished ✅");
        Ok(())
    } else {
        println!("❌ Validation failed, {} issues remain:", counts.total());
        for (category, n) in counts.nonzero() {
            println!("  - {category}: {n}");
        }
        error!("validation failed: {counts:?}");
        bail!("{} lingering issues in {}", counts.total(), output.display())
    }
}

fn print_summary(report: &RepairReport) {
    println!("Done!");
    println!("Conversations in input: {}", report.total_conversations);
    println!("Dropped (gpt turn without num_tokens): {}", report.missing_num_tokens.len());
    println!("Dropped (bing/bard/chatgpt speaker): {}", report.disallowed_speaker.len());
    println!("Conversations kept: {}", report.kept_conversations);
    println!("Empty turns removed: {}", report.empty_total());
    println!("System turns removed: {}", report.system_total());
    println!("Consecutive same-speaker turns removed: {}", report.consecutive_total());
    println!("Conversations with empty turns removed: {}", report.empty_removed.len());
    println!("Conversations with system turns removed: {}", report.system_removed.len());
    println!("Conversations with consecutive speakers fixed: {}", report.consecutive_removed.len());

    print_ids("Dropped for missing num_tokens", &report.missing_num_tokens);
    print_ids("Dropped for bing/bard/chatgpt speakers", &report.disallowed_speaker);
    print_tallies("Empty turns removed", &report.empty_removed);
    print_tallies("System turns removed", &report.system_removed);
    print_tallies("Consecutive speakers fixed", &report.consecutive_removed);
}

fn print_ids(title: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    println!("\n{title}:");
    for id in ids.iter().take(MAX_IDS_LISTED) {
        println!("  - {id}");
    }
    if ids.len() > MAX_IDS_LISTED {
        println!("  ... and {} more conversations", ids.len() - MAX_IDS_LISTED);
    }
}

fn print_tallies(title: &str, tallies: &IndexMap<String, usize>) {
    if tallies.is_empty() {
        return;
    }
    let mut sorted: Vec<(&String, &usize)> = tallies.iter().collect();
    // stable sort keeps first-seen order among equal counts
    sorted.sort_by(|a, b| b.1.cmp(a.1));

    println!("\n{title} (top {TOP_TALLIES} by count):");
    for (id, n) in sorted.iter().take(TOP_TALLIES) {
        println!("  - ID: {id}, removed: {n}");
    }
    if tallies.len() > TOP_TALLIES {
        println!("  ... and {} more conversations", tallies.len() - TOP_TALLIES);
    }
}
