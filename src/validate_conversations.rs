/*
cargo run --release --bin validate_conversations -- \
    --input ShareGPT_fixed.json
*/

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use log::info;
use mrqa_tools::{conversation, logging, repair};

/// Check that a repaired conversation file has no empty, system,
/// disallowed-speaker, consecutive-speaker or missing-num_tokens turns left.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long)]
    input: PathBuf,

    #[arg(long = "log-dir", default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // ----- parse CLI --------------------------------------------------------
    let cli = Cli::parse();

    // ----- initialise logging -----------------------------------------------
    logging::init(&cli.log_dir, "validate_conversations", cli.verbose)?;

    // ----- validate ---------------------------------------------------------
    println!("Validating: {}", cli.input.display());
    let data = conversation::read_conversations(&cli.input)?;
    let counts = repair::validate_fixed(&data);
    info!("{:?}: {counts:?}", cli.input);

    if counts.is_clean() {
        println!("✅ Validation passed, no issues found.");
        return Ok(());
    }
    println!("❌ Validation failed, {} issues remain:", counts.total());
    for (category, n) in counts.nonzero() {
        println!("  - {category}: {n}");
    }
    bail!("{} lingering issues in {}", counts.total(), cli.input.display())
}
