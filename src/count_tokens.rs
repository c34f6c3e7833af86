/*
cargo run --release --bin count_tokens -- \
    --input ShareGPT_fixed.json \
    --encoding cl100k_base \
    --out-json ShareGPT_token_usage.json

TOKENIZER_ENCODING=o200k_base cargo run --release --bin count_tokens -- --input ShareGPT_fixed.json

Rank files are read from ~/.cache/tiktoken/<encoding>.tiktoken when present
(--tiktoken-cache to point elsewhere), else the tables built into tiktoken-rs.
*/

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mrqa_tools::{
    conversation, logging,
    tokens::{self, LocalCacheLoader, RankLoader, TokenUsage, TokenizerChoice},
};

/// Count tokens per conversation and compare with the recorded num_tokens.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON array of conversation records
    #[arg(long)]
    input: PathBuf,

    /// tiktoken encoding name
    #[arg(long, env = "TOKENIZER_ENCODING", default_value = tokens::DEFAULT_ENCODING)]
    encoding: String,

    /// Pick the encoding used by this model instead of --encoding
    #[arg(long, conflicts_with = "heuristic")]
    model: Option<String>,

    /// Character-class estimate, no BPE tokenizer
    #[arg(long)]
    heuristic: bool,

    /// Directory holding <encoding>.tiktoken rank files (default ~/.cache/tiktoken)
    #[arg(long = "tiktoken-cache", env = "TIKTOKEN_CACHE_DIR", value_name = "DIR")]
    tiktoken_cache: Option<PathBuf>,

    /// Skip the local rank-file cache
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// Write per-conversation rows here as JSON
    #[arg(long = "out-json", value_name = "PATH")]
    out_json: Option<PathBuf>,

    #[arg(long = "log-dir", default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long)]
    verbose: bool,
}

impl Cli {
    fn tokenizer_choice(&self) -> TokenizerChoice {
        if self.heuristic {
            TokenizerChoice::Heuristic
        } else if let Some(name) = &self.model {
            TokenizerChoice::Model { name: name.clone() }
        } else {
            TokenizerChoice::Bpe { encoding: self.encoding.clone() }
        }
    }

    fn rank_loader(&self) -> Option<LocalCacheLoader> {
        if self.no_cache {
            return None;
        }
        self.tiktoken_cache
            .clone()
            .or_else(LocalCacheLoader::default_dir)
            .map(LocalCacheLoader::new)
    }
}

fn main() -> Result<()> {
    // ----- parse CLI --------------------------------------------------------
    let cli = Cli::parse();

    // ----- initialise logging -----------------------------------------------
    logging::init(&cli.log_dir, "count_tokens", cli.verbose)?;

    // ----- tokenizer --------------------------------------------------------
    let loader = cli.rank_loader();
    let counter = tokens::build_counter(
        &cli.tokenizer_choice(),
        loader.as_ref().map(|l| l as &dyn RankLoader),
    );

    // ----- count ------------------------------------------------------------
    let data = conversation::read_conversations(&cli.input)?;
    info!("Counting {} conversations with {}", data.len(), counter.name());

    let rows: Vec<TokenUsage> = data
        .iter()
        .filter_map(|c| tokens::conversation_usage(c, counter.as_ref()))
        .collect();

    let turns: usize = rows.iter().map(|r| r.turns).sum();
    let counted: usize = rows.iter().map(|r| r.counted_total).sum();
    let counted_gpt: usize = rows.iter().map(|r| r.counted_gpt).sum();
    let recorded_gpt: i64 = rows.iter().map(|r| r.recorded_gpt).sum();

    println!("Tokenizer: {}", counter.name());
    println!("Conversations: {}", rows.len());
    println!("Turns: {turns}");
    println!("Counted tokens (all turns): {counted}");
    println!("Counted tokens (gpt turns with num_tokens): {counted_gpt}");
    println!("Recorded num_tokens (same turns): {recorded_gpt}");
    if !rows.is_empty() {
        println!("Mean tokens per conversation: {:.2}", counted as f64 / rows.len() as f64);
    }

    // ----- optional JSON dump -----------------------------------------------
    if let Some(path) = &cli.out_json {
        fs::write(path, serde_json::to_string_pretty(&rows)?)
            .with_context(|| format!("Writing {}", path.display()))?;
        println!("Per-conversation counts written → {}", path.display());
    }
    Ok(())
}
