/*
cargo run --release --bin find_conversation_issues -- \
    --input ShareGPT.json \
    --show 5 \
    --out-json ShareGPT_issues.json
*/

use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mrqa_tools::{
    conversation::{self, Conversation},
    logging,
    repair::{self, ConversationIssues},
};

const PREVIEW_CHARS: usize = 50;
const MAX_TURNS_SHOWN: usize = 3;

/// List conversations that the repair pass would change, without changing them.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// JSON array of conversation records
    #[arg(long, default_value = "ShareGPT.json")]
    input: PathBuf,

    /// How many problematic conversations to print in detail
    #[arg(long, default_value_t = 5)]
    show: usize,

    /// Write the full issue list here as JSON
    #[arg(long = "out-json", value_name = "PATH")]
    out_json: Option<PathBuf>,

    #[arg(long = "log-dir", default_value = "logs")]
    log_dir: PathBuf,

    #[arg(long)]
    verbose: bool,
}

fn main() -> Result<()> {
    // ----- parse CLI --------------------------------------------------------
    let cli = Cli::parse();

    // ----- initialise logging -----------------------------------------------
    logging::init(&cli.log_dir, "find_conversation_issues", cli.verbose)?;
    info!("Started - input: {:?}", cli.input);

    // ----- scan -------------------------------------------------------------
    let data = conversation::read_conversations(&cli.input)?;
    let issues = repair::find_problematic_conversations(&data);
    info!("{} of {} conversations have issues", issues.len(), data.len());

    if issues.is_empty() {
        println!("No problematic conversations found.");
    } else {
        println!("Found {} problematic conversations:", issues.len());
        for (i, item) in issues.iter().take(cli.show).enumerate() {
            print_issue(i, issues.len(), item, data.get(item.index));
        }
        if issues.len() > cli.show {
            println!("... and {} more problematic conversations", issues.len() - cli.show);
        }
    }

    // ----- optional JSON dump -----------------------------------------------
    if let Some(path) = &cli.out_json {
        fs::write(path, serde_json::to_string_pretty(&issues)?)
            .with_context(|| format!("Writing {}", path.display()))?;
        println!("Issue list written → {}", path.display());
    }
    Ok(())
}

fn print_issue(idx: usize, total: usize, item: &ConversationIssues, conv: Option<&Conversation>) {
    println!("\nConversation {}/{}, ID: {}", idx + 1, total, item.id);

    let categories = [
        ("gpt turns missing num_tokens (whole conversation will be dropped)", &item.missing_num_tokens_positions),
        ("empty turns", &item.empty_positions),
        ("system turns", &item.system_positions),
        ("bing/bard/chatgpt turns", &item.disallowed_positions),
        ("consecutive same-speaker turns", &item.consecutive_positions),
    ];
    for (label, positions) in categories {
        if !positions.is_empty() {
            println!("{label}: {positions:?}");
        }
    }

    let turns = conv.and_then(|c| c.conversations.as_ref());
    if let Some(turns) = turns {
        for pos in item.all_positions().into_iter().take(MAX_TURNS_SHOWN) {
            let Some(turn) = turns.get(pos) else { continue };
            let preview: String = turn.text().chars().take(PREVIEW_CHARS).collect();
            let ellipsis = if turn.text().chars().count() > PREVIEW_CHARS { "..." } else { "" };
            println!("\nposition {pos}:");
            println!("  from: {}", turn.speaker());
            println!("  has num_tokens: {}", turn.has_num_tokens());
            println!("  value: '{preview}{ellipsis}'");
        }
    }
    println!("{}", "-".repeat(50));
}
