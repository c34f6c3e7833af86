//! Token counting with a pluggable tokenizer.
//!
//! BPE rank tables are looked up through a [`RankLoader`] first (by default
//! the local `~/.cache/tiktoken` directory), then the tables embedded in
//! `tiktoken-rs` are used, and the character-class heuristic takes over
//! when neither yields a tokenizer.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose, Engine as _};
use log::{info, warn};
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;
use tiktoken_rs::{tokenizer::Tokenizer, CoreBPE, Rank};

use crate::conversation::{Conversation, GPT};

pub const DEFAULT_ENCODING: &str = "cl100k_base";

// characters per token
const CJK_CHARS_PER_TOKEN: f64 = 1.5;
const OTHER_CHARS_PER_TOKEN: f64 = 4.5;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("unknown encoding '{0}'")]
    UnknownEncoding(String),

    #[error("cannot build tokenizer '{name}': {reason}")]
    Build { name: String, reason: String },

    #[error("no cached rank file at {}", path.display())]
    CacheMiss { path: PathBuf },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad rank table, line {line}: {reason}")]
    Ranks { line: usize, reason: String },
}

/// Source of `.tiktoken` rank files, keyed by encoding name.
pub trait RankLoader {
    fn load(&self, encoding: &str) -> Result<Vec<u8>, TokenizerError>;
}

/// Reads `<dir>/<encoding>.tiktoken` from disk.
#[derive(Debug, Clone)]
pub struct LocalCacheLoader {
    dir: PathBuf,
}

impl LocalCacheLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.cache/tiktoken`, if a home directory is known.
    pub fn default_dir() -> Option<PathBuf> {
        env::var_os("HOME").map(|home| Path::new(&home).join(".cache").join("tiktoken"))
    }

    pub fn path_for(&self, encoding: &str) -> PathBuf {
        self.dir.join(format!("{encoding}.tiktoken"))
    }
}

impl RankLoader for LocalCacheLoader {
    fn load(&self, encoding: &str) -> Result<Vec<u8>, TokenizerError> {
        let path = self.path_for(encoding);
        if !path.is_file() {
            return Err(TokenizerError::CacheMiss { path });
        }
        info!("loading rank file from local cache: {}", path.display());
        fs::read(&path).map_err(|source| TokenizerError::Io { path, source })
    }
}

/// Parses `<base64 token> <rank>` lines.
pub fn parse_ranks(data: &[u8]) -> Result<FxHashMap<Vec<u8>, Rank>, TokenizerError> {
    let text = std::str::from_utf8(data).map_err(|e| TokenizerError::Ranks {
        line: 0,
        reason: e.to_string(),
    })?;
    let mut ranks = FxHashMap::default();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bad = |reason: String| TokenizerError::Ranks { line: idx + 1, reason };
        let (token, rank) = line
            .split_once(' ')
            .ok_or_else(|| bad("expected '<token> <rank>'".to_string()))?;
        let token = general_purpose::STANDARD
            .decode(token)
            .map_err(|e| bad(e.to_string()))?;
        let rank: Rank = rank.trim().parse().map_err(|e: std::num::ParseIntError| bad(e.to_string()))?;
        ranks.insert(token, rank);
    }
    if ranks.is_empty() {
        return Err(TokenizerError::Ranks { line: 0, reason: "empty rank table".to_string() });
    }
    Ok(ranks)
}

const CL100K_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";
const O200K_PATTERN: &str = r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+(?i:'s|'t|'re|'ve|'m|'ll|'d)?|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*(?i:'s|'t|'re|'ve|'m|'ll|'d)?|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n/]*|\s*[\r\n]+|\s+(?!\S)|\s+";
const GPT2_PATTERN: &str = r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

// special tokens and split pattern of the encodings a rank file can stand in for
fn encoding_layout(encoding: &str) -> Option<(&'static [(&'static str, Rank)], &'static str)> {
    use tiktoken_rs::{ENDOFPROMPT, ENDOFTEXT, FIM_MIDDLE, FIM_PREFIX, FIM_SUFFIX};
    const CL100K_SPECIAL: &[(&str, Rank)] = &[
        (ENDOFTEXT, 100257),
        (FIM_PREFIX, 100258),
        (FIM_MIDDLE, 100259),
        (FIM_SUFFIX, 100260),
        (ENDOFPROMPT, 100276),
    ];
    const O200K_SPECIAL: &[(&str, Rank)] = &[(ENDOFTEXT, 199999), (ENDOFPROMPT, 200018)];
    const GPT2_SPECIAL: &[(&str, Rank)] = &[(ENDOFTEXT, 50256)];
    match encoding {
        "cl100k_base" => Some((CL100K_SPECIAL, CL100K_PATTERN)),
        "o200k_base" => Some((O200K_SPECIAL, O200K_PATTERN)),
        "p50k_base" | "r50k_base" => Some((GPT2_SPECIAL, GPT2_PATTERN)),
        _ => None,
    }
}

fn encoding_of(tokenizer: Tokenizer) -> Option<&'static str> {
    match tokenizer {
        Tokenizer::O200kBase => Some("o200k_base"),
        Tokenizer::Cl100kBase => Some("cl100k_base"),
        Tokenizer::P50kBase => Some("p50k_base"),
        Tokenizer::R50kBase | Tokenizer::Gpt2 => Some("r50k_base"),
        Tokenizer::P50kEdit => None,
    }
}

pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;

    /// Short name for logs and reports.
    fn name(&self) -> &str;
}

pub struct BpeCounter {
    name: String,
    bpe: CoreBPE,
}

impl BpeCounter {
    pub fn from_encoding(encoding: &str) -> Result<Self, TokenizerError> {
        let built = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "p50k_edit" => tiktoken_rs::p50k_edit(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            other => return Err(TokenizerError::UnknownEncoding(other.to_string())),
        };
        let bpe = built.map_err(|e| TokenizerError::Build {
            name: encoding.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { name: encoding.to_string(), bpe })
    }

    /// Builds the tokenizer from a rank file supplied by `loader`.
    pub fn from_loader(encoding: &str, loader: &dyn RankLoader) -> Result<Self, TokenizerError> {
        let (special, pattern) =
            encoding_layout(encoding).ok_or_else(|| TokenizerError::UnknownEncoding(encoding.to_string()))?;
        let ranks = parse_ranks(&loader.load(encoding)?)?;
        let special: FxHashMap<String, Rank> =
            special.iter().map(|(token, rank)| (token.to_string(), *rank)).collect();
        let bpe = CoreBPE::new(ranks, special, pattern).map_err(|e| TokenizerError::Build {
            name: encoding.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { name: format!("{encoding} (local cache)"), bpe })
    }

    pub fn from_model(model: &str) -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|e| TokenizerError::Build {
            name: model.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { name: model.to_string(), bpe })
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Estimate from character classes; never less than one token.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicCounter;

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
            if is_cjk(c) {
                (cjk + 1, other)
            } else {
                (cjk, other + 1)
            }
        });
        let estimate = cjk as f64 / CJK_CHARS_PER_TOKEN + other as f64 / OTHER_CHARS_PER_TOKEN;
        (estimate as usize).max(1)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenizerChoice {
    Bpe { encoding: String },
    Model { name: String },
    Heuristic,
}

impl Default for TokenizerChoice {
    fn default() -> Self {
        TokenizerChoice::Bpe { encoding: DEFAULT_ENCODING.to_string() }
    }
}

pub fn try_build_counter(choice: &TokenizerChoice) -> Result<Box<dyn TokenCounter>, TokenizerError> {
    Ok(match choice {
        TokenizerChoice::Bpe { encoding } => Box::new(BpeCounter::from_encoding(encoding)?),
        TokenizerChoice::Model { name } => Box::new(BpeCounter::from_model(name)?),
        TokenizerChoice::Heuristic => Box::new(HeuristicCounter),
    })
}

/// Resolution order: rank file from `loader`, embedded ranks, heuristic.
pub fn build_counter(choice: &TokenizerChoice, loader: Option<&dyn RankLoader>) -> Box<dyn TokenCounter> {
    let encoding = match choice {
        TokenizerChoice::Bpe { encoding } => Some(encoding.as_str()),
        TokenizerChoice::Model { name } => tiktoken_rs::tokenizer::get_tokenizer(name).and_then(encoding_of),
        TokenizerChoice::Heuristic => None,
    };
    if let (Some(encoding), Some(loader)) = (encoding, loader) {
        match BpeCounter::from_loader(encoding, loader) {
            Ok(counter) => {
                info!("using tokenizer {}", counter.name());
                return Box::new(counter);
            }
            Err(e) => warn!("{e}; using embedded {encoding} ranks"),
        }
    }
    match try_build_counter(choice) {
        Ok(counter) => {
            info!("using tokenizer {}", counter.name());
            counter
        }
        Err(e) => {
            warn!("{e}; falling back to heuristic token counter");
            Box::new(HeuristicCounter)
        }
    }
}

/// Token totals for one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub id: String,
    pub turns: usize,
    /// counted over every turn
    pub counted_total: usize,
    /// counted over gpt turns that carry `num_tokens`
    pub counted_gpt: usize,
    /// sum of the recorded `num_tokens` of those same turns
    pub recorded_gpt: i64,
}

/// `None` for records without a turn list.
pub fn conversation_usage(conv: &Conversation, counter: &dyn TokenCounter) -> Option<TokenUsage> {
    let turns = conv.conversations.as_ref()?;
    let mut usage = TokenUsage {
        id: conv.id_label(),
        turns: turns.len(),
        counted_total: 0,
        counted_gpt: 0,
        recorded_gpt: 0,
    };
    for turn in turns {
        let n = counter.count(turn.text());
        usage.counted_total += n;
        // non-integer counts are left out of the comparison
        match turn.recorded_tokens() {
            Some(recorded) if turn.speaker() == GPT => {
                usage.counted_gpt += n;
                usage.recorded_gpt += recorded;
            }
            _ => {}
        }
    }
    Some(usage)
}
