//! Request-log records and the grouped statistics computed over them.

use std::{fmt, io::BufRead};

use log::{debug, warn};
use serde_json::Value;
use thiserror::Error;

use crate::stats::FieldStats;

pub const KV_CACHE_TOKENS: &str = "kv_cache_tokens";
pub const NEW_TOKENS: &str = "new_tokens";

/// Fields every request record must carry, in report order.
pub const REQUIRED_FIELDS: [&str; 2] = [KV_CACHE_TOKENS, NEW_TOKENS];

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("no usable request records")]
    EmptyInput,

    #[error("line {line}: missing required field '{field}'")]
    MissingField { field: &'static str, line: usize },

    #[error("group size must be at least 1")]
    InvalidGroupSize,

    #[error("reading request log: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestRecord {
    pub kv_cache_tokens: f64,
    pub new_tokens: f64,
}

impl RequestRecord {
    pub fn new(kv_cache_tokens: f64, new_tokens: f64) -> Self {
        Self { kv_cache_tokens, new_tokens }
    }

    /// Builds a record from one parsed JSON line. Absent, null and
    /// non-numeric values all count as missing.
    pub fn from_value(value: &Value, line: usize) -> Result<Self, StatsError> {
        let field = |name: &'static str| {
            value
                .get(name)
                .and_then(Value::as_f64)
                .ok_or(StatsError::MissingField { field: name, line })
        };
        Ok(Self {
            kv_cache_tokens: field(KV_CACHE_TOKENS)?,
            new_tokens: field(NEW_TOKENS)?,
        })
    }
}

/// Records loaded from a JSON Lines source plus the lines that were skipped.
#[derive(Debug, Default)]
pub struct LoadedRequests {
    pub records: Vec<RequestRecord>,
    pub skipped_lines: Vec<usize>,
}

/// Reads one JSON object per line. Unparseable lines, invalid UTF-8
/// included, are skipped with a warning; a record without a required
/// field aborts the whole load.
pub fn load_requests<R: BufRead>(reader: R) -> Result<LoadedRequests, StatsError> {
    let mut loaded = LoadedRequests::default();

    for (idx, raw) in reader.split(b'\n').enumerate() {
        let line_no = idx + 1;
        let raw = raw?;
        let line = match std::str::from_utf8(&raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("skipping line {line_no}: {e}");
                loaded.skipped_lines.push(line_no);
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("skipping unparseable line {line_no}: {e}: {line}");
                loaded.skipped_lines.push(line_no);
                continue;
            }
        };
        loaded.records.push(RequestRecord::from_value(&value, line_no)?);
    }

    debug!(
        "loaded {} request records, skipped {} lines",
        loaded.records.len(),
        loaded.skipped_lines.len()
    );
    Ok(loaded)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLabel {
    /// 1-based group number
    Numbered(usize),
    Global,
}

impl GroupLabel {
    pub fn is_global(&self) -> bool {
        matches!(self, GroupLabel::Global)
    }
}

impl fmt::Display for GroupLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupLabel::Numbered(n) => write!(f, "{n}"),
            GroupLabel::Global => f.write_str("Global"),
        }
    }
}

/// One report row.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub group: GroupLabel,
    pub size: usize,
    /// 1-based, inclusive
    pub start_row: usize,
    /// 1-based, inclusive (equals the exclusive 0-based end)
    pub end_row: usize,
    pub kv_cache_tokens: FieldStats,
    pub new_tokens: FieldStats,
}

impl GroupStats {
    fn compute(group: GroupLabel, start: usize, slice: &[RequestRecord]) -> Result<Self, StatsError> {
        let kv: Vec<f64> = slice.iter().map(|r| r.kv_cache_tokens).collect();
        let new: Vec<f64> = slice.iter().map(|r| r.new_tokens).collect();
        Ok(Self {
            group,
            size: slice.len(),
            start_row: start + 1,
            end_row: start + slice.len(),
            kv_cache_tokens: FieldStats::compute(&kv).ok_or(StatsError::EmptyInput)?,
            new_tokens: FieldStats::compute(&new).ok_or(StatsError::EmptyInput)?,
        })
    }
}

/// Positional groups of `group_size` records; the last one may be short.
pub fn group_bounds(len: usize, group_size: usize) -> Vec<(usize, usize)> {
    if group_size == 0 {
        return Vec::new();
    }
    (0..len.div_ceil(group_size))
        .map(|i| (i * group_size, ((i + 1) * group_size).min(len)))
        .collect()
}

/// Numbered groups in input order followed by the Global row.
pub fn compute_grouped_stats(
    records: &[RequestRecord],
    group_size: usize,
) -> Result<Vec<GroupStats>, StatsError> {
    if group_size == 0 {
        return Err(StatsError::InvalidGroupSize);
    }
    if records.is_empty() {
        return Err(StatsError::EmptyInput);
    }

    let mut rows = group_bounds(records.len(), group_size)
        .into_iter()
        .enumerate()
        .map(|(i, (start, end))| {
            GroupStats::compute(GroupLabel::Numbered(i + 1), start, &records[start..end])
        })
        .collect::<Result<Vec<_>, _>>()?;

    rows.push(GroupStats::compute(GroupLabel::Global, 0, records)?);
    Ok(rows)
}
