//! Tabular and console rendering of grouped request statistics.

use std::io::Write;

use crate::{
    requests::{GroupStats, REQUIRED_FIELDS},
    stats::{FieldStats, FIELD_STAT_NAMES},
};

pub const STATS_CSV_NAME: &str = "request_stats.csv";

// thresholds used by the interpretation text
const GINI_HIGH: f64 = 0.5;
const GINI_MODERATE: f64 = 0.3;
const CV_HIGH: f64 = 1.0;
const CV_MODERATE: f64 = 0.5;

pub fn csv_header() -> Vec<String> {
    let mut header: Vec<String> = ["group", "size", "start_row", "end_row"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for field in REQUIRED_FIELDS {
        for stat in FIELD_STAT_NAMES {
            header.push(format!("{field}_{stat}"));
        }
    }
    header
}

fn csv_row(row: &GroupStats) -> Vec<String> {
    let mut out = vec![
        row.group.to_string(),
        row.size.to_string(),
        row.start_row.to_string(),
        row.end_row.to_string(),
    ];
    for stats in [&row.kv_cache_tokens, &row.new_tokens] {
        out.extend(stats.as_array().iter().map(|v| v.to_string()));
    }
    out
}

pub fn write_csv<W: Write>(rows: &[GroupStats], writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(csv_header())?;
    for row in rows {
        wtr.write_record(csv_row(row))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Per-group Gini / CV / MAD lines, numbered groups only.
pub fn dispersion_lines(rows: &[GroupStats]) -> Vec<String> {
    rows.iter()
        .filter(|r| !r.group.is_global())
        .map(|r| {
            format!(
                "Group {}: KV Cache Tokens Gini = {:.4}, CV = {:.4}, MAD = {:.4} | New Tokens Gini = {:.4}, CV = {:.4}, MAD = {:.4}",
                r.group,
                r.kv_cache_tokens.gini,
                r.kv_cache_tokens.cv,
                r.kv_cache_tokens.mad,
                r.new_tokens.gini,
                r.new_tokens.cv,
                r.new_tokens.mad,
            )
        })
        .collect()
}

pub fn global_summary(global: &GroupStats) -> Vec<String> {
    let line = |label: &str, s: &FieldStats| {
        format!(
            "{label} - Mean: {:.2}, Std: {:.2}, Gini: {:.4}, CV: {:.4}",
            s.mean, s.std, s.gini, s.cv
        )
    };
    vec![
        "Global Statistics:".to_string(),
        format!("Sample Count: {}", global.size),
        line("KV Cache Tokens", &global.kv_cache_tokens),
        line("New Tokens", &global.new_tokens),
    ]
}

fn gini_verdict(gini: f64) -> &'static str {
    if gini > GINI_HIGH {
        "very uneven"
    } else if gini > GINI_MODERATE {
        "moderately uneven"
    } else {
        "relatively even"
    }
}

fn cv_verdict(cv: f64) -> &'static str {
    if cv > CV_HIGH {
        "very high variation"
    } else if cv > CV_MODERATE {
        "significant variation"
    } else {
        "relatively stable"
    }
}

/// Plain-language reading of the Global row.
pub fn interpret(global: &GroupStats) -> Vec<String> {
    let kv = &global.kv_cache_tokens;
    let new = &global.new_tokens;
    let mut out = vec![
        "Results Interpretation:".to_string(),
        "Gini Coefficient (0=complete equality, 1=complete inequality):".to_string(),
        format!(
            "- KV Cache Tokens Gini of {:.4} indicates {} cache size distribution.",
            kv.gini,
            gini_verdict(kv.gini)
        ),
        format!(
            "- New Tokens Gini of {:.4} indicates {} distribution of new token calculations.",
            new.gini,
            gini_verdict(new.gini)
        ),
        "Coefficient of Variation (higher values indicate greater dispersion):".to_string(),
        format!(
            "- KV Cache Tokens CV of {:.4} indicates {} in cache sizes.",
            kv.cv,
            cv_verdict(kv.cv)
        ),
        format!(
            "- New Tokens CV of {:.4} indicates {} in new token counts.",
            new.cv,
            cv_verdict(new.cv)
        ),
        "Recommendations:".to_string(),
    ];

    if kv.gini > GINI_HIGH || kv.cv > CV_HIGH {
        out.push("- KV cache resources are unevenly distributed; consider smarter caching strategies or dedicated processing paths for large contexts.".to_string());
    }
    if new.gini > GINI_HIGH || new.cv > CV_HIGH {
        out.push("- Request complexity varies significantly; consider more flexible scaling strategies or complexity-based request routing.".to_string());
    }
    if kv.gini > GINI_MODERATE && new.gini > GINI_MODERATE {
        out.push("- Overall workload is unbalanced; consider implementing fairer scheduling mechanisms.".to_string());
    } else if kv.gini <= GINI_MODERATE && new.gini <= GINI_MODERATE {
        out.push("- Overall workload is relatively balanced; current processing strategies may be adequate.".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::{compute_grouped_stats, RequestRecord};

    fn sample_rows() -> Vec<GroupStats> {
        let recs = vec![
            RequestRecord::new(10.0, 2.0),
            RequestRecord::new(20.0, 4.0),
            RequestRecord::new(30.0, 6.0),
        ];
        compute_grouped_stats(&recs, 2).unwrap()
    }

    #[test]
    fn header_layout() {
        let header = csv_header();
        assert_eq!(header.len(), 4 + 2 * 10);
        assert_eq!(header[4], "kv_cache_tokens_mean");
        assert_eq!(header[13], "kv_cache_tokens_mad");
        assert_eq!(header[14], "new_tokens_mean");
        assert_eq!(header.last().unwrap(), "new_tokens_mad");
    }

    #[test]
    fn csv_contains_global_row() {
        let mut buf = Vec::new();
        write_csv(&sample_rows(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("1,2,1,2,15,"));
        assert!(lines[2].starts_with("2,1,3,3,30,"));
        assert!(lines[3].starts_with("Global,3,1,3,20,"));
    }

    #[test]
    fn interpretation_for_even_load() {
        let rows = sample_rows();
        let lines = interpret(rows.last().unwrap());
        assert!(lines.iter().any(|l| l.contains("relatively even cache size")));
        assert!(lines.iter().any(|l| l.contains("relatively balanced")));
        assert!(!lines.iter().any(|l| l.contains("unevenly distributed")));
    }

    #[test]
    fn interpretation_for_skewed_load() {
        let recs: Vec<RequestRecord> = (0..10)
            .map(|i| if i == 0 { RequestRecord::new(1000.0, 500.0) } else { RequestRecord::new(0.0, 0.0) })
            .collect();
        let rows = compute_grouped_stats(&recs, 10).unwrap();
        let lines = interpret(rows.last().unwrap());
        assert!(lines.iter().any(|l| l.contains("very uneven")));
        assert!(lines.iter().any(|l| l.contains("unevenly distributed")));
        assert!(lines.iter().any(|l| l.contains("workload is unbalanced")));
    }

    #[test]
    fn dispersion_lines_skip_global() {
        let lines = dispersion_lines(&sample_rows());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Group 1:"));
    }
}
