use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::Local;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode, WriteLogger};

/// Terminal gets warnings (debug with `verbose`), the file under
/// `log_dir/<tool>_<timestamp>.log` gets everything from info up.
pub fn init(log_dir: &Path, tool: &str, verbose: bool) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Cannot create log directory {}", log_dir.display()))?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let log_path = log_dir.join(format!("{tool}_{timestamp}.log"));
    let file = fs::File::create(&log_path)
        .with_context(|| format!("Cannot open log file {}", log_path.display()))?;

    let (term_level, file_level) = if verbose {
        (LevelFilter::Debug, LevelFilter::Debug)
    } else {
        (LevelFilter::Warn, LevelFilter::Info)
    };
    let config = ConfigBuilder::new().build();

    CombinedLogger::init(vec![
        TermLogger::new(term_level, config.clone(), TerminalMode::Stderr, ColorChoice::Auto),
        WriteLogger::new(file_level, config, file),
    ])
    .context("Failed to initialise logger")?;

    Ok(log_path)
}
