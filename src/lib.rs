//! Helpers for the multi-round QA benchmark: request-log dispersion
//! statistics, conversation dataset repair and token counting.

pub mod conversation;
pub mod logging;
pub mod repair;
pub mod report;
pub mod requests;
pub mod stats;
pub mod tokens;
