//! Error taxonomy for the metrics pipeline
//!
//! Each variant maps to a distinct handling strategy:
//! - Fetch: retried per policy, then fails the check cycle
//! - Parse: degrades the cycle to a single liveness=0 record
//! - FilterConfig: fatal to the check cycle, raised before any fetch
//! - Serialization: batch dropped for the cycle, runner continues

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("failed to fetch metrics: {0}")]
    Fetch(String),

    #[error("could not parse metrics payload: {0}")]
    Parse(String),

    #[error("{name} ({pattern}) must be a valid regular expression: {source}")]
    FilterConfig {
        name: &'static str,
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("could not serialize result batch: {0}")]
    Serialization(String),
}

// Process exit codes for fatal conditions.
pub const EXIT_GETTING_LOG_CREDENTIALS: i32 = 22;
pub const EXIT_FILE_PERMISSION_DENIED: i32 = 40;
pub const EXIT_LOADING_CONFIG: i32 = 60;
