//! Sample filtering for fetched metrics
//!
//! Pure pipeline over the parsed exposition payload:
//! 1. drop built-in runtime self-metrics (go_*, promhttp_*, process_*)
//! 2. keep only families matching the include pattern, when one is set
//! 3. suppress zero-valued samples matching the suppress-if-zero pattern
//!
//! Source order is preserved; no sorting happens here.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::CheckError;
use crate::exposition::{self, MetricFamily};

// Families emitted by the instrumented runtime itself; always excluded,
// independent of user configuration.
static EXCLUDE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:go|promhttp|process)_").unwrap());

/// User-supplied include / suppress-if-zero patterns, compiled once per cycle.
#[derive(Debug, Default)]
pub struct FilterPatterns {
    include: Option<Regex>,
    suppress_if_zero: Option<Regex>,
}

impl FilterPatterns {
    /// Compile both patterns. A malformed pattern is a configuration error
    /// raised before any fetch happens, never silently ignored.
    pub fn compile(
        include_prefixes: Option<&str>,
        suppress_if_zero_prefixes: Option<&str>,
    ) -> Result<Self, CheckError> {
        Ok(Self {
            include: compile_pattern(include_prefixes, "includePrefixes")?,
            suppress_if_zero: compile_pattern(suppress_if_zero_prefixes, "suppressIfZeroPrefixes")?,
        })
    }
}

fn compile_pattern(
    pattern: Option<&str>,
    name: &'static str,
) -> Result<Option<Regex>, CheckError> {
    match pattern {
        Some(p) if !p.is_empty() => {
            Regex::new(p)
                .map(Some)
                .map_err(|e| CheckError::FilterConfig {
                    name,
                    pattern: p.to_string(),
                    source: Box::new(e),
                })
        }
        _ => Ok(None),
    }
}

// Anchored-prefix match: the pattern must match starting at the first byte.
fn matches_prefix(re: &Regex, name: &str) -> bool {
    re.find(name).is_some_and(|m| m.start() == 0)
}

/// Parse raw exposition text and apply the filter pipeline.
///
/// Returns `CheckError::Parse` when the whole payload is unparseable; the
/// caller degrades the cycle to a single liveness=0 record.
pub fn filter_metrics(
    raw: &str,
    patterns: &FilterPatterns,
) -> Result<Vec<MetricFamily>, CheckError> {
    let families = exposition::parse_families(raw)?;
    Ok(filter_families(families, patterns))
}

fn filter_families(families: Vec<MetricFamily>, patterns: &FilterPatterns) -> Vec<MetricFamily> {
    families
        .into_iter()
        .filter(|family| !matches_prefix(&EXCLUDE_PATTERN, &family.name))
        .filter(|family| match &patterns.include {
            Some(include) => matches_prefix(include, &family.name),
            None => true,
        })
        .map(|mut family| {
            if let Some(suppress) = &patterns.suppress_if_zero {
                family
                    .samples
                    .retain(|s| s.value != 0.0 || !matches_prefix(suppress, &s.name));
            }
            family
        })
        .collect()
}
