//! Prometheus text exposition format parser
//!
//! Parses the plain-text wire format exposed by Prometheus-style endpoints:
//! `# HELP` / `# TYPE` comment lines and `name{labels} value [timestamp]`
//! sample lines. Samples are grouped into metric families in source order.

use std::collections::BTreeMap;

use crate::errors::CheckError;

/// A single parsed sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    /// BTreeMap so label keys always serialize in sorted order.
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Optional source timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
}

/// A metric family: one name plus all samples attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub samples: Vec<Sample>,
}

// Suffixes that attach a sample to the family declared by a `# TYPE` line
// (histogram/summary/counter expansions).
const FAMILY_SUFFIXES: [&str; 5] = ["_bucket", "_sum", "_count", "_total", "_created"];

/// Parse a full exposition payload into metric families.
///
/// An empty payload or any malformed sample line fails the whole payload with
/// `CheckError::Parse`; callers degrade the cycle rather than ingest partial
/// nonsense.
pub fn parse_families(text: &str) -> Result<Vec<MetricFamily>, CheckError> {
    if text.trim().is_empty() {
        return Err(CheckError::Parse("empty payload".into()));
    }

    let mut families: Vec<MetricFamily> = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.split_whitespace();
            if parts.next() == Some("TYPE") {
                if let Some(name) = parts.next() {
                    families.push(MetricFamily {
                        name: name.to_string(),
                        samples: Vec::new(),
                    });
                }
            }
            // HELP and free-form comments carry no samples
            continue;
        }

        let sample = parse_sample_line(line)
            .map_err(|reason| CheckError::Parse(format!("{reason} (line: {line:?})")))?;
        match families.last_mut() {
            Some(family) if belongs_to(&family.name, &sample.name) => {
                family.samples.push(sample);
            }
            _ => families.push(MetricFamily {
                name: sample.name.clone(),
                samples: vec![sample],
            }),
        }
    }
    Ok(families)
}

/// A sample belongs to a family if its name equals the family name or is the
/// family name plus a well-known expansion suffix.
fn belongs_to(family_name: &str, sample_name: &str) -> bool {
    match sample_name.strip_prefix(family_name) {
        Some("") => true,
        Some(rest) => FAMILY_SUFFIXES.contains(&rest),
        None => false,
    }
}

fn parse_sample_line(line: &str) -> Result<Sample, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if !is_valid_metric_name(name) {
        return Err(format!("invalid metric name {name:?}"));
    }

    let mut rest = &line[name_end..];
    let mut labels = BTreeMap::new();
    if rest.starts_with('{') {
        let consumed = parse_labels(rest, &mut labels)?;
        rest = &rest[consumed..];
    }

    let mut tokens = rest.split_whitespace();
    let value = match tokens.next() {
        Some(token) => parse_value(token)?,
        None => return Err("missing sample value".into()),
    };
    let timestamp_ms = match tokens.next() {
        Some(token) => Some(
            token
                .parse::<i64>()
                .map_err(|_| format!("invalid timestamp {token:?}"))?,
        ),
        None => None,
    };
    if tokens.next().is_some() {
        return Err("trailing garbage after timestamp".into());
    }

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Parse a `{key="value",...}` label block, returning the number of bytes
/// consumed (including both braces). Label values support the exposition
/// escapes `\\`, `\"` and `\n`.
fn parse_labels(input: &str, labels: &mut BTreeMap<String, String>) -> Result<usize, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 1; // past '{'
    loop {
        while pos < chars.len() && (chars[pos] == ',' || chars[pos].is_whitespace()) {
            pos += 1;
        }
        if pos >= chars.len() {
            return Err("unterminated label block".into());
        }
        if chars[pos] == '}' {
            // Byte offset: labels are ASCII-delimited, values may not be
            let consumed: usize = chars[..=pos].iter().map(|c| c.len_utf8()).sum();
            return Ok(consumed);
        }

        let key_start = pos;
        while pos < chars.len() && chars[pos] != '=' {
            pos += 1;
        }
        if pos >= chars.len() {
            return Err("label without '='".into());
        }
        let key: String = chars[key_start..pos].iter().collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err("empty label name".into());
        }

        pos += 1; // past '='
        if pos >= chars.len() || chars[pos] != '"' {
            return Err(format!("label {key:?} value must be quoted"));
        }
        pos += 1; // past opening quote

        let mut value = String::new();
        loop {
            if pos >= chars.len() {
                return Err(format!("unterminated value for label {key:?}"));
            }
            match chars[pos] {
                '"' => break,
                '\\' => {
                    pos += 1;
                    match chars.get(pos) {
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some('n') => value.push('\n'),
                        Some(other) => {
                            // Unknown escapes pass through verbatim
                            value.push('\\');
                            value.push(*other);
                        }
                        None => return Err(format!("unterminated escape in label {key:?}")),
                    }
                }
                c => value.push(c),
            }
            pos += 1;
        }
        pos += 1; // past closing quote
        labels.insert(key, value);
    }
}

fn parse_value(token: &str) -> Result<f64, String> {
    match token {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        other => other
            .parse::<f64>()
            .map_err(|_| format!("invalid sample value {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_samples() {
        let families = parse_families("up 1\nfoo_bar 5\n").unwrap();
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].name, "up");
        assert_eq!(families[0].samples[0].value, 1.0);
        assert_eq!(families[1].name, "foo_bar");
        assert!(families[1].samples[0].labels.is_empty());
    }

    #[test]
    fn test_parse_labels_and_timestamp() {
        let families =
            parse_families("http_requests_total{method=\"post\",code=\"200\"} 1027 1395066363000\n")
                .unwrap();
        let sample = &families[0].samples[0];
        assert_eq!(sample.labels.get("method").unwrap(), "post");
        assert_eq!(sample.labels.get("code").unwrap(), "200");
        assert_eq!(sample.value, 1027.0);
        assert_eq!(sample.timestamp_ms, Some(1395066363000));
    }

    #[test]
    fn test_parse_escaped_label_value() {
        let families = parse_families(r#"msg{text="a\"b\\c\nd"} 1"#).unwrap();
        assert_eq!(
            families[0].samples[0].labels.get("text").unwrap(),
            "a\"b\\c\nd"
        );
    }

    #[test]
    fn test_type_line_groups_histogram_samples() {
        let text = "\
# TYPE http_request_duration_seconds histogram
http_request_duration_seconds_bucket{le=\"0.05\"} 24054
http_request_duration_seconds_bucket{le=\"+Inf\"} 144320
http_request_duration_seconds_sum 53423
http_request_duration_seconds_count 144320
";
        let families = parse_families(text).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].name, "http_request_duration_seconds");
        assert_eq!(families[0].samples.len(), 4);
    }

    #[test]
    fn test_parse_special_values() {
        let families = parse_families("a 1\nb +Inf\nc -Inf\nd NaN\n").unwrap();
        assert_eq!(families[1].samples[0].value, f64::INFINITY);
        assert_eq!(families[2].samples[0].value, f64::NEG_INFINITY);
        assert!(families[3].samples[0].value.is_nan());
    }

    #[test]
    fn test_help_and_comments_ignored() {
        let text = "# HELP up Whether the target is up\n# random comment\nup 1\n";
        let families = parse_families(text).unwrap();
        assert_eq!(families.len(), 1);
        assert_eq!(families[0].samples.len(), 1);
    }

    #[test]
    fn test_empty_payload_is_parse_error() {
        assert!(matches!(
            parse_families("  \n \n"),
            Err(CheckError::Parse(_))
        ));
    }

    #[test]
    fn test_malformed_line_fails_whole_payload() {
        assert!(matches!(
            parse_families("up 1\n{not a metric} abc\n"),
            Err(CheckError::Parse(_))
        ));
        assert!(matches!(
            parse_families("up notanumber\n"),
            Err(CheckError::Parse(_))
        ));
    }
}
