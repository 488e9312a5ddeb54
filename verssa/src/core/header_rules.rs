//! Observation header rules applied by the validator.
//!
//! Rules run in a fixed order and the first failure wins: every required
//! keyword must be present, then each value must match its format.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::fits::{Header, HeaderValue};

/// Required keywords, in the order they are checked and tagged.
pub const REQUIRED_KEYS: [&str; 9] = [
    "DATE-OBS", "EXPTIME", "OBJCTRA", "OBJCTDEC", "SITELAT", "SITELONG", "SITEELEV", "TELESCOP",
    "COUNTRY",
];

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}").unwrap());
static SEXAGESIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+ -?\d+ -?\d+").unwrap());
static ELEVATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+\.?\d+").unwrap());
static NON_EMPTY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.+").unwrap());
static COUNTRY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^...").unwrap());

/// Outcome of evaluating one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Header passed; carries `(keyword, value)` pairs to record as metadata.
    Valid(Vec<(String, String)>),
    /// Header failed; carries the failure message.
    Invalid(String),
}

/// Evaluate `header` for the object named `file_name`.
pub fn evaluate(header: &Header, file_name: &str) -> Verdict {
    for key in REQUIRED_KEYS {
        if !header.contains(key) {
            return Verdict::Invalid(format!("ERROR: missing header {key} for: {file_name}"));
        }
    }

    let mut tags = Vec::with_capacity(REQUIRED_KEYS.len());
    for key in REQUIRED_KEYS {
        let Some(value) = header.get(key) else {
            continue;
        };
        if !format_matches(key, value) {
            return Verdict::Invalid(format!("Error {key} bad match"));
        }
        tags.push((key.to_string(), value.to_string()));
    }
    Verdict::Valid(tags)
}

fn format_matches(key: &str, value: &HeaderValue) -> bool {
    let text = value.to_string();
    match key {
        "DATE-OBS" => TIMESTAMP_RE.is_match(&text),
        "EXPTIME" => value.is_real(),
        "OBJCTRA" | "OBJCTDEC" | "SITELAT" | "SITELONG" => SEXAGESIMAL_RE.is_match(&text),
        "SITEELEV" => ELEVATION_RE.is_match(&text),
        "TELESCOP" => NON_EMPTY_RE.is_match(&text),
        "COUNTRY" => COUNTRY_RE.is_match(&text),
        _ => true,
    }
}
