//! FITS primary-header parsing.
//!
//! A FITS header is a sequence of 2880-byte blocks, each holding 36 fixed-width
//! 80-byte ASCII cards. A card carries a value when bytes 9-10 are `"= "`.
//! Parsing stops at the `END` card; the data unit that follows is never read.

use std::fmt;
use std::io::{self, Read};

use thiserror::Error;

pub const BLOCK_LEN: usize = 2880;
pub const CARD_LEN: usize = 80;

const KEYWORD_LEN: usize = 8;
const VALUE_INDICATOR: &[u8] = b"= ";

#[derive(Debug, Error)]
pub enum FitsError {
    #[error("file is shorter than one FITS header block")]
    Truncated,
    #[error("first header card is not SIMPLE (not a FITS file)")]
    NotFits,
    #[error("header has no END card")]
    MissingEnd,
    #[error("read header block: {0}")]
    Io(#[from] io::Error),
}

/// Typed value of a header card.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Text(String),
    Logical(bool),
    Integer(i64),
    /// Floating-point value, kept in its original textual form.
    Real(String),
    /// Valid card with an empty value field.
    Undefined,
    /// Anything else (complex numbers, malformed values).
    Other(String),
}

impl HeaderValue {
    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real(_))
    }
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Logical(true) => f.write_str("T"),
            Self::Logical(false) => f.write_str("F"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(raw) | Self::Other(raw) => f.write_str(raw),
            Self::Undefined => Ok(()),
        }
    }
}

/// Keyword/value cards of a primary header, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<(String, HeaderValue)>,
}

impl Header {
    /// First value recorded for `keyword`.
    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|(key, _)| key == keyword)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.get(keyword).is_some()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Read the primary header from the start of a FITS stream.
pub fn read_primary_header<R: Read>(mut reader: R) -> Result<Header, FitsError> {
    let mut header = Header::default();
    let mut block = vec![0u8; BLOCK_LEN];
    let mut first_block = true;

    loop {
        if !read_block(&mut reader, &mut block)? {
            return Err(if first_block {
                FitsError::Truncated
            } else {
                FitsError::MissingEnd
            });
        }
        for (idx, card) in block.chunks(CARD_LEN).enumerate() {
            let keyword = card_keyword(card);
            if first_block && idx == 0 && keyword != "SIMPLE" {
                return Err(FitsError::NotFits);
            }
            if keyword == "END" {
                return Ok(header);
            }
            if let Some(value) = card_value(card) {
                header.cards.push((keyword, value));
            }
        }
        first_block = false;
    }
}

/// Fill `block` completely; `false` on a clean or partial EOF.
fn read_block<R: Read>(reader: &mut R, block: &mut [u8]) -> Result<bool, FitsError> {
    match reader.read_exact(block) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(FitsError::Io(err)),
    }
}

fn card_keyword(card: &[u8]) -> String {
    String::from_utf8_lossy(&card[..KEYWORD_LEN])
        .trim_end()
        .to_string()
}

fn card_value(card: &[u8]) -> Option<HeaderValue> {
    if &card[KEYWORD_LEN..KEYWORD_LEN + VALUE_INDICATOR.len()] != VALUE_INDICATOR {
        return None;
    }
    let field = String::from_utf8_lossy(&card[KEYWORD_LEN + VALUE_INDICATOR.len()..]);
    Some(parse_value(&field))
}

/// Parse the value field of a card (everything after `"= "`).
pub fn parse_value(field: &str) -> HeaderValue {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        return HeaderValue::Text(parse_quoted(rest));
    }

    let raw = match field.split_once('/') {
        Some((value, _comment)) => value,
        None => field,
    }
    .trim();

    match raw {
        "" => HeaderValue::Undefined,
        "T" => HeaderValue::Logical(true),
        "F" => HeaderValue::Logical(false),
        _ => {
            if let Ok(value) = raw.parse::<i64>() {
                HeaderValue::Integer(value)
            } else if raw.replace(['D', 'd'], "E").parse::<f64>().is_ok() {
                HeaderValue::Real(raw.to_string())
            } else {
                HeaderValue::Other(raw.to_string())
            }
        }
    }
}

/// Quoted strings escape `'` as `''`; trailing spaces are not significant.
fn parse_quoted(rest: &str) -> String {
    let mut out = String::new();
    let mut chars = rest.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\'' {
            if chars.peek() == Some(&'\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            break;
        }
        out.push(ch);
    }
    out.trim_end().to_string()
}
