//! Metering frame parser
//!
//! One frame is one line of TAB-separated text:
//!
//! ```text
//! <source address> \t <destination | timestamp> \t <value> [\t ...]
//! ```
//!
//! Only field 0 (source) and field 2 (value) are used. Parsing is a pure
//! function; malformed frames come back as [`ParseError`] for the caller to
//! count and drop.

use thiserror::Error;
use types::errors::{IdError, ValueError};
use types::ids::SourceAddress;
use types::numeric::UsageValue;

pub const FIELD_DELIMITER: char = '\t';

const SOURCE_FIELD: usize = 0;
const VALUE_FIELD: usize = 2;
const MIN_FIELDS: usize = VALUE_FIELD + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub source: SourceAddress,
    pub value: UsageValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    #[error("expected at least {expected} fields, found {found}")]
    Arity { expected: usize, found: usize },

    #[error("bad source address: {0}")]
    Source(#[from] IdError),

    #[error("bad value: {0}")]
    Value(#[from] ValueError),

    #[error("frame exceeds {limit} bytes")]
    FrameTooLong { limit: usize },
}

/// Parse one frame. A trailing `\n` or `\r\n` is ignored.
pub fn parse(frame: &[u8]) -> Result<ParsedRecord, ParseError> {
    let text = std::str::from_utf8(frame).map_err(|_| ParseError::NotUtf8)?;
    let text = text.trim_end_matches(['\n', '\r']);

    let fields: Vec<&str> = text.split(FIELD_DELIMITER).collect();
    if fields.len() < MIN_FIELDS {
        return Err(ParseError::Arity {
            expected: MIN_FIELDS,
            found: fields.len(),
        });
    }

    let source = SourceAddress::new(fields[SOURCE_FIELD])?;
    let value: UsageValue = fields[VALUE_FIELD].parse()?;

    Ok(ParsedRecord { source, value })
}
