//! Validation errors for identifiers and usage quantities
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Identifier validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },

    #[error("{kind} {value:?} contains forbidden character {found:?}")]
    ForbiddenChar {
        kind: &'static str,
        value: String,
        found: char,
    },
}

/// Usage quantity errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("usage value must not be negative: {0}")]
    Negative(String),

    #[error("usage value is not a number: {0:?}")]
    NotANumber(String),

    #[error("usage value {0:?} is outside the supported decimal range or precision")]
    OutOfRange(String),

    #[error("usage value overflow adding {added} to {current}")]
    Overflow { current: String, added: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IdError::ForbiddenChar {
            kind: "device id",
            value: "a_b".to_string(),
            found: '_',
        };
        assert_eq!(
            err.to_string(),
            "device id \"a_b\" contains forbidden character '_'"
        );

        let err = ValueError::Negative("-1".to_string());
        assert!(err.to_string().contains("negative"));
    }
}
