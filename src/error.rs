//! Error types for the magic rule engine.
//!
//! This module defines the load-time rejection taxonomy used throughout the
//! engine. Match-time faults never escape as `Result::Err` — they are
//! recorded as notes on the classification result instead (see
//! [`crate::matcher`]).

use thiserror::Error;

/// A rejection of a single rule line during database construction.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The line does not parse as `level+offset type operation [message]`.
    #[error("line {line}: malformed rule: {detail} ({text:?})")]
    RuleSyntax {
        line: usize,
        text: String,
        detail: String,
    },

    /// The type name is not one of the recognised `magic(5)` type tags.
    #[error("line {line}: unknown type {name:?}")]
    UnknownType { line: usize, name: String },

    /// The operator character does not match any known operator.
    #[error("line {line}: unknown operator {op:?}")]
    UnknownOperator { line: usize, op: String },

    /// A `name` instruction redeclares a label already registered.
    #[error("line {line}: duplicate name {label:?}")]
    NameCollision { line: usize, label: String },

    /// A continuation line (`level > 0`) has no parent at `level - 1`.
    #[error("line {line}: level {level} has no parent at level {parent_level}")]
    MissingParent {
        line: usize,
        level: u32,
        parent_level: u32,
    },

    /// A `regex` criterion's pattern failed to compile.
    #[error("line {line}: regex compile error: {source}")]
    RegexFailure {
        line: usize,
        #[source]
        source: regex::Error,
    },

    /// A rule file or target file could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for database-construction operations.
pub type Result<T> = std::result::Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuleError::UnknownType {
            line: 3,
            name: "bogus".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("line 3"));
        assert!(msg.contains("bogus"));
    }

    #[test]
    fn test_name_collision_display() {
        let err = RuleError::NameCollision {
            line: 12,
            label: "swapped".into(),
        };
        assert!(err.to_string().contains("swapped"));
    }
}
