//! magic-rules - a `magic(5)`-style file-type classification rule engine
//!
//! This library parses text rule databases in the `magic(5)` dialect into
//! an in-memory [`Database`], then matches byte buffers against that
//! database to produce a human-readable classification.
//!
//! # Quick Start
//!
//! ```rust
//! use magic_rules::{Database, classify};
//!
//! let source = "0 string \\x7fELF ELF binary\n";
//! let lines: Vec<_> = source.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
//! let (db, report) = Database::load(lines, None);
//! assert_eq!(report.accepted, 1);
//!
//! let result = classify(&db, b"\x7fELF\x02\x01\x01");
//! assert_eq!(result.formatted_message, "ELF binary");
//! ```
//!
//! # Rule Model
//!
//! - **Offset**: constant, relative, or indirect, with arithmetic
//!   modification of an indirect read (see [`offset`]).
//! - **Type**: the `magic(5)` type name, its endianness, and an unsigned
//!   flag (see [`kind`]).
//! - **Criterion**: a comparable test over the extracted value (see
//!   [`criterion`]).
//! - **Instruction**: a control-flow directive — `name`, `use`, `default`,
//!   `indirect` (see [`instruction`]).
//! - **Pattern**: one parsed rule line, owning its children in a flat arena
//!   (see [`pattern`]).
//! - **Database**: the loaded rule set, with a first-byte index used as a
//!   match-time hint (see [`database`]).
//! - **Matcher**: the depth-first algorithm that walks the pattern tree
//!   against a buffer (see [`matcher`]).

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod criterion;
pub mod database;
pub mod endian;
pub mod error;
pub mod instruction;
pub mod kind;
pub mod matcher;
pub mod message;
pub mod offset;
pub mod operator;
pub mod pattern;
pub mod parser;
pub mod value;

pub use database::{Database, LoadReport, RejectedRule};
pub use endian::Endianness;
pub use error::{Result, RuleError};
pub use instruction::Instruction;
pub use kind::{Type, TypeTag};
pub use matcher::{classify, classify_with_options, ClassifyResult, MatchOptions, MAX_RECURSION_DEPTH};
pub use pattern::{Operation, Pattern, PatternId};
pub use value::Value;

use std::path::Path;

/// Load a database from a `magic(5)`-dialect rule file at `path`.
///
/// Malformed lines are skipped; the returned [`LoadReport`] lists them.
///
/// # Errors
///
/// Returns [`RuleError`] if `path` cannot be read.
pub fn load_database_file<P: AsRef<Path>>(path: P) -> Result<(Database, LoadReport)> {
    let text = std::fs::read_to_string(path)?;
    Ok(load_database_str(&text))
}

/// Load a database from in-memory rule text.
pub fn load_database_str(text: &str) -> (Database, LoadReport) {
    let lines: Vec<(usize, &str)> = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
    Database::load(lines, None)
}

/// Classify the file at `path` against `db`.
///
/// # Errors
///
/// Returns [`RuleError`] if `path` cannot be read.
pub fn classify_file<P: AsRef<Path>>(db: &Database, path: P) -> Result<ClassifyResult> {
    let data = std::fs::read(path)?;
    Ok(classify(db, &data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_classify_roundtrip() {
        let (db, report) = load_database_str("0 string \\x7fELF ELF binary\n");
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 0);
        let result = classify(&db, b"\x7fELF\x02\x01\x01");
        assert_eq!(result.formatted_message, "ELF binary");
    }

    #[test]
    fn test_load_reports_rejected_lines() {
        let (db, report) = load_database_str(">0 byte 1 orphan\n0 bogus 1 nope\n");
        assert!(db.is_empty());
        assert_eq!(report.rejected.len(), 2);
    }

    #[test]
    fn test_no_match_yields_empty_result() {
        let (db, _) = load_database_str("0 string MATCHME found\n");
        let result = classify(&db, b"nothing here");
        assert_eq!(result.formatted_message, "");
        assert!(result.mime.is_none());
    }
}
