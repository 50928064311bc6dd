//! The matcher: the control spine that walks the pattern tree
//! depth-first against a byte buffer and composes a result.

use crate::database::Database;
use crate::instruction::Instruction;
use crate::pattern::{Operation, Pattern, PatternId};
use crate::value::Value;
use serde::Serialize;
use std::time::Instant;

/// Reference: the same recursion bound the source's own loader enforces
/// (`MAX_LEVELS`).
pub const MAX_RECURSION_DEPTH: u32 = 20;

/// Tunables for a single `classify` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    /// An optional wall-clock deadline, checked between top-level pattern
    /// attempts and between `search`/`regex` scan steps. `None` means no
    /// bound is enforced.
    pub deadline: Option<Instant>,
}

/// The outcome of a classification call.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResult {
    /// The un-formatted description from the deepest matched pattern.
    pub raw_message: String,
    /// The MIME type annotated by the deepest-overriding matched pattern,
    /// if any.
    pub mime: Option<String>,
    /// The fully assembled, `printf`-formatted message.
    pub formatted_message: String,
    /// `true` when the best result found was PARTIAL rather than FULL.
    pub partial_only: bool,
    /// The continuation level of the MIME-overriding pattern, if any.
    pub matched_level: Option<u32>,
    /// Recoverable faults encountered on the winning match path (missing
    /// `use` targets, recursion-depth trips, regex failures) that did not
    /// otherwise prevent a result — diagnostic only.
    pub notes: Vec<String>,
}

impl ClassifyResult {
    fn empty() -> ClassifyResult {
        ClassifyResult {
            raw_message: String::new(),
            mime: None,
            formatted_message: String::new(),
            partial_only: false,
            matched_level: None,
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchState {
    NoMatch,
    Partial,
    Full,
}

struct Accumulator {
    state: MatchState,
    buffer: String,
    mime: Option<String>,
    matching_level: Option<u32>,
    raw_message: Option<String>,
    notes: Vec<String>,
}

impl Accumulator {
    fn new() -> Accumulator {
        Accumulator {
            state: MatchState::NoMatch,
            buffer: String::new(),
            mime: None,
            matching_level: None,
            raw_message: None,
            notes: Vec::new(),
        }
    }

    fn promote(&mut self, min: MatchState) {
        if self.state < min {
            self.state = min;
        }
    }

    fn append_message(&mut self, pattern: &Pattern, value: &Value) {
        if pattern.message.is_empty() {
            return;
        }
        if pattern.message.clear_previous {
            self.buffer.clear();
        }
        if !self.buffer.is_empty() && !pattern.message.no_space_prefix {
            self.buffer.push(' ');
        }
        self.buffer.push_str(&pattern.message.format(value));
    }

    fn annotate(&mut self, pattern: &Pattern) {
        if !pattern.raw_text.is_empty() && self.raw_message.is_none() {
            self.raw_message = Some(pattern.raw_text.clone());
        }
        if let Some(mime) = &pattern.mime {
            let deeper = self.matching_level.map(|l| pattern.level > l).unwrap_or(true);
            if self.mime.is_none() || deeper {
                self.mime = Some(mime.clone());
                self.matching_level = Some(pattern.level);
            }
        }
    }

    fn into_result(self) -> ClassifyResult {
        ClassifyResult {
            raw_message: self.raw_message.unwrap_or_default(),
            mime: self.mime,
            formatted_message: self.buffer,
            partial_only: self.state == MatchState::Partial,
            matched_level: self.matching_level,
            notes: self.notes,
        }
    }
}

/// Classify `buf` against `db`, with default options (no deadline).
pub fn classify(db: &Database, buf: &[u8]) -> ClassifyResult {
    classify_with_options(db, buf, &MatchOptions::default())
}

/// Classify `buf` against `db` under `options`.
pub fn classify_with_options(db: &Database, buf: &[u8], options: &MatchOptions) -> ClassifyResult {
    if buf.is_empty() {
        return ClassifyResult::empty();
    }

    if let Some(bucket) = db.bucket_for(buf[0]) {
        if let Some(result) = scan(db, bucket, buf, options) {
            if !result.partial_only {
                return result;
            }
            // A partial hit from the bucket becomes the fallback; still
            // try the full list, since the index is a hint, not a filter.
            if let Some(full_result) = scan(db, db.top_level(), buf, options) {
                return full_result;
            }
            return result;
        }
    }

    scan(db, db.top_level(), buf, options).unwrap_or_else(ClassifyResult::empty)
}

fn scan(db: &Database, candidates: &[PatternId], buf: &[u8], options: &MatchOptions) -> Option<ClassifyResult> {
    let mut best: Option<ClassifyResult> = None;
    for &id in candidates {
        if let Some(deadline) = options.deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        let mut acc = Accumulator::new();
        try_match(db, id, buf, 0, 0, &mut acc, false, 0, options);
        if acc.state == MatchState::NoMatch {
            continue;
        }
        let is_full = acc.state == MatchState::Full;
        let result = acc.into_result();
        if is_full {
            return Some(result);
        }
        if best.is_none() {
            best = Some(result);
        }
    }
    best
}

#[allow(clippy::too_many_arguments)]
fn try_match(
    db: &Database,
    id: PatternId,
    buf: &[u8],
    cursor: i64,
    indirect_base: i64,
    acc: &mut Accumulator,
    invert: bool,
    depth: u32,
    options: &MatchOptions,
) -> bool {
    if depth > MAX_RECURSION_DEPTH {
        acc.notes.push("recursion depth exceeded".to_string());
        return false;
    }

    let pattern = db.get(id);
    let Ok(Some(offset)) = pattern.offset.evaluate(buf, cursor, indirect_base) else {
        return false;
    };

    let mut matched_here = false;
    let mut next_cursor = offset;

    match &pattern.operation {
        Operation::Instruction(Instruction::Use { label, invert: use_invert }) => {
            let Some(target) = db.named(label) else {
                acc.notes.push(format!("unknown use target {label:?}"));
                return false;
            };
            let effective_invert = invert ^ *use_invert;
            let mut sub_acc = Accumulator::new();
            // The subroutine's own offsets are resolved relative to where
            // `use` found the cursor, not the enclosing indirect origin.
            try_match(db, target, buf, offset, offset, &mut sub_acc, effective_invert, depth + 1, options);
            let demote = sub_acc.state == MatchState::Full && !pattern.children.is_empty();
            if demote {
                sub_acc.state = MatchState::Partial;
            }
            acc.promote(sub_acc.state);
            acc.buffer.push_str(&sub_acc.buffer);
            if acc.raw_message.is_none() {
                acc.raw_message = sub_acc.raw_message;
            }
            if acc.mime.is_none() {
                acc.mime = sub_acc.mime;
                acc.matching_level = sub_acc.matching_level;
            }
            acc.notes.extend(sub_acc.notes);
            matched_here = sub_acc.state != MatchState::NoMatch;
            next_cursor = offset;
        }
        Operation::Instruction(Instruction::Indirect { relative }) => {
            let base = if *relative { offset + indirect_base } else { offset };
            let mut best_full = false;
            for &top_id in db.top_level() {
                let mut sub_acc = Accumulator::new();
                try_match(db, top_id, buf, base, base, &mut sub_acc, invert, depth + 1, options);
                if sub_acc.state != MatchState::NoMatch {
                    acc.promote(sub_acc.state);
                    acc.buffer.push_str(&sub_acc.buffer);
                    if acc.raw_message.is_none() {
                        acc.raw_message = sub_acc.raw_message.clone();
                    }
                    if acc.mime.is_none() {
                        acc.mime = sub_acc.mime.clone();
                        acc.matching_level = sub_acc.matching_level;
                    }
                    acc.notes.extend(sub_acc.notes.clone());
                    if sub_acc.state == MatchState::Full {
                        best_full = true;
                        break;
                    }
                }
            }
            matched_here = best_full || acc.state != MatchState::NoMatch;
            next_cursor = offset;
        }
        Operation::Instruction(Instruction::Name(_)) => {
            acc.promote(MatchState::Partial);
            matched_here = true;
        }
        Operation::Instruction(Instruction::Default) => {
            // Handled by the caller's deferred-default logic; standalone
            // evaluation never matches.
            matched_here = false;
        }
        Operation::Criterion(crit) => match crit.evaluate(buf, offset, invert) {
            Ok(outcome) => {
                if !outcome.matched {
                    return false;
                }
                acc.promote(MatchState::Partial);
                next_cursor = outcome.next_offset;
                let value = outcome.matched_value.unwrap_or(Value::None);
                acc.append_message(pattern, &value);
                matched_here = true;
            }
            Err(e) => {
                acc.notes.push(e.to_string());
                return false;
            }
        },
    }

    if !matched_here {
        return false;
    }

    acc.annotate(pattern);

    if !pattern.children.is_empty() {
        let mut all_optional = true;
        let mut none_matched = true;
        let mut deferred_default: Option<PatternId> = None;

        for &child_id in &pattern.children {
            let child = db.get(child_id);
            if matches!(child.operation, Operation::Instruction(Instruction::Default)) {
                deferred_default = Some(child_id);
                continue;
            }
            if !child.optional {
                all_optional = false;
            }
            let child_matched = try_match(db, child_id, buf, next_cursor, indirect_base, acc, invert, depth + 1, options);
            if child_matched && !child.optional {
                none_matched = false;
            }
        }

        if none_matched {
            if let Some(default_id) = deferred_default {
                try_match(db, default_id, buf, next_cursor, indirect_base, acc, invert, depth + 1, options);
            }
        }
        // Full iff some descendant already reached a leaf, or every child
        // was optional (so this level alone is as deep as matching goes).
        if acc.state == MatchState::Full || all_optional {
            acc.state = MatchState::Full;
        }
    } else if !matches!(
        pattern.operation,
        Operation::Instruction(Instruction::Use { .. }) | Operation::Instruction(Instruction::Indirect { .. })
    ) {
        // A childless `use`/`indirect` line defers its depth entirely to
        // the recursive call already folded into `acc` above.
        acc.state = MatchState::Full;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    fn db_from(src: &str) -> Database {
        let lines: Vec<(usize, &str)> = src.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
        Database::load(lines, None).0
    }

    #[test]
    fn test_little_endian_integer() {
        let db = db_from("0 lelong 0x03cbc6c5 match");
        let buf = [0xc5, 0xc6, 0xcb, 0x03];
        let result = classify(&db, &buf);
        assert_eq!(result.formatted_message, "match");
        assert!(!result.partial_only);
    }

    #[test]
    fn test_big_endian_unsigned_greater_than() {
        let db = db_from("0 ubelong >0xF0000000 match");
        let buf = [0xFF, 0xFF, 0xFF, 0xFF];
        let result = classify(&db, &buf);
        assert_eq!(result.formatted_message, "match");

        let db_signed = db_from("0 belong >0xF0000000 match");
        let buf2 = [0x7F, 0xFF, 0xFF, 0xFF];
        assert_eq!(classify(&db_signed, &buf2).formatted_message, "match");

        let db_unsigned2 = db_from("0 ubelong >0xF0000000 match");
        assert_eq!(classify(&db_unsigned2, &buf2).formatted_message, "");
    }

    #[test]
    fn test_search_with_optional_whitespace() {
        let db = db_from(r"0 search/10/w h\ e\ llo %s");
        let buf = b"12hello 24";
        let result = classify(&db, buf);
        assert_eq!(result.formatted_message, "h e llo");
    }

    #[test]
    fn test_pascal_string_length() {
        let db = db_from("0 pstring =hello");
        let buf = [0x05, b'h', b'e', b'l', b'l', b'o', 0xFF];
        let result = classify(&db, &buf);
        assert!(!result.partial_only);
        assert_ne!(result.raw_message, "");
    }

    #[test]
    fn test_named_use_with_endian_inversion() {
        // `swapped` declares its check as big-endian; invoking it through
        // `use \^swapped` flips that to little-endian for this call only.
        let src = "0 name swapped\n>0 beshort 0x0102 ok\n\
                    0 belong 0xDEADBEEF header\n>&0 use ^swapped\n";
        let db = db_from(src);
        let buf = [0xDE, 0xAD, 0xBE, 0xEF, 0x02, 0x01];
        let result = classify(&db, &buf);
        assert_eq!(result.formatted_message, "header ok");
        assert!(!result.partial_only);
    }

    #[test]
    fn test_empty_buffer() {
        let db = db_from("0 byte 1 x");
        let result = classify(&db, &[]);
        assert_eq!(result.formatted_message, "");
        assert!(result.mime.is_none());
    }

    #[test]
    fn test_idempotent() {
        let db = db_from("0 lelong 0x03cbc6c5 match");
        let buf = [0xc5, 0xc6, 0xcb, 0x03];
        let a = classify(&db, &buf);
        let b = classify(&db, &buf);
        assert_eq!(a.formatted_message, b.formatted_message);
    }
}
