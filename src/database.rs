//! The rule database: owns the pattern arena, the top-level list, the
//! first-byte index, and the name→pattern map.

use crate::error::RuleError;
use crate::instruction::Instruction;
use crate::parser::{self, ExtensionLine};
use crate::pattern::{Operation, Pattern, PatternId};
use std::collections::HashMap;

/// A rejected rule line, reported through the load-time error callback.
#[derive(Debug, Clone)]
pub struct RejectedRule {
    /// 1-based source line number.
    pub line: usize,
    /// The original line text.
    pub text: String,
    /// Why the rule was rejected.
    pub error: RuleError,
}

/// A summary of one `Database::load` call, for callers who want a
/// structured count rather than only the per-rule callback.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LoadReport {
    /// Number of rule lines successfully parsed and attached.
    pub accepted: usize,
    /// Rejected rules, in source order.
    pub rejected: Vec<String>,
}

/// The loaded, read-only rule database.
#[derive(Debug, Clone, Default)]
pub struct Database {
    arena: Vec<Pattern>,
    top_level: Vec<PatternId>,
    first_byte_index: HashMap<u8, Vec<PatternId>>,
    named: HashMap<String, PatternId>,
}

impl Database {
    /// Build a database from an iterator of `(line_number, text)` pairs, as
    /// described in the external-interfaces contract: blank lines and `#`
    /// comments are skipped; `!:` lines annotate the previous pattern;
    /// everything else is a pattern line. Rejected rules are reported to
    /// `on_error` (if given) and dropped; the returned [`LoadReport`]
    /// summarizes the whole run.
    pub fn load<'a, I>(lines: I, mut on_error: Option<&mut dyn FnMut(RejectedRule)>) -> (Database, LoadReport)
    where
        I: IntoIterator<Item = (usize, &'a str)>,
    {
        let mut db = Database::default();
        let mut report = LoadReport::default();
        // parent_at[level] = the most recently attached pattern at that level.
        let mut parent_at: Vec<Option<PatternId>> = Vec::new();
        let mut last_pattern: Option<PatternId> = None;

        for (line_no, raw) in lines {
            let text = raw.trim_end_matches(['\n', '\r']);
            let trimmed = text.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some(tail) = trimmed.strip_prefix("!:") {
                if let Some(id) = last_pattern {
                    match parser::parse_extension(tail) {
                        ExtensionLine::Mime(m) => db.arena[id.0 as usize].mime = Some(m),
                        ExtensionLine::Optional => db.arena[id.0 as usize].optional = true,
                        ExtensionLine::Ignored => {}
                    }
                }
                continue;
            }

            match parser::parse_line(line_no, text) {
                Ok(mut pattern) => {
                    let level = pattern.level as usize;
                    if level > 0 {
                        let parent_level = level - 1;
                        let Some(Some(parent_id)) = parent_at.get(parent_level).copied() else {
                            let err = RuleError::MissingParent {
                                line: line_no,
                                level: pattern.level,
                                parent_level: parent_level as u32,
                            };
                            report.rejected.push(err.to_string());
                            if let Some(cb) = on_error.as_deref_mut() {
                                cb(RejectedRule {
                                    line: line_no,
                                    text: text.to_string(),
                                    error: err,
                                });
                            }
                            continue;
                        };
                        pattern.parent = Some(parent_id);
                    }

                    if let Operation::Instruction(Instruction::Name(label)) = &pattern.operation {
                        if db.named.contains_key(label) {
                            let err = RuleError::NameCollision {
                                line: line_no,
                                label: label.clone(),
                            };
                            report.rejected.push(err.to_string());
                            if let Some(cb) = on_error.as_deref_mut() {
                                cb(RejectedRule {
                                    line: line_no,
                                    text: text.to_string(),
                                    error: err,
                                });
                            }
                            continue;
                        }
                    }

                    let id = PatternId(db.arena.len() as u32);
                    pattern.id = Some(id);

                    if let Operation::Instruction(Instruction::Name(label)) = &pattern.operation {
                        db.named.insert(label.clone(), id);
                    }

                    if let Some(parent_id) = pattern.parent {
                        db.arena[parent_id.0 as usize].children.push(id);
                    } else {
                        db.top_level.push(id);
                    }

                    if parent_at.len() <= level {
                        parent_at.resize(level + 1, None);
                    }
                    parent_at[level] = Some(id);
                    parent_at.truncate(level + 1);

                    db.arena.push(pattern);
                    last_pattern = Some(id);
                    report.accepted += 1;
                }
                Err(err) => {
                    report.rejected.push(err.to_string());
                    if let Some(cb) = on_error.as_deref_mut() {
                        cb(RejectedRule {
                            line: line_no,
                            text: text.to_string(),
                            error: err,
                        });
                    }
                }
            }
        }

        db.build_first_byte_index();
        (db, report)
    }

    fn build_first_byte_index(&mut self) {
        for &id in &self.top_level.clone() {
            if let Some(bytes) = self.arena[id.0 as usize].starting_bytes() {
                if let Some(&first) = bytes.first() {
                    self.first_byte_index.entry(first).or_default().push(id);
                }
            }
        }
    }

    /// The top-level pattern list, in declaration order.
    pub fn top_level(&self) -> &[PatternId] {
        &self.top_level
    }

    /// The patterns bucketed under `byte`'s first-byte hint, if any.
    pub fn bucket_for(&self, byte: u8) -> Option<&[PatternId]> {
        self.first_byte_index.get(&byte).map(|v| v.as_slice())
    }

    /// Look up a named subroutine.
    pub fn named(&self, label: &str) -> Option<PatternId> {
        self.named.get(label).copied()
    }

    /// Resolve a pattern id to its data.
    pub fn get(&self, id: PatternId) -> &Pattern {
        &self.arena[id.0 as usize]
    }

    /// Number of patterns in the arena.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the database holds no patterns at all.
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &'static str) -> Vec<(usize, &'static str)> {
        text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect()
    }

    #[test]
    fn test_build_simple_tree() {
        let src = "0 belong 0xDEADBEEF parent\n>0 leshort 0x0102 child\n";
        let (db, report) = Database::load(lines(src), None);
        assert_eq!(report.accepted, 2);
        assert_eq!(db.top_level().len(), 1);
        let top = db.get(db.top_level()[0]);
        assert_eq!(top.children.len(), 1);
    }

    #[test]
    fn test_missing_parent_is_rejected() {
        let src = ">0 byte 1 orphan\n";
        let (db, report) = Database::load(lines(src), None);
        assert_eq!(report.accepted, 0);
        assert!(db.top_level().is_empty());
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let src = "0 name swapped\n0 name swapped\n";
        let (db, report) = Database::load(lines(src), None);
        assert_eq!(report.accepted, 1);
        assert_eq!(db.named("swapped").is_some(), true);
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn test_first_byte_index() {
        let src = "0 lelong 0x03cbc6c5 match\n";
        let (db, _) = Database::load(lines(src), None);
        let bucket = db.bucket_for(0xc5).expect("bucket present");
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn test_extension_lines_apply_to_previous_pattern() {
        let src = "0 string ABC label\n!:mime text/plain\n!:optional\n";
        let (db, _) = Database::load(lines(src), None);
        let p = db.get(db.top_level()[0]);
        assert_eq!(p.mime.as_deref(), Some("text/plain"));
        assert!(p.optional);
    }
}
