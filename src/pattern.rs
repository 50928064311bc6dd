//! The pattern record: one parsed source line, plus the flat arena it lives
//! in once owned by a [`crate::database::Database`].
//!
//! Parent/child references are represented as indices into the database's
//! arena rather than owned/weak object pointers, per the re-architecture
//! notes: this removes the reference cycle a Java-style
//! parent-pointer-plus-child-list tree would otherwise have, and keeps
//! traversal cache-friendly.

use crate::criterion::Criterion;
use crate::instruction::Instruction;
use crate::kind::Type;
use crate::message::Message;
use crate::offset::Offset;
use serde::{Deserialize, Serialize};

/// An index into a [`crate::database::Database`]'s pattern arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternId(pub u32);

/// A test's operation: either a criterion (compares a value) or an
/// instruction (affects control flow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// A comparable test.
    Criterion(Criterion),
    /// A control-flow instruction.
    Instruction(Instruction),
}

impl Operation {
    /// Whether this operation is an instruction that matches unconditionally
    /// rather than testing the buffer (every instruction except `Default`,
    /// which defers instead of matching outright).
    pub fn is_unconditional_instruction(&self) -> bool {
        matches!(self, Operation::Instruction(i) if !matches!(i, Instruction::Default))
    }
}

/// One parsed `magic(5)` rule line, owned by a [`crate::database::Database`]
/// arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// Continuation depth: count of leading `>`.
    pub level: u32,
    /// Where to read the tested value from.
    pub offset: Offset,
    /// The type field (tag, unsigned, modifier text).
    pub r#type: Type,
    /// The criterion or instruction this line performs.
    pub operation: Operation,
    /// The message to append to the accumulator on a match.
    pub message: Message,
    /// This pattern's children, in declaration order.
    pub children: Vec<PatternId>,
    /// The parent pattern, or `None` at the top level.
    pub parent: Option<PatternId>,
    /// This pattern's own id in the owning arena, set once inserted.
    pub id: Option<PatternId>,
    /// `!:mime <type>` annotation, if present.
    pub mime: Option<String>,
    /// `!:optional` annotation: this pattern never downgrades a FULL match
    /// to PARTIAL when it itself fails to match.
    pub optional: bool,
    /// The raw, unformatted description text for this line (the message's
    /// pre-`printf`-expansion literal content), used as the classification
    /// result's `raw_message`.
    pub raw_text: String,
}

impl Pattern {
    /// This pattern's cheaply-computed starting bytes, used to bucket it in
    /// the database's first-byte index. `None` when the pattern's offset is
    /// not anchored at buffer position 0, or its criterion contributes no
    /// hint (§4.8 of the rule-engine design).
    pub fn starting_bytes(&self) -> Option<Vec<u8>> {
        let anchored = self.offset.base == 0
            && self
                .offset
                .indirect
                .as_ref()
                .map(|i| i.inner_offset == 0)
                .unwrap_or(true);
        if !anchored {
            return None;
        }
        match &self.operation {
            Operation::Criterion(Criterion::ByteNum(n)) => Some(n.expected.to_le_bytes()[..1].to_vec()),
            Operation::Criterion(Criterion::ShortNum(n)) => Some(encode_numeric(n.expected, 2, n.endian)),
            Operation::Criterion(Criterion::IntNum(n)) => Some(encode_numeric(n.expected, 4, n.endian)),
            Operation::Criterion(Criterion::LongNum(n)) => Some(encode_numeric(n.expected, 8, n.endian)),
            Operation::Criterion(Criterion::Date(n)) => Some(encode_numeric(n.expected, 4, n.endian)),
            Operation::Criterion(Criterion::String(s)) => prefix4(s.expected.as_bytes()),
            Operation::Criterion(Criterion::PascalString(p)) => prefix4(p.expected.as_bytes()),
            _ => None,
        }
    }
}

fn prefix4(bytes: &[u8]) -> Option<Vec<u8>> {
    if bytes.len() < 4 {
        None
    } else {
        Some(bytes[..4].to_vec())
    }
}

fn encode_numeric(expected: i64, width: usize, endian: crate::endian::Endianness) -> Vec<u8> {
    use crate::endian::Endianness;
    let bytes = (expected as u64).to_le_bytes();
    let le = bytes[..width].to_vec();
    match endian.resolve() {
        Endianness::Big => le.into_iter().rev().collect(),
        _ => le,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criterion::NumericCriterion;
    use crate::endian::Endianness;
    use crate::kind::{Type, TypeTag};
    use crate::operator::Operator;

    fn sample_pattern(op: Operation) -> Pattern {
        Pattern {
            level: 0,
            offset: Offset::constant(0),
            r#type: Type::new(TypeTag::Int, false),
            operation: op,
            message: Message::parse("x"),
            children: vec![],
            parent: None,
            id: None,
            mime: None,
            optional: false,
            raw_text: "x".into(),
        }
    }

    #[test]
    fn test_starting_bytes_numeric() {
        let n = NumericCriterion {
            width: 4,
            endian: Endianness::Little,
            unsigned: false,
            id3: false,
            operator: Operator::Equal,
            expected: 0x03cbc6c5,
            premod: None,
        };
        let p = sample_pattern(Operation::Criterion(Criterion::IntNum(n)));
        assert_eq!(p.starting_bytes(), Some(vec![0xc5, 0xc6, 0xcb, 0x03]));
    }

    #[test]
    fn test_non_anchored_has_no_hint() {
        let mut p = sample_pattern(Operation::Instruction(crate::instruction::Instruction::Default));
        p.offset = Offset::constant(4);
        assert_eq!(p.starting_bytes(), None);
    }
}
