//! The offset model: constant, relative, and indirect offsets, with the
//! indirect flavour's own endian-typed read and optional arithmetic
//! modification.

use crate::endian::{read_uint, Endianness};
use crate::error::RuleError;
use serde::{Deserialize, Serialize};

/// How an indirect pointer is read from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetReadType {
    /// Byte order of the read.
    pub endian: Endianness,
    /// Width in bytes: 1, 2, 4, or 8.
    pub width: usize,
    /// Whether to decode as ID3 7-bit-per-byte instead of a plain integer.
    pub id3: bool,
}

impl Default for OffsetReadType {
    /// `.l` — little-endian, 4 bytes.
    fn default() -> Self {
        OffsetReadType {
            endian: Endianness::Little,
            width: 4,
            id3: false,
        }
    }
}

impl OffsetReadType {
    /// Parse the single type character following `.` in an offset
    /// expression: `b s i l B S I L m`, case indicating endianness.
    pub fn from_char(c: char) -> Option<OffsetReadType> {
        let (width, endian, id3) = match c {
            'b' => (1, Endianness::Little, false),
            'B' => (1, Endianness::Big, false),
            's' => (2, Endianness::Little, false),
            'S' => (2, Endianness::Big, false),
            'i' => (4, Endianness::Little, true),
            'I' => (4, Endianness::Big, true),
            'l' => (4, Endianness::Little, false),
            'L' => (4, Endianness::Big, false),
            'm' => (4, Endianness::Middle, false),
            _ => return None,
        };
        Some(OffsetReadType { endian, width, id3 })
    }
}

/// An arithmetic modification applied to an indirect read, e.g. `+4` or
/// `*(2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetModification {
    /// The arithmetic/bitwise operator.
    pub op: crate::operator::Operator,
    /// The literal operand, used unless `operand_indirect`.
    pub operand: i64,
    /// Whether the operand is itself read from the buffer.
    pub operand_indirect: bool,
    /// The read type for the operand, when `operand_indirect`.
    pub operand_read_type: Option<OffsetReadType>,
}

/// The inner machinery of an indirect offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndirectOffset {
    /// The inner offset naming where the pointer itself is read from.
    pub inner_offset: i64,
    /// Whether `inner_offset` is relative to the current read cursor.
    pub inner_relative: bool,
    /// How to decode the pointer value once read.
    pub read_type: OffsetReadType,
    /// An optional arithmetic adjustment to the decoded pointer.
    pub modification: Option<OffsetModification>,
}

/// An offset expression: constant, relative, or indirect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offset {
    /// The constant base; ignored when `indirect` is present.
    pub base: i64,
    /// Whether `base` is added to the current read cursor.
    pub relative: bool,
    /// The indirect read, when this offset is computed from the buffer.
    pub indirect: Option<IndirectOffset>,
}

impl Offset {
    /// A plain constant offset.
    pub fn constant(base: i64) -> Offset {
        Offset {
            base,
            relative: false,
            indirect: None,
        }
    }

    /// Evaluate this offset against `buf`, given the current read cursor
    /// and the indirect base (the start of the enclosing `indirect`
    /// instruction's subtree, or 0 at the top level).
    ///
    /// Returns `Ok(None)` for an out-of-range indirect read (terminates the
    /// pattern as "no match" rather than erroring); `Err` for a negative
    /// resulting offset, which is a rule error per the matcher's failure
    /// semantics.
    pub fn evaluate(
        &self,
        buf: &[u8],
        cursor: i64,
        indirect_base: i64,
    ) -> Result<Option<i64>, RuleError> {
        if let Some(ind) = &self.indirect {
            let ptr_offset = if ind.inner_relative {
                ind.inner_offset + cursor
            } else {
                ind.inner_offset + indirect_base
            };
            if ptr_offset < 0 {
                return Err(negative_offset());
            }
            let raw = if ind.read_type.id3 {
                crate::endian::read_id3(buf, ptr_offset as usize, ind.read_type.width, ind.read_type.endian)
            } else {
                read_uint(buf, ptr_offset as usize, ind.read_type.width, ind.read_type.endian)
            };
            let Some(raw) = raw else { return Ok(None) };
            let mut value = crate::endian::sign_extend(raw, ind.read_type.width);

            if let Some(m) = &ind.modification {
                let operand = if m.operand_indirect {
                    let rt = m.operand_read_type.unwrap_or_default();
                    let operand_offset = ptr_offset + m.operand;
                    if operand_offset < 0 {
                        return Err(negative_offset());
                    }
                    let raw_operand = read_uint(buf, operand_offset as usize, rt.width, rt.endian);
                    match raw_operand {
                        Some(v) => crate::endian::sign_extend(v, rt.width),
                        None => return Ok(None),
                    }
                } else {
                    m.operand
                };
                value = m.op.apply_arith(value, operand)?;
            }

            let resolved = value + indirect_base;
            if resolved < 0 {
                return Err(negative_offset());
            }
            Ok(Some(resolved))
        } else {
            let resolved = if self.relative { self.base + cursor } else { self.base + indirect_base };
            if resolved < 0 {
                return Err(negative_offset());
            }
            Ok(Some(resolved))
        }
    }
}

fn negative_offset() -> RuleError {
    RuleError::RuleSyntax {
        line: 0,
        text: String::new(),
        detail: "negative offset".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Operator;

    #[test]
    fn test_constant_offset() {
        let off = Offset::constant(4);
        let buf = [0u8; 16];
        assert_eq!(off.evaluate(&buf, 100, 0).unwrap(), Some(4));
    }

    #[test]
    fn test_relative_offset() {
        let off = Offset {
            base: 2,
            relative: true,
            indirect: None,
        };
        let buf = [0u8; 16];
        assert_eq!(off.evaluate(&buf, 10, 0).unwrap(), Some(12));
    }

    #[test]
    fn test_indirect_with_modification() {
        let buf = [0x00, 0x00, 0x00, 0x04]; // belong at 0 -> 4
        let off = Offset {
            base: 0,
            relative: false,
            indirect: Some(IndirectOffset {
                inner_offset: 0,
                inner_relative: false,
                read_type: OffsetReadType {
                    endian: Endianness::Big,
                    width: 4,
                    id3: false,
                },
                modification: Some(OffsetModification {
                    op: Operator::Add,
                    operand: 10,
                    operand_indirect: false,
                    operand_read_type: None,
                }),
            }),
        };
        assert_eq!(off.evaluate(&buf, 0, 0).unwrap(), Some(14));
    }

    #[test]
    fn test_out_of_range_indirect_yields_none() {
        let buf = [0u8; 2];
        let off = Offset {
            base: 0,
            relative: false,
            indirect: Some(IndirectOffset {
                inner_offset: 0,
                inner_relative: false,
                read_type: OffsetReadType::default(),
                modification: None,
            }),
        };
        assert_eq!(off.evaluate(&buf, 0, 0).unwrap(), None);
    }

    #[test]
    fn test_negative_offset_is_error() {
        let off = Offset::constant(-1);
        let buf = [0u8; 4];
        assert!(off.evaluate(&buf, 0, 0).is_err());
    }
}
