//! Criterion evaluation: the comparable tests over an extracted value.

use crate::endian::{self, Endianness};
use crate::error::RuleError;
use crate::operator::Operator;
use crate::value::Value;
use bitflags::bitflags;
use memchr::memchr;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Modifier flags parsed from a `string`/`search` type's `/[WwcCtbT]`
    /// tail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StringFlags: u8 {
        /// `W` — compact whitespace: expected run must match at least that
        /// many whitespace characters in the actual value.
        const COMPACT_WHITESPACE = 0b0000_0001;
        /// `w` — optional whitespace: each expected whitespace matches zero
        /// or more actual whitespace characters.
        const OPTIONAL_WHITESPACE = 0b0000_0010;
        /// `c` — lower-case letters in the expected pattern match either case.
        const LOWER_INSENSITIVE = 0b0000_0100;
        /// `C` — upper-case letters in the expected pattern match either case.
        const UPPER_INSENSITIVE = 0b0000_1000;
        /// `T` — trim the matched result prior to formatting.
        const TRIM = 0b0001_0000;
        /// `t` — text hint (parsed, ignored at evaluation level).
        const TEXT_HINT = 0b0010_0000;
        /// `b` — binary hint (parsed, ignored at evaluation level).
        const BINARY_HINT = 0b0100_0000;
    }
}

impl StringFlags {
    /// Parse the modifier tail following a `string`/`search` type name.
    pub fn parse(modifier: &str) -> StringFlags {
        let mut flags = StringFlags::empty();
        for c in modifier.chars() {
            match c {
                'W' => flags |= StringFlags::COMPACT_WHITESPACE,
                'w' => flags |= StringFlags::OPTIONAL_WHITESPACE,
                'c' => flags |= StringFlags::LOWER_INSENSITIVE,
                'C' => flags |= StringFlags::UPPER_INSENSITIVE,
                'T' => flags |= StringFlags::TRIM,
                't' => flags |= StringFlags::TEXT_HINT,
                'b' => flags |= StringFlags::BINARY_HINT,
                _ => {}
            }
        }
        flags
    }
}

/// The shared payload of a numeric (byte/short/int/long/float/double/id3)
/// criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericCriterion {
    /// Byte width of the read.
    pub width: usize,
    /// Byte order of the read (before any `invert_endianness` is applied).
    pub endian: Endianness,
    /// Whether comparisons widen to `u64` instead of sign-extending.
    pub unsigned: bool,
    /// Whether the read decodes ID3 7-bit bytes instead of a plain integer.
    pub id3: bool,
    /// The comparison operator.
    pub operator: Operator,
    /// The expected value, as a signed 64-bit integer.
    pub expected: i64,
    /// An optional pre-comparison modifier, e.g. `&0xff` or the
    /// undocumented `-N` date adjustment.
    pub premod: Option<(Operator, i64)>,
}

/// The shared payload of a float/double criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatCriterion {
    /// 4 for `float`, 8 for `double`.
    pub width: usize,
    /// Byte order of the read.
    pub endian: Endianness,
    /// The comparison operator (only `=`, `!`, `<`, `>` are valid).
    pub operator: Operator,
    /// The expected value.
    pub expected: f64,
}

/// A text criterion's shared payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringCriterion {
    /// The expected text, after C-escape expansion.
    pub expected: String,
    /// The comparison operator (`=`, `!`, `<`, `>`).
    pub operator: Operator,
    /// Parsed `/[WwcCtbT]` flags.
    pub flags: StringFlags,
}

/// A Pascal-length-prefixed string criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PascalStringCriterion {
    /// The expected text (literal comparison only).
    pub expected: String,
    /// Length-prefix width in bytes: 1, 2, or 4.
    pub len_width: usize,
    /// Endianness of the length prefix.
    pub len_endian: Endianness,
    /// `/J`: subtract the prefix width from the decoded length.
    pub subtract_prefix: bool,
}

/// A UTF-16 string criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct String16Criterion {
    /// The expected text, matched code-unit-for-code-unit.
    pub expected: String,
    /// Byte order of the UTF-16 view.
    pub endian: Endianness,
}

/// A `search` criterion: a string scanned over a range of starting offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriterion {
    /// The text payload (flags, operator, expected value).
    pub text: StringCriterion,
    /// Maximum number of starting offsets to scan, from `/range`.
    pub range: usize,
}

/// A `regex` criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegexCriterion {
    /// The original, unexpanded pattern text (for diagnostics).
    pub pattern: String,
    /// Case-insensitive (`/c`).
    pub case_insensitive: bool,
    /// `/s`: move `next_offset` to the match start rather than its end.
    /// Parsed but unused, matching the source dialect's own limitation —
    /// see the design notes.
    pub update_offset_to_start: bool,
    #[serde(skip, default = "rebuild_regex_placeholder")]
    compiled: std::sync::Arc<regex::bytes::Regex>,
}

fn rebuild_regex_placeholder() -> std::sync::Arc<regex::bytes::Regex> {
    std::sync::Arc::new(regex::bytes::Regex::new("").expect("empty regex always compiles"))
}

impl RegexCriterion {
    /// Compile `pattern`, applying the case-insensitive flag as an inline
    /// `(?i)` prefix.
    pub fn compile(pattern: &str, case_insensitive: bool, update_offset_to_start: bool) -> Result<RegexCriterion, regex::Error> {
        let effective = if case_insensitive {
            format!("(?i){pattern}")
        } else {
            pattern.to_string()
        };
        let compiled = regex::bytes::Regex::new(&effective)?;
        Ok(RegexCriterion {
            pattern: pattern.to_string(),
            case_insensitive,
            update_offset_to_start,
            compiled: std::sync::Arc::new(compiled),
        })
    }
}

impl PartialEq for RegexCriterion {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.case_insensitive == other.case_insensitive
    }
}

/// The outcome of evaluating a single criterion against the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionOutcome {
    /// Whether the criterion matched.
    pub matched: bool,
    /// The cursor to resume descent from, when matched.
    pub next_offset: i64,
    /// The value to carry to the message formatter, when matched.
    pub matched_value: Option<Value>,
}

fn no_match() -> CriterionOutcome {
    CriterionOutcome {
        matched: false,
        next_offset: 0,
        matched_value: None,
    }
}

/// A disjoint union of the comparable test kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Criterion {
    /// 1-byte integer test.
    ByteNum(NumericCriterion),
    /// 2-byte integer test.
    ShortNum(NumericCriterion),
    /// 4-byte integer test.
    IntNum(NumericCriterion),
    /// 8-byte integer test.
    LongNum(NumericCriterion),
    /// IEEE single test.
    Float(FloatCriterion),
    /// IEEE double test.
    Double(FloatCriterion),
    /// ID3 7-bit-length test.
    Id3(NumericCriterion),
    /// Numeric test whose matched value is rendered as a calendar date.
    Date(NumericCriterion),
    /// Literal text test.
    String(StringCriterion),
    /// Pascal-length-prefixed text test.
    PascalString(PascalStringCriterion),
    /// UTF-16 text test.
    String16(String16Criterion),
    /// Scanned text test.
    Search(SearchCriterion),
    /// Regular-expression test.
    Regex(RegexCriterion),
}

impl Criterion {
    /// Evaluate this criterion at `offset` in `buf`.
    pub fn evaluate(
        &self,
        buf: &[u8],
        offset: i64,
        invert_endianness: bool,
    ) -> Result<CriterionOutcome, RuleError> {
        if offset < 0 {
            return Ok(no_match());
        }
        let start = offset as usize;
        match self {
            Criterion::ByteNum(n) | Criterion::ShortNum(n) | Criterion::IntNum(n) | Criterion::LongNum(n) | Criterion::Id3(n) => {
                eval_numeric(n, buf, start, offset, invert_endianness)
            }
            Criterion::Date(n) => eval_date(n, buf, start, offset, invert_endianness),
            Criterion::Float(fl) => eval_float(fl, buf, start, offset, invert_endianness, false),
            Criterion::Double(fl) => eval_float(fl, buf, start, offset, invert_endianness, true),
            Criterion::String(s) => Ok(eval_string(s, buf, start, offset).unwrap_or_else(no_match)),
            Criterion::PascalString(p) => Ok(eval_pstring(p, buf, start, offset).unwrap_or_else(no_match)),
            Criterion::String16(s) => Ok(eval_string16(s, buf, start, offset, invert_endianness).unwrap_or_else(no_match)),
            Criterion::Search(s) => Ok(eval_search(s, buf, start)),
            Criterion::Regex(r) => Ok(eval_regex(r, buf, start)),
        }
    }
}

fn eval_numeric(
    n: &NumericCriterion,
    buf: &[u8],
    start: usize,
    offset: i64,
    invert_endianness: bool,
) -> Result<CriterionOutcome, RuleError> {
    let endian = if invert_endianness { n.endian.invert() } else { n.endian };
    let raw = if n.id3 {
        endian::read_id3(buf, start, n.width, endian)
    } else {
        endian::read_uint(buf, start, n.width, endian)
    };
    let Some(raw) = raw else { return Ok(no_match()) };

    let mut signed = endian::sign_extend(raw, n.width);
    if let Some((op, operand)) = n.premod {
        signed = op.apply_arith(signed, operand)?;
    }

    let matched = compare_numeric(signed, raw, n.operator, n.unsigned, n.expected, n.width)?;
    if !matched {
        return Ok(no_match());
    }
    let value = if n.unsigned {
        Value::Unsigned(signed as u64 & width_mask(n.width))
    } else {
        Value::Signed(signed)
    };
    Ok(CriterionOutcome {
        matched: true,
        next_offset: offset + n.width as i64,
        matched_value: Some(value),
    })
}

/// Like [`eval_numeric`], but on a match the value carried to the message
/// formatter is the matched timestamp rendered as a UTC calendar date
/// rather than the raw integer.
fn eval_date(
    n: &NumericCriterion,
    buf: &[u8],
    start: usize,
    offset: i64,
    invert_endianness: bool,
) -> Result<CriterionOutcome, RuleError> {
    let endian = if invert_endianness { n.endian.invert() } else { n.endian };
    let Some(raw) = endian::read_uint(buf, start, n.width, endian) else {
        return Ok(no_match());
    };
    let mut signed = endian::sign_extend(raw, n.width);
    if let Some((op, operand)) = n.premod {
        signed = op.apply_arith(signed, operand)?;
    }
    if !compare_numeric(signed, raw, n.operator, n.unsigned, n.expected, n.width)? {
        return Ok(no_match());
    }
    let text = chrono::DateTime::from_timestamp(signed, 0)
        .map(|dt| dt.format("%a %b %e %T %Y").to_string())
        .unwrap_or_else(|| signed.to_string());
    Ok(CriterionOutcome {
        matched: true,
        next_offset: offset + n.width as i64,
        matched_value: Some(Value::Text(text)),
    })
}

fn width_mask(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

fn compare_numeric(
    signed: i64,
    raw_unsigned_bits: u64,
    op: Operator,
    unsigned: bool,
    expected: i64,
    width: usize,
) -> Result<bool, RuleError> {
    Ok(match op {
        Operator::NoOp => true,
        Operator::Equal => {
            if unsigned {
                (raw_unsigned_bits & width_mask(width)) == (expected as u64 & width_mask(width))
            } else {
                signed == expected
            }
        }
        Operator::NotEqual => {
            if unsigned {
                (raw_unsigned_bits & width_mask(width)) != (expected as u64 & width_mask(width))
            } else {
                signed != expected
            }
        }
        Operator::Greater => {
            if unsigned {
                (raw_unsigned_bits & width_mask(width)) > (expected as u64 & width_mask(width))
            } else {
                signed > expected
            }
        }
        Operator::Less => {
            if unsigned {
                (raw_unsigned_bits & width_mask(width)) < (expected as u64 & width_mask(width))
            } else {
                signed < expected
            }
        }
        Operator::AllSet => (raw_unsigned_bits as i64 & expected) == expected,
        Operator::AllClear => (raw_unsigned_bits as i64 & expected) == 0,
        Operator::Complement => {
            let mask = width_mask(width) as i64;
            (signed & mask) == (!expected & mask)
        }
        other => {
            return Err(RuleError::UnknownOperator {
                line: 0,
                op: format!("{other:?}"),
            })
        }
    })
}

fn eval_float(
    fl: &FloatCriterion,
    buf: &[u8],
    start: usize,
    offset: i64,
    invert_endianness: bool,
    is_double: bool,
) -> Result<CriterionOutcome, RuleError> {
    let endian = if invert_endianness { fl.endian.invert() } else { fl.endian };
    let Some(raw) = endian::read_uint(buf, start, fl.width, endian) else {
        return Ok(no_match());
    };
    let (actual, value) = if is_double {
        let d = endian::bits_to_f64(raw);
        (d, Value::Double(d))
    } else {
        let f = endian::bits_to_f32(raw);
        (f as f64, Value::Float(f))
    };
    let matched = match fl.operator {
        Operator::Equal => actual == fl.expected,
        Operator::NotEqual => actual != fl.expected,
        Operator::Greater => actual > fl.expected,
        Operator::Less => actual < fl.expected,
        Operator::NoOp => true,
        other => {
            return Err(RuleError::UnknownOperator {
                line: 0,
                op: format!("{other:?} invalid for float/double"),
            })
        }
    };
    if !matched {
        return Ok(no_match());
    }
    Ok(CriterionOutcome {
        matched: true,
        next_offset: offset + fl.width as i64,
        matched_value: Some(value),
    })
}

fn is_whitespace(b: u8) -> bool {
    b == b' ' || b == b'\t' || b == b'\n' || b == b'\r'
}

/// Compare `actual` against `expected` under the string flags, returning the
/// number of actual bytes consumed on success.
fn string_compare(actual: &[u8], expected: &[u8], flags: StringFlags, op: Operator) -> Option<usize> {
    let mut ai = 0usize;
    let mut ei = 0usize;
    let mut last_cmp = std::cmp::Ordering::Equal;
    while ei < expected.len() {
        let ec = expected[ei];
        if is_whitespace(ec) && flags.contains(StringFlags::COMPACT_WHITESPACE) {
            // Consecutive expected whitespace chars collapse into one run:
            // the actual whitespace run is only consumed once, on the first
            // of them.
            while ei < expected.len() && is_whitespace(expected[ei]) {
                ei += 1;
            }
            let run_start = ai;
            while ai < actual.len() && is_whitespace(actual[ai]) {
                ai += 1;
            }
            if ai == run_start {
                return None;
            }
            continue;
        }
        if is_whitespace(ec) && flags.contains(StringFlags::OPTIONAL_WHITESPACE) {
            while ai < actual.len() && is_whitespace(actual[ai]) {
                ai += 1;
            }
            ei += 1;
            continue;
        }
        if ai >= actual.len() {
            return None;
        }
        let ac = actual[ai];
        let eq = char_eq(ac, ec, flags);
        if !eq {
            if matches!(op, Operator::Less | Operator::Greater) {
                last_cmp = ac.cmp(&ec);
            } else {
                return None;
            }
        } else {
            last_cmp = std::cmp::Ordering::Equal;
        }
        ai += 1;
        ei += 1;
    }
    match op {
        Operator::Less => {
            if last_cmp == std::cmp::Ordering::Less || last_cmp == std::cmp::Ordering::Equal {
                Some(ai)
            } else {
                None
            }
        }
        Operator::Greater => {
            if last_cmp == std::cmp::Ordering::Greater || last_cmp == std::cmp::Ordering::Equal {
                Some(ai)
            } else {
                None
            }
        }
        _ => Some(ai),
    }
}

fn char_eq(actual: u8, expected: u8, flags: StringFlags) -> bool {
    if actual == expected {
        return true;
    }
    if flags.contains(StringFlags::LOWER_INSENSITIVE) && expected.is_ascii_lowercase() {
        return actual.to_ascii_lowercase() == expected;
    }
    if flags.contains(StringFlags::UPPER_INSENSITIVE) && expected.is_ascii_uppercase() {
        return actual.to_ascii_uppercase() == expected;
    }
    false
}

fn eval_string(s: &StringCriterion, buf: &[u8], start: usize, offset: i64) -> Option<CriterionOutcome> {
    if start > buf.len() {
        return None;
    }
    let expected = s.expected.as_bytes();
    match s.operator {
        Operator::NoOp => Some(CriterionOutcome {
            matched: true,
            next_offset: offset,
            matched_value: Some(Value::Text(String::new())),
        }),
        Operator::NotEqual => {
            // NotEqual matches exactly when the forward `=` compare fails.
            if string_compare(&buf[start..], expected, s.flags, Operator::Equal).is_some() {
                return None;
            }
            Some(CriterionOutcome {
                matched: true,
                next_offset: offset + expected.len() as i64,
                matched_value: Some(Value::Text(s.expected.clone())),
            })
        }
        Operator::Equal | Operator::Less | Operator::Greater => {
            let consumed = string_compare(&buf[start..], expected, s.flags, s.operator)?;
            let mut text = String::from_utf8_lossy(&buf[start..start + consumed]).into_owned();
            if s.flags.contains(StringFlags::TRIM) {
                text = text.trim().to_string();
            }
            Some(CriterionOutcome {
                matched: true,
                next_offset: offset + consumed as i64,
                matched_value: Some(Value::Text(text)),
            })
        }
        _ => None,
    }
}

fn eval_pstring(p: &PascalStringCriterion, buf: &[u8], start: usize, offset: i64) -> Option<CriterionOutcome> {
    let len_endian = p.len_endian;
    let raw_len = endian::read_uint(buf, start, p.len_width, len_endian)? as i64;
    let mut len = raw_len;
    if p.subtract_prefix {
        len -= p.len_width as i64;
    }
    if len < 0 {
        return None;
    }
    let len = len as usize;
    let data_start = start + p.len_width;
    let data_end = data_start.checked_add(len)?;
    if data_end > buf.len() {
        return None;
    }
    if &buf[data_start..data_end] != p.expected.as_bytes() {
        return None;
    }
    Some(CriterionOutcome {
        matched: true,
        next_offset: offset + (p.len_width + len) as i64,
        matched_value: Some(Value::Text(p.expected.clone())),
    })
}

fn eval_string16(s: &String16Criterion, buf: &[u8], start: usize, offset: i64, invert_endianness: bool) -> Option<CriterionOutcome> {
    let endian = if invert_endianness { s.endian.invert() } else { s.endian };
    let units = s.expected.encode_utf16().count();
    let actual = endian::read_utf16(buf, start, units, endian)?;
    let expected: Vec<u16> = s.expected.encode_utf16().collect();
    if actual != expected {
        return None;
    }
    Some(CriterionOutcome {
        matched: true,
        next_offset: offset + (units * 2) as i64,
        matched_value: Some(Value::Text(s.expected.clone())),
    })
}

fn eval_search(s: &SearchCriterion, buf: &[u8], start: usize) -> CriterionOutcome {
    if start > buf.len() {
        return no_match();
    }
    let window = &buf[start..];
    let expected = s.text.expected.as_bytes();
    let scan_whole_buffer = s.text.flags.contains(StringFlags::OPTIONAL_WHITESPACE);
    let limit = if scan_whole_buffer { window.len() } else { s.range.min(window.len()) };

    let first_byte = expected.first().copied();
    let mut pos = 0usize;
    loop {
        if pos > limit {
            break;
        }
        let candidate_region = &window[pos..];
        let skip = match first_byte {
            Some(b) => memchr(b, candidate_region).unwrap_or(candidate_region.len()),
            None => 0,
        };
        let try_at = pos + skip;
        if try_at > limit {
            break;
        }
        if let Some(outcome) = eval_string(
            &StringCriterion {
                expected: s.text.expected.clone(),
                operator: s.text.operator,
                flags: s.text.flags,
            },
            buf,
            start + try_at,
            (start + try_at) as i64,
        ) {
            return outcome;
        }
        pos = try_at + 1;
    }
    no_match()
}

fn eval_regex(r: &RegexCriterion, buf: &[u8], start: usize) -> CriterionOutcome {
    if start > buf.len() {
        return no_match();
    }
    match r.compiled.find(&buf[start..]) {
        Some(m) => {
            let matched_bytes = m.as_bytes();
            let text = String::from_utf8_lossy(matched_bytes).into_owned();
            CriterionOutcome {
                matched: true,
                next_offset: (start + m.end()) as i64,
                matched_value: Some(Value::Text(text)),
            }
        }
        None => no_match(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(width: usize, endian: Endianness, unsigned: bool, operator: Operator, expected: i64) -> NumericCriterion {
        NumericCriterion {
            width,
            endian,
            unsigned,
            id3: false,
            operator,
            expected,
            premod: None,
        }
    }

    #[test]
    fn test_little_endian_equal() {
        let c = Criterion::LongNum(numeric(4, Endianness::Little, false, Operator::Equal, 0x03cbc6c5));
        let buf = [0xc5, 0xc6, 0xcb, 0x03];
        let out = c.evaluate(&buf, 0, false).unwrap();
        assert!(out.matched);
        assert_eq!(out.next_offset, 4);
    }

    #[test]
    fn test_unsigned_greater_than() {
        let c = Criterion::LongNum(numeric(4, Endianness::Big, true, Operator::Greater, 0xF0000000u32 as i64));
        let buf = [0xFF, 0xFF, 0xFF, 0xFF];
        assert!(c.evaluate(&buf, 0, false).unwrap().matched);

        let c_signed = Criterion::LongNum(numeric(4, Endianness::Big, false, Operator::Greater, 0xF0000000u32 as i64));
        let buf2 = [0x7F, 0xFF, 0xFF, 0xFF];
        assert!(c_signed.evaluate(&buf2, 0, false).unwrap().matched);

        let c_unsigned2 = Criterion::LongNum(numeric(4, Endianness::Big, true, Operator::Greater, 0xF0000000u32 as i64));
        assert!(!c_unsigned2.evaluate(&buf2, 0, false).unwrap().matched);
    }

    #[test]
    fn test_search_with_optional_whitespace() {
        let text = StringCriterion {
            expected: "h e llo".into(),
            operator: Operator::Equal,
            flags: StringFlags::OPTIONAL_WHITESPACE,
        };
        let c = Criterion::Search(SearchCriterion { text, range: 10 });
        let buf = b"12hello 24";
        let out = c.evaluate(buf, 0, false).unwrap();
        assert!(out.matched);
    }

    #[test]
    fn test_pstring() {
        let p = PascalStringCriterion {
            expected: "hello".into(),
            len_width: 1,
            len_endian: Endianness::Big,
            subtract_prefix: false,
        };
        let c = Criterion::PascalString(p);
        let buf = [0x05, b'h', b'e', b'l', b'l', b'o', 0xFF];
        let out = c.evaluate(&buf, 0, false).unwrap();
        assert!(out.matched);
        assert_eq!(out.next_offset, 6);
    }

    #[test]
    fn test_regex_with_escapes() {
        let r = RegexCriterion::compile(r"hrm\t\x00\x0B\\\\wow", true, false).unwrap();
        let c = Criterion::Regex(r);
        let buf = b"some line with hrm\t\0\x0B\\wow in it";
        let out = c.evaluate(buf, 15, false).unwrap();
        assert!(out.matched);
    }

    #[test]
    fn test_date_formats_matched_timestamp() {
        let n = numeric(4, Endianness::Little, false, Operator::Equal, 1_700_000_000);
        let c = Criterion::Date(n);
        let buf = 1_700_000_000u32.to_le_bytes();
        let out = c.evaluate(&buf, 0, false).unwrap();
        assert!(out.matched);
        match out.matched_value {
            Some(Value::Text(s)) => assert!(s.contains("2023")),
            other => panic!("expected formatted date text, got {other:?}"),
        }
    }

}
