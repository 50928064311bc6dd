//! The pattern-line parser: lifts one `magic(5)` text line into a
//! [`crate::pattern::Pattern`].

use crate::criterion::{
    Criterion, FloatCriterion, NumericCriterion, PascalStringCriterion, RegexCriterion,
    SearchCriterion, String16Criterion, StringCriterion, StringFlags,
};
use crate::endian::Endianness;
use crate::error::RuleError;
use crate::instruction::Instruction;
use crate::kind::{Type, TypeTag};
use crate::message::{expand_escapes, Message};
use crate::offset::{IndirectOffset, Offset, OffsetModification, OffsetReadType};
use crate::operator::Operator;
use crate::pattern::{Operation, Pattern};

/// A parsed extension line: `!:mime <type>` or `!:optional`.
pub enum ExtensionLine {
    /// `!:mime <type>` applies a MIME label to the previous pattern.
    Mime(String),
    /// `!:optional` marks the previous pattern as never downgrading a FULL
    /// match.
    Optional,
    /// Any other `!:` key, ignored per the external-interfaces contract.
    Ignored,
}

/// Parse an extension line's tail (after the leading `!:`).
pub fn parse_extension(tail: &str) -> ExtensionLine {
    let mut parts = tail.splitn(2, char::is_whitespace);
    match parts.next().unwrap_or("") {
        "mime" => ExtensionLine::Mime(parts.next().unwrap_or("").trim().to_string()),
        "optional" => ExtensionLine::Optional,
        _ => ExtensionLine::Ignored,
    }
}

/// Parse one pattern line (already known not to be blank, a `#` comment, or
/// a `!:` extension line).
pub fn parse_line(line: usize, text: &str) -> Result<Pattern, RuleError> {
    let (level, rest) = parse_level(text);
    let mut fields = Fields::new(rest);

    let offset_field = fields
        .next()
        .ok_or_else(|| syntax(line, text, "missing offset field"))?;
    let offset = parse_offset(line, text, offset_field)?;

    let type_field = fields
        .next()
        .ok_or_else(|| syntax(line, text, "missing type field"))?;

    // `name`, `use`, and `indirect` are pseudo-types: the type field itself
    // is the instruction keyword (`default` is a real `TypeTag` and falls
    // through to the normal path below instead).
    if let Some(instruction) = parse_control_instruction(line, text, type_field, &mut fields)? {
        let message_text = fields.remainder();
        let message = Message::parse(message_text);
        return Ok(Pattern {
            level,
            offset,
            r#type: Type::new(TypeTag::Default, false),
            operation: Operation::Instruction(instruction),
            message,
            children: Vec::new(),
            parent: None,
            id: None,
            mime: None,
            optional: false,
            raw_text: expand_escapes(message_text),
        });
    }

    let (r#type, raw_op_token) = parse_type(line, text, type_field)?;

    let op_field = if let Some(tok) = raw_op_token {
        tok
    } else {
        fields
            .next()
            .ok_or_else(|| syntax(line, text, "missing operation field"))?
            .to_string()
    };

    // A single isolated operator character (e.g. bare `>`) is extended by
    // the following whitespace-separated token.
    let op_field = if op_field.len() == 1 && "=!><&^~".contains(op_field.as_str()) {
        let extra = fields
            .next()
            .ok_or_else(|| syntax(line, text, "operator with no operand"))?;
        format!("{op_field}{extra}")
    } else {
        op_field
    };

    let operation = parse_operation(line, text, &r#type, &op_field)?;
    let message_text = fields.remainder();
    let message = Message::parse(message_text);

    Ok(Pattern {
        level,
        offset,
        r#type,
        operation,
        message,
        children: Vec::new(),
        parent: None,
        id: None,
        mime: None,
        optional: false,
        raw_text: expand_escapes(message_text),
    })
}

/// Recognise a `name`/`use`/`indirect` type field and consume the fields it
/// needs (a label, for `name`/`use`) directly, bypassing the criterion
/// machinery entirely.
fn parse_control_instruction(
    line: usize,
    text: &str,
    type_field: &str,
    fields: &mut Fields,
) -> Result<Option<Instruction>, RuleError> {
    if type_field == "name" {
        let label = fields
            .next()
            .ok_or_else(|| syntax(line, text, "name with no label"))?;
        return Ok(Some(Instruction::Name(label.to_string())));
    }
    if type_field == "use" {
        let token = fields
            .next()
            .ok_or_else(|| syntax(line, text, "use with no label"))?;
        let (invert, label) = if let Some(l) = token.strip_prefix('^') {
            (true, l)
        } else {
            (false, token)
        };
        return Ok(Some(Instruction::Use {
            label: label.to_string(),
            invert,
        }));
    }
    if type_field == "indirect" || type_field.starts_with("indirect/") {
        let relative = type_field.contains("/r");
        return Ok(Some(Instruction::Indirect { relative }));
    }
    Ok(None)
}

fn syntax(line: usize, text: &str, detail: &str) -> RuleError {
    RuleError::RuleSyntax {
        line,
        text: text.to_string(),
        detail: detail.to_string(),
    }
}

fn parse_level(text: &str) -> (u32, &str) {
    let trimmed = text.trim_start();
    let mut level = 0u32;
    let mut rest = trimmed;
    while let Some(r) = rest.strip_prefix('>') {
        level += 1;
        rest = r;
    }
    (level, rest.trim_start())
}

/// A cursor over whitespace-separated fields that also remembers where the
/// remainder (the message) begins.
struct Fields<'a> {
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn new(s: &'a str) -> Fields<'a> {
        Fields { rest: s }
    }

    fn next(&mut self) -> Option<&'a str> {
        let trimmed = self.rest.trim_start();
        if trimmed.is_empty() {
            self.rest = trimmed;
            return None;
        }
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let field = &trimmed[..end];
        self.rest = &trimmed[end..];
        Some(field)
    }

    fn remainder(&mut self) -> &'a str {
        self.rest.trim_start()
    }
}

fn parse_offset(line: usize, text: &str, field: &str) -> Result<Offset, RuleError> {
    // A leading `&` means this offset continues from the end of the previous
    // match rather than counting from the restart origin (§4.6).
    let relative = field.starts_with('&');
    let field = field.strip_prefix('&').unwrap_or(field);
    if let Some(inner) = field.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        return parse_indirect_offset(line, text, inner).map(|ind| Offset {
            base: 0,
            relative,
            indirect: Some(ind),
        });
    }
    let base = parse_int_literal(field).ok_or_else(|| syntax(line, text, "malformed offset"))?;
    Ok(Offset { base, relative, indirect: None })
}

fn parse_int_literal(s: &str) -> Option<i64> {
    let (neg, s) = if let Some(r) = s.strip_prefix('-') {
        (true, r)
    } else {
        (false, s)
    };
    let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if s.len() > 1 && s.starts_with('0') && s.chars().all(|c| c.is_digit(8)) {
        i64::from_str_radix(s, 8).ok()?
    } else {
        s.parse().ok()?
    };
    Some(if neg { -value } else { value })
}

fn parse_indirect_offset(line: usize, text: &str, inner: &str) -> Result<IndirectOffset, RuleError> {
    // inner: base [.typeCh] [opModifier]
    let mut chars: Vec<char> = inner.chars().collect();
    let mut i = 0;
    let start_relative = !chars.is_empty() && chars[0] == '.';
    if start_relative {
        i += 1;
    }
    let base_start = i;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-') {
        i += 1;
    }
    let base_str: String = chars[base_start..i].iter().collect();
    let inner_offset = parse_int_literal(&base_str).ok_or_else(|| syntax(line, text, "bad indirect base"))?;

    let mut read_type = OffsetReadType::default();
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        if i < chars.len() {
            if let Some(rt) = OffsetReadType::from_char(chars[i]) {
                read_type = rt;
                i += 1;
            }
        }
    }

    let mut modification = None;
    if i < chars.len() {
        if let Some(op) = Operator::from_char(chars[i]) {
            i += 1;
            if i < chars.len() && chars[i] == '(' {
                // operand-indirect: another parenthesised indirect expression.
                let close = find_matching_paren(&chars, i).ok_or_else(|| syntax(line, text, "unbalanced operand"))?;
                let operand_inner: String = chars[i + 1..close].iter().collect();
                let operand_ind = parse_indirect_offset(line, text, &operand_inner)?;
                modification = Some(OffsetModification {
                    op,
                    operand: operand_ind.inner_offset,
                    operand_indirect: true,
                    operand_read_type: Some(operand_ind.read_type),
                });
                i = close + 1;
            } else {
                let operand_start = i;
                while i < chars.len() {
                    i += 1;
                }
                let operand_str: String = chars[operand_start..i].iter().collect();
                let operand = parse_int_literal(&operand_str).ok_or_else(|| syntax(line, text, "bad modifier operand"))?;
                modification = Some(OffsetModification {
                    op,
                    operand,
                    operand_indirect: false,
                    operand_read_type: None,
                });
            }
        }
    }
    let _ = &mut chars;
    Ok(IndirectOffset {
        inner_offset,
        inner_relative: start_relative,
        read_type,
        modification,
    })
}

fn find_matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0;
    for (idx, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses the type field; for non-numeric types that bundle the operator
/// into the same token as the expected value (e.g. `=hello`), returns the
/// leftover operation token so the caller doesn't look for a 3rd field.
fn parse_type(line: usize, text: &str, field: &str) -> Result<(Type, Option<String>), RuleError> {
    let unsigned = field.starts_with('u') && !field.starts_with("ustring");
    let rest = if unsigned { &field[1..] } else { field };

    let name_end = rest
        .find(|c: char| c == '/' || c == '&' || c == '-')
        .unwrap_or(rest.len());
    let name = &rest[..name_end];
    let modifier = rest[name_end..].to_string();

    let tag = TypeTag::from_name(name).ok_or_else(|| RuleError::UnknownType {
        line,
        name: name.to_string(),
    })?;
    let endian = TypeTag::endian_from_name(name);

    Ok((
        Type {
            tag,
            unsigned,
            endian,
            modifier,
        },
        None,
    ))
}

fn parse_operation(line: usize, text: &str, ty: &Type, op_field: &str) -> Result<Operation, RuleError> {
    match ty.tag {
        TypeTag::Default => Ok(Operation::Instruction(Instruction::Default)),
        TypeTag::String if op_field == "x" || op_field == "X" => {
            Ok(Operation::Criterion(Criterion::String(StringCriterion {
                expected: String::new(),
                operator: Operator::NoOp,
                flags: StringFlags::empty(),
            })))
        }
        _ if (op_field == "x" || op_field == "X")
            && !matches!(
                ty.tag,
                TypeTag::PString | TypeTag::String16 | TypeTag::Search | TypeTag::Regex
            ) =>
        {
            Ok(numeric_noop(ty))
        }
        TypeTag::Byte | TypeTag::Short | TypeTag::Int | TypeTag::Long | TypeTag::Id3 => {
            parse_numeric_operation(line, text, ty, op_field)
        }
        TypeTag::Float | TypeTag::Double => parse_float_operation(line, text, ty, op_field),
        TypeTag::String => parse_string_operation(ty, op_field).map(|c| Operation::Criterion(c)),
        TypeTag::PString => parse_pstring_operation(ty, op_field),
        TypeTag::String16 => parse_string16_operation(ty, op_field),
        TypeTag::Search => parse_search_operation(ty, op_field),
        TypeTag::Regex => parse_regex_operation(line, ty, op_field),
        TypeTag::Date => parse_numeric_operation(line, text, ty, op_field),
    }
}

fn numeric_noop(ty: &Type) -> Operation {
    Operation::Criterion(numeric_for(ty, Operator::NoOp, 0, None))
}

fn numeric_for(ty: &Type, operator: Operator, expected: i64, premod: Option<(Operator, i64)>) -> Criterion {
    let width = ty.tag.width().unwrap_or(4);
    let endian = default_endian_for(ty);
    let n = NumericCriterion {
        width,
        endian,
        unsigned: ty.unsigned,
        id3: ty.tag == TypeTag::Id3,
        operator,
        expected,
        premod,
    };
    match ty.tag {
        TypeTag::Byte => Criterion::ByteNum(n),
        TypeTag::Short => Criterion::ShortNum(n),
        TypeTag::Int => Criterion::IntNum(n),
        TypeTag::Long => Criterion::LongNum(n),
        TypeTag::Id3 => Criterion::Id3(n),
        TypeTag::Date => Criterion::Date(n),
        _ => Criterion::IntNum(n),
    }
}

fn default_endian_for(ty: &Type) -> Endianness {
    ty.endian
}

fn parse_numeric_operation(line: usize, text: &str, ty: &Type, op_field: &str) -> Result<Operation, RuleError> {
    let (op_char, value_str) = split_operator(op_field);
    let operator = Operator::from_char(op_char).ok_or_else(|| RuleError::UnknownOperator {
        line,
        op: op_char.to_string(),
    })?;
    let expected = parse_int_literal(value_str).ok_or_else(|| syntax(line, text, "bad numeric operand"))?;
    let premod = parse_modifier(&ty.modifier);
    Ok(Operation::Criterion(numeric_for(ty, operator, expected, premod)))
}

fn parse_modifier(modifier: &str) -> Option<(Operator, i64)> {
    if modifier.is_empty() {
        return None;
    }
    let c = modifier.chars().next()?;
    let op = Operator::from_char(c)?;
    let operand = parse_int_literal(&modifier[1..])?;
    Some((op, operand))
}

fn split_operator(field: &str) -> (char, &str) {
    let first = field.chars().next().unwrap_or('=');
    if "=!><&^~".contains(first) {
        (first, &field[first.len_utf8()..])
    } else {
        ('=', field)
    }
}

fn parse_float_operation(line: usize, text: &str, ty: &Type, op_field: &str) -> Result<Operation, RuleError> {
    let (op_char, value_str) = split_operator(op_field);
    let operator = Operator::from_char(op_char).ok_or_else(|| RuleError::UnknownOperator {
        line,
        op: op_char.to_string(),
    })?;
    if matches!(operator, Operator::AllSet | Operator::AllClear | Operator::Complement) {
        return Err(RuleError::UnknownOperator {
            line,
            op: format!("{op_char} invalid for float/double"),
        });
    }
    let expected: f64 = value_str.parse().map_err(|_| syntax(line, text, "bad float operand"))?;
    let width = ty.tag.width().unwrap_or(4);
    let f = FloatCriterion {
        width,
        endian: default_endian_for(ty),
        operator,
        expected,
    };
    Ok(Operation::Criterion(if ty.tag == TypeTag::Double {
        Criterion::Double(f)
    } else {
        Criterion::Float(f)
    }))
}

fn parse_string_flags(modifier: &str) -> StringFlags {
    StringFlags::parse(modifier.trim_start_matches('/'))
}

fn parse_string_operation(ty: &Type, op_field: &str) -> Result<Criterion, RuleError> {
    let (op_char, value_str) = split_operator(op_field);
    let operator = Operator::from_char(op_char).unwrap_or(Operator::Equal);
    Ok(Criterion::String(StringCriterion {
        expected: expand_escapes(value_str),
        operator,
        flags: parse_string_flags(&ty.modifier),
    }))
}

fn parse_pstring_operation(ty: &Type, op_field: &str) -> Result<Operation, RuleError> {
    let (_, value_str) = split_operator(op_field);
    let modifier = ty.modifier.trim_start_matches('/');
    let (len_width, len_endian) = match modifier.chars().next() {
        Some('B') => (1, Endianness::Big),
        Some('h') => (2, Endianness::Little),
        Some('H') => (2, Endianness::Big),
        Some('l') => (4, Endianness::Little),
        Some('L') => (4, Endianness::Big),
        _ => (1, Endianness::Big),
    };
    let subtract_prefix = modifier.contains('J');
    Ok(Operation::Criterion(Criterion::PascalString(PascalStringCriterion {
        expected: expand_escapes(value_str),
        len_width,
        len_endian,
        subtract_prefix,
    })))
}

fn parse_string16_operation(ty: &Type, op_field: &str) -> Result<Operation, RuleError> {
    let (_, value_str) = split_operator(op_field);
    let endian = if ty.modifier.starts_with('B') { Endianness::Big } else { Endianness::Little };
    Ok(Operation::Criterion(Criterion::String16(String16Criterion {
        expected: expand_escapes(value_str),
        endian,
    })))
}

fn parse_search_operation(ty: &Type, op_field: &str) -> Result<Operation, RuleError> {
    let text = parse_string_operation(ty, op_field)?;
    let Criterion::String(text) = text else { unreachable!() };
    let modifier = ty.modifier.trim_start_matches('/');
    let range: usize = modifier
        .split('/')
        .find(|s| s.chars().all(|c| c.is_ascii_digit()) && !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    Ok(Operation::Criterion(Criterion::Search(SearchCriterion { text, range })))
}

fn parse_regex_operation(line: usize, ty: &Type, op_field: &str) -> Result<Operation, RuleError> {
    let (_, value_str) = split_operator(op_field);
    let modifier = ty.modifier.trim_start_matches('/');
    let case_insensitive = modifier.contains('c');
    let update_offset_to_start = modifier.contains('s');
    let compiled = RegexCriterion::compile(&expand_escapes(value_str), case_insensitive, update_offset_to_start)
        .map_err(|source| RuleError::RegexFailure { line, source })?;
    Ok(Operation::Criterion(Criterion::Regex(compiled)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_numeric_line() {
        let p = parse_line(1, "0 lelong 0x03cbc6c5 match").unwrap();
        assert_eq!(p.level, 0);
        match p.operation {
            Operation::Criterion(Criterion::IntNum(n)) => {
                assert_eq!(n.expected, 0x03cbc6c5);
                assert_eq!(n.operator, Operator::Equal);
            }
            _ => panic!("wrong operation"),
        }
    }

    #[test]
    fn test_parse_level_with_space() {
        let (level, rest) = parse_level(">> 4 byte 1 a");
        assert_eq!(level, 2);
        assert_eq!(rest, "4 byte 1 a");
    }

    #[test]
    fn test_parse_string_with_escapes() {
        let p = parse_line(1, r"0 string \x7fELF elf").unwrap();
        match p.operation {
            Operation::Criterion(Criterion::String(s)) => {
                assert_eq!(s.expected, "\u{7f}ELF");
            }
            _ => panic!("wrong operation"),
        }
    }

    #[test]
    fn test_parse_name_and_use() {
        let n = parse_line(1, "0 name swapped").unwrap();
        assert!(matches!(n.operation, Operation::Instruction(Instruction::Name(_))));

        let u = parse_line(2, ">0 use ^swapped").unwrap();
        match u.operation {
            Operation::Instruction(Instruction::Use { label, invert }) => {
                assert_eq!(label, "swapped");
                assert!(invert);
            }
            _ => panic!("wrong operation"),
        }
    }

    #[test]
    fn test_extended_operator_token() {
        let p = parse_line(1, "0 ubelong > 0x10 big").unwrap();
        match p.operation {
            Operation::Criterion(Criterion::IntNum(n)) => {
                assert_eq!(n.operator, Operator::Greater);
                assert_eq!(n.expected, 0x10);
            }
            _ => panic!("wrong operation"),
        }
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(parse_line(1, "0 bogus 1 x").is_err());
    }
}
