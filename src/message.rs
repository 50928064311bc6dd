//! The message template and its `printf`-subset formatter.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A single `%`-conversion parsed out of a message's format string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionSpec {
    left_align: bool,
    force_sign: bool,
    space_sign: bool,
    zero_pad: bool,
    alt_form: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: char,
}

/// A parsed pattern message: literal prefix/suffix around at most one
/// `%`-conversion, plus the two leading-character flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Text preceding the conversion (or the whole message, if none).
    pub literal_prefix: String,
    /// The parsed conversion, if the message contains one.
    pub printf_spec: Option<ConversionSpec>,
    /// Text following the conversion.
    pub literal_suffix: String,
    /// Set when the raw message began with `\r`: clears the accumulator.
    pub clear_previous: bool,
    /// Set when the raw message began with `\b`: suppresses the separating
    /// space that would otherwise precede this text in the accumulator.
    pub no_space_prefix: bool,
}

impl Message {
    /// Parse a message field: leading `\b`/`\r`, C escapes, and at most one
    /// `%` conversion (the rest of any further `%` is left literal, as in
    /// the source dialect where only the first conversion is special).
    pub fn parse(raw: &str) -> Message {
        let mut no_space_prefix = false;
        let mut clear_previous = false;
        let mut rest = raw;
        loop {
            if let Some(r) = rest.strip_prefix("\\b") {
                no_space_prefix = true;
                rest = r;
            } else if let Some(r) = rest.strip_prefix("\\r") {
                clear_previous = true;
                rest = r;
            } else {
                break;
            }
        }
        let expanded = expand_escapes(rest);
        let (prefix, spec, suffix) = split_conversion(&expanded);
        Message {
            literal_prefix: prefix,
            printf_spec: spec,
            literal_suffix: suffix,
            clear_previous,
            no_space_prefix,
        }
    }

    /// Render this message against the value extracted for its pattern.
    pub fn format(&self, value: &Value) -> String {
        let mut out = self.literal_prefix.clone();
        if let Some(spec) = &self.printf_spec {
            out.push_str(&format_conversion(spec, value));
        }
        out.push_str(&self.literal_suffix);
        out
    }

    /// Whether this message carries any literal text or conversion at all.
    pub fn is_empty(&self) -> bool {
        self.literal_prefix.is_empty() && self.printf_spec.is_none() && self.literal_suffix.is_empty()
    }
}

/// Expand standard C escapes: `\n \t \r \f \b`, octal `\0`-`\377`, hex
/// `\xNN`, `\\`, `\ `.
pub fn expand_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            match chars[i + 1] {
                'n' => {
                    out.push('\n');
                    i += 2;
                }
                't' => {
                    out.push('\t');
                    i += 2;
                }
                'r' => {
                    out.push('\r');
                    i += 2;
                }
                'f' => {
                    out.push('\u{0C}');
                    i += 2;
                }
                'b' => {
                    out.push('\u{08}');
                    i += 2;
                }
                '\\' => {
                    out.push('\\');
                    i += 2;
                }
                ' ' => {
                    out.push(' ');
                    i += 2;
                }
                'x' if i + 3 < chars.len() || i + 2 < chars.len() => {
                    let mut j = i + 2;
                    let mut hex = String::new();
                    while j < chars.len() && hex.len() < 2 && chars[j].is_ascii_hexdigit() {
                        hex.push(chars[j]);
                        j += 1;
                    }
                    if hex.is_empty() {
                        out.push('x');
                        i += 2;
                    } else {
                        if let Ok(v) = u8::from_str_radix(&hex, 16) {
                            out.push(v as char);
                        }
                        i = j;
                    }
                }
                c if c.is_digit(8) => {
                    let mut j = i + 1;
                    let mut oct = String::new();
                    while j < chars.len() && oct.len() < 3 && chars[j].is_digit(8) {
                        oct.push(chars[j]);
                        j += 1;
                    }
                    if let Ok(v) = u32::from_str_radix(&oct, 8) {
                        if let Some(c) = char::from_u32(v) {
                            out.push(c);
                        }
                    }
                    i = j;
                }
                other => {
                    out.push(other);
                    i += 2;
                }
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn split_conversion(s: &str) -> (String, Option<ConversionSpec>, String) {
    let bytes: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == '%' {
            if i + 1 < bytes.len() && bytes[i + 1] == '%' {
                i += 2;
                continue;
            }
            if let Some((spec, consumed)) = parse_conversion(&bytes[i..]) {
                let prefix: String = bytes[..i].iter().collect();
                let suffix: String = bytes[i + consumed..].iter().collect();
                return (de_percent(&prefix), Some(spec), de_percent(&suffix));
            }
        }
        i += 1;
    }
    (de_percent(s), None, String::new())
}

fn de_percent(s: &str) -> String {
    s.replace("%%", "%")
}

fn parse_conversion(chars: &[char]) -> Option<(ConversionSpec, usize)> {
    // chars[0] == '%'
    let mut i = 1;
    let mut left_align = false;
    let mut force_sign = false;
    let mut space_sign = false;
    let mut zero_pad = false;
    let mut alt_form = false;

    while i < chars.len() {
        match chars[i] {
            '-' => left_align = true,
            '+' => force_sign = true,
            ' ' => space_sign = true,
            '0' => zero_pad = true,
            '#' => alt_form = true,
            _ => break,
        }
        i += 1;
    }

    let mut width = String::new();
    while i < chars.len() && chars[i].is_ascii_digit() {
        width.push(chars[i]);
        i += 1;
    }

    let mut precision = None;
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let mut prec = String::new();
        while i < chars.len() && chars[i].is_ascii_digit() {
            prec.push(chars[i]);
            i += 1;
        }
        precision = Some(prec.parse().unwrap_or(0));
    }

    // Length modifiers: accepted and ignored.
    while i < chars.len() && matches!(chars[i], 'l' | 'q' | 'h') {
        i += 1;
    }

    if i >= chars.len() {
        return None;
    }
    let conv = chars[i];
    if !"sbcdiuoxXfFeEgG".contains(conv) {
        return None;
    }
    i += 1;

    Some((
        ConversionSpec {
            left_align,
            force_sign,
            space_sign,
            zero_pad,
            alt_form,
            width: if width.is_empty() { None } else { width.parse().ok() },
            precision,
            conv,
        },
        i,
    ))
}

fn format_conversion(spec: &ConversionSpec, value: &Value) -> String {
    let body = match spec.conv {
        's' | 'b' => {
            let mut text = value.to_string();
            if let Some(p) = spec.precision {
                text.truncate(p);
            }
            text
        }
        'c' => match value {
            Value::Signed(v) => char::from_u32(*v as u32).map(String::from).unwrap_or_default(),
            Value::Unsigned(v) => char::from_u32(*v as u32).map(String::from).unwrap_or_default(),
            other => other.to_string(),
        },
        'd' | 'i' => match value.as_i64() {
            Some(v) => sign_prefixed(v, spec),
            None => value.to_string(),
        },
        'u' => match value.as_u64() {
            Some(v) => v.to_string(),
            None => value.to_string(),
        },
        'o' => match value.as_u64() {
            Some(v) => {
                if spec.alt_form {
                    format!("0{v:o}")
                } else {
                    format!("{v:o}")
                }
            }
            None => value.to_string(),
        },
        'x' => match value.as_u64() {
            Some(v) => {
                if spec.alt_form {
                    format!("0x{v:x}")
                } else {
                    format!("{v:x}")
                }
            }
            None => value.to_string(),
        },
        'X' => match value.as_u64() {
            Some(v) => {
                if spec.alt_form {
                    format!("0X{v:X}")
                } else {
                    format!("{v:X}")
                }
            }
            None => value.to_string(),
        },
        'f' | 'F' => format_float(value, spec, false),
        'e' | 'E' => format_float(value, spec, true),
        'g' | 'G' => {
            let fixed = format_float(value, spec, false);
            let sci = format_float(value, spec, true);
            if fixed.len() <= sci.len() {
                fixed
            } else {
                sci
            }
        }
        _ => value.to_string(),
    };
    pad(&body, spec)
}

fn sign_prefixed(v: i64, spec: &ConversionSpec) -> String {
    if v >= 0 && spec.force_sign {
        format!("+{v}")
    } else if v >= 0 && spec.space_sign {
        format!(" {v}")
    } else {
        v.to_string()
    }
}

fn format_float(value: &Value, spec: &ConversionSpec, scientific: bool) -> String {
    let Some(f) = value.as_f64() else {
        return value.to_string();
    };
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf".to_string() } else { "inf".to_string() };
    }
    let prec = spec.precision.unwrap_or(6);
    if scientific {
        format!("{f:.prec$e}")
    } else {
        format!("{f:.prec$}")
    }
}

fn pad(body: &str, spec: &ConversionSpec) -> String {
    let Some(width) = spec.width else { return body.to_string() };
    if body.len() >= width {
        return body.to_string();
    }
    let fill = width - body.len();
    if spec.left_align {
        format!("{body}{}", " ".repeat(fill))
    } else if spec.zero_pad {
        let (sign, digits) = match body.strip_prefix('-').or_else(|| body.strip_prefix('+')) {
            Some(rest) => (&body[..1], rest),
            None => ("", body),
        };
        format!("{sign}{}{digits}", "0".repeat(fill))
    } else {
        format!("{}{body}", " ".repeat(fill))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_conversion() {
        let m = Message::parse("static text");
        assert_eq!(m.format(&Value::None), "static text");
    }

    #[test]
    fn test_string_conversion() {
        let m = Message::parse("match: %s");
        assert_eq!(m.format(&Value::Text("hi".into())), "match: hi");
    }

    #[test]
    fn test_hex_conversion_with_alt_form() {
        let m = Message::parse("value 0x%x");
        assert_eq!(m.format(&Value::Unsigned(255)), "value 0xff");
    }

    #[test]
    fn test_no_space_and_clear_prefix() {
        let m = Message::parse("\\btext");
        assert!(m.no_space_prefix);
        assert_eq!(m.literal_prefix, "text");

        let m = Message::parse("\\rreset");
        assert!(m.clear_previous);
    }

    #[test]
    fn test_escape_expansion() {
        assert_eq!(expand_escapes("a\\tb\\n"), "a\tb\n");
        assert_eq!(expand_escapes("\\x41"), "A");
        assert_eq!(expand_escapes("\\101"), "A");
    }

    #[test]
    fn test_nan_and_inf() {
        let m = Message::parse("%f");
        assert_eq!(m.format(&Value::Double(f64::NAN)), "nan");
        assert_eq!(m.format(&Value::Double(f64::INFINITY)), "inf");
    }

    #[test]
    fn test_percent_literal() {
        let m = Message::parse("100%%");
        assert_eq!(m.format(&Value::None), "100%");
    }
}
