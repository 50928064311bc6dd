//! The type tag and type model: one enumerant per recognised `magic(5)`
//! type name, plus the `(tag, unsigned?, modifier)` triple a pattern line
//! actually carries.

use serde::{Deserialize, Serialize};

/// A `magic(5)` type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    /// `byte` — 1-byte integer.
    Byte,
    /// `short` — 2-byte integer.
    Short,
    /// `long` — 4-byte integer (named `IntNum` at the criterion level).
    Int,
    /// `quad` — 8-byte integer (named `LongNum` at the criterion level).
    Long,
    /// `float` — 4-byte IEEE-754 single.
    Float,
    /// `double` — 8-byte IEEE-754 double.
    Double,
    /// `melong`/`beid3`/`leid3` — 4-byte ID3 7-bit-per-byte length.
    Id3,
    /// `string` — raw text.
    String,
    /// `pstring` — Pascal-style length-prefixed text.
    PString,
    /// `string16` — UTF-16 text.
    String16,
    /// `search` — text scanned over a range of starting offsets.
    Search,
    /// `regex` — POSIX extended regular expression.
    Regex,
    /// `date`/`ldate`/`qdate`/`qldate` — numeric but timestamp-formatted.
    Date,
    /// `default` — matches iff no earlier sibling matched.
    Default,
}

impl TypeTag {
    /// Parse the type name (without the leading `u` or modifier tail).
    pub fn from_name(name: &str) -> Option<TypeTag> {
        Some(match name {
            "byte" => TypeTag::Byte,
            "short" | "beshort" | "leshort" => TypeTag::Short,
            "long" | "belong" | "lelong" | "melong" => TypeTag::Int,
            "quad" | "bequad" | "lequad" => TypeTag::Long,
            "float" | "befloat" | "lefloat" => TypeTag::Float,
            "double" | "bedouble" | "ledouble" => TypeTag::Double,
            "beid3" | "leid3" => TypeTag::Id3,
            "string" => TypeTag::String,
            "pstring" => TypeTag::PString,
            "string16" | "bestring16" | "lestring16" => TypeTag::String16,
            "search" => TypeTag::Search,
            "regex" => TypeTag::Regex,
            "date" | "ldate" | "qdate" | "qldate" | "bedate" | "ledate" | "beldate" | "leldate" => {
                TypeTag::Date
            }
            "default" => TypeTag::Default,
            _ => return None,
        })
    }

    /// Fixed byte width, or `None` for variable-length types.
    pub fn width(self) -> Option<usize> {
        match self {
            TypeTag::Byte => Some(1),
            TypeTag::Short => Some(2),
            TypeTag::Int | TypeTag::Float | TypeTag::Id3 | TypeTag::Date => Some(4),
            TypeTag::Long | TypeTag::Double => Some(8),
            TypeTag::String
            | TypeTag::PString
            | TypeTag::String16
            | TypeTag::Search
            | TypeTag::Regex
            | TypeTag::Default => None,
        }
    }

    /// Whether this type is eligible for arithmetic/bitwise comparison.
    pub fn is_numeric(self) -> bool {
        !matches!(
            self,
            TypeTag::String | TypeTag::PString | TypeTag::String16 | TypeTag::Search | TypeTag::Regex
        )
    }

    /// The byte order baked into a `be*`/`le*`/`me*` type name, or
    /// [`crate::endian::Endianness::Native`] for names that don't encode
    /// one (`long`, `short`, `byte`, `quad`, `float`, `double`).
    pub fn endian_from_name(name: &str) -> crate::endian::Endianness {
        use crate::endian::Endianness;
        if name.starts_with("be") {
            Endianness::Big
        } else if name.starts_with("le") {
            Endianness::Little
        } else if name.starts_with("me") {
            Endianness::Middle
        } else {
            Endianness::Native
        }
    }

    /// Printed name, for diagnostics and the `!:mime`-less human formatter.
    pub fn printed_name(self) -> &'static str {
        match self {
            TypeTag::Byte => "byte",
            TypeTag::Short => "short",
            TypeTag::Int => "long",
            TypeTag::Long => "quad",
            TypeTag::Float => "float",
            TypeTag::Double => "double",
            TypeTag::Id3 => "id3",
            TypeTag::String => "string",
            TypeTag::PString => "pstring",
            TypeTag::String16 => "string16",
            TypeTag::Search => "search",
            TypeTag::Regex => "regex",
            TypeTag::Date => "date",
            TypeTag::Default => "default",
        }
    }
}

/// A parsed type field: `[u]name[modifiers]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Type {
    /// The type tag.
    pub tag: TypeTag,
    /// Whether the `u` (unsigned) prefix was present.
    pub unsigned: bool,
    /// The byte order encoded in the type name itself (`belong` ⇒ Big,
    /// `lelong` ⇒ Little, `melong` ⇒ Middle, `long` ⇒ Native).
    pub endian: crate::endian::Endianness,
    /// The unparsed modifier tail (everything after the type name);
    /// type-specific and parsed lazily by the owning criterion.
    pub modifier: String,
}

impl Type {
    /// Construct a `Type` with no modifier text and native endianness.
    pub fn new(tag: TypeTag, unsigned: bool) -> Type {
        Type {
            tag,
            unsigned,
            endian: crate::endian::Endianness::Native,
            modifier: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(TypeTag::from_name("lelong"), Some(TypeTag::Int));
        assert_eq!(TypeTag::from_name("quad"), Some(TypeTag::Long));
        assert_eq!(TypeTag::from_name("bogus"), None);
    }

    #[test]
    fn test_width_and_numeric() {
        assert_eq!(TypeTag::Byte.width(), Some(1));
        assert_eq!(TypeTag::String.width(), None);
        assert!(TypeTag::Long.is_numeric());
        assert!(!TypeTag::Regex.is_numeric());
    }
}
