//! The comparison/arithmetic/bitwise operator used by criteria and offset
//! modifications.

use crate::error::RuleError;
use serde::{Deserialize, Serialize};

/// An operator drawn from arithmetic, comparison, or bitwise families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `=` equality (the default when no operator character is present).
    Equal,
    /// `!` inequality.
    NotEqual,
    /// `>` strictly greater.
    Greater,
    /// `<` strictly less.
    Less,
    /// `&` all bits in the expected value are set.
    AllSet,
    /// `^` all bits in the expected value are clear.
    AllClear,
    /// `~` complement: value equals the bitwise-negated expected value.
    Complement,
    /// `+` addition (offset modification only).
    Add,
    /// `-` subtraction (offset modification and the undocumented numeric
    /// date adjustment, §9 of the rule-engine spec).
    Sub,
    /// `*` multiplication (offset modification only).
    Mul,
    /// `/` division (offset modification only).
    Div,
    /// `%` remainder (offset modification only).
    Mod,
    /// `|` bitwise or (offset modification only).
    Or,
    /// `x` / `X` the always-true no-op test.
    NoOp,
}

impl Operator {
    /// Parse a single operator character.
    pub fn from_char(c: char) -> Option<Operator> {
        Some(match c {
            '=' => Operator::Equal,
            '!' => Operator::NotEqual,
            '>' => Operator::Greater,
            '<' => Operator::Less,
            '&' => Operator::AllSet,
            '^' => Operator::AllClear,
            '~' => Operator::Complement,
            '+' => Operator::Add,
            '-' => Operator::Sub,
            '*' => Operator::Mul,
            '/' => Operator::Div,
            '%' => Operator::Mod,
            '|' => Operator::Or,
            'x' | 'X' => Operator::NoOp,
            _ => return None,
        })
    }

    /// Apply this operator as an arithmetic offset modification.
    pub fn apply_arith(self, lhs: i64, rhs: i64) -> Result<i64, RuleError> {
        Ok(match self {
            Operator::Add => lhs.wrapping_add(rhs),
            Operator::Sub => lhs.wrapping_sub(rhs),
            Operator::Mul => lhs.wrapping_mul(rhs),
            Operator::Div => {
                if rhs == 0 {
                    0
                } else {
                    lhs.wrapping_div(rhs)
                }
            }
            Operator::Mod => {
                if rhs == 0 {
                    0
                } else {
                    lhs.wrapping_rem(rhs)
                }
            }
            Operator::AllSet => lhs & rhs,
            Operator::AllClear => lhs ^ rhs,
            Operator::Complement => lhs ^ rhs,
            Operator::Or => lhs | rhs,
            other => {
                return Err(RuleError::UnknownOperator {
                    line: 0,
                    op: format!("{other:?}"),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_char() {
        assert_eq!(Operator::from_char('='), Some(Operator::Equal));
        assert_eq!(Operator::from_char('x'), Some(Operator::NoOp));
        assert_eq!(Operator::from_char('?'), None);
    }

    #[test]
    fn test_apply_arith() {
        assert_eq!(Operator::Add.apply_arith(4, 3).unwrap(), 7);
        assert_eq!(Operator::Div.apply_arith(9, 0).unwrap(), 0);
    }
}
