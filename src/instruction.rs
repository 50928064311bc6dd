//! Instructions: operations that affect control flow rather than testing
//! the buffer directly.

use serde::{Deserialize, Serialize};

/// A control-flow instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// `name <label>` — declares a named subroutine; a no-op that always
    /// matches at evaluation time.
    Name(String),
    /// `use <label>` or `use ^<label>` — recursively match the named
    /// subroutine, optionally inverting endianness through its subtree.
    Use { label: String, invert: bool },
    /// `default` — deferred until all non-`Default` siblings have been
    /// tried.
    Default,
    /// `indirect` or `indirect/r` — restart matching at the resolved offset
    /// against the full top-level rule list. Plain `indirect` restarts at
    /// the offset as read; `/r` additionally adds the enclosing subtree's
    /// own origin, so the restart point is relative to it.
    Indirect { relative: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_use_label_strip() {
        let i = Instruction::Use {
            label: "swapped".into(),
            invert: true,
        };
        match i {
            Instruction::Use { label, invert } => {
                assert_eq!(label, "swapped");
                assert!(invert);
            }
            _ => unreachable!(),
        }
    }
}
