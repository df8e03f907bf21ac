//! Error types for formula construction.

/// Errors raised while parsing or validating a [`FormulaSpec`](crate::FormulaSpec).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    /// The formula text is empty after whitespace removal.
    #[error("formula is empty")]
    EmptyFormula,

    /// Parentheses in the formula text do not balance.
    #[error("unbalanced parentheses in formula '{0}'")]
    UnbalancedParentheses(String),

    /// An alias declaration could not be parsed.
    #[error("invalid alias '{decl}': {reason}")]
    InvalidAlias {
        /// The declaration as written.
        decl: String,
        /// Description of the problem.
        reason: String,
    },

    /// Two aliases share a name.
    #[error("alias '{0}' is declared more than once")]
    DuplicateAlias(String),

    /// Two aliases share an argument position.
    #[error("argument position {0} is bound by more than one alias")]
    DuplicatePosition(usize),

    /// Alias positions do not form the range `0..n`.
    #[error("argument positions must be contiguous from 0; position {0} is missing")]
    MissingPosition(usize),

    /// The reduction operator name is not recognized.
    #[error("unknown reduction operator '{0}'")]
    UnknownReduction(String),

    /// The reduction operator requires a parameter (e.g. `K` for `KMin`).
    #[error("reduction '{0}' requires a parameter")]
    MissingParameter(String),

    /// A parameter was given to a reduction operator that takes none.
    #[error("reduction '{0}' does not take a parameter")]
    UnexpectedParameter(String),

    /// The precision name is not recognized.
    #[error("unknown precision '{0}' (expected float32 or float64)")]
    UnknownPrecision(String),

    /// The reduction axis is neither 0 nor 1.
    #[error("invalid reduction axis {0} (expected 0 or 1)")]
    InvalidAxis(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_alias() {
        let err = FormulaError::InvalidAlias {
            decl: "x = Vk(0,3)".to_string(),
            reason: "unknown category 'Vk'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid alias 'x = Vk(0,3)': unknown category 'Vk'"
        );
    }

    #[test]
    fn display_unknown_reduction() {
        let err = FormulaError::UnknownReduction("Mean".to_string());
        assert_eq!(err.to_string(), "unknown reduction operator 'Mean'");
    }

    #[test]
    fn display_missing_position() {
        let err = FormulaError::MissingPosition(1);
        assert!(err.to_string().contains("position 1 is missing"));
    }

    #[test]
    fn display_unknown_precision() {
        let err = FormulaError::UnknownPrecision("float16".to_string());
        assert!(err.to_string().contains("float16"));
    }
}
