//! Error types for the questline-rules crate.
//!
//! Dice and check code never panics on bad input. Everything that can go
//! wrong is returned as a [`RulesError`] so the conflict resolver can always
//! produce a well-formed outcome.

/// Errors raised by the dice engine and check construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    /// A dice expression could not be parsed or violates its bounds.
    #[error("malformed dice expression {input:?}: {reason}")]
    MalformedExpression {
        /// The offending input, as given.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A check template names a difficulty missing from the guild's table.
    #[error("unknown difficulty class {name:?}")]
    UnknownDifficulty {
        /// The missing table entry.
        name: String,
    },
}

impl RulesError {
    pub(crate) fn malformed(input: &str, reason: impl Into<String>) -> Self {
        Self::MalformedExpression {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}
