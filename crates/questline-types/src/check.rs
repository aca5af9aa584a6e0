//! Check results shared between the rules engine and outward narrators.

use serde::{Deserialize, Serialize};

use crate::enums::Degree;

/// A named bonus or penalty applied to a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckModifier {
    /// Where the modifier comes from (`agility`, `encumbered`, ...).
    pub source: String,
    /// Signed amount added to the check.
    pub amount: i32,
}

impl CheckModifier {
    /// Create a modifier.
    pub fn new(source: impl Into<String>, amount: i32) -> Self {
        Self {
            source: source.into(),
            amount,
        }
    }
}

/// The structured, narratable outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    /// `modified_total + natural_roll`.
    pub roll_total: i64,
    /// Sum of the dice as rolled.
    pub natural_roll: i64,
    /// Base value plus every modifier, before the dice.
    pub modified_total: i64,
    /// Whether the check succeeded.
    pub success: bool,
    /// How well it went.
    pub degree: Degree,
    /// Distance from the difficulty, or from the opposing total.
    pub margin: i64,
    /// Each die as rolled.
    pub individual_rolls: Vec<u32>,
    /// Modifiers in the order they were supplied (audit trail only).
    pub modifiers: Vec<CheckModifier>,
    /// The defending side's result for an opposed check.
    pub opposing: Option<Box<CheckResult>>,
}
