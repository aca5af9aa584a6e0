//! Dice expressions and weighted random rolls.
//!
//! Expressions use the canonical form `[count]d<sides>[(+|-)modifier]`:
//! `1d20+5`, `2d6-1`, `d8`. The count defaults to 1 when omitted. Parsing is
//! case-insensitive and ignores surrounding whitespace, nothing else.
//!
//! Randomness is pluggable through [`DieRoller`]. Production code wraps a
//! `rand` generator in [`RngRoller`]; tests replay fixed natural results
//! with [`ScriptedRoller`].

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::RulesError;

/// Largest number of dice a single expression may roll.
pub const MAX_DICE: u32 = 100;

/// Largest die size accepted.
pub const MAX_SIDES: u32 = 1000;

/// A validated `(count, sides, modifier)` triple.
///
/// Invariant: `1 <= count <= MAX_DICE` and `2 <= sides <= MAX_SIDES`.
/// The only ways to build one are [`DiceExpression::new`] and parsing, both
/// of which enforce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceExpression {
    count: u32,
    sides: u32,
    modifier: i32,
}

/// The result of rolling a [`DiceExpression`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiceRoll {
    /// Natural dice plus the expression's modifier.
    pub total: i64,
    /// Sum of the dice alone.
    pub natural: i64,
    /// Each die as rolled.
    pub rolls: Vec<u32>,
}

impl DiceExpression {
    /// A single twenty-sided die, the default check die.
    pub const D20: Self = Self {
        count: 1,
        sides: 20,
        modifier: 0,
    };

    /// Build an expression, validating its bounds.
    pub fn new(count: u32, sides: u32, modifier: i32) -> Result<Self, RulesError> {
        let expr = Self {
            count,
            sides,
            modifier,
        };
        if count == 0 || count > MAX_DICE {
            return Err(RulesError::malformed(
                &expr.to_string(),
                format!("dice count must be between 1 and {MAX_DICE}"),
            ));
        }
        if !(2..=MAX_SIDES).contains(&sides) {
            return Err(RulesError::malformed(
                &expr.to_string(),
                format!("die size must be between 2 and {MAX_SIDES}"),
            ));
        }
        Ok(expr)
    }

    /// Parse an expression such as `"2d6-1"`.
    pub fn parse(input: &str) -> Result<Self, RulesError> {
        let normalized = input.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(RulesError::malformed(input, "empty expression"));
        }

        let (count_str, rest) = normalized
            .split_once('d')
            .ok_or_else(|| RulesError::malformed(input, "missing 'd' separator"))?;

        let count = if count_str.is_empty() {
            1
        } else {
            parse_unsigned(count_str)
                .ok_or_else(|| RulesError::malformed(input, "invalid dice count"))?
        };

        let (sides_str, modifier) = if let Some((sides, m)) = rest.split_once('+') {
            let m = parse_signed(m)
                .ok_or_else(|| RulesError::malformed(input, "invalid modifier"))?;
            (sides, m)
        } else if let Some((sides, m)) = rest.split_once('-') {
            let m = parse_signed(m)
                .and_then(i32::checked_neg)
                .ok_or_else(|| RulesError::malformed(input, "invalid modifier"))?;
            (sides, m)
        } else {
            (rest, 0)
        };

        let sides = parse_unsigned(sides_str)
            .ok_or_else(|| RulesError::malformed(input, "invalid die size"))?;

        Self::new(count, sides, modifier)
            .map_err(|err| match err {
                RulesError::MalformedExpression { reason, .. } => {
                    RulesError::malformed(input, reason)
                }
                other @ RulesError::UnknownDifficulty { .. } => other,
            })
    }

    /// Number of dice.
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Sides per die.
    pub const fn sides(&self) -> u32 {
        self.sides
    }

    /// Flat modifier added after rolling.
    pub const fn modifier(&self) -> i32 {
        self.modifier
    }

    /// Highest possible natural result (every die at maximum).
    pub fn natural_max(&self) -> i64 {
        i64::from(self.count).saturating_mul(i64::from(self.sides))
    }

    /// Lowest possible natural result (every die showing 1).
    pub fn natural_min(&self) -> i64 {
        i64::from(self.count)
    }

    /// Roll the expression.
    pub fn roll(&self, roller: &mut dyn DieRoller) -> DiceRoll {
        let mut rolls = Vec::with_capacity(usize::try_from(self.count).unwrap_or(0));
        let mut natural: i64 = 0;
        for _ in 0..self.count {
            let face = roller.roll_die(self.sides).clamp(1, self.sides);
            natural = natural.saturating_add(i64::from(face));
            rolls.push(face);
        }
        DiceRoll {
            total: natural.saturating_add(i64::from(self.modifier)),
            natural,
            rolls,
        }
    }
}

impl Default for DiceExpression {
    fn default() -> Self {
        Self::D20
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.modifier.signum() {
            1 => write!(f, "+{}", self.modifier),
            -1 => write!(f, "-{}", self.modifier.unsigned_abs()),
            _ => Ok(()),
        }
    }
}

impl FromStr for DiceExpression {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DiceExpression {
    type Error = RulesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DiceExpression> for String {
    fn from(expr: DiceExpression) -> Self {
        expr.to_string()
    }
}

/// Digits only; rejects the leading `+` that `u32::from_str` would accept.
fn parse_unsigned(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_signed(s: &str) -> Option<i32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ---------------------------------------------------------------------------
// Randomness sources
// ---------------------------------------------------------------------------

/// A source of single die faces.
pub trait DieRoller {
    /// Roll one die with the given number of sides, returning `1..=sides`.
    fn roll_die(&mut self, sides: u32) -> u32;
}

/// Adapts any `rand` generator into a [`DieRoller`].
#[derive(Debug, Clone)]
pub struct RngRoller<R>(pub R);

impl RngRoller<StdRng> {
    /// A deterministic roller for a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// A roller seeded from operating-system entropy.
    pub fn from_entropy() -> Self {
        Self(StdRng::from_os_rng())
    }
}

impl<R: Rng> DieRoller for RngRoller<R> {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.0.random_range(1..=sides.max(1))
    }
}

/// Replays a fixed sequence of natural die faces.
///
/// Faces are clamped into `1..=sides`. Once the script runs out every
/// further die shows 1.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRoller {
    faces: VecDeque<u32>,
    rolled: usize,
}

impl ScriptedRoller {
    /// Create a roller that yields `faces` in order.
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: faces.into_iter().collect(),
            rolled: 0,
        }
    }

    /// How many dice have been rolled so far.
    pub const fn rolls_made(&self) -> usize {
        self.rolled
    }
}

impl DieRoller for ScriptedRoller {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.rolled = self.rolled.saturating_add(1);
        self.faces.pop_front().unwrap_or(1).clamp(1, sides.max(1))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;

    fn expr(s: &str) -> DiceExpression {
        DiceExpression::parse(s).unwrap()
    }

    #[test]
    fn parses_canonical_forms() {
        let e = expr("2d6+3");
        assert_eq!((e.count(), e.sides(), e.modifier()), (2, 6, 3));
        let e = expr("1d20-2");
        assert_eq!((e.count(), e.sides(), e.modifier()), (1, 20, -2));
        let e = expr("  D8 ");
        assert_eq!((e.count(), e.sides(), e.modifier()), (1, 8, 0));
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in [
            "", "d", "2d", "0d6", "2d1", "2d0", "-1d6", "d-5", "2d6+", "2d6+-1", "2x6",
            "1 d6", "+2d6", "2d6+99999999999", "101d6", "1d1001",
        ] {
            let result = DiceExpression::parse(bad);
            assert!(
                matches!(result, Err(RulesError::MalformedExpression { .. })),
                "expected {bad:?} to be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn error_carries_original_input() {
        let err = DiceExpression::parse("0d6").unwrap_err();
        assert_eq!(
            err,
            RulesError::MalformedExpression {
                input: "0d6".to_owned(),
                reason: format!("dice count must be between 1 and {MAX_DICE}"),
            }
        );
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(expr("d20").to_string(), "1d20");
        assert_eq!(expr("3D4-1").to_string(), "3d4-1");
        assert_eq!(expr("2d6+0").to_string(), "2d6");
    }

    #[test]
    fn roll_totals_stay_within_bounds() {
        let mut roller = RngRoller::seeded(7);
        for (count, sides, modifier) in [(1, 20, 0), (3, 6, -4), (10, 4, 7), (2, 100, -50)] {
            let e = DiceExpression::new(count, sides, modifier).unwrap();
            let low = i64::from(count) + i64::from(modifier);
            let high = i64::from(count) * i64::from(sides) + i64::from(modifier);
            for _ in 0..500 {
                let roll = e.roll(&mut roller);
                assert!((low..=high).contains(&roll.total), "{e}: {} out of range", roll.total);
                assert_eq!(roll.rolls.len(), usize::try_from(count).unwrap());
            }
        }
    }

    #[test]
    fn same_seed_same_rolls() {
        let e = expr("4d6");
        let mut a = RngRoller::seeded(99);
        let mut b = RngRoller::seeded(99);
        let first: Vec<_> = (0..20).map(|_| e.roll(&mut a)).collect();
        let second: Vec<_> = (0..20).map(|_| e.roll(&mut b)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn scripted_roller_replays_faces() {
        let mut roller = ScriptedRoller::new([12, 30, 0]);
        let e = expr("d20+1");
        assert_eq!(e.roll(&mut roller).total, 13);
        assert_eq!(e.roll(&mut roller).natural, 20);
        assert_eq!(e.roll(&mut roller).natural, 1);
        assert_eq!(e.roll(&mut roller).natural, 1);
        assert_eq!(roller.rolls_made(), 4);
    }

    #[test]
    fn serde_uses_the_string_form() {
        let json = serde_json::to_string(&expr("2d6-1")).unwrap();
        assert_eq!(json, "\"2d6-1\"");
        let back: DiceExpression = serde_json::from_str("\"d12\"").unwrap();
        assert_eq!(back.sides(), 12);
        assert!(serde_json::from_str::<DiceExpression>("\"0d12\"").is_err());
    }
}
