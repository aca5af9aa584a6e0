//! Check resolution: a modified roll against a difficulty class or an
//! opposing roll.
//!
//! The resolver is pure. It draws dice from the supplied [`DieRoller`] and
//! produces a [`CheckResult`]; nothing else is touched.
//!
//! # Totals
//!
//! `modified_total` is the base value plus every modifier plus the die
//! expression's own flat modifier. `roll_total = modified_total +
//! natural_roll`. A zero or negative `modified_total` is an ordinary value.
//!
//! # Ties
//!
//! Opposed checks with equal `roll_total` go to the defender unless the
//! request picks another [`TieBreakPolicy`].

use questline_types::{CheckModifier, CheckResult, Degree};
use serde::{Deserialize, Serialize};

use crate::dice::{DiceExpression, DieRoller};

/// How an opposed check with equal totals is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakPolicy {
    /// The defending side keeps the status quo.
    #[default]
    DefenderWins,
    /// Higher natural roll wins; equal naturals go to the defender.
    HigherNaturalRoll,
    /// Higher explicit priority wins; equal priorities go to the defender.
    Priority,
}

/// What a check is rolled against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTarget {
    /// A fixed difficulty class.
    Difficulty(i64),
    /// The defending side of an opposed check. The defender's own target is
    /// ignored.
    Opposed(Box<CheckRequest>),
}

/// One resolution attempt. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    base_value: i64,
    modifiers: Vec<CheckModifier>,
    die: DiceExpression,
    target: CheckTarget,
    tie_break: TieBreakPolicy,
    priority: i64,
}

impl CheckRequest {
    /// A check against a difficulty class, rolled on a d20.
    pub fn against_difficulty(base_value: i64, difficulty: i64) -> Self {
        Self {
            base_value,
            modifiers: Vec::new(),
            die: DiceExpression::D20,
            target: CheckTarget::Difficulty(difficulty),
            tie_break: TieBreakPolicy::default(),
            priority: 0,
        }
    }

    /// An opposed check against `defender`, rolled on a d20.
    pub fn opposed(base_value: i64, defender: Self) -> Self {
        Self {
            target: CheckTarget::Opposed(Box::new(defender)),
            ..Self::against_difficulty(base_value, 0)
        }
    }

    /// A side with no target, used as the defender of an opposed check.
    pub fn side(base_value: i64) -> Self {
        Self::against_difficulty(base_value, 0)
    }

    /// Append a modifier.
    #[must_use]
    pub fn with_modifier(mut self, modifier: CheckModifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Append several modifiers, keeping their order.
    #[must_use]
    pub fn with_modifiers(mut self, modifiers: impl IntoIterator<Item = CheckModifier>) -> Self {
        self.modifiers.extend(modifiers);
        self
    }

    /// Roll a different die expression.
    #[must_use]
    pub const fn with_die(mut self, die: DiceExpression) -> Self {
        self.die = die;
        self
    }

    /// Replace the target.
    #[must_use]
    pub fn with_target(mut self, target: CheckTarget) -> Self {
        self.target = target;
        self
    }

    /// Choose the tie-break policy for an opposed check.
    #[must_use]
    pub const fn with_tie_break(mut self, tie_break: TieBreakPolicy) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Explicit priority consulted by [`TieBreakPolicy::Priority`].
    #[must_use]
    pub const fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// The unmodified base value.
    pub const fn base_value(&self) -> i64 {
        self.base_value
    }

    /// Modifiers in the order supplied.
    pub fn modifiers(&self) -> &[CheckModifier] {
        &self.modifiers
    }

    /// The die expression rolled.
    pub const fn die(&self) -> DiceExpression {
        self.die
    }

    /// The check's target.
    pub const fn target(&self) -> &CheckTarget {
        &self.target
    }

    /// Tie-break policy.
    pub const fn tie_break(&self) -> TieBreakPolicy {
        self.tie_break
    }

    /// Explicit priority.
    pub const fn priority(&self) -> i64 {
        self.priority
    }

    /// Base value plus all modifiers plus the die's flat modifier.
    pub fn modified_total(&self) -> i64 {
        self.modifiers
            .iter()
            .fold(self.base_value, |acc, m| acc.saturating_add(i64::from(m.amount)))
            .saturating_add(i64::from(self.die.modifier()))
    }
}

/// D20-style ability modifier: `floor((score - 10) / 2)`.
pub fn ability_modifier(score: i64) -> i64 {
    score.saturating_sub(10).div_euclid(2)
}

/// Resolve a check.
pub fn resolve(request: &CheckRequest, roller: &mut dyn DieRoller) -> CheckResult {
    match &request.target {
        CheckTarget::Difficulty(dc) => resolve_against(request, *dc, roller),
        CheckTarget::Opposed(defender) => resolve_opposed(request, defender, roller),
    }
}

/// A rolled side before success is decided.
struct Rolled {
    natural: i64,
    modified: i64,
    total: i64,
    rolls: Vec<u32>,
    natural_max: bool,
    natural_min: bool,
}

fn roll_side(request: &CheckRequest, roller: &mut dyn DieRoller) -> Rolled {
    let roll = request.die.roll(roller);
    let modified = request.modified_total();
    Rolled {
        natural: roll.natural,
        modified,
        total: modified.saturating_add(roll.natural),
        rolls: roll.rolls,
        natural_max: roll.natural == request.die.natural_max(),
        natural_min: roll.natural == request.die.natural_min(),
    }
}

fn into_result(
    rolled: Rolled,
    request: &CheckRequest,
    success: bool,
    degree: Degree,
    margin: i64,
) -> CheckResult {
    CheckResult {
        roll_total: rolled.total,
        natural_roll: rolled.natural,
        modified_total: rolled.modified,
        success,
        degree,
        margin,
        individual_rolls: rolled.rolls,
        modifiers: request.modifiers.clone(),
        opposing: None,
    }
}

fn resolve_against(request: &CheckRequest, dc: i64, roller: &mut dyn DieRoller) -> CheckResult {
    let rolled = roll_side(request, roller);
    let (success, degree) = if rolled.natural_max {
        (true, Degree::CriticalSuccess)
    } else if rolled.natural_min {
        (false, Degree::CriticalFailure)
    } else if rolled.total >= dc {
        (true, Degree::Success)
    } else {
        (false, Degree::Failure)
    };
    let margin = rolled.total.saturating_sub(dc);
    into_result(rolled, request, success, degree, margin)
}

fn resolve_opposed(
    initiator: &CheckRequest,
    defender: &CheckRequest,
    roller: &mut dyn DieRoller,
) -> CheckResult {
    let attack = roll_side(initiator, roller);
    let defense = roll_side(defender, roller);

    let initiator_wins = match attack.total.cmp(&defense.total) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => match initiator.tie_break {
            TieBreakPolicy::DefenderWins => false,
            TieBreakPolicy::HigherNaturalRoll => attack.natural > defense.natural,
            TieBreakPolicy::Priority => initiator.priority > defender.priority,
        },
    };

    let margin = attack.total.saturating_sub(defense.total);
    let attack_degree = opposed_degree(initiator_wins, &attack);
    let defense_degree = opposed_degree(!initiator_wins, &defense);

    let opposing = into_result(
        defense,
        defender,
        !initiator_wins,
        defense_degree,
        margin.saturating_neg(),
    );
    let mut result = into_result(attack, initiator, initiator_wins, attack_degree, margin);
    result.opposing = Some(Box::new(opposing));
    result
}

const fn opposed_degree(won: bool, side: &Rolled) -> Degree {
    match (won, side.natural_max, side.natural_min) {
        (true, true, _) => Degree::CriticalSuccess,
        (true, false, _) => Degree::Success,
        (false, _, true) => Degree::CriticalFailure,
        (false, _, false) => Degree::Failure,
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
    use crate::dice::{RngRoller, ScriptedRoller};

    #[test]
    fn ability_modifier_rounds_down() {
        assert_eq!(ability_modifier(10), 0);
        assert_eq!(ability_modifier(11), 0);
        assert_eq!(ability_modifier(14), 2);
        assert_eq!(ability_modifier(9), -1);
        assert_eq!(ability_modifier(1), -5);
    }

    #[test]
    fn modifiers_sum_with_die_modifier() {
        let req = CheckRequest::against_difficulty(3, 10)
            .with_modifier(CheckModifier::new("blessed", 2))
            .with_modifier(CheckModifier::new("encumbered", -4))
            .with_die(DiceExpression::parse("1d20+1").unwrap());
        assert_eq!(req.modified_total(), 2);

        let result = resolve(&req, &mut ScriptedRoller::new([8]));
        assert_eq!(result.modified_total, 2);
        assert_eq!(result.natural_roll, 8);
        assert_eq!(result.roll_total, 10);
        assert!(result.success);
        assert_eq!(result.degree, Degree::Success);
        assert_eq!(result.margin, 0);
        assert_eq!(result.modifiers.len(), 2);
    }

    #[test]
    fn negative_modified_total_is_valid() {
        let req = CheckRequest::against_difficulty(-6, 5);
        let result = resolve(&req, &mut ScriptedRoller::new([10]));
        assert_eq!(result.modified_total, -6);
        assert_eq!(result.roll_total, 4);
        assert!(!result.success);
        assert_eq!(result.degree, Degree::Failure);
        assert_eq!(result.margin, -1);
    }

    #[test]
    fn natural_extremes_are_critical() {
        let hard = CheckRequest::against_difficulty(0, 40);
        let crit = resolve(&hard, &mut ScriptedRoller::new([20]));
        assert!(crit.success);
        assert_eq!(crit.degree, Degree::CriticalSuccess);

        let easy = CheckRequest::against_difficulty(30, 5);
        let fumble = resolve(&easy, &mut ScriptedRoller::new([1]));
        assert!(!fumble.success);
        assert_eq!(fumble.degree, Degree::CriticalFailure);
    }

    #[test]
    fn same_seed_same_result() {
        let req = CheckRequest::opposed(
            3,
            CheckRequest::side(1).with_modifier(CheckModifier::new("cover", 2)),
        )
        .with_die(DiceExpression::parse("2d10").unwrap());
        let a = resolve(&req, &mut RngRoller::seeded(1234));
        let b = resolve(&req, &mut RngRoller::seeded(1234));
        assert_eq!(a, b);
    }

    #[test]
    fn opposed_higher_total_wins() {
        let req = CheckRequest::opposed(5, CheckRequest::side(2));
        let result = resolve(&req, &mut ScriptedRoller::new([10, 10]));
        assert!(result.success);
        assert_eq!(result.margin, 3);
        let defense = result.opposing.unwrap();
        assert!(!defense.success);
        assert_eq!(defense.margin, -3);
    }

    #[test]
    fn opposed_tie_goes_to_defender_by_default() {
        let req = CheckRequest::opposed(2, CheckRequest::side(-1));
        // 2 + 12 = 14, -1 + 15 = 14.
        let result = resolve(&req, &mut ScriptedRoller::new([12, 15]));
        assert_eq!(result.roll_total, 14);
        assert_eq!(result.opposing.as_ref().unwrap().roll_total, 14);
        assert!(!result.success);
        assert!(result.opposing.unwrap().success);
    }

    #[test]
    fn higher_natural_roll_breaks_ties() {
        let req = CheckRequest::opposed(4, CheckRequest::side(0))
            .with_tie_break(TieBreakPolicy::HigherNaturalRoll);
        // 4 + 10 = 14 against 0 + 14 = 14; the defender rolled higher.
        let result = resolve(&req, &mut ScriptedRoller::new([10, 14]));
        assert!(!result.success);

        let req = CheckRequest::opposed(0, CheckRequest::side(4))
            .with_tie_break(TieBreakPolicy::HigherNaturalRoll);
        let result = resolve(&req, &mut ScriptedRoller::new([14, 10]));
        assert!(result.success);
    }

    #[test]
    fn priority_breaks_ties_then_defender() {
        let req = CheckRequest::opposed(0, CheckRequest::side(0).with_priority(1))
            .with_tie_break(TieBreakPolicy::Priority)
            .with_priority(5);
        let result = resolve(&req, &mut ScriptedRoller::new([9, 9]));
        assert!(result.success);

        let req = CheckRequest::opposed(0, CheckRequest::side(0).with_priority(5))
            .with_tie_break(TieBreakPolicy::Priority)
            .with_priority(5);
        let result = resolve(&req, &mut ScriptedRoller::new([9, 9]));
        assert!(!result.success);
    }

    #[test]
    fn opposed_criticals_follow_the_winner() {
        let req = CheckRequest::opposed(-30, CheckRequest::side(0));
        let result = resolve(&req, &mut ScriptedRoller::new([20, 1]));
        assert!(!result.success);
        assert_eq!(result.degree, Degree::Failure);
        let defense = result.opposing.unwrap();
        assert!(defense.success);
        assert_eq!(defense.degree, Degree::Success);

        let req = CheckRequest::opposed(0, CheckRequest::side(0));
        let result = resolve(&req, &mut ScriptedRoller::new([20, 1]));
        assert_eq!(result.degree, Degree::CriticalSuccess);
        assert_eq!(result.opposing.unwrap().degree, Degree::CriticalFailure);
    }
}
