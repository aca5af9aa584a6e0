//! The conflict catalog: which action-type pairs conflict and how each
//! conflict is decided.
//!
//! Catalogs are static per guild and read-only at runtime. They are loaded
//! from guild configuration, for example:
//!
//! ```yaml
//! - name: room_entry
//!   action_types: [move_into, move_into]
//!   contest: same_target
//!   capacity: 1
//!   resolution:
//!     mode: auto_check
//!     check:
//!       attribute: agility
//! - name: duel
//!   action_types: [attack, attack]
//!   contest: mutual_target
//!   resolution:
//!     mode: manual
//! ```

use std::collections::BTreeMap;

use questline_types::{Action, ActionType, CheckModifier, TargetRef};
use serde::{Deserialize, Serialize};

use crate::check::TieBreakPolicy;
use crate::dice::DiceExpression;
use crate::error::RulesError;
use crate::priority::PriorityRule;

/// Named difficulty classes, e.g. `hard: 20`.
pub type DifficultyTable = BTreeMap<String, i32>;

/// Extra modifiers per action type, e.g. `climb: [{source: wet, amount: -2}]`.
pub type ModifierTable = BTreeMap<String, Vec<CheckModifier>>;

/// What makes two matching actions contest the same resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContestScope {
    /// Both actions name the same target.
    #[default]
    SameTarget,
    /// Each action targets the other's actor.
    MutualTarget,
}

impl ContestScope {
    /// Whether two actions contest each other under this scope.
    pub fn contests(self, a: &Action, b: &Action) -> bool {
        match self {
            Self::SameTarget => a.target.is_some() && a.target == b.target,
            Self::MutualTarget => {
                a.target == Some(TargetRef::Actor(b.actor_id))
                    && b.target == Some(TargetRef::Actor(a.actor_id))
            }
        }
    }
}

/// A difficulty given inline or by table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DifficultySpec {
    /// A literal difficulty class.
    Value(i64),
    /// An entry of the guild's [`DifficultyTable`].
    Named(String),
}

impl DifficultySpec {
    /// Resolve against a guild's difficulty table.
    pub fn resolve(&self, table: &DifficultyTable) -> Result<i64, RulesError> {
        match self {
            Self::Value(dc) => Ok(*dc),
            Self::Named(name) => {
                table
                    .get(name)
                    .map(|dc| i64::from(*dc))
                    .ok_or_else(|| RulesError::UnknownDifficulty {
                        name: name.clone(),
                    })
            }
        }
    }
}

const fn default_true() -> bool {
    true
}

/// How to build each participant's check for an auto-check conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTemplate {
    /// Attribute supplying the base value.
    pub attribute: String,
    /// Convert the attribute score with the ability-modifier curve instead
    /// of using it raw.
    #[serde(default = "default_true")]
    pub ability_modifier: bool,
    /// Die rolled by each side.
    #[serde(default)]
    pub die: DiceExpression,
    /// Roll each side against a difficulty instead of opposing each other.
    #[serde(default)]
    pub difficulty: Option<DifficultySpec>,
    /// Tie-break for equal totals.
    #[serde(default)]
    pub tie_break: TieBreakPolicy,
    /// Flat modifiers applied to every side.
    #[serde(default)]
    pub modifiers: Vec<CheckModifier>,
}

impl CheckTemplate {
    /// An opposed d20 check on `attribute` with default settings.
    pub fn opposed(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ability_modifier: true,
            die: DiceExpression::D20,
            difficulty: None,
            tie_break: TieBreakPolicy::default(),
            modifiers: Vec::new(),
        }
    }
}

/// How a detected conflict is decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResolutionMode {
    /// Roll checks built from a template.
    AutoCheck {
        /// The check template.
        check: CheckTemplate,
    },
    /// Pick winners with a deterministic rule, no dice.
    Priority {
        /// The ordering rule.
        rule: PriorityRule,
    },
    /// Escalate to a moderator.
    Manual,
}

const fn default_capacity() -> u32 {
    1
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDefinition {
    /// Unique name, recorded on every instance it produces.
    pub name: String,
    /// The conflicting pair, order-independent.
    pub action_types: (ActionType, ActionType),
    /// What counts as the same contested resource.
    #[serde(default)]
    pub contest: ContestScope,
    /// How many contestants may succeed. An action's `capacity` parameter
    /// overrides it.
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    /// How to decide.
    pub resolution: ResolutionMode,
}

impl ConflictDefinition {
    /// Whether this entry covers the pair `(a, b)` in either order.
    pub fn matches(&self, a: &ActionType, b: &ActionType) -> bool {
        let (x, y) = &self.action_types;
        (x == a && y == b) || (x == b && y == a)
    }

    /// Whether both actions match this entry and contest each other.
    pub fn applies_to(&self, a: &Action, b: &Action) -> bool {
        a.actor_id != b.actor_id
            && self.matches(&a.action_type, &b.action_type)
            && self.contest.contests(a, b)
    }
}

/// The ordered list of conflict definitions for a guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictCatalog(Vec<ConflictDefinition>);

impl ConflictCatalog {
    /// Build a catalog from definitions in precedence order.
    pub const fn new(definitions: Vec<ConflictDefinition>) -> Self {
        Self(definitions)
    }

    /// Definitions in precedence order.
    pub fn definitions(&self) -> &[ConflictDefinition] {
        &self.0
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<ConflictDefinition>> for ConflictCatalog {
    fn from(definitions: Vec<ConflictDefinition>) -> Self {
        Self(definitions)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use questline_types::{ActorId, ActorKind, GuildId, ItemId};

    use super::*;

    fn make_def(name: &str, a: &str, b: &str) -> ConflictDefinition {
        ConflictDefinition {
            name: name.to_owned(),
            action_types: (a.into(), b.into()),
            contest: ContestScope::SameTarget,
            capacity: 1,
            resolution: ResolutionMode::Manual,
        }
    }

    #[test]
    fn pair_matching_is_order_independent() {
        let def = make_def("theft", "take", "steal");
        assert!(def.matches(&"steal".into(), &"take".into()));
        assert!(def.matches(&"take".into(), &"steal".into()));
        assert!(!def.matches(&"take".into(), &"move_into".into()));
        assert!(!def.matches(&"take".into(), &"take".into()));
    }

    #[test]
    fn same_target_requires_a_shared_target() {
        let guild = GuildId::new();
        let item = ItemId::new();
        let a = Action::new(guild, ActorId::new(), ActorKind::Character, "take")
            .with_target(TargetRef::Item(item));
        let b = Action::new(guild, ActorId::new(), ActorKind::Npc, "steal")
            .with_target(TargetRef::Item(item));
        let c = Action::new(guild, ActorId::new(), ActorKind::Npc, "steal");
        let def = make_def("theft", "take", "steal");
        assert!(def.applies_to(&a, &b));
        assert!(!def.applies_to(&a, &c));
    }

    #[test]
    fn mutual_target_needs_both_directions() {
        let guild = GuildId::new();
        let (x, y) = (ActorId::new(), ActorId::new());
        let a = Action::new(guild, x, ActorKind::Character, "attack").with_target(TargetRef::Actor(y));
        let b = Action::new(guild, y, ActorKind::Npc, "attack").with_target(TargetRef::Actor(x));
        let c = Action::new(guild, y, ActorKind::Npc, "attack")
            .with_target(TargetRef::Actor(ActorId::new()));
        let mut def = make_def("duel", "attack", "attack");
        def.contest = ContestScope::MutualTarget;
        assert!(def.applies_to(&a, &b));
        assert!(!def.applies_to(&a, &c));
    }

    #[test]
    fn named_difficulty_resolves_from_table() {
        let table: DifficultyTable = [("hard".to_owned(), 20)].into_iter().collect();
        assert_eq!(DifficultySpec::Named("hard".to_owned()).resolve(&table), Ok(20));
        assert_eq!(DifficultySpec::Value(7).resolve(&table), Ok(7));
        assert_eq!(
            DifficultySpec::Named("heroic".to_owned()).resolve(&table),
            Err(RulesError::UnknownDifficulty {
                name: "heroic".to_owned()
            })
        );
    }

    #[test]
    fn definition_deserializes_with_defaults() {
        let def: ConflictDefinition = serde_json::from_value(serde_json::json!({
            "name": "room_entry",
            "action_types": ["move_into", "move_into"],
            "resolution": { "mode": "auto_check", "check": { "attribute": "agility" } }
        }))
        .unwrap();
        assert_eq!(def.capacity, 1);
        assert_eq!(def.contest, ContestScope::SameTarget);
        assert_eq!(
            def.resolution,
            ResolutionMode::AutoCheck {
                check: CheckTemplate::opposed("agility")
            }
        );
    }
}
