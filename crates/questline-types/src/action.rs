//! The typed [`Action`] record submitted by actors for a turn.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::ActorKind;
use crate::ids::{ActionId, ActorId, GuildId, ItemId, LocationId};

/// The verb of an action, e.g. `move_into`, `take`, `attack`.
///
/// Action types are open-ended strings because the set of verbs is supplied
/// by guild configuration rather than compiled in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(String);

impl ActionType {
    /// Name of the built-in "do nothing" action.
    pub const PASS: &'static str = "pass";

    /// Create an action type from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The "do nothing" action type.
    pub fn pass() -> Self {
        Self::new(Self::PASS)
    }

    /// The action type name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// What an action is directed at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    /// Another actor.
    Actor(ActorId),
    /// An item.
    Item(ItemId),
    /// A location.
    Location(LocationId),
    /// Anything else, identified by a free-form key.
    Named(String),
}

/// One actor's intended action for the current turn.
///
/// An actor has at most one pending action per turn; submitting again
/// replaces it. The action is consumed once the turn that processed it
/// completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Identity of this submission.
    pub id: ActionId,
    /// The submitting actor.
    pub actor_id: ActorId,
    /// What kind of actor submitted it.
    pub actor_kind: ActorKind,
    /// The guild the action belongs to.
    pub guild_id: GuildId,
    /// The verb.
    pub action_type: ActionType,
    /// Optional target of the action.
    pub target: Option<TargetRef>,
    /// Verb-specific parameters.
    pub parameters: BTreeMap<String, serde_json::Value>,
    /// When the action was submitted (ordering and tie-breaks).
    pub submitted_at: DateTime<Utc>,
}

impl Action {
    /// Create an action with no target and no parameters, stamped now.
    pub fn new(
        guild_id: GuildId,
        actor_id: ActorId,
        actor_kind: ActorKind,
        action_type: impl Into<ActionType>,
    ) -> Self {
        Self {
            id: ActionId::new(),
            actor_id,
            actor_kind,
            guild_id,
            action_type: action_type.into(),
            target: None,
            parameters: BTreeMap::new(),
            submitted_at: Utc::now(),
        }
    }

    /// Set the target.
    #[must_use]
    pub fn with_target(mut self, target: TargetRef) -> Self {
        self.target = Some(target);
        self
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_owned(), value);
        self
    }

    /// Override the submission timestamp.
    #[must_use]
    pub fn submitted(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = at;
        self
    }

    /// Read an integer parameter.
    pub fn parameter_i64(&self, key: &str) -> Option<i64> {
        self.parameters.get(key).and_then(serde_json::Value::as_i64)
    }

    /// Whether this is the built-in pass action.
    pub fn is_pass(&self) -> bool {
        self.action_type.as_str() == ActionType::PASS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_ref_serializes_tagged() {
        let loc = LocationId::new();
        let json = serde_json::to_value(TargetRef::Location(loc)).unwrap_or_default();
        assert_eq!(json["kind"], "location");
        assert_eq!(json["id"], loc.to_string());
    }

    #[test]
    fn integer_parameters_are_readable() {
        let action = Action::new(GuildId::new(), ActorId::new(), ActorKind::Character, "move_into")
            .with_parameter("capacity", serde_json::json!(2));
        assert_eq!(action.parameter_i64("capacity"), Some(2));
        assert_eq!(action.parameter_i64("missing"), None);
        assert!(!action.is_pass());
    }
}
