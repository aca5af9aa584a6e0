//! Execution outcomes and the per-turn report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::conflict::ConflictInstance;
use crate::enums::FailureClass;
use crate::ids::{ActionId, ActorId, ConflictId, GuildId, ItemId, LocationId};

/// Stable keys narrators use to phrase an outcome.
pub mod narrative {
    /// The action ran and its effects were committed.
    pub const EXECUTED: &str = "action.executed";
    /// The action was rejected by game rules.
    pub const REJECTED_VALIDATION: &str = "action.rejected.validation";
    /// A collaborator the action needed was unavailable.
    pub const FAILED_DEPENDENCY: &str = "action.failed.dependency";
    /// The action's scope faulted and was rolled back.
    pub const FAILED_FAULT: &str = "action.failed.fault";
    /// The action won a conflict and then executed.
    pub const CONFLICT_WON: &str = "conflict.won";
    /// The action lost a conflict and was not executed.
    pub const CONFLICT_LOST: &str = "conflict.lost";
    /// The action is held until a moderator decides its conflict.
    pub const AWAITING_MODERATOR: &str = "conflict.awaiting_moderator";
}

/// One concrete state change applied by an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    /// An actor moved to a location.
    Moved {
        /// Who moved.
        actor_id: ActorId,
        /// Where to.
        location_id: LocationId,
    },
    /// An item changed hands.
    ItemTransferred {
        /// Which item.
        item_id: ItemId,
        /// The new holder.
        to: ActorId,
    },
    /// A numeric attribute changed.
    AttributeChanged {
        /// Whose attribute.
        actor_id: ActorId,
        /// Attribute name.
        attribute: String,
        /// Signed change.
        delta: i64,
    },
    /// Anything the state collaborator wants to report verbatim.
    Custom {
        /// Human-readable description.
        description: String,
    },
}

/// Why an execution failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    /// Failure classification.
    pub class: FailureClass,
    /// Collaborator-supplied detail.
    pub message: String,
}

/// Result of running one action through the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the effects were committed.
    pub success: bool,
    /// Effects committed (empty on failure).
    pub effects_applied: Vec<Effect>,
    /// Failure detail, if any.
    pub error: Option<ExecutionError>,
}

impl ActionOutcome {
    /// A committed execution.
    pub const fn committed(effects_applied: Vec<Effect>) -> Self {
        Self {
            success: true,
            effects_applied,
            error: None,
        }
    }

    /// A rolled-back execution.
    pub fn failed(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            success: false,
            effects_applied: Vec::new(),
            error: Some(ExecutionError {
                class,
                message: message.into(),
            }),
        }
    }

    /// The failure class, if the execution failed.
    pub fn failure_class(&self) -> Option<FailureClass> {
        self.error.as_ref().map(|e| e.class)
    }
}

/// What happened to one submitted action this turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ActionResolution {
    /// The action reached the executor.
    Executed {
        /// Executor outcome.
        outcome: ActionOutcome,
    },
    /// The action lost a conflict.
    ConflictLost {
        /// The conflict it lost.
        conflict_id: ConflictId,
        /// Narratable reason.
        reason: String,
    },
    /// The action waits on a moderator.
    AwaitingModerator {
        /// The pending conflict.
        conflict_id: ConflictId,
    },
}

/// Per-actor entry of a [`TurnReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorOutcome {
    /// The action as submitted (or synthesised as a default).
    pub action: Action,
    /// What happened to it.
    pub result: ActionResolution,
    /// Key from [`narrative`].
    pub narrative_key: String,
}

/// An escalated, unexpected execution failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnWarning {
    /// The actor whose action faulted.
    pub actor_id: ActorId,
    /// The faulting action.
    pub action_id: ActionId,
    /// Fault detail.
    pub message: String,
}

/// Everything that happened in one processed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnReport {
    /// The processed turn.
    pub turn_id: u64,
    /// Owning guild.
    pub guild_id: GuildId,
    /// Outcomes in execution order per actor. Re-injected manual-conflict
    /// winners come before the actor's fresh action.
    pub per_actor_outcomes: BTreeMap<ActorId, Vec<ActorOutcome>>,
    /// Conflicts still waiting on a moderator.
    pub unresolved_conflicts: Vec<ConflictInstance>,
    /// Escalated execution faults.
    pub warnings: Vec<TurnWarning>,
    /// When processing finished.
    pub processed_at: DateTime<Utc>,
}

impl TurnReport {
    /// All outcomes for an actor.
    pub fn outcomes_for(&self, actor_id: ActorId) -> &[ActorOutcome] {
        self.per_actor_outcomes
            .get(&actor_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of outcomes in the report.
    pub fn outcome_count(&self) -> usize {
        self.per_actor_outcomes.values().map(Vec::len).sum()
    }
}
