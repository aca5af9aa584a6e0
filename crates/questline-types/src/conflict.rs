//! Detected conflicts between simultaneous actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::check::CheckResult;
use crate::enums::ConflictStatus;
use crate::ids::{ActionId, ConflictId, GuildId};

/// How a conflict was adjudicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    /// Opposed or difficulty checks.
    AutoCheck,
    /// A deterministic ordering rule, no dice.
    Priority,
    /// A moderator's decision.
    Moderator,
}

/// The adjudication attached to a conflict once it is decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// How the winners were chosen.
    pub method: ResolutionMethod,
    /// The actions allowed to proceed.
    pub winners: Vec<ActionId>,
    /// Every check rolled while deciding, in roll order.
    pub checks: Vec<CheckResult>,
    /// Free-form explanation (moderator note, rule name).
    pub note: Option<String>,
    /// When the decision was made.
    pub resolved_at: DateTime<Utc>,
}

/// A group of actions contesting the same resource in one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInstance {
    /// Identity of the conflict.
    pub id: ConflictId,
    /// Owning guild.
    pub guild_id: GuildId,
    /// Turn in which the conflict was detected.
    pub turn_id: u64,
    /// Name of the catalog definition that matched.
    pub definition: String,
    /// The contesting actions, in submission order.
    pub participants: Vec<Action>,
    /// Lifecycle state.
    pub status: ConflictStatus,
    /// The decision, once made.
    pub resolution: Option<ConflictResolution>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
}

impl ConflictInstance {
    /// Whether the given action won this conflict.
    pub fn is_winner(&self, action_id: ActionId) -> bool {
        self.resolution
            .as_ref()
            .is_some_and(|r| r.winners.contains(&action_id))
    }

    /// Participants that did not win. Empty while undecided.
    pub fn losers(&self) -> Vec<&Action> {
        if self.resolution.is_none() {
            return Vec::new();
        }
        self.participants
            .iter()
            .filter(|a| !self.is_winner(a.id))
            .collect()
    }

    /// Participants that won. Empty while undecided.
    pub fn winners(&self) -> Vec<&Action> {
        self.participants
            .iter()
            .filter(|a| self.is_winner(a.id))
            .collect()
    }
}
