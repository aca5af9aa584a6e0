//! Enumeration types shared across the turn-resolution core.

use serde::{Deserialize, Serialize};

/// What kind of entity submitted an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A player-controlled character.
    Character,
    /// A non-player character driven by the game master or AI.
    Npc,
    /// A party acting as a single unit.
    Party,
}

/// Degree of success of a resolved check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degree {
    /// Natural maximum on the primary die.
    CriticalSuccess,
    /// Met the difficulty or won the contest.
    Success,
    /// Missed the difficulty or lost the contest.
    Failure,
    /// Natural minimum on the primary die.
    CriticalFailure,
}

/// Lifecycle of a [`ConflictInstance`](crate::ConflictInstance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    /// Detected but not yet adjudicated.
    Pending,
    /// Adjudicated automatically by a check or priority rule. Terminal.
    AutoResolved,
    /// Waiting for a moderator decision; persists across turns.
    AwaitingManual,
    /// Adjudicated by a moderator. Terminal.
    Resolved,
}

impl ConflictStatus {
    /// Whether the conflict can no longer change.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::AutoResolved | Self::Resolved)
    }
}

/// Lifecycle of a guild's [`TurnState`](crate::TurnState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Accepting action submissions and readiness confirmations.
    Collecting,
    /// Quorum reached or forced; the turn processor owns the guild.
    Processing,
    /// Finished; a fresh collecting turn has been opened after it.
    Closed,
}

/// Classification of a failed action execution.
///
/// Only [`FailureClass::Fault`] is escalated as a turn warning. The other
/// two are ordinary gameplay outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The action was rejected by game rules (stale target, full room).
    Validation,
    /// A downstream collaborator was unavailable.
    Dependency,
    /// Something unexpected broke inside the action's scope.
    Fault,
}
