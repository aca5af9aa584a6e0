//! Per-guild turn state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::TurnStatus;
use crate::ids::{ActorId, GuildId};

/// The readiness ledger for one guild's current turn.
///
/// Exactly one `TurnState` exists per guild at a time. It moves
/// `collecting -> processing -> closed`, and a fresh collecting state with
/// the next `turn_id` replaces it as soon as it closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    /// Owning guild.
    pub guild_id: GuildId,
    /// Monotonic turn counter, starting at 1.
    pub turn_id: u64,
    /// Actors that confirmed they are ready.
    pub readiness_set: BTreeSet<ActorId>,
    /// Actors that must be ready before the turn can process.
    pub required_set: BTreeSet<ActorId>,
    /// Lifecycle state.
    pub status: TurnStatus,
    /// When this turn started collecting.
    pub opened_at: DateTime<Utc>,
}

impl TurnState {
    /// Open a new collecting turn.
    pub fn open(guild_id: GuildId, turn_id: u64) -> Self {
        Self {
            guild_id,
            turn_id,
            readiness_set: BTreeSet::new(),
            required_set: BTreeSet::new(),
            status: TurnStatus::Collecting,
            opened_at: Utc::now(),
        }
    }

    /// Whether every required actor is ready.
    ///
    /// A turn with nobody required never reaches quorum on its own; it can
    /// only be force-closed.
    pub fn is_quorum_met(&self) -> bool {
        !self.required_set.is_empty() && self.required_set.is_subset(&self.readiness_set)
    }

    /// Required actors that have not confirmed yet.
    pub fn not_ready(&self) -> Vec<ActorId> {
        self.required_set
            .difference(&self.readiness_set)
            .copied()
            .collect()
    }
}
