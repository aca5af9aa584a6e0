//! Manual conflicts and the moderator resolution endpoint.
//!
//! Conflicts escalated to a moderator are the only state that outlives a
//! turn. Each one sits behind its own `RwLock`: any number of moderators
//! may read it while a decision on it is serialised. Deciding a conflict
//! archives it and queues its winning actions for the guild's next turn,
//! oldest decision first.
//!
//! The archive keeps the most recent decided conflicts of each guild, up to
//! a fixed number per guild, with an id index for lookups.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use questline_types::{
    Action, ActionId, ConflictId, ConflictInstance, ConflictResolution, ConflictStatus, GuildId,
    ResolutionMethod,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::ModerationError;

/// A moderator's decision on an escalated conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratorDecision {
    /// Participant actions allowed to proceed. May be empty.
    pub winners: Vec<ActionId>,
    /// Explanation shown to players.
    pub note: Option<String>,
}

/// A winning action waiting for the next turn of its guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasedAction {
    /// The conflict it won.
    pub conflict_id: ConflictId,
    /// The action to execute.
    pub action: Action,
    /// When the moderator decided.
    pub released_at: DateTime<Utc>,
}

/// Decided conflicts a board keeps per guild unless told otherwise.
pub const DEFAULT_ARCHIVE_LIMIT: usize = 256;

#[derive(Debug, Default)]
struct Archive {
    by_guild: HashMap<GuildId, VecDeque<ConflictInstance>>,
    index: HashMap<ConflictId, GuildId>,
}

impl Archive {
    fn push(&mut self, conflict: ConflictInstance, limit: usize) {
        let guild_id = conflict.guild_id;
        self.index.insert(conflict.id, guild_id);
        let entries = self.by_guild.entry(guild_id).or_default();
        entries.push_back(conflict);
        while entries.len() > limit {
            let Some(evicted) = entries.pop_front() else {
                break;
            };
            self.index.remove(&evicted.id);
            debug!(guild_id = %guild_id, conflict_id = %evicted.id, "Archived conflict evicted");
        }
    }

    fn get(&self, conflict_id: ConflictId) -> Option<&ConflictInstance> {
        let guild_id = self.index.get(&conflict_id)?;
        self.by_guild
            .get(guild_id)?
            .iter()
            .find(|c| c.id == conflict_id)
    }
}

/// Escalated conflicts, their archive, and the queue of released winners.
#[derive(Debug)]
pub struct ManualConflictBoard {
    open: RwLock<BTreeMap<ConflictId, Arc<RwLock<ConflictInstance>>>>,
    archive: RwLock<Archive>,
    archive_limit: usize,
    released: Mutex<BTreeMap<GuildId, VecDeque<ReleasedAction>>>,
}

impl Default for ManualConflictBoard {
    fn default() -> Self {
        Self::with_archive_limit(DEFAULT_ARCHIVE_LIMIT)
    }
}

impl ManualConflictBoard {
    /// An empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty board keeping at most `limit` decided conflicts per guild.
    /// The oldest decision is dropped first. A limit of zero keeps one.
    pub fn with_archive_limit(limit: usize) -> Self {
        Self {
            open: RwLock::new(BTreeMap::new()),
            archive: RwLock::new(Archive::default()),
            archive_limit: limit.max(1),
            released: Mutex::new(BTreeMap::new()),
        }
    }

    /// Hold a conflict for a moderator.
    pub async fn escalate(&self, conflict: ConflictInstance) {
        let id = conflict.id;
        self.open
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(conflict)));
    }

    /// Store a decided conflict.
    pub async fn archive(&self, conflict: ConflictInstance) {
        self.archive.write().await.push(conflict, self.archive_limit);
    }

    /// Conflicts of a guild still awaiting a moderator, oldest first.
    pub async fn pending(&self, guild_id: GuildId) -> Vec<ConflictInstance> {
        let slots: Vec<_> = self.open.read().await.values().cloned().collect();
        let mut pending = Vec::new();
        for slot in slots {
            let conflict = slot.read().await;
            if conflict.guild_id == guild_id && conflict.status == ConflictStatus::AwaitingManual {
                pending.push(conflict.clone());
            }
        }
        pending.sort_by_key(|c| (c.detected_at, c.id));
        pending
    }

    /// Look up a conflict, open or archived.
    pub async fn get(&self, conflict_id: ConflictId) -> Option<ConflictInstance> {
        let slot = self.open.read().await.get(&conflict_id).cloned();
        if let Some(slot) = slot {
            return Some(slot.read().await.clone());
        }
        self.archive.read().await.get(conflict_id).cloned()
    }

    /// Decided conflicts of a guild still in the archive, in the order they
    /// were decided.
    pub async fn archived(&self, guild_id: GuildId) -> Vec<ConflictInstance> {
        self.archive
            .read()
            .await
            .by_guild
            .get(&guild_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply a moderator's decision.
    ///
    /// Winners are queued for the guild's next turn. Returns the resolved
    /// conflict. A conflict already evicted from the archive is reported as
    /// unknown.
    pub async fn resolve(
        &self,
        conflict_id: ConflictId,
        decision: ModeratorDecision,
    ) -> Result<ConflictInstance, ModerationError> {
        let slot = self.open.read().await.get(&conflict_id).cloned();
        let Some(slot) = slot else {
            let archived = self.archive.read().await.index.contains_key(&conflict_id);
            return Err(if archived {
                ModerationError::AlreadyResolved { conflict_id }
            } else {
                ModerationError::UnknownConflict { conflict_id }
            });
        };

        let mut conflict = slot.write().await;
        if conflict.status.is_terminal() {
            return Err(ModerationError::AlreadyResolved { conflict_id });
        }
        if let Some(&action_id) = decision
            .winners
            .iter()
            .find(|w| !conflict.participants.iter().any(|p| p.id == **w))
        {
            return Err(ModerationError::NotAParticipant {
                conflict_id,
                action_id,
            });
        }

        let resolved_at = Utc::now();
        conflict.status = ConflictStatus::Resolved;
        conflict.resolution = Some(ConflictResolution {
            method: ResolutionMethod::Moderator,
            winners: decision.winners,
            checks: Vec::new(),
            note: decision.note,
            resolved_at,
        });
        let resolved = conflict.clone();
        drop(conflict);

        let winners: Vec<ReleasedAction> = resolved
            .winners()
            .into_iter()
            .map(|action| ReleasedAction {
                conflict_id,
                action: action.clone(),
                released_at: resolved_at,
            })
            .collect();
        info!(
            guild_id = %resolved.guild_id,
            conflict_id = %conflict_id,
            released = winners.len(),
            "Moderator resolved conflict"
        );

        self.released
            .lock()
            .await
            .entry(resolved.guild_id)
            .or_default()
            .extend(winners);
        // Archive before leaving `open` so the conflict is always findable.
        self.archive(resolved.clone()).await;
        self.open.write().await.remove(&conflict_id);
        Ok(resolved)
    }

    /// Take every released action of a guild, oldest decision first.
    pub async fn take_released(&self, guild_id: GuildId) -> Vec<ReleasedAction> {
        self.released
            .lock()
            .await
            .remove(&guild_id)
            .map(Vec::from)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::panic
)]
mod tests {
    use questline_types::{ActorId, ActorKind};

    use super::*;

    fn make_conflict(guild_id: GuildId) -> ConflictInstance {
        let participants = (0..2)
            .map(|_| Action::new(guild_id, ActorId::new(), ActorKind::Character, "attack"))
            .collect();
        ConflictInstance {
            id: ConflictId::new(),
            guild_id,
            turn_id: 1,
            definition: "duel".to_owned(),
            participants,
            status: ConflictStatus::AwaitingManual,
            resolution: None,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolving_releases_winners_and_archives() {
        let board = ManualConflictBoard::new();
        let guild = GuildId::new();
        let conflict = make_conflict(guild);
        let winner = conflict.participants[1].id;
        board.escalate(conflict.clone()).await;
        assert_eq!(board.pending(guild).await.len(), 1);

        let resolved = board
            .resolve(
                conflict.id,
                ModeratorDecision {
                    winners: vec![winner],
                    note: Some("the guard saw it first".to_owned()),
                },
            )
            .await
            .unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert!(board.pending(guild).await.is_empty());
        assert_eq!(board.archived(guild).await.len(), 1);
        assert_eq!(board.get(conflict.id).await.unwrap().status, ConflictStatus::Resolved);

        let released = board.take_released(guild).await;
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].action.id, winner);
        assert!(board.take_released(guild).await.is_empty());
    }

    #[tokio::test]
    async fn second_decision_is_rejected() {
        let board = ManualConflictBoard::new();
        let conflict = make_conflict(GuildId::new());
        board.escalate(conflict.clone()).await;
        board.resolve(conflict.id, ModeratorDecision::default()).await.unwrap();
        assert_eq!(
            board.resolve(conflict.id, ModeratorDecision::default()).await,
            Err(ModerationError::AlreadyResolved {
                conflict_id: conflict.id
            })
        );
    }

    #[tokio::test]
    async fn concurrent_decisions_resolve_once() {
        let board = Arc::new(ManualConflictBoard::new());
        let conflict = make_conflict(GuildId::new());
        let winner = conflict.participants[0].id;
        board.escalate(conflict.clone()).await;

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let board = Arc::clone(&board);
                tokio::spawn(async move {
                    for _ in 0..32 {
                        assert!(board.get(conflict.id).await.is_some());
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let board = Arc::clone(&board);
                tokio::spawn(async move {
                    board
                        .resolve(
                            conflict.id,
                            ModeratorDecision {
                                winners: vec![winner],
                                note: None,
                            },
                        )
                        .await
                })
            })
            .collect();
        let mut ok = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(err) => assert_eq!(
                    err,
                    ModerationError::AlreadyResolved {
                        conflict_id: conflict.id
                    }
                ),
            }
        }
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(ok, 1);
        assert_eq!(board.take_released(conflict.guild_id).await.len(), 1);
    }

    #[tokio::test]
    async fn archive_keeps_the_latest_decisions_per_guild() {
        let board = ManualConflictBoard::with_archive_limit(2);
        let (guild, other) = (GuildId::new(), GuildId::new());
        let conflicts: Vec<_> = (0..3).map(|_| make_conflict(guild)).collect();
        let elsewhere = make_conflict(other);
        board.archive(elsewhere.clone()).await;
        for c in &conflicts {
            board.escalate(c.clone()).await;
            board.resolve(c.id, ModeratorDecision::default()).await.unwrap();
        }

        let kept: Vec<_> = board.archived(guild).await.iter().map(|c| c.id).collect();
        assert_eq!(kept, vec![conflicts[1].id, conflicts[2].id]);
        assert!(board.get(conflicts[0].id).await.is_none());
        assert!(matches!(
            board.resolve(conflicts[0].id, ModeratorDecision::default()).await,
            Err(ModerationError::UnknownConflict { .. })
        ));
        assert_eq!(
            board.resolve(conflicts[2].id, ModeratorDecision::default()).await,
            Err(ModerationError::AlreadyResolved {
                conflict_id: conflicts[2].id
            })
        );
        assert_eq!(board.archived(other).await.len(), 1);
        assert!(board.get(elsewhere.id).await.is_some());
    }

    #[tokio::test]
    async fn outsiders_cannot_win() {
        let board = ManualConflictBoard::new();
        let conflict = make_conflict(GuildId::new());
        board.escalate(conflict.clone()).await;
        let stranger = ActionId::new();
        assert_eq!(
            board
                .resolve(
                    conflict.id,
                    ModeratorDecision {
                        winners: vec![stranger],
                        note: None,
                    },
                )
                .await,
            Err(ModerationError::NotAParticipant {
                conflict_id: conflict.id,
                action_id: stranger,
            })
        );
        assert_eq!(board.pending(conflict.guild_id).await.len(), 1);
        assert!(matches!(
            board.resolve(ConflictId::new(), ModeratorDecision::default()).await,
            Err(ModerationError::UnknownConflict { .. })
        ));
    }

    #[tokio::test]
    async fn released_actions_keep_decision_order() {
        let board = ManualConflictBoard::new();
        let guild = GuildId::new();
        let first = make_conflict(guild);
        let second = make_conflict(guild);
        board.escalate(first.clone()).await;
        board.escalate(second.clone()).await;
        for c in [&second, &first] {
            board
                .resolve(
                    c.id,
                    ModeratorDecision {
                        winners: vec![c.participants[0].id],
                        note: None,
                    },
                )
                .await
                .unwrap();
        }
        let released = board.take_released(guild).await;
        assert_eq!(released[0].conflict_id, second.id);
        assert_eq!(released[1].conflict_id, first.id);
    }
}
