//! The entry point a game server talks to.
//!
//! [`TurnEngine`] ties the readiness tracker, the moderator board and the
//! processor together. Whichever call moves a turn to `processing` runs
//! it: the readiness confirmation that completes the quorum, a force
//! close, an explicit retry, or a roster change. A processed turn is
//! closed and the next one opened. A turn whose configuration could not be
//! loaded, or whose processing panicked, goes back to collecting with every
//! action and confirmation intact.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use questline_types::{
    Action, ActorId, ActorKind, ConflictId, ConflictInstance, GuildId, TurnReport, TurnState,
};
use tracing::{debug, error, warn};

use crate::config::{EngineConfig, StaticConfigProvider};
use crate::error::TurnError;
use crate::executor::panic_message;
use crate::moderation::{ManualConflictBoard, ModeratorDecision};
use crate::ports::{ActionSource, ConfigurationProvider, Notifier, WorldStore};
use crate::readiness::{ReadyOutcome, TurnSnapshot, TurnTracker};
use crate::turn::{RollSeed, RollerFactory, TurnProcessor};

/// Turn resolution for any number of guilds.
#[derive(Debug)]
pub struct TurnEngine {
    tracker: TurnTracker,
    board: Arc<ManualConflictBoard>,
    processor: TurnProcessor,
}

impl TurnEngine {
    /// Build an engine over the given collaborators.
    pub fn new(
        config: Arc<dyn ConfigurationProvider>,
        world: Arc<dyn WorldStore>,
        notifier: Arc<dyn Notifier>,
        dice: Arc<dyn RollerFactory>,
    ) -> Self {
        let board = Arc::new(ManualConflictBoard::new());
        let processor = TurnProcessor::new(config, world, notifier, Arc::clone(&board), dice);
        Self {
            tracker: TurnTracker::new(),
            board,
            processor,
        }
    }

    /// Build an engine from a loaded configuration file.
    pub fn from_config(
        config: &EngineConfig,
        world: Arc<dyn WorldStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(
            Arc::new(StaticConfigProvider::from_config(config)),
            world,
            notifier,
            Arc::new(RollSeed::from(config.dice)),
        )
    }

    /// The readiness tracker.
    pub const fn tracker(&self) -> &TurnTracker {
        &self.tracker
    }

    /// The moderator board.
    pub fn board(&self) -> &ManualConflictBoard {
        &self.board
    }

    /// Record an actor's action for the guild's current turn.
    pub async fn submit_action(&self, action: Action) -> Result<u64, TurnError> {
        Ok(self.tracker.submit_action(action).await?)
    }

    /// Ask an action source for each actor's next intent and submit it.
    /// Returns how many actions were submitted.
    pub async fn pull_from_source(
        &self,
        source: &dyn ActionSource,
        guild_id: GuildId,
        actors: &[ActorId],
    ) -> Result<usize, TurnError> {
        let mut submitted = 0_usize;
        for &actor_id in actors {
            let Some(action) = source.next_action(guild_id, actor_id) else {
                continue;
            };
            if action.guild_id != guild_id || action.actor_id != actor_id {
                warn!(
                    guild_id = %guild_id,
                    actor_id = %actor_id,
                    action_id = %action.id,
                    "Action source returned an action for someone else"
                );
                continue;
            }
            self.tracker.submit_action(action).await?;
            submitted = submitted.saturating_add(1);
        }
        Ok(submitted)
    }

    /// Confirm an actor is ready. Returns the report when this confirmation
    /// completed the quorum and the turn was processed.
    pub async fn mark_ready(
        &self,
        guild_id: GuildId,
        actor_id: ActorId,
    ) -> Result<Option<TurnReport>, TurnError> {
        match self.tracker.mark_ready(guild_id, actor_id).await? {
            ReadyOutcome::Triggered(snapshot) => self.run(snapshot).await.map(Some),
            ReadyOutcome::Waiting { remaining } => {
                debug!(guild_id = %guild_id, actor_id = %actor_id, remaining, "Waiting for quorum");
                Ok(None)
            }
            ReadyOutcome::AlreadyProcessing => Ok(None),
        }
    }

    /// Whether every required actor of the guild's current turn is ready.
    pub async fn is_quorum_met(&self, guild_id: GuildId) -> bool {
        self.tracker.is_quorum_met(guild_id).await
    }

    /// Process the guild's turn if its quorum holds. Used to retry a turn
    /// whose earlier attempt failed.
    pub async fn process_turn(&self, guild_id: GuildId) -> Result<Option<TurnReport>, TurnError> {
        match self.tracker.begin_if_quorum(guild_id).await? {
            Some(snapshot) => self.run(snapshot).await.map(Some),
            None => Ok(None),
        }
    }

    /// Moderator override: process the turn now, giving not-ready actors
    /// the default action.
    pub async fn force_close(&self, guild_id: GuildId) -> Result<TurnReport, TurnError> {
        let snapshot = self.tracker.force_close(guild_id).await?;
        self.run(snapshot).await
    }

    /// Put actors on the guild's lock-step roster.
    pub async fn join_lockstep(
        &self,
        guild_id: GuildId,
        members: impl IntoIterator<Item = (ActorId, ActorKind)>,
    ) {
        self.tracker.join_lockstep(guild_id, members).await;
    }

    /// Take an actor off the guild's lock-step roster. Returns the report
    /// when the turn was only waiting on that actor and has now been
    /// processed.
    pub async fn leave_lockstep(
        &self,
        guild_id: GuildId,
        actor_id: ActorId,
    ) -> Result<Option<TurnReport>, TurnError> {
        match self.tracker.leave_lockstep(guild_id, actor_id).await? {
            Some(snapshot) => self.run(snapshot).await.map(Some),
            None => Ok(None),
        }
    }

    /// Apply a moderator's decision. Winners execute first in the guild's
    /// next processed turn.
    pub async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        decision: ModeratorDecision,
    ) -> Result<ConflictInstance, TurnError> {
        Ok(self.board.resolve(conflict_id, decision).await?)
    }

    /// Conflicts of a guild still waiting for a moderator.
    pub async fn pending_conflicts(&self, guild_id: GuildId) -> Vec<ConflictInstance> {
        self.board.pending(guild_id).await
    }

    /// The guild's current turn state.
    pub async fn turn_state(&self, guild_id: GuildId) -> Option<TurnState> {
        self.tracker.turn_state(guild_id).await
    }

    async fn run(&self, snapshot: TurnSnapshot) -> Result<TurnReport, TurnError> {
        let (guild_id, turn_id) = (snapshot.guild_id, snapshot.turn_id);
        let outcome = AssertUnwindSafe(self.processor.process_turn(snapshot))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(guild_id = %guild_id, turn_id, %message, "Turn processing panicked");
                Err(TurnError::Panicked {
                    guild_id,
                    turn_id,
                    message,
                })
            });
        match outcome {
            Ok(report) => {
                self.tracker.complete(guild_id, turn_id).await?;
                Ok(report)
            }
            Err(err) => {
                self.tracker.abort_processing(guild_id, turn_id).await?;
                Err(err)
            }
        }
    }
}
