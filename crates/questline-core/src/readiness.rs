//! Turn readiness tracking per guild.
//!
//! Each guild owns one arena slot holding its [`TurnState`], the pending
//! action of every actor, and its lock-step roster. Slots live in a
//! registry keyed by guild; a slot is only ever touched under its own
//! mutex, so guilds never contend with each other.
//!
//! # State machine
//!
//! `collecting -> processing -> closed -> (next turn) collecting`
//!
//! The quorum check and the move to `processing` happen under the slot's
//! mutex, so exactly one caller per turn receives the [`TurnSnapshot`] that
//! authorises processing, however many actors become ready at once.
//!
//! # Required actors
//!
//! An actor is required when it has a pending action or is on the guild's
//! lock-step roster. Replacing a pending action clears the actor's
//! readiness; it must confirm again.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use questline_types::{Action, ActorId, ActorKind, GuildId, TurnState, TurnStatus};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::ReadinessError;

/// Authorisation to process one turn, handed out exactly once per turn.
///
/// Holds the turn's actions as they stood at the transition.
#[derive(Debug)]
pub struct TurnSnapshot {
    /// The guild.
    pub guild_id: GuildId,
    /// The turn being processed.
    pub turn_id: u64,
    /// Confirmed pending actions, one per actor.
    pub actions: Vec<Action>,
    /// Required actors without a confirmed action. They receive the
    /// guild's default action.
    pub defaults_for: Vec<(ActorId, ActorKind)>,
    /// Whether the turn was force-closed.
    pub forced: bool,
}

/// Result of [`TurnTracker::mark_ready`].
#[derive(Debug)]
pub enum ReadyOutcome {
    /// Recorded; the turn still waits on other actors.
    Waiting {
        /// Required actors not yet ready.
        remaining: usize,
    },
    /// This call completed the quorum. The caller must process the turn.
    Triggered(TurnSnapshot),
    /// The turn already moved to processing. Nothing changed.
    AlreadyProcessing,
}

#[derive(Debug)]
struct GuildTurn {
    state: TurnState,
    pending: BTreeMap<ActorId, Action>,
    lockstep: BTreeMap<ActorId, ActorKind>,
}

impl GuildTurn {
    fn open(guild_id: GuildId) -> Self {
        Self {
            state: TurnState::open(guild_id, 1),
            pending: BTreeMap::new(),
            lockstep: BTreeMap::new(),
        }
    }

    fn ensure_collecting(&self) -> Result<(), ReadinessError> {
        if self.state.status == TurnStatus::Collecting {
            Ok(())
        } else {
            Err(ReadinessError::TurnNotCollecting {
                guild_id: self.state.guild_id,
                turn_id: self.state.turn_id,
                status: self.state.status,
            })
        }
    }

    fn kind_of(&self, actor_id: ActorId) -> ActorKind {
        self.pending
            .get(&actor_id)
            .map(|a| a.actor_kind)
            .or_else(|| self.lockstep.get(&actor_id).copied())
            .unwrap_or(ActorKind::Character)
    }

    /// Move to processing and copy out the turn. `forced` treats every
    /// not-ready actor as taking the default action.
    fn begin_processing(&mut self, forced: bool) -> TurnSnapshot {
        self.state.status = TurnStatus::Processing;
        let mut actions = Vec::new();
        let mut defaults_for = Vec::new();
        for &actor_id in &self.state.required_set {
            let ready = self.state.readiness_set.contains(&actor_id);
            match self.pending.get(&actor_id) {
                Some(action) if ready || !forced => actions.push(action.clone()),
                _ => defaults_for.push((actor_id, self.kind_of(actor_id))),
            }
        }
        TurnSnapshot {
            guild_id: self.state.guild_id,
            turn_id: self.state.turn_id,
            actions,
            defaults_for,
            forced,
        }
    }

    fn ensure_processing(&self, turn_id: u64) -> Result<(), ReadinessError> {
        if self.state.status == TurnStatus::Processing && self.state.turn_id == turn_id {
            Ok(())
        } else {
            Err(ReadinessError::StaleTurn {
                guild_id: self.state.guild_id,
                turn_id,
            })
        }
    }
}

/// Per-guild readiness ledgers.
#[derive(Debug, Default)]
pub struct TurnTracker {
    guilds: RwLock<HashMap<GuildId, Arc<Mutex<GuildTurn>>>>,
}

impl TurnTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, guild_id: GuildId) -> Result<Arc<Mutex<GuildTurn>>, ReadinessError> {
        self.guilds
            .read()
            .await
            .get(&guild_id)
            .cloned()
            .ok_or(ReadinessError::UnknownGuild { guild_id })
    }

    async fn slot_or_open(&self, guild_id: GuildId) -> Arc<Mutex<GuildTurn>> {
        if let Some(slot) = self.guilds.read().await.get(&guild_id) {
            return Arc::clone(slot);
        }
        let mut guilds = self.guilds.write().await;
        Arc::clone(guilds.entry(guild_id).or_insert_with(|| {
            info!(guild_id = %guild_id, turn_id = 1, "Turn opened");
            Arc::new(Mutex::new(GuildTurn::open(guild_id)))
        }))
    }

    /// Record an actor's action for the current turn, replacing any earlier
    /// one. Opens the guild's first turn if needed. Returns the turn id.
    pub async fn submit_action(&self, action: Action) -> Result<u64, ReadinessError> {
        let slot = self.slot_or_open(action.guild_id).await;
        let mut guild = slot.lock().await;
        guild.ensure_collecting()?;

        let actor_id = action.actor_id;
        let turn_id = guild.state.turn_id;
        guild.state.required_set.insert(actor_id);
        let replaced = guild.pending.insert(actor_id, action).is_some();
        if replaced && guild.state.readiness_set.remove(&actor_id) {
            debug!(
                guild_id = %guild.state.guild_id,
                turn_id,
                actor_id = %actor_id,
                "Action replaced, readiness cleared"
            );
        }
        Ok(turn_id)
    }

    /// Confirm an actor is ready. Idempotent within a turn.
    pub async fn mark_ready(
        &self,
        guild_id: GuildId,
        actor_id: ActorId,
    ) -> Result<ReadyOutcome, ReadinessError> {
        let slot = self.slot(guild_id).await?;
        let mut guild = slot.lock().await;
        if guild.state.status == TurnStatus::Processing {
            return Ok(ReadyOutcome::AlreadyProcessing);
        }
        guild.ensure_collecting()?;
        if !guild.state.required_set.contains(&actor_id) {
            return Err(ReadinessError::NotParticipating { guild_id, actor_id });
        }

        guild.state.readiness_set.insert(actor_id);
        if guild.state.is_quorum_met() {
            let snapshot = guild.begin_processing(false);
            info!(
                guild_id = %guild_id,
                turn_id = snapshot.turn_id,
                actions = snapshot.actions.len(),
                "Quorum met, turn processing"
            );
            return Ok(ReadyOutcome::Triggered(snapshot));
        }
        Ok(ReadyOutcome::Waiting {
            remaining: guild.state.not_ready().len(),
        })
    }

    /// Whether every required actor of the guild's current turn is ready.
    pub async fn is_quorum_met(&self, guild_id: GuildId) -> bool {
        match self.slot(guild_id).await {
            Ok(slot) => slot.lock().await.state.is_quorum_met(),
            Err(_) => false,
        }
    }

    /// Start processing if the quorum already holds, as it does after an
    /// aborted attempt. `None` when the turn is still waiting.
    pub async fn begin_if_quorum(
        &self,
        guild_id: GuildId,
    ) -> Result<Option<TurnSnapshot>, ReadinessError> {
        let slot = self.slot(guild_id).await?;
        let mut guild = slot.lock().await;
        guild.ensure_collecting()?;
        if !guild.state.is_quorum_met() {
            return Ok(None);
        }
        let snapshot = guild.begin_processing(false);
        info!(guild_id = %guild_id, turn_id = snapshot.turn_id, "Turn processing retried");
        Ok(Some(snapshot))
    }

    /// End collection now. Not-ready actors take the default action.
    pub async fn force_close(&self, guild_id: GuildId) -> Result<TurnSnapshot, ReadinessError> {
        let slot = self.slot(guild_id).await?;
        let mut guild = slot.lock().await;
        guild.ensure_collecting()?;
        let snapshot = guild.begin_processing(true);
        info!(
            guild_id = %guild_id,
            turn_id = snapshot.turn_id,
            defaulted = snapshot.defaults_for.len(),
            "Turn force-closed"
        );
        Ok(snapshot)
    }

    /// Return a processing turn to collecting, keeping every pending action
    /// and readiness confirmation.
    pub async fn abort_processing(
        &self,
        guild_id: GuildId,
        turn_id: u64,
    ) -> Result<(), ReadinessError> {
        let slot = self.slot(guild_id).await?;
        let mut guild = slot.lock().await;
        guild.ensure_processing(turn_id)?;
        guild.state.status = TurnStatus::Collecting;
        info!(guild_id = %guild_id, turn_id, "Turn processing aborted, collecting again");
        Ok(())
    }

    /// Close a processed turn, consume its actions, and open the next one.
    /// Returns the new turn id.
    pub async fn complete(&self, guild_id: GuildId, turn_id: u64) -> Result<u64, ReadinessError> {
        let slot = self.slot(guild_id).await?;
        let mut guild = slot.lock().await;
        guild.ensure_processing(turn_id)?;
        guild.state.status = TurnStatus::Closed;
        info!(guild_id = %guild_id, turn_id, "Turn closed");

        let next = turn_id.saturating_add(1);
        guild.pending.clear();
        let mut state = TurnState::open(guild_id, next);
        state.required_set.extend(guild.lockstep.keys().copied());
        guild.state = state;
        info!(guild_id = %guild_id, turn_id = next, "Turn opened");
        Ok(next)
    }

    /// Add actors to the guild's lock-step roster. They are required in
    /// every turn from now on, this one included.
    pub async fn join_lockstep(
        &self,
        guild_id: GuildId,
        members: impl IntoIterator<Item = (ActorId, ActorKind)>,
    ) {
        let slot = self.slot_or_open(guild_id).await;
        let mut guild = slot.lock().await;
        let collecting = guild.state.status == TurnStatus::Collecting;
        for (actor_id, kind) in members {
            guild.lockstep.insert(actor_id, kind);
            if collecting {
                guild.state.required_set.insert(actor_id);
            }
        }
    }

    /// Remove an actor from the roster. It stays required this turn only
    /// if it has a pending action.
    ///
    /// When the leaver was the last actor the turn waited on, the turn
    /// moves to processing and the snapshot is returned.
    pub async fn leave_lockstep(
        &self,
        guild_id: GuildId,
        actor_id: ActorId,
    ) -> Result<Option<TurnSnapshot>, ReadinessError> {
        let slot = self.slot(guild_id).await?;
        let mut guild = slot.lock().await;
        guild.lockstep.remove(&actor_id);
        if guild.state.status != TurnStatus::Collecting || guild.pending.contains_key(&actor_id) {
            return Ok(None);
        }
        guild.state.required_set.remove(&actor_id);
        guild.state.readiness_set.remove(&actor_id);
        if !guild.state.is_quorum_met() {
            return Ok(None);
        }
        let snapshot = guild.begin_processing(false);
        info!(
            guild_id = %guild_id,
            turn_id = snapshot.turn_id,
            actor_id = %actor_id,
            "Quorum met after roster change, turn processing"
        );
        Ok(Some(snapshot))
    }

    /// A copy of the guild's current turn state.
    pub async fn turn_state(&self, guild_id: GuildId) -> Option<TurnState> {
        let slot = self.slot(guild_id).await.ok()?;
        let guild = slot.lock().await;
        Some(guild.state.clone())
    }

    /// The actor's pending action, if any.
    pub async fn pending_action(&self, guild_id: GuildId, actor_id: ActorId) -> Option<Action> {
        let slot = self.slot(guild_id).await.ok()?;
        let guild = slot.lock().await;
        guild.pending.get(&actor_id).cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn make_action(guild_id: GuildId, actor_id: ActorId) -> Action {
        Action::new(guild_id, actor_id, ActorKind::Character, "search")
    }

    #[tokio::test]
    async fn first_submission_opens_turn_one() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        assert!(tracker.turn_state(guild).await.is_none());
        let turn = tracker.submit_action(make_action(guild, ActorId::new())).await.unwrap();
        assert_eq!(turn, 1);
        let state = tracker.turn_state(guild).await.unwrap();
        assert_eq!(state.status, TurnStatus::Collecting);
        assert_eq!(state.required_set.len(), 1);
    }

    #[tokio::test]
    async fn mark_ready_is_idempotent() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        tracker.submit_action(make_action(guild, b)).await.unwrap();

        let first = tracker.mark_ready(guild, a).await.unwrap();
        let second = tracker.mark_ready(guild, a).await.unwrap();
        assert!(matches!(first, ReadyOutcome::Waiting { remaining: 1 }));
        assert!(matches!(second, ReadyOutcome::Waiting { remaining: 1 }));
        let state = tracker.turn_state(guild).await.unwrap();
        assert_eq!(state.readiness_set.len(), 1);
        assert!(!tracker.is_quorum_met(guild).await);
    }

    #[tokio::test]
    async fn replacing_an_action_clears_readiness() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        tracker.submit_action(make_action(guild, b)).await.unwrap();
        tracker.mark_ready(guild, a).await.unwrap();

        let replacement = Action::new(guild, a, ActorKind::Character, "hide");
        tracker.submit_action(replacement.clone()).await.unwrap();

        let state = tracker.turn_state(guild).await.unwrap();
        assert!(!state.readiness_set.contains(&a));
        assert_eq!(tracker.pending_action(guild, a).await.unwrap().id, replacement.id);
    }

    #[tokio::test]
    async fn exactly_one_concurrent_caller_triggers() {
        let tracker = Arc::new(TurnTracker::new());
        let guild = GuildId::new();
        let actors: Vec<_> = (0..16).map(|_| ActorId::new()).collect();
        for &actor in &actors {
            tracker.submit_action(make_action(guild, actor)).await.unwrap();
        }

        let mut handles = Vec::new();
        for &actor in &actors {
            for _ in 0..3 {
                let tracker = Arc::clone(&tracker);
                handles.push(tokio::spawn(async move { tracker.mark_ready(guild, actor).await }));
            }
        }
        let mut triggered = 0;
        for handle in handles {
            if let ReadyOutcome::Triggered(snapshot) = handle.await.unwrap().unwrap() {
                assert_eq!(snapshot.actions.len(), 16);
                triggered += 1;
            }
        }
        assert_eq!(triggered, 1);
        let state = tracker.turn_state(guild).await.unwrap();
        assert_eq!(state.status, TurnStatus::Processing);
    }

    #[tokio::test]
    async fn submissions_while_processing_are_rejected() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let a = ActorId::new();
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        assert!(matches!(
            tracker.mark_ready(guild, a).await.unwrap(),
            ReadyOutcome::Triggered(_)
        ));

        let late = tracker.submit_action(make_action(guild, ActorId::new())).await;
        assert!(matches!(late, Err(ReadinessError::TurnNotCollecting { turn_id: 1, .. })));
        assert!(matches!(
            tracker.mark_ready(guild, a).await.unwrap(),
            ReadyOutcome::AlreadyProcessing
        ));
    }

    #[tokio::test]
    async fn force_close_defaults_the_not_ready() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let actors: Vec<_> = (0..5).map(|_| ActorId::new()).collect();
        for &actor in &actors {
            tracker.submit_action(make_action(guild, actor)).await.unwrap();
        }
        for &actor in &actors[..3] {
            tracker.mark_ready(guild, actor).await.unwrap();
        }

        let snapshot = tracker.force_close(guild).await.unwrap();
        assert!(snapshot.forced);
        assert_eq!(snapshot.actions.len(), 3);
        let defaulted: Vec<_> = snapshot.defaults_for.iter().map(|(id, _)| *id).collect();
        assert_eq!(defaulted.len(), 2);
        assert!(defaulted.contains(&actors[3]) && defaulted.contains(&actors[4]));

        assert!(tracker.force_close(guild).await.is_err());
    }

    #[tokio::test]
    async fn abort_keeps_actions_and_readiness() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let a = ActorId::new();
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        let ReadyOutcome::Triggered(snapshot) = tracker.mark_ready(guild, a).await.unwrap() else {
            panic!("expected trigger");
        };

        tracker.abort_processing(guild, snapshot.turn_id).await.unwrap();
        let state = tracker.turn_state(guild).await.unwrap();
        assert_eq!(state.status, TurnStatus::Collecting);
        assert!(state.readiness_set.contains(&a));
        assert!(tracker.pending_action(guild, a).await.is_some());

        // The next confirmation re-triggers.
        assert!(matches!(
            tracker.mark_ready(guild, a).await.unwrap(),
            ReadyOutcome::Triggered(_)
        ));
    }

    #[tokio::test]
    async fn begin_if_quorum_waits_for_everyone() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        tracker.submit_action(make_action(guild, b)).await.unwrap();
        tracker.mark_ready(guild, a).await.unwrap();
        assert!(tracker.begin_if_quorum(guild).await.unwrap().is_none());

        let ReadyOutcome::Triggered(snapshot) = tracker.mark_ready(guild, b).await.unwrap() else {
            panic!("expected trigger");
        };
        tracker.abort_processing(guild, snapshot.turn_id).await.unwrap();
        let retry = tracker.begin_if_quorum(guild).await.unwrap().unwrap();
        assert_eq!(retry.actions.len(), 2);
        assert!(tracker.begin_if_quorum(guild).await.is_err());
    }

    #[tokio::test]
    async fn complete_opens_the_next_turn_with_lockstep_roster() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let (a, member) = (ActorId::new(), ActorId::new());
        tracker.join_lockstep(guild, [(member, ActorKind::Party)]).await;
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        tracker.mark_ready(guild, a).await.unwrap();
        let ReadyOutcome::Triggered(snapshot) = tracker.mark_ready(guild, member).await.unwrap()
        else {
            panic!("expected trigger");
        };
        assert_eq!(snapshot.defaults_for, vec![(member, ActorKind::Party)]);

        let next = tracker.complete(guild, snapshot.turn_id).await.unwrap();
        assert_eq!(next, 2);
        let state = tracker.turn_state(guild).await.unwrap();
        assert_eq!(state.turn_id, 2);
        assert_eq!(state.status, TurnStatus::Collecting);
        assert!(state.required_set.contains(&member));
        assert!(!state.required_set.contains(&a));
        assert!(tracker.pending_action(guild, a).await.is_none());
        assert!(tracker.complete(guild, 1).await.is_err());
    }

    #[tokio::test]
    async fn leaving_the_roster_can_complete_the_quorum() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let (a, member) = (ActorId::new(), ActorId::new());
        tracker.join_lockstep(guild, [(member, ActorKind::Party)]).await;
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        assert!(matches!(
            tracker.mark_ready(guild, a).await.unwrap(),
            ReadyOutcome::Waiting { remaining: 1 }
        ));

        let snapshot = tracker.leave_lockstep(guild, member).await.unwrap().unwrap();
        assert_eq!(snapshot.actions.len(), 1);
        assert!(snapshot.defaults_for.is_empty());
        let state = tracker.turn_state(guild).await.unwrap();
        assert_eq!(state.status, TurnStatus::Processing);
    }

    #[tokio::test]
    async fn leaving_an_unready_turn_keeps_collecting() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        let (a, member) = (ActorId::new(), ActorId::new());
        tracker.join_lockstep(guild, [(member, ActorKind::Party)]).await;
        tracker.submit_action(make_action(guild, a)).await.unwrap();
        assert!(tracker.leave_lockstep(guild, member).await.unwrap().is_none());
        let state = tracker.turn_state(guild).await.unwrap();
        assert_eq!(state.status, TurnStatus::Collecting);
        assert!(!state.required_set.contains(&member));
    }

    #[tokio::test]
    async fn strangers_cannot_mark_ready() {
        let tracker = TurnTracker::new();
        let guild = GuildId::new();
        assert!(matches!(
            tracker.mark_ready(guild, ActorId::new()).await,
            Err(ReadinessError::UnknownGuild { .. })
        ));
        tracker.submit_action(make_action(guild, ActorId::new())).await.unwrap();
        assert!(matches!(
            tracker.mark_ready(guild, ActorId::new()).await,
            Err(ReadinessError::NotParticipating { .. })
        ));
    }
}
