//! Turn processing: the orchestration of one guild's turn.
//!
//! [`TurnProcessor::process_turn`] runs once per [`TurnSnapshot`], i.e.
//! once per transition to `processing`:
//!
//! 1. **Load** -- fetch the guild's configuration. Failure aborts the turn
//!    before anything executes; the caller returns the guild to collecting.
//! 2. **Resolve** -- add default actions for actors who did not act, detect
//!    and decide conflicts, then put the cleared actions in the guild's
//!    execution order.
//! 3. **Execute** -- escalated conflicts go to the moderator board and the
//!    notifier, decided ones are archived. Actions released by moderator
//!    decisions run first (oldest decision first), then every cleared
//!    action. Each action runs in its own scope.
//! 4. **Report** -- assemble the [`TurnReport`] and hand it to the notifier.
//!
//! Phases 1 and 2 touch nothing shared, so a failure or panic there leaves
//! the board and the world as they were. Notifier calls are contained.
//!
//! Dice come from a [`RollerFactory`]. With a fixed seed every
//! `(guild, turn)` pair gets its own deterministic generator.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use questline_rules::{
    DieRoller, ParticipantStats, ResolutionContext, RngRoller, detect_and_resolve,
};
use questline_types::{
    Action, ActionId, ActionOutcome, ActionResolution, ActorId, ActorOutcome, ConflictInstance,
    ConflictStatus, FailureClass, GuildId, TurnReport, TurnWarning, narrative,
};
use tracing::{debug, info, warn};

use crate::config::DiceConfig;
use crate::error::{NotifyError, TurnError};
use crate::executor::{self, panic_message};
use crate::moderation::ManualConflictBoard;
use crate::ports::{ConfigurationProvider, Notifier, WorldStore};
use crate::readiness::TurnSnapshot;

// ---------------------------------------------------------------------------
// Dice sources
// ---------------------------------------------------------------------------

/// Hands out one die roller per processed turn.
pub trait RollerFactory: Send + Sync {
    /// The roller for one guild's turn.
    fn roller(&self, guild_id: GuildId, turn_id: u64) -> Box<dyn DieRoller + Send>;
}

impl<F> RollerFactory for F
where
    F: Fn(GuildId, u64) -> Box<dyn DieRoller + Send> + Send + Sync,
{
    fn roller(&self, guild_id: GuildId, turn_id: u64) -> Box<dyn DieRoller + Send> {
        self(guild_id, turn_id)
    }
}

/// Where turn dice come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollSeed {
    /// Deterministic per `(seed, guild, turn)`.
    Fixed(u64),
    /// Operating-system entropy.
    Entropy,
}

impl From<DiceConfig> for RollSeed {
    fn from(config: DiceConfig) -> Self {
        config.seed.map_or(Self::Entropy, Self::Fixed)
    }
}

impl RollerFactory for RollSeed {
    fn roller(&self, guild_id: GuildId, turn_id: u64) -> Box<dyn DieRoller + Send> {
        match self {
            Self::Fixed(seed) => Box::new(RngRoller::seeded(turn_seed(*seed, guild_id, turn_id))),
            Self::Entropy => Box::new(RngRoller::from_entropy()),
        }
    }
}

/// Mix the configured seed with the guild and turn so concurrent guilds
/// never share a sequence.
fn turn_seed(seed: u64, guild_id: GuildId, turn_id: u64) -> u64 {
    let (hi, lo) = guild_id.into_inner().as_u64_pair();
    let mut state = seed
        .wrapping_add(turn_id.wrapping_mul(0x517c_c1b7_2722_0a95))
        ^ hi.rotate_left(17)
        ^ lo.rotate_left(41);
    if state == 0 {
        state = 0xdead_beef_cafe_babe;
    }
    state ^= state.wrapping_shl(13);
    state ^= state.wrapping_shr(7);
    state ^= state.wrapping_shl(17);
    state
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Attribute lookups for the rules engine, read through the world store.
struct WorldStats<'a> {
    world: &'a dyn WorldStore,
    guild_id: GuildId,
}

impl ParticipantStats for WorldStats<'_> {
    fn attribute(&self, actor_id: ActorId, name: &str) -> Option<i64> {
        match self.world.attribute(self.guild_id, actor_id, name) {
            Ok(value) => value,
            Err(err) => {
                debug!(guild_id = %self.guild_id, actor_id = %actor_id, name, %err, "Attribute unavailable");
                None
            }
        }
    }
}

/// Runs processing turns against the collaborators.
pub struct TurnProcessor {
    config: Arc<dyn ConfigurationProvider>,
    world: Arc<dyn WorldStore>,
    notifier: Arc<dyn Notifier>,
    board: Arc<ManualConflictBoard>,
    dice: Arc<dyn RollerFactory>,
}

impl std::fmt::Debug for TurnProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnProcessor").finish_non_exhaustive()
    }
}

impl TurnProcessor {
    /// Wire a processor to its collaborators.
    pub fn new(
        config: Arc<dyn ConfigurationProvider>,
        world: Arc<dyn WorldStore>,
        notifier: Arc<dyn Notifier>,
        board: Arc<ManualConflictBoard>,
        dice: Arc<dyn RollerFactory>,
    ) -> Self {
        Self {
            config,
            world,
            notifier,
            board,
            dice,
        }
    }

    /// Process one turn.
    ///
    /// Only a configuration failure returns an error; every per-action
    /// failure is recorded in the report instead. A collaborator panic
    /// during load or resolve unwinds out of here before the board or the
    /// world has changed.
    pub async fn process_turn(&self, snapshot: TurnSnapshot) -> Result<TurnReport, TurnError> {
        let TurnSnapshot {
            guild_id,
            turn_id,
            actions: submitted,
            defaults_for,
            forced,
        } = snapshot;
        info!(guild_id = %guild_id, turn_id, forced, "Turn processing started");

        // --- Phase 1: Load ---
        let config = self.config.guild_config(guild_id).map_err(|source| {
            warn!(guild_id = %guild_id, turn_id, error = %source, "Guild configuration unavailable");
            TurnError::ConfigurationMissing { guild_id, source }
        })?;

        // --- Phase 2: Resolve ---
        let mut actions = submitted;
        actions.extend(
            defaults_for
                .iter()
                .map(|&(actor_id, kind)| config.default_action.build(guild_id, actor_id, kind)),
        );
        let stats = WorldStats {
            world: self.world.as_ref(),
            guild_id,
        };
        let batch = {
            let ctx = ResolutionContext::new(guild_id, turn_id, &config.conflicts)
                .with_tables(&config.difficulties, &config.modifiers)
                .with_stats(&stats);
            let mut roller = self.dice.roller(guild_id, turn_id);
            detect_and_resolve(&actions, &ctx, roller.as_mut())
        };
        let mut cleared = batch.cleared;
        config.execution_order.sort(&mut cleared, &stats);
        let winners: BTreeSet<ActionId> = batch
            .conflicts
            .iter()
            .filter_map(|c| c.resolution.as_ref())
            .flat_map(|r| r.winners.iter().copied())
            .collect();
        debug!(
            guild_id = %guild_id,
            turn_id,
            actions = actions.len(),
            cleared = cleared.len(),
            conflicts = batch.conflicts.len(),
            "Conflicts resolved"
        );

        // --- Phase 3: Execute ---
        for conflict in &batch.conflicts {
            if conflict.status == ConflictStatus::AwaitingManual {
                notify(guild_id, turn_id, "Moderation request not delivered", || {
                    self.notifier.request_moderation(conflict)
                });
                self.board.escalate(conflict.clone()).await;
            } else {
                self.board.archive(conflict.clone()).await;
            }
        }

        let mut report = TurnReport {
            turn_id,
            guild_id,
            per_actor_outcomes: BTreeMap::new(),
            unresolved_conflicts: Vec::new(),
            warnings: Vec::new(),
            processed_at: Utc::now(),
        };

        let released = self.board.take_released(guild_id).await;
        for item in released {
            let outcome = executor::execute(self.world.as_ref(), &item.action);
            record_execution(&mut report, item.action, outcome, true);
        }

        for action in cleared {
            let won = winners.contains(&action.id);
            let outcome = executor::execute(self.world.as_ref(), &action);
            record_execution(&mut report, action, outcome, won);
        }

        for conflict in &batch.conflicts {
            record_conflict(&mut report, conflict);
        }

        // --- Phase 4: Report ---
        report.unresolved_conflicts = self.board.pending(guild_id).await;
        report.processed_at = Utc::now();
        info!(
            guild_id = %guild_id,
            turn_id,
            outcomes = report.outcome_count(),
            unresolved = report.unresolved_conflicts.len(),
            warnings = report.warnings.len(),
            "Turn processed"
        );
        notify(guild_id, turn_id, "Turn report not delivered", || {
            self.notifier.deliver_report(&report)
        });
        Ok(report)
    }
}

/// Run a notifier call. Neither an error nor a panic reaches the turn.
fn notify(
    guild_id: GuildId,
    turn_id: u64,
    failure: &str,
    call: impl FnOnce() -> Result<(), NotifyError>,
) {
    let err = match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(payload) => format!("notifier panicked: {}", panic_message(payload.as_ref())),
    };
    warn!(guild_id = %guild_id, turn_id, %err, "{failure}");
}

fn push_outcome(report: &mut TurnReport, outcome: ActorOutcome) {
    report
        .per_actor_outcomes
        .entry(outcome.action.actor_id)
        .or_default()
        .push(outcome);
}

fn execution_key(outcome: &ActionOutcome, won: bool) -> &'static str {
    match outcome.failure_class() {
        None if won => narrative::CONFLICT_WON,
        None => narrative::EXECUTED,
        Some(FailureClass::Validation) => narrative::REJECTED_VALIDATION,
        Some(FailureClass::Dependency) => narrative::FAILED_DEPENDENCY,
        Some(FailureClass::Fault) => narrative::FAILED_FAULT,
    }
}

fn record_execution(report: &mut TurnReport, action: Action, outcome: ActionOutcome, won: bool) {
    if let Some(error) = outcome
        .error
        .as_ref()
        .filter(|e| e.class == FailureClass::Fault)
    {
        report.warnings.push(TurnWarning {
            actor_id: action.actor_id,
            action_id: action.id,
            message: error.message.clone(),
        });
    }
    let narrative_key = execution_key(&outcome, won).to_owned();
    push_outcome(
        report,
        ActorOutcome {
            action,
            result: ActionResolution::Executed { outcome },
            narrative_key,
        },
    );
}

fn record_conflict(report: &mut TurnReport, conflict: &ConflictInstance) {
    if conflict.status == ConflictStatus::AwaitingManual {
        for action in &conflict.participants {
            push_outcome(
                report,
                ActorOutcome {
                    action: action.clone(),
                    result: ActionResolution::AwaitingModerator {
                        conflict_id: conflict.id,
                    },
                    narrative_key: narrative::AWAITING_MODERATOR.to_owned(),
                },
            );
        }
        return;
    }

    let how = conflict
        .resolution
        .as_ref()
        .and_then(|r| r.note.as_deref())
        .unwrap_or("contest");
    for action in conflict.losers() {
        push_outcome(
            report,
            ActorOutcome {
                action: action.clone(),
                result: ActionResolution::ConflictLost {
                    conflict_id: conflict.id,
                    reason: format!("lost {} ({how})", conflict.definition),
                },
                narrative_key: narrative::CONFLICT_LOST.to_owned(),
            },
        );
    }
}
