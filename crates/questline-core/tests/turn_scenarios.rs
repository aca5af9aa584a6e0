//! End-to-end turns through [`TurnEngine`] with the in-memory collaborators.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::panic
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use questline_core::memory::{MemoryWorld, QueuedActionSource, RecordingNotifier};
use questline_core::{
    ConfigError, ConfigurationProvider, GuildConfig, ModeratorDecision, Notifier, NotifyError,
    RollSeed, RollerFactory, StaticConfigProvider, StoreError, TurnEngine, TurnError,
    WorldStore, WorldTransaction,
};
use questline_rules::{
    CheckTemplate, ConflictCatalog, ConflictDefinition, ContestScope, DieRoller, PriorityRule,
    ResolutionMode, ScriptedRoller,
};
use questline_types::{
    Action, ActionResolution, ActionType, ActorId, ActorKind, ConflictInstance, ConflictStatus,
    Effect, GuildId, ItemId, LocationId, ResolutionMethod, TargetRef, TurnReport, TurnStatus,
    narrative,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn make_action(guild: GuildId, actor: ActorId, kind: &str, offset_ms: i64) -> Action {
    Action::new(guild, actor, ActorKind::Character, kind)
        .submitted(base_time() + Duration::milliseconds(offset_ms))
}

fn make_def(name: &str, verb: &str, contest: ContestScope, resolution: ResolutionMode) -> ConflictDefinition {
    ConflictDefinition {
        name: name.to_owned(),
        action_types: (ActionType::new(verb), ActionType::new(verb)),
        contest,
        capacity: 1,
        resolution,
    }
}

fn guild_config(definitions: Vec<ConflictDefinition>) -> GuildConfig {
    GuildConfig {
        conflicts: ConflictCatalog::new(definitions),
        ..GuildConfig::default()
    }
}

fn room_entry() -> GuildConfig {
    guild_config(vec![make_def(
        "room_entry",
        "move_into",
        ContestScope::SameTarget,
        ResolutionMode::AutoCheck {
            check: CheckTemplate::opposed("agility"),
        },
    )])
}

fn scripted(faces: Vec<u32>) -> Arc<dyn RollerFactory> {
    Arc::new(move |_: GuildId, _: u64| -> Box<dyn DieRoller + Send> {
        Box::new(ScriptedRoller::new(faces.clone()))
    })
}

struct Harness {
    engine: TurnEngine,
    world: Arc<MemoryWorld>,
    notifier: Arc<RecordingNotifier>,
    guild: GuildId,
}

fn harness_with(config: Arc<dyn ConfigurationProvider>, dice: Arc<dyn RollerFactory>) -> Harness {
    let world = Arc::new(MemoryWorld::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = TurnEngine::new(config, world.clone(), notifier.clone(), dice);
    Harness {
        engine,
        world,
        notifier,
        guild: GuildId::new(),
    }
}

fn harness(config: GuildConfig, dice: Arc<dyn RollerFactory>) -> Harness {
    harness_with(
        Arc::new(StaticConfigProvider::new().with_default(config)),
        dice,
    )
}

/// Serves its configuration only once switched on.
struct SwitchedConfig {
    on: AtomicBool,
    config: Arc<GuildConfig>,
}

impl ConfigurationProvider for SwitchedConfig {
    fn guild_config(&self, guild_id: GuildId) -> Result<Arc<GuildConfig>, ConfigError> {
        if self.on.load(Ordering::SeqCst) {
            Ok(Arc::clone(&self.config))
        } else {
            Err(ConfigError::ConfigurationMissing { guild_id })
        }
    }
}

/// Panics on attribute reads while tripped. Transactions pass through.
struct TrippedWorld {
    inner: Arc<MemoryWorld>,
    tripped: AtomicBool,
}

impl WorldStore for TrippedWorld {
    fn attribute(
        &self,
        guild_id: GuildId,
        actor_id: ActorId,
        name: &str,
    ) -> Result<Option<i64>, StoreError> {
        if self.tripped.load(Ordering::SeqCst) {
            panic!("attribute index corrupted");
        }
        self.inner.attribute(guild_id, actor_id, name)
    }

    fn begin(&self, guild_id: GuildId) -> Result<Box<dyn WorldTransaction + '_>, StoreError> {
        self.inner.begin(guild_id)
    }
}

/// Panics on every call.
struct PanickingNotifier;

impl Notifier for PanickingNotifier {
    fn request_moderation(&self, _conflict: &ConflictInstance) -> Result<(), NotifyError> {
        panic!("moderation channel gone");
    }

    fn deliver_report(&self, _report: &TurnReport) -> Result<(), NotifyError> {
        panic!("report channel gone");
    }
}

/// Counts dice without caring about faces.
struct CountingRoller(Arc<AtomicU32>);

impl DieRoller for CountingRoller {
    fn roll_die(&mut self, _sides: u32) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst);
        10
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn agility_contest_for_a_single_room() {
    let h = harness(room_entry(), scripted(vec![12, 15]));
    let (a, b, room) = (ActorId::new(), ActorId::new(), LocationId::new());
    h.world.add_location(h.guild, room, Some(1));
    h.world.set_attribute(h.guild, a, "agility", 14);
    h.world.set_attribute(h.guild, b, "agility", 9);

    h.engine
        .submit_action(make_action(h.guild, a, "move_into", 0).with_target(TargetRef::Location(room)))
        .await
        .unwrap();
    h.engine
        .submit_action(make_action(h.guild, b, "move_into", 10).with_target(TargetRef::Location(room)))
        .await
        .unwrap();

    assert!(h.engine.mark_ready(h.guild, a).await.unwrap().is_none());
    let report = h.engine.mark_ready(h.guild, b).await.unwrap().unwrap();

    // 12 + 2 against 15 - 1: a 14-14 tie, which the defender keeps.
    let won = &report.outcomes_for(b)[0];
    assert_eq!(won.narrative_key, narrative::CONFLICT_WON);
    assert!(matches!(&won.result, ActionResolution::Executed { outcome } if outcome.success));
    let lost = &report.outcomes_for(a)[0];
    assert_eq!(lost.narrative_key, narrative::CONFLICT_LOST);
    assert!(matches!(lost.result, ActionResolution::ConflictLost { .. }));

    assert_eq!(h.world.location_of(h.guild, b), Some(room));
    assert_eq!(h.world.location_of(h.guild, a), None);

    let archived = h.engine.board().archived(h.guild).await;
    assert_eq!(archived.len(), 1);
    let resolution = archived[0].resolution.as_ref().unwrap();
    assert_eq!(resolution.method, ResolutionMethod::AutoCheck);
    let check = &resolution.checks[0];
    assert_eq!(check.roll_total, 14);
    assert_eq!(check.opposing.as_ref().unwrap().roll_total, 14);

    let state = h.engine.turn_state(h.guild).await.unwrap();
    assert_eq!((state.turn_id, state.status), (2, TurnStatus::Collecting));
    assert_eq!(h.notifier.reports().len(), 1);
}

#[tokio::test]
async fn force_close_with_three_of_five_ready() {
    let h = harness(GuildConfig::default(), Arc::new(RollSeed::Fixed(1)));
    let actors: Vec<_> = (0..5).map(|_| ActorId::new()).collect();
    for (offset, &actor) in (0_i64..).zip(&actors) {
        h.engine
            .submit_action(make_action(h.guild, actor, "search", offset))
            .await
            .unwrap();
    }
    for &actor in &actors[..3] {
        assert!(h.engine.mark_ready(h.guild, actor).await.unwrap().is_none());
    }
    assert!(!h.engine.is_quorum_met(h.guild).await);

    let report = h.engine.force_close(h.guild).await.unwrap();
    assert_eq!(report.per_actor_outcomes.len(), 5);
    for &actor in &actors[..3] {
        let outcome = &report.outcomes_for(actor)[0];
        assert_eq!(outcome.action.action_type.as_str(), "search");
        assert_eq!(outcome.narrative_key, narrative::EXECUTED);
    }
    for &actor in &actors[3..] {
        let outcome = &report.outcomes_for(actor)[0];
        assert!(outcome.action.is_pass());
        assert_eq!(outcome.narrative_key, narrative::EXECUTED);
    }

    let state = h.engine.turn_state(h.guild).await.unwrap();
    assert_eq!(state.turn_id, 2);
    assert!(state.required_set.is_empty());
    assert!(h.engine.tracker().pending_action(h.guild, actors[4]).await.is_none());
}

#[tokio::test]
async fn one_faulting_action_does_not_touch_the_others() {
    let h = harness(GuildConfig::default(), Arc::new(RollSeed::Fixed(1)));
    let (a, b, c) = (ActorId::new(), ActorId::new(), ActorId::new());
    h.world.set_attribute(h.guild, c, "health", 10);
    h.world.inject_fault(h.guild, b);

    h.engine
        .submit_action(make_action(h.guild, a, "attack", 0).with_target(TargetRef::Actor(c)))
        .await
        .unwrap();
    h.engine.submit_action(make_action(h.guild, b, "search", 1)).await.unwrap();
    h.engine.submit_action(make_action(h.guild, c, "search", 2)).await.unwrap();
    h.engine.mark_ready(h.guild, a).await.unwrap();
    h.engine.mark_ready(h.guild, b).await.unwrap();
    let report = h.engine.mark_ready(h.guild, c).await.unwrap().unwrap();

    assert_eq!(report.outcomes_for(a)[0].narrative_key, narrative::EXECUTED);
    assert_eq!(report.outcomes_for(b)[0].narrative_key, narrative::FAILED_FAULT);
    assert_eq!(report.outcomes_for(c)[0].narrative_key, narrative::EXECUTED);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].actor_id, b);

    assert_eq!(h.world.commits(), 2);
    assert_eq!(h.world.rollbacks(), 1);
    assert_eq!(h.world.attribute(h.guild, c, "health").unwrap(), Some(9));
}

#[tokio::test]
async fn manual_conflict_winner_runs_first_next_turn() {
    let config = guild_config(vec![make_def(
        "claim_item",
        "take",
        ContestScope::SameTarget,
        ResolutionMode::Manual,
    )]);
    let h = harness(config, Arc::new(RollSeed::Fixed(3)));
    let (a, b, c, sword) = (ActorId::new(), ActorId::new(), ActorId::new(), ItemId::new());
    h.world.place_item(h.guild, sword);

    let a_take = make_action(h.guild, a, "take", 0).with_target(TargetRef::Item(sword));
    let b_take = make_action(h.guild, b, "take", 5).with_target(TargetRef::Item(sword));
    h.engine.submit_action(a_take).await.unwrap();
    h.engine.submit_action(b_take.clone()).await.unwrap();
    h.engine.mark_ready(h.guild, a).await.unwrap();
    let first = h.engine.mark_ready(h.guild, b).await.unwrap().unwrap();

    for actor in [a, b] {
        let outcome = &first.outcomes_for(actor)[0];
        assert_eq!(outcome.narrative_key, narrative::AWAITING_MODERATOR);
    }
    assert_eq!(first.unresolved_conflicts.len(), 1);
    assert_eq!(h.notifier.moderation_requests().len(), 1);
    assert_eq!(h.world.holder_of(h.guild, sword), None);

    let conflict_id = first.unresolved_conflicts[0].id;
    let resolved = h
        .engine
        .resolve_conflict(
            conflict_id,
            ModeratorDecision {
                winners: vec![b_take.id],
                note: Some("b reached it first".to_owned()),
            },
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    assert!(matches!(
        h.engine.resolve_conflict(conflict_id, ModeratorDecision::default()).await,
        Err(TurnError::Moderation(_))
    ));

    // c grabs for the same sword next turn, but b's released action runs first.
    h.engine
        .submit_action(make_action(h.guild, c, "take", 100).with_target(TargetRef::Item(sword)))
        .await
        .unwrap();
    let second = h.engine.mark_ready(h.guild, c).await.unwrap().unwrap();
    assert_eq!(second.turn_id, 2);
    assert_eq!(second.outcomes_for(b)[0].narrative_key, narrative::CONFLICT_WON);
    assert_eq!(second.outcomes_for(c)[0].narrative_key, narrative::REJECTED_VALIDATION);
    assert!(second.unresolved_conflicts.is_empty());
    assert_eq!(h.world.holder_of(h.guild, sword), Some(b));
}

#[tokio::test]
async fn missing_configuration_keeps_the_turn_open() {
    let switched = Arc::new(SwitchedConfig {
        on: AtomicBool::new(false),
        config: Arc::new(GuildConfig::default()),
    });
    let h = harness_with(switched.clone(), Arc::new(RollSeed::Fixed(5)));
    let a = ActorId::new();
    h.engine.submit_action(make_action(h.guild, a, "search", 0)).await.unwrap();

    let err = h.engine.mark_ready(h.guild, a).await.unwrap_err();
    assert!(matches!(err, TurnError::ConfigurationMissing { guild_id, .. } if guild_id == h.guild));
    let state = h.engine.turn_state(h.guild).await.unwrap();
    assert_eq!((state.turn_id, state.status), (1, TurnStatus::Collecting));
    assert!(state.readiness_set.contains(&a));
    assert!(h.engine.tracker().pending_action(h.guild, a).await.is_some());
    assert_eq!(h.world.commits(), 0);
    assert!(h.notifier.reports().is_empty());

    switched.on.store(true, Ordering::SeqCst);
    let report = h.engine.process_turn(h.guild).await.unwrap().unwrap();
    assert_eq!(report.turn_id, 1);
    assert_eq!(report.outcomes_for(a)[0].narrative_key, narrative::EXECUTED);
    assert_eq!(h.world.commits(), 1);
}

#[tokio::test]
async fn collaborator_panic_leaves_the_turn_collecting() {
    let world = Arc::new(MemoryWorld::new());
    let tripped = Arc::new(TrippedWorld {
        inner: Arc::clone(&world),
        tripped: AtomicBool::new(true),
    });
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = TurnEngine::new(
        Arc::new(StaticConfigProvider::new().with_default(room_entry())),
        tripped.clone(),
        notifier.clone(),
        scripted(vec![12, 15]),
    );
    let guild = GuildId::new();
    let (a, b, room) = (ActorId::new(), ActorId::new(), LocationId::new());
    world.add_location(guild, room, Some(1));
    world.set_attribute(guild, a, "agility", 14);
    world.set_attribute(guild, b, "agility", 9);
    for (actor, offset) in [(a, 0), (b, 10)] {
        engine
            .submit_action(make_action(guild, actor, "move_into", offset).with_target(TargetRef::Location(room)))
            .await
            .unwrap();
    }
    engine.mark_ready(guild, a).await.unwrap();

    let err = engine.mark_ready(guild, b).await.unwrap_err();
    assert!(matches!(
        &err,
        TurnError::Panicked { guild_id, turn_id: 1, message }
            if *guild_id == guild && message.contains("attribute index corrupted")
    ));
    let state = engine.turn_state(guild).await.unwrap();
    assert_eq!((state.turn_id, state.status), (1, TurnStatus::Collecting));
    assert!(state.readiness_set.contains(&a) && state.readiness_set.contains(&b));
    assert!(engine.tracker().pending_action(guild, b).await.is_some());
    assert!(engine.board().archived(guild).await.is_empty());
    assert_eq!(world.commits(), 0);
    assert!(notifier.reports().is_empty());

    tripped.tripped.store(false, Ordering::SeqCst);
    let report = engine.process_turn(guild).await.unwrap().unwrap();
    assert_eq!(report.turn_id, 1);
    assert_eq!(report.outcomes_for(b)[0].narrative_key, narrative::CONFLICT_WON);
    assert_eq!(engine.board().archived(guild).await.len(), 1);
    assert_eq!(engine.turn_state(guild).await.unwrap().turn_id, 2);
}

#[tokio::test]
async fn notifier_panics_do_not_abort_the_turn() {
    let config = guild_config(vec![make_def(
        "duel_claim",
        "claim",
        ContestScope::SameTarget,
        ResolutionMode::Manual,
    )]);
    let world = Arc::new(MemoryWorld::new());
    let engine = TurnEngine::new(
        Arc::new(StaticConfigProvider::new().with_default(config)),
        world,
        Arc::new(PanickingNotifier),
        Arc::new(RollSeed::Fixed(3)),
    );
    let guild = GuildId::new();
    let (a, b, item) = (ActorId::new(), ActorId::new(), ItemId::new());
    for (actor, offset) in [(a, 0), (b, 1)] {
        engine
            .submit_action(make_action(guild, actor, "claim", offset).with_target(TargetRef::Item(item)))
            .await
            .unwrap();
    }
    engine.mark_ready(guild, a).await.unwrap();
    let report = engine.mark_ready(guild, b).await.unwrap().unwrap();

    assert_eq!(report.unresolved_conflicts.len(), 1);
    assert_eq!(engine.pending_conflicts(guild).await.len(), 1);
    assert_eq!(engine.turn_state(guild).await.unwrap().turn_id, 2);
}

#[tokio::test]
async fn leaving_the_roster_processes_a_waiting_turn() {
    let h = harness(GuildConfig::default(), Arc::new(RollSeed::Fixed(8)));
    let (player, npc) = (ActorId::new(), ActorId::new());
    h.engine.join_lockstep(h.guild, [(npc, ActorKind::Npc)]).await;
    h.engine.submit_action(make_action(h.guild, player, "search", 0)).await.unwrap();
    assert!(h.engine.mark_ready(h.guild, player).await.unwrap().is_none());

    let report = h.engine.leave_lockstep(h.guild, npc).await.unwrap().unwrap();
    assert_eq!(report.turn_id, 1);
    assert_eq!(report.outcomes_for(player)[0].narrative_key, narrative::EXECUTED);
    assert!(report.outcomes_for(npc).is_empty());
    let state = h.engine.turn_state(h.guild).await.unwrap();
    assert_eq!((state.turn_id, state.status), (2, TurnStatus::Collecting));
    assert!(state.required_set.is_empty());
}

#[tokio::test]
async fn priority_conflicts_never_roll() {
    let config = guild_config(vec![make_def(
        "room_entry",
        "move_into",
        ContestScope::SameTarget,
        ResolutionMode::Priority {
            rule: PriorityRule::Initiative {
                attribute: "initiative".to_owned(),
            },
        },
    )]);
    let rolls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&rolls);
    let dice: Arc<dyn RollerFactory> = Arc::new(move |_: GuildId, _: u64| -> Box<dyn DieRoller + Send> {
        Box::new(CountingRoller(Arc::clone(&counter)))
    });
    let h = harness(config, dice);
    let (a, b, room) = (ActorId::new(), ActorId::new(), LocationId::new());
    h.world.add_location(h.guild, room, Some(1));
    h.world.set_attribute(h.guild, a, "initiative", 3);
    h.world.set_attribute(h.guild, b, "initiative", 17);

    for (actor, offset) in [(a, 0), (b, 1)] {
        h.engine
            .submit_action(
                make_action(h.guild, actor, "move_into", offset).with_target(TargetRef::Location(room)),
            )
            .await
            .unwrap();
    }
    h.engine.mark_ready(h.guild, a).await.unwrap();
    let report = h.engine.mark_ready(h.guild, b).await.unwrap().unwrap();

    assert_eq!(rolls.load(Ordering::SeqCst), 0);
    assert_eq!(report.outcomes_for(b)[0].narrative_key, narrative::CONFLICT_WON);
    assert_eq!(report.outcomes_for(a)[0].narrative_key, narrative::CONFLICT_LOST);
    let archived = h.engine.board().archived(h.guild).await;
    assert_eq!(
        archived[0].resolution.as_ref().unwrap().method,
        ResolutionMethod::Priority
    );
}

#[tokio::test]
async fn fixed_seed_turns_repeat_exactly() {
    let guild = GuildId::new();
    let (a, b, room) = (ActorId::new(), ActorId::new(), LocationId::new());
    let actions = [
        make_action(guild, a, "move_into", 0).with_target(TargetRef::Location(room)),
        make_action(guild, b, "move_into", 1).with_target(TargetRef::Location(room)),
    ];

    let mut checks = Vec::new();
    for _ in 0..2 {
        let mut h = harness(room_entry(), Arc::new(RollSeed::Fixed(2024)));
        h.guild = guild;
        h.world.add_location(guild, room, Some(1));
        h.world.set_attribute(guild, a, "agility", 12);
        h.world.set_attribute(guild, b, "agility", 12);
        for action in &actions {
            h.engine.submit_action(action.clone()).await.unwrap();
        }
        h.engine.mark_ready(guild, a).await.unwrap();
        h.engine.mark_ready(guild, b).await.unwrap().unwrap();
        let archived = h.engine.board().archived(guild).await;
        let resolution = archived[0].resolution.clone().unwrap();
        checks.push((resolution.winners, resolution.checks));
    }
    assert_eq!(checks[0], checks[1]);
}

#[tokio::test]
async fn notifier_failures_do_not_abort_the_turn() {
    let h = harness(GuildConfig::default(), Arc::new(RollSeed::Entropy));
    h.notifier.set_failing(true);
    let a = ActorId::new();
    h.engine.submit_action(make_action(h.guild, a, "search", 0)).await.unwrap();
    let report = h.engine.mark_ready(h.guild, a).await.unwrap().unwrap();
    assert_eq!(report.outcome_count(), 1);
    assert!(h.notifier.reports().is_empty());
    assert_eq!(h.engine.turn_state(h.guild).await.unwrap().turn_id, 2);
}

#[tokio::test]
async fn lockstep_members_get_the_default_action() {
    let h = harness(GuildConfig::default(), Arc::new(RollSeed::Fixed(8)));
    let (player, npc) = (ActorId::new(), ActorId::new());
    h.engine.join_lockstep(h.guild, [(npc, ActorKind::Npc)]).await;
    h.engine.submit_action(make_action(h.guild, player, "search", 0)).await.unwrap();
    h.engine.mark_ready(h.guild, player).await.unwrap();
    let report = h.engine.mark_ready(h.guild, npc).await.unwrap().unwrap();

    let outcome = &report.outcomes_for(npc)[0];
    assert!(outcome.action.is_pass());
    assert_eq!(outcome.action.actor_kind, ActorKind::Npc);

    // Still on the roster next turn.
    let state = h.engine.turn_state(h.guild).await.unwrap();
    assert!(state.required_set.contains(&npc));
    assert!(h.engine.leave_lockstep(h.guild, npc).await.unwrap().is_none());
    assert!(h.engine.turn_state(h.guild).await.unwrap().required_set.is_empty());
}

#[tokio::test]
async fn actions_pulled_from_a_source() {
    let h = harness(GuildConfig::default(), Arc::new(RollSeed::Fixed(8)));
    let source = QueuedActionSource::new();
    let (a, b, stranger) = (ActorId::new(), ActorId::new(), ActorId::new());
    source.push(make_action(h.guild, a, "search", 0));
    source.push(make_action(GuildId::new(), b, "search", 0));

    let pulled = h
        .engine
        .pull_from_source(&source, h.guild, &[a, b, stranger])
        .await
        .unwrap();
    assert_eq!(pulled, 1);
    let report = h.engine.mark_ready(h.guild, a).await.unwrap().unwrap();
    assert!(matches!(
        report.outcomes_for(a)[0].result,
        ActionResolution::Executed { ref outcome }
            if outcome.effects_applied == vec![Effect::Custom { description: format!("{a} performed search") }]
    ));
}
