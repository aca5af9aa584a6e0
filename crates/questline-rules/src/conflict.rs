//! Conflict detection and resolution for simultaneous actions.
//!
//! Given every action proposed in a turn, [`detect_and_resolve`] groups the
//! actions that contest the same resource according to the guild's
//! [`ConflictCatalog`], then decides each group:
//!
//! 1. **Auto check**: each contestant rolls a check built from the entry's
//!    [`CheckTemplate`]. Without a difficulty the contestants meet in
//!    opposed bouts (the current leader initiates against the next
//!    contestant in submission order). With a difficulty every contestant
//!    rolls against it and the best successes win.
//! 2. **Priority**: a [`PriorityRule`] orders the contestants. No dice.
//! 3. **Manual**: the group is left `awaiting_manual` for a moderator.
//!
//! A group only becomes a conflict when it holds more contestants than its
//! capacity; at most `capacity` contestants win. Every input action ends up
//! in exactly one place: cleared (including conflict winners), lost, or
//! awaiting a moderator.

use std::cmp::Reverse;
use std::collections::BTreeSet;

use chrono::Utc;
use questline_types::{
    Action, ActionId, CheckResult, ConflictId, ConflictInstance, ConflictResolution,
    ConflictStatus, GuildId, ResolutionMethod,
};
use tracing::{debug, info, warn};

use crate::catalog::{
    CheckTemplate, ConflictCatalog, ConflictDefinition, DifficultyTable, ModifierTable,
    ResolutionMode,
};
use crate::check::{self, CheckRequest, CheckTarget, TieBreakPolicy, ability_modifier};
use crate::dice::DieRoller;
use crate::error::RulesError;
use crate::priority::{NoStats, ParticipantStats, sort_by_submission};

static NO_DIFFICULTIES: DifficultyTable = DifficultyTable::new();
static NO_MODIFIERS: ModifierTable = ModifierTable::new();

/// Everything the resolver reads besides the actions themselves.
pub struct ResolutionContext<'a> {
    /// Guild being processed.
    pub guild_id: GuildId,
    /// Turn being processed.
    pub turn_id: u64,
    /// The guild's catalog.
    pub catalog: &'a ConflictCatalog,
    /// Named difficulty classes.
    pub difficulties: &'a DifficultyTable,
    /// Extra modifiers per action type.
    pub modifiers: &'a ModifierTable,
    /// Actor attributes.
    pub stats: &'a dyn ParticipantStats,
}

impl<'a> ResolutionContext<'a> {
    /// A context with empty tables and no attribute data.
    pub fn new(guild_id: GuildId, turn_id: u64, catalog: &'a ConflictCatalog) -> Self {
        Self {
            guild_id,
            turn_id,
            catalog,
            difficulties: &NO_DIFFICULTIES,
            modifiers: &NO_MODIFIERS,
            stats: &NoStats,
        }
    }

    /// Use the given difficulty and modifier tables.
    #[must_use]
    pub const fn with_tables(
        mut self,
        difficulties: &'a DifficultyTable,
        modifiers: &'a ModifierTable,
    ) -> Self {
        self.difficulties = difficulties;
        self.modifiers = modifiers;
        self
    }

    /// Read attributes from `stats`.
    #[must_use]
    pub const fn with_stats(mut self, stats: &'a dyn ParticipantStats) -> Self {
        self.stats = stats;
        self
    }
}

/// Where one action ended up after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Not implicated in any conflict.
    Cleared,
    /// Won the conflict and proceeds to execution.
    Won(ConflictId),
    /// Lost the conflict and will not execute.
    Lost(ConflictId),
    /// Held until a moderator decides.
    AwaitingManual(ConflictId),
}

/// Output of [`detect_and_resolve`].
#[derive(Debug, Clone, Default)]
pub struct ResolutionBatch {
    /// Actions allowed to execute, in submission order. Includes conflict
    /// winners.
    pub cleared: Vec<Action>,
    /// Every conflict detected, decided or not.
    pub conflicts: Vec<ConflictInstance>,
}

impl ResolutionBatch {
    /// Where an action ended up, or `None` if it was not in the batch.
    pub fn disposition(&self, action_id: ActionId) -> Option<Disposition> {
        for conflict in &self.conflicts {
            if conflict.participants.iter().any(|a| a.id == action_id) {
                return Some(if conflict.status == ConflictStatus::AwaitingManual {
                    Disposition::AwaitingManual(conflict.id)
                } else if conflict.is_winner(action_id) {
                    Disposition::Won(conflict.id)
                } else {
                    Disposition::Lost(conflict.id)
                });
            }
        }
        self.cleared
            .iter()
            .any(|a| a.id == action_id)
            .then_some(Disposition::Cleared)
    }

    /// Conflicts left for a moderator.
    pub fn awaiting_manual(&self) -> impl Iterator<Item = &ConflictInstance> {
        self.conflicts
            .iter()
            .filter(|c| c.status == ConflictStatus::AwaitingManual)
    }
}

/// Detect conflicts among `actions` and decide the ones that can be decided
/// automatically.
pub fn detect_and_resolve(
    actions: &[Action],
    ctx: &ResolutionContext<'_>,
    roller: &mut dyn DieRoller,
) -> ResolutionBatch {
    let mut ordered: Vec<&Action> = actions.iter().collect();
    sort_by_submission(&mut ordered);

    let mut grouped: BTreeSet<ActionId> = BTreeSet::new();
    let mut conflicts = Vec::new();

    for def in ctx.catalog.definitions() {
        let candidates: Vec<&Action> = ordered
            .iter()
            .copied()
            .filter(|a| !grouped.contains(&a.id))
            .filter(|a| def.action_types.0 == a.action_type || def.action_types.1 == a.action_type)
            .collect();

        for group in contest_groups(def, &candidates) {
            grouped.extend(group.iter().map(|a| a.id));
            let capacity = group_capacity(def, &group);
            if group.len() <= capacity {
                debug!(
                    guild_id = %ctx.guild_id,
                    definition = %def.name,
                    contestants = group.len(),
                    capacity,
                    "Contest within capacity, no conflict"
                );
                continue;
            }
            conflicts.push(resolve_group(def, &group, capacity, ctx, roller));
        }
    }

    let cleared = ordered
        .into_iter()
        .filter(|a| {
            conflicts
                .iter()
                .find(|c| c.participants.iter().any(|p| p.id == a.id))
                .is_none_or(|c| c.status != ConflictStatus::AwaitingManual && c.is_winner(a.id))
        })
        .cloned()
        .collect();

    ResolutionBatch { cleared, conflicts }
}

/// Connected groups of candidates that contest each other under `def`,
/// each in submission order. Singletons are omitted.
fn contest_groups<'a>(def: &ConflictDefinition, candidates: &[&'a Action]) -> Vec<Vec<&'a Action>> {
    let mut seen: BTreeSet<usize> = BTreeSet::new();
    let mut groups = Vec::new();

    for start in 0..candidates.len() {
        if !seen.insert(start) {
            continue;
        }
        let mut members = vec![start];
        let mut cursor = 0;
        while let Some(&current) = members.get(cursor) {
            cursor = cursor.saturating_add(1);
            let Some(current) = candidates.get(current) else {
                continue;
            };
            for (idx, other) in candidates.iter().enumerate() {
                if !seen.contains(&idx) && def.applies_to(current, other) {
                    seen.insert(idx);
                    members.push(idx);
                }
            }
        }
        if members.len() > 1 {
            members.sort_unstable();
            groups.push(
                members
                    .into_iter()
                    .filter_map(|idx| candidates.get(idx).copied())
                    .collect(),
            );
        }
    }
    groups
}

/// The smallest `capacity` parameter among the contestants, else the
/// definition's. Never below 1.
fn group_capacity(def: &ConflictDefinition, group: &[&Action]) -> usize {
    let declared = group
        .iter()
        .filter_map(|a| a.parameter_i64("capacity"))
        .min()
        .map_or(u64::from(def.capacity), |c| u64::try_from(c).unwrap_or(0));
    usize::try_from(declared).unwrap_or(usize::MAX).max(1)
}

fn resolve_group(
    def: &ConflictDefinition,
    group: &[&Action],
    capacity: usize,
    ctx: &ResolutionContext<'_>,
    roller: &mut dyn DieRoller,
) -> ConflictInstance {
    let mut instance = ConflictInstance {
        id: ConflictId::new(),
        guild_id: ctx.guild_id,
        turn_id: ctx.turn_id,
        definition: def.name.clone(),
        participants: group.iter().map(|a| (*a).clone()).collect(),
        status: ConflictStatus::Pending,
        resolution: None,
        detected_at: Utc::now(),
    };
    info!(
        guild_id = %ctx.guild_id,
        turn_id = ctx.turn_id,
        conflict_id = %instance.id,
        definition = %def.name,
        contestants = group.len(),
        capacity,
        "Conflict detected"
    );

    let decided = match &def.resolution {
        ResolutionMode::Manual => None,
        ResolutionMode::Priority { rule } => {
            let mut ranked = group.to_vec();
            rule.sort(&mut ranked, ctx.stats);
            let winners = ranked.iter().take(capacity).map(|a| a.id).collect();
            Some((ResolutionMethod::Priority, winners, Vec::new(), rule.to_string()))
        }
        ResolutionMode::AutoCheck { check } => {
            match auto_check(check, group, capacity, ctx, roller) {
                Ok((winners, checks)) => Some((
                    ResolutionMethod::AutoCheck,
                    winners,
                    checks,
                    format!("{} check", check.attribute),
                )),
                Err(err) => {
                    warn!(
                        guild_id = %ctx.guild_id,
                        conflict_id = %instance.id,
                        error = %err,
                        "Auto check unavailable, escalating to moderator"
                    );
                    None
                }
            }
        }
    };

    match decided {
        Some((method, winners, checks, note)) => {
            debug!(
                conflict_id = %instance.id,
                ?method,
                winners = ?winners,
                "Conflict resolved"
            );
            instance.status = ConflictStatus::AutoResolved;
            instance.resolution = Some(ConflictResolution {
                method,
                winners,
                checks,
                note: Some(note),
                resolved_at: Utc::now(),
            });
        }
        None => {
            info!(
                guild_id = %ctx.guild_id,
                conflict_id = %instance.id,
                "Conflict awaiting moderator"
            );
            instance.status = ConflictStatus::AwaitingManual;
        }
    }
    instance
}

/// One contestant's check before a target is attached.
fn side_request(template: &CheckTemplate, action: &Action, ctx: &ResolutionContext<'_>) -> CheckRequest {
    let base = match ctx.stats.attribute(action.actor_id, &template.attribute) {
        Some(score) if template.ability_modifier => ability_modifier(score),
        Some(score) => score,
        None => 0,
    };
    let table = ctx
        .modifiers
        .get(action.action_type.as_str())
        .into_iter()
        .flatten()
        .cloned();
    CheckRequest::side(base)
        .with_modifiers(template.modifiers.iter().cloned())
        .with_modifiers(table)
        .with_die(template.die)
        .with_tie_break(template.tie_break)
        .with_priority(action.parameter_i64("priority").unwrap_or(0))
}

type Decision = (Vec<ActionId>, Vec<CheckResult>);

fn auto_check(
    template: &CheckTemplate,
    group: &[&Action],
    capacity: usize,
    ctx: &ResolutionContext<'_>,
    roller: &mut dyn DieRoller,
) -> Result<Decision, RulesError> {
    let sides: Vec<(&Action, CheckRequest)> = group
        .iter()
        .map(|a| (*a, side_request(template, a, ctx)))
        .collect();
    match &template.difficulty {
        Some(spec) => {
            let dc = spec.resolve(ctx.difficulties)?;
            Ok(difficulty_contest(sides, dc, capacity, template.tie_break, roller))
        }
        None => Ok(knockout(sides, capacity, roller)),
    }
}

/// Opposed bouts. Each round the leader initiates against every remaining
/// contestant in turn; the round's survivor wins a slot.
fn knockout(
    mut remaining: Vec<(&Action, CheckRequest)>,
    capacity: usize,
    roller: &mut dyn DieRoller,
) -> Decision {
    let mut winners = Vec::new();
    let mut checks = Vec::new();

    while winners.len() < capacity && !remaining.is_empty() {
        let mut leader = 0;
        for challenger in 1..remaining.len() {
            let (Some((_, attacker)), Some((_, defender))) =
                (remaining.get(leader), remaining.get(challenger))
            else {
                continue;
            };
            let bout = attacker
                .clone()
                .with_target(CheckTarget::Opposed(Box::new(defender.clone())));
            let result = check::resolve(&bout, roller);
            if !result.success {
                leader = challenger;
            }
            checks.push(result);
        }
        let (action, _) = remaining.remove(leader);
        winners.push(action.id);
    }
    (winners, checks)
}

/// Everyone rolls against `dc`; the best successes win.
///
/// Equal totals are ranked by the tie-break policy and then in favour of the
/// later submission, which plays the defender.
fn difficulty_contest(
    sides: Vec<(&Action, CheckRequest)>,
    dc: i64,
    capacity: usize,
    tie_break: TieBreakPolicy,
    roller: &mut dyn DieRoller,
) -> Decision {
    let mut checks = Vec::with_capacity(sides.len());
    let mut successes = Vec::new();

    for (position, (action, request)) in sides.into_iter().enumerate() {
        let priority = request.priority();
        let result = check::resolve(&request.with_target(CheckTarget::Difficulty(dc)), roller);
        if result.success {
            let tie = match tie_break {
                TieBreakPolicy::DefenderWins => 0,
                TieBreakPolicy::HigherNaturalRoll => result.natural_roll,
                TieBreakPolicy::Priority => priority,
            };
            successes.push((result.roll_total, tie, position, action.id));
        }
        checks.push(result);
    }

    successes.sort_by_key(|&(total, tie, position, _)| Reverse((total, tie, position)));
    let winners = successes
        .into_iter()
        .take(capacity)
        .map(|(_, _, _, id)| id)
        .collect();
    (winners, checks)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use chrono::{DateTime, Duration};
    use questline_types::{ActorId, ActorKind, ItemId, LocationId, TargetRef};
    use serde_json::json;

    use super::*;
    use crate::catalog::{ContestScope, DifficultySpec};
    use crate::dice::{RngRoller, ScriptedRoller};
    use crate::priority::PriorityRule;

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn make_action(guild: GuildId, action_type: &str, target: TargetRef, offset_ms: i64) -> Action {
        Action::new(guild, ActorId::new(), ActorKind::Character, action_type)
            .with_target(target)
            .submitted(base_time() + Duration::milliseconds(offset_ms))
    }

    fn make_def(name: &str, a: &str, b: &str, resolution: ResolutionMode) -> ConflictDefinition {
        ConflictDefinition {
            name: name.to_owned(),
            action_types: (a.into(), b.into()),
            contest: ContestScope::SameTarget,
            capacity: 1,
            resolution,
        }
    }

    fn room_entry() -> ConflictDefinition {
        make_def(
            "room_entry",
            "move_into",
            "move_into",
            ResolutionMode::AutoCheck {
                check: CheckTemplate::opposed("agility"),
            },
        )
    }

    #[test]
    fn agility_tie_goes_to_the_defender() {
        let guild = GuildId::new();
        let room = TargetRef::Location(LocationId::new());
        let a = make_action(guild, "move_into", room.clone(), 0).with_parameter("capacity", json!(1));
        let b = make_action(guild, "move_into", room, 5).with_parameter("capacity", json!(1));
        let (a_id, b_id) = (a.actor_id, b.actor_id);
        let stats = move |actor: ActorId, name: &str| match name {
            "agility" if actor == a_id => Some(14),
            "agility" if actor == b_id => Some(9),
            _ => None,
        };
        let catalog = ConflictCatalog::new(vec![room_entry()]);
        let ctx = ResolutionContext::new(guild, 1, &catalog).with_stats(&stats);
        let mut roller = ScriptedRoller::new([12, 15]);

        let batch = detect_and_resolve(&[a.clone(), b.clone()], &ctx, &mut roller);

        assert_eq!(batch.conflicts.len(), 1);
        let conflict = &batch.conflicts[0];
        assert_eq!(conflict.status, ConflictStatus::AutoResolved);
        let resolution = conflict.resolution.as_ref().unwrap();
        assert_eq!(resolution.winners, vec![b.id]);
        let bout = &resolution.checks[0];
        assert_eq!(bout.natural_roll, 12);
        assert_eq!(bout.roll_total, 14);
        assert_eq!(bout.opposing.as_ref().unwrap().roll_total, 14);
        assert_eq!(batch.disposition(a.id), Some(Disposition::Lost(conflict.id)));
        assert_eq!(batch.disposition(b.id), Some(Disposition::Won(conflict.id)));
        assert_eq!(batch.cleared.iter().map(|x| x.id).collect::<Vec<_>>(), vec![b.id]);
    }

    #[test]
    fn priority_conflicts_never_roll() {
        let guild = GuildId::new();
        let chest = TargetRef::Item(ItemId::new());
        let catalog = ConflictCatalog::new(vec![make_def(
            "loot",
            "take",
            "take",
            ResolutionMode::Priority {
                rule: PriorityRule::EarliestSubmission,
            },
        )]);
        let actions: Vec<_> = (0..4)
            .map(|i| make_action(guild, "take", chest.clone(), 40 - i * 10))
            .collect();
        let ctx = ResolutionContext::new(guild, 3, &catalog);
        let mut roller = ScriptedRoller::default();

        let batch = detect_and_resolve(&actions, &ctx, &mut roller);

        assert_eq!(roller.rolls_made(), 0);
        let resolution = batch.conflicts[0].resolution.as_ref().unwrap();
        assert_eq!(resolution.method, ResolutionMethod::Priority);
        assert_eq!(resolution.winners, vec![actions[3].id]);
        assert!(resolution.checks.is_empty());
    }

    #[test]
    fn manual_conflicts_hold_every_participant() {
        let guild = GuildId::new();
        let (x, y) = (ActorId::new(), ActorId::new());
        let mut duel = make_def("duel", "attack", "attack", ResolutionMode::Manual);
        duel.contest = ContestScope::MutualTarget;
        let catalog = ConflictCatalog::new(vec![duel]);
        let a = Action::new(guild, x, ActorKind::Character, "attack").with_target(TargetRef::Actor(y));
        let b = Action::new(guild, y, ActorKind::Npc, "attack").with_target(TargetRef::Actor(x));
        let bystander = make_action(guild, "rest", TargetRef::Named("camp".to_owned()), 0);
        let ctx = ResolutionContext::new(guild, 1, &catalog);

        let batch = detect_and_resolve(
            &[a.clone(), b.clone(), bystander.clone()],
            &ctx,
            &mut ScriptedRoller::default(),
        );

        let conflict = batch.awaiting_manual().next().unwrap();
        assert!(conflict.resolution.is_none());
        assert_eq!(batch.disposition(a.id), Some(Disposition::AwaitingManual(conflict.id)));
        assert_eq!(batch.disposition(b.id), Some(Disposition::AwaitingManual(conflict.id)));
        assert_eq!(batch.disposition(bystander.id), Some(Disposition::Cleared));
        assert_eq!(batch.cleared.len(), 1);
    }

    #[test]
    fn groups_within_capacity_are_not_conflicts() {
        let guild = GuildId::new();
        let hall = TargetRef::Location(LocationId::new());
        let actions: Vec<_> = (0..3)
            .map(|i| {
                make_action(guild, "move_into", hall.clone(), i).with_parameter("capacity", json!(3))
            })
            .collect();
        let catalog = ConflictCatalog::new(vec![room_entry()]);
        let ctx = ResolutionContext::new(guild, 1, &catalog);
        let batch = detect_and_resolve(&actions, &ctx, &mut ScriptedRoller::default());
        assert!(batch.conflicts.is_empty());
        assert_eq!(batch.cleared.len(), 3);
    }

    #[test]
    fn knockout_fills_capacity() {
        let guild = GuildId::new();
        let hall = TargetRef::Location(LocationId::new());
        let actions: Vec<_> = (0..3)
            .map(|i| {
                make_action(guild, "move_into", hall.clone(), i).with_parameter("capacity", json!(2))
            })
            .collect();
        let catalog = ConflictCatalog::new(vec![room_entry()]);
        let ctx = ResolutionContext::new(guild, 1, &catalog);
        // Round one: 0 vs 1 (1 wins), 1 vs 2 (1 holds). Round two: 0 vs 2 (0 wins).
        let mut roller = ScriptedRoller::new([5, 15, 18, 3, 19, 2]);

        let batch = detect_and_resolve(&actions, &ctx, &mut roller);

        let resolution = batch.conflicts[0].resolution.as_ref().unwrap();
        assert_eq!(resolution.winners, vec![actions[1].id, actions[0].id]);
        assert_eq!(resolution.checks.len(), 3);
        assert_eq!(batch.disposition(actions[2].id), Some(Disposition::Lost(batch.conflicts[0].id)));
    }

    #[test]
    fn difficulty_contest_ranks_successes() {
        let guild = GuildId::new();
        let ledge = TargetRef::Named("ledge".to_owned());
        let mut template = CheckTemplate::opposed("strength");
        template.difficulty = Some(DifficultySpec::Named("hard".to_owned()));
        let catalog = ConflictCatalog::new(vec![make_def(
            "ledge",
            "climb",
            "climb",
            ResolutionMode::AutoCheck { check: template },
        )]);
        let difficulties: DifficultyTable = [("hard".to_owned(), 15)].into_iter().collect();
        let modifiers = ModifierTable::new();
        let actions: Vec<_> = (0..3)
            .map(|i| make_action(guild, "climb", ledge.clone(), i))
            .collect();
        let ctx = ResolutionContext::new(guild, 1, &catalog).with_tables(&difficulties, &modifiers);
        let mut roller = ScriptedRoller::new([16, 18, 4]);

        let batch = detect_and_resolve(&actions, &ctx, &mut roller);

        let resolution = batch.conflicts[0].resolution.as_ref().unwrap();
        assert_eq!(resolution.winners, vec![actions[1].id]);
        assert_eq!(resolution.checks.len(), 3);
    }

    #[test]
    fn nobody_succeeding_means_everyone_fails() {
        let guild = GuildId::new();
        let ledge = TargetRef::Named("ledge".to_owned());
        let mut template = CheckTemplate::opposed("strength");
        template.difficulty = Some(DifficultySpec::Value(25));
        let catalog = ConflictCatalog::new(vec![make_def(
            "ledge",
            "climb",
            "climb",
            ResolutionMode::AutoCheck { check: template },
        )]);
        let actions: Vec<_> = (0..2)
            .map(|i| make_action(guild, "climb", ledge.clone(), i))
            .collect();
        let ctx = ResolutionContext::new(guild, 1, &catalog);
        let batch = detect_and_resolve(&actions, &ctx, &mut ScriptedRoller::new([10, 11]));
        assert!(batch.conflicts[0].resolution.as_ref().unwrap().winners.is_empty());
        assert!(batch.cleared.is_empty());
    }

    #[test]
    fn unknown_difficulty_escalates() {
        let guild = GuildId::new();
        let door = TargetRef::Named("door".to_owned());
        let mut template = CheckTemplate::opposed("strength");
        template.difficulty = Some(DifficultySpec::Named("legendary".to_owned()));
        let catalog = ConflictCatalog::new(vec![make_def(
            "door",
            "force",
            "force",
            ResolutionMode::AutoCheck { check: template },
        )]);
        let actions: Vec<_> = (0..2)
            .map(|i| make_action(guild, "force", door.clone(), i))
            .collect();
        let ctx = ResolutionContext::new(guild, 1, &catalog);
        let batch = detect_and_resolve(&actions, &ctx, &mut ScriptedRoller::default());
        assert_eq!(batch.conflicts[0].status, ConflictStatus::AwaitingManual);
    }

    #[test]
    fn first_catalog_entry_claims_the_action() {
        let guild = GuildId::new();
        let gem = TargetRef::Item(ItemId::new());
        let catalog = ConflictCatalog::new(vec![
            make_def("grab", "take", "take", ResolutionMode::Manual),
            make_def(
                "theft",
                "take",
                "steal",
                ResolutionMode::Priority {
                    rule: PriorityRule::EarliestSubmission,
                },
            ),
        ]);
        let t1 = make_action(guild, "take", gem.clone(), 0);
        let t2 = make_action(guild, "take", gem.clone(), 1);
        let s = make_action(guild, "steal", gem, 2);
        let ctx = ResolutionContext::new(guild, 1, &catalog);
        let batch = detect_and_resolve(&[t1, t2, s.clone()], &ctx, &mut ScriptedRoller::default());
        // Both takes grouped by "grab"; the steal has nobody left to contest.
        assert_eq!(batch.conflicts.len(), 1);
        assert_eq!(batch.conflicts[0].definition, "grab");
        assert_eq!(batch.disposition(s.id), Some(Disposition::Cleared));
    }

    #[test]
    fn every_action_lands_in_exactly_one_place() {
        let guild = GuildId::new();
        let rooms: Vec<_> = (0..3).map(|_| TargetRef::Location(LocationId::new())).collect();
        let items: Vec<_> = (0..2).map(|_| TargetRef::Item(ItemId::new())).collect();
        let catalog = ConflictCatalog::new(vec![
            room_entry(),
            make_def("grab", "take", "take", ResolutionMode::Manual),
            make_def(
                "theft",
                "take",
                "steal",
                ResolutionMode::Priority {
                    rule: PriorityRule::EarliestSubmission,
                },
            ),
        ]);
        let mut roller = RngRoller::seeded(17);

        for round in 0..20_i64 {
            let actions: Vec<_> = (0..12_i64)
                .map(|i| {
                    let pick = usize::try_from((i * 7 + round * 3) % 5).unwrap();
                    match pick {
                        0 | 1 => make_action(guild, "move_into", rooms[(pick + usize::try_from(i).unwrap()) % 3].clone(), i),
                        2 => make_action(guild, "take", items[usize::try_from(i).unwrap() % 2].clone(), i),
                        3 => make_action(guild, "steal", items[usize::try_from(round).unwrap() % 2].clone(), i),
                        _ => make_action(guild, "rest", TargetRef::Named("camp".to_owned()), i),
                    }
                })
                .collect();
            let ctx = ResolutionContext::new(guild, 1, &catalog);
            let batch = detect_and_resolve(&actions, &ctx, &mut roller);

            let mut seen = BTreeSet::new();
            for conflict in &batch.conflicts {
                for p in &conflict.participants {
                    assert!(seen.insert(p.id), "action in two conflicts");
                }
            }
            for action in &actions {
                let disposition = batch.disposition(action.id);
                assert!(disposition.is_some(), "action dropped");
                let in_cleared = batch.cleared.iter().filter(|a| a.id == action.id).count();
                match disposition.unwrap() {
                    Disposition::Cleared | Disposition::Won(_) => assert_eq!(in_cleared, 1),
                    Disposition::Lost(_) | Disposition::AwaitingManual(_) => {
                        assert_eq!(in_cleared, 0);
                    }
                }
            }
        }
    }
}
