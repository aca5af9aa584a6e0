//! In-memory collaborators.
//!
//! [`MemoryWorld`] is a small but real state store: actors have numeric
//! attributes and positions, locations have capacities, items have
//! holders. Every transaction stages its effects and only touches shared
//! state on commit. It understands a handful of verbs:
//!
//! | Action type | Target | Effect |
//! |---|---|---|
//! | `move_into` | location | [`Effect::Moved`], rejected when the location is full |
//! | `take` | item | [`Effect::ItemTransferred`], rejected when someone else holds it |
//! | `attack` | actor | [`Effect::AttributeChanged`] on `health` by `-damage` (default 1) |
//! | `pass` | none | nothing |
//! | anything else | any | [`Effect::Custom`] |
//!
//! Faults and outages can be injected for testing the executor's failure
//! handling. [`RecordingNotifier`] and [`QueuedActionSource`] complete the
//! set.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use questline_types::{
    Action, ActorId, ConflictInstance, Effect, GuildId, ItemId, LocationId, TargetRef, TurnReport,
};

use crate::error::{NotifyError, StoreError};
use crate::ports::{ActionSource, Notifier, WorldStore, WorldTransaction};

/// Attribute reduced by `attack`.
pub const HEALTH: &str = "health";

#[derive(Debug, Default)]
struct GuildWorld {
    attributes: BTreeMap<(ActorId, String), i64>,
    capacities: BTreeMap<LocationId, usize>,
    positions: BTreeMap<ActorId, LocationId>,
    /// `None` while the item lies unclaimed.
    items: BTreeMap<ItemId, Option<ActorId>>,
    faulty: BTreeSet<ActorId>,
}

impl GuildWorld {
    fn occupants(&self, location_id: LocationId) -> usize {
        self.positions.values().filter(|l| **l == location_id).count()
    }

    fn plan(&self, action: &Action) -> Result<Vec<Effect>, StoreError> {
        if self.faulty.contains(&action.actor_id) {
            return Err(StoreError::fault(format!(
                "corrupt record for actor {}",
                action.actor_id
            )));
        }
        match action.action_type.as_str() {
            "move_into" => {
                let Some(TargetRef::Location(location_id)) = action.target else {
                    return Err(StoreError::validation("move_into needs a location"));
                };
                if self.positions.get(&action.actor_id) == Some(&location_id) {
                    return Ok(Vec::new());
                }
                let full = self
                    .capacities
                    .get(&location_id)
                    .is_some_and(|cap| self.occupants(location_id) >= *cap);
                if full {
                    return Err(StoreError::validation("location is full"));
                }
                Ok(vec![Effect::Moved {
                    actor_id: action.actor_id,
                    location_id,
                }])
            }
            "take" => {
                let Some(TargetRef::Item(item_id)) = action.target else {
                    return Err(StoreError::validation("take needs an item"));
                };
                match self.items.get(&item_id) {
                    Some(None) => Ok(vec![Effect::ItemTransferred {
                        item_id,
                        to: action.actor_id,
                    }]),
                    Some(Some(holder)) if *holder == action.actor_id => Ok(Vec::new()),
                    _ => Err(StoreError::validation("target no longer present")),
                }
            }
            "attack" => {
                let Some(TargetRef::Actor(victim)) = action.target else {
                    return Err(StoreError::validation("attack needs an actor"));
                };
                let damage = action.parameter_i64("damage").unwrap_or(1);
                Ok(vec![Effect::AttributeChanged {
                    actor_id: victim,
                    attribute: HEALTH.to_owned(),
                    delta: damage.saturating_neg(),
                }])
            }
            "pass" => Ok(Vec::new()),
            other => Ok(vec![Effect::Custom {
                description: format!("{} performed {other}", action.actor_id),
            }]),
        }
    }

    fn apply(&mut self, effect: &Effect) {
        match effect {
            Effect::Moved {
                actor_id,
                location_id,
            } => {
                self.positions.insert(*actor_id, *location_id);
            }
            Effect::ItemTransferred { item_id, to } => {
                self.items.insert(*item_id, Some(*to));
            }
            Effect::AttributeChanged {
                actor_id,
                attribute,
                delta,
            } => {
                let value = self
                    .attributes
                    .entry((*actor_id, attribute.clone()))
                    .or_insert(0);
                *value = value.saturating_add(*delta);
            }
            Effect::Custom { .. } => {}
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    guilds: BTreeMap<GuildId, GuildWorld>,
    offline: bool,
    commits: u64,
    rollbacks: u64,
}

impl Ledger {
    fn online(&self) -> Result<(), StoreError> {
        if self.offline {
            Err(StoreError::unavailable("world store offline"))
        } else {
            Ok(())
        }
    }
}

/// A thread-safe world held in memory, partitioned by guild.
#[derive(Debug, Default)]
pub struct MemoryWorld {
    ledger: Mutex<Ledger>,
}

impl MemoryWorld {
    /// An empty world.
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_guild<T>(&self, guild_id: GuildId, f: impl FnOnce(&mut GuildWorld) -> T) -> T {
        f(self.ledger().guilds.entry(guild_id).or_default())
    }

    /// Set an actor's attribute.
    pub fn set_attribute(&self, guild_id: GuildId, actor_id: ActorId, name: &str, value: i64) {
        self.with_guild(guild_id, |g| {
            g.attributes.insert((actor_id, name.to_owned()), value);
        });
    }

    /// Create a location. `None` means unlimited room.
    pub fn add_location(&self, guild_id: GuildId, location_id: LocationId, capacity: Option<usize>) {
        self.with_guild(guild_id, |g| {
            g.capacities.remove(&location_id);
            if let Some(capacity) = capacity {
                g.capacities.insert(location_id, capacity);
            }
        });
    }

    /// Put an actor somewhere without an action.
    pub fn place_actor(&self, guild_id: GuildId, actor_id: ActorId, location_id: LocationId) {
        self.with_guild(guild_id, |g| {
            g.positions.insert(actor_id, location_id);
        });
    }

    /// Drop an unclaimed item into the world.
    pub fn place_item(&self, guild_id: GuildId, item_id: ItemId) {
        self.with_guild(guild_id, |g| {
            g.items.insert(item_id, None);
        });
    }

    /// Make every action of the actor fault inside its transaction.
    pub fn inject_fault(&self, guild_id: GuildId, actor_id: ActorId) {
        self.with_guild(guild_id, |g| {
            g.faulty.insert(actor_id);
        });
    }

    /// Take the whole store offline or bring it back.
    pub fn set_offline(&self, offline: bool) {
        self.ledger().offline = offline;
    }

    /// Where an actor is.
    pub fn location_of(&self, guild_id: GuildId, actor_id: ActorId) -> Option<LocationId> {
        self.with_guild(guild_id, |g| g.positions.get(&actor_id).copied())
    }

    /// Who holds an item. `None` if unclaimed or unknown.
    pub fn holder_of(&self, guild_id: GuildId, item_id: ItemId) -> Option<ActorId> {
        self.with_guild(guild_id, |g| g.items.get(&item_id).copied().flatten())
    }

    /// How many actors are at a location.
    pub fn occupants(&self, guild_id: GuildId, location_id: LocationId) -> usize {
        self.with_guild(guild_id, |g| g.occupants(location_id))
    }

    /// Committed transactions so far.
    pub fn commits(&self) -> u64 {
        self.ledger().commits
    }

    /// Rolled-back transactions so far.
    pub fn rollbacks(&self) -> u64 {
        self.ledger().rollbacks
    }
}

impl WorldStore for MemoryWorld {
    fn attribute(
        &self,
        guild_id: GuildId,
        actor_id: ActorId,
        name: &str,
    ) -> Result<Option<i64>, StoreError> {
        let ledger = self.ledger();
        ledger.online()?;
        Ok(ledger
            .guilds
            .get(&guild_id)
            .and_then(|g| g.attributes.get(&(actor_id, name.to_owned())))
            .copied())
    }

    fn begin(&self, guild_id: GuildId) -> Result<Box<dyn WorldTransaction + '_>, StoreError> {
        self.ledger().online()?;
        Ok(Box::new(MemoryTransaction {
            world: self,
            guild_id,
            staged: Vec::new(),
        }))
    }
}

struct MemoryTransaction<'a> {
    world: &'a MemoryWorld,
    guild_id: GuildId,
    staged: Vec<Effect>,
}

impl WorldTransaction for MemoryTransaction<'_> {
    fn apply(&mut self, action: &Action) -> Result<Vec<Effect>, StoreError> {
        if action.guild_id != self.guild_id {
            return Err(StoreError::fault("action outside the transaction's guild"));
        }
        let mut ledger = self.world.ledger();
        ledger.online()?;
        let effects = ledger.guilds.entry(self.guild_id).or_default().plan(action)?;
        self.staged.extend(effects.iter().cloned());
        Ok(effects)
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut ledger = self.world.ledger();
        ledger.online()?;
        let guild = ledger.guilds.entry(self.guild_id).or_default();
        for effect in &self.staged {
            guild.apply(effect);
        }
        ledger.commits = ledger.commits.saturating_add(1);
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        let mut ledger = self.world.ledger();
        ledger.rollbacks = ledger.rollbacks.saturating_add(1);
    }
}

/// Records everything it is asked to deliver.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    moderation: Mutex<Vec<ConflictInstance>>,
    reports: Mutex<Vec<TurnReport>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// A notifier that delivers everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Moderation requests delivered so far.
    pub fn moderation_requests(&self) -> Vec<ConflictInstance> {
        self.moderation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reports delivered so far.
    pub fn reports(&self) -> Vec<TurnReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(NotifyError {
                message: "channel closed".to_owned(),
            })
        } else {
            Ok(())
        }
    }
}

impl Notifier for RecordingNotifier {
    fn request_moderation(&self, conflict: &ConflictInstance) -> Result<(), NotifyError> {
        self.check()?;
        self.moderation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conflict.clone());
        Ok(())
    }

    fn deliver_report(&self, report: &TurnReport) -> Result<(), NotifyError> {
        self.check()?;
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }
}

/// Hands out queued actions, one per call, per actor.
#[derive(Debug, Default)]
pub struct QueuedActionSource {
    queues: Mutex<BTreeMap<(GuildId, ActorId), VecDeque<Action>>>,
}

impl QueuedActionSource {
    /// An empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an action for its actor.
    pub fn push(&self, action: Action) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((action.guild_id, action.actor_id))
            .or_default()
            .push_back(action);
    }
}

impl ActionSource for QueuedActionSource {
    fn next_action(&self, guild_id: GuildId, actor_id: ActorId) -> Option<Action> {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&(guild_id, actor_id))
            .and_then(VecDeque::pop_front)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use questline_types::ActorKind;
    use serde_json::json;

    use super::*;

    fn act(guild_id: GuildId, actor_id: ActorId, kind: &str, target: TargetRef) -> Action {
        Action::new(guild_id, actor_id, ActorKind::Character, kind).with_target(target)
    }

    fn run(world: &MemoryWorld, action: &Action) -> Result<Vec<Effect>, StoreError> {
        let mut tx = world.begin(action.guild_id)?;
        let effects = tx.apply(action)?;
        tx.commit()?;
        Ok(effects)
    }

    #[test]
    fn staged_effects_land_only_on_commit() {
        let world = MemoryWorld::new();
        let guild = GuildId::new();
        let (actor, room) = (ActorId::new(), LocationId::new());
        world.add_location(guild, room, Some(1));

        let mut tx = world.begin(guild).unwrap();
        tx.apply(&act(guild, actor, "move_into", TargetRef::Location(room)))
            .unwrap();
        assert_eq!(world.location_of(guild, actor), None);
        tx.rollback();
        assert_eq!(world.location_of(guild, actor), None);
        assert_eq!(world.rollbacks(), 1);

        run(&world, &act(guild, actor, "move_into", TargetRef::Location(room))).unwrap();
        assert_eq!(world.location_of(guild, actor), Some(room));
        assert_eq!(world.commits(), 1);
    }

    #[test]
    fn full_locations_reject_entry() {
        let world = MemoryWorld::new();
        let guild = GuildId::new();
        let room = LocationId::new();
        world.add_location(guild, room, Some(1));
        world.place_actor(guild, ActorId::new(), room);

        let second = run(&world, &act(guild, ActorId::new(), "move_into", TargetRef::Location(room)));
        assert_eq!(second, Err(StoreError::validation("location is full")));
        assert_eq!(world.occupants(guild, room), 1);
    }

    #[test]
    fn taken_items_are_gone_for_others() {
        let world = MemoryWorld::new();
        let guild = GuildId::new();
        let (a, b, sword) = (ActorId::new(), ActorId::new(), ItemId::new());
        world.place_item(guild, sword);

        run(&world, &act(guild, a, "take", TargetRef::Item(sword))).unwrap();
        assert_eq!(world.holder_of(guild, sword), Some(a));
        assert_eq!(
            run(&world, &act(guild, b, "take", TargetRef::Item(sword))),
            Err(StoreError::validation("target no longer present"))
        );
    }

    #[test]
    fn attacks_reduce_health() {
        let world = MemoryWorld::new();
        let guild = GuildId::new();
        let (a, b) = (ActorId::new(), ActorId::new());
        world.set_attribute(guild, b, HEALTH, 10);
        let attack = act(guild, a, "attack", TargetRef::Actor(b)).with_parameter("damage", json!(4));
        run(&world, &attack).unwrap();
        assert_eq!(world.attribute(guild, b, HEALTH).unwrap(), Some(6));
    }

    #[test]
    fn guilds_do_not_share_state() {
        let world = MemoryWorld::new();
        let (g1, g2) = (GuildId::new(), GuildId::new());
        let actor = ActorId::new();
        world.set_attribute(g1, actor, "agility", 14);
        assert_eq!(world.attribute(g1, actor, "agility").unwrap(), Some(14));
        assert_eq!(world.attribute(g2, actor, "agility").unwrap(), None);
    }

    #[test]
    fn injected_failures_surface_as_store_errors() {
        let world = MemoryWorld::new();
        let guild = GuildId::new();
        let actor = ActorId::new();
        world.inject_fault(guild, actor);
        let pass = Action::new(guild, actor, ActorKind::Character, "pass");
        assert!(matches!(run(&world, &pass), Err(StoreError::Fault { .. })));

        world.set_offline(true);
        assert!(matches!(world.begin(guild), Err(StoreError::Unavailable { .. })));
        assert!(world.attribute(guild, actor, "agility").is_err());
    }

    #[test]
    fn queued_source_hands_out_in_order() {
        let source = QueuedActionSource::new();
        let guild = GuildId::new();
        let actor = ActorId::new();
        let first = Action::new(guild, actor, ActorKind::Npc, "search");
        let second = Action::new(guild, actor, ActorKind::Npc, "hide");
        source.push(first.clone());
        source.push(second.clone());
        assert_eq!(source.next_action(guild, actor), Some(first));
        assert_eq!(source.next_action(guild, actor), Some(second));
        assert_eq!(source.next_action(guild, actor), None);
    }

    #[test]
    fn failing_notifier_records_nothing() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);
        let report = TurnReport {
            turn_id: 1,
            guild_id: GuildId::new(),
            per_actor_outcomes: BTreeMap::new(),
            unresolved_conflicts: Vec::new(),
            warnings: Vec::new(),
            processed_at: chrono::Utc::now(),
        };
        assert!(notifier.deliver_report(&report).is_err());
        assert!(notifier.reports().is_empty());
        notifier.set_failing(false);
        notifier.deliver_report(&report).unwrap();
        assert_eq!(notifier.reports().len(), 1);
    }
}
