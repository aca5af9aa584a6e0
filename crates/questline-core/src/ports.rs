//! Collaborator interfaces the turn core consumes.
//!
//! Everything outside the core (parsing player intent, persisting world
//! state, loading rules, delivering messages) is reached through one of
//! these traits. Every capability the core needs is declared here; nothing
//! is discovered at call time.
//!
//! In-memory implementations live in [`crate::memory`].

use std::sync::Arc;

use questline_types::{Action, ActorId, ConflictInstance, Effect, GuildId, TurnReport};

use crate::config::{ConfigError, GuildConfig};
use crate::error::{NotifyError, StoreError};

/// Supplies the next intended action for an actor.
///
/// Implementations turn parsed player text or NPC planning into a typed
/// [`Action`]; the core never parses raw input.
pub trait ActionSource: Send + Sync {
    /// The actor's next intent, if it has one.
    fn next_action(&self, guild_id: GuildId, actor_id: ActorId) -> Option<Action>;
}

/// Read and mutate game state.
pub trait WorldStore: Send + Sync {
    /// A numeric attribute of an actor (`agility`, `initiative`, ...).
    fn attribute(
        &self,
        guild_id: GuildId,
        actor_id: ActorId,
        name: &str,
    ) -> Result<Option<i64>, StoreError>;

    /// Open a unit of work scoped to one guild.
    fn begin(&self, guild_id: GuildId) -> Result<Box<dyn WorldTransaction + '_>, StoreError>;
}

/// One scoped unit of work. Changes are invisible to other scopes until
/// [`commit`](WorldTransaction::commit).
pub trait WorldTransaction {
    /// Apply an action's effects inside the scope.
    fn apply(&mut self, action: &Action) -> Result<Vec<Effect>, StoreError>;

    /// Make the staged changes visible. On error nothing was applied.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard the staged changes.
    fn rollback(self: Box<Self>);
}

/// Supplies guild rules and tables.
pub trait ConfigurationProvider: Send + Sync {
    /// Configuration for one guild.
    fn guild_config(&self, guild_id: GuildId) -> Result<Arc<GuildConfig>, ConfigError>;
}

/// Delivers moderation requests and turn reports.
///
/// Failures are reported back but never abort a turn.
pub trait Notifier: Send + Sync {
    /// Ask a moderator to decide an escalated conflict.
    fn request_moderation(&self, conflict: &ConflictInstance) -> Result<(), NotifyError>;

    /// Deliver a processed turn's report to players and log sinks.
    fn deliver_report(&self, report: &TurnReport) -> Result<(), NotifyError>;
}
