//! Error types for the questline-core crate.
//!
//! Collaborator failures ([`StoreError`], [`NotifyError`]) are ordinary
//! values: the executor classifies them into an action outcome and the
//! processor logs notifier failures. Only [`TurnError`] ever aborts a turn.

use questline_types::{ActionId, ActorId, ConflictId, GuildId, TurnStatus};

use crate::config::ConfigError;

/// Failures reported by the state-mutation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The action is not legal against current state (stale target, full
    /// room). An expected gameplay outcome.
    #[error("action rejected: {message}")]
    Validation {
        /// Player-facing reason.
        message: String,
    },

    /// A downstream dependency could not be reached.
    #[error("state store unavailable: {message}")]
    Unavailable {
        /// What was unavailable.
        message: String,
    },

    /// Anything unexpected inside the transaction.
    #[error("state store fault: {message}")]
    Fault {
        /// Fault detail.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for [`StoreError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for [`StoreError::Unavailable`].
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Shorthand for [`StoreError::Fault`].
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            message: message.into(),
        }
    }
}

/// A notifier could not deliver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification failed: {message}")]
pub struct NotifyError {
    /// Delivery failure detail.
    pub message: String,
}

/// Errors from the turn readiness tracker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadinessError {
    /// No turn has been opened for the guild.
    #[error("guild {guild_id} has no open turn")]
    UnknownGuild {
        /// The guild.
        guild_id: GuildId,
    },

    /// The guild's turn is not accepting submissions or readiness.
    #[error("turn {turn_id} of guild {guild_id} is {status:?}, not collecting")]
    TurnNotCollecting {
        /// The guild.
        guild_id: GuildId,
        /// The current turn.
        turn_id: u64,
        /// Its status.
        status: TurnStatus,
    },

    /// The actor has nothing to confirm this turn.
    #[error("actor {actor_id} is not required to act in guild {guild_id}")]
    NotParticipating {
        /// The guild.
        guild_id: GuildId,
        /// The actor.
        actor_id: ActorId,
    },

    /// A completion or abort named a turn that is not processing.
    #[error("turn {turn_id} of guild {guild_id} is not processing")]
    StaleTurn {
        /// The guild.
        guild_id: GuildId,
        /// The turn named by the caller.
        turn_id: u64,
    },
}

/// Errors from the moderator resolution endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModerationError {
    /// No conflict with that id was ever escalated.
    #[error("conflict {conflict_id} not found")]
    UnknownConflict {
        /// The conflict.
        conflict_id: ConflictId,
    },

    /// The conflict was already decided.
    #[error("conflict {conflict_id} is already resolved")]
    AlreadyResolved {
        /// The conflict.
        conflict_id: ConflictId,
    },

    /// A named winner is not one of the conflict's actions.
    #[error("action {action_id} is not a participant of conflict {conflict_id}")]
    NotAParticipant {
        /// The conflict.
        conflict_id: ConflictId,
        /// The offending action.
        action_id: ActionId,
    },
}

/// Errors that abort a whole turn or reject an engine call.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    /// The guild's configuration could not be loaded. The turn is left
    /// collecting with every action still pending.
    #[error("configuration missing for guild {guild_id}: {source}")]
    ConfigurationMissing {
        /// The guild.
        guild_id: GuildId,
        /// Why loading failed.
        source: ConfigError,
    },

    /// A collaborator panicked while the turn was being prepared. The turn
    /// is left collecting with every action still pending.
    #[error("turn {turn_id} of guild {guild_id} panicked: {message}")]
    Panicked {
        /// The guild.
        guild_id: GuildId,
        /// The turn that was being processed.
        turn_id: u64,
        /// The panic payload, when it was a string.
        message: String,
    },

    /// A readiness operation was rejected.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    /// A moderator decision was rejected.
    #[error(transparent)]
    Moderation(#[from] ModerationError),
}
