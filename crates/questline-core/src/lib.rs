//! Turn readiness, conflict moderation, and per-action execution for the
//! Questline turn-resolution core.
//!
//! A guild collects one action per actor, waits until every required actor
//! is ready (or a moderator force-closes the turn), then processes the turn
//! as a single unit: conflicts are detected and decided by the rules engine,
//! cleared actions execute one scoped transaction each, and a report goes
//! out to the players.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration and the static guild config provider
//! - [`engine`] -- [`TurnEngine`], the entry point for a game server
//! - [`error`] -- Error types for collaborators, readiness, and moderation
//! - [`executor`] -- One action, one transaction, classified failures
//! - [`memory`] -- In-memory world, notifier, and action source
//! - [`moderation`] -- Escalated conflicts and moderator decisions
//! - [`ports`] -- Collaborator traits
//! - [`readiness`] -- Per-guild turn state machine and quorum detection
//! - [`telemetry`] -- Tracing subscriber setup
//! - [`turn`] -- The turn processor and dice sources

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod memory;
pub mod moderation;
pub mod ports;
pub mod readiness;
pub mod telemetry;
pub mod turn;

pub use config::{ConfigError, EngineConfig, GuildConfig, StaticConfigProvider};
pub use engine::TurnEngine;
pub use error::{ModerationError, NotifyError, ReadinessError, StoreError, TurnError};
pub use moderation::{ManualConflictBoard, ModeratorDecision};
pub use ports::{ActionSource, ConfigurationProvider, Notifier, WorldStore, WorldTransaction};
pub use readiness::{ReadyOutcome, TurnSnapshot, TurnTracker};
pub use turn::{RollSeed, RollerFactory, TurnProcessor};
