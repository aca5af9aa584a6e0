//! Shared type definitions for the Questline turn-resolution core.
//!
//! This crate is the single source of truth for the records that flow
//! between the rules engine, the turn processor, and external collaborators.
//! It holds data only; behavior lives in `questline-rules` and
//! `questline-core`.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for every entity identifier
//! - [`enums`] -- Actor kinds, check degrees, lifecycle states, failure classes
//! - [`action`] -- The typed [`Action`] record and its target
//! - [`check`] -- Check modifiers and narratable [`CheckResult`]s
//! - [`conflict`] -- [`ConflictInstance`] and its resolution
//! - [`turn`] -- Per-guild [`TurnState`]
//! - [`report`] -- Execution outcomes and the [`TurnReport`]

pub mod action;
pub mod check;
pub mod conflict;
pub mod enums;
pub mod ids;
pub mod report;
pub mod turn;

// Re-export all public types at crate root for convenience.
pub use action::{Action, ActionType, TargetRef};
pub use check::{CheckModifier, CheckResult};
pub use conflict::{ConflictInstance, ConflictResolution, ResolutionMethod};
pub use enums::{ActorKind, ConflictStatus, Degree, FailureClass, TurnStatus};
pub use ids::{ActionId, ActorId, ConflictId, GuildId, ItemId, LocationId};
pub use report::{
    ActionOutcome, ActionResolution, ActorOutcome, Effect, ExecutionError, TurnReport,
    TurnWarning, narrative,
};
pub use turn::TurnState;
