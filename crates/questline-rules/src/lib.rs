//! Dice, checks, and conflict resolution for the Questline turn core.
//!
//! Everything here is pure logic: no I/O, no async, no shared state.
//! Randomness comes in through the [`DieRoller`] trait so callers decide
//! whether a turn is seeded or drawn from entropy.
//!
//! # Modules
//!
//! - [`dice`] -- Dice expressions and die rollers
//! - [`check`] -- Difficulty and opposed checks ([`CheckRequest`], [`resolve`])
//! - [`catalog`] -- Conflict definitions per guild ([`ConflictCatalog`])
//! - [`priority`] -- Deterministic ordering rules ([`PriorityRule`])
//! - [`conflict`] -- Conflict detection and resolution ([`detect_and_resolve`])
//! - [`error`] -- Error types ([`RulesError`])

pub mod catalog;
pub mod check;
pub mod conflict;
pub mod dice;
pub mod error;
pub mod priority;

pub use catalog::{
    CheckTemplate, ConflictCatalog, ConflictDefinition, ContestScope, DifficultySpec,
    DifficultyTable, ModifierTable, ResolutionMode,
};
pub use check::{CheckRequest, CheckTarget, TieBreakPolicy, ability_modifier, resolve};
pub use conflict::{Disposition, ResolutionBatch, ResolutionContext, detect_and_resolve};
pub use dice::{DiceExpression, DiceRoll, DieRoller, RngRoller, ScriptedRoller};
pub use error::RulesError;
pub use priority::{NoStats, ParticipantStats, PriorityRule, sort_by_submission};
