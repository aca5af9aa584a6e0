//! Configuration loading and typed config structures for the turn core.
//!
//! Configuration is YAML. The engine-wide file carries logging and dice
//! settings plus one [`GuildConfig`] per guild (and an optional default
//! for guilds without their own entry):
//!
//! ```yaml
//! logging:
//!   level: info
//!   json: false
//! dice:
//!   seed: 7
//! default_guild:
//!   conflicts:
//!     - name: room_entry
//!       action_types: [move_into, move_into]
//!       resolution:
//!         mode: auto_check
//!         check:
//!           attribute: agility
//!   difficulties:
//!     hard: 20
//!   default_action:
//!     action_type: pass
//!   execution_order:
//!     rule: initiative
//!     attribute: initiative
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use questline_rules::{
    ConflictCatalog, DifficultySpec, DifficultyTable, ModifierTable, PriorityRule, ResolutionMode,
};
use questline_types::{Action, ActionType, ActorId, ActorKind, GuildId};
use serde::Deserialize;

use crate::ports::ConfigurationProvider;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is inconsistent.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },

    /// Neither the guild nor a default has a configuration.
    #[error("no configuration for guild {guild_id}")]
    ConfigurationMissing {
        /// The guild asked for.
        guild_id: GuildId,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dice settings.
    #[serde(default)]
    pub dice: DiceConfig,

    /// Served to guilds without an entry in `guilds`.
    #[serde(default)]
    pub default_guild: Option<GuildConfig>,

    /// Per-guild configuration.
    #[serde(default)]
    pub guilds: BTreeMap<GuildId, GuildConfig>,
}

impl EngineConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `QUESTLINE_DICE_SEED` overrides `dice.seed`
    /// - `QUESTLINE_LOG` overrides `logging.level`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, applying environment
    /// overrides and validating every guild.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override settings from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override settings from `lookup`, which maps variable names to values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(seed) = lookup("QUESTLINE_DICE_SEED").and_then(|v| v.trim().parse().ok()) {
            self.dice.seed = Some(seed);
        }
        if let Some(level) = lookup("QUESTLINE_LOG") {
            self.logging.level = level;
        }
    }

    /// Check every guild's configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(default) = &self.default_guild {
            default.validate()?;
        }
        for guild in self.guilds.values() {
            guild.validate()?;
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Dice settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DiceConfig {
    /// Fixed seed for reproducible turns. Entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

/// The action synthesised for actors who did not act.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DefaultActionConfig {
    /// Action type of the synthesised action.
    #[serde(default = "default_action_type")]
    pub action_type: ActionType,

    /// Parameters of the synthesised action.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl DefaultActionConfig {
    /// Build the default action for an actor.
    pub fn build(&self, guild_id: GuildId, actor_id: ActorId, actor_kind: ActorKind) -> Action {
        let mut action = Action::new(guild_id, actor_id, actor_kind, self.action_type.clone());
        action.parameters.clone_from(&self.parameters);
        action
    }
}

impl Default for DefaultActionConfig {
    fn default() -> Self {
        Self {
            action_type: default_action_type(),
            parameters: BTreeMap::new(),
        }
    }
}

/// Rules and tables for one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GuildConfig {
    /// Conflict catalog, in precedence order.
    #[serde(default)]
    pub conflicts: ConflictCatalog,

    /// Extra check modifiers keyed by action type.
    #[serde(default)]
    pub modifiers: ModifierTable,

    /// Named difficulty classes.
    #[serde(default)]
    pub difficulties: DifficultyTable,

    /// Action taken by actors who did not act.
    #[serde(default)]
    pub default_action: DefaultActionConfig,

    /// Order in which cleared actions execute.
    #[serde(default)]
    pub execution_order: PriorityRule,
}

impl GuildConfig {
    /// Conflict names must be unique and named difficulties must exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = BTreeSet::new();
        for def in self.conflicts.definitions() {
            if !names.insert(def.name.as_str()) {
                return Err(ConfigError::Invalid {
                    reason: format!("duplicate conflict definition {:?}", def.name),
                });
            }
            let named = match &def.resolution {
                ResolutionMode::AutoCheck { check } => match &check.difficulty {
                    Some(DifficultySpec::Named(name)) => Some(name),
                    _ => None,
                },
                _ => None,
            };
            if let Some(name) = named.filter(|n| !self.difficulties.contains_key(n.as_str())) {
                return Err(ConfigError::Invalid {
                    reason: format!("conflict {:?} names unknown difficulty {name:?}", def.name),
                });
            }
        }
        Ok(())
    }
}

/// Serves guild configuration from an [`EngineConfig`] held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    guilds: BTreeMap<GuildId, Arc<GuildConfig>>,
    fallback: Option<Arc<GuildConfig>>,
}

impl StaticConfigProvider {
    /// A provider with no guilds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve the guilds of an engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            guilds: config
                .guilds
                .iter()
                .map(|(id, guild)| (*id, Arc::new(guild.clone())))
                .collect(),
            fallback: config.default_guild.clone().map(Arc::new),
        }
    }

    /// Add or replace a guild's configuration.
    #[must_use]
    pub fn with_guild(mut self, guild_id: GuildId, config: GuildConfig) -> Self {
        self.guilds.insert(guild_id, Arc::new(config));
        self
    }

    /// Serve `config` to every guild without its own entry.
    #[must_use]
    pub fn with_default(mut self, config: GuildConfig) -> Self {
        self.fallback = Some(Arc::new(config));
        self
    }
}

impl ConfigurationProvider for StaticConfigProvider {
    fn guild_config(&self, guild_id: GuildId) -> Result<Arc<GuildConfig>, ConfigError> {
        self.guilds
            .get(&guild_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or(ConfigError::ConfigurationMissing { guild_id })
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_action_type() -> ActionType {
    ActionType::pass()
}
