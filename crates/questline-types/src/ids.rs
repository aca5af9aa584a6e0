//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Guilds, actors, actions, and conflicts each get their own identifier type
//! so a conflict ID can never be passed where an actor ID is expected. All
//! IDs use UUID v7 (time-ordered), which keeps `BTreeMap` iteration roughly
//! in creation order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of a guild, the top-level multi-tenant game instance.
    GuildId
}

define_id! {
    /// Identifier of an actor (player character, NPC, or party).
    ActorId
}

define_id! {
    /// Identifier of a single submitted action.
    ActionId
}

define_id! {
    /// Identifier of a detected conflict between simultaneous actions.
    ConflictId
}

define_id! {
    /// Identifier of an item that actions can target.
    ItemId
}

define_id! {
    /// Identifier of a location (room, area) that actions can target.
    LocationId
}
