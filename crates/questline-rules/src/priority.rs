//! Deterministic ordering of actions without dice.
//!
//! A [`PriorityRule`] decides priority-mode conflicts and also orders the
//! cleared actions a turn executes. Every rule breaks ties the same way:
//! earlier `submitted_at` first, then lower `actor_id`, then lower action
//! id, so the order is stable for a given input.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use questline_types::{Action, ActionId, ActorId, ActorKind};
use serde::{Deserialize, Serialize};

/// Read access to actor attributes (initiative, agility, ...).
pub trait ParticipantStats {
    /// The named attribute of an actor, if it has one.
    fn attribute(&self, actor_id: ActorId, name: &str) -> Option<i64>;
}

impl<F> ParticipantStats for F
where
    F: Fn(ActorId, &str) -> Option<i64>,
{
    fn attribute(&self, actor_id: ActorId, name: &str) -> Option<i64> {
        self(actor_id, name)
    }
}

/// Stats source for callers with no attribute data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStats;

impl ParticipantStats for NoStats {
    fn attribute(&self, _actor_id: ActorId, _name: &str) -> Option<i64> {
        None
    }
}

/// A deterministic ordering function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PriorityRule {
    /// Highest attribute value first. Actors without the attribute go last.
    Initiative {
        /// Attribute to read, e.g. `initiative`.
        attribute: String,
    },
    /// Earliest submission first.
    #[default]
    EarliestSubmission,
    /// Actor kinds in the listed order; unlisted kinds go last.
    ActorKind {
        /// Precedence, highest first.
        order: Vec<ActorKind>,
    },
}

type SortKey = (i64, DateTime<Utc>, ActorId, ActionId);

impl PriorityRule {
    /// Lower ranks sort first.
    fn rank(&self, action: &Action, stats: &dyn ParticipantStats) -> i64 {
        match self {
            Self::Initiative { attribute } => stats
                .attribute(action.actor_id, attribute)
                .map_or(i64::MAX, i64::saturating_neg),
            Self::EarliestSubmission => 0,
            Self::ActorKind { order } => order
                .iter()
                .position(|k| *k == action.actor_kind)
                .and_then(|p| i64::try_from(p).ok())
                .unwrap_or(i64::MAX),
        }
    }

    fn key(&self, action: &Action, stats: &dyn ParticipantStats) -> SortKey {
        (
            self.rank(action, stats),
            action.submitted_at,
            action.actor_id,
            action.id,
        )
    }

    /// Sort actions into this rule's order, highest priority first.
    pub fn sort<A: Borrow<Action>>(&self, actions: &mut [A], stats: &dyn ParticipantStats) {
        actions.sort_by_cached_key(|a| self.key(a.borrow(), stats));
    }
}

impl fmt::Display for PriorityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initiative { attribute } => write!(f, "highest {attribute}"),
            Self::EarliestSubmission => f.write_str("earliest submission"),
            Self::ActorKind { .. } => f.write_str("actor precedence"),
        }
    }
}

/// Sort actions by submission, the order conflict participants use.
pub fn sort_by_submission<A: Borrow<Action>>(actions: &mut [A]) {
    PriorityRule::EarliestSubmission.sort(actions, &NoStats);
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use chrono::Duration;
    use questline_types::GuildId;

    use super::*;

    fn make_action(kind: ActorKind, offset_ms: i64) -> Action {
        let base = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Action::new(GuildId::new(), ActorId::new(), kind, "attack")
            .submitted(base + Duration::milliseconds(offset_ms))
    }

    #[test]
    fn earliest_submission_orders_by_time() {
        let late = make_action(ActorKind::Character, 20);
        let early = make_action(ActorKind::Npc, 10);
        let mut actions = vec![late.clone(), early.clone()];
        sort_by_submission(&mut actions);
        assert_eq!(actions[0].id, early.id);
        assert_eq!(actions[1].id, late.id);
    }

    #[test]
    fn initiative_is_descending_and_missing_goes_last() {
        let fast = make_action(ActorKind::Character, 30);
        let slow = make_action(ActorKind::Character, 10);
        let unknown = make_action(ActorKind::Character, 0);
        let (fast_id, slow_id) = (fast.actor_id, slow.actor_id);
        let stats = move |actor: ActorId, name: &str| {
            assert_eq!(name, "initiative");
            if actor == fast_id {
                Some(18)
            } else if actor == slow_id {
                Some(-2)
            } else {
                None
            }
        };
        let rule = PriorityRule::Initiative {
            attribute: "initiative".to_owned(),
        };
        let mut actions = vec![&unknown, &slow, &fast];
        rule.sort(&mut actions, &stats);
        let ids: Vec<_> = actions.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![fast.id, slow.id, unknown.id]);
    }

    #[test]
    fn actor_kind_precedence_then_submission() {
        let pc_late = make_action(ActorKind::Character, 50);
        let pc_early = make_action(ActorKind::Character, 5);
        let npc = make_action(ActorKind::Npc, 0);
        let party = make_action(ActorKind::Party, 0);
        let rule = PriorityRule::ActorKind {
            order: vec![ActorKind::Character, ActorKind::Npc],
        };
        let mut actions = vec![party.clone(), npc.clone(), pc_late.clone(), pc_early.clone()];
        rule.sort(&mut actions, &NoStats);
        let ids: Vec<_> = actions.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![pc_early.id, pc_late.id, npc.id, party.id]);
    }

    #[test]
    fn rule_deserializes_from_tagged_form() {
        let rule: PriorityRule =
            serde_json::from_str(r#"{"rule":"initiative","attribute":"dex"}"#).unwrap();
        assert_eq!(
            rule,
            PriorityRule::Initiative {
                attribute: "dex".to_owned()
            }
        );
    }
}
