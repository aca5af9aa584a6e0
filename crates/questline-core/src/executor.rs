//! The action executor: one action, one scoped unit of work.
//!
//! Each action runs inside its own transaction bound to the action's
//! guild. The scope commits on success and rolls back on every other exit:
//! an error from the store, an error from commit, or a panic inside the
//! collaborator. Nothing one action stages is visible to any other.
//!
//! Failures are classified for the turn report:
//!
//! | Store error | Class | Logged at |
//! |---|---|---|
//! | `Validation` | [`FailureClass::Validation`] | `debug` |
//! | `Unavailable` | [`FailureClass::Dependency`] | `debug` |
//! | `Fault`, panic | [`FailureClass::Fault`] | `warn` |

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use questline_types::{Action, ActionOutcome, Effect, FailureClass};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::ports::{WorldStore, WorldTransaction};

/// Rolls back on drop unless committed.
struct Scope<'a> {
    tx: Option<Box<dyn WorldTransaction + 'a>>,
}

impl Scope<'_> {
    fn apply(&mut self, action: &Action) -> Result<Vec<Effect>, StoreError> {
        match self.tx.as_mut() {
            Some(tx) => tx.apply(action),
            None => Err(StoreError::fault("scope already released")),
        }
    }

    fn commit(mut self) -> Result<(), StoreError> {
        match self.tx.take() {
            Some(tx) => tx.commit(),
            None => Err(StoreError::fault("scope already released")),
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tx.rollback();
        }
    }
}

/// Map a store error onto its failure class.
pub const fn classify(error: &StoreError) -> FailureClass {
    match error {
        StoreError::Validation { .. } => FailureClass::Validation,
        StoreError::Unavailable { .. } => FailureClass::Dependency,
        StoreError::Fault { .. } => FailureClass::Fault,
    }
}

fn run(store: &dyn WorldStore, action: &Action) -> Result<Vec<Effect>, StoreError> {
    let mut scope = Scope {
        tx: Some(store.begin(action.guild_id)?),
    };
    let effects = scope.apply(action)?;
    scope.commit()?;
    Ok(effects)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_owned())
}

/// Execute one action in its own scope.
pub fn execute(store: &dyn WorldStore, action: &Action) -> ActionOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| run(store, action)))
        .unwrap_or_else(|payload| {
            Err(StoreError::fault(format!(
                "collaborator panicked: {}",
                panic_message(payload.as_ref())
            )))
        });

    match result {
        Ok(effects) => {
            debug!(
                guild_id = %action.guild_id,
                actor_id = %action.actor_id,
                action_id = %action.id,
                action_type = %action.action_type,
                effects = effects.len(),
                "Action committed"
            );
            ActionOutcome::committed(effects)
        }
        Err(err) => {
            let class = classify(&err);
            if class == FailureClass::Fault {
                warn!(
                    guild_id = %action.guild_id,
                    actor_id = %action.actor_id,
                    action_id = %action.id,
                    error = %err,
                    "Action faulted, scope rolled back"
                );
            } else {
                debug!(
                    guild_id = %action.guild_id,
                    actor_id = %action.actor_id,
                    action_id = %action.id,
                    ?class,
                    error = %err,
                    "Action rejected, scope rolled back"
                );
            }
            ActionOutcome::failed(class, err.to_string())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use questline_types::{ActorId, ActorKind, GuildId};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Behaviour {
        Succeed,
        Reject,
        Unavailable,
        Fault,
        FailCommit,
        Panic,
        NoBegin,
    }

    #[derive(Default)]
    struct Journal {
        begun: u32,
        committed: u32,
        rolled_back: u32,
    }

    struct ScriptedStore {
        behaviour: Behaviour,
        journal: Mutex<Journal>,
    }

    impl ScriptedStore {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                journal: Mutex::new(Journal::default()),
            }
        }

        fn counts(&self) -> (u32, u32, u32) {
            let j = self.journal.lock().unwrap();
            (j.begun, j.committed, j.rolled_back)
        }
    }

    struct ScriptedTx<'a> {
        store: &'a ScriptedStore,
    }

    impl WorldTransaction for ScriptedTx<'_> {
        fn apply(&mut self, action: &Action) -> Result<Vec<Effect>, StoreError> {
            match self.store.behaviour {
                Behaviour::Reject => Err(StoreError::validation("target no longer present")),
                Behaviour::Unavailable => Err(StoreError::unavailable("inventory service down")),
                Behaviour::Fault => Err(StoreError::fault("constraint violated")),
                Behaviour::Panic => panic!("boom"),
                _ => Ok(vec![Effect::Custom {
                    description: action.action_type.to_string(),
                }]),
            }
        }

        fn commit(self: Box<Self>) -> Result<(), StoreError> {
            if self.store.behaviour == Behaviour::FailCommit {
                return Err(StoreError::fault("commit lost"));
            }
            self.store.journal.lock().unwrap().committed += 1;
            Ok(())
        }

        fn rollback(self: Box<Self>) {
            self.store.journal.lock().unwrap().rolled_back += 1;
        }
    }

    impl WorldStore for ScriptedStore {
        fn attribute(&self, _: GuildId, _: ActorId, _: &str) -> Result<Option<i64>, StoreError> {
            Ok(None)
        }

        fn begin(&self, _: GuildId) -> Result<Box<dyn WorldTransaction + '_>, StoreError> {
            if self.behaviour == Behaviour::NoBegin {
                return Err(StoreError::unavailable("no connection"));
            }
            self.journal.lock().unwrap().begun += 1;
            Ok(Box::new(ScriptedTx { store: self }))
        }
    }

    fn make_action() -> Action {
        Action::new(GuildId::new(), ActorId::new(), ActorKind::Character, "search")
    }

    #[test]
    fn success_commits_once() {
        let store = ScriptedStore::new(Behaviour::Succeed);
        let outcome = execute(&store, &make_action());
        assert!(outcome.success);
        assert_eq!(outcome.effects_applied.len(), 1);
        assert_eq!(store.counts(), (1, 1, 0));
    }

    #[test]
    fn failures_are_classified_and_rolled_back() {
        for (behaviour, class) in [
            (Behaviour::Reject, FailureClass::Validation),
            (Behaviour::Unavailable, FailureClass::Dependency),
            (Behaviour::Fault, FailureClass::Fault),
        ] {
            let store = ScriptedStore::new(behaviour);
            let outcome = execute(&store, &make_action());
            assert!(!outcome.success);
            assert!(outcome.effects_applied.is_empty());
            assert_eq!(outcome.failure_class(), Some(class));
            assert_eq!(store.counts(), (1, 0, 1), "{behaviour:?}");
        }
    }

    #[test]
    fn panic_inside_scope_is_a_fault() {
        let store = ScriptedStore::new(Behaviour::Panic);
        let outcome = execute(&store, &make_action());
        assert_eq!(outcome.failure_class(), Some(FailureClass::Fault));
        assert!(outcome.error.unwrap().message.contains("boom"));
        assert_eq!(store.counts(), (1, 0, 1));
    }

    #[test]
    fn commit_failure_is_reported() {
        let store = ScriptedStore::new(Behaviour::FailCommit);
        let outcome = execute(&store, &make_action());
        assert_eq!(outcome.failure_class(), Some(FailureClass::Fault));
        assert_eq!(store.counts(), (1, 0, 0));
    }

    #[test]
    fn unavailable_scope_is_a_dependency_failure() {
        let store = ScriptedStore::new(Behaviour::NoBegin);
        let outcome = execute(&store, &make_action());
        assert_eq!(outcome.failure_class(), Some(FailureClass::Dependency));
        assert_eq!(store.counts(), (0, 0, 0));
    }
}
