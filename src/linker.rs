//! Linker (§4.2): state-key assignment, sequential `Next` wiring, and the
//! edge-closure / key-uniqueness checks the Statement Visitor relies on as
//! it threads one statement's dangling exits into the next statement's
//! entry key.
//!
//! The Statement Visitor calls into this module continuously while
//! walking a function body (statement *i*'s exits are linked to statement
//! *i+1*'s entry as soon as both are known, since source order fully
//! determines that edge); this module's own top-level entry point,
//! [`finalize`], performs the one step that cannot be known until the
//! whole block has been walked: closing whatever exits remain dangling at
//! the end of a sub-machine with `End: true`.

use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::{key_collision, Diagnostic};
use crate::fragment::{Next, State, StateKey};

/// Per-sub-machine monotonic counter for synthesized keys (§3 "Keys"):
/// `<Kind>-<n>`.
#[derive(Debug, Default)]
pub struct KeyCounter {
    counts: HashMap<&'static str, u32>,
}

impl KeyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, prefix: &'static str) -> StateKey {
        let n = self.counts.entry(prefix).or_insert(0);
        *n += 1;
        StateKey::new(format!("{prefix}-{n}"))
    }
}

/// Inserts a state under `key`, raising `KeyCollision` if the key is
/// already taken in this sub-machine (§4.2 "collisions... are a hard
/// error").
pub fn insert_unique(
    states: &mut BTreeMap<String, State>,
    key: &StateKey,
    state: State,
) -> Result<(), Diagnostic> {
    if states.contains_key(key.as_str()) {
        return Err(key_collision(key.as_str()));
    }
    states.insert(key.0.clone(), state);
    Ok(())
}

/// Links every listed dangling exit to `target`'s entry key. Used when a
/// statement's emitted exits are known to flow into the very next
/// statement.
pub fn link_sequential(states: &mut BTreeMap<String, State>, exits: &[StateKey], target: &StateKey) {
    for key in exits {
        if let Some(state) = states.get_mut(key.as_str()) {
            state.set_next(Next::Key(target.clone()));
        }
    }
}

/// Closes out any exits still dangling at the end of a sub-machine with
/// `End: true` (§4.2 "the last non-terminal state's Next is set to
/// End"). A no-op for states that can never carry `Next` (`Choice`,
/// `Succeed`, `Fail`).
pub fn finalize(states: &mut BTreeMap<String, State>, exits: &[StateKey]) {
    for key in exits {
        if let Some(state) = states.get_mut(key.as_str()) {
            state.set_next(Next::End);
        }
    }
}

/// §8 "Edge closure": every `Next`/`Default`/`Catch.next`/
/// `ChoiceBranch.next` target must exist in the same sub-machine.
pub fn check_edges_resolve(states: &BTreeMap<String, State>) -> Result<(), Diagnostic> {
    if crate::fragment::edges_resolve(states) {
        Ok(())
    } else {
        Err(crate::diagnostics::shape_error(
            "an edge in this sub-machine points at a state key that does not exist",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{PassState, SucceedState};

    fn pass(next: Option<Next>) -> State {
        State::Pass(PassState {
            comment: None,
            result: None,
            result_path: None,
            next,
        })
    }

    #[test]
    fn counter_produces_monotonic_synthesized_keys() {
        let mut c = KeyCounter::new();
        assert_eq!(c.next("Task").as_str(), "Task-1");
        assert_eq!(c.next("Task").as_str(), "Task-2");
        assert_eq!(c.next("Choice").as_str(), "Choice-1");
    }

    #[test]
    fn insert_unique_rejects_duplicate_keys() {
        let mut states = BTreeMap::new();
        let key = StateKey::new("Task-1");
        insert_unique(&mut states, &key, pass(None)).unwrap();
        let err = insert_unique(&mut states, &key, pass(None)).unwrap_err();
        assert_eq!(err.code, crate::diagnostics::DiagnosticCode::KeyCollision);
    }

    #[test]
    fn finalize_closes_dangling_exits_with_end() {
        let mut states = BTreeMap::new();
        let key = StateKey::new("Pass-1");
        states.insert(key.0.clone(), pass(None));
        finalize(&mut states, &[key.clone()]);
        match states.get(key.as_str()).unwrap() {
            State::Pass(p) => assert_eq!(p.next, Some(Next::End)),
            _ => panic!("expected pass state"),
        }
    }

    #[test]
    fn finalize_is_a_no_op_for_always_terminal_states() {
        let mut states = BTreeMap::new();
        let key = StateKey::new("Succeed-1");
        states.insert(
            key.0.clone(),
            State::Succeed(SucceedState { comment: None }),
        );
        finalize(&mut states, &[key.clone()]);
        assert!(matches!(states.get(key.as_str()).unwrap(), State::Succeed(_)));
    }

    #[test]
    fn edge_closure_detects_dangling_reference() {
        let mut states = BTreeMap::new();
        states.insert(
            "Pass-1".to_string(),
            pass(Some(Next::Key(StateKey::new("Ghost")))),
        );
        assert!(check_edges_resolve(&states).is_err());
    }
}
