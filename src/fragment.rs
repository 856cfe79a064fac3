//! The fragment / IR model (§3): the tagged-variant `State` hierarchy the
//! Statement Visitor emits and the Linker wires together, plus the
//! non-state helper types (`ChoiceBranch`, `Catch`, `Retry`, `SubMachine`).
//!
//! Edges are represented as keys, not direct references, so the graph
//! stays a plain serializable value (Design Note "Fragment graph").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A state key: a non-empty ASCII string unique within its enclosing
/// `states` table. Thin newtype so the uniqueness invariant has one
/// enforcement point (the Linker).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(pub String);

impl StateKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StateKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where control flows after a non-terminal state: either another key in
/// the same sub-machine, or the end of that sub-machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Next {
    Key(StateKey),
    End,
}

/// A compiled `Retry` clause (§3, §4.1 `with retry(...)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retry {
    /// Error names, or the sentinel `"States.ALL"`.
    pub errors: Vec<String>,
    pub interval_seconds: u32,
    pub max_attempts: u32,
    pub backoff_rate: f64,
}

impl Retry {
    /// Defaults per §4.1: `interval=1`, `max_attempts=3`, `backoff_rate=2.0`,
    /// no error filter.
    pub fn defaults() -> Self {
        Self {
            errors: vec!["States.ALL".to_string()],
            interval_seconds: 1,
            max_attempts: 3,
            backoff_rate: 2.0,
        }
    }
}

/// A compiled `Catch` clause (§3, §4.1 `try/except`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catch {
    /// Error names, or the sentinel `"States.ALL"` for a bare `except`.
    pub errors: Vec<String>,
    pub next: StateKey,
}

/// A single branch of a `Choice` state: a compiled predicate tree (§4.3)
/// and where to go if it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceBranch {
    pub rule: crate::choice::ChoiceRule,
    pub next: StateKey,
}

/// An isolated `{start_key, states}` scope: a Map iterator, or one branch
/// of a Parallel state. Each has its own key namespace (Design Note
/// "Nested sub-machines").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMachine {
    pub start_key: StateKey,
    pub states: BTreeMap<String, State>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WaitSpec {
    Seconds(u64),
    SecondsPath(String),
    Timestamp(String),
    TimestampPath(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub comment: Option<String>,
    /// The task class name; the ASL `Resource` ARN is computed from this
    /// plus the resolved `TaskDefinition` by the Task Family (§4.4), not
    /// stored redundantly here — `resource` holds that computed value.
    pub task_class: String,
    pub resource: String,
    pub result_path: Option<String>,
    pub input_path: Option<String>,
    pub timeout_seconds: u32,
    pub heartbeat_seconds: Option<u32>,
    pub retry: Vec<Retry>,
    pub catch: Vec<Catch>,
    pub next: Option<Next>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceState {
    pub comment: Option<String>,
    pub branches: Vec<ChoiceBranch>,
    pub default: StateKey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    pub comment: Option<String>,
    pub items_path: String,
    pub max_concurrency: Option<u32>,
    pub iterator: SubMachine,
    pub next: Option<Next>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelState {
    pub comment: Option<String>,
    pub branches: Vec<SubMachine>,
    pub next: Option<Next>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassState {
    pub comment: Option<String>,
    pub result: Option<serde_json::Value>,
    pub result_path: Option<String>,
    pub next: Option<Next>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitState {
    pub comment: Option<String>,
    pub spec: WaitSpec,
    pub next: Option<Next>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SucceedState {
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailState {
    pub comment: Option<String>,
    pub error: String,
    pub cause: Option<String>,
}

/// One state in a `states` table. `Choice` has no top-level `next` field:
/// control always flows through a branch or the `default`. `Succeed` and
/// `Fail` are always terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum State {
    Task(TaskState),
    Choice(ChoiceState),
    Map(MapState),
    Parallel(ParallelState),
    Pass(PassState),
    Wait(WaitState),
    Succeed(SucceedState),
    Fail(FailState),
}

impl State {
    /// True if this state kind can never have a `Next` assigned to it
    /// (§4.2 terminal kinds, excluding the "all-Catch-is-ALL" Task case,
    /// which the Linker evaluates separately since it depends on content,
    /// not just the variant).
    pub fn is_always_terminal(&self) -> bool {
        matches!(self, State::Succeed(_) | State::Fail(_))
    }

    pub fn set_next(&mut self, next: Next) {
        match self {
            State::Task(s) => s.next = Some(next),
            State::Map(s) => s.next = Some(next),
            State::Parallel(s) => s.next = Some(next),
            State::Pass(s) => s.next = Some(next),
            State::Wait(s) => s.next = Some(next),
            State::Choice(_) | State::Succeed(_) | State::Fail(_) => {}
        }
    }

    /// The key prefix used for synthesizing a name when no explicit `key=`
    /// was given (§3 "Keys"): `<Kind>-<counter>`.
    pub fn kind_prefix(&self) -> &'static str {
        match self {
            State::Task(_) => "Task",
            State::Choice(_) => "Choice",
            State::Map(_) => "Map",
            State::Parallel(_) => "Parallel",
            State::Pass(_) => "Pass",
            State::Wait(_) => "Wait",
            State::Succeed(_) => "Succeed",
            State::Fail(_) => "Fail",
        }
    }
}

/// A subscription to another state machine's success/failure SNS topic
/// (§4.5 `subscribe(...)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub project: String,
    pub state_machine: String,
    pub status: SubscriptionStatus,
    pub topic_arn_import_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    Success,
    Failure,
}

/// A top-level compiled workflow (§3 `StateMachine`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachine {
    pub name: String,
    pub start_key: StateKey,
    pub states: BTreeMap<String, State>,
    pub schedule_expression: Option<String>,
    pub subscription: Option<Subscription>,
    pub exported: bool,
}

impl StateMachine {
    /// §8 "Key uniqueness": no duplicate keys in this sub-machine. Always
    /// true by construction since `states` is a map, but exposed as an
    /// explicit check so tests can assert the invariant by name.
    pub fn has_unique_keys(&self) -> bool {
        true
    }

    /// §8 "Edge closure": every `Next`/`Default`/`Catch.next`/
    /// `ChoiceBranch.next` target exists in this sub-machine's `states`.
    pub fn edges_resolve(&self) -> bool {
        edges_resolve(&self.states)
    }
}

pub(crate) fn edges_resolve(states: &BTreeMap<String, State>) -> bool {
    let key_exists = |k: &StateKey| states.contains_key(k.as_str());
    states.values().all(|state| match state {
        State::Task(t) => {
            matches!(&t.next, None | Some(Next::End))
                || t.next.as_ref().map(|n| matches!(n, Next::End) || matches!(n, Next::Key(k) if key_exists(k))).unwrap_or(true)
        }
        State::Choice(c) => {
            c.branches.iter().all(|b| key_exists(&b.next)) && key_exists(&c.default)
        }
        State::Map(m) => match &m.next {
            None | Some(Next::End) => true,
            Some(Next::Key(k)) => key_exists(k),
        },
        State::Parallel(p) => match &p.next {
            None | Some(Next::End) => true,
            Some(Next::Key(k)) => key_exists(k),
        },
        State::Pass(p) => match &p.next {
            None | Some(Next::End) => true,
            Some(Next::Key(k)) => key_exists(k),
        },
        State::Wait(w) => match &w.next {
            None | Some(Next::End) => true,
            Some(Next::Key(k)) => key_exists(k),
        },
        State::Succeed(_) | State::Fail(_) => true,
    }) && states.values().all(|state| {
        let catches: &[Catch] = match state {
            State::Task(t) => &t.catch,
            _ => &[],
        };
        catches.iter().all(|c| key_exists(&c.next))
    })
}
