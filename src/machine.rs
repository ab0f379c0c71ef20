//! The machine collaborator seam
//!
//! A [`Machine`] is the static statechart definition: a pure function
//! from (state, event) to the next state snapshot. Compiling chart
//! definitions into a `Machine` is host territory; the interpreter only
//! consumes this trait plus the [`StateSnapshot`] records it produces.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::action::{Action, ActionFn, ServiceFn};
use crate::actor::ActorRef;
use crate::event::{EventData, ScEvent};
use crate::registry::SessionId;

/// User-visible machine context, an arbitrary JSON document
pub type Context = serde_json::Value;

/// Hierarchical state label: a leaf name, or a map from a compound
/// state's key to the label of its active child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    /// An atomic or final state
    Leaf(String),
    /// A compound state with active children
    Compound(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Leaf label
    pub fn leaf(name: impl Into<String>) -> Self {
        Self::Leaf(name.into())
    }

    /// Single-child compound label (`parent.child`)
    pub fn nested(parent: impl Into<String>, child: StateValue) -> Self {
        let mut map = BTreeMap::new();
        map.insert(parent.into(), child);
        Self::Compound(map)
    }
}

impl From<&str> for StateValue {
    fn from(name: &str) -> Self {
        Self::Leaf(name.to_string())
    }
}

impl From<String> for StateValue {
    fn from(name: String) -> Self {
        Self::Leaf(name)
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf(name) => write!(f, "{name}"),
            Self::Compound(map) => {
                let parts: Vec<String> =
                    map.iter().map(|(k, v)| format!("{k}.{v}")).collect();
                write!(f, "{}", parts.join(","))
            }
        }
    }
}

/// Kind of a state node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateKind {
    /// Leaf state with no children
    Atomic,
    /// State with nested children
    Compound,
    /// Region container whose children are all simultaneously active
    Parallel,
    /// Completion state; activation may terminate the machine
    Final,
    /// History pseudo-state
    History,
}

/// Done-data carried by a final state: either a literal value or an
/// expression evaluated against the final context and triggering event.
#[derive(Clone)]
pub enum DoneData {
    /// Literal payload
    Value(EventData),
    /// Computed payload
    Expr(Arc<dyn Fn(&Context, &ScEvent) -> EventData + Send + Sync>),
}

impl DoneData {
    /// Resolve the payload against the final context and event
    pub fn resolve(&self, context: &Context, event: &ScEvent) -> EventData {
        match self {
            Self::Value(value) => value.clone(),
            Self::Expr(f) => f(context, event),
        }
    }
}

impl fmt::Debug for DoneData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Expr(_) => f.write_str("Expr(..)"),
        }
    }
}

/// Descriptor of one active state node in a configuration.
///
/// `parent` is the id of the enclosing state node; `None` marks a
/// direct child of the machine root.
#[derive(Debug, Clone)]
pub struct StateNodeInfo {
    /// Full node id, e.g. `"light.red"`
    pub id: String,
    /// Node kind
    pub kind: StateKind,
    /// Enclosing node id; `None` for children of the root
    pub parent: Option<String>,
    /// Done-data, only meaningful on final nodes
    pub done_data: Option<DoneData>,
}

impl StateNodeInfo {
    /// Descriptor for a top-level node of the given kind
    pub fn top_level(id: impl Into<String>, kind: StateKind) -> Self {
        Self {
            id: id.into(),
            kind,
            parent: None,
            done_data: None,
        }
    }

    /// Descriptor for a nested node
    pub fn nested(id: impl Into<String>, kind: StateKind, parent: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            parent: Some(parent.into()),
            done_data: None,
        }
    }

    /// Attach done-data to a final node
    pub fn with_done_data(mut self, data: DoneData) -> Self {
        self.done_data = Some(data);
        self
    }
}

/// Terminality rule: the configuration is terminal when it is non-empty
/// and every active node directly under the root is final.
pub fn is_in_final_state(configuration: &[StateNodeInfo]) -> bool {
    let mut any_top_level = false;
    for node in configuration.iter().filter(|n| n.parent.is_none()) {
        any_top_level = true;
        if node.kind != StateKind::Final {
            return false;
        }
    }
    any_top_level
}

/// Immutable record of machine state at one point in time
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Hierarchical state label
    pub value: StateValue,
    /// User context
    pub context: Context,
    /// Event that produced this snapshot
    pub event: ScEvent,
    /// Every active state node below the root
    pub configuration: Vec<StateNodeInfo>,
    /// Actions to execute for this transition, in order
    pub actions: Vec<Action>,
    /// Whether the transition changed value or context
    pub changed: bool,
    /// Previous snapshot, for context-change listeners
    pub history: Option<Box<StateSnapshot>>,
    /// Live child actors, mirrored from the owning interpreter
    pub children: HashMap<String, ActorRef>,
    /// Event names the current configuration has transitions for
    pub next_events: Vec<String>,
    /// Owning session, stamped by the interpreter
    pub session_id: Option<SessionId>,
}

impl StateSnapshot {
    /// Build a snapshot with empty actions and configuration; machines
    /// fill the rest in.
    pub fn new(value: StateValue, context: Context, event: ScEvent) -> Self {
        Self {
            value,
            context,
            event,
            configuration: Vec::new(),
            actions: Vec::new(),
            changed: false,
            history: None,
            children: HashMap::new(),
            next_events: Vec::new(),
            session_id: None,
        }
    }

    /// True when the state label equals `value`
    pub fn matches(&self, value: impl Into<StateValue>) -> bool {
        self.value == value.into()
    }

    /// True when this configuration is terminal
    pub fn is_done(&self) -> bool {
        is_in_final_state(&self.configuration)
    }

    /// The top-level final node, when the configuration is terminal
    pub fn top_level_final(&self) -> Option<&StateNodeInfo> {
        self.configuration
            .iter()
            .find(|n| n.parent.is_none() && n.kind == StateKind::Final)
    }
}

/// Implementation maps a machine ships with: named action executables
/// and invoke service factories.
#[derive(Clone, Default)]
pub struct MachineOptions {
    /// Named action implementations, keyed by action type
    pub actions: HashMap<String, ActionFn>,
    /// Invoke service factories, keyed by source name
    pub services: HashMap<String, ServiceFn>,
}

impl MachineOptions {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named action implementation
    pub fn with_action(mut self, name: impl Into<String>, f: ActionFn) -> Self {
        self.actions.insert(name.into(), f);
        self
    }

    /// Register an invoke service factory
    pub fn with_service(mut self, name: impl Into<String>, f: ServiceFn) -> Self {
        self.services.insert(name.into(), f);
        self
    }
}

/// A static statechart definition.
///
/// `transition` must be pure: given the same state and event it returns
/// the same snapshot and performs no side effects. All effects are
/// described by the returned snapshot's action list and executed by the
/// interpreter.
pub trait Machine: Send + Sync {
    /// Machine identifier; the default interpreter id
    fn id(&self) -> &str;

    /// The default context for fresh or reconstructed states
    fn initial_context(&self) -> Context;

    /// The machine's initial state snapshot
    fn initial_state(&self) -> StateSnapshot;

    /// Compute the next state for an event
    fn transition(&self, state: &StateSnapshot, event: &ScEvent) -> StateSnapshot;

    /// Reconstruct a full snapshot from a bare state value
    fn resolve_state(&self, value: StateValue, context: Context) -> StateSnapshot;

    /// The machine's implementation maps
    fn options(&self) -> &MachineOptions;
}
