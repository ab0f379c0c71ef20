//! Shared test machine: a small table-driven statechart
//!
//! The interpreter consumes machines through the `Machine` trait; tests
//! bring this flat, hand-built implementation so scenarios can declare
//! states, transitions, entry actions, assigns, and invoke services
//! without a chart compiler.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chorus::{
    Action, Context, DoneData, Event, Machine, MachineOptions, ScEvent, StateKind, StateNodeInfo,
    StateSnapshot, StateValue,
};

type AssignFn = Arc<dyn Fn(&Context, &ScEvent) -> Context + Send + Sync>;

struct TransitionDef {
    target: String,
    actions: Vec<Action>,
    assign: Option<AssignFn>,
}

struct StateDef {
    kind: StateKind,
    on: HashMap<String, TransitionDef>,
    entry: Vec<Action>,
    done_data: Option<DoneData>,
}

impl StateDef {
    fn new(kind: StateKind) -> Self {
        Self {
            kind,
            on: HashMap::new(),
            entry: Vec::new(),
            done_data: None,
        }
    }
}

/// Flat statechart with one level of states
pub struct TestMachine {
    id: String,
    initial: String,
    context: Context,
    states: HashMap<String, StateDef>,
    options: MachineOptions,
}

/// Builder for [`TestMachine`]
pub struct MachineBuilder {
    machine: TestMachine,
}

impl MachineBuilder {
    pub fn new(id: &str, initial: &str) -> Self {
        let mut states = HashMap::new();
        states.insert(initial.to_string(), StateDef::new(StateKind::Atomic));
        Self {
            machine: TestMachine {
                id: id.to_string(),
                initial: initial.to_string(),
                context: Context::Null,
                states,
                options: MachineOptions::new(),
            },
        }
    }

    pub fn context(mut self, context: Context) -> Self {
        self.machine.context = context;
        self
    }

    pub fn state(mut self, name: &str) -> Self {
        self.machine
            .states
            .entry(name.to_string())
            .or_insert_with(|| StateDef::new(StateKind::Atomic));
        self
    }

    pub fn final_state(mut self, name: &str, done_data: Option<DoneData>) -> Self {
        let state = self
            .machine
            .states
            .entry(name.to_string())
            .or_insert_with(|| StateDef::new(StateKind::Final));
        state.kind = StateKind::Final;
        state.done_data = done_data;
        self
    }

    pub fn entry(mut self, state: &str, actions: Vec<Action>) -> Self {
        self.machine
            .states
            .entry(state.to_string())
            .or_insert_with(|| StateDef::new(StateKind::Atomic))
            .entry = actions;
        self
    }

    pub fn on(self, from: &str, event: &str, to: &str) -> Self {
        self.on_full(from, event, to, Vec::new(), None)
    }

    pub fn on_with(self, from: &str, event: &str, to: &str, actions: Vec<Action>) -> Self {
        self.on_full(from, event, to, actions, None)
    }

    pub fn on_assign(
        self,
        from: &str,
        event: &str,
        to: &str,
        assign: impl Fn(&Context, &ScEvent) -> Context + Send + Sync + 'static,
    ) -> Self {
        self.on_full(from, event, to, Vec::new(), Some(Arc::new(assign)))
    }

    pub fn on_full(
        mut self,
        from: &str,
        event: &str,
        to: &str,
        actions: Vec<Action>,
        assign: Option<AssignFn>,
    ) -> Self {
        self.machine
            .states
            .entry(from.to_string())
            .or_insert_with(|| StateDef::new(StateKind::Atomic))
            .on
            .insert(
                event.to_string(),
                TransitionDef {
                    target: to.to_string(),
                    actions,
                    assign,
                },
            );
        // make sure the target exists
        self.machine
            .states
            .entry(to.to_string())
            .or_insert_with(|| StateDef::new(StateKind::Atomic));
        self
    }

    pub fn options(mut self, options: MachineOptions) -> Self {
        self.machine.options = options;
        self
    }

    pub fn build(self) -> Arc<dyn Machine> {
        Arc::new(self.machine)
    }
}

impl TestMachine {
    fn snapshot_of(&self, state_name: &str, context: Context, event: ScEvent) -> StateSnapshot {
        let def = &self.states[state_name];
        let mut node = StateNodeInfo::top_level(format!("{}.{}", self.id, state_name), def.kind);
        if let Some(done_data) = &def.done_data {
            node = node.with_done_data(done_data.clone());
        }

        let mut snapshot = StateSnapshot::new(StateValue::leaf(state_name), context, event);
        snapshot.configuration = vec![node];
        snapshot.next_events = def.on.keys().cloned().collect();
        snapshot
    }
}

impl Machine for TestMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn initial_context(&self) -> Context {
        self.context.clone()
    }

    fn initial_state(&self) -> StateSnapshot {
        let mut snapshot = self.snapshot_of(&self.initial, self.context.clone(), ScEvent::init());
        snapshot.actions = self.states[&self.initial].entry.clone();
        snapshot
    }

    fn transition(&self, state: &StateSnapshot, event: &ScEvent) -> StateSnapshot {
        let current_name = match &state.value {
            StateValue::Leaf(name) => name.clone(),
            StateValue::Compound(_) => unreachable!("flat test machine has no compound states"),
        };

        let def = &self.states[&current_name];
        match def.on.get(&event.name) {
            None => {
                // no transition: same value, no actions, unchanged
                let mut next = self.snapshot_of(&current_name, state.context.clone(), event.clone());
                next.changed = false;
                next.history = Some(Box::new(truncated(state)));
                next
            }
            Some(transition) => {
                let context = match &transition.assign {
                    Some(assign) => assign(&state.context, event),
                    None => state.context.clone(),
                };
                let mut next = self.snapshot_of(&transition.target, context, event.clone());
                next.actions = transition
                    .actions
                    .iter()
                    .cloned()
                    .chain(self.states[&transition.target].entry.iter().cloned())
                    .collect();
                next.changed = true;
                next.history = Some(Box::new(truncated(state)));
                next
            }
        }
    }

    fn resolve_state(&self, value: StateValue, context: Context) -> StateSnapshot {
        let name = match &value {
            StateValue::Leaf(name) => name.clone(),
            StateValue::Compound(_) => unreachable!("flat test machine has no compound states"),
        };
        self.snapshot_of(&name, context, ScEvent::init())
    }

    fn options(&self) -> &MachineOptions {
        &self.options
    }
}

fn truncated(state: &StateSnapshot) -> StateSnapshot {
    let mut prev = state.clone();
    prev.history = None;
    prev.actions = Vec::new();
    prev
}

/// A two-state machine: `idle --PING--> pinged`
pub fn ping_machine() -> Arc<dyn Machine> {
    MachineBuilder::new("ping", "idle")
        .on("idle", "PING", "pinged")
        .build()
}

/// Convenience: a payload-less event
pub fn ev(name: &str) -> Event {
    Event::new(name)
}
