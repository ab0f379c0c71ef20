//! Interpreter core: lifecycle, update pipeline, action executor,
//! and child-actor supervision
//!
//! An [`Interpreter`] drives one machine through event-driven
//! transitions. All state mutation happens inside scheduler microtasks,
//! giving run-to-completion semantics per microstep: forward to
//! auto-forward children, compute the transition, store the snapshot,
//! execute actions, fan out to listeners, cascade termination.

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::action::{Action, ActionFn, ActionMeta, InvokeSpec, SendSpec, SendTarget};
use crate::actor::{
    ActorBehavior, ActorRef, CallbackActor, CallbackFn, CallbackHandle, DeferredFn, EventSource,
    Observer, OneShotActor, OneShotHandle, SourceActor, SourceSink, Spawnable, Subscription,
};
use crate::clock::{Clock, SystemClock, TimerId};
use crate::error::{InterpreterError, Result};
use crate::event::{Event, EventData, ScEvent, ERROR_EVENT, ERROR_PLATFORM_PREFIX};
use crate::machine::{Context, Machine, StateSnapshot, StateValue};
use crate::registry::{SessionId, SessionRegistry};
use crate::scheduler::Scheduler;
use crate::scope;

/// Sink for `log` actions
pub type Logger = Arc<dyn Fn(Option<&str>, &EventData) + Send + Sync>;

/// Optional dev-tools channel, notified on start and on every update
pub trait Inspector: Send + Sync {
    /// Called once when the interpreter starts
    fn init(&self, id: &str, session_id: &SessionId);

    /// Called after each stored snapshot, before listener fan-out
    fn update(&self, event: &ScEvent, state: &StateSnapshot);
}

/// Interpreter lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Constructed, not yet started
    NotStarted,
    /// Started and processing events
    Running,
    /// Stopped; further sends are dropped with a warning
    Stopped,
}

/// Construction options for [`interpret`]
#[derive(Clone)]
pub struct InterpreterOptions {
    /// Execute the action list of each snapshot (default true). When
    /// false, actions stay attached to the snapshot for the host to
    /// run.
    pub execute: bool,
    /// Buffer events sent before `start()` instead of rejecting them
    /// (default true)
    pub defer_events: bool,
    /// Timer primitive; defaults to a thread-based wall clock
    pub clock: Option<Arc<dyn Clock>>,
    /// Sink for `log` actions; defaults to `tracing::info!`
    pub logger: Option<Logger>,
    /// Parent actor, set automatically for spawned children
    pub parent: Option<ActorRef>,
    /// Interpreter id; defaults to the machine id
    pub id: Option<String>,
    /// Dev-tools channel
    pub inspector: Option<Arc<dyn Inspector>>,
    /// Action implementations overriding the machine's own map
    pub actions: HashMap<String, ActionFn>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            execute: true,
            defer_events: true,
            clock: None,
            logger: None,
            parent: None,
            id: None,
            inspector: None,
            actions: HashMap::new(),
        }
    }
}

/// Options for [`Interpreter::spawn`] and the free [`spawn`](crate::spawn)
#[derive(Clone, Default)]
pub struct SpawnOptions {
    /// Child id; autogenerated when absent
    pub name: Option<String>,
    /// Re-dispatch every parent event to this child
    pub auto_forward: bool,
    /// For machine children: report each child transition to the
    /// parent as an `actor.update` event
    pub sync: bool,
}

impl From<&str> for SpawnOptions {
    fn from(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

impl From<String> for SpawnOptions {
    fn from(name: String) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }
}

/// Handle identifying a registered listener, for [`Interpreter::off`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type TransitionFn = Arc<dyn Fn(&StateSnapshot, &Event) + Send + Sync>;
type ContextFn = Arc<dyn Fn(&Context, Option<&Context>) + Send + Sync>;
type EventFn = Arc<dyn Fn(&Event) + Send + Sync>;
type StopFn = Arc<dyn Fn() + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&EventData) + Send + Sync>;

#[derive(Default)]
struct ListenerSets {
    transition: Vec<(ListenerId, TransitionFn)>,
    context: Vec<(ListenerId, ContextFn)>,
    event: Vec<(ListenerId, EventFn)>,
    send: Vec<(ListenerId, EventFn)>,
    done: Vec<(ListenerId, EventFn)>,
    stop: Vec<(ListenerId, StopFn)>,
    error: Vec<(ListenerId, ErrorFn)>,
}

impl ListenerSets {
    fn remove(&mut self, id: ListenerId) {
        self.transition.retain(|(l, _)| *l != id);
        self.context.retain(|(l, _)| *l != id);
        self.event.retain(|(l, _)| *l != id);
        self.send.retain(|(l, _)| *l != id);
        self.done.retain(|(l, _)| *l != id);
        self.stop.retain(|(l, _)| *l != id);
        self.error.retain(|(l, _)| *l != id);
    }
}

// Action plus the context and event of the snapshot that produced it;
// batches execute actions against their producing state.
type BoundExec = (Action, Context, ScEvent);

struct Inner {
    machine: Arc<dyn Machine>,
    id: String,
    session_id: SessionId,
    parent: Option<ActorRef>,
    execute: bool,
    defer_events: bool,
    clock: Arc<dyn Clock>,
    logger: Logger,
    inspector: Option<Arc<dyn Inspector>>,
    action_overrides: HashMap<String, ActionFn>,
    scheduler: Scheduler,
    status: RwLock<Status>,
    state: RwLock<Option<StateSnapshot>>,
    initial: Mutex<Option<StateSnapshot>>,
    children: Mutex<HashMap<String, ActorRef>>,
    forward_to: Mutex<HashSet<String>>,
    delayed: Mutex<HashMap<String, TimerId>>,
    listeners: Mutex<ListenerSets>,
    listener_seq: AtomicU64,
    child_seq: AtomicU64,
}

/// Runtime interpreter for one machine. Cheap to clone; all clones
/// share the same session.
#[derive(Clone)]
pub struct Interpreter {
    inner: Arc<Inner>,
}

/// Construct an interpreter for `machine`. The instance is inert until
/// [`Interpreter::start`] is called.
pub fn interpret(machine: Arc<dyn Machine>, options: InterpreterOptions) -> Interpreter {
    Interpreter::new(machine, options)
}

impl Interpreter {
    /// See [`interpret`]
    pub fn new(machine: Arc<dyn Machine>, options: InterpreterOptions) -> Self {
        let id = options.id.unwrap_or_else(|| machine.id().to_string());
        let logger = options.logger.unwrap_or_else(default_logger);
        let clock = options
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));

        Self {
            inner: Arc::new(Inner {
                machine,
                id,
                session_id: SessionId::next(),
                parent: options.parent,
                execute: options.execute,
                defer_events: options.defer_events,
                clock,
                logger,
                inspector: options.inspector,
                action_overrides: options.actions,
                scheduler: Scheduler::new(options.defer_events),
                status: RwLock::new(Status::NotStarted),
                state: RwLock::new(None),
                initial: Mutex::new(None),
                children: Mutex::new(HashMap::new()),
                forward_to: Mutex::new(HashSet::new()),
                delayed: Mutex::new(HashMap::new()),
                listeners: Mutex::new(ListenerSets::default()),
                listener_seq: AtomicU64::new(0),
                child_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Interpreter id
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Process-unique session id
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Current lifecycle status
    pub fn status(&self) -> Status {
        *self.inner.status.read()
    }

    /// Parent actor, when this interpreter was spawned as a child
    pub fn parent(&self) -> Option<ActorRef> {
        self.inner.parent.clone()
    }

    /// Latest stored snapshot; `None` before `start()`. The snapshot
    /// survives `stop()` for final-state inspection.
    pub fn current(&self) -> Option<StateSnapshot> {
        self.inner.state.read().clone()
    }

    /// Live children, keyed by child id
    pub fn children(&self) -> HashMap<String, ActorRef> {
        self.inner.children.lock().clone()
    }

    /// Look up a child by id
    pub fn child(&self, id: &str) -> Option<ActorRef> {
        self.inner.children.lock().get(id).cloned()
    }

    /// This interpreter as an addressable actor handle
    pub fn as_actor(&self) -> ActorRef {
        ActorRef::new(Arc::new(ServiceHandle(self.clone())))
    }

    // -----------------------------------------------------------------
    // Lifecycle

    /// Start from the machine's initial state. Idempotent while
    /// running. Registers the session, then pushes the initial update
    /// through the scheduler so deferred pre-start events run behind
    /// it in order.
    pub fn start(&self) -> Result<()> {
        self.start_resolved(None)
    }

    /// Start from a previously captured snapshot
    pub fn start_from(&self, state: StateSnapshot) -> Result<()> {
        self.start_resolved(Some(StartPoint::Snapshot(Box::new(state))))
    }

    /// Start from a bare state value, reconstructing the snapshot with
    /// the machine's default context
    pub fn start_from_value(&self, value: StateValue) -> Result<()> {
        self.start_resolved(Some(StartPoint::Value(value)))
    }

    fn start_resolved(&self, from: Option<StartPoint>) -> Result<()> {
        if self.status() == Status::Running {
            return Ok(());
        }

        SessionRegistry::global().bind(&self.inner.session_id, self.as_actor())?;
        *self.inner.status.write() = Status::Running;

        let resolved = match from {
            None => self.initial_state(),
            Some(StartPoint::Snapshot(state)) => *state,
            Some(StartPoint::Value(value)) => scope::with_service_scope(self, || {
                self.inner
                    .machine
                    .resolve_state(value, self.inner.machine.initial_context())
            }),
        };

        if let Some(inspector) = &self.inner.inspector {
            inspector.init(&self.inner.id, &self.inner.session_id);
        }

        let this = self.clone();
        self.inner
            .scheduler
            .initialize(Box::new(move || this.update(resolved, ScEvent::init(), None)))
    }

    /// Stop the interpreter: notify stop-listeners once, drop every
    /// listener set, stop all children, cancel pending delayed sends,
    /// clear queued work, and free the session id. The last snapshot
    /// remains readable.
    pub fn stop(&self) {
        {
            let mut status = self.inner.status.write();
            if *status == Status::Stopped {
                return;
            }
            *status = Status::Stopped;
        }

        // take the whole set; stop-listeners run exactly once
        let sets = mem::take(&mut *self.inner.listeners.lock());
        for (_, listener) in sets.stop {
            listener();
        }

        let children: Vec<ActorRef> = self
            .inner
            .children
            .lock()
            .drain()
            .map(|(_, actor)| actor)
            .collect();
        for child in children {
            child.stop();
        }
        self.inner.forward_to.lock().clear();
        if let Some(state) = self.inner.state.write().as_mut() {
            state.children.clear();
        }

        let timers: Vec<TimerId> = self
            .inner
            .delayed
            .lock()
            .drain()
            .map(|(_, timer)| timer)
            .collect();
        for timer in timers {
            self.inner.clock.clear_timeout(timer);
        }

        self.inner.scheduler.clear();
        SessionRegistry::global().free(&self.inner.session_id);
    }

    // -----------------------------------------------------------------
    // Event intake

    /// Submit an event. The microstep runs before this returns when the
    /// scheduler is idle; failures from action execution or unhandled
    /// platform errors surface here.
    pub fn send(&self, event: impl Into<Event>) -> Result<()> {
        self.send_sc(ScEvent::from_event(event))
    }

    pub(crate) fn send_sc(&self, event: ScEvent) -> Result<()> {
        match self.status() {
            Status::Stopped => {
                tracing::warn!(
                    service = %self.inner.id,
                    event = %event.name,
                    "event sent to stopped service was dropped"
                );
                return Ok(());
            }
            Status::NotStarted if self.inner.defer_events => {
                tracing::warn!(
                    service = %self.inner.id,
                    event = %event.name,
                    "event deferred until service start"
                );
            }
            Status::NotStarted => {
                return Err(InterpreterError::NotStarted {
                    id: self.inner.id.clone(),
                    event: event.name,
                });
            }
            Status::Running => {}
        }

        let this = self.clone();
        self.inner
            .scheduler
            .schedule(Box::new(move || this.process_event(event)))
    }

    /// Submit a batch. The whole batch collapses into one microstep:
    /// the snapshot is folded through every event, actions stay bound
    /// to their producing state, and listeners fire exactly once with
    /// the final snapshot.
    pub fn send_batch(&self, events: Vec<Event>) -> Result<()> {
        match self.status() {
            Status::Stopped => {
                tracing::warn!(
                    service = %self.inner.id,
                    count = events.len(),
                    "batch sent to stopped service was dropped"
                );
                return Ok(());
            }
            Status::NotStarted if self.inner.defer_events => {
                tracing::warn!(
                    service = %self.inner.id,
                    count = events.len(),
                    "batch deferred until service start"
                );
            }
            Status::NotStarted => {
                return Err(InterpreterError::NotStarted {
                    id: self.inner.id.clone(),
                    event: format!("batch[{}]", events.len()),
                });
            }
            Status::Running => {}
        }
        if events.is_empty() {
            return Ok(());
        }

        let this = self.clone();
        self.inner
            .scheduler
            .schedule(Box::new(move || this.process_batch(events)))
    }

    /// A reusable thunk that sends `event` on each call and returns the
    /// snapshot after the microstep
    pub fn sender(&self, event: impl Into<Event>) -> impl Fn() -> Result<StateSnapshot> {
        let this = self.clone();
        let event = event.into();
        move || {
            this.send(event.clone())?;
            Ok(this.current().unwrap_or_else(|| this.initial_state()))
        }
    }

    /// Speculative transition: computes the next snapshot without
    /// storing it, dispatching listeners, or executing actions. The
    /// service scope is not entered, so spawns reached from here attach
    /// nothing.
    pub fn next_state(&self, event: impl Into<Event>) -> StateSnapshot {
        let event = ScEvent::from_event(event);
        let current = self.current().unwrap_or_else(|| self.initial_state());
        self.inner.machine.transition(&current, &event)
    }

    /// The machine's initial snapshot, memoized
    pub fn initial_state(&self) -> StateSnapshot {
        if let Some(state) = self.inner.initial.lock().clone() {
            return state;
        }
        let state = scope::with_service_scope(self, || self.inner.machine.initial_state());
        *self.inner.initial.lock() = Some(state.clone());
        state
    }

    // -----------------------------------------------------------------
    // Microstep pipeline

    fn process_event(&self, event: ScEvent) -> Result<()> {
        self.forward(&event)?;

        if event.is_error() && !self.handles(&event) {
            return self.escalate(event);
        }

        let current = self.state_required();
        let next =
            scope::with_service_scope(self, || self.inner.machine.transition(&current, &event));
        self.update(next, event, None)
    }

    fn process_batch(&self, events: Vec<Event>) -> Result<()> {
        let mut state = self.state_required();
        let mut changed = false;
        let mut bound: Vec<BoundExec> = Vec::new();
        let mut last = None;

        for event in events {
            let event = ScEvent::from_event(event);
            self.forward(&event)?;
            let next =
                scope::with_service_scope(self, || self.inner.machine.transition(&state, &event));
            for action in &next.actions {
                bound.push((action.clone(), next.context.clone(), event.clone()));
            }
            changed = changed || next.changed;
            state = next;
            last = Some(event);
        }

        let last = last.expect("batch is checked non-empty");
        state.changed = changed;
        state.actions = bound.iter().map(|(action, _, _)| action.clone()).collect();
        self.update(state, last, Some(bound))
    }

    fn update(
        &self,
        mut state: StateSnapshot,
        event: ScEvent,
        bound: Option<Vec<BoundExec>>,
    ) -> Result<()> {
        state.session_id = Some(self.inner.session_id.clone());
        state.children = self.children();
        *self.inner.state.write() = Some(state.clone());

        if self.inner.execute {
            match bound {
                None => {
                    let context = state.context.clone();
                    for action in state.actions.clone() {
                        self.exec_action(&action, &context, &event, &state)?;
                    }
                }
                Some(list) => {
                    for (action, context, cause) in list {
                        self.exec_action(&action, &context, &cause, &state)?;
                    }
                }
            }
        }

        // actions may have spawned or stopped children; refresh the
        // mirror before anything observes the snapshot
        let children = self.children();
        let state = {
            let mut stored = self.inner.state.write();
            match stored.as_mut() {
                Some(current) => {
                    current.children = children;
                    current.clone()
                }
                None => state,
            }
        };

        if let Some(inspector) = &self.inner.inspector {
            inspector.update(&event, &state);
        }

        let (event_listeners, transition_listeners, context_listeners) = {
            let sets = self.inner.listeners.lock();
            (
                sets.event.clone(),
                sets.transition.clone(),
                sets.context.clone(),
            )
        };
        for (_, listener) in event_listeners {
            listener(&state.event.data);
        }
        for (_, listener) in transition_listeners {
            listener(&state, &state.event.data);
        }
        let previous_context = state.history.as_ref().map(|h| h.context.clone());
        for (_, listener) in context_listeners {
            listener(&state.context, previous_context.as_ref());
        }

        if state.is_done() {
            let done_data = state
                .top_level_final()
                .and_then(|node| node.done_data.as_ref())
                .map(|data| data.resolve(&state.context, &event));
            let done_event = Event::done(&self.inner.id, done_data);

            let done_listeners = { self.inner.listeners.lock().done.clone() };
            for (_, listener) in done_listeners {
                listener(&done_event);
            }
            self.stop();
        }

        Ok(())
    }

    // -----------------------------------------------------------------
    // Action executor

    fn exec_action(
        &self,
        action: &Action,
        context: &Context,
        event: &ScEvent,
        state: &StateSnapshot,
    ) -> Result<()> {
        let resolved = self
            .inner
            .action_overrides
            .get(action.kind())
            .cloned()
            .or_else(|| self.inner.machine.options().actions.get(action.kind()).cloned())
            .or_else(|| match action {
                Action::Custom(custom) => custom.exec.clone(),
                _ => None,
            });

        if let Some(exec) = resolved {
            let meta = ActionMeta {
                action,
                state,
                event,
            };
            return match exec(context, &event.data.payload, meta) {
                Ok(()) => Ok(()),
                Err(err) => {
                    // escalate to the parent, then fail the microstep
                    if let Some(parent) = &self.inner.parent {
                        let error_event =
                            Event::with_payload(ERROR_EVENT, json!(err.message.clone()));
                        parent.send(ScEvent::with_origin(error_event, self.as_actor()));
                    }
                    Err(InterpreterError::ActionFailed {
                        id: self.inner.id.clone(),
                        action: action.kind().to_string(),
                        source: err,
                    })
                }
            };
        }

        match action {
            Action::Send(spec) => self.run_send_action(spec),
            Action::Cancel { send_id } => {
                self.cancel_delayed(send_id);
                Ok(())
            }
            Action::Start(spec) => self.start_invoke(spec, context, event),
            Action::Stop { child_id } => {
                self.stop_child(child_id);
                Ok(())
            }
            Action::Log { label, value } => {
                (self.inner.logger)(label.as_deref(), value);
                Ok(())
            }
            Action::Assign => Ok(()),
            Action::Custom(custom) => {
                tracing::warn!(
                    service = %self.inner.id,
                    action = %custom.kind,
                    "no implementation found for action type"
                );
                Ok(())
            }
        }
    }

    fn run_send_action(&self, spec: &SendSpec) -> Result<()> {
        let send_listeners = { self.inner.listeners.lock().send.clone() };
        for (_, listener) in send_listeners {
            listener(&spec.event);
        }

        if let Some(delay) = spec.delay {
            self.defer_delayed(spec.clone(), delay);
            return Ok(());
        }
        match &spec.to {
            Some(target) => self.send_to(spec.event.clone(), target),
            None => self.send_sc(ScEvent::from_event(spec.event.clone())),
        }
    }

    fn defer_delayed(&self, spec: SendSpec, delay: Duration) {
        let this = self.clone();
        let send_id = spec.id.clone();
        let pending_id = send_id.clone();

        let timer = self.inner.clock.set_timeout(
            delay,
            Box::new(move || {
                this.inner.delayed.lock().remove(&pending_id);
                let result = match &spec.to {
                    Some(target) => this.send_to(spec.event.clone(), target),
                    None => this.send_sc(ScEvent::from_event(spec.event.clone())),
                };
                if let Err(err) = result {
                    tracing::warn!(
                        service = %this.inner.id,
                        send_id = %pending_id,
                        %err,
                        "delayed send failed"
                    );
                }
            }),
        );
        self.inner.delayed.lock().insert(send_id, timer);
    }

    fn cancel_delayed(&self, send_id: &str) {
        if let Some(timer) = self.inner.delayed.lock().remove(send_id) {
            self.inner.clock.clear_timeout(timer);
        }
    }

    fn start_invoke(&self, spec: &InvokeSpec, context: &Context, event: &ScEvent) -> Result<()> {
        let factory = match self.inner.machine.options().services.get(&spec.src) {
            Some(factory) => factory.clone(),
            None => {
                tracing::warn!(
                    service = %self.inner.id,
                    src = %spec.src,
                    invoke = %spec.id,
                    "no service factory found for invoke source"
                );
                return Ok(());
            }
        };

        match factory(context, event, spec) {
            Ok(entity) => {
                self.spawn(
                    entity,
                    SpawnOptions {
                        name: Some(spec.id.clone()),
                        auto_forward: spec.auto_forward,
                        sync: false,
                    },
                );
                Ok(())
            }
            Err(err) => {
                // the parent machine decides whether to handle it
                self.send_sc(ScEvent::from_event(Event::error(
                    &spec.id,
                    json!(err.message),
                )))
            }
        }
    }

    // -----------------------------------------------------------------
    // Supervision

    /// Spawn an entity as a supervised child. A second spawn under an
    /// existing child id stops the prior actor and replaces the entry.
    /// Children are started before this returns.
    pub fn spawn(&self, entity: Spawnable, options: impl Into<SpawnOptions>) -> ActorRef {
        let options = options.into();
        let name = options.name.clone().unwrap_or_else(|| {
            format!(
                "{}:child-{}",
                self.inner.id,
                self.inner.child_seq.fetch_add(1, Ordering::Relaxed)
            )
        });

        match entity {
            Spawnable::Machine(machine) => self.spawn_machine(machine, &name, &options),
            Spawnable::Deferred(body) => self.spawn_deferred(body, &name, options.auto_forward),
            Spawnable::Callback(body) => self.spawn_callback(body, &name, options.auto_forward),
            Spawnable::Source(source) => self.spawn_source(source, &name, options.auto_forward),
            Spawnable::Actor(actor) => {
                self.register_child(&name, actor.clone(), options.auto_forward);
                actor
            }
        }
    }

    /// Stop a named child and remove it from supervision; no-op when
    /// the id is unknown
    pub fn stop_child(&self, id: &str) {
        let child = self.child(id);
        if let Some(child) = child {
            self.remove_child(id);
            child.stop();
        }
    }

    pub(crate) fn remove_child(&self, id: &str) {
        self.inner.children.lock().remove(id);
        self.inner.forward_to.lock().remove(id);
        if let Some(state) = self.inner.state.write().as_mut() {
            state.children.remove(id);
        }
    }

    fn register_child(&self, id: &str, actor: ActorRef, auto_forward: bool) {
        let prior = self.inner.children.lock().insert(id.to_string(), actor.clone());
        if let Some(prior) = prior {
            prior.stop();
        }
        {
            let mut forward_to = self.inner.forward_to.lock();
            if auto_forward {
                forward_to.insert(id.to_string());
            } else {
                // a replacement child does not inherit the prior flag
                forward_to.remove(id);
            }
        }
        if let Some(state) = self.inner.state.write().as_mut() {
            state.children.insert(id.to_string(), actor);
        }
    }

    fn spawn_machine(
        &self,
        machine: Arc<dyn Machine>,
        name: &str,
        options: &SpawnOptions,
    ) -> ActorRef {
        let child = Interpreter::new(
            machine,
            InterpreterOptions {
                parent: Some(self.as_actor()),
                id: Some(name.to_string()),
                clock: Some(self.inner.clock.clone()),
                logger: Some(self.inner.logger.clone()),
                ..InterpreterOptions::default()
            },
        );

        // completion cascades to the parent as a done.invoke event
        let parent = self.clone();
        let child_id = name.to_string();
        let child_actor = child.as_actor();
        child.on_done(move |done_event| {
            parent.remove_child(&child_id);
            if let Err(err) =
                parent.send_sc(ScEvent::with_origin(done_event.clone(), child_actor.clone()))
            {
                tracing::warn!(service = %parent.inner.id, %err, "done cascade failed");
            }
        });

        if options.sync {
            let parent = self.clone();
            let child_id = name.to_string();
            child.on_transition(move |state, _| {
                let update = Event::with_payload(
                    crate::event::UPDATE_EVENT,
                    json!({ "id": child_id, "value": state.value }),
                );
                if let Err(err) = parent.send(update) {
                    tracing::warn!(service = %parent.inner.id, %err, "sync update failed");
                }
            });
        }

        let actor = child.as_actor();
        self.register_child(name, actor.clone(), options.auto_forward);

        if let Err(err) = child.start() {
            let _ = self.send_sc(ScEvent::from_event(Event::error(
                name,
                json!(err.to_string()),
            )));
        }
        actor
    }

    fn spawn_deferred(&self, body: DeferredFn, name: &str, auto_forward: bool) -> ActorRef {
        let one_shot = OneShotActor::new(name);
        let actor = ActorRef::new(one_shot.clone() as Arc<dyn ActorBehavior>);
        self.register_child(name, actor.clone(), auto_forward);

        let parent = self.clone();
        let child_id = name.to_string();
        let origin = actor.clone();
        let handle = OneShotHandle::wire(
            one_shot,
            Arc::new(move |outcome| {
                parent.remove_child(&child_id);
                let event = match outcome {
                    Ok(value) => Event::done(&child_id, Some(value)),
                    Err(data) => Event::error(&child_id, data),
                };
                if let Err(err) = parent.send_sc(ScEvent::with_origin(event, origin.clone())) {
                    tracing::warn!(service = %parent.inner.id, %err, "one-shot settlement failed");
                }
            }),
        );

        body(handle);
        actor
    }

    fn spawn_callback(&self, body: CallbackFn, name: &str, auto_forward: bool) -> ActorRef {
        let callback = CallbackActor::new(name);
        let actor = ActorRef::new(callback.clone() as Arc<dyn ActorBehavior>);
        self.register_child(name, actor.clone(), auto_forward);

        let parent = self.clone();
        let origin = actor.clone();
        let handle = CallbackHandle::wire(
            callback.clone(),
            Arc::new(move |event: Event| {
                if let Err(err) = parent.send_sc(ScEvent::with_origin(event, origin.clone())) {
                    tracing::warn!(service = %parent.inner.id, %err, "callback emit failed");
                }
            }),
        );

        match body(handle) {
            Ok(Some(disposer)) => callback.set_disposer(disposer),
            Ok(None) => {}
            Err(err) => {
                let _ = self.send_sc(ScEvent::from_event(Event::error(
                    name,
                    json!(err.message),
                )));
            }
        }
        actor
    }

    fn spawn_source(&self, source: Box<dyn EventSource>, name: &str, auto_forward: bool) -> ActorRef {
        let source_actor = SourceActor::new(name);
        let actor = ActorRef::new(source_actor.clone() as Arc<dyn ActorBehavior>);
        self.register_child(name, actor.clone(), auto_forward);

        let parent = self.clone();
        let origin = actor.clone();
        let next = Arc::new(move |event: Event| {
            if let Err(err) = parent.send_sc(ScEvent::with_origin(event, origin.clone())) {
                tracing::warn!(service = %parent.inner.id, %err, "source emit failed");
            }
        });

        let parent = self.clone();
        let child_id = name.to_string();
        let origin = actor.clone();
        let error = Arc::new(move |data: EventData| {
            parent.remove_child(&child_id);
            let event = Event::error(&child_id, data);
            if let Err(err) = parent.send_sc(ScEvent::with_origin(event, origin.clone())) {
                tracing::warn!(service = %parent.inner.id, %err, "source failure cascade failed");
            }
        });

        let parent = self.clone();
        let child_id = name.to_string();
        let complete = Arc::new(move || {
            parent.remove_child(&child_id);
        });

        let disposer = source.attach(SourceSink::wire(next, error, complete));
        source_actor.set_disposer(disposer);
        actor
    }

    // Re-dispatch an incoming event to every auto-forward child. A
    // forward-set id without a live child is a supervision bug.
    fn forward(&self, event: &ScEvent) -> Result<()> {
        let targets: Vec<String> = self.inner.forward_to.lock().iter().cloned().collect();
        for id in targets {
            let child = self.child(&id).ok_or_else(|| {
                InterpreterError::ForwardTargetMissing {
                    id: self.inner.id.clone(),
                    child: id.clone(),
                    event: event.name.clone(),
                }
            })?;
            child.send(event.clone());
        }
        Ok(())
    }

    fn send_to(&self, event: Event, target: &SendTarget) -> Result<()> {
        let resolved = match target {
            SendTarget::Parent => self.inner.parent.clone(),
            SendTarget::Actor(actor) => Some(actor.clone()),
            SendTarget::Id(id) => self
                .child(id)
                .or_else(|| SessionRegistry::global().get(id)),
        };

        let Some(actor) = resolved else {
            if matches!(target, SendTarget::Parent) {
                tracing::warn!(
                    service = %self.inner.id,
                    event = %event.name,
                    "send to parent ignored; service has no parent"
                );
                return Ok(());
            }
            return Err(InterpreterError::UnknownSendTarget {
                id: self.inner.id.clone(),
                target: format!("{target:?}"),
                event: event.name,
            });
        };

        let event = if event.name == ERROR_EVENT {
            Event::with_payload(crate::event::error_platform(&self.inner.id), event.payload)
        } else {
            event
        };
        actor.send(ScEvent::with_origin(event, self.as_actor()));
        Ok(())
    }

    // -----------------------------------------------------------------
    // Error escalation

    fn handles(&self, event: &ScEvent) -> bool {
        self.current()
            .map(|state| {
                state
                    .next_events
                    .iter()
                    .any(|name| name == &event.name || name.starts_with(ERROR_PLATFORM_PREFIX))
            })
            .unwrap_or(false)
    }

    fn escalate(&self, event: ScEvent) -> Result<()> {
        let error_listeners = { self.inner.listeners.lock().error.clone() };
        if error_listeners.is_empty() {
            return Err(InterpreterError::UnhandledError {
                id: self.inner.id.clone(),
                event: event.name,
                data: event.data.payload,
            });
        }
        for (_, listener) in error_listeners {
            listener(&event.data.payload);
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Listeners and subscription

    fn add_listener(&self, install: impl FnOnce(&mut ListenerSets, ListenerId)) -> ListenerId {
        let id = ListenerId(self.inner.listener_seq.fetch_add(1, Ordering::Relaxed));
        install(&mut self.inner.listeners.lock(), id);
        id
    }

    /// Listen for each stored snapshot
    pub fn on_transition(
        &self,
        f: impl Fn(&StateSnapshot, &Event) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_listener(|sets, id| sets.transition.push((id, Arc::new(f))))
    }

    /// Listen for context updates; receives the current context and
    /// the previous snapshot's context
    pub fn on_change(
        &self,
        f: impl Fn(&Context, Option<&Context>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_listener(|sets, id| sets.context.push((id, Arc::new(f))))
    }

    /// Listen for every processed event
    pub fn on_event(&self, f: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        self.add_listener(|sets, id| sets.event.push((id, Arc::new(f))))
    }

    /// Listen for events dispatched by this service's send actions
    pub fn on_send(&self, f: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        self.add_listener(|sets, id| sets.send.push((id, Arc::new(f))))
    }

    /// Listen for terminal completion; receives the done event
    pub fn on_done(&self, f: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        self.add_listener(|sets, id| sets.done.push((id, Arc::new(f))))
    }

    /// Listen for `stop()`; invoked exactly once
    pub fn on_stop(&self, f: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.add_listener(|sets, id| sets.stop.push((id, Arc::new(f))))
    }

    /// Listen for escalated platform errors
    pub fn on_error(&self, f: impl Fn(&EventData) + Send + Sync + 'static) -> ListenerId {
        self.add_listener(|sets, id| sets.error.push((id, Arc::new(f))))
    }

    /// Remove a listener registered by any `on_*` method
    pub fn off(&self, id: ListenerId) {
        self.inner.listeners.lock().remove(id);
    }

    /// Subscribe an observer: `next` binds as a transition listener,
    /// `error` as an error listener, `complete` as a done listener.
    /// While running, the current snapshot is delivered synchronously
    /// before this returns. Subscribing to a stopped interpreter calls
    /// `complete` immediately.
    pub fn subscribe(&self, observer: impl Into<Observer>) -> Subscription {
        let observer = observer.into();

        if self.status() == Status::Stopped {
            if let Some(complete) = &observer.complete {
                complete();
            }
            return Subscription::empty();
        }

        let mut ids = Vec::new();
        {
            let mut sets = self.inner.listeners.lock();
            if let Some(next) = observer.next.clone() {
                let id = ListenerId(self.inner.listener_seq.fetch_add(1, Ordering::Relaxed));
                sets.transition
                    .push((id, Arc::new(move |state: &StateSnapshot, _: &Event| next(state))));
                ids.push(id);
            }
            if let Some(error) = observer.error.clone() {
                let id = ListenerId(self.inner.listener_seq.fetch_add(1, Ordering::Relaxed));
                sets.error.push((id, error));
                ids.push(id);
            }
            if let Some(complete) = observer.complete.clone() {
                let id = ListenerId(self.inner.listener_seq.fetch_add(1, Ordering::Relaxed));
                sets.done.push((id, Arc::new(move |_: &Event| complete())));
                ids.push(id);
            }
        }

        if self.status() == Status::Running {
            if let (Some(next), Some(state)) = (&observer.next, self.current()) {
                next(&state);
            }
        }

        let this = self.clone();
        Subscription::new(move || {
            for id in ids {
                this.off(id);
            }
        })
    }

    fn state_required(&self) -> StateSnapshot {
        self.inner
            .state
            .read()
            .clone()
            .expect("interpreter processed an event before its initial update")
    }
}

enum StartPoint {
    Snapshot(Box<StateSnapshot>),
    Value(StateValue),
}

fn default_logger() -> Logger {
    Arc::new(|label: Option<&str>, value: &EventData| match label {
        Some(label) => tracing::info!(target: "chorus::log", "{label}: {value}"),
        None => tracing::info!(target: "chorus::log", "{value}"),
    })
}

struct ServiceHandle(Interpreter);

impl ActorBehavior for ServiceHandle {
    fn id(&self) -> String {
        self.0.inner.id.clone()
    }

    fn send(&self, event: ScEvent) {
        if let Err(err) = self.0.send_sc(event) {
            tracing::warn!(service = %self.0.inner.id, %err, "delivery to service failed");
        }
    }

    fn subscribe(&self, observer: Observer) -> Subscription {
        self.0.subscribe(observer)
    }

    fn stop(&self) {
        self.0.stop();
    }
}
