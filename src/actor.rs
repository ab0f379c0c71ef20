//! Actor handles and adapter variants
//!
//! Everything an interpreter supervises conforms to one shape: an id,
//! `send`, `subscribe`, `stop`. The adapters here wrap the non-machine
//! entities a statechart can spawn (one-shot producers, callback
//! workers, event sources) plus the null actor handed out when spawn
//! is misused at top level.

use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ExecError;
use crate::event::{Event, EventData, ScEvent};
use crate::machine::{Machine, StateSnapshot};

/// Uniform behavior of anything addressable by the interpreter
pub trait ActorBehavior: Send + Sync {
    /// The actor's id
    fn id(&self) -> String;

    /// Deliver an event. Adapters that consume no events ignore it.
    fn send(&self, event: ScEvent);

    /// Observe the actor's state stream. Adapters without a state
    /// stream return an inert subscription.
    fn subscribe(&self, _observer: Observer) -> Subscription {
        Subscription::empty()
    }

    /// Release the actor's resources. Optional; default is a no-op.
    fn stop(&self) {}
}

/// Cheap clonable handle to an actor
#[derive(Clone)]
pub struct ActorRef {
    inner: Arc<dyn ActorBehavior>,
}

impl ActorRef {
    /// Wrap a behavior in a handle
    pub fn new(behavior: Arc<dyn ActorBehavior>) -> Self {
        Self { inner: behavior }
    }

    /// The inert actor used for spawn misuse outside a service scope
    pub fn null(id: impl Into<String>) -> Self {
        Self::new(Arc::new(NullActor { id: id.into() }))
    }

    /// The actor's id
    pub fn id(&self) -> String {
        self.inner.id()
    }

    /// Deliver an event
    pub fn send(&self, event: ScEvent) {
        self.inner.send(event);
    }

    /// Observe the actor
    pub fn subscribe(&self, observer: Observer) -> Subscription {
        self.inner.subscribe(observer)
    }

    /// Stop the actor
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Serializable identity, for logs and inspection
    pub fn to_json(&self) -> EventData {
        json!({ "id": self.id() })
    }

    /// Handle identity comparison
    pub fn ptr_eq(&self, other: &ActorRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorRef").field(&self.id()).finish()
    }
}

/// State-stream observer: `next` per snapshot, `error` on escalated
/// failures, `complete` on termination.
#[derive(Clone, Default)]
pub struct Observer {
    pub(crate) next: Option<Arc<dyn Fn(&StateSnapshot) + Send + Sync>>,
    pub(crate) error: Option<Arc<dyn Fn(&EventData) + Send + Sync>>,
    pub(crate) complete: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Observer {
    /// Empty observer; attach callbacks with the builder methods
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the snapshot callback
    pub fn on_next(mut self, f: impl Fn(&StateSnapshot) + Send + Sync + 'static) -> Self {
        self.next = Some(Arc::new(f));
        self
    }

    /// Set the error callback
    pub fn on_error(mut self, f: impl Fn(&EventData) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Set the completion callback
    pub fn on_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.complete = Some(Arc::new(f));
        self
    }
}

impl<F> From<F> for Observer
where
    F: Fn(&StateSnapshot) + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Observer::new().on_next(f)
    }
}

/// Handle returned by `subscribe`; unsubscribing twice is a no-op
pub struct Subscription {
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// A subscription with a teardown thunk
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A subscription with nothing to tear down
    pub fn empty() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Remove the observer bindings; idempotent
    pub fn unsubscribe(&self) {
        if let Some(teardown) = self.teardown.lock().take() {
            teardown();
        }
    }
}

/// Teardown thunk for callback and source adapters
pub type Disposer = Box<dyn FnOnce() + Send>;

/// Body of a callback child: receives its handle, may return a disposer
pub type CallbackFn =
    Box<dyn FnOnce(CallbackHandle) -> Result<Option<Disposer>, ExecError> + Send>;

/// Body of a one-shot child: receives the completion handle
pub type DeferredFn = Box<dyn FnOnce(OneShotHandle) + Send>;

/// What a statechart can spawn, declared by tag
pub enum Spawnable {
    /// A nested machine, run by a child interpreter
    Machine(Arc<dyn Machine>),
    /// A one-shot asynchronous producer settled through [`OneShotHandle`]
    Deferred(DeferredFn),
    /// A callback worker wired through [`CallbackHandle`]
    Callback(CallbackFn),
    /// A push stream of events
    Source(Box<dyn EventSource>),
    /// A pre-built actor, adopted verbatim
    Actor(ActorRef),
}

impl From<Arc<dyn Machine>> for Spawnable {
    fn from(machine: Arc<dyn Machine>) -> Self {
        Self::Machine(machine)
    }
}

impl From<ActorRef> for Spawnable {
    fn from(actor: ActorRef) -> Self {
        Self::Actor(actor)
    }
}

impl fmt::Debug for Spawnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Machine(_) => "Machine",
            Self::Deferred(_) => "Deferred",
            Self::Callback(_) => "Callback",
            Self::Source(_) => "Source",
            Self::Actor(_) => "Actor",
        };
        f.write_str(tag)
    }
}

/// Push stream of events that a statechart can subscribe to as a child
/// actor. Each value the source emits is forwarded to the parent as an
/// event; completion closes the actor.
pub trait EventSource: Send + Sync {
    /// Attach a sink; the returned disposer detaches it
    fn attach(&self, sink: SourceSink) -> Disposer;
}

/// Sink handed to an [`EventSource`] on attach
#[derive(Clone)]
pub struct SourceSink {
    next: Arc<dyn Fn(Event) + Send + Sync>,
    error: Arc<dyn Fn(EventData) + Send + Sync>,
    complete: Arc<dyn Fn() + Send + Sync>,
}

impl SourceSink {
    pub(crate) fn wire(
        next: Arc<dyn Fn(Event) + Send + Sync>,
        error: Arc<dyn Fn(EventData) + Send + Sync>,
        complete: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            next,
            error,
            complete,
        }
    }

    /// Emit the next event
    pub fn next(&self, event: impl Into<Event>) {
        (self.next)(event.into());
    }

    /// Fail the stream
    pub fn error(&self, data: EventData) {
        (self.error)(data);
    }

    /// Close the stream
    pub fn complete(&self) {
        (self.complete)();
    }
}

// ---------------------------------------------------------------------
// Adapters

struct NullActor {
    id: String,
}

impl ActorBehavior for NullActor {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn send(&self, event: ScEvent) {
        tracing::debug!(actor = %self.id, event = %event.name, "null actor dropped event");
    }
}

/// One-shot producer adapter: settled at most once, never after stop
pub struct OneShotActor {
    id: String,
    settled: AtomicBool,
    cancelled: AtomicBool,
}

impl OneShotActor {
    pub(crate) fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            settled: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }
}

impl ActorBehavior for OneShotActor {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn send(&self, _event: ScEvent) {
        // one-shot producers consume no events
    }

    fn stop(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// Completion handle for a one-shot child. Clonable so the producer can
/// settle from wherever its work finishes; only the first settlement
/// lands.
#[derive(Clone)]
pub struct OneShotHandle {
    actor: Arc<OneShotActor>,
    deliver: Arc<dyn Fn(Result<EventData, EventData>) + Send + Sync>,
}

impl OneShotHandle {
    pub(crate) fn wire(
        actor: Arc<OneShotActor>,
        deliver: Arc<dyn Fn(Result<EventData, EventData>) + Send + Sync>,
    ) -> Self {
        Self { actor, deliver }
    }

    /// Settle successfully with a value
    pub fn resolve(&self, value: EventData) {
        self.settle(Ok(value));
    }

    /// Settle with an error
    pub fn reject(&self, error: EventData) {
        self.settle(Err(error));
    }

    fn settle(&self, outcome: Result<EventData, EventData>) {
        if self.actor.settled.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.actor.cancelled.load(Ordering::Acquire) {
            return;
        }
        (self.deliver)(outcome);
    }
}

/// Callback worker adapter: receives parent events through registered
/// handlers, emits events through its handle's sender.
pub struct CallbackActor {
    id: String,
    receivers: Mutex<Vec<Arc<dyn Fn(&Event) + Send + Sync>>>,
    disposer: Mutex<Option<Disposer>>,
    stopped: AtomicBool,
}

impl CallbackActor {
    pub(crate) fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            receivers: Mutex::new(Vec::new()),
            disposer: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub(crate) fn set_disposer(&self, disposer: Disposer) {
        *self.disposer.lock() = Some(disposer);
    }
}

impl ActorBehavior for CallbackActor {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn send(&self, event: ScEvent) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let receivers = self.receivers.lock().clone();
        for receiver in receivers {
            receiver(&event.data);
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        if let Some(disposer) = self.disposer.lock().take() {
            disposer();
        }
    }
}

/// Handle given to a callback child's body
#[derive(Clone)]
pub struct CallbackHandle {
    actor: Arc<CallbackActor>,
    sender: Arc<dyn Fn(Event) + Send + Sync>,
}

impl CallbackHandle {
    pub(crate) fn wire(actor: Arc<CallbackActor>, sender: Arc<dyn Fn(Event) + Send + Sync>) -> Self {
        Self { actor, sender }
    }

    /// Emit an event to the parent
    pub fn send(&self, event: impl Into<Event>) {
        (self.sender)(event.into());
    }

    /// Register a handler for events the parent sends to this child
    pub fn on_receive(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.actor.receivers.lock().push(Arc::new(f));
    }
}

/// Event-source adapter: owns the stream subscription until stopped
pub struct SourceActor {
    id: String,
    disposer: Mutex<Option<Disposer>>,
}

impl SourceActor {
    pub(crate) fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            disposer: Mutex::new(None),
        })
    }

    pub(crate) fn set_disposer(&self, disposer: Disposer) {
        *self.disposer.lock() = Some(disposer);
    }
}

impl ActorBehavior for SourceActor {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn send(&self, _event: ScEvent) {
        // sources are one-directional
    }

    fn stop(&self) {
        if let Some(disposer) = self.disposer.lock().take() {
            disposer();
        }
    }
}
