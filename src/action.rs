//! Action objects attached to state snapshots
//!
//! Transitions describe their effects as a list of tagged [`Action`]
//! records; the interpreter's executor interprets them. Built-in kinds
//! cover sending (immediate and delayed), cancellation, child
//! start/stop, and logging. Anything else resolves through the
//! machine's implementation map or the action's own executable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::actor::{ActorRef, Spawnable};
use crate::error::ExecError;
use crate::event::{Event, EventData, ScEvent};
use crate::machine::{Context, StateSnapshot};

/// Reserved action type names
pub mod types {
    /// Immediate or delayed send
    pub const SEND: &str = "chorus.send";
    /// Cancel a pending delayed send
    pub const CANCEL: &str = "chorus.cancel";
    /// Start an invoked child actor
    pub const START: &str = "chorus.start";
    /// Stop a named child actor
    pub const STOP: &str = "chorus.stop";
    /// Emit a log line through the configured logger
    pub const LOG: &str = "chorus.log";
    /// Context assignment marker; applied by the machine, inert here
    pub const ASSIGN: &str = "chorus.assign";
}

/// Executable for a named or inline action implementation
pub type ActionFn =
    Arc<dyn Fn(&Context, &EventData, ActionMeta<'_>) -> Result<(), ExecError> + Send + Sync>;

/// Factory constructing the spawnable entity for an invoke source.
/// Receives the invoking context and event plus the invoke descriptor
/// (child id and initialization payload).
pub type ServiceFn =
    Arc<dyn Fn(&Context, &ScEvent, &InvokeSpec) -> Result<Spawnable, ExecError> + Send + Sync>;

/// Extra context handed to action executables
pub struct ActionMeta<'a> {
    /// The action record being executed
    pub action: &'a Action,
    /// The snapshot whose action list is running
    pub state: &'a StateSnapshot,
    /// The normalized event that produced the snapshot
    pub event: &'a ScEvent,
}

/// One side effect of a transition
#[derive(Clone)]
pub enum Action {
    /// Dispatch an event, now or after a delay
    Send(SendSpec),
    /// Retract a pending delayed send by its send-id
    Cancel {
        /// The send-id to cancel
        send_id: String,
    },
    /// Construct and start an invoked child
    Start(InvokeSpec),
    /// Stop the named child
    Stop {
        /// Child id to stop
        child_id: String,
    },
    /// Log a value through the interpreter's logger
    Log {
        /// Optional label
        label: Option<String>,
        /// Resolved log value
        value: EventData,
    },
    /// Context assignment already applied during transition computation
    Assign,
    /// Host-defined action, resolved via the implementation map
    Custom(CustomAction),
}

impl Action {
    /// The action's type discriminator, used for implementation lookup
    pub fn kind(&self) -> &str {
        match self {
            Self::Send(_) => types::SEND,
            Self::Cancel { .. } => types::CANCEL,
            Self::Start(_) => types::START,
            Self::Stop { .. } => types::STOP,
            Self::Log { .. } => types::LOG,
            Self::Assign => types::ASSIGN,
            Self::Custom(custom) => &custom.kind,
        }
    }

    /// Immediate self-send
    pub fn send(event: impl Into<Event>) -> Self {
        Self::Send(SendSpec::new(event))
    }

    /// Cancel a pending delayed send
    pub fn cancel(send_id: impl Into<String>) -> Self {
        Self::Cancel {
            send_id: send_id.into(),
        }
    }

    /// Log a value
    pub fn log(value: EventData) -> Self {
        Self::Log { label: None, value }
    }

    /// Log a labelled value
    pub fn log_labelled(label: impl Into<String>, value: EventData) -> Self {
        Self::Log {
            label: Some(label.into()),
            value,
        }
    }

    /// A named custom action with no inline executable
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom(CustomAction {
            kind: kind.into(),
            exec: None,
            params: EventData::Null,
        })
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send(spec) => f.debug_tuple("Send").field(spec).finish(),
            Self::Cancel { send_id } => f.debug_tuple("Cancel").field(send_id).finish(),
            Self::Start(spec) => f.debug_tuple("Start").field(spec).finish(),
            Self::Stop { child_id } => f.debug_tuple("Stop").field(child_id).finish(),
            Self::Log { label, value } => f
                .debug_struct("Log")
                .field("label", label)
                .field("value", value)
                .finish(),
            Self::Assign => f.write_str("Assign"),
            Self::Custom(custom) => f.debug_tuple("Custom").field(&custom.kind).finish(),
        }
    }
}

/// Specification of a send action
#[derive(Debug, Clone)]
pub struct SendSpec {
    /// Event to dispatch
    pub event: Event,
    /// Destination; `None` is a self-send
    pub to: Option<SendTarget>,
    /// Delay before dispatch; `None` dispatches within the microstep
    pub delay: Option<Duration>,
    /// Send-id for cancellation; defaults to the event name
    pub id: String,
}

impl SendSpec {
    /// Immediate self-send of `event`
    pub fn new(event: impl Into<Event>) -> Self {
        let event = event.into();
        let id = event.name.clone();
        Self {
            event,
            to: None,
            delay: None,
            id,
        }
    }

    /// Address a target
    pub fn to(mut self, target: SendTarget) -> Self {
        self.to = Some(target);
        self
    }

    /// Defer dispatch by `delay`
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Override the send-id used for cancellation
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Destination of a send action
#[derive(Clone)]
pub enum SendTarget {
    /// The spawning parent actor
    Parent,
    /// A child id, falling back to a registry session id
    Id(String),
    /// A concrete actor handle
    Actor(ActorRef),
}

impl fmt::Debug for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent => f.write_str("Parent"),
            Self::Id(id) => f.debug_tuple("Id").field(id).finish(),
            Self::Actor(actor) => f.debug_tuple("Actor").field(&actor.id()).finish(),
        }
    }
}

impl From<&str> for SendTarget {
    fn from(id: &str) -> Self {
        if id == "parent" {
            Self::Parent
        } else {
            Self::Id(id.to_string())
        }
    }
}

/// Descriptor of an invoked child
#[derive(Debug, Clone)]
pub struct InvokeSpec {
    /// Child id; the key under which the actor is supervised
    pub id: String,
    /// Service factory name, looked up in the machine options
    pub src: String,
    /// Re-dispatch every parent event to this child
    pub auto_forward: bool,
    /// Initialization payload passed to the factory
    pub data: Option<EventData>,
}

impl InvokeSpec {
    /// Invoke `src` under the child id `id`
    pub fn new(id: impl Into<String>, src: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            src: src.into(),
            auto_forward: false,
            data: None,
        }
    }

    /// Enable auto-forwarding of parent events
    pub fn auto_forward(mut self) -> Self {
        self.auto_forward = true;
        self
    }

    /// Attach an initialization payload
    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = Some(data);
        self
    }
}

/// Host-defined action record
#[derive(Clone)]
pub struct CustomAction {
    /// Type discriminator
    pub kind: String,
    /// Inline executable, consulted when the implementation map has no
    /// entry for `kind`
    pub exec: Option<ActionFn>,
    /// Free-form parameters for the executable
    pub params: EventData,
}

impl CustomAction {
    /// A custom action with an inline executable
    pub fn with_exec(kind: impl Into<String>, exec: ActionFn) -> Self {
        Self {
            kind: kind.into(),
            exec: Some(exec),
            params: EventData::Null,
        }
    }
}
