//! Event objects and their normalized wire form
//!
//! External callers submit either a bare event name or an [`Event`]
//! record; every entry point normalizes to an [`ScEvent`] carrying the
//! name, the original event, and an optional origin actor.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::actor::ActorRef;

/// Dynamic payload type carried by events, contexts, and done-data
pub type EventData = Value;

/// Name of the synthetic event delivered with the initial state
pub const INIT_EVENT: &str = "chorus.init";

/// Reserved name for errors escalated from action execution. A send
/// action carrying this name is rewritten to the sender's platform
/// error name before delivery.
pub const ERROR_EVENT: &str = "chorus.error";

/// Prefix of platform error event names (`error.platform.<id>`)
pub const ERROR_PLATFORM_PREFIX: &str = "error.platform";

/// Name of the event a sync child emits to its parent on each transition
pub const UPDATE_EVENT: &str = "actor.update";

/// Platform error event name for the given actor id
pub fn error_platform(id: &str) -> String {
    format!("{ERROR_PLATFORM_PREFIX}.{id}")
}

/// Completion event name for an invoked or spawned actor
pub fn done_invoke(id: &str) -> String {
    format!("done.invoke.{id}")
}

/// An event: a name plus an arbitrary JSON payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name (the `type` discriminator)
    pub name: String,
    /// Arbitrary payload; `Value::Null` when absent
    #[serde(default)]
    pub payload: EventData,
}

impl Event {
    /// Create a payload-less event
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: Value::Null,
        }
    }

    /// Create an event with a payload
    pub fn with_payload(name: impl Into<String>, payload: EventData) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// The synthetic initialization event
    pub fn init() -> Self {
        Self::new(INIT_EVENT)
    }

    /// Completion event for an actor, carrying its done-data
    pub fn done(id: &str, data: Option<EventData>) -> Self {
        Self {
            name: done_invoke(id),
            payload: data.unwrap_or(Value::Null),
        }
    }

    /// Platform error event for an actor
    pub fn error(id: &str, data: EventData) -> Self {
        Self {
            name: error_platform(id),
            payload: data,
        }
    }

    /// True when this is a platform error event
    pub fn is_error(&self) -> bool {
        self.name.starts_with(ERROR_PLATFORM_PREFIX)
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Event {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Normalized event: the shape every internal path operates on
#[derive(Clone)]
pub struct ScEvent {
    /// Event name
    pub name: String,
    /// The originating event record
    pub data: Event,
    /// Actor that dispatched this event, when routed between actors
    pub origin: Option<ActorRef>,
}

impl ScEvent {
    /// Normalize an event into its internal form
    pub fn from_event(event: impl Into<Event>) -> Self {
        let event = event.into();
        Self {
            name: event.name.clone(),
            data: event,
            origin: None,
        }
    }

    /// Normalize with an explicit origin actor
    pub fn with_origin(event: impl Into<Event>, origin: ActorRef) -> Self {
        let mut sc = Self::from_event(event);
        sc.origin = Some(origin);
        sc
    }

    /// The synthetic initialization event
    pub fn init() -> Self {
        Self::from_event(Event::init())
    }

    /// True when this is a platform error event
    pub fn is_error(&self) -> bool {
        self.name.starts_with(ERROR_PLATFORM_PREFIX)
    }
}

impl fmt::Debug for ScEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScEvent")
            .field("name", &self.name)
            .field("data", &self.data)
            .field("origin", &self.origin.as_ref().map(|a| a.id()))
            .finish()
    }
}
