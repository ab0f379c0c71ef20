//! chorus – an event-driven statechart interpreter with a supervised
//! actor hierarchy
//!
//! This crate runs compiled statechart definitions ([`Machine`]) through
//! event-driven transitions with run-to-completion microstep semantics:
//! - Single-threaded cooperative scheduling per interpreter; all state
//!   mutation happens inside scheduler microtasks
//! - An action executor covering immediate and delayed sends,
//!   cancellation, child start/stop, logging, and host-defined actions
//! - A supervised actor hierarchy: nested machines, one-shot producers,
//!   callback workers, and event sources, all behind one actor shape
//! - An observer protocol streaming state snapshots to subscribers
//!
//! The machine compiler, state-value equality semantics, and dev-tools
//! implementations are external collaborators consumed through the
//! [`Machine`], [`StateValue`], and [`Inspector`] seams.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod action;
pub mod actor;
pub mod clock;
pub mod error;
pub mod event;
pub mod interpreter;
pub mod machine;
pub mod registry;
pub mod scheduler;
mod scope;

// Re-export the working surface
pub use action::{
    Action, ActionFn, ActionMeta, CustomAction, InvokeSpec, SendSpec, SendTarget, ServiceFn,
};
pub use actor::{
    ActorBehavior, ActorRef, CallbackFn, CallbackHandle, DeferredFn, Disposer, EventSource,
    Observer, OneShotHandle, SourceSink, Spawnable, Subscription,
};
pub use clock::{Clock, SystemClock, TimerFn, TimerId, VirtualClock};
pub use error::{ExecError, InterpreterError, RegistryError, Result};
pub use event::{Event, EventData, ScEvent};
pub use interpreter::{
    interpret, Inspector, Interpreter, InterpreterOptions, ListenerId, Logger, SpawnOptions,
    Status,
};
pub use machine::{
    is_in_final_state, Context, DoneData, Machine, MachineOptions, StateKind, StateNodeInfo,
    StateSnapshot, StateValue,
};
pub use registry::{SessionId, SessionRegistry};
pub use scope::spawn;

/// Current crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
