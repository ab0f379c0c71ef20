//! Ambient service scope
//!
//! A thread-local stack of the interpreter whose transition is
//! currently being computed. The free [`spawn`] function consults it to
//! attach new actors to the right parent without explicit threading.
//! The stack is pushed around `transition`/`initial_state` calls issued
//! by a running interpreter and popped on exit, panics included.

use std::cell::RefCell;

use crate::actor::{ActorRef, Spawnable};
use crate::interpreter::{Interpreter, SpawnOptions};

thread_local! {
    static SERVICE_STACK: RefCell<Vec<Interpreter>> = const { RefCell::new(Vec::new()) };
}

struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SERVICE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run `f` with `service` as the innermost ambient interpreter
pub(crate) fn with_service_scope<T>(service: &Interpreter, f: impl FnOnce() -> T) -> T {
    SERVICE_STACK.with(|stack| stack.borrow_mut().push(service.clone()));
    let _guard = ScopeGuard;
    f()
}

/// The interpreter whose transition is currently executing, if any
pub(crate) fn current_service() -> Option<Interpreter> {
    SERVICE_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Spawn an actor under the currently executing interpreter.
///
/// Outside any service scope there is no parent to attach to: the call
/// returns an inert null actor whose `send` is a no-op and whose
/// `subscribe` yields an empty subscription, and warns in debug builds.
pub fn spawn(entity: Spawnable, options: impl Into<SpawnOptions>) -> ActorRef {
    let options = options.into();
    match current_service() {
        Some(service) => service.spawn(entity, options),
        None => {
            if cfg!(debug_assertions) {
                tracing::warn!(
                    "spawn called outside a service scope; returning an inert actor"
                );
            }
            ActorRef::null(options.name.unwrap_or_else(|| "anonymous".to_string()))
        }
    }
}
