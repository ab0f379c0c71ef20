//! Actor hierarchy tests
//!
//! Spawning each adapter variant, auto-forwarding, the final-state
//! termination cascade from child to parent, and platform error
//! escalation.

mod common;

use common::{ev, MachineBuilder};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chorus::{
    interpret, Action, ActorRef, DoneData, Event, EventSource, InterpreterError,
    InterpreterOptions, InvokeSpec, MachineOptions, ScEvent, SendSpec, SendTarget, SourceSink,
    SpawnOptions, Spawnable, Status,
};

fn child_done_machine() -> Arc<dyn chorus::Machine> {
    MachineBuilder::new("child", "working")
        .on("working", "DONE", "finished")
        .final_state("finished", Some(DoneData::Value(json!({"ok": true}))))
        .build()
}

#[test]
fn final_state_cascades_done_to_the_parent() {
    let services = MachineOptions::new().with_service(
        "childSrc",
        Arc::new(|_, _, _| Ok(Spawnable::Machine(child_done_machine()))),
    );
    let parent_machine = MachineBuilder::new("parent", "watching")
        .entry(
            "watching",
            vec![Action::Start(InvokeSpec::new("child", "childSrc"))],
        )
        .on("watching", "done.invoke.child", "relieved")
        .options(services)
        .build();

    let parent = interpret(parent_machine, InterpreterOptions::default());
    parent.start().unwrap();

    let child = parent.child("child").expect("child started on entry");
    child.send(ScEvent::from_event(ev("DONE")));

    assert!(parent.current().unwrap().matches("relieved"));
    assert!(
        parent.children().is_empty(),
        "finished child is removed from supervision"
    );
}

#[test]
fn done_listeners_receive_the_done_data() {
    let machine = MachineBuilder::new("solo", "working")
        .on("working", "DONE", "finished")
        .final_state("finished", Some(DoneData::Value(json!({"total": 3}))))
        .build();

    let service = interpret(machine, InterpreterOptions::default());
    let done_events = Arc::new(Mutex::new(Vec::new()));
    let done_in = Arc::clone(&done_events);
    service.on_done(move |event| done_in.lock().push(event.clone()));

    service.start().unwrap();
    service.send(ev("DONE")).unwrap();

    let done_events = done_events.lock();
    assert_eq!(done_events.len(), 1, "done fires exactly once");
    assert_eq!(done_events[0].name, "done.invoke.solo");
    assert_eq!(done_events[0].payload, json!({"total": 3}));

    assert_eq!(service.status(), Status::Stopped);
    // terminal: subsequent sends are no-ops
    service.send(ev("DONE")).unwrap();
    assert_eq!(service.status(), Status::Stopped);
}

#[test]
fn auto_forwarded_children_see_the_event_before_the_parent_transition() {
    let log = Arc::new(Mutex::new(Vec::new()));

    let log_in = Arc::clone(&log);
    let parent_machine = MachineBuilder::new("parent", "idle")
        .on_assign("idle", "Z", "seen", move |ctx, _| {
            log_in.lock().push("parent-transition".to_string());
            ctx.clone()
        })
        .build();

    let parent = interpret(parent_machine, InterpreterOptions::default());
    parent.start().unwrap();

    let log_in = Arc::clone(&log);
    parent.spawn(
        Spawnable::Callback(Box::new(move |handle| {
            handle.on_receive(move |event| {
                log_in.lock().push(format!("child:{}", event.name));
            });
            Ok(None)
        })),
        SpawnOptions {
            name: Some("listener".to_string()),
            auto_forward: true,
            sync: false,
        },
    );

    parent.send(ev("Z")).unwrap();

    assert_eq!(
        *log.lock(),
        vec!["child:Z".to_string(), "parent-transition".to_string()],
        "forwarding precedes the parent's own transition"
    );
}

#[test]
fn one_shot_resolution_arrives_as_a_done_invoke_event() {
    let services = MachineOptions::new().with_service(
        "fetchSrc",
        Arc::new(|_, _, _| {
            Ok(Spawnable::Deferred(Box::new(|handle| {
                handle.resolve(json!(42));
            })))
        }),
    );
    let machine = MachineBuilder::new("fetcher", "loading")
        .entry(
            "loading",
            vec![Action::Start(InvokeSpec::new("fetch", "fetchSrc"))],
        )
        .on_assign("loading", "done.invoke.fetch", "got", |_, event| {
            json!({"result": event.data.payload})
        })
        .options(services)
        .build();

    let service = interpret(machine, InterpreterOptions::default());
    service.start().unwrap();

    let state = service.current().unwrap();
    assert!(state.matches("got"));
    assert_eq!(state.context, json!({"result": 42}));
    assert!(service.children().is_empty(), "settled one-shot is removed");
}

#[test]
fn one_shot_rejection_arrives_as_a_platform_error_event() {
    let services = MachineOptions::new().with_service(
        "fetchSrc",
        Arc::new(|_, _, _| {
            Ok(Spawnable::Deferred(Box::new(|handle| {
                handle.reject(json!("connection refused"));
            })))
        }),
    );
    let machine = MachineBuilder::new("fetcher", "loading")
        .entry(
            "loading",
            vec![Action::Start(InvokeSpec::new("fetch", "fetchSrc"))],
        )
        .on_assign("loading", "error.platform.fetch", "failed", |_, event| {
            json!({"reason": event.data.payload})
        })
        .options(services)
        .build();

    let service = interpret(machine, InterpreterOptions::default());
    service.start().unwrap();

    let state = service.current().unwrap();
    assert!(state.matches("failed"));
    assert_eq!(state.context, json!({"reason": "connection refused"}));
}

#[test]
fn invoke_construction_failure_becomes_an_error_event() {
    let services = MachineOptions::new().with_service(
        "brokenSrc",
        Arc::new(|_, _, _| Err(chorus::ExecError::new("no such backend"))),
    );
    let machine = MachineBuilder::new("host", "booting")
        .entry(
            "booting",
            vec![Action::Start(InvokeSpec::new("svc", "brokenSrc"))],
        )
        .on("booting", "error.platform.svc", "degraded")
        .options(services)
        .build();

    let service = interpret(machine, InterpreterOptions::default());
    service.start().unwrap();

    assert!(service.current().unwrap().matches("degraded"));
}

#[test]
fn missing_service_factory_is_a_soft_warning() {
    let machine = MachineBuilder::new("host", "booting")
        .entry(
            "booting",
            vec![Action::Start(InvokeSpec::new("svc", "unregistered"))],
        )
        .build();

    let service = interpret(machine, InterpreterOptions::default());
    service.start().unwrap();

    // no child, no failure
    assert!(service.current().unwrap().matches("booting"));
    assert!(service.children().is_empty());
}

#[test]
fn callback_child_talks_both_ways() {
    let machine = MachineBuilder::new("parent", "idle")
        .on_with(
            "idle",
            "KICK",
            "waiting",
            vec![Action::Send(
                SendSpec::new("POKE").to(SendTarget::Id("worker".to_string())),
            )],
        )
        .on("waiting", "POKED", "acknowledged")
        .build();

    let parent = interpret(machine, InterpreterOptions::default());
    parent.start().unwrap();

    parent.spawn(
        Spawnable::Callback(Box::new(|handle| {
            let replier = handle.clone();
            handle.on_receive(move |event| {
                if event.name == "POKE" {
                    replier.send(Event::new("POKED"));
                }
            });
            Ok(None)
        })),
        "worker",
    );

    parent.send(ev("KICK")).unwrap();
    assert!(parent.current().unwrap().matches("acknowledged"));
}

#[test]
fn event_source_values_arrive_as_events_and_completion_closes_the_child() {
    struct Burst;

    impl EventSource for Burst {
        fn attach(&self, sink: SourceSink) -> chorus::Disposer {
            sink.next(Event::new("FIRST"));
            sink.next(Event::new("SECOND"));
            sink.complete();
            Box::new(|| {})
        }
    }

    let machine = MachineBuilder::new("watcher", "a")
        .on("a", "FIRST", "b")
        .on("b", "SECOND", "c")
        .build();

    let parent = interpret(machine, InterpreterOptions::default());
    parent.start().unwrap();
    parent.spawn(Spawnable::Source(Box::new(Burst)), "stream");

    assert!(parent.current().unwrap().matches("c"));
    assert!(parent.children().is_empty(), "completed source is removed");
}

#[test]
fn spawning_under_an_existing_name_stops_the_prior_child() {
    let parent = interpret(
        MachineBuilder::new("parent", "idle").build(),
        InterpreterOptions::default(),
    );
    parent.start().unwrap();

    let disposed = Arc::new(AtomicUsize::new(0));
    let disposed_in = Arc::clone(&disposed);
    parent.spawn(
        Spawnable::Callback(Box::new(move |_| {
            Ok(Some(Box::new(move || {
                disposed_in.fetch_add(1, Ordering::SeqCst);
            }) as chorus::Disposer))
        })),
        "slot",
    );

    parent.spawn(Spawnable::Actor(ActorRef::null("slot")), "slot");

    assert_eq!(
        disposed.load(Ordering::SeqCst),
        1,
        "replaced child is stopped"
    );
    assert_eq!(parent.children().len(), 1);
}

#[test]
fn stop_child_is_a_no_op_for_unknown_ids() {
    let parent = interpret(
        MachineBuilder::new("parent", "idle").build(),
        InterpreterOptions::default(),
    );
    parent.start().unwrap();
    parent.stop_child("ghost");
    assert!(parent.children().is_empty());
}

#[test]
fn spawn_inside_a_transition_attaches_to_the_running_service() {
    let machine = MachineBuilder::new("parent", "idle")
        .on_assign("idle", "GROW", "grown", |ctx, _| {
            chorus::spawn(Spawnable::Actor(ActorRef::null("seed")), "kid");
            ctx.clone()
        })
        .build();

    let parent = interpret(machine, InterpreterOptions::default());
    parent.start().unwrap();

    // speculative planning must not attach anything
    let planned = parent.next_state(ev("GROW"));
    assert!(planned.matches("grown"));
    assert!(parent.children().is_empty());

    parent.send(ev("GROW")).unwrap();
    assert!(parent.children().contains_key("kid"));
}

#[test]
fn unhandled_platform_errors_fail_the_send() {
    let service = interpret(
        MachineBuilder::new("plain", "idle").build(),
        InterpreterOptions::default(),
    );
    service.start().unwrap();

    let err = service
        .send(Event::error("worker", json!("exploded")))
        .unwrap_err();
    assert!(matches!(err, InterpreterError::UnhandledError { .. }));
}

#[test]
fn error_listeners_absorb_unhandled_platform_errors() {
    let service = interpret(
        MachineBuilder::new("plain", "idle").build(),
        InterpreterOptions::default(),
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    service.on_error(move |data| seen_in.lock().push(data.clone()));
    service.start().unwrap();

    service
        .send(Event::error("worker", json!("exploded")))
        .unwrap();

    assert_eq!(*seen.lock(), vec![json!("exploded")]);
}

#[test]
fn handled_platform_errors_transition_normally() {
    let machine = MachineBuilder::new("robust", "idle")
        .on("idle", "error.platform.worker", "recovering")
        .build();
    let service = interpret(machine, InterpreterOptions::default());
    service.start().unwrap();

    service
        .send(Event::error("worker", json!("exploded")))
        .unwrap();
    assert!(service.current().unwrap().matches("recovering"));
}

#[test]
fn failing_action_fails_the_microstep() {
    let failing: chorus::ActionFn = Arc::new(|_, _, _| Err(chorus::ExecError::new("boom")));
    let machine = MachineBuilder::new("fragile", "idle")
        .on_with(
            "idle",
            "GO",
            "doing",
            vec![Action::Custom(chorus::CustomAction::with_exec(
                "explode", failing,
            ))],
        )
        .build();

    let service = interpret(machine, InterpreterOptions::default());
    service.start().unwrap();

    let err = service.send(ev("GO")).unwrap_err();
    assert!(matches!(err, InterpreterError::ActionFailed { .. }));
}

#[test]
fn failing_action_in_a_child_is_forwarded_to_the_parent() {
    let failing: chorus::ActionFn = Arc::new(|_, _, _| Err(chorus::ExecError::new("boom")));
    let child_machine = MachineBuilder::new("child", "idle")
        .on_with(
            "idle",
            "GO",
            "doing",
            vec![Action::Custom(chorus::CustomAction::with_exec(
                "explode", failing,
            ))],
        )
        .build();

    let parent_machine = MachineBuilder::new("parent", "calm")
        .on("calm", "chorus.error", "alerted")
        .build();

    let parent = interpret(parent_machine, InterpreterOptions::default());
    parent.start().unwrap();
    let child = parent.spawn(Spawnable::Machine(child_machine), "child");

    // the child's microstep fails internally; the failure is escalated
    // to the parent as an error event first
    child.send(ScEvent::from_event(ev("GO")));

    assert!(parent.current().unwrap().matches("alerted"));
}

#[test]
fn sync_children_report_their_transitions_to_the_parent() {
    let child_machine = MachineBuilder::new("child", "a").on("a", "STEP", "b").build();
    let parent = interpret(
        MachineBuilder::new("parent", "idle").build(),
        InterpreterOptions::default(),
    );
    parent.start().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in = Arc::clone(&seen);
    parent.on_event(move |event| seen_in.lock().push(event.clone()));

    let child = parent.spawn(
        Spawnable::Machine(child_machine),
        SpawnOptions {
            name: Some("mirror".to_string()),
            auto_forward: false,
            sync: true,
        },
    );
    child.send(ScEvent::from_event(ev("STEP")));

    let updates: Vec<_> = seen
        .lock()
        .iter()
        .filter(|event| event.name == "actor.update")
        .cloned()
        .collect();
    assert!(
        updates.len() >= 2,
        "initial state and STEP both reported, got {updates:?}"
    );
    let last = updates.last().unwrap();
    assert_eq!(last.payload["id"], json!("mirror"));
    assert_eq!(last.payload["value"], json!("b"));
}
