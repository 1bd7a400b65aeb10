use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::bail;
use kestrel_commands::command::{CommandRegistry, CommandSpec, ParamDecl};
use kestrel_commands::config::RunnerConfig;
use kestrel_commands::events::{BufferKind, RunEvent};
use kestrel_commands::samples::sample_components;
use kestrel_commands::{CommandRunner, Severity};

const DECLARING: &str = "tests::BufferCommands";

fn runner(registry: CommandRegistry) -> CommandRunner {
    let mut runner = CommandRunner::new(registry, sample_components(), RunnerConfig::default());
    runner.add_store("Default");
    runner
}

fn drain(runner: &CommandRunner) -> Vec<RunEvent> {
    runner.stores().selected().expect("store selected").events().drain()
}

fn entity_count(runner: &CommandRunner) -> usize {
    runner.stores().selected().expect("store selected").entities().len()
}

#[test]
fn successful_runs_play_back_then_dispose() {
    let mut registry = CommandRegistry::new();
    registry.register(
        CommandSpec::new(DECLARING, "spawn_two", |frame| {
            let commands = frame.commands()?;
            commands.spawn_empty();
            commands.spawn_empty();
            Ok(None)
        })
        .param(ParamDecl::mutation_buffer("commands")),
    );
    let mut runner = runner(registry);

    let outcome = runner.run("BufferCommands.spawn_two").expect("command exists");
    assert_eq!(outcome.severity, Severity::Success);
    assert_eq!(outcome.played_back, Some(2));
    assert_eq!(entity_count(&runner), 2);

    let events = drain(&runner);
    assert_eq!(events.len(), 4, "{events:?}");
    assert!(matches!(events[0], RunEvent::BufferAllocated { kind: BufferKind::Plain, .. }));
    assert!(matches!(events[1], RunEvent::BufferPlayedBack { commands: 2, .. }));
    assert!(matches!(events[2], RunEvent::BufferDisposed { played_back: true, .. }));
    assert!(matches!(events[3], RunEvent::CommandSucceeded { .. }));
    assert!(events.iter().all(|event| event.command() == "BufferCommands.spawn_two"));
}

#[test]
fn failing_bodies_dispose_without_playback() {
    let mut registry = CommandRegistry::new();
    registry.register(
        CommandSpec::new(DECLARING, "spawn_then_fail", |frame| {
            let commands = frame.commands()?;
            commands.spawn_empty();
            bail!("gave up after queueing");
        })
        .param(ParamDecl::mutation_buffer("commands")),
    );
    let mut runner = runner(registry);

    let outcome = runner.run("BufferCommands.spawn_then_fail").expect("command exists");
    assert_eq!(outcome.severity, Severity::Error);
    assert_eq!(outcome.message, "gave up after queueing");
    assert_eq!(outcome.played_back, None);
    assert_eq!(entity_count(&runner), 0, "queued spawns are discarded");

    let events = drain(&runner);
    assert_eq!(events.len(), 3, "{events:?}");
    assert!(matches!(events[0], RunEvent::BufferAllocated { .. }));
    assert!(matches!(events[1], RunEvent::BufferDisposed { played_back: false, .. }));
    assert!(matches!(&events[2], RunEvent::CommandFailed { message, .. } if message == "gave up after queueing"));
}

#[test]
fn panicking_bodies_still_dispose_their_buffer() {
    let mut registry = CommandRegistry::new();
    registry.register(
        CommandSpec::new(DECLARING, "explode", |frame| {
            frame.parallel_writer()?.spawn(0, ());
            panic!("writer exploded");
        })
        .param(ParamDecl::parallel_writer("writer")),
    );
    let mut runner = runner(registry);

    let outcome = runner.run("BufferCommands.explode").expect("command exists");
    assert_eq!(outcome.severity, Severity::Error);
    assert!(outcome.message.contains("writer exploded"), "{}", outcome.message);
    assert_eq!(entity_count(&runner), 0);

    let events = drain(&runner);
    assert!(matches!(events[0], RunEvent::BufferAllocated { kind: BufferKind::Parallel, .. }));
    assert!(events.contains(&RunEvent::BufferDisposed { command: "BufferCommands.explode".into(), played_back: false }));
    assert!(!events.iter().any(|event| matches!(event, RunEvent::BufferPlayedBack { .. })));
}

#[test]
fn bind_failures_never_reach_the_body() {
    let called = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&called);
    let mut registry = CommandRegistry::new();
    registry.register(
        CommandSpec::new(DECLARING, "wait", move |_| {
            seen.store(true, Ordering::SeqCst);
            Ok(None)
        })
        .param(ParamDecl::mutation_buffer("commands"))
        .param(ParamDecl::unsupported::<std::time::Duration>("timeout")),
    );
    let mut runner = runner(registry);

    let outcome = runner.run("BufferCommands.wait").expect("command exists");
    assert_eq!(outcome.severity, Severity::Error);
    assert!(outcome.message.contains("timeout"), "{}", outcome.message);
    assert!(!called.load(Ordering::SeqCst));

    let events = drain(&runner);
    assert_eq!(events.len(), 3, "{events:?}");
    assert!(matches!(events[0], RunEvent::BufferAllocated { .. }));
    assert!(matches!(events[1], RunEvent::BufferDisposed { played_back: false, .. }));
    assert!(matches!(events[2], RunEvent::CommandFailed { .. }));
}

#[test]
fn commands_without_buffers_emit_no_buffer_events() {
    let mut runner = runner(CommandRegistry::with_samples());
    runner.set_value("SampleCommands.adjust", "x", Box::new(1_i32)).expect("x");
    let outcome = runner.run("SampleCommands.adjust").expect("command exists");
    assert_eq!(outcome.played_back, None);
    let events = drain(&runner);
    assert_eq!(events, vec![RunEvent::CommandSucceeded { command: "SampleCommands.adjust".into() }]);
}
