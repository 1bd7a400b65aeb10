//! Runs one command: bind, call, commit `ref`/`out` results, play back the buffer.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use bevy_reflect::PartialReflect;
use serde::{Deserialize, Serialize};

use crate::binder::{bind, BoundArgument, BoundCall, BoundValue, CallFrame, CommitTarget};
use crate::command::Command;
use crate::config::CommandsConfig;
use crate::error::BindError;
use crate::events::RunEvent;
use crate::store::{BufferScope, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_back: Option<usize>,
}

impl RunOutcome {
    pub fn error(message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, message: message.into(), return_value: None, played_back: None }
    }

    pub fn is_success(&self) -> bool {
        self.severity == Severity::Success
    }
}

/// Runs `command` against `store` and records the outcome as the command's last result.
/// Nothing is written when binding fails or the body errors or panics.
pub fn run(command: &mut Command, store: Option<&mut Store>, config: &CommandsConfig) -> RunOutcome {
    let outcome = match store {
        Some(store) => execute(command, store, config),
        None => RunOutcome::error(BindError::NoStoreSelected.to_string()),
    };
    command.set_last_result(outcome.clone());
    outcome
}

fn execute(command: &mut Command, store: &mut Store, config: &CommandsConfig) -> RunOutcome {
    let name = command.display_name().to_string();
    let BoundCall { mut args, mut scope } = match bind(command, Some(&*store)) {
        Ok(call) => call,
        Err(err) => {
            log::warn!("[invoke] {name}: binding failed: {err}");
            return failed(store, &name, err.to_string());
        }
    };

    let body = command.spec().body();
    let context = command.signature().context;
    let result = {
        let mut frame = CallFrame::new(&name, context, store, &mut args, scope.as_mut());
        panic::catch_unwind(AssertUnwindSafe(|| body(&mut frame)))
    };
    let returned = match result {
        Ok(Ok(returned)) => returned,
        Ok(Err(err)) => {
            log::debug!("[invoke] {name} failed: {err:?}");
            drop(scope);
            return failed(store, &name, err.root_cause().to_string());
        }
        Err(payload) => {
            drop(scope);
            return failed(store, &name, panic_message(payload.as_ref()));
        }
    };

    let warnings = commit(command, store, &name, args);
    let played_back = scope.as_mut().map(|scope: &mut BufferScope| scope.play_back(&mut store.world));
    drop(scope);

    let mut message = String::from("Ran successfully.");
    if let Some(count) = played_back {
        message.push_str(&format!(" Mutation buffer played back ({count} commands)."));
    }
    let return_value = returned.map(|value| format!("{value:?}"));
    if let (Some(value), true) = (&return_value, config.include_return_value) {
        message.push_str(&format!(" Result: {value}"));
    }
    for warning in &warnings {
        message.push(' ');
        message.push_str(warning);
    }
    let severity = if warnings.is_empty() { Severity::Success } else { Severity::Warning };
    log::info!("[invoke] {name}: {message}");
    store.events().push(RunEvent::CommandSucceeded { command: name });
    RunOutcome { severity, message, return_value, played_back }
}

fn failed(store: &Store, name: &str, message: String) -> RunOutcome {
    store.events().push(RunEvent::CommandFailed { command: name.to_string(), message: message.clone() });
    RunOutcome::error(message)
}

/// Writes `ref`/`out` results back. Reference slots also land on the entity that
/// supplied them; a rejected entity write is reported but keeps the table entry.
fn commit(command: &mut Command, store: &mut Store, name: &str, args: Vec<BoundArgument>) -> Vec<String> {
    let mut warnings = Vec::new();
    for arg in args {
        let BoundValue::Value(value) = arg.value else {
            continue;
        };
        match arg.commit {
            CommitTarget::None => {}
            CommitTarget::ValueTable => store_value(command, &arg.name, value),
            CommitTarget::Entity { reference, entity, component } => {
                match store.write_component(entity, component, &*value) {
                    Ok(()) => {
                        store.events().push(RunEvent::ComponentCommitted {
                            command: name.to_string(),
                            entity,
                            component: component.short_name(),
                            reference: reference.clone(),
                        });
                        command.references_mut().forget(&reference, component);
                    }
                    Err(err) => {
                        log::warn!("[invoke] {name}: could not write `{}` back: {err}", arg.name);
                        warnings.push(format!("Could not write `{}` back: {err}.", arg.name));
                    }
                }
                store_value(command, &arg.name, value);
            }
        }
    }
    warnings
}

fn store_value(command: &mut Command, param: &str, value: Box<dyn PartialReflect>) {
    let values = command.values_mut();
    values.clear_param(param);
    values.insert(param, value);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "command panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandSpec, ParamDecl};
    use crate::store::ComponentRegistry;
    use anyhow::Context;
    use std::sync::Arc;

    fn store() -> Store {
        Store::new("Default", Arc::new(ComponentRegistry::new()))
    }

    fn command(spec: CommandSpec) -> Command {
        Command::new(spec).expect("classifies")
    }

    #[test]
    fn missing_store_is_reported_without_calling() {
        let mut cmd = command(CommandSpec::new("tests::Run", "never", |_| panic!("must not run")));
        let outcome = run(&mut cmd, None, &CommandsConfig::default());
        assert_eq!(outcome, RunOutcome::error("No store selected."));
        assert_eq!(cmd.last_result(), Some(&outcome));
    }

    #[test]
    fn failure_reports_the_innermost_cause() {
        let spec = CommandSpec::new("tests::Run", "fails", |_| {
            Err(anyhow::anyhow!("disk full")).context("saving level").context("running command")
        })
        .param(ParamDecl::store("store"));
        let mut cmd = command(spec);
        let mut store = store();
        let outcome = run(&mut cmd, Some(&mut store), &CommandsConfig::default());
        assert_eq!(outcome.severity, Severity::Error);
        assert_eq!(outcome.message, "disk full");
    }

    #[test]
    fn panics_become_failures() {
        let spec = CommandSpec::new("tests::Run", "panics", |_| panic!("boom")).param(ParamDecl::store("store"));
        let mut cmd = command(spec);
        let mut store = store();
        let outcome = run(&mut cmd, Some(&mut store), &CommandsConfig::default());
        assert_eq!(outcome, RunOutcome::error("boom"));
        let events = store.events().drain();
        assert!(matches!(events.last(), Some(RunEvent::CommandFailed { .. })));
    }

    #[test]
    fn return_values_are_reported_when_enabled() {
        let spec = CommandSpec::new("tests::Run", "answer", |_| Ok(Some(Box::new(42_i32) as Box<dyn PartialReflect>)))
            .param(ParamDecl::store("store"));
        let mut cmd = command(spec);
        let mut store = store();
        let mut config = CommandsConfig::default();
        let outcome = run(&mut cmd, Some(&mut store), &config);
        assert_eq!(outcome.message, "Ran successfully. Result: 42");
        assert_eq!(outcome.return_value.as_deref(), Some("42"));

        config.include_return_value = false;
        let outcome = run(&mut cmd, Some(&mut store), &config);
        assert_eq!(outcome.message, "Ran successfully.");
    }

    #[test]
    fn zero_parameter_commands_run_without_context() {
        let mut cmd = command(CommandSpec::new("tests::Run", "noop", |frame| {
            assert!(frame.world().is_err());
            Ok(None)
        }));
        let mut store = store();
        let outcome = run(&mut cmd, Some(&mut store), &CommandsConfig::default());
        assert!(outcome.is_success(), "{}", outcome.message);
    }
}
