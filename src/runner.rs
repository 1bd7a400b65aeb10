//! Facade the presentation layer and the harness drive: discovery, the value table,
//! pickers, references and runs against the selected store.

use std::collections::BTreeMap;
use std::sync::Arc;

use bevy_ecs::prelude::Entity;
use bevy_reflect::PartialReflect;

use crate::command::{discover, Binding, Command, CommandRegistry};
use crate::config::RunnerConfig;
use crate::error::{RunError, StoreError, ValueError};
use crate::events::RunEvent;
use crate::invoke::{self, RunOutcome};
use crate::picker::{query_entities, PickerChoices};
use crate::reference::{self, Requirements};
use crate::reflect;
use crate::store::{ComponentRegistry, Store, StoreRegistry};
use crate::value::TypeKey;

pub struct CommandRunner {
    registry: CommandRegistry,
    components: Arc<ComponentRegistry>,
    commands: Vec<Command>,
    stores: StoreRegistry,
    config: RunnerConfig,
}

fn position(commands: &[Command], id: &str) -> Result<usize, RunError> {
    commands.iter().position(|command| command.matches(id)).ok_or_else(|| RunError::UnknownCommand(id.to_string()))
}

impl CommandRunner {
    pub fn new(registry: CommandRegistry, components: ComponentRegistry, config: RunnerConfig) -> Self {
        let mut runner = Self {
            registry,
            components: Arc::new(components),
            commands: Vec::new(),
            stores: StoreRegistry::new(),
            config,
        };
        runner.discover_commands();
        runner
    }

    pub fn with_samples(config: RunnerConfig) -> Self {
        Self::new(CommandRegistry::with_samples(), crate::samples::sample_components(), config)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry_mut(&mut self) -> &mut CommandRegistry {
        &mut self.registry
    }

    /// Rebuilds the command list. Commands whose key survives keep their value table,
    /// reference selections and last result.
    pub fn discover_commands(&mut self) -> usize {
        let mut previous: BTreeMap<String, Command> =
            self.commands.drain(..).map(|command| (command.key().to_string(), command)).collect();
        self.commands = discover(&self.registry, &self.config.commands)
            .into_iter()
            .map(|fresh| previous.remove(fresh.key()).unwrap_or(fresh))
            .collect();
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn command(&self, id: &str) -> Result<&Command, RunError> {
        Ok(&self.commands[position(&self.commands, id)?])
    }

    pub fn command_mut(&mut self, id: &str) -> Result<&mut Command, RunError> {
        let index = position(&self.commands, id)?;
        Ok(&mut self.commands[index])
    }

    /// Commands grouped under their category label, in discovery order.
    pub fn categories(&self) -> Vec<(&str, Vec<&Command>)> {
        let mut groups: Vec<(&str, Vec<&Command>)> = Vec::new();
        for command in &self.commands {
            let label = command.category().unwrap_or(&self.config.commands.uncategorized_label);
            match groups.iter_mut().find(|(name, _)| *name == label) {
                Some((_, members)) => members.push(command),
                None => groups.push((label, vec![command])),
            }
        }
        groups
    }

    pub fn requirements(&self, id: &str) -> Result<&Requirements, RunError> {
        Ok(self.command(id)?.requirements())
    }

    pub fn set_value(&mut self, id: &str, key: &str, value: Box<dyn PartialReflect>) -> Result<(), RunError> {
        Ok(self.command_mut(id)?.set_value(key, value)?)
    }

    pub fn set_json(&mut self, id: &str, key: &str, json: &serde_json::Value) -> Result<(), RunError> {
        Ok(self.command_mut(id)?.set_json(key, json)?)
    }

    /// Current value for `key`, a parameter name or a `param.field` path.
    pub fn get_value(&self, id: &str, key: &str) -> Result<Box<dyn PartialReflect>, RunError> {
        let command = self.command(id)?;
        let Some((param, path)) = key.split_once('.') else {
            return Ok(command.current_value(key)?);
        };
        let whole = command.current_value(param)?;
        reflect::field_at(&*whole, path)
            .map(|field| field.clone_value())
            .ok_or_else(|| ValueError::UnknownField { param: param.to_string(), path: path.to_string() }.into())
    }

    pub fn value_json(&self, id: &str, param: &str) -> Result<Option<serde_json::Value>, RunError> {
        Ok(self.command(id)?.value_json(param))
    }

    pub fn stores(&self) -> &StoreRegistry {
        &self.stores
    }

    pub fn stores_mut(&mut self) -> &mut StoreRegistry {
        &mut self.stores
    }

    /// Creates a store sharing this runner's component registry. The configured default
    /// store is selected as soon as it exists.
    pub fn add_store(&mut self, name: &str) -> &mut Store {
        let store = Store::new(name, Arc::clone(&self.components));
        if name == self.config.store.default_store {
            self.stores.add_selected(store)
        } else {
            self.stores.add(store)
        }
    }

    pub fn select_store(&mut self, name: &str) -> Result<(), RunError> {
        Ok(self.stores.select(name)?)
    }

    /// Takes the selected store's pending run events. The bus is bounded, so events a
    /// caller never drains are eventually evicted rather than accumulated.
    pub fn drain_events(&mut self) -> Vec<RunEvent> {
        self.stores.selected().map(|store| store.events().drain()).unwrap_or_default()
    }

    /// Candidates for an entity-picker parameter, evaluated against the selected store.
    pub fn picker_choices(&mut self, id: &str, param: &str) -> Result<PickerChoices, RunError> {
        let index = position(&self.commands, id)?;
        let command = &self.commands[index];
        let picker = match command.signature().param(param).map(|p| &p.binding) {
            Some(Binding::EntityPicker(picker)) => picker.clone(),
            _ => return Err(RunError::NotAPicker { param: param.to_string() }),
        };
        let selected = command.typed_value::<Entity>(param);
        let store = self.stores.selected_mut().ok_or(RunError::NoStoreSelected)?;
        let candidates = query_entities(store, picker.as_ref())?;
        Ok(PickerChoices::new(store, candidates, selected))
    }

    pub fn select_entity(&mut self, id: &str, param: &str, entity: Option<Entity>) -> Result<(), RunError> {
        let entity = entity.unwrap_or(Entity::PLACEHOLDER);
        Ok(self.command_mut(id)?.set_value(param, Box::new(entity))?)
    }

    /// Entities satisfying every requirement of `reference`, with the current selection.
    pub fn reference_candidates(&mut self, id: &str, reference: &str) -> Result<PickerChoices, RunError> {
        let index = position(&self.commands, id)?;
        let command = &self.commands[index];
        if !command.requirements().contains_key(reference) {
            return Err(RunError::UnknownReference(reference.to_string()));
        }
        let selected = command.references().selected(reference);
        let store = self.stores.selected_mut().ok_or(RunError::NoStoreSelected)?;
        let candidates = reference::resolve(store, reference, command.requirements())?;
        Ok(PickerChoices::new(store, candidates, selected))
    }

    pub fn select_reference(&mut self, id: &str, reference: &str, entity: Option<Entity>) -> Result<(), RunError> {
        let command = self.command_mut(id)?;
        if !command.requirements().contains_key(reference) {
            return Err(RunError::UnknownReference(reference.to_string()));
        }
        command.references_mut().select(reference, entity);
        Ok(())
    }

    pub fn edit_reference_component(
        &mut self,
        id: &str,
        reference: &str,
        component: TypeKey,
        value: Box<dyn PartialReflect>,
    ) -> Result<(), RunError> {
        Ok(self.command_mut(id)?.edit_reference_component(reference, component, value)?)
    }

    /// Runs against the selected store. An unknown command is an error; everything that
    /// goes wrong after that is reported through the outcome.
    pub fn run(&mut self, id: &str) -> Result<RunOutcome, RunError> {
        let index = position(&self.commands, id)?;
        let store = self.stores.selected_mut();
        Ok(invoke::run(&mut self.commands[index], store, &self.config.commands))
    }

    pub fn run_on(&mut self, id: &str, store: &str) -> Result<RunOutcome, RunError> {
        let index = position(&self.commands, id)?;
        let store = self.stores.get_mut(store).ok_or_else(|| StoreError::UnknownStore(store.to_string()))?;
        Ok(invoke::run(&mut self.commands[index], Some(store), &self.config.commands))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rediscovery_keeps_command_state() {
        let mut runner = CommandRunner::with_samples(RunnerConfig::default());
        runner.set_value("SampleCommands.adjust", "x", Box::new(3_i32)).expect("set x");
        let key = runner.command("SampleCommands.adjust").expect("adjust").key().to_string();
        assert_eq!(runner.discover_commands(), 7);
        let command = runner.command(&key).expect("found by key");
        assert_eq!(command.typed_value::<i32>("x"), Some(3));
    }

    #[test]
    fn categories_follow_discovery_order() {
        let runner = CommandRunner::with_samples(RunnerConfig::default());
        let labels: Vec<_> = runner.categories().into_iter().map(|(label, members)| (label, members.len())).collect();
        assert_eq!(labels, vec![("Debug", 5), ("Other", 1), ("Sample : Test", 1)]);
    }

    #[test]
    fn default_store_is_selected_when_added() {
        let mut runner = CommandRunner::with_samples(RunnerConfig::default());
        runner.add_store("Editor");
        runner.add_store("Default");
        assert_eq!(runner.stores().selected().map(Store::name), Some("Default"));
        assert!(matches!(runner.run("missing"), Err(RunError::UnknownCommand(_))));
        assert!(matches!(runner.run_on("SampleCommands.adjust", "Nope"), Err(RunError::Store(_))));
    }

    #[test]
    fn pickers_and_references_are_checked_by_name() {
        let mut runner = CommandRunner::with_samples(RunnerConfig::default());
        runner.add_store("Default");
        assert!(matches!(
            runner.picker_choices("SampleCommands.adjust", "x"),
            Err(RunError::NotAPicker { .. })
        ));
        assert!(matches!(
            runner.select_reference("SampleCommands.copy_transform", "Nowhere", None),
            Err(RunError::UnknownReference(_))
        ));
        let choices = runner.reference_candidates("SampleCommands.copy_transform", "To").expect("query");
        assert!(choices.choices.is_empty());
        assert_eq!(choices.selected_label(), "None");
    }

    #[test]
    fn undrained_events_stay_bounded() {
        let mut runner = CommandRunner::with_samples(RunnerConfig::default());
        runner.add_store("Default");
        for _ in 0..1000 {
            runner.run("SampleCommands.spawn_other").expect("spawn_other");
        }
        let pending = runner.stores().selected().expect("store").events().borrow().len();
        assert_eq!(pending, crate::events::DEFAULT_EVENT_CAPACITY);
        let drained = runner.drain_events();
        assert_eq!(drained.len(), pending);
        assert!(matches!(drained.last(), Some(RunEvent::CommandSucceeded { .. })));
        assert!(runner.drain_events().is_empty());
    }
}
