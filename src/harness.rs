use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use bevy_ecs::prelude::Entity;
use serde::{Deserialize, Serialize};

use crate::config::RunnerConfig;
use crate::invoke::Severity;
use crate::runner::CommandRunner;
use crate::samples::Child;
use crate::store::{entity_id_label, DynamicBuffer, EntityName, Store};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    /// Store the steps run against; the configured default when absent.
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub entities: Vec<FixtureEntity>,
    pub steps: Vec<FixtureStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureEntity {
    pub name: String,
    /// Component short name to its JSON value; `null` for markers.
    #[serde(default)]
    pub components: BTreeMap<String, serde_json::Value>,
    /// Names of entities stored in this entity's `Child` buffer.
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureStep {
    pub command: String,
    /// Value-table writes, keyed by parameter name or `param.field` path.
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
    /// Entity-picker parameter to entity name; `null` clears the selection.
    #[serde(default)]
    pub pickers: BTreeMap<String, Option<String>>,
    /// Reference name to entity name; `null` clears the selection.
    #[serde(default)]
    pub references: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub store: String,
    pub commands: Vec<String>,
    pub results: Vec<StepResult>,
    pub final_entities: Vec<EntitySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step: usize,
    pub command: String,
    pub severity: Severity,
    pub message: String,
    pub values: BTreeMap<String, serde_json::Value>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySummary {
    pub entity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub components: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}

/// Builds a fresh store from the fixture, runs every step through a sample-backed
/// runner and reports what each run produced.
pub fn run_fixture(fixture: &HarnessFixture, config: &RunnerConfig) -> Result<HarnessOutput> {
    let mut runner = CommandRunner::with_samples(config.clone());
    let store_name = fixture.store.clone().unwrap_or_else(|| config.store.default_store.clone());
    runner.add_store(&store_name);
    runner.select_store(&store_name)?;

    let store = runner.stores_mut().selected_mut().ok_or_else(|| anyhow!("store '{store_name}' was not created"))?;
    spawn_entities(store, &fixture.entities)?;
    store.events().drain();

    let commands = runner.commands().iter().map(|command| command.display_name().to_string()).collect();
    let mut results = Vec::with_capacity(fixture.steps.len());
    for (step, fixture_step) in fixture.steps.iter().enumerate() {
        let result = run_step(&mut runner, step, fixture_step)
            .with_context(|| format!("running step {step} ({})", fixture_step.command))?;
        log::debug!("[harness] step {step}: {} -> {}", result.command, result.message);
        results.push(result);
    }

    let store = runner.stores().selected().ok_or_else(|| anyhow!("store '{store_name}' disappeared"))?;
    let final_entities = store.entities().into_iter().map(|entity| summarize(store, entity)).collect();
    Ok(HarnessOutput { store: store_name, commands, results, final_entities })
}

fn spawn_entities(store: &mut Store, entities: &[FixtureEntity]) -> Result<()> {
    let mut spawned = Vec::with_capacity(entities.len());
    for fixture in entities {
        let entity = store.spawn(EntityName(fixture.name.clone()));
        for (component, json) in &fixture.components {
            let info = *store
                .components()
                .find(component)
                .ok_or_else(|| anyhow!("unknown component '{component}' on '{}'", fixture.name))?;
            let ty = info.value_type().ok_or_else(|| anyhow!("'{component}' is a buffer, not a component"))?;
            let value = ty
                .from_json(component, json)
                .with_context(|| format!("decoding '{component}' on '{}'", fixture.name))?;
            store.insert_component(entity, info.key(), &*value)?;
        }
        spawned.push(entity);
    }
    for (fixture, parent) in entities.iter().zip(spawned) {
        if fixture.children.is_empty() {
            continue;
        }
        let children = fixture
            .children
            .iter()
            .map(|name| find(store, name).map(Child))
            .collect::<Result<DynamicBuffer<Child>>>()?;
        store.world.entity_mut(parent).insert(children);
    }
    Ok(())
}

fn find(store: &Store, name: &str) -> Result<Entity> {
    store.find_by_name(name).ok_or_else(|| anyhow!("no entity named '{name}' in store '{}'", store.name()))
}

fn run_step(runner: &mut CommandRunner, step: usize, fixture: &FixtureStep) -> Result<StepResult> {
    let id = fixture.command.as_str();
    for (key, json) in &fixture.values {
        runner.set_json(id, key, json)?;
    }
    for (param, name) in &fixture.pickers {
        let entity = match name {
            Some(name) => Some(find(selected(runner)?, name)?),
            None => None,
        };
        runner.select_entity(id, param, entity)?;
    }
    for (reference, name) in &fixture.references {
        let entity = match name {
            Some(name) => Some(find(selected(runner)?, name)?),
            None => None,
        };
        runner.select_reference(id, reference, entity)?;
    }

    let outcome = runner.run(id)?;
    let command = runner.command(id)?;
    let values = command
        .signature()
        .iter()
        .filter_map(|param| command.value_json(param.name()).map(|json| (param.name().to_string(), json)))
        .collect();
    let events = selected(runner)?.events().drain().iter().map(ToString::to_string).collect();
    Ok(StepResult {
        step,
        command: command.display_name().to_string(),
        severity: outcome.severity,
        message: outcome.message,
        values,
        events,
    })
}

fn selected(runner: &CommandRunner) -> Result<&Store> {
    match runner.stores().selected() {
        Some(store) => Ok(store),
        None => bail!("no store selected"),
    }
}

fn summarize(store: &Store, entity: Entity) -> EntitySummary {
    let mut components = BTreeMap::new();
    for info in store.components().iter() {
        let (Some(ty), Some(value)) = (info.value_type(), info.read(&store.world, entity)) else {
            continue;
        };
        if let Some(json) = ty.to_json(&*value) {
            components.insert(info.short_name().to_string(), json);
        }
    }
    let children = store
        .world
        .get::<DynamicBuffer<Child>>(entity)
        .map(|buffer| buffer.iter().map(|child| store.entity_label(child.0)).collect())
        .unwrap_or_default();
    EntitySummary {
        entity: entity_id_label(entity),
        name: store.entity_name(entity).map(str::to_string),
        components,
        children,
    }
}
