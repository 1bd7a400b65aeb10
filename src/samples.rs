//! Sample components and the command set registered by
//! [`CommandRegistry::with_samples`](crate::command::CommandRegistry::with_samples).

use anyhow::ensure;
use bevy_ecs::prelude::{Component, Entity};
use bevy_reflect::Reflect;
use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::command::{CommandRegistry, CommandSpec, ParamDecl};
use crate::picker::{ComponentAccess, EntityPickerSpec};
use crate::store::ComponentRegistry;
use crate::value::TypeKey;

const DECLARING: &str = "kestrel_commands::samples::SampleCommands";

#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec2,
    pub rotation: f32,
    pub scale: Vec2,
}

impl Default for Transform {
    fn default() -> Self {
        Self { translation: Vec2::ZERO, rotation: 0.0, scale: Vec2::ONE }
    }
}

#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocalToWorld {
    pub translation: Vec2,
}

#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Static;

#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Disabled;

#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tag;

#[derive(Component, Reflect, Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity(pub Vec2);

/// Buffer element linking a parent to one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Child(pub Entity);

#[derive(Reflect, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomStruct {
    pub x: i32,
}

pub fn sample_components() -> ComponentRegistry {
    let mut components = ComponentRegistry::new();
    components
        .register::<Transform>()
        .register::<LocalToWorld>()
        .register::<Static>()
        .register::<Disabled>()
        .register::<Tag>()
        .register::<Velocity>()
        .register_buffer::<Child>();
    components
}

fn movable_static_target() -> EntityPickerSpec {
    EntityPickerSpec::new()
        .with::<Transform>()
        .with::<Static>()
        .all_access(ComponentAccess::ReadOnly)
        .without::<Disabled>()
}

pub fn register_commands(registry: &mut CommandRegistry) {
    registry
        .register(adjust())
        .register(spawn())
        .register(do_thing())
        .register(copy_transform())
        .register(reset_child_transforms())
        .register(do_thing_parallel())
        .register(spawn_other());
}

/// `y = x - 1`, then `x += 1`.
fn adjust() -> CommandSpec {
    CommandSpec::new(DECLARING, "adjust", |frame| {
        let x: i32 = frame.get("x")?;
        frame.set("y", x - 1)?;
        frame.set("x", x + 1)?;
        Ok(None)
    })
    .category("Sample : Test")
    .param(ParamDecl::store("store"))
    .param(ParamDecl::value::<i32>("x").by_ref())
    .param(ParamDecl::value::<i32>("y").out())
}

fn spawn() -> CommandSpec {
    CommandSpec::new(DECLARING, "spawn", |frame| {
        let count: i32 = frame.get("count")?;
        let store = frame.store_name().to_string();
        let world = frame.world_mut()?;
        for _ in 0..count.max(0) {
            world.spawn_empty();
        }
        log::info!("[samples] spawning {count} entities in {store}");
        Ok(None)
    })
    .category("Debug")
    .param(ParamDecl::store("store"))
    .param(ParamDecl::value::<i32>("count"))
    .param(ParamDecl::value::<ComponentAccess>("access").input())
    .param(ParamDecl::value::<CustomStruct>("custom").by_ref())
}

/// Moves the picked entity up by one unit.
fn do_thing() -> CommandSpec {
    CommandSpec::new(DECLARING, "do_thing", |frame| {
        let target = frame.entity("target")?;
        let mut transforms = frame.component_lookup_mut::<Transform>("transforms")?;
        if let Some(mut transform) = transforms.get_mut(target)? {
            transform.translation.y += 1.0;
        }
        Ok(None)
    })
    .category("Debug")
    .param(ParamDecl::store("store"))
    .param(ParamDecl::entity("target").input().with_picker(movable_static_target()))
    .param(ParamDecl::component_lookup::<Transform>("transforms").by_ref())
    .param(ParamDecl::component_lookup::<Static>("statics").input().read_only())
}

fn copy_transform() -> CommandSpec {
    CommandSpec::new(DECLARING, "copy_transform", |frame| {
        let from: Transform = frame.get("from")?;
        frame.set("to", from)?;
        Ok(None)
    })
    .category("Debug")
    .param(ParamDecl::store("store"))
    .param(ParamDecl::value::<Transform>("from").input().from_reference("From"))
    .param(ParamDecl::value::<Transform>("to").by_ref().from_reference_with("To", [TypeKey::of::<LocalToWorld>()]))
}

/// Queues a transform reset for every child of the referenced parent that has one.
fn reset_child_transforms() -> CommandSpec {
    CommandSpec::new(DECLARING, "reset_child_transforms", |frame| {
        let children: Vec<Entity> = frame.buffer::<Child>("children")?.iter().map(|child| child.0).collect();
        let targets: Vec<Entity> = {
            let transforms = frame.component_lookup::<Transform>("transforms")?;
            children.into_iter().filter(|child| transforms.has_component(*child)).collect()
        };
        let commands = frame.commands()?;
        for child in targets {
            commands.set_component(child, Transform::default());
        }
        Ok(None)
    })
    .category("Debug")
    .param(ParamDecl::mutation_buffer("commands"))
    .param(ParamDecl::component_lookup::<Transform>("transforms").input().read_only())
    .param(ParamDecl::buffer::<Child>("children").input().from_reference("Parent"))
}

fn do_thing_parallel() -> CommandSpec {
    CommandSpec::new(DECLARING, "do_thing_parallel", |frame| {
        let sort_key: i32 = frame.get("sort_key")?;
        let target = frame.entity("target")?;
        ensure!(target != Entity::PLACEHOLDER, "Value cannot be null. (Parameter 'target')");
        let moved = frame.component_lookup::<Transform>("transforms")?.get(target).map(|transform| {
            let mut moved = *transform;
            moved.translation.y += 1.0;
            moved
        });
        if let Some(moved) = moved {
            frame.parallel_writer()?.set_component(sort_key, target, moved);
        }
        Ok(None)
    })
    .category("Debug")
    .param(ParamDecl::parallel_writer("writer"))
    .param(ParamDecl::value::<i32>("sort_key").input())
    .param(ParamDecl::entity("target").input().with_picker(movable_static_target()))
    .param(ParamDecl::component_lookup::<Transform>("transforms").by_ref())
    .param(ParamDecl::component_lookup::<Static>("statics").input().read_only())
}

fn spawn_other() -> CommandSpec {
    CommandSpec::new(DECLARING, "spawn_other", |frame| {
        let count: i32 = frame.get("count")?;
        let commands = frame.commands()?;
        for _ in 0..count.max(0) {
            commands.spawn_empty();
        }
        Ok(None)
    })
    .category("Other")
    .param(ParamDecl::mutation_buffer("commands"))
    .param(ParamDecl::value::<i32>("count"))
}
