use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bevy_ecs::bundle::Bundle;
use bevy_ecs::component::Component;
use bevy_ecs::prelude::{Entity, World};
use bevy_ecs::world::CommandQueue;

use crate::events::{BufferKind, EventBusHandle, RunEvent};

/// Deferred structural and component writes, applied to a world only on playback.
#[derive(Default)]
pub struct MutationBuffer {
    queue: CommandQueue,
    len: usize,
}

impl MutationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, command: F)
    where
        F: FnOnce(&mut World) + Send + 'static,
    {
        self.queue.push(command);
        self.len += 1;
    }

    pub fn spawn<B: Bundle>(&mut self, bundle: B) {
        self.push(move |world: &mut World| {
            world.spawn(bundle);
        });
    }

    pub fn spawn_empty(&mut self) {
        self.push(|world: &mut World| {
            world.spawn_empty();
        });
    }

    pub fn insert<C: Component>(&mut self, entity: Entity, component: C) {
        self.push(move |world: &mut World| match world.get_entity_mut(entity) {
            Ok(mut target) => {
                target.insert(component);
            }
            Err(_) => log::warn!("[buffer] insert skipped: entity {entity} no longer exists"),
        });
    }

    /// Overwrites an existing component; entities without it are left untouched.
    pub fn set_component<C: Component>(&mut self, entity: Entity, component: C) {
        self.push(move |world: &mut World| match world.get_mut::<C>(entity) {
            Some(mut slot) => *slot = component,
            None => log::warn!(
                "[buffer] set_component skipped: entity {entity} has no {}",
                std::any::type_name::<C>()
            ),
        });
    }

    pub fn remove<C: Component>(&mut self, entity: Entity) {
        self.push(move |world: &mut World| {
            if let Ok(mut target) = world.get_entity_mut(entity) {
                target.remove::<C>();
            }
        });
    }

    pub fn despawn(&mut self, entity: Entity) {
        self.push(move |world: &mut World| {
            if !world.despawn(entity) {
                log::warn!("[buffer] despawn skipped: entity {entity} no longer exists");
            }
        });
    }

    pub fn append(&mut self, other: &mut MutationBuffer) {
        self.queue.append(&mut other.queue);
        self.len += std::mem::take(&mut other.len);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Applies every queued command in insertion order and returns how many ran.
    pub fn apply(&mut self, world: &mut World) -> usize {
        let count = std::mem::take(&mut self.len);
        self.queue.apply(world);
        count
    }
}

struct Shard {
    sort_key: i32,
    sequence: usize,
    buffer: MutationBuffer,
}

struct ParallelState {
    shards: Mutex<Vec<Shard>>,
    sequence: AtomicUsize,
    closed: AtomicBool,
}

/// Cloneable, thread-safe front end to a mutation buffer. Each recording carries a
/// sort key; playback orders recordings by (sort key, recording order) so results do
/// not depend on which writer finished first.
#[derive(Clone)]
pub struct ParallelWriter {
    state: Arc<ParallelState>,
}

impl Default for ParallelWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ParallelWriter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ParallelState {
                shards: Mutex::new(Vec::new()),
                sequence: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn record(&self, sort_key: i32, build: impl FnOnce(&mut MutationBuffer)) {
        if self.state.closed.load(Ordering::Acquire) {
            log::warn!("[buffer] parallel writer used after playback; recording for key {sort_key} dropped");
            return;
        }
        let mut buffer = MutationBuffer::new();
        build(&mut buffer);
        if buffer.is_empty() {
            return;
        }
        let sequence = self.state.sequence.fetch_add(1, Ordering::Relaxed);
        let mut shards = self.state.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards.push(Shard { sort_key, sequence, buffer });
    }

    pub fn spawn<B: Bundle>(&self, sort_key: i32, bundle: B) {
        self.record(sort_key, |buffer| buffer.spawn(bundle));
    }

    pub fn insert<C: Component>(&self, sort_key: i32, entity: Entity, component: C) {
        self.record(sort_key, |buffer| buffer.insert(entity, component));
    }

    pub fn set_component<C: Component>(&self, sort_key: i32, entity: Entity, component: C) {
        self.record(sort_key, |buffer| buffer.set_component(entity, component));
    }

    pub fn despawn(&self, sort_key: i32, entity: Entity) {
        self.record(sort_key, |buffer| buffer.despawn(entity));
    }

    pub fn len(&self) -> usize {
        let shards = self.state.shards.lock().unwrap_or_else(PoisonError::into_inner);
        shards.iter().map(|shard| shard.buffer.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the writer and merges the recordings into one buffer in playback order.
    fn close(&self) -> MutationBuffer {
        self.state.closed.store(true, Ordering::Release);
        let mut shards = std::mem::take(&mut *self.state.shards.lock().unwrap_or_else(PoisonError::into_inner));
        shards.sort_by_key(|shard| (shard.sort_key, shard.sequence));
        let mut merged = MutationBuffer::new();
        for shard in &mut shards {
            merged.append(&mut shard.buffer);
        }
        merged
    }
}

pub enum DeferredBuffer {
    Plain(MutationBuffer),
    Parallel(ParallelWriter),
}

impl DeferredBuffer {
    pub fn kind(&self) -> BufferKind {
        match self {
            DeferredBuffer::Plain(_) => BufferKind::Plain,
            DeferredBuffer::Parallel(_) => BufferKind::Parallel,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DeferredBuffer::Plain(buffer) => buffer.len(),
            DeferredBuffer::Parallel(writer) => writer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns the deferred buffer of one invocation. Playback happens at most once and only
/// when asked; release always happens, exactly once, when the scope is dropped.
pub struct BufferScope {
    command: String,
    buffer: Option<DeferredBuffer>,
    played_back: bool,
    events: EventBusHandle,
}

impl BufferScope {
    pub fn allocate(command: &str, kind: BufferKind, events: EventBusHandle) -> Self {
        let buffer = match kind {
            BufferKind::Plain => DeferredBuffer::Plain(MutationBuffer::new()),
            BufferKind::Parallel => DeferredBuffer::Parallel(ParallelWriter::new()),
        };
        log::debug!("[buffer] allocated {} for {command}", kind.label());
        events.push(RunEvent::BufferAllocated { command: command.to_string(), kind });
        Self { command: command.to_string(), buffer: Some(buffer), played_back: false, events }
    }

    pub fn kind(&self) -> Option<BufferKind> {
        self.buffer.as_ref().map(DeferredBuffer::kind)
    }

    pub fn mutation_buffer(&mut self) -> Option<&mut MutationBuffer> {
        match self.buffer.as_mut() {
            Some(DeferredBuffer::Plain(buffer)) => Some(buffer),
            _ => None,
        }
    }

    pub fn parallel_writer(&self) -> Option<ParallelWriter> {
        match self.buffer.as_ref() {
            Some(DeferredBuffer::Parallel(writer)) => Some(writer.clone()),
            _ => None,
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.as_ref().map_or(0, DeferredBuffer::len)
    }

    pub fn played_back(&self) -> bool {
        self.played_back
    }

    /// Applies the queued commands to `world`. Returns how many commands ran; a second
    /// call is a no-op.
    pub fn play_back(&mut self, world: &mut World) -> usize {
        let Some(buffer) = self.buffer.take() else {
            log::warn!("[buffer] {} already played back", self.command);
            return 0;
        };
        let mut merged = match buffer {
            DeferredBuffer::Plain(buffer) => buffer,
            DeferredBuffer::Parallel(writer) => writer.close(),
        };
        let commands = merged.apply(world);
        self.played_back = true;
        self.events.push(RunEvent::BufferPlayedBack { command: self.command.clone(), commands });
        commands
    }
}

impl Drop for BufferScope {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            let discarded = match buffer {
                DeferredBuffer::Plain(buffer) => buffer.len(),
                DeferredBuffer::Parallel(writer) => writer.close().len(),
            };
            if discarded > 0 {
                log::debug!("[buffer] discarded {discarded} queued commands for {}", self.command);
            }
        }
        self.events.push(RunEvent::BufferDisposed { command: self.command.clone(), played_back: self.played_back });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Component, Debug, Clone, Copy, PartialEq)]
    struct Marker(i32);

    fn disposal_events(events: &EventBusHandle) -> Vec<RunEvent> {
        events.drain().into_iter().filter(|e| matches!(e, RunEvent::BufferDisposed { .. })).collect()
    }

    #[test]
    fn playback_applies_once_then_disposes() {
        let events = EventBusHandle::default();
        let mut world = World::new();
        {
            let mut scope = BufferScope::allocate("test", BufferKind::Plain, events.clone());
            let buffer = scope.mutation_buffer().expect("plain buffer");
            buffer.spawn(Marker(1));
            buffer.spawn(Marker(2));
            assert_eq!(scope.play_back(&mut world), 2);
            assert_eq!(scope.play_back(&mut world), 0);
        }
        assert_eq!(world.query::<&Marker>().iter(&world).count(), 2);
        let drained = events.drain();
        assert!(matches!(drained[0], RunEvent::BufferAllocated { kind: BufferKind::Plain, .. }));
        assert!(matches!(drained[1], RunEvent::BufferPlayedBack { commands: 2, .. }));
        assert!(matches!(drained[2], RunEvent::BufferDisposed { played_back: true, .. }));
        assert_eq!(drained.len(), 3);
    }

    #[test]
    fn dropping_without_playback_discards_writes() {
        let events = EventBusHandle::default();
        let mut world = World::new();
        {
            let mut scope = BufferScope::allocate("test", BufferKind::Plain, events.clone());
            scope.mutation_buffer().expect("plain buffer").spawn(Marker(1));
        }
        assert_eq!(world.query::<&Marker>().iter(&world).count(), 0);
        let disposed = disposal_events(&events);
        assert_eq!(disposed, vec![RunEvent::BufferDisposed { command: "test".into(), played_back: false }]);
    }

    #[test]
    fn parallel_playback_orders_by_sort_key() {
        let events = EventBusHandle::default();
        let mut world = World::new();
        let target = world.spawn(Marker(0)).id();
        let mut scope = BufferScope::allocate("par", BufferKind::Parallel, events.clone());
        let writer = scope.parallel_writer().expect("parallel writer");
        let handles: Vec<_> = [3, 1, 2]
            .into_iter()
            .map(|key| {
                let writer = writer.clone();
                std::thread::spawn(move || writer.set_component(key, target, Marker(key)))
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        assert_eq!(scope.play_back(&mut world), 3);
        assert_eq!(world.get::<Marker>(target), Some(&Marker(3)), "highest sort key applies last");

        writer.spawn(9, Marker(9));
        assert!(writer.is_empty(), "closed writer drops late recordings");
    }
}
