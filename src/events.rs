use bevy_ecs::prelude::Entity;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Plain,
    Parallel,
}

impl BufferKind {
    pub fn label(self) -> &'static str {
        match self {
            BufferKind::Plain => "mutation buffer",
            BufferKind::Parallel => "parallel writer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    BufferAllocated { command: String, kind: BufferKind },
    BufferPlayedBack { command: String, commands: usize },
    BufferDisposed { command: String, played_back: bool },
    ComponentCommitted { command: String, entity: Entity, component: &'static str, reference: String },
    CommandSucceeded { command: String },
    CommandFailed { command: String, message: String },
}

impl RunEvent {
    pub fn command(&self) -> &str {
        match self {
            RunEvent::BufferAllocated { command, .. }
            | RunEvent::BufferPlayedBack { command, .. }
            | RunEvent::BufferDisposed { command, .. }
            | RunEvent::ComponentCommitted { command, .. }
            | RunEvent::CommandSucceeded { command }
            | RunEvent::CommandFailed { command, .. } => command,
        }
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunEvent::BufferAllocated { command, kind } => {
                write!(f, "BufferAllocated command={} kind={}", command, kind.label())
            }
            RunEvent::BufferPlayedBack { command, commands } => {
                write!(f, "BufferPlayedBack command={} commands={}", command, commands)
            }
            RunEvent::BufferDisposed { command, played_back } => {
                write!(f, "BufferDisposed command={} played_back={}", command, played_back)
            }
            RunEvent::ComponentCommitted { command, entity, component, reference } => {
                write!(
                    f,
                    "ComponentCommitted command={} entity={} component={} reference={}",
                    command,
                    entity.index(),
                    component,
                    reference
                )
            }
            RunEvent::CommandSucceeded { command } => write!(f, "CommandSucceeded command={command}"),
            RunEvent::CommandFailed { command, message } => {
                write!(f, "CommandFailed command={} message={}", command, message)
            }
        }
    }
}

/// Events kept before the oldest are dropped. Callers that never drain still stay bounded.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Bounded queue of run events; once full, each push evicts the oldest event.
pub struct EventBus {
    events: VecDeque<RunEvent>,
    capacity: usize,
    dropped: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { events: VecDeque::with_capacity(capacity.min(64)), capacity, dropped: 0 }
    }

    pub fn push(&mut self, event: RunEvent) {
        log::debug!("[events] {event}");
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<RunEvent> {
        if self.dropped > 0 {
            log::debug!("[events] {} events were evicted before this drain", self.dropped);
            self.dropped = 0;
        }
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events evicted since the last drain.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Shared view of a store's event bus; buffer scopes keep one so disposal can report
/// itself without access to the store.
#[derive(Clone, Default)]
pub struct EventBusHandle(Rc<RefCell<EventBus>>);

impl EventBusHandle {
    pub fn borrow(&self) -> Ref<'_, EventBus> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, EventBus> {
        self.0.borrow_mut()
    }

    pub fn push(&self, event: RunEvent) {
        self.0.borrow_mut().push(event);
    }

    pub fn drain(&self) -> Vec<RunEvent> {
        self.0.borrow_mut().drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_clones_share_one_bus() {
        let bus = EventBusHandle::default();
        let other = bus.clone();
        other.push(RunEvent::CommandSucceeded { command: "Samples.adjust".into() });
        assert_eq!(bus.borrow().len(), 1);
        let drained = bus.drain();
        assert_eq!(drained[0].to_string(), "CommandSucceeded command=Samples.adjust");
        assert!(other.borrow().is_empty());
    }

    #[test]
    fn full_bus_evicts_the_oldest_events() {
        let mut bus = EventBus::with_capacity(3);
        for index in 0..5 {
            bus.push(RunEvent::CommandSucceeded { command: format!("run{index}") });
        }
        assert_eq!(bus.len(), 3);
        assert_eq!(bus.dropped(), 2);
        let kept: Vec<_> = bus.drain().iter().map(|event| event.command().to_string()).collect();
        assert_eq!(kept, vec!["run2", "run3", "run4"]);
        assert_eq!(bus.dropped(), 0);
        assert_eq!(EventBus::default().capacity(), DEFAULT_EVENT_CAPACITY);
    }
}
