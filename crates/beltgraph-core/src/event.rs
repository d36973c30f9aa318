//! Typed notifications with pre-allocated ring buffers.
//!
//! Events are emitted while the network settles placements and runs ticks,
//! then delivered in batch at the end of each `step`/`advance` call. Each
//! event kind has its own [`EventBuffer`] ring buffer with a configurable
//! capacity.
//!
//! Ordinary shipments emit nothing; visual movement is driven through the
//! [`ResourceMover`](crate::mover::ResourceMover) instead.
//!
//! # Suppression
//!
//! Event kinds can be suppressed via [`EventBus::suppress`], which prevents
//! any allocation or recording for that kind.

use crate::fixed::Ticks;
use crate::id::{NodeId, PathId, ResourceId, ResourceTypeId};
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A network event. All events carry the tick at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // -- Resources --
    /// A consumer destroyed a resource.
    WidgetCollected {
        node: NodeId,
        resource_type: ResourceTypeId,
        tick: Ticks,
    },
    ResourceSpawned {
        node: NodeId,
        resource: ResourceId,
        resource_type: ResourceTypeId,
        tick: Ticks,
    },

    // -- Topology --
    NodePlaced {
        node: NodeId,
        tick: Ticks,
    },
    NodeRemoved {
        node: NodeId,
        tick: Ticks,
    },
    /// The loop guard refused a link.
    LinkRejected {
        from: NodeId,
        to: NodeId,
        tick: Ticks,
    },

    // -- Paths --
    PathCreated {
        path: PathId,
        tick: Ticks,
    },
    PathsMerged {
        into: PathId,
        absorbed: PathId,
        tick: Ticks,
    },
    PathSplit {
        from: PathId,
        into: PathId,
        tick: Ticks,
    },
    PathFreed {
        path: PathId,
        tick: Ticks,
    },
}

/// Discriminant tag for event types, used for suppression and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    WidgetCollected,
    ResourceSpawned,
    NodePlaced,
    NodeRemoved,
    LinkRejected,
    PathCreated,
    PathsMerged,
    PathSplit,
    PathFreed,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 9;

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::WidgetCollected { .. } => EventKind::WidgetCollected,
            Event::ResourceSpawned { .. } => EventKind::ResourceSpawned,
            Event::NodePlaced { .. } => EventKind::NodePlaced,
            Event::NodeRemoved { .. } => EventKind::NodeRemoved,
            Event::LinkRejected { .. } => EventKind::LinkRejected,
            Event::PathCreated { .. } => EventKind::PathCreated,
            Event::PathsMerged { .. } => EventKind::PathsMerged,
            Event::PathSplit { .. } => EventKind::PathSplit,
            Event::PathFreed { .. } => EventKind::PathFreed,
        }
    }
}

impl EventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventBuffer
// ---------------------------------------------------------------------------

/// A pre-allocated ring buffer for events. Fixed capacity; when full, the
/// oldest events are dropped.
#[derive(Debug)]
pub struct EventBuffer {
    events: VecDeque<Event>,
    capacity: usize,
    /// Total events ever written (including dropped).
    total_written: u64,
}

impl EventBuffer {
    /// Create a new ring buffer with the given capacity.
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        }
    }

    /// Push an event into the ring buffer. If full, the oldest event is dropped.
    pub fn push(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    /// Number of events that were overwritten because the buffer was full.
    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity as u64)
    }

    /// Iterate over events in order from oldest to newest.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Event> + '_ {
        self.events.iter()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// Optional predicate that filters events for a subscriber.
pub type EventFilter = Box<dyn Fn(&Event) -> bool>;

/// Priority level for event subscribers. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubscriberPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

struct SubscriberEntry {
    listener: PassiveListener,
    priority: SubscriberPriority,
    filter: Option<EventFilter>,
    insertion_order: u64,
}

impl std::fmt::Debug for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("insertion_order", &self.insertion_order)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Holds one ring buffer per event kind, subscriber lists, and suppression
/// flags.
pub struct EventBus {
    buffers: [Option<EventBuffer>; EVENT_KIND_COUNT],
    /// Suppressed event kinds are never buffered.
    suppressed: [bool; EVENT_KIND_COUNT],
    subscribers: [Vec<SubscriberEntry>; EVENT_KIND_COUNT],
    default_capacity: usize,
    /// Monotonically increasing counter for stable sort ordering.
    next_insertion_order: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("buffers", &self.buffers)
            .field("suppressed", &self.suppressed)
            .field("subscribers", &self.subscribers)
            .field("default_capacity", &self.default_capacity)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a new event bus with the given default buffer capacity per kind.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            buffers: Default::default(),
            suppressed: [false; EVENT_KIND_COUNT],
            subscribers: Default::default(),
            default_capacity,
            next_insertion_order: 0,
        }
    }

    /// Suppress an event kind. Its buffer is dropped and never reallocated.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.buffers[kind.index()] = None;
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Store an event in its kind's ring buffer. No-op if suppressed.
    pub fn emit(&mut self, event: Event) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        let capacity = self.default_capacity;
        self.buffers[idx]
            .get_or_insert_with(|| EventBuffer::new(capacity))
            .push(event);
    }

    /// Register a listener with Normal priority and no filter.
    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) {
        self.on_passive_filtered(kind, SubscriberPriority::Normal, None, listener);
    }

    /// Register a listener with explicit priority and optional filter.
    pub fn on_passive_filtered(
        &mut self,
        kind: EventKind,
        priority: SubscriberPriority,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        self.subscribers[kind.index()].push(SubscriberEntry {
            listener,
            priority,
            filter,
            insertion_order: order,
        });
    }

    /// Deliver all buffered events to subscribers, oldest first, then clear
    /// the buffers. Subscribers run in `(priority, insertion_order)` order.
    pub fn deliver(&mut self) {
        for idx in 0..EVENT_KIND_COUNT {
            if self.suppressed[idx] {
                continue;
            }
            let Some(buffer) = self.buffers[idx].as_ref() else {
                continue;
            };
            if buffer.is_empty() {
                continue;
            }

            let events: Vec<Event> = buffer.iter().cloned().collect();
            self.subscribers[idx].sort_by_key(|entry| (entry.priority, entry.insertion_order));

            for entry in &mut self.subscribers[idx] {
                for event in &events {
                    if let Some(filter) = &entry.filter
                        && !filter(event)
                    {
                        continue;
                    }
                    (entry.listener)(event);
                }
            }

            if let Some(buffer) = self.buffers[idx].as_mut() {
                buffer.clear();
            }
        }
    }

    pub fn buffer(&self, kind: EventKind) -> Option<&EventBuffer> {
        self.buffers[kind.index()].as_ref()
    }

    /// Events currently buffered for a kind.
    pub fn buffered_count(&self, kind: EventKind) -> usize {
        self.buffers[kind.index()].as_ref().map_or(0, |b| b.len())
    }

    /// Total events ever emitted for a kind (including dropped).
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.buffers[kind.index()]
            .as_ref()
            .map_or(0, |b| b.total_written())
    }

    /// Clear all buffers. Subscribers and suppression settings stay.
    pub fn clear_all(&mut self) {
        for buffer in self.buffers.iter_mut().flatten() {
            buffer.clear();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn make_node_id() -> NodeId {
        let mut sm = SlotMap::<NodeId, ()>::with_key();
        sm.insert(())
    }

    fn collected(node: NodeId, tick: Ticks) -> Event {
        Event::WidgetCollected {
            node,
            resource_type: ResourceTypeId(0),
            tick,
        }
    }

    #[test]
    fn event_buffer_ring_wraps_and_drops_oldest() {
        let mut buf = EventBuffer::new(3);
        let node = make_node_id();
        for tick in 0..5 {
            buf.push(collected(node, tick));
        }

        assert_eq!(buf.len(), 3);
        assert_eq!(buf.total_written(), 5);
        assert_eq!(buf.dropped_count(), 2);

        let ticks: Vec<Ticks> = buf
            .iter()
            .map(|e| match e {
                Event::WidgetCollected { tick, .. } => *tick,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ticks, vec![2, 3, 4]);
    }

    #[test]
    fn zero_capacity_clamped_to_one() {
        let mut buf = EventBuffer::new(0);
        assert_eq!(buf.capacity(), 1);
        buf.push(collected(make_node_id(), 1));
        buf.push(collected(make_node_id(), 2));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn suppressed_kind_is_never_buffered() {
        let mut bus = EventBus::new(8);
        bus.suppress(EventKind::WidgetCollected);
        bus.emit(collected(make_node_id(), 0));
        assert!(bus.is_suppressed(EventKind::WidgetCollected));
        assert_eq!(bus.buffered_count(EventKind::WidgetCollected), 0);
        assert!(bus.buffer(EventKind::WidgetCollected).is_none());
    }

    #[test]
    fn deliver_calls_listeners_in_priority_order_and_clears() {
        let mut bus = EventBus::new(8);
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        bus.on_passive_filtered(
            EventKind::WidgetCollected,
            SubscriberPriority::Post,
            None,
            Box::new(move |_| l.borrow_mut().push("post")),
        );
        let l = log.clone();
        bus.on_passive(
            EventKind::WidgetCollected,
            Box::new(move |_| l.borrow_mut().push("normal")),
        );
        let l = log.clone();
        bus.on_passive_filtered(
            EventKind::WidgetCollected,
            SubscriberPriority::Pre,
            None,
            Box::new(move |_| l.borrow_mut().push("pre")),
        );

        bus.emit(collected(make_node_id(), 4));
        bus.deliver();

        assert_eq!(*log.borrow(), vec!["pre", "normal", "post"]);
        assert_eq!(bus.buffered_count(EventKind::WidgetCollected), 0);
        assert_eq!(bus.total_emitted(EventKind::WidgetCollected), 1);
    }

    #[test]
    fn filter_skips_unwanted_events() {
        let mut bus = EventBus::new(8);
        let seen = Rc::new(RefCell::new(0u32));
        let s = seen.clone();
        bus.on_passive_filtered(
            EventKind::WidgetCollected,
            SubscriberPriority::Normal,
            Some(Box::new(|e| matches!(e, Event::WidgetCollected { tick, .. } if *tick >= 10))),
            Box::new(move |_| *s.borrow_mut() += 1),
        );

        let node = make_node_id();
        bus.emit(collected(node, 5));
        bus.emit(collected(node, 10));
        bus.emit(collected(node, 11));
        bus.deliver();
        assert_eq!(*seen.borrow(), 2);
    }

    #[test]
    fn event_kind_matches_variant() {
        let node = make_node_id();
        assert_eq!(
            Event::PathSplit {
                from: PathId(0),
                into: PathId(1),
                tick: 0
            }
            .kind(),
            EventKind::PathSplit
        );
        assert_eq!(
            Event::LinkRejected {
                from: node,
                to: node,
                tick: 0
            }
            .kind(),
            EventKind::LinkRejected
        );
    }
}
