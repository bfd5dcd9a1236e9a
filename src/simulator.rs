use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::{debug, warn};

use crate::element::{Element, ElementId};
use crate::enode::{NodeArena, NodeId};
use crate::error::SimError;

/// Scheduler configuration. Consumed once at construction; the step size
/// and frame granularity come from the embedding layer.
#[derive(Clone, Copy, Debug, serde::Deserialize, serde::Serialize)]
pub struct SimConfig {
    /// Fixed step, in picoseconds.
    pub step_size: u64,
    /// Steps batched per `run_frame` call.
    pub steps_per_frame: u32,
    /// Below this total conductance a node counts as open.
    pub min_conductance: f64,
    /// Cap on volt-changed relaxation per flush.
    pub max_relax_iters: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            step_size: 1_000_000, // 1 us
            steps_per_frame: 1000,
            min_conductance: 1e-14,
            max_relax_iters: 1000,
        }
    }
}

/// A scheduled future callback: `target.run_event()` at `time`.
#[derive(Debug, Clone, Copy)]
struct Event {
    time: u64,
    seq: u64,
    target: ElementId,
}

// Reversed (time, seq) ordering turns std's max-heap into a min-heap with
// FIFO tie-break for simultaneous events.
impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.seq).cmp(&(self.time, self.seq))
    }
}
impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for Event {}

#[derive(Debug, Default)]
struct EventQueue {
    heap: BinaryHeap<Event>,
    seq: u64,
}

impl EventQueue {
    fn push(&mut self, time: u64, target: ElementId) {
        self.heap.push(Event {
            time,
            seq: self.seq,
            target,
        });
        self.seq += 1;
    }

    fn pop_due(&mut self, limit: u64) -> Option<Event> {
        if self.heap.peek()?.time <= limit {
            self.heap.pop()
        } else {
            None
        }
    }

    fn cancel(&mut self, target: ElementId) {
        self.heap.retain(|e| e.target != target);
    }

    fn len(&self) -> usize {
        self.heap.len()
    }

    fn clear(&mut self) {
        self.heap.clear();
    }
}

/// Everything an element may touch from inside a callback: simulation time,
/// the node arena, and the event queue. Kept separate from the element list
/// so the scheduler can borrow an element and the context at once.
#[derive(Debug)]
pub struct SimContext {
    pub nodes: NodeArena,
    events: EventQueue,
    time: u64,
    pub config: SimConfig,
}

impl SimContext {
    fn new(config: SimConfig) -> Self {
        Self {
            nodes: NodeArena::new(config.min_conductance),
            events: EventQueue::default(),
            time: 0,
            config,
        }
    }

    /// Current simulation time, in picoseconds.
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Schedule `target.run_event()` at `now + delay`.
    pub fn add_event(&mut self, delay: u64, target: ElementId) {
        self.events.push(self.time + delay, target);
    }

    /// Remove every pending event for `target`. Idempotent: cancelling with
    /// nothing pending is a no-op.
    pub fn cancel_events(&mut self, target: ElementId) {
        self.events.cancel(target);
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

/// The simulation: an explicitly constructed context plus the registered
/// elements, advanced by a fixed-step loop with a sub-step event queue
/// layered on top.
#[derive(Debug)]
pub struct Simulator {
    ctx: SimContext,
    elements: Vec<Element>,
    running: bool,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        Self {
            ctx: SimContext::new(config),
            elements: Vec::new(),
            running: false,
        }
    }

    pub fn add_node(&mut self) -> NodeId {
        self.ctx.nodes.alloc()
    }

    /// Register an element. Must happen before `start()`; the returned id
    /// is its scheduling and callback identity.
    pub fn add_element(&mut self, mut element: Element) -> ElementId {
        let id = ElementId(self.elements.len());
        element.set_owner(id);
        self.elements.push(element);
        id
    }

    /// Validate the configuration, then run every element's
    /// `initialize`/`stamp` lifecycle and settle the network. The only
    /// place structural errors surface; stepping never fails.
    pub fn start(&mut self) -> Result<(), SimError> {
        if self.running {
            return Err(SimError::AlreadyRunning);
        }
        for (i, element) in self.elements.iter().enumerate() {
            element.validate(ElementId(i))?;
        }
        for i in 0..self.elements.len() {
            self.elements[i].initialize(&mut self.ctx);
        }
        for i in 0..self.elements.len() {
            self.elements[i].stamp(&mut self.ctx);
        }
        self.flush_changed();
        self.running = true;
        debug!(
            "simulation started: {} nodes, {} elements",
            self.ctx.nodes.len(),
            self.elements.len()
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        self.ctx.events.clear();
        self.running = false;
    }

    /// Back to t = 0 with all element state re-initialized. Node handles
    /// stay valid; only solved state and pending events are discarded.
    pub fn reset(&mut self) -> Result<(), SimError> {
        self.stop();
        self.ctx.time = 0;
        self.start()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn time(&self) -> u64 {
        self.ctx.time
    }

    pub fn node_volt(&self, node: NodeId) -> f64 {
        self.ctx.nodes.volt(node)
    }

    /// Split borrow for callers that need to poke an element and the
    /// context together (the embedding layer's mode/parameter changes).
    pub fn parts(&mut self) -> (&mut [Element], &mut SimContext) {
        (&mut self.elements, &mut self.ctx)
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.elements[id.0]
    }

    /// Advance one fixed step: fire every event due at or before the step
    /// boundary (in fire-time order, FIFO on ties), then run each element's
    /// `update_step` in registration order.
    pub fn run_step(&mut self) {
        if !self.running {
            return;
        }
        let boundary = self.ctx.time + self.ctx.config.step_size;

        while let Some(event) = self.ctx.events.pop_due(boundary) {
            self.ctx.time = event.time;
            self.elements[event.target.0].run_event(&mut self.ctx);
            self.flush_changed();
        }

        self.ctx.time = boundary;
        for i in 0..self.elements.len() {
            self.elements[i].update_step(&mut self.ctx);
        }
        self.flush_changed();
    }

    pub fn run_frame(&mut self) {
        for _ in 0..self.ctx.config.steps_per_frame {
            self.run_step();
        }
    }

    /// Deliver queued volt-changed callbacks until the network settles.
    /// Non-linear elements re-stamp from here, so this is also the local
    /// fixed-point relaxation; a cap keeps pathological circuits from
    /// hanging the step.
    fn flush_changed(&mut self) {
        let cap = self.ctx.config.max_relax_iters;
        let mut n = 0;
        while let Some(id) = self.ctx.nodes.pop_changed() {
            if n >= cap {
                warn!("volt-changed relaxation hit {cap} iterations, truncating");
                self.ctx.nodes.clear_changed();
                break;
            }
            n += 1;
            self.elements[id.0].volt_changed(&mut self.ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fire_in_time_order_across_targets() {
        let mut q = EventQueue::default();
        q.push(5, ElementId(0));
        q.push(3, ElementId(1));

        let first = q.pop_due(10).unwrap();
        assert_eq!((first.time, first.target), (3, ElementId(1)));
        let second = q.pop_due(10).unwrap();
        assert_eq!((second.time, second.target), (5, ElementId(0)));
    }

    #[test]
    fn simultaneous_events_fire_fifo() {
        let mut q = EventQueue::default();
        q.push(7, ElementId(2));
        q.push(7, ElementId(1));
        q.push(7, ElementId(3));

        assert_eq!(q.pop_due(7).unwrap().target, ElementId(2));
        assert_eq!(q.pop_due(7).unwrap().target, ElementId(1));
        assert_eq!(q.pop_due(7).unwrap().target, ElementId(3));
    }

    #[test]
    fn pop_due_respects_the_limit() {
        let mut q = EventQueue::default();
        q.push(8, ElementId(0));
        assert!(q.pop_due(7).is_none());
        assert!(q.pop_due(8).is_some());
    }

    #[test]
    fn cancel_removes_only_that_target() {
        let mut q = EventQueue::default();
        q.push(1, ElementId(0));
        q.push(2, ElementId(1));
        q.push(3, ElementId(0));

        q.cancel(ElementId(0));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_due(10).unwrap().target, ElementId(1));
    }

    #[test]
    fn cancel_with_nothing_pending_is_a_noop() {
        let mut q = EventQueue::default();
        q.push(4, ElementId(1));
        q.cancel(ElementId(9));
        assert_eq!(q.len(), 1);
    }
}
