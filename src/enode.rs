use std::collections::VecDeque;

use log::trace;

use crate::element::ElementId;

/// Handle into the [`NodeArena`]. Rebuilding the connectivity graph clears
/// the arena and invalidates every outstanding handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// A circuit node: the running totals of every attached pin's Thevenin
/// contribution, plus the voltage solved from them.
///
/// The solve is strictly per-node: `V = (Σ Iₖ) / (Σ Gₖ)` over all attached
/// pin slots. Multi-terminal elements get their coupling by re-stamping
/// current sources from the opposite node's last voltage, so the totals here
/// never depend on stamping order within a step.
#[derive(Debug, Default)]
pub struct ENode {
    number: usize,
    volt: f64,
    /// One `(conductance, current)` pair per attached pin slot.
    contributions: Vec<(f64, f64)>,
    /// Elements notified when the solved voltage moves.
    callbacks: Vec<ElementId>,
}

impl ENode {
    pub fn volt(&self) -> f64 {
        self.volt
    }

    pub fn number(&self) -> usize {
        self.number
    }

    fn total_conductance(&self) -> f64 {
        self.contributions.iter().map(|c| c.0).sum()
    }

    fn total_current(&self) -> f64 {
        self.contributions.iter().map(|c| c.1).sum()
    }
}

/// Owns every [`ENode`] in the circuit and the queue of change callbacks
/// waiting to be delivered by the scheduler.
#[derive(Debug)]
pub struct NodeArena {
    nodes: Vec<ENode>,
    changed: VecDeque<ElementId>,
    min_conductance: f64,
}

/// Voltage delta below which a re-solve is not considered a change.
const VOLT_EPSILON: f64 = 1e-12;

impl NodeArena {
    pub fn new(min_conductance: f64) -> Self {
        Self {
            nodes: Vec::new(),
            changed: VecDeque::new(),
            min_conductance,
        }
    }

    /// Create a new node and return its handle.
    pub fn alloc(&mut self) -> NodeId {
        let number = self.nodes.len();
        self.nodes.push(ENode {
            number,
            ..ENode::default()
        });
        NodeId(number)
    }

    /// Drop every node. Outstanding `NodeId`s and pin slots become invalid;
    /// callers rebuild connectivity from scratch rather than patching a live
    /// pointer graph.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.changed.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Attach one more pin to `node`, returning the contribution slot the
    /// pin stamps into from now on.
    pub fn attach(&mut self, node: NodeId) -> usize {
        let contributions = &mut self.nodes[node.0].contributions;
        contributions.push((0.0, 0.0));
        contributions.len() - 1
    }

    pub fn volt(&self, node: NodeId) -> f64 {
        self.nodes[node.0].volt
    }

    /// Replace the `(conductance, current)` pair in one pin slot and
    /// re-solve the node.
    pub fn stamp(&mut self, node: NodeId, slot: usize, admit: f64, current: f64) {
        self.nodes[node.0].contributions[slot] = (admit, current);
        self.solve(node);
    }

    /// Register `element` for volt-changed callbacks on `node`.
    pub fn add_callback(&mut self, node: NodeId, element: ElementId) {
        let callbacks = &mut self.nodes[node.0].callbacks;
        if !callbacks.contains(&element) {
            callbacks.push(element);
        }
    }

    pub fn remove_callback(&mut self, node: NodeId, element: ElementId) {
        self.nodes[node.0].callbacks.retain(|e| *e != element);
    }

    /// Next element owed a volt-changed callback, if any.
    pub(crate) fn pop_changed(&mut self) -> Option<ElementId> {
        self.changed.pop_front()
    }

    pub(crate) fn clear_changed(&mut self) {
        self.changed.clear();
    }

    fn solve(&mut self, node: NodeId) {
        let n = &self.nodes[node.0];
        let conductance = n.total_conductance();

        if conductance < self.min_conductance {
            // Open node: nothing drives it, hold the last voltage rather
            // than divide by (near) zero.
            trace!("node {} open (G = {conductance:.3e}), holding volt", n.number);
            return;
        }
        let volt = n.total_current() / conductance;

        if (volt - n.volt).abs() > VOLT_EPSILON {
            self.nodes[node.0].volt = volt;
            let callbacks = self.nodes[node.0].callbacks.clone();
            for element in callbacks {
                if !self.changed.contains(&element) {
                    self.changed.push_back(element);
                }
            }
        }
    }
}
