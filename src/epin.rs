use crate::enode::{NodeArena, NodeId};

/// A circuit terminal: stamps its local Thevenin equivalent (one
/// admittance, one current source) into the node it is attached to and
/// reads the solved voltage back.
///
/// A pin is attached to at most one node at a time and only ever stamps
/// into its own slot there, so it can never corrupt another pin's
/// contribution.
#[derive(Debug, Default, Clone)]
pub struct EPin {
    node: Option<NodeId>,
    slot: usize,
    admit: f64,
    current: f64,
}

impl EPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn is_connected(&self) -> bool {
        self.node.is_some()
    }

    /// Attach to `node`, allocating a fresh contribution slot. Any previous
    /// attachment is released (its contribution zeroed) first.
    pub fn connect(&mut self, nodes: &mut NodeArena, node: NodeId) {
        self.disconnect(nodes);
        self.slot = nodes.attach(node);
        self.node = Some(node);
    }

    pub fn disconnect(&mut self, nodes: &mut NodeArena) {
        if let Some(node) = self.node.take() {
            nodes.stamp(node, self.slot, 0.0, 0.0);
        }
        self.admit = 0.0;
        self.current = 0.0;
    }

    pub fn admit(&self) -> f64 {
        self.admit
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn stamp_admitance(&mut self, nodes: &mut NodeArena, admit: f64) {
        self.admit = admit;
        self.push(nodes);
    }

    pub fn stamp_current(&mut self, nodes: &mut NodeArena, current: f64) {
        self.current = current;
        self.push(nodes);
    }

    pub fn stamp(&mut self, nodes: &mut NodeArena, admit: f64, current: f64) {
        self.admit = admit;
        self.current = current;
        self.push(nodes);
    }

    /// Solved voltage of the attached node; 0 V when floating.
    pub fn volt(&self, nodes: &NodeArena) -> f64 {
        match self.node {
            Some(node) => nodes.volt(node),
            None => 0.0,
        }
    }

    fn push(&self, nodes: &mut NodeArena) {
        if let Some(node) = self.node {
            nodes.stamp(node, self.slot, self.admit, self.current);
        }
    }
}
