use crate::element::ElementId;
use crate::enode::{NodeArena, NodeId};
use crate::iopin::{IoPin, PinMode};
use crate::simulator::SimContext;

/// A standalone pin used as a rail, ground, or test stimulus: one `IoPin`
/// promoted to a full element so the embedding layer can wire voltage
/// sources and probes without a component around them.
#[derive(Debug)]
pub struct PinDriver {
    pin: IoPin,
    mode: PinMode,
    init_out: bool,
}

impl PinDriver {
    pub fn new(mode: PinMode) -> Self {
        Self {
            pin: IoPin::new(),
            mode,
            init_out: false,
        }
    }

    /// Output state applied at initialization.
    pub fn with_out(mut self, out: bool) -> Self {
        self.init_out = out;
        self
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, node: NodeId) {
        self.pin.connect(nodes, node);
    }

    pub fn pin(&self) -> &IoPin {
        &self.pin
    }

    pub fn pin_mut(&mut self) -> &mut IoPin {
        &mut self.pin
    }

    pub fn set_state(&mut self, nodes: &mut NodeArena, out: bool) {
        self.pin.set_out_state(nodes, out);
    }

    pub fn read(&mut self, nodes: &NodeArena) -> bool {
        self.pin.get_inp_state(nodes)
    }

    pub(crate) fn set_owner(&mut self, id: ElementId) {
        self.pin.set_owner(id);
    }

    pub(crate) fn initialize(&mut self, ctx: &mut SimContext) {
        self.pin.initialize(&mut ctx.nodes);
        self.pin.set_pin_mode(&mut ctx.nodes, self.mode);
        if matches!(self.mode, PinMode::Output | PinMode::OpenCollector) {
            self.pin.set_out_state(&mut ctx.nodes, self.init_out);
        }
    }
}
