use crate::element::ElementId;
use crate::enode::NodeArena;
use crate::enode::NodeId;
use crate::epin::EPin;
use crate::simulator::SimContext;

// Shockley model constants, same operating assumptions as the reference
// stamp code.
const SAT_CURRENT: f64 = 171.4352819281e-9;
const EMISSION: f64 = 2.0;
const THERMAL_VOLTAGE: f64 = 8.617e-5 * (273.15 + 22.0);
const NVT: f64 = EMISSION * THERMAL_VOLTAGE;

/// Forward voltage beyond which the linearization point is clamped; keeps
/// the exponential from overflowing between relaxation passes.
const VD_CLAMP: f64 = 2.0;

const CURRENT_EPSILON: f64 = 1e-12;

/// Diode / LED: exponential element linearized at the previous operating
/// point into a companion (conductance, current source) pair per pin, then
/// iterated to a fixed point through volt-changed relaxation across steps.
/// This local iteration is an approximation of the true simultaneous solve
/// and is preserved as such.
#[derive(Debug)]
pub struct Diode {
    pins: [EPin; 2], // [anode, cathode]
    owner: Option<ElementId>,
}

impl Default for Diode {
    fn default() -> Self {
        Self::new()
    }
}

impl Diode {
    pub fn new() -> Self {
        Self {
            pins: [EPin::new(), EPin::new()],
            owner: None,
        }
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, anode: NodeId, cathode: NodeId) {
        self.pins[0].connect(nodes, anode);
        self.pins[1].connect(nodes, cathode);
    }

    /// Forward current at the last linearization point.
    pub fn current(&self, nodes: &NodeArena) -> f64 {
        let vd = self.pins[0].volt(nodes) - self.pins[1].volt(nodes);
        SAT_CURRENT * ((vd.min(VD_CLAMP) / NVT).exp() - 1.0)
    }

    pub(crate) fn set_owner(&mut self, id: ElementId) {
        self.owner = Some(id);
    }

    pub(crate) fn initialize(&mut self, _ctx: &mut SimContext) {}

    pub(crate) fn stamp(&mut self, ctx: &mut SimContext) {
        if let Some(owner) = self.owner {
            for pin in &self.pins {
                if let Some(node) = pin.node() {
                    ctx.nodes.add_callback(node, owner);
                }
            }
        }
        self.restamp(&mut ctx.nodes, true);
    }

    pub(crate) fn volt_changed(&mut self, ctx: &mut SimContext) {
        self.restamp(&mut ctx.nodes, false);
    }

    fn restamp(&mut self, nodes: &mut NodeArena, force: bool) {
        let v0 = self.pins[0].volt(nodes);
        let v1 = self.pins[1].volt(nodes);
        let vd = (v0 - v1).min(VD_CLAMP);

        let ex = (vd / NVT).exp();
        let geq = SAT_CURRENT / NVT * ex;
        let ieq = SAT_CURRENT * (ex - 1.0) - geq * vd;

        // Norton view from each node, using the opposite node's last solve.
        let i0 = geq * v1 - ieq;
        let i1 = geq * v0 + ieq;

        if force || (i0 - self.pins[0].current()).abs() > CURRENT_EPSILON {
            self.pins[0].stamp(nodes, geq, i0);
        }
        if force || (i1 - self.pins[1].current()).abs() > CURRENT_EPSILON {
            self.pins[1].stamp(nodes, geq, i1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::iopin::PinMode;
    use crate::pindriver::PinDriver;
    use crate::resistor::Resistor;
    use crate::simulator::{SimConfig, Simulator};

    #[test]
    fn led_drops_about_a_diode_forward_voltage() {
        let mut sim = Simulator::new(SimConfig::default());
        let top = sim.add_node();
        let mid = sim.add_node();
        let bottom = sim.add_node();

        let (_, ctx) = sim.parts();
        let mut rail = PinDriver::new(PinMode::Source);
        rail.connect(&mut ctx.nodes, top);
        let mut gnd = PinDriver::new(PinMode::Output);
        gnd.connect(&mut ctx.nodes, bottom);
        let mut r = Resistor::new(330.0);
        r.connect(&mut ctx.nodes, top, mid);
        let mut led = Diode::new();
        led.connect(&mut ctx.nodes, mid, bottom);

        sim.add_element(Element::Driver(rail));
        sim.add_element(Element::Driver(gnd));
        sim.add_element(Element::Resistor(r));
        sim.add_element(Element::Diode(led));

        sim.start().unwrap();
        for _ in 0..50 {
            sim.run_step();
        }

        let vf = sim.node_volt(mid);
        assert!(vf > 0.5 && vf < 1.2, "forward voltage out of range: {vf}");
    }

    #[test]
    fn reverse_biased_diode_conducts_nothing() {
        let mut sim = Simulator::new(SimConfig::default());
        let top = sim.add_node();
        let mid = sim.add_node();
        let bottom = sim.add_node();

        let (_, ctx) = sim.parts();
        let mut rail = PinDriver::new(PinMode::Source);
        rail.connect(&mut ctx.nodes, top);
        let mut gnd = PinDriver::new(PinMode::Output);
        gnd.connect(&mut ctx.nodes, bottom);
        let mut r = Resistor::new(330.0);
        r.connect(&mut ctx.nodes, top, mid);
        // Cathode to the resistor, anode to ground: blocking.
        let mut d = Diode::new();
        d.connect(&mut ctx.nodes, bottom, mid);

        sim.add_element(Element::Driver(rail));
        sim.add_element(Element::Driver(gnd));
        sim.add_element(Element::Resistor(r));
        sim.add_element(Element::Diode(d));

        sim.start().unwrap();
        for _ in 0..50 {
            sim.run_step();
        }

        // No current path: the mid node floats up to the rail.
        let v = sim.node_volt(mid);
        assert!(v > 4.5, "blocking diode should not load the node: {v}");
    }
}
