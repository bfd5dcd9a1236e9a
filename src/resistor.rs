use crate::element::ElementId;
use crate::enode::{NodeArena, NodeId};
use crate::epin::EPin;
use crate::error::SimError;
use crate::simulator::SimContext;

/// Current delta below which a re-stamp is skipped; this is what terminates
/// the per-pin fixed-point relaxation.
const CURRENT_EPSILON: f64 = 1e-12;

/// Two-terminal resistor. Each pin stamps the conductance plus a current
/// source taken from the opposite node's last solved voltage, so coupling
/// between the two nodes converges by relaxation instead of a simultaneous
/// solve. That approximation is deliberate and kept.
#[derive(Debug)]
pub struct Resistor {
    pins: [EPin; 2],
    resistance: f64,
    owner: Option<ElementId>,
}

impl Resistor {
    pub fn new(resistance: f64) -> Self {
        Self {
            pins: [EPin::new(), EPin::new()],
            resistance,
            owner: None,
        }
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, a: NodeId, b: NodeId) {
        self.pins[0].connect(nodes, a);
        self.pins[1].connect(nodes, b);
    }

    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    pub fn set_resistance(&mut self, nodes: &mut NodeArena, resistance: f64) {
        self.resistance = resistance;
        restamp_pair(&mut self.pins, nodes, 1.0 / resistance, true);
    }

    pub(crate) fn set_owner(&mut self, id: ElementId) {
        self.owner = Some(id);
    }

    pub(crate) fn validate(&self, id: ElementId) -> Result<(), SimError> {
        if self.resistance <= 0.0 {
            return Err(SimError::InvalidParam {
                element: id,
                what: format!("resistance {} must be positive", self.resistance),
            });
        }
        Ok(())
    }

    pub(crate) fn initialize(&mut self, _ctx: &mut SimContext) {}

    pub(crate) fn stamp(&mut self, ctx: &mut SimContext) {
        subscribe_pair(&self.pins, &mut ctx.nodes, self.owner);
        restamp_pair(&mut self.pins, &mut ctx.nodes, 1.0 / self.resistance, true);
    }

    pub(crate) fn volt_changed(&mut self, ctx: &mut SimContext) {
        restamp_pair(&mut self.pins, &mut ctx.nodes, 1.0 / self.resistance, false);
    }
}

/// Potentiometer: the track split into two resistor halves around the wiper.
/// Moving the wiper re-splits the total resistance and re-stamps both
/// halves; each half is floored so conductances stay finite at the ends.
#[derive(Debug)]
pub struct Potentiometer {
    half_a: [EPin; 2],
    half_b: [EPin; 2],
    resistance: f64,
    pos: f64,
    owner: Option<ElementId>,
}

/// Fraction of the track a half can never shrink below.
const MIN_SPLIT: f64 = 1e-6;

impl Potentiometer {
    pub fn new(resistance: f64) -> Self {
        Self {
            half_a: [EPin::new(), EPin::new()],
            half_b: [EPin::new(), EPin::new()],
            resistance,
            pos: 0.5,
            owner: None,
        }
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, a: NodeId, wiper: NodeId, b: NodeId) {
        self.half_a[0].connect(nodes, a);
        self.half_a[1].connect(nodes, wiper);
        self.half_b[0].connect(nodes, wiper);
        self.half_b[1].connect(nodes, b);
    }

    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// Wiper position in `0.0 ..= 1.0` measured from terminal A.
    pub fn set_pos(&mut self, nodes: &mut NodeArena, pos: f64) {
        self.pos = pos.clamp(0.0, 1.0);
        self.restamp(nodes, true);
    }

    fn res_a(&self) -> f64 {
        self.resistance * self.pos.max(MIN_SPLIT)
    }

    fn res_b(&self) -> f64 {
        self.resistance * (1.0 - self.pos).max(MIN_SPLIT)
    }

    fn restamp(&mut self, nodes: &mut NodeArena, force: bool) {
        let (ga, gb) = (1.0 / self.res_a(), 1.0 / self.res_b());
        restamp_pair(&mut self.half_a, nodes, ga, force);
        restamp_pair(&mut self.half_b, nodes, gb, force);
    }

    pub(crate) fn set_owner(&mut self, id: ElementId) {
        self.owner = Some(id);
    }

    pub(crate) fn validate(&self, id: ElementId) -> Result<(), SimError> {
        if self.resistance <= 0.0 {
            return Err(SimError::InvalidParam {
                element: id,
                what: format!("track resistance {} must be positive", self.resistance),
            });
        }
        Ok(())
    }

    pub(crate) fn initialize(&mut self, _ctx: &mut SimContext) {}

    pub(crate) fn stamp(&mut self, ctx: &mut SimContext) {
        subscribe_pair(&self.half_a, &mut ctx.nodes, self.owner);
        subscribe_pair(&self.half_b, &mut ctx.nodes, self.owner);
        self.restamp(&mut ctx.nodes, true);
    }

    pub(crate) fn volt_changed(&mut self, ctx: &mut SimContext) {
        self.restamp(&mut ctx.nodes, false);
    }
}

fn subscribe_pair(pins: &[EPin; 2], nodes: &mut NodeArena, owner: Option<ElementId>) {
    let Some(owner) = owner else { return };
    for pin in pins {
        if let Some(node) = pin.node() {
            nodes.add_callback(node, owner);
        }
    }
}

/// Stamp both pins of a resistive pair: conductance plus the current source
/// seen from the opposite node. Skips the write when nothing moved beyond
/// [`CURRENT_EPSILON`], unless forced.
fn restamp_pair(pins: &mut [EPin; 2], nodes: &mut NodeArena, admit: f64, force: bool) {
    let v0 = pins[0].volt(nodes);
    let v1 = pins[1].volt(nodes);

    let i0 = admit * v1;
    let i1 = admit * v0;

    if force || (i0 - pins[0].current()).abs() > CURRENT_EPSILON {
        pins[0].stamp(nodes, admit, i0);
    }
    if force || (i1 - pins[1].current()).abs() > CURRENT_EPSILON {
        pins[1].stamp(nodes, admit, i1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::iopin::PinMode;
    use crate::pindriver::PinDriver;
    use crate::simulator::{SimConfig, Simulator};

    #[test]
    fn divider_settles_to_the_expected_ratio() {
        let mut sim = Simulator::new(SimConfig::default());
        let top = sim.add_node();
        let mid = sim.add_node();
        let bottom = sim.add_node();

        let mut rail = PinDriver::new(PinMode::Source);
        let (_, ctx) = sim.parts();
        rail.connect(&mut ctx.nodes, top);
        let mut gnd = PinDriver::new(PinMode::Output);
        gnd.connect(&mut ctx.nodes, bottom);

        let mut r1 = Resistor::new(1000.0);
        r1.connect(&mut ctx.nodes, top, mid);
        let mut r2 = Resistor::new(3000.0);
        r2.connect(&mut ctx.nodes, mid, bottom);

        sim.add_element(Element::Driver(rail));
        sim.add_element(Element::Driver(gnd));
        sim.add_element(Element::Resistor(r1));
        sim.add_element(Element::Resistor(r2));

        sim.start().unwrap();
        for _ in 0..10 {
            sim.run_step();
        }

        // 5V * 3k/4k, with the ground driver's 40 ohm in the bottom leg.
        let v = sim.node_volt(mid);
        assert!((v - 3.75).abs() < 0.05, "mid = {v}");
    }

    #[test]
    fn zero_resistance_is_a_config_error() {
        let mut sim = Simulator::new(SimConfig::default());
        let a = sim.add_node();
        let b = sim.add_node();
        let (_, ctx) = sim.parts();
        let mut r = Resistor::new(0.0);
        r.connect(&mut ctx.nodes, a, b);
        sim.add_element(Element::Resistor(r));
        assert!(sim.start().is_err());
    }

    #[test]
    fn potentiometer_wiper_moves_the_tap_voltage() {
        let mut sim = Simulator::new(SimConfig::default());
        let top = sim.add_node();
        let wiper = sim.add_node();
        let bottom = sim.add_node();

        let (_, ctx) = sim.parts();
        let mut rail = PinDriver::new(PinMode::Source);
        rail.connect(&mut ctx.nodes, top);
        let mut gnd = PinDriver::new(PinMode::Output);
        gnd.connect(&mut ctx.nodes, bottom);
        let mut pot = Potentiometer::new(10_000.0);
        pot.connect(&mut ctx.nodes, top, wiper, bottom);

        sim.add_element(Element::Driver(rail));
        sim.add_element(Element::Driver(gnd));
        let pot_id = sim.add_element(Element::Potentiometer(pot));

        sim.start().unwrap();
        for _ in 0..10 {
            sim.run_step();
        }
        let centered = sim.node_volt(wiper);
        assert!((centered - 2.5).abs() < 0.1, "centered = {centered}");

        let (elements, ctx) = sim.parts();
        let Element::Potentiometer(pot) = &mut elements[pot_id.0] else {
            unreachable!()
        };
        pot.set_pos(&mut ctx.nodes, 0.9);
        for _ in 0..10 {
            sim.run_step();
        }
        let tapped = sim.node_volt(wiper);
        assert!(tapped < 1.0, "wiper moved toward B should sit low: {tapped}");
    }
}
