use crate::element::ElementId;
use crate::enode::{NodeArena, NodeId};
use crate::epin::EPin;

/// Near-short impedance used where an ideal source would divide by zero.
const LOW_IMP: f64 = 1e-14;
/// Default input (leakage) impedance.
const INPUT_IMP: f64 = 1e9;
/// Impedance presented when tri-stated or open-collector released.
const OPEN_IMP: f64 = 1e28;
/// Default drive impedance.
const OUTPUT_IMP: f64 = 40.0;
/// Internal pull-up/pull-down resistor.
const PULL_IMP: f64 = 1e5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum PinMode {
    Undefined,
    Source,
    Input,
    Output,
    OpenCollector,
}

/// Digital I/O pin: maps a logical Hi/Lo/Z/open-collector state onto a
/// Thevenin (admittance, voltage) pair stamped into the shared node, and
/// turns the solved node voltage back into a logic level with hysteresis.
///
/// The commanded output voltage lives in the pin itself (`out_volt`, the
/// original's "shadow node"), so an unconnected pin still reads back what
/// it is driving.
#[derive(Debug, Clone)]
pub struct IoPin {
    pin: EPin,
    owner: Option<ElementId>,

    mode: PinMode,
    inp_state: bool,
    out_state: bool,
    inverted: bool,
    state_z: bool,

    inp_high_v: f64,
    inp_low_v: f64,
    out_high_v: f64,
    out_low_v: f64,
    out_volt: f64,

    vdd_admit: f64,
    gnd_admit: f64,
    vdd_adm_ex: f64,
    gnd_adm_ex: f64,

    input_imp: f64,
    open_imp: f64,
    output_imp: f64,
    imp: f64,
    admit: f64,
}

impl Default for IoPin {
    fn default() -> Self {
        Self::new()
    }
}

impl IoPin {
    pub fn new() -> Self {
        Self {
            pin: EPin::new(),
            owner: None,
            mode: PinMode::Undefined,
            inp_state: false,
            out_state: false,
            inverted: false,
            state_z: false,
            inp_high_v: 2.5,
            inp_low_v: 2.5,
            out_high_v: 5.0,
            out_low_v: 0.0,
            out_volt: 0.0,
            vdd_admit: 0.0,
            gnd_admit: 1.0 / LOW_IMP,
            vdd_adm_ex: 0.0,
            gnd_adm_ex: 0.0,
            input_imp: INPUT_IMP,
            open_imp: OPEN_IMP,
            output_imp: OUTPUT_IMP,
            imp: LOW_IMP,
            admit: 1.0 / LOW_IMP,
        }
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, node: NodeId) {
        self.pin.connect(nodes, node);
    }

    pub fn node(&self) -> Option<NodeId> {
        self.pin.node()
    }

    pub fn is_connected(&self) -> bool {
        self.pin.is_connected()
    }

    pub(crate) fn set_owner(&mut self, owner: ElementId) {
        self.owner = Some(owner);
    }

    /// Reset logic state and force the current mode's Thevenin pair to be
    /// recomputed and re-stamped.
    pub fn initialize(&mut self, nodes: &mut NodeArena) {
        self.inp_state = false;
        self.out_state = false;
        let mode = self.mode;
        self.mode = PinMode::Undefined;
        self.set_pin_mode(nodes, mode);
    }

    pub fn mode(&self) -> PinMode {
        self.mode
    }

    /// Switch pin mode. No-op when unchanged; otherwise recomputes the
    /// vdd/gnd admittance pair for the new mode and re-stamps.
    pub fn set_pin_mode(&mut self, nodes: &mut NodeArena, mode: PinMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;

        match mode {
            PinMode::Source => {
                self.vdd_admit = 1.0 / LOW_IMP;
                self.gnd_admit = 1.0 / OPEN_IMP;
            }
            PinMode::Input => {
                self.vdd_admit = 0.0;
                self.gnd_admit = 1.0 / self.input_imp;
            }
            PinMode::Output => {
                self.vdd_admit = 1.0 / self.output_imp;
                self.gnd_admit = 1.0 / OPEN_IMP;
            }
            PinMode::OpenCollector => {
                self.vdd_admit = 0.0;
            }
            PinMode::Undefined => {}
        }
        self.update_state(nodes);

        match mode {
            PinMode::Source => self.set_out_state(nodes, true),
            PinMode::Output | PinMode::OpenCollector => {
                let out = self.out_state;
                self.set_out_state(nodes, out);
            }
            _ => {}
        }
    }

    /// Recompute the Thevenin pair from the current admittance mix and
    /// re-stamp it.
    fn update_state(&mut self, nodes: &mut NodeArena) {
        let vdd_admit = self.vdd_admit + self.vdd_adm_ex;
        let gnd_admit = self.gnd_admit + self.gnd_adm_ex;
        let rth = 1.0 / (vdd_admit + gnd_admit);

        self.out_volt = self.out_high_v * vdd_admit * rth;
        self.set_imp(nodes, rth);
    }

    fn set_imp(&mut self, nodes: &mut NodeArena, imp: f64) {
        self.imp = imp;
        self.admit = 1.0 / imp;
        self.stamp_all(nodes);
    }

    fn stamp_all(&mut self, nodes: &mut NodeArena) {
        self.pin.stamp_admitance(nodes, self.admit);
        self.stamp_output(nodes);
    }

    fn stamp_output(&mut self, nodes: &mut NodeArena) {
        self.pin.stamp_current(nodes, self.out_volt / self.imp);
    }

    /// Logic level seen at the pin, with Schmitt-trigger hysteresis: flips
    /// high only above `inp_high_v`, low only below `inp_low_v`, and holds
    /// in between.
    pub fn get_inp_state(&mut self, nodes: &NodeArena) -> bool {
        let volt = self.volt(nodes);

        if volt > self.inp_high_v {
            self.inp_state = true;
        } else if volt < self.inp_low_v {
            self.inp_state = false;
        }
        self.inp_state != self.inverted
    }

    /// Drive the output high or low. Suppressed while tri-stated. In
    /// open-collector mode "high" just releases the line to its open
    /// impedance.
    pub fn set_out_state(&mut self, nodes: &mut NodeArena, out: bool) {
        self.out_state = out;
        let out = out != self.inverted;

        if self.state_z {
            return;
        }

        if self.mode == PinMode::OpenCollector {
            self.gnd_admit = if out {
                1.0 / self.open_imp
            } else {
                1.0 / self.output_imp
            };
            self.update_state(nodes);
        } else {
            self.out_volt = if out { self.out_high_v } else { self.out_low_v };
            self.stamp_output(nodes);
        }
    }

    pub fn out_state(&self) -> bool {
        self.out_state
    }

    /// Tri-state control: while `Z` the pin presents only its open
    /// impedance; releasing re-applies the mode as if freshly set.
    pub fn set_state_z(&mut self, nodes: &mut NodeArena, z: bool) {
        self.state_z = z;
        if z {
            self.out_volt = self.out_low_v;
            self.set_imp(nodes, self.open_imp);
        } else {
            let mode = self.mode;
            self.mode = PinMode::Undefined;
            self.set_pin_mode(nodes, mode);
        }
    }

    /// Polarity flip at the boundary only; mode and impedances untouched.
    pub fn set_inverted(&mut self, nodes: &mut NodeArena, inverted: bool) {
        if inverted == self.inverted {
            return;
        }
        self.inverted = inverted;
        if matches!(self.mode, PinMode::Output | PinMode::OpenCollector) {
            let out = self.out_state;
            self.set_out_state(nodes, out);
        }
    }

    pub fn set_pullup(&mut self, nodes: &mut NodeArena, on: bool) {
        self.vdd_adm_ex = if on { 1.0 / PULL_IMP } else { 0.0 };
        self.update_state(nodes);
    }

    pub fn set_pulldown(&mut self, nodes: &mut NodeArena, on: bool) {
        self.gnd_adm_ex = if on { 1.0 / PULL_IMP } else { 0.0 };
        self.update_state(nodes);
    }

    pub fn set_input_imp(&mut self, nodes: &mut NodeArena, imp: f64) {
        self.input_imp = imp;
        if self.mode == PinMode::Input {
            self.gnd_admit = 1.0 / imp;
            self.update_state(nodes);
        }
    }

    pub fn set_output_imp(&mut self, nodes: &mut NodeArena, imp: f64) {
        self.output_imp = imp;
        if self.mode == PinMode::Output {
            self.vdd_admit = 1.0 / imp;
            self.update_state(nodes);
        }
    }

    pub fn set_out_levels(&mut self, nodes: &mut NodeArena, high: f64, low: f64) {
        self.out_high_v = high;
        self.out_low_v = low;
        if self.mode != PinMode::Undefined {
            self.update_state(nodes);
        }
    }

    pub fn set_input_levels(&mut self, high: f64, low: f64) {
        self.inp_high_v = high;
        self.inp_low_v = low;
    }

    /// Voltage at the pin: the attached node's solved voltage, or the
    /// pin's own commanded voltage while floating.
    pub fn volt(&self, nodes: &NodeArena) -> f64 {
        if self.pin.is_connected() {
            self.pin.volt(nodes)
        } else {
            self.out_volt
        }
    }

    /// Subscribe or unsubscribe the owning element to volt-changed
    /// callbacks on this pin's node.
    pub fn change_callback(&self, nodes: &mut NodeArena, on: bool) {
        let (Some(node), Some(owner)) = (self.pin.node(), self.owner) else {
            return;
        };
        if on {
            nodes.add_callback(node, owner);
        } else {
            nodes.remove_callback(node, owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wired_pin(nodes: &mut NodeArena) -> (IoPin, NodeId, usize) {
        let node = nodes.alloc();
        let slot = nodes.attach(node); // external driver slot
        let mut pin = IoPin::new();
        pin.connect(nodes, node);
        pin.set_pin_mode(nodes, PinMode::Input);
        (pin, node, slot)
    }

    fn drive(nodes: &mut NodeArena, node: NodeId, slot: usize, volt: f64) {
        // Stiff external source.
        nodes.stamp(node, slot, 1.0, volt);
    }

    #[test]
    fn hysteresis_holds_between_thresholds() {
        let mut nodes = NodeArena::new(1e-14);
        let (mut pin, node, slot) = wired_pin(&mut nodes);
        pin.set_input_levels(3.0, 1.5);

        drive(&mut nodes, node, slot, 5.0);
        assert!(pin.get_inp_state(&nodes));

        // Between thresholds: keeps the last state, no chatter.
        drive(&mut nodes, node, slot, 2.0);
        assert!(pin.get_inp_state(&nodes));

        drive(&mut nodes, node, slot, 1.0);
        assert!(!pin.get_inp_state(&nodes));

        drive(&mut nodes, node, slot, 2.0);
        assert!(!pin.get_inp_state(&nodes));

        drive(&mut nodes, node, slot, 3.5);
        assert!(pin.get_inp_state(&nodes));
    }

    #[test]
    fn output_drives_node_high_and_low() {
        let mut nodes = NodeArena::new(1e-14);
        let node = nodes.alloc();
        let mut pin = IoPin::new();
        pin.connect(&mut nodes, node);
        pin.set_pin_mode(&mut nodes, PinMode::Output);

        pin.set_out_state(&mut nodes, true);
        assert!(nodes.volt(node) > 4.9);

        pin.set_out_state(&mut nodes, false);
        assert!(nodes.volt(node) < 0.1);
    }

    #[test]
    fn open_collector_needs_a_pullup() {
        let mut nodes = NodeArena::new(1e-14);
        let node = nodes.alloc();

        let mut oc = IoPin::new();
        oc.connect(&mut nodes, node);
        oc.set_pin_mode(&mut nodes, PinMode::OpenCollector);

        let mut other = IoPin::new();
        other.connect(&mut nodes, node);
        other.set_pin_mode(&mut nodes, PinMode::Input);
        other.set_pullup(&mut nodes, true);

        oc.set_out_state(&mut nodes, true); // released
        assert!(nodes.volt(node) > 4.9);

        oc.set_out_state(&mut nodes, false); // driven low
        assert!(nodes.volt(node) < 0.1);
    }

    #[test]
    fn tristate_suppresses_drive() {
        let mut nodes = NodeArena::new(1e-14);
        let node = nodes.alloc();
        let slot = nodes.attach(node);
        let mut pin = IoPin::new();
        pin.connect(&mut nodes, node);
        pin.set_pin_mode(&mut nodes, PinMode::Output);
        pin.set_out_state(&mut nodes, true);

        pin.set_state_z(&mut nodes, true);
        // Weak 1k pull to 1V wins while the pin is Z.
        nodes.stamp(node, slot, 1e-3, 1e-3);
        assert!((nodes.volt(node) - 1.0).abs() < 0.1);

        pin.set_state_z(&mut nodes, false);
        assert!(nodes.volt(node) > 4.0); // 40 ohm drive overwhelms the pull
    }

    #[test]
    fn inversion_flips_both_directions() {
        let mut nodes = NodeArena::new(1e-14);
        let node = nodes.alloc();
        let mut pin = IoPin::new();
        pin.connect(&mut nodes, node);
        pin.set_pin_mode(&mut nodes, PinMode::Output);
        pin.set_inverted(&mut nodes, true);

        pin.set_out_state(&mut nodes, true);
        assert!(nodes.volt(node) < 0.1);

        let mut inp = IoPin::new();
        inp.connect(&mut nodes, node);
        inp.set_pin_mode(&mut nodes, PinMode::Input);
        inp.set_inverted(&mut nodes, true);
        assert!(inp.get_inp_state(&nodes)); // node low, inverted input high
    }

    #[test]
    fn unconnected_pin_reads_back_commanded_voltage() {
        let mut nodes = NodeArena::new(1e-14);
        let mut pin = IoPin::new();
        pin.set_pin_mode(&mut nodes, PinMode::Output);
        pin.set_out_state(&mut nodes, true);
        assert!((pin.volt(&nodes) - 5.0).abs() < 1e-6);
    }
}
