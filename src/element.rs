use crate::diode::Diode;
use crate::error::SimError;
use crate::meter::WaveMeter;
use crate::pindriver::PinDriver;
use crate::resistor::{Potentiometer, Resistor};
use crate::simulator::SimContext;
use crate::twi::TwiModule;
use crate::uart::{UartRx, UartTx};

/// Handle to an element registered with the simulator. Also the target key
/// for scheduled events and volt-changed callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementId(pub usize);

/// Everything participating in the electrical network, as a tagged variant
/// rather than an inheritance chain. Each kind implements whichever parts
/// of the `initialize/stamp/update_step/run_event/volt_changed` lifecycle
/// it needs; the rest are no-ops.
#[derive(Debug)]
pub enum Element {
    Driver(PinDriver),
    Resistor(Resistor),
    Potentiometer(Potentiometer),
    Diode(Diode),
    Meter(WaveMeter),
    UartRx(UartRx),
    UartTx(UartTx),
    Twi(TwiModule),
}

impl Element {
    pub(crate) fn set_owner(&mut self, id: ElementId) {
        match self {
            Element::Driver(e) => e.set_owner(id),
            Element::Resistor(e) => e.set_owner(id),
            Element::Potentiometer(e) => e.set_owner(id),
            Element::Diode(e) => e.set_owner(id),
            Element::Meter(e) => e.set_owner(id),
            Element::UartRx(e) => e.set_owner(id),
            Element::UartTx(e) => e.set_owner(id),
            Element::Twi(e) => e.set_owner(id),
        }
    }

    pub(crate) fn validate(&self, id: ElementId) -> Result<(), SimError> {
        match self {
            Element::Resistor(e) => e.validate(id),
            Element::Potentiometer(e) => e.validate(id),
            Element::UartRx(e) => e.validate(id),
            Element::UartTx(e) => e.validate(id),
            Element::Twi(e) => e.validate(id),
            _ => Ok(()),
        }
    }

    pub(crate) fn initialize(&mut self, ctx: &mut SimContext) {
        match self {
            Element::Driver(e) => e.initialize(ctx),
            Element::Resistor(e) => e.initialize(ctx),
            Element::Potentiometer(e) => e.initialize(ctx),
            Element::Diode(e) => e.initialize(ctx),
            Element::Meter(e) => e.initialize(ctx),
            Element::UartRx(e) => e.initialize(ctx),
            Element::UartTx(e) => e.initialize(ctx),
            Element::Twi(e) => e.initialize(ctx),
        }
    }

    pub(crate) fn stamp(&mut self, ctx: &mut SimContext) {
        match self {
            Element::Resistor(e) => e.stamp(ctx),
            Element::Potentiometer(e) => e.stamp(ctx),
            Element::Diode(e) => e.stamp(ctx),
            Element::Meter(e) => e.stamp(ctx),
            _ => {}
        }
    }

    pub(crate) fn update_step(&mut self, ctx: &mut SimContext) {
        if let Element::Meter(e) = self {
            e.update_step(ctx)
        }
    }

    pub(crate) fn run_event(&mut self, ctx: &mut SimContext) {
        match self {
            Element::UartRx(e) => e.run_event(ctx),
            Element::UartTx(e) => e.run_event(ctx),
            Element::Twi(e) => e.run_event(ctx),
            _ => {}
        }
    }

    pub(crate) fn volt_changed(&mut self, ctx: &mut SimContext) {
        match self {
            Element::Resistor(e) => e.volt_changed(ctx),
            Element::Potentiometer(e) => e.volt_changed(ctx),
            Element::Diode(e) => e.volt_changed(ctx),
            Element::Meter(e) => e.volt_changed(ctx),
            Element::UartRx(e) => e.volt_changed(ctx),
            Element::Twi(e) => e.volt_changed(ctx),
            _ => {}
        }
    }
}

/// Clock level seen by a clocked device, with edge information relative to
/// the previous observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockState {
    Low,
    Rising,
    High,
    Falling,
}

impl ClockState {
    /// True for the low half of the cycle (low level or just left high).
    pub fn is_low(self) -> bool {
        matches!(self, ClockState::Low | ClockState::Falling)
    }
}

/// Edge detector shared by clocked protocol devices: feed it the clock
/// pin's logic level, get back level + edge.
#[derive(Debug, Default, Clone)]
pub struct ClockSense {
    last: bool,
    state: Option<ClockState>,
}

impl ClockSense {
    pub fn reset(&mut self, level: bool) {
        self.last = level;
        self.state = None;
    }

    pub fn update(&mut self, level: bool) -> ClockState {
        let state = match (self.last, level) {
            (false, true) => ClockState::Rising,
            (true, false) => ClockState::Falling,
            (true, true) => ClockState::High,
            (false, false) => ClockState::Low,
        };
        self.last = level;
        self.state = Some(state);
        state
    }

    pub fn state(&self) -> ClockState {
        self.state.unwrap_or(ClockState::Low)
    }
}
