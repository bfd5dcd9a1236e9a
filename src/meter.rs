use crate::element::ElementId;
use crate::enode::{NodeArena, NodeId};
use crate::epin::EPin;
use crate::simulator::SimContext;
use crate::PS_PER_SEC;

/// Frequency/amplitude readout for one node, lifted from the oscilloscope
/// channel's measurement logic: rising-edge period tracking with a noise
/// filter, running max/min for amplitude, and a wave-lost timeout.
#[derive(Debug)]
pub struct WaveMeter {
    pin: EPin,
    owner: Option<ElementId>,

    /// Voltage swing below this is treated as noise.
    filter: f64,

    last_value: f64,
    rising: bool,
    falling: bool,

    max_val: f64,
    min_val: f64,
    ampli: f64,
    freq: f64,

    period: u64,
    ris_edge: u64,
    n_cycles: u32,
    total_p: u64,
    num_max: u32,
    last_max: u64,
}

impl Default for WaveMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl WaveMeter {
    pub fn new() -> Self {
        let mut meter = Self {
            pin: EPin::new(),
            owner: None,
            filter: 0.1,
            last_value: 0.0,
            rising: false,
            falling: false,
            max_val: 0.0,
            min_val: 0.0,
            ampli: 0.0,
            freq: 0.0,
            period: 0,
            ris_edge: 0,
            n_cycles: 0,
            total_p: 0,
            num_max: 0,
            last_max: 0,
        };
        meter.reset();
        meter
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, node: NodeId) {
        self.pin.connect(nodes, node);
    }

    pub fn set_filter(&mut self, filter: f64) {
        self.filter = filter;
        self.ris_edge = 0;
        self.n_cycles = 0;
        self.total_p = 0;
        self.num_max = 0;
    }

    /// Smoothed frequency of the measured wave, in Hz. Zero when no wave.
    pub fn freq_hz(&self) -> f64 {
        self.freq
    }

    /// Peak-to-peak amplitude of the last full cycle, in volts.
    pub fn amplitude(&self) -> f64 {
        self.ampli
    }

    fn reset(&mut self) {
        self.rising = false;
        self.falling = false;
        self.period = 0;
        self.ris_edge = 0;
        self.n_cycles = 0;
        self.total_p = 0;
        self.num_max = 0;
        self.last_max = 0;
        self.ampli = 0.0;
        self.freq = 0.0;
        self.max_val = -1e12;
        self.min_val = 1e12;
        self.last_value = 0.0;
    }

    pub(crate) fn set_owner(&mut self, id: ElementId) {
        self.owner = Some(id);
    }

    pub(crate) fn initialize(&mut self, _ctx: &mut SimContext) {
        self.reset();
    }

    pub(crate) fn stamp(&mut self, ctx: &mut SimContext) {
        if let (Some(owner), Some(node)) = (self.owner, self.pin.node()) {
            ctx.nodes.add_callback(node, owner);
        }
    }

    pub(crate) fn update_step(&mut self, ctx: &mut SimContext) {
        if self.period > 10 {
            if self.num_max > 1 {
                let avg_period = self.total_p as f64 / (self.num_max - 1) as f64;
                self.freq = (self.freq + PS_PER_SEC / avg_period) / 2.0;
                self.total_p = 0;
                self.num_max = 0;
            }
        } else {
            self.freq = 0.0;
            self.max_val = -1e12;
            self.min_val = 1e12;
        }

        if self.period > 10 {
            // Declare the wave lost if no maximum showed up for a while.
            let frame = ctx.config.step_size * ctx.config.steps_per_frame as u64;
            let lost = (self.period * 2).max(frame * 2);
            if ctx.time() - self.last_max > lost {
                self.reset();
            }
        }
    }

    pub(crate) fn volt_changed(&mut self, ctx: &mut SimContext) {
        let time = ctx.time();
        let data = self.pin.volt(&ctx.nodes);

        if data > self.max_val {
            self.max_val = data;
        }
        if data < self.min_val {
            self.min_val = data;
        }

        let delta = data - self.last_value;

        if delta > 0.0 {
            if delta > self.filter {
                if self.falling && !self.rising {
                    // Passed a minimum.
                    if self.num_max > 0 {
                        self.total_p += time - self.last_max;
                    }
                    self.last_max = time;
                    self.num_max += 1;
                    self.n_cycles += 1;
                    self.falling = false;
                }
                self.rising = true;
                self.last_value = data;
            }
            if self.n_cycles > 1 {
                self.ampli = self.max_val - self.min_val;
                let mid = self.min_val + self.ampli / 2.0;

                if data >= mid {
                    if self.num_max > 1 {
                        self.max_val = -1e12;
                        self.min_val = 1e12;
                    }
                    self.n_cycles -= 1;

                    if self.ris_edge > 0 {
                        self.period = time - self.ris_edge;
                    }
                    self.ris_edge = time;
                }
            }
        } else if delta < -self.filter {
            if self.rising && !self.falling {
                self.rising = false;
            }
            self.falling = true;
            self.last_value = data;
        }
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
    fn measures_a_square_wave_frequency() {
        let mut sim = Simulator::new(SimConfig {
            step_size: 1_000_000, // 1 us
            steps_per_frame: 100,
            ..SimConfig::default()
        });
        let node = sim.add_node();

        let (_, ctx) = sim.parts();
        let mut driver = PinDriver::new(PinMode::Output);
        driver.connect(&mut ctx.nodes, node);
        let mut meter = WaveMeter::new();
        meter.connect(&mut ctx.nodes, node);

        let drv = sim.add_element(Element::Driver(driver));
        let met = sim.add_element(Element::Meter(meter));
        sim.start().unwrap();

        // 10 us half period -> 50 kHz square wave.
        let mut level = false;
        for _ in 0..4000 {
            sim.run_step();
            if sim.time() % 10_000_000 == 0 {
                level = !level;
                let (elements, ctx) = sim.parts();
                let Element::Driver(d) = &mut elements[drv.0] else {
                    unreachable!()
                };
                d.set_state(&mut ctx.nodes, level);
            }
        }

        let Element::Meter(m) = sim.element(met) else {
            unreachable!()
        };
        let freq = m.freq_hz();
        assert!(
            (freq - 50_000.0).abs() < 2_500.0,
            "expected ~50 kHz, measured {freq}"
        );
        assert!(m.amplitude() > 4.0, "amplitude {}", m.amplitude());
    }
}
