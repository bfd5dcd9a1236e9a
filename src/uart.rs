use std::collections::VecDeque;

use log::{debug, warn};

use crate::element::ElementId;
use crate::enode::{NodeArena, NodeId};
use crate::iopin::{IoPin, PinMode};
use crate::simulator::SimContext;
use crate::error::SimError;
use crate::PS_PER_SEC;

/// Error bits tagged onto a stored frame, above any possible data bit.
pub const PARITY_ERROR: u16 = 1 << 14;
pub const FRAME_ERROR: u16 = 1 << 15;

/// Injected-byte buffer limit (software path back-pressure).
const IN_BUFFER_MAX: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Serial frame format plus baud rate; the bit period derives from the
/// baud at initialization time.
#[derive(Clone, Copy, Debug, serde::Deserialize, serde::Serialize)]
pub struct UartConfig {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub baud: u32,
}

impl Default for UartConfig {
    fn default() -> Self {
        UartConfig {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            baud: 9600,
        }
    }
}

impl UartConfig {
    fn parity_len(&self) -> u16 {
        if self.parity == Parity::None {
            0
        } else {
            1
        }
    }

    fn frame_size(&self) -> u16 {
        1 + self.data_bits as u16 + self.parity_len() + self.stop_bits as u16
    }

    fn data_mask(&self) -> u16 {
        (1u16 << self.data_bits) - 1
    }

    fn bit_period(&self) -> u64 {
        if self.baud == 0 {
            0
        } else {
            (PS_PER_SEC / self.baud as f64) as u64
        }
    }

    /// Parity bit value for `data` under this config.
    fn parity_bit(&self, data: u16) -> bool {
        let ones = (data & self.data_mask()).count_ones();
        match self.parity {
            Parity::None => false,
            Parity::Even => ones % 2 == 1,
            Parity::Odd => ones % 2 == 0,
        }
    }

    fn validate(&self, id: ElementId) -> Result<(), SimError> {
        if !(5..=9).contains(&self.data_bits) {
            return Err(SimError::InvalidParam {
                element: id,
                what: format!("data bits {} outside 5..=9", self.data_bits),
            });
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(SimError::InvalidParam {
                element: id,
                what: format!("stop bits {} outside 1..=2", self.stop_bits),
            });
        }
        if self.baud == 0 {
            return Err(SimError::ZeroClockPeriod { element: id });
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RxState {
    Stopped,
    Receive,
    RxEnd,
}

/// Serial receiver over one `IoPin`.
///
/// Two input paths feed the same state machine: real pin transitions
/// (start-bit edge detection plus bit-period sampling events) and whole
/// bytes injected through [`UartRx::queue_data`], time-unrolled one frame
/// per frame duration so both look identical to the consumer. Received
/// frames land in a 2-deep FIFO; a third byte with the FIFO full raises
/// the sticky overrun flag instead of growing a buffer.
#[derive(Debug)]
pub struct UartRx {
    pin: IoPin,
    owner: Option<ElementId>,
    cfg: UartConfig,

    period: u64,
    frame_size: u16,

    state: RxState,
    enabled: bool,
    run_hardware: bool,
    start_high: bool,
    current_bit: u16,
    frame: u16,

    fifo: [u16; 2],
    fifo_p: u8,
    in_buffer: VecDeque<u16>,

    overrun: bool,
    parity_err: bool,
    frame_err: bool,
    rx_int: bool,
}

impl UartRx {
    pub fn new(cfg: UartConfig) -> Self {
        Self {
            pin: IoPin::new(),
            owner: None,
            cfg,
            period: cfg.bit_period(),
            frame_size: cfg.frame_size(),
            state: RxState::Stopped,
            enabled: false,
            run_hardware: false,
            start_high: false,
            current_bit: 0,
            frame: 0,
            fifo: [0; 2],
            fifo_p: 2,
            in_buffer: VecDeque::new(),
            overrun: false,
            parity_err: false,
            frame_err: false,
            rx_int: false,
        }
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, node: NodeId) {
        self.pin.connect(nodes, node);
    }

    pub fn pin_mut(&mut self) -> &mut IoPin {
        &mut self.pin
    }

    /// Enable or disable reception. Enabling arms start-bit detection on a
    /// wired pin, or the frame-timer path when the pin floats.
    pub fn enable(&mut self, ctx: &mut SimContext, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;

        self.run_hardware = self.pin.is_connected();
        self.in_buffer.clear();
        self.state = RxState::Stopped;

        if enabled {
            self.process_data(ctx);
        }
        self.frame = 0;
    }

    /// Inject a whole byte (software path). Switches off the hardware path
    /// and discards its stale sampling events first.
    pub fn queue_data(&mut self, ctx: &mut SimContext, data: u16) {
        if !self.enabled {
            return;
        }
        let Some(owner) = self.owner else { return };
        if self.run_hardware {
            self.run_hardware = false;
            ctx.cancel_events(owner);
            ctx.add_event(self.period * (self.frame_size as u64 + 2), owner);
            self.state = RxState::Receive;
        }
        if self.in_buffer.len() > IN_BUFFER_MAX {
            return;
        }
        self.in_buffer.push_back(data);
    }

    /// Pop the oldest received data word (up to 9 bits wide), surfacing its
    /// error tags as sticky flags. `None` when the FIFO is empty.
    pub fn get_data(&mut self) -> Option<u16> {
        if self.fifo_p == 2 {
            return None;
        }
        let frame = self.fifo[1];
        let data = frame & self.cfg.data_mask();

        if frame & PARITY_ERROR != 0 {
            self.parity_err = true;
        }
        if frame & FRAME_ERROR != 0 {
            self.frame_err = true;
        }

        self.fifo_p += 1;
        if self.fifo_p == 2 {
            self.rx_int = false; // fifo empty
        } else {
            self.fifo[1] = self.fifo[0];
        }
        Some(data)
    }

    pub fn overrun(&self) -> bool {
        self.overrun
    }

    pub fn parity_error(&self) -> bool {
        self.parity_err
    }

    pub fn frame_error(&self) -> bool {
        self.frame_err
    }

    /// Receive-complete interrupt flag: set while the FIFO holds data.
    pub fn rx_interrupt(&self) -> bool {
        self.rx_int
    }

    pub fn clear_errors(&mut self) {
        self.overrun = false;
        self.parity_err = false;
        self.frame_err = false;
    }

    pub(crate) fn set_owner(&mut self, id: ElementId) {
        self.owner = Some(id);
        self.pin.set_owner(id);
    }

    pub(crate) fn validate(&self, id: ElementId) -> Result<(), SimError> {
        self.cfg.validate(id)
    }

    pub(crate) fn initialize(&mut self, ctx: &mut SimContext) {
        self.pin.initialize(&mut ctx.nodes);
        self.pin.set_pin_mode(&mut ctx.nodes, PinMode::Input);
        self.period = self.cfg.bit_period();
        self.frame_size = self.cfg.frame_size();
        self.state = RxState::Stopped;
        self.enabled = false;
        self.current_bit = 0;
        self.frame = 0;
        self.fifo_p = 2;
        self.in_buffer.clear();
        self.overrun = false;
        self.parity_err = false;
        self.frame_err = false;
        self.rx_int = false;
    }

    fn process_data(&mut self, ctx: &mut SimContext) {
        self.current_bit = 0;
        self.fifo_p = 2;
        self.start_high = false;

        if self.run_hardware {
            self.start_high = self.pin.get_inp_state(&ctx.nodes);
            self.pin.change_callback(&mut ctx.nodes, true); // wait for start bit
        } else {
            self.state = RxState::Receive;
            if let (Some(owner), true) = (self.owner, self.period > 0) {
                ctx.add_event(self.period * self.frame_size as u64, owner);
            }
        }
    }

    pub(crate) fn volt_changed(&mut self, ctx: &mut SimContext) {
        if self.state == RxState::RxEnd {
            self.rx_end(ctx);
        }

        let bit = self.pin.get_inp_state(&ctx.nodes);

        if !self.start_high && bit {
            self.start_high = true;
        } else if self.start_high && !bit {
            // Start bit detected: sample mid-bit from here on.
            self.state = RxState::Receive;
            self.pin.change_callback(&mut ctx.nodes, false);
            if let (Some(owner), true) = (self.owner, self.period > 0) {
                ctx.add_event(self.period / 2, owner);
            }
        }
    }

    pub(crate) fn run_event(&mut self, ctx: &mut SimContext) {
        match self.state {
            RxState::Stopped => {}
            RxState::Receive => {
                if self.run_hardware {
                    self.read_bit(ctx);
                    if self.state == RxState::RxEnd {
                        self.rx_end(ctx);
                    } else if let (Some(owner), true) = (self.owner, self.period > 0) {
                        ctx.add_event(self.period, owner);
                    }
                } else {
                    if let Some(data) = self.in_buffer.pop_front() {
                        let frame = self.software_frame(data);
                        self.byte_received(frame);
                    }
                    if let (Some(owner), true) = (self.owner, self.period > 0) {
                        ctx.add_event(self.period * self.frame_size as u64, owner);
                    }
                }
            }
            RxState::RxEnd => self.rx_end(ctx),
        }
    }

    fn read_bit(&mut self, ctx: &mut SimContext) {
        if self.pin.get_inp_state(&ctx.nodes) {
            self.frame |= 1 << self.current_bit;
        }
        self.current_bit += 1;
        if self.current_bit == self.frame_size {
            self.pin.change_callback(&mut ctx.nodes, true); // wait for next start bit
            self.state = RxState::RxEnd;
        }
    }

    fn rx_end(&mut self, ctx: &mut SimContext) {
        self.frame >>= 1; // drop the start bit
        let frame = self.frame;
        self.byte_received(frame);

        self.current_bit = 0;
        self.frame = 0;

        if self.run_hardware {
            self.state = RxState::Stopped;
            self.pin.change_callback(&mut ctx.nodes, true);
        } else {
            self.state = RxState::Receive;
        }

        if let (Some(owner), true) = (self.owner, self.period > 0) {
            ctx.cancel_events(owner);
        }
    }

    /// Frame as it would have arrived on the wire: data, parity, stop bits
    /// (start bit already stripped), so decode treats both paths alike.
    fn software_frame(&self, data: u16) -> u16 {
        let mut frame = data & self.cfg.data_mask();
        if self.cfg.parity_bit(data) {
            frame |= 1 << self.cfg.data_bits;
        }
        for i in 0..self.cfg.stop_bits as u16 {
            frame |= 1 << (self.cfg.data_bits as u16 + self.cfg.parity_len() + i);
        }
        frame
    }

    fn byte_received(&mut self, mut frame: u16) {
        if self.fifo_p == 0 {
            // Third byte with both slots full: signal back-pressure, keep
            // the buffered frames intact.
            warn!("uart rx overrun, dropping frame {frame:#05x}");
            self.overrun = true;
            return;
        }

        if self.cfg.parity != Parity::None {
            let parity_bit = frame & (1 << self.cfg.data_bits) != 0;
            if self.cfg.parity_bit(frame) != parity_bit {
                frame |= PARITY_ERROR;
            }
        }
        let stop_pos = self.cfg.data_bits as u16 + self.cfg.parity_len();
        if frame & (1 << stop_pos) == 0 {
            frame |= FRAME_ERROR; // wrong stop bit
        }

        self.fifo_p -= 1;
        self.fifo[self.fifo_p as usize] = frame;
        if self.fifo_p == 1 {
            self.rx_int = true;
        }
        debug!("uart rx frame {frame:#05x}");
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxState {
    Idle,
    Transmit,
}

/// Serial transmitter: shifts a framed byte out of its pin on bit-period
/// events. The line idles high.
#[derive(Debug)]
pub struct UartTx {
    pin: IoPin,
    owner: Option<ElementId>,
    cfg: UartConfig,

    period: u64,
    frame_size: u16,
    frame: u32,
    current_bit: u16,
    state: TxState,
    enabled: bool,
}

impl UartTx {
    pub fn new(cfg: UartConfig) -> Self {
        Self {
            pin: IoPin::new(),
            owner: None,
            cfg,
            period: cfg.bit_period(),
            frame_size: cfg.frame_size(),
            frame: 0,
            current_bit: 0,
            state: TxState::Idle,
            enabled: false,
        }
    }

    pub fn connect(&mut self, nodes: &mut NodeArena, node: NodeId) {
        self.pin.connect(nodes, node);
    }

    pub fn pin_mut(&mut self) -> &mut IoPin {
        &mut self.pin
    }

    pub fn enable(&mut self, ctx: &mut SimContext, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.pin.set_out_state(&mut ctx.nodes, true); // idle high
        }
    }

    pub fn is_busy(&self) -> bool {
        self.state == TxState::Transmit
    }

    /// Start shifting `data` out. Returns false (byte refused) while
    /// disabled or mid-frame.
    pub fn send(&mut self, ctx: &mut SimContext, data: u16) -> bool {
        if !self.enabled || self.state == TxState::Transmit || self.period == 0 {
            return false;
        }
        self.frame = self.build_frame(data);
        self.current_bit = 0;
        self.state = TxState::Transmit;
        self.run_event(ctx); // start bit goes out now
        true
    }

    fn build_frame(&self, data: u16) -> u32 {
        let cfg = &self.cfg;
        let mut frame: u32 = ((data & cfg.data_mask()) as u32) << 1; // bit 0 = start (0)
        if cfg.parity_bit(data) {
            frame |= 1 << (1 + cfg.data_bits as u32);
        }
        for i in 0..cfg.stop_bits as u32 {
            frame |= 1 << (1 + cfg.data_bits as u32 + cfg.parity_len() as u32 + i);
        }
        frame
    }

    pub(crate) fn set_owner(&mut self, id: ElementId) {
        self.owner = Some(id);
        self.pin.set_owner(id);
    }

    pub(crate) fn validate(&self, id: ElementId) -> Result<(), SimError> {
        self.cfg.validate(id)
    }

    pub(crate) fn initialize(&mut self, ctx: &mut SimContext) {
        self.pin.initialize(&mut ctx.nodes);
        self.pin.set_pin_mode(&mut ctx.nodes, PinMode::Output);
        self.pin.set_out_state(&mut ctx.nodes, true);
        self.period = self.cfg.bit_period();
        self.frame_size = self.cfg.frame_size();
        self.state = TxState::Idle;
        self.frame = 0;
        self.current_bit = 0;
    }

    pub(crate) fn run_event(&mut self, ctx: &mut SimContext) {
        if self.state != TxState::Transmit {
            return;
        }
        if self.current_bit < self.frame_size {
            let bit = self.frame >> self.current_bit & 1 != 0;
            self.pin.set_out_state(&mut ctx.nodes, bit);
            self.current_bit += 1;
            if let Some(owner) = self.owner {
                ctx.add_event(self.period, owner);
            }
        } else {
            self.state = TxState::Idle;
            self.pin.set_out_state(&mut ctx.nodes, true);
        }
    }
}
