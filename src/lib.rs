//! Logic-level circuit and MCU-peripheral simulation kernel.
//!
//! The crate mixes two clocks: a fixed-timestep sweep over the electrical
//! network (nodes solved from per-pin Thevenin contributions) and a
//! picosecond-resolution event queue that protocol peripherals (UART, TWI)
//! use to schedule bit edges between steps. Everything runs single-threaded
//! and deterministically: events fire in time order with FIFO tie-break, and
//! node voltages only ever depend on the full set of stamped contributions,
//! never on stamping order.

pub mod diode;
pub mod element;
pub mod enode;
pub mod epin;
pub mod error;
pub mod iopin;
pub mod meter;
pub mod pindriver;
pub mod resistor;
pub mod simulator;
pub mod twi;
pub mod uart;

pub use diode::Diode;
pub use element::{ClockSense, ClockState, Element, ElementId};
pub use enode::{NodeArena, NodeId};
pub use epin::EPin;
pub use error::SimError;
pub use iopin::{IoPin, PinMode};
pub use meter::WaveMeter;
pub use pindriver::PinDriver;
pub use resistor::{Potentiometer, Resistor};
pub use simulator::{SimConfig, SimContext, Simulator};
pub use twi::{TwiMode, TwiModule};
pub use uart::{Parity, UartConfig, UartRx, UartTx};

/// Simulation time ticks per second (1 tick = 1 picosecond).
pub const PS_PER_SEC: f64 = 1e12;
