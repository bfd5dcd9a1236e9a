use crate::element::ElementId;

/// Configuration errors caught before the simulation starts.
///
/// Nothing at stepping time returns an error: electrical inconsistencies are
/// floored, protocol violations become sticky status flags, and the state
/// machines always recover to an idle state on their own.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("invalid parameter for element {element:?}: {what}")]
    InvalidParam { element: ElementId, what: String },

    #[error("element {element:?} pin '{pin}' is not connected to a node")]
    NotConnected { element: ElementId, pin: &'static str },

    #[error("element {element:?} has a zero clock/bit period")]
    ZeroClockPeriod { element: ElementId },

    #[error("simulation is already running")]
    AlreadyRunning,
}
