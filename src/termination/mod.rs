//! Interrupt handling and guaranteed cleanup

mod controller;
pub mod shutdown;

pub use controller::{InterruptOutcome, TerminationController, TerminationState};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
