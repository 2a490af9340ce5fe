//! Shared tick clock, pulse scheduler, interrupt latches and port bus for
//! the TRS-80 Model III cassette and floppy disk controller peripherals.
//!
//! Everything ticks at the master crystal frequency. All peripheral timing
//! derives from this. No exceptions.

mod clock;
mod config;
mod interrupts;
mod observable;
mod scheduler;
mod ticks;

pub use clock::{Clock, TICKS_PER_SECOND};
pub use config::PeripheralConfig;
pub use interrupts::{InterruptLatches, InterruptLine};
pub use observable::{Observable, Value};
pub use scheduler::{PulseBasis, PulseHandle, PulseScheduler};
pub use ticks::Ticks;
