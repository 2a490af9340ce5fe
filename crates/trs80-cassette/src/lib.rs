//! TRS-80 Model III cassette subsystem.
//!
//! Motor tri-state, MSB-first bit cursor discipline, dynamic baud
//! auto-detection, and pulse-accurate read/write codecs.

mod cassette;
mod observable;
mod signal;
mod transition;

pub use cassette::{Cassette, CassetteCallback, CassetteState, Status, TransitionState, CASSETTE_PORT};
pub use signal::{Polarity, Speed};
pub use transition::{Edge, Half, Transition};
