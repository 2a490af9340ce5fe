//! The read-path waveform generator.
//!
//! A `Transition` produces one full-wave cycle per data bit: a positive
//! half-cycle followed by a negative half-cycle, with the half-cycle
//! durations chosen by the current `Speed` and the bit value (see
//! `signal::Speed`). Tracking `flip_flop`/`last_non_zero` here (rather than
//! in `Cassette` directly) mirrors the way `TzxSignal` in this workspace
//! keeps its own phase state separate from the tape deck that feeds it
//! bytes.

use crate::signal::{Polarity, Speed};

/// Which half of the current bit's cycle is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    First,
    Second,
}

/// Read-path waveform state machine for one active tape-read session.
#[derive(Debug, Clone)]
pub struct Transition {
    speed: Speed,
    half: Half,
    level: Polarity,
    last_non_zero: Polarity,
    flip_flop: bool,
}

impl Transition {
    #[must_use]
    pub fn new(speed: Speed) -> Self {
        Self {
            speed,
            half: Half::First,
            level: Polarity::Zero,
            last_non_zero: Polarity::Zero,
            flip_flop: false,
        }
    }

    #[must_use]
    pub fn last_non_zero(&self) -> Polarity {
        self.last_non_zero
    }

    #[must_use]
    pub fn flip_flop(&self) -> bool {
        self.flip_flop
    }

    /// The CPU read clears the flip-flop latch.
    pub fn clear_flip_flop(&mut self) {
        self.flip_flop = false;
    }

    /// Rebuild a `Transition` from its raw field values (used by
    /// `trs80-snapshot` to restore a read session).
    #[must_use]
    pub fn from_parts(speed: Speed, half: Half, level: Polarity, last_non_zero: Polarity, flip_flop: bool) -> Self {
        Self {
            speed,
            half,
            level,
            last_non_zero,
            flip_flop,
        }
    }

    #[must_use]
    pub fn speed(&self) -> Speed {
        self.speed
    }

    #[must_use]
    pub fn half(&self) -> Half {
        self.half
    }

    #[must_use]
    pub fn level(&self) -> Polarity {
        self.level
    }

    /// Duration, in ticks, until the next phase boundary for `bit` given
    /// the half-cycle we are about to enter.
    #[must_use]
    fn phase_duration(&self, bit: bool) -> trs80_core::Ticks {
        match self.half {
            Half::First => self.speed.first_phase(bit),
            Half::Second => self.speed.second_phase(bit),
        }
    }

    /// Advance to the next phase for the bit currently under the head.
    ///
    /// Returns `(duration_until_next_phase, edge)`, where `edge` is `Some`
    /// rising/falling transition if the polarity changed, to be latched by
    /// the caller. `bit_done` is `true` once the second half-cycle (the end
    /// of the bit) has been crossed, signalling the caller to advance the
    /// bit cursor and look up the next bit before the following call.
    pub fn advance(&mut self, bit: bool) -> (trs80_core::Ticks, Option<Edge>, bool) {
        let duration = self.phase_duration(bit);
        let (next_level, bit_done) = match self.half {
            Half::First => (Polarity::Positive, false),
            Half::Second => (Polarity::Negative, true),
        };

        let edge = if next_level != self.level {
            match next_level {
                Polarity::Positive => Some(Edge::Rising),
                Polarity::Negative => Some(Edge::Falling),
                Polarity::Zero => None,
            }
        } else {
            None
        };

        if matches!(edge, Some(Edge::Rising)) {
            self.flip_flop = true;
        }
        if !matches!(next_level, Polarity::Zero) {
            self.last_non_zero = next_level;
        }
        self.level = next_level;
        self.half = match self.half {
            Half::First => Half::Second,
            Half::Second => Half::First,
        };

        (duration, edge, bit_done)
    }
}

/// An edge crossed while advancing the transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}
