//! The cassette subsystem: motor tri-state, pulse read/write codec, and
//! header-driven baud auto-detection.

use trs80_core::{Clock, InterruptLatches, InterruptLine, PeripheralConfig, PulseBasis, PulseHandle, PulseScheduler, Ticks};

use crate::signal::{Polarity, Speed};
use crate::transition::{Edge, Half, Transition};

/// The Z80 I/O port the real Model III wires cassette read/write to.
pub const CASSETTE_PORT: u8 = 0xFF;

const HEADER_RUN_LENGTH: u32 = 21;

/// High-speed write-decode positive-edge spacing ranges (ticks).
const HIGH_SPEED_SHORT: core::ops::RangeInclusive<u64> = 721_000..=797_000;
const HIGH_SPEED_LONG: core::ops::RangeInclusive<u64> = 1_459_000..=1_861_000;
/// Low-speed write-decode positive-edge spacing ranges (ticks).
const LOW_SPEED_SHORT: core::ops::RangeInclusive<u64> = 1_923_000..=2_281_000;
const LOW_SPEED_LONG: core::ops::RangeInclusive<u64> = 3_858_000..=4_379_000;

const HIGH_SPEED_BIT_THRESHOLD: u64 = 1_200_000;
const LOW_SPEED_LONG_THRESHOLD: u64 = 3_000_000;

const EVIDENCE_MAX: i32 = 16;
const EVIDENCE_HIGH_LOCK: i32 = 8;
const EVIDENCE_LOW_LOCK: i32 = -8;

/// The callback family this cassette's pulse scheduler fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CassetteCallback {
    /// Advance the read-path waveform to its next phase.
    ReadPulse,
}

/// What the tape deck is currently doing, derived from the motor tri-state
/// and the record/play mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Reading,
    ReadEngaged,
    Writing,
    WriteEngaged,
    Waiting,
    Stopped,
}

/// A plain, versioned-snapshot-friendly copy of every field in the data
/// model, for `trs80-snapshot` to encode without needing access to
/// `Cassette`'s private fields directly.
#[derive(Debug, Clone)]
pub struct CassetteState {
    pub data: Vec<u8>,
    pub byte_cursor: usize,
    pub bit_cursor: u8,
    pub is_blank: bool,
    pub speed: Speed,
    pub motor_engaged: bool,
    pub motor_on_signal: bool,
    pub record_invoked: bool,
    pub last_write_positive: Option<u64>,
    pub last_write_polarity: Polarity,
    pub high_speed_write_evidence: i32,
    pub skipped_last: bool,
    pub transition: Option<TransitionState>,
    pub consecutive_fifty_fives: u32,
    pub consecutive_zeros: u32,
    pub max_tape_length: usize,
}

/// The exported fields of an in-progress read `Transition`.
#[derive(Debug, Clone, Copy)]
pub struct TransitionState {
    pub speed: Speed,
    pub second_half: bool,
    pub level: Polarity,
    pub last_non_zero: Polarity,
    pub flip_flop: bool,
}

/// The cassette peripheral.
pub struct Cassette {
    data: Vec<u8>,
    byte_cursor: usize,
    bit_cursor: u8,
    is_blank: bool,
    speed: Speed,

    motor_engaged: bool,
    motor_on_signal: bool,
    record_invoked: bool,

    last_write_positive: Option<Ticks>,
    last_write_polarity: Polarity,
    high_speed_write_evidence: i32,
    skipped_last: bool,

    transition: Option<Transition>,
    read_pulse: Option<PulseHandle>,

    consecutive_fifty_fives: u32,
    consecutive_zeros: u32,

    max_tape_length: usize,
}

impl Cassette {
    #[must_use]
    pub fn new(config: &PeripheralConfig) -> Self {
        Self {
            data: vec![0; config.blank_tape_length],
            byte_cursor: 0,
            bit_cursor: 7,
            is_blank: true,
            speed: Speed::Low,
            motor_engaged: false,
            motor_on_signal: false,
            record_invoked: false,
            last_write_positive: None,
            last_write_polarity: Polarity::Zero,
            high_speed_write_evidence: 0,
            skipped_last: false,
            transition: None,
            read_pulse: None,
            consecutive_fifty_fives: 0,
            consecutive_zeros: 0,
            max_tape_length: config.max_tape_length,
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the tape contents and rewind.
    pub fn load(&mut self, data: &[u8]) {
        self.data = data.to_vec();
        self.is_blank = data.iter().all(|&b| b == 0);
        self.rewind();
    }

    pub fn rewind(&mut self) {
        self.byte_cursor = 0;
        self.bit_cursor = 7;
        self.consecutive_fifty_fives = 0;
        self.consecutive_zeros = 0;
    }

    #[must_use]
    pub fn speed(&self) -> Speed {
        self.speed
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.is_blank
    }

    #[must_use]
    pub fn byte_cursor(&self) -> usize {
        self.byte_cursor
    }

    #[must_use]
    pub fn bit_cursor(&self) -> u8 {
        self.bit_cursor
    }

    fn motor_on(&self) -> bool {
        self.motor_engaged && self.motor_on_signal
    }

    #[must_use]
    pub fn status(&self) -> Status {
        let motor_on = self.motor_on();
        if motor_on && self.record_invoked {
            Status::Writing
        } else if motor_on {
            Status::Reading
        } else if self.motor_engaged && self.record_invoked {
            Status::WriteEngaged
        } else if self.motor_engaged {
            Status::ReadEngaged
        } else if self.motor_on_signal {
            Status::Waiting
        } else {
            Status::Stopped
        }
    }

    /// The user pressed Play (`record_invoked = false`) or Record
    /// (`record_invoked = true`).
    pub fn engage_motor(
        &mut self,
        engaged: bool,
        record_invoked: bool,
        clock: &Clock,
        scheduler: &mut PulseScheduler<CassetteCallback>,
    ) {
        let was_on = self.motor_on();
        self.motor_engaged = engaged;
        self.record_invoked = record_invoked;
        self.sync_motor_transition(was_on, clock, scheduler);
    }

    /// The CPU asserts or releases the motor-on control bit.
    pub fn set_motor_on_signal(
        &mut self,
        on: bool,
        clock: &Clock,
        scheduler: &mut PulseScheduler<CassetteCallback>,
    ) {
        let was_on = self.motor_on();
        self.motor_on_signal = on;
        self.sync_motor_transition(was_on, clock, scheduler);
    }

    fn sync_motor_transition(
        &mut self,
        was_on: bool,
        clock: &Clock,
        scheduler: &mut PulseScheduler<CassetteCallback>,
    ) {
        let is_on = self.motor_on();
        if is_on && !was_on && !self.record_invoked {
            self.transition = Some(Transition::new(self.speed));
            self.schedule_read_pulse(clock, scheduler, Ticks::ZERO);
        } else if !is_on && was_on {
            self.transition = None;
            if let Some(handle) = self.read_pulse.take() {
                scheduler.expire(handle);
            }
        }
    }

    fn schedule_read_pulse(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<CassetteCallback>,
        delay: Ticks,
    ) {
        self.read_pulse = Some(scheduler.schedule(
            clock,
            PulseBasis::Ticks(delay.get()),
            CassetteCallback::ReadPulse,
        ));
    }

    fn current_read_bit(&self) -> bool {
        let byte = self.data.get(self.byte_cursor).copied().unwrap_or(0);
        (byte >> self.bit_cursor) & 1 != 0
    }

    /// Advance the byte/bit cursor by one bit (MSB first) and feed the new
    /// byte boundary, if crossed, to the header-speed detector.
    fn advance_read_cursor(&mut self) {
        if self.bit_cursor == 0 {
            self.bit_cursor = 7;
            let finished_byte = self.data.get(self.byte_cursor).copied().unwrap_or(0);
            self.byte_cursor += 1;
            if self.byte_cursor >= self.data.len() {
                self.byte_cursor = self.data.len().saturating_sub(1);
            }
            self.feed_header_detector(finished_byte);
        } else {
            self.bit_cursor -= 1;
        }
    }

    fn feed_header_detector(&mut self, byte: u8) {
        if byte == 0x55 || byte == 0xAA {
            self.consecutive_fifty_fives += 1;
            self.consecutive_zeros = 0;
        } else if byte == 0x00 {
            self.consecutive_zeros += 1;
            self.consecutive_fifty_fives = 0;
        } else {
            self.consecutive_fifty_fives = 0;
            self.consecutive_zeros = 0;
        }

        if self.consecutive_fifty_fives >= HEADER_RUN_LENGTH {
            self.speed = Speed::High;
        } else if self.consecutive_zeros >= HEADER_RUN_LENGTH {
            self.speed = Speed::Low;
        }
    }

    /// Called by the scheduler when a read pulse callback fires.
    pub fn on_read_pulse(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<CassetteCallback>,
        latches: &mut InterruptLatches,
    ) {
        let Some(mut transition) = self.transition.take() else {
            return;
        };

        let bit = self.current_read_bit();
        let (duration, edge, bit_done) = transition.advance(bit);

        match edge {
            Some(Edge::Rising) => latches.latch(InterruptLine::CassetteRisingEdge),
            Some(Edge::Falling) => latches.latch(InterruptLine::CassetteFallingEdge),
            None => {}
        }

        if bit_done {
            self.advance_read_cursor();
        }

        self.transition = Some(transition);
        self.schedule_read_pulse(clock, scheduler, duration);
    }

    /// Read the cassette data port: bit 7 = flip-flop, bit 0 = last
    /// non-zero polarity was positive. Clears the flip-flop latch.
    #[must_use]
    pub fn read_port(&mut self) -> u8 {
        let Some(transition) = self.transition.as_mut() else {
            return 0;
        };
        let mut value = 0u8;
        if transition.flip_flop() {
            value |= 0x80;
        }
        if transition.last_non_zero() == Polarity::Positive {
            value |= 0x01;
        }
        transition.clear_flip_flop();
        value
    }

    /// Write the cassette data port: bits 0-1 encode polarity.
    pub fn write_port(&mut self, value: u8, clock: &Clock) {
        let polarity = match value & 0b11 {
            0b01 => Polarity::Positive,
            0b10 => Polarity::Negative,
            _ => Polarity::Zero,
        };
        if polarity == self.last_write_polarity {
            return;
        }
        self.last_write_polarity = polarity;

        if polarity != Polarity::Positive {
            return;
        }

        let now = clock.tick_count();
        let Some(previous) = self.last_write_positive.replace(now) else {
            return;
        };
        let delta = now.saturating_sub(previous).get();
        self.classify_write_delta(delta);
    }

    fn classify_write_delta(&mut self, delta: u64) {
        if HIGH_SPEED_SHORT.contains(&delta) || HIGH_SPEED_LONG.contains(&delta) {
            self.high_speed_write_evidence =
                (self.high_speed_write_evidence + 1).min(EVIDENCE_MAX);
            if self.high_speed_write_evidence > EVIDENCE_HIGH_LOCK {
                self.speed = Speed::High;
            }
            let bit = delta < HIGH_SPEED_BIT_THRESHOLD;
            self.emit_write_bit(bit);
        } else if LOW_SPEED_SHORT.contains(&delta) || LOW_SPEED_LONG.contains(&delta) {
            self.high_speed_write_evidence =
                (self.high_speed_write_evidence - 1).max(-EVIDENCE_MAX);
            if self.high_speed_write_evidence < EVIDENCE_LOW_LOCK {
                self.speed = Speed::Low;
            }
            self.apply_low_speed_rule(delta);
        }
    }

    fn apply_low_speed_rule(&mut self, delta: u64) {
        if delta > LOW_SPEED_LONG_THRESHOLD {
            if self.skipped_last {
                self.skipped_last = false;
                self.emit_write_bit(true);
            } else {
                self.emit_write_bit(false);
            }
        } else if self.skipped_last {
            self.skipped_last = false;
            self.emit_write_bit(true);
        } else {
            self.skipped_last = true;
        }
    }

    fn emit_write_bit(&mut self, bit: bool) {
        self.ensure_write_capacity();
        let byte_cursor = self.byte_cursor;
        let bit_cursor = self.bit_cursor;
        if let Some(byte) = self.data.get_mut(byte_cursor) {
            if bit {
                *byte |= 1 << bit_cursor;
            } else {
                *byte &= !(1 << bit_cursor);
            }
            self.is_blank &= !bit;
        }
        if self.bit_cursor == 0 {
            self.bit_cursor = 7;
            self.byte_cursor += 1;
        } else {
            self.bit_cursor -= 1;
        }
    }

    /// Export every field named in the data model, as plain values
    /// `trs80-snapshot` can encode without reaching into private state.
    #[must_use]
    pub fn export_state(&self) -> CassetteState {
        CassetteState {
            data: self.data.clone(),
            byte_cursor: self.byte_cursor,
            bit_cursor: self.bit_cursor,
            is_blank: self.is_blank,
            speed: self.speed,
            motor_engaged: self.motor_engaged,
            motor_on_signal: self.motor_on_signal,
            record_invoked: self.record_invoked,
            last_write_positive: self.last_write_positive.map(Ticks::get),
            last_write_polarity: self.last_write_polarity,
            high_speed_write_evidence: self.high_speed_write_evidence,
            skipped_last: self.skipped_last,
            transition: self.transition.as_ref().map(|t| TransitionState {
                speed: t.speed(),
                second_half: matches!(t.half(), Half::Second),
                level: t.level(),
                last_non_zero: t.last_non_zero(),
                flip_flop: t.flip_flop(),
            }),
            consecutive_fifty_fives: self.consecutive_fifty_fives,
            consecutive_zeros: self.consecutive_zeros,
            max_tape_length: self.max_tape_length,
        }
    }

    /// Restore a previously exported state. A `transition` present in
    /// `state` re-registers a read pulse with the scheduler (fired
    /// immediately, since the precise residual delay isn't captured).
    pub fn import_state(
        &mut self,
        state: CassetteState,
        clock: &Clock,
        scheduler: &mut PulseScheduler<CassetteCallback>,
    ) {
        self.data = state.data;
        self.byte_cursor = state.byte_cursor;
        self.bit_cursor = state.bit_cursor;
        self.is_blank = state.is_blank;
        self.speed = state.speed;
        self.motor_engaged = state.motor_engaged;
        self.motor_on_signal = state.motor_on_signal;
        self.record_invoked = state.record_invoked;
        self.last_write_positive = state.last_write_positive.map(Ticks::new);
        self.last_write_polarity = state.last_write_polarity;
        self.high_speed_write_evidence = state.high_speed_write_evidence;
        self.skipped_last = state.skipped_last;
        self.consecutive_fifty_fives = state.consecutive_fifty_fives;
        self.consecutive_zeros = state.consecutive_zeros;
        self.max_tape_length = state.max_tape_length;

        if let Some(handle) = self.read_pulse.take() {
            scheduler.expire(handle);
        }
        match state.transition {
            Some(t) => {
                let half = if t.second_half { Half::Second } else { Half::First };
                self.transition = Some(Transition::from_parts(t.speed, half, t.level, t.last_non_zero, t.flip_flop));
                self.schedule_read_pulse(clock, scheduler, Ticks::ZERO);
            }
            None => self.transition = None,
        }
    }

    fn ensure_write_capacity(&mut self) {
        if self.byte_cursor < self.data.len() {
            return;
        }
        if self.data.len() >= self.max_tape_length {
            self.byte_cursor = self.data.len() - 1;
            return;
        }
        let len = self.data.len();
        let growth = len.div_ceil(10); // 10% growth, integer-only to avoid float rounding
        let grown = (len + growth.max(1)).min(self.max_tape_length);
        self.data.resize(grown, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PeripheralConfig {
        PeripheralConfig::default()
    }

    #[test]
    fn bit_cursor_always_in_range() {
        let cassette = Cassette::new(&config());
        assert!(cassette.bit_cursor() <= 7);
        assert!(cassette.byte_cursor() < cassette.data().len());
    }

    #[test]
    fn status_priority_matches_spec() {
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut cassette = Cassette::new(&config());
        assert_eq!(cassette.status(), Status::Stopped);

        cassette.engage_motor(true, false, &clock, &mut scheduler);
        assert_eq!(cassette.status(), Status::ReadEngaged);

        cassette.set_motor_on_signal(true, &clock, &mut scheduler);
        assert_eq!(cassette.status(), Status::Reading);

        cassette.engage_motor(true, true, &clock, &mut scheduler);
        assert_eq!(cassette.status(), Status::Writing);

        cassette.set_motor_on_signal(false, &clock, &mut scheduler);
        assert_eq!(cassette.status(), Status::WriteEngaged);
    }

    #[test]
    fn motor_on_starts_a_read_transition_and_schedules_a_pulse() {
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut cassette = Cassette::new(&config());
        cassette.engage_motor(true, false, &clock, &mut scheduler);
        cassette.set_motor_on_signal(true, &clock, &mut scheduler);
        assert!(scheduler.has_pending());
    }

    #[test]
    fn motor_off_cancels_the_pending_read_pulse() {
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut cassette = Cassette::new(&config());
        cassette.engage_motor(true, false, &clock, &mut scheduler);
        cassette.set_motor_on_signal(true, &clock, &mut scheduler);
        cassette.set_motor_on_signal(false, &clock, &mut scheduler);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn header_detection_locks_high_speed_at_21st_byte() {
        let mut cassette = Cassette::new(&config());
        for _ in 0..20 {
            cassette.feed_header_detector(0x55);
        }
        assert_eq!(cassette.speed, Speed::Low);
        cassette.feed_header_detector(0x55);
        assert_eq!(cassette.speed, Speed::High);
    }

    #[test]
    fn header_detection_locks_low_speed_at_21st_zero_byte() {
        let mut cassette = Cassette::new(&config());
        cassette.speed = Speed::High;
        for _ in 0..20 {
            cassette.feed_header_detector(0x00);
        }
        assert_eq!(cassette.speed, Speed::High);
        cassette.feed_header_detector(0x00);
        assert_eq!(cassette.speed, Speed::Low);
    }

    #[test]
    fn non_header_byte_resets_both_counters() {
        let mut cassette = Cassette::new(&config());
        for _ in 0..10 {
            cassette.feed_header_detector(0x55);
        }
        cassette.feed_header_detector(0x3C);
        assert_eq!(cassette.consecutive_fifty_fives, 0);
        assert_eq!(cassette.consecutive_zeros, 0);
    }

    #[test]
    fn high_speed_round_trip_decodes_positive_edges() {
        let mut cassette = Cassette::new(&config());
        cassette.speed = Speed::High;
        let mut clock = Clock::new();

        // Positive-to-positive spacing for a `1` bit is 2*378,000 = 756,000 ticks,
        // inside the high-speed short range.
        cassette.write_port(0b01, &clock);
        clock.advance(Ticks::new(10));
        cassette.write_port(0b10, &clock);
        clock.advance(Ticks::new(756_000 - 10));
        cassette.write_port(0b01, &clock);

        assert_eq!(cassette.bit_cursor(), 6);
        assert_eq!(cassette.data()[0] & 0x80, 0x80);
    }

    #[test]
    fn low_speed_clock_data_cycle_decodes_alternating_bits() {
        let mut cassette = Cassette::new(&config());
        let mut clock = Clock::new();

        // Positive-edge spacings of {short, short, long, short, short}
        // (short = 2.1 MT, long = 4.1 MT) encode bits 1, 0, 1 under the
        // Level-II clock/data pulse convention.
        let deltas = [2_100_000u64, 2_100_000, 4_100_000, 2_100_000, 2_100_000];

        cassette.write_port(0b01, &clock);
        for delta in deltas {
            clock.advance(Ticks::new(delta));
            cassette.write_port(0b10, &clock);
            cassette.write_port(0b01, &clock);
        }

        let byte = cassette.data()[0];
        assert_eq!((byte >> 7) & 1, 1);
        assert_eq!((byte >> 6) & 1, 0);
        assert_eq!((byte >> 5) & 1, 1);
    }

    #[test]
    fn write_growth_caps_at_max_tape_length() {
        let mut config = PeripheralConfig::default();
        config.blank_tape_length = 2;
        config.max_tape_length = 3;
        let mut cassette = Cassette::new(&config);
        cassette.byte_cursor = 2;
        cassette.bit_cursor = 7;
        cassette.ensure_write_capacity();
        assert_eq!(cassette.data().len(), 3);
        cassette.byte_cursor = 3;
        cassette.ensure_write_capacity();
        assert_eq!(cassette.data().len(), 3);
        assert_eq!(cassette.byte_cursor, 2);
    }

    #[test]
    fn high_speed_write_evidence_saturates() {
        let mut cassette = Cassette::new(&config());
        cassette.high_speed_write_evidence = EVIDENCE_MAX;
        cassette.classify_write_delta(750_000);
        assert_eq!(cassette.high_speed_write_evidence, EVIDENCE_MAX);
    }

    #[test]
    fn read_port_clears_flip_flop() {
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let mut cassette = Cassette::new(&config());
        cassette.engage_motor(true, false, &clock, &mut scheduler);
        cassette.set_motor_on_signal(true, &clock, &mut scheduler);
        cassette.on_read_pulse(&clock, &mut scheduler, &mut latches);
        assert_ne!(cassette.read_port() & 0x80, 0);
        assert_eq!(cassette.read_port() & 0x80, 0);
    }

    #[test]
    fn export_then_import_restores_observable_state() {
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut cassette = Cassette::new(&config());
        cassette.engage_motor(true, false, &clock, &mut scheduler);
        cassette.set_motor_on_signal(true, &clock, &mut scheduler);
        cassette.speed = Speed::High;
        cassette.consecutive_fifty_fives = 5;

        let state = cassette.export_state();
        let mut restored = Cassette::new(&config());
        restored.import_state(state, &clock, &mut scheduler);

        assert_eq!(restored.speed(), Speed::High);
        assert!(restored.transition.is_some());
        assert_eq!(restored.consecutive_fifty_fives, 5);
    }
}
