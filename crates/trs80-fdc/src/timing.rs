//! The rotating-media timing model: disk angle, index pulses, and the
//! byte-based `Poll` scheduling primitive.

use trs80_core::{PeripheralConfig, Ticks};

/// Short leading window (millionths of a revolution) during which the
/// index pulse is considered asserted.
const INDEX_PULSE_WINDOW: u64 = 10_000;

/// Tracks index-pulse bookkeeping for one drive's spindle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rotation {
    index_check_start_tick: Ticks,
}

impl Rotation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a raw `index_check_start_tick`, for `trs80-snapshot`.
    #[must_use]
    pub fn from_parts(index_check_start_tick: Ticks) -> Self {
        Self {
            index_check_start_tick,
        }
    }

    #[must_use]
    pub fn index_check_start_tick(&self) -> Ticks {
        self.index_check_start_tick
    }

    /// Current angular position, in millionths of a revolution.
    #[must_use]
    pub fn disk_angle(tick_count: Ticks, ticks_per_rev: Ticks) -> u64 {
        let rev = ticks_per_rev.get().max(1);
        (tick_count.get() % rev) * 1_000_000 / rev
    }

    /// Whether the index pulse is asserted right now.
    #[must_use]
    pub fn index_detect(motor_on: bool, disk_angle: u64) -> bool {
        motor_on && disk_angle < INDEX_PULSE_WINDOW
    }

    /// Full revolutions completed since the last `reset_index_count`.
    #[must_use]
    pub fn indexes_found(&self, tick_count: Ticks, ticks_per_rev: Ticks) -> u64 {
        tick_count.saturating_sub(self.index_check_start_tick).get() / ticks_per_rev.get().max(1)
    }

    /// Align the index-count origin to the current revolution boundary,
    /// plus a small margin so the very next poll doesn't immediately
    /// observe a spurious extra index.
    pub fn reset_index_count(&mut self, tick_count: Ticks, ticks_per_rev: Ticks) {
        let rev = ticks_per_rev.get().max(1);
        let boundary = tick_count.get() - (tick_count.get() % rev);
        self.index_check_start_tick = Ticks::new(boundary + 10);
    }

    /// Byte offset under the head at this angular position, for a track of
    /// logical length `track_len`.
    #[must_use]
    pub fn track_data_index(disk_angle: u64, track_len: usize) -> usize {
        (u128::from(disk_angle) * track_len as u128 / 1_000_000) as usize
    }
}

/// Compute the target byte offset `n` logical bytes ahead of
/// `track_data_index`, wrapping at `track_len`. In single-density mode `n`
/// is doubled and the result aligned to an even cell, matching the
/// on-media byte-doubling convention (see `trs80_floppy::Track`).
#[must_use]
pub fn poll_target(track_data_index: usize, n: usize, track_len: usize, double_density: bool) -> usize {
    if track_len == 0 {
        return 0;
    }
    let n = if double_density { n } else { n * 2 };
    let target = (track_data_index + n) % track_len;
    if double_density {
        target
    } else {
        target & !1
    }
}

/// Ticks from `current_angle` until `target_index` comes under the head,
/// plus a small safety margin, at the rotation rate implied by `config`.
#[must_use]
pub fn ticks_until_target(
    current_track_data_index: usize,
    target_index: usize,
    track_len: usize,
    config: &PeripheralConfig,
) -> Ticks {
    if track_len == 0 {
        return config.ticks_per_rev();
    }
    let forward = if target_index >= current_track_data_index {
        target_index - current_track_data_index
    } else {
        track_len - current_track_data_index + target_index
    };
    let ticks_per_rev = config.ticks_per_rev().get();
    let delay = (u128::from(ticks_per_rev) * forward as u128 / track_len as u128) as u64;
    Ticks::new(delay + 10_000)
}
