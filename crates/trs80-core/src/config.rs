//! Named constants shared by the cassette and FDC peripherals.
//!
//! Grounded on `emu-spectrum::config::SpectrumConfig`: a plain struct handed
//! to the peripheral's constructor, no CLI/env parsing crate involved.

use crate::{Clock, Ticks};

/// Construction-time configuration for the cassette and FDC peripherals.
///
/// `Default` supplies the real TRS-80 Model III values; tests that want a
/// faster-settling drive (to avoid waiting out real step rates) construct
/// their own instance directly.
#[derive(Debug, Clone, Copy)]
pub struct PeripheralConfig {
    /// Length in bytes of a freshly created blank tape (0x800).
    pub blank_tape_length: usize,
    /// Maximum tape length a write can grow to before it stalls (0x12000).
    pub max_tape_length: usize,
    /// Number of floppy drives the FDC multiplexes between.
    pub num_drives: usize,
    /// Maximum physical track number a drive can step to.
    pub max_tracks: u8,
    /// Delay before the drive motor auto-shuts-off after the last disk select.
    pub motor_off_delay: Ticks,
    /// Delay from disk-select to the motor reaching speed.
    pub motor_on_delay: Ticks,
    /// Delay from command completion to the NMI latch being raised.
    pub nmi_delay: Ticks,
    /// The Type I/II/III "standard delay" flag's extra settle time.
    pub standard_delay: Ticks,
    /// Head-load settle time charged once per command when the head was not already loaded.
    pub head_load_delay: Ticks,
    /// Per-command step rate, indexed by the low two bits of a Type I command byte.
    pub step_rates: [Ticks; 4],
    /// Disk rotational speed in revolutions per minute.
    pub disk_rpm: u32,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            blank_tape_length: 0x800,
            max_tape_length: 0x1_2000,
            num_drives: 4,
            max_tracks: 80,
            motor_off_delay: Clock::micros(2_000_000),
            motor_on_delay: Clock::micros(10),
            nmi_delay: Clock::micros(30),
            standard_delay: Clock::micros(30_000),
            head_load_delay: Clock::micros(50_000),
            step_rates: [
                Clock::micros(6_000),
                Clock::micros(12_000),
                Clock::micros(20_000),
                Clock::micros(30_000),
            ],
            disk_rpm: 300,
        }
    }
}

impl PeripheralConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks per full disk revolution at `disk_rpm`.
    #[must_use]
    pub fn ticks_per_rev(&self) -> Ticks {
        Ticks::new(crate::TICKS_PER_SECOND * 60 / u64::from(self.disk_rpm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_step_rates_match_real_hardware() {
        let config = PeripheralConfig::default();
        assert_eq!(config.step_rates[0], Clock::micros(6_000));
        assert_eq!(config.step_rates[3], Clock::micros(30_000));
    }

    #[test]
    fn ticks_per_rev_at_300_rpm_is_one_fifth_of_a_second() {
        let config = PeripheralConfig::default();
        assert_eq!(config.ticks_per_rev(), Clock::micros(200_000));
    }
}
