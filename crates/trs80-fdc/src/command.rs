//! Command-byte decoding and the per-command-family execution phase.
//!
//! Mirrors `nec-upd765::commands`'s match-on-command-id dispatch shape, but
//! tick-driven: each phase below is one step of a state machine re-entered
//! from a scheduled pulse rather than run to completion synchronously.

/// Which command family is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Restore,
    Seek,
    Step { update_registers: bool },
    StepIn { update_registers: bool },
    StepOut { update_registers: bool },
    ReadSector,
    WriteSector,
    ReadAddress,
    ReadTrack,
    WriteTrack,
    ForceInterrupt,
    ForceInterruptImmediate,
    Reset,
}

impl Command {
    #[must_use]
    pub fn is_type_one(self) -> bool {
        matches!(
            self,
            Command::Restore
                | Command::Seek
                | Command::Step { .. }
                | Command::StepIn { .. }
                | Command::StepOut { .. }
        )
    }

    #[must_use]
    pub fn is_type_four(self) -> bool {
        matches!(
            self,
            Command::ForceInterrupt | Command::ForceInterruptImmediate | Command::Reset
        )
    }
}

/// The step rate table indexed by the low two bits of a Type I command byte
/// (6, 12, 20, 30 ms).
#[must_use]
pub fn step_rate_index(command_byte: u8) -> usize {
    (command_byte & 0b11) as usize
}

/// Decode a command register write into a `Command` plus the per-command
/// flags the rest of the FDC keys off (§4.2 "Command families").
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodedFlags {
    pub verify: bool,
    pub delay: bool,
    pub update_registers: bool,
    pub side_select_verify: bool,
    pub side_one_expected: bool,
    pub mark_sector_deleted: bool,
    pub multiple_records: bool,
}

#[must_use]
pub fn decode(command_byte: u8) -> (Command, DecodedFlags) {
    if command_byte == 0xD0 {
        return (Command::Reset, DecodedFlags::default());
    }
    if command_byte == 0xD8 {
        return (Command::ForceInterruptImmediate, DecodedFlags::default());
    }

    let family = command_byte >> 4;
    match family {
        0x0 => (
            Command::Restore,
            DecodedFlags {
                verify: command_byte & 0b0100 != 0,
                update_registers: true,
                ..DecodedFlags::default()
            },
        ),
        0x1 => (
            Command::Seek,
            DecodedFlags {
                verify: command_byte & 0b0100 != 0,
                update_registers: true,
                ..DecodedFlags::default()
            },
        ),
        0x2 | 0x3 => (
            Command::Step {
                update_registers: family == 0x3,
            },
            DecodedFlags {
                verify: command_byte & 0b0100 != 0,
                update_registers: family == 0x3,
                ..DecodedFlags::default()
            },
        ),
        0x4 | 0x5 => (
            Command::StepIn {
                update_registers: family == 0x5,
            },
            DecodedFlags {
                verify: command_byte & 0b0100 != 0,
                update_registers: family == 0x5,
                ..DecodedFlags::default()
            },
        ),
        0x6 | 0x7 => (
            Command::StepOut {
                update_registers: family == 0x7,
            },
            DecodedFlags {
                verify: command_byte & 0b0100 != 0,
                update_registers: family == 0x7,
                ..DecodedFlags::default()
            },
        ),
        0x8 | 0x9 => (
            Command::ReadSector,
            DecodedFlags {
                delay: command_byte & 0b0100 != 0,
                side_select_verify: command_byte & 0b0010 != 0,
                side_one_expected: command_byte & 0b1000 != 0,
                multiple_records: command_byte & 0b1_0000 != 0,
                ..DecodedFlags::default()
            },
        ),
        0xA | 0xB => (
            Command::WriteSector,
            DecodedFlags {
                delay: command_byte & 0b0100 != 0,
                side_select_verify: command_byte & 0b0010 != 0,
                side_one_expected: command_byte & 0b1000 != 0,
                multiple_records: command_byte & 0b1_0000 != 0,
                mark_sector_deleted: command_byte & 0b0001 != 0,
                ..DecodedFlags::default()
            },
        ),
        0xC => (
            Command::ReadAddress,
            DecodedFlags {
                delay: command_byte & 0b0100 != 0,
                ..DecodedFlags::default()
            },
        ),
        0xD => (
            Command::ForceInterrupt,
            DecodedFlags::default(),
        ),
        0xE => (
            Command::ReadTrack,
            DecodedFlags {
                delay: command_byte & 0b0100 != 0,
                ..DecodedFlags::default()
            },
        ),
        _ => (
            Command::WriteTrack,
            DecodedFlags {
                delay: command_byte & 0b0100 != 0,
                ..DecodedFlags::default()
            },
        ),
    }
}

/// The execution phase a command is currently in. `OpDone` means the FDC is
/// idle (no command active).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    OpDone,
    Prepare,
    Delay,
    Step,
    CheckVerify,
    SeekingIdam,
    ReadingAddressData,
    VerifyTrack,
    SeekingDam,
    ReadingData,
    ReadCrcHigh,
    ReadCrcLow,
    WriteDrqWait,
    WriteFiller,
    WriteSync,
    WriteDam,
    WritingData,
    WriteCrcHigh,
    WriteCrcLow,
    WriteTrailer,
    ReadAddressTransfer,
    AwaitIndexForTrack,
    TrackStream,
    Nmi,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_and_force_interrupt_immediate_are_special_bytes() {
        assert!(matches!(decode(0xD0).0, Command::Reset));
        assert!(matches!(decode(0xD8).0, Command::ForceInterruptImmediate));
    }

    #[test]
    fn step_rate_index_uses_low_two_bits() {
        assert_eq!(step_rate_index(0b0000_0000), 0);
        assert_eq!(step_rate_index(0b0000_0011), 3);
        assert_eq!(step_rate_index(0b1111_1101), 1);
    }

    #[test]
    fn write_sector_decodes_mark_sector_deleted() {
        let (cmd, flags) = decode(0xA1);
        assert!(matches!(cmd, Command::WriteSector));
        assert!(flags.mark_sector_deleted);
    }

    #[test]
    fn restore_always_updates_registers() {
        let (cmd, flags) = decode(0x00);
        assert!(matches!(cmd, Command::Restore));
        assert!(flags.update_registers);
    }
}
