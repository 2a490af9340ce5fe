//! Byte-stream encoding for `trs80_fdc::Fdc`.
//!
//! Field order follows the data model's grouping: registers, then flags,
//! then address scratch, then per-drive state, then current selection,
//! then pending pulse requests.

use trs80_core::{Clock, PulseScheduler};
use trs80_fdc::{Command, DecodedFlags, DriveMechanicalState, Fdc, FdcCallback, FdcState, OpStatus, StatusFlags};
use trs80_floppy::DriveState;

use crate::io::{push_bool, push_u16, push_u64, push_usize, Reader};

/// Version 10 added the `enabled` boolean; earlier versions inferred it
/// from whether any drive had media loaded. This workspace starts fresh at
/// version 10, so there is no earlier format to round-trip against, but
/// decode still honors the inference rule for streams produced elsewhere.
const VERSION: u16 = 10;

fn push_status_flags(buf: &mut Vec<u8>, flags: &StatusFlags) {
    push_bool(buf, flags.busy);
    push_bool(buf, flags.drq);
    push_bool(buf, flags.seek_error);
    push_bool(buf, flags.crc_error);
    push_bool(buf, flags.lost_data);
    push_bool(buf, flags.write_protected);
    push_bool(buf, flags.motor_on);
    push_bool(buf, flags.sector_deleted);
    push_bool(buf, flags.double_density);
    push_bool(buf, flags.last_step_dir_up);
}

fn read_status_flags(r: &mut Reader) -> Result<StatusFlags, String> {
    Ok(StatusFlags {
        busy: r.bool()?,
        drq: r.bool()?,
        seek_error: r.bool()?,
        crc_error: r.bool()?,
        lost_data: r.bool()?,
        write_protected: r.bool()?,
        motor_on: r.bool()?,
        sector_deleted: r.bool()?,
        double_density: r.bool()?,
        last_step_dir_up: r.bool()?,
    })
}

fn push_decoded_flags(buf: &mut Vec<u8>, flags: &DecodedFlags) {
    push_bool(buf, flags.verify);
    push_bool(buf, flags.delay);
    push_bool(buf, flags.update_registers);
    push_bool(buf, flags.side_select_verify);
    push_bool(buf, flags.side_one_expected);
    push_bool(buf, flags.mark_sector_deleted);
    push_bool(buf, flags.multiple_records);
}

fn read_decoded_flags(r: &mut Reader) -> Result<DecodedFlags, String> {
    Ok(DecodedFlags {
        verify: r.bool()?,
        delay: r.bool()?,
        update_registers: r.bool()?,
        side_select_verify: r.bool()?,
        side_one_expected: r.bool()?,
        mark_sector_deleted: r.bool()?,
        multiple_records: r.bool()?,
    })
}

fn push_command(buf: &mut Vec<u8>, command: Command) {
    let (tag, update_registers) = match command {
        Command::Restore => (0u8, false),
        Command::Seek => (1, false),
        Command::Step { update_registers } => (2, update_registers),
        Command::StepIn { update_registers } => (3, update_registers),
        Command::StepOut { update_registers } => (4, update_registers),
        Command::ReadSector => (5, false),
        Command::WriteSector => (6, false),
        Command::ReadAddress => (7, false),
        Command::ReadTrack => (8, false),
        Command::WriteTrack => (9, false),
        Command::ForceInterrupt => (10, false),
        Command::ForceInterruptImmediate => (11, false),
        Command::Reset => (12, false),
    };
    buf.push(tag);
    push_bool(buf, update_registers);
}

fn read_command(r: &mut Reader) -> Result<Command, String> {
    let tag = r.u8()?;
    let update_registers = r.bool()?;
    Ok(match tag {
        0 => Command::Restore,
        1 => Command::Seek,
        2 => Command::Step { update_registers },
        3 => Command::StepIn { update_registers },
        4 => Command::StepOut { update_registers },
        5 => Command::ReadSector,
        6 => Command::WriteSector,
        7 => Command::ReadAddress,
        8 => Command::ReadTrack,
        9 => Command::WriteTrack,
        10 => Command::ForceInterrupt,
        11 => Command::ForceInterruptImmediate,
        12 => Command::Reset,
        other => return Err(format!("unknown command tag {other}")),
    })
}

fn push_op_status(buf: &mut Vec<u8>, status: OpStatus) {
    let tag = match status {
        OpStatus::OpDone => 0,
        OpStatus::Prepare => 1,
        OpStatus::Delay => 2,
        OpStatus::Step => 3,
        OpStatus::CheckVerify => 4,
        OpStatus::SeekingIdam => 5,
        OpStatus::ReadingAddressData => 6,
        OpStatus::VerifyTrack => 7,
        OpStatus::SeekingDam => 8,
        OpStatus::ReadingData => 9,
        OpStatus::ReadCrcHigh => 10,
        OpStatus::ReadCrcLow => 11,
        OpStatus::WriteDrqWait => 12,
        OpStatus::WriteFiller => 13,
        OpStatus::WriteSync => 14,
        OpStatus::WriteDam => 15,
        OpStatus::WritingData => 16,
        OpStatus::WriteCrcHigh => 17,
        OpStatus::WriteCrcLow => 18,
        OpStatus::WriteTrailer => 19,
        OpStatus::ReadAddressTransfer => 20,
        OpStatus::AwaitIndexForTrack => 21,
        OpStatus::TrackStream => 22,
        OpStatus::Nmi => 23,
    };
    buf.push(tag);
}

fn read_op_status(r: &mut Reader) -> Result<OpStatus, String> {
    Ok(match r.u8()? {
        0 => OpStatus::OpDone,
        1 => OpStatus::Prepare,
        2 => OpStatus::Delay,
        3 => OpStatus::Step,
        4 => OpStatus::CheckVerify,
        5 => OpStatus::SeekingIdam,
        6 => OpStatus::ReadingAddressData,
        7 => OpStatus::VerifyTrack,
        8 => OpStatus::SeekingDam,
        9 => OpStatus::ReadingData,
        10 => OpStatus::ReadCrcHigh,
        11 => OpStatus::ReadCrcLow,
        12 => OpStatus::WriteDrqWait,
        13 => OpStatus::WriteFiller,
        14 => OpStatus::WriteSync,
        15 => OpStatus::WriteDam,
        16 => OpStatus::WritingData,
        17 => OpStatus::WriteCrcHigh,
        18 => OpStatus::WriteCrcLow,
        19 => OpStatus::WriteTrailer,
        20 => OpStatus::ReadAddressTransfer,
        21 => OpStatus::AwaitIndexForTrack,
        22 => OpStatus::TrackStream,
        23 => OpStatus::Nmi,
        other => return Err(format!("unknown op_status tag {other}")),
    })
}

/// Encode an FDC's current state to a versioned byte stream.
#[must_use]
pub fn encode_fdc(fdc: &Fdc) -> Vec<u8> {
    let state = fdc.export_state();
    let mut buf = Vec::new();
    push_u16(&mut buf, VERSION);

    buf.push(state.track_register);
    buf.push(state.sector_register);
    buf.push(state.command_register);
    buf.push(state.data_register);
    push_bool(&mut buf, state.enabled);
    buf.push(state.interrupt_enable);

    push_status_flags(&mut buf, &state.flags);
    push_decoded_flags(&mut buf, &state.decoded);

    buf.extend_from_slice(&state.read_address_data);
    push_usize(&mut buf, state.read_address_index);
    push_usize(&mut buf, state.dam_bytes_checked);
    push_usize(&mut buf, state.sector_length);
    push_usize(&mut buf, state.bytes_transferred);
    push_u16(&mut buf, state.crc_calc);
    push_u16(&mut buf, state.stored_crc);

    push_usize(&mut buf, state.drives.len());
    for drive in &state.drives {
        buf.push(drive.physical_track);
        push_bool(&mut buf, drive.write_protected);
    }

    match state.current_drive {
        Some(index) => {
            push_bool(&mut buf, true);
            buf.push(index as u8);
        }
        None => push_bool(&mut buf, false),
    }
    push_bool(&mut buf, state.side_one_selected);

    push_command(&mut buf, state.command);
    push_op_status(&mut buf, state.op_status);
    push_bool(&mut buf, state.is_polling);
    push_usize(&mut buf, state.target_data_index);
    push_u64(&mut buf, state.index_check_start_tick);
    push_bool(&mut buf, state.command_pulse_pending);
    push_bool(&mut buf, state.motor_on_pulse_pending);
    push_bool(&mut buf, state.motor_off_pulse_pending);

    buf
}

/// Decode a byte stream produced by [`encode_fdc`] and apply it to `fdc`.
///
/// `fdc`'s existing construction-time configuration is kept verbatim (the
/// snapshot format doesn't carry `PeripheralConfig` — it's a fixed hardware
/// parameter set, not runtime state). Streams older than version 10 lack the
/// `enabled` flag; it is inferred as "any drive has media loaded".
pub fn decode_fdc(fdc: &mut Fdc, bytes: &[u8], clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>) -> Result<(), crate::SnapshotError> {
    let mut r = Reader::new(bytes);
    let version = r.u16()?;
    if version > VERSION {
        return Err(format!("fdc snapshot version {version} is newer than supported version {VERSION}").into());
    }

    let track_register = r.u8()?;
    let sector_register = r.u8()?;
    let command_register = r.u8()?;
    let data_register = r.u8()?;
    let enabled = if version >= 10 {
        r.bool()?
    } else {
        fdc.drives().iter().any(DriveState::is_loaded)
    };
    let interrupt_enable = r.u8()?;

    let flags = read_status_flags(&mut r)?;
    let decoded = read_decoded_flags(&mut r)?;

    let mut read_address_data = [0u8; 6];
    for slot in &mut read_address_data {
        *slot = r.u8()?;
    }
    let read_address_index = r.usize()?;
    let dam_bytes_checked = r.usize()?;
    let sector_length = r.usize()?;
    let bytes_transferred = r.usize()?;
    let crc_calc = r.u16()?;
    let stored_crc = r.u16()?;

    let drive_count = r.usize()?;
    let mut drives = Vec::with_capacity(drive_count);
    for _ in 0..drive_count {
        let physical_track = r.u8()?;
        let write_protected = r.bool()?;
        drives.push(DriveMechanicalState {
            physical_track,
            write_protected,
        });
    }

    let current_drive = if r.bool()? { Some(r.u8()? as usize) } else { None };
    let side_one_selected = r.bool()?;

    let command = read_command(&mut r)?;
    let op_status = read_op_status(&mut r)?;
    let is_polling = r.bool()?;
    let target_data_index = r.usize()?;
    let index_check_start_tick = r.u64()?;
    let command_pulse_pending = r.bool()?;
    let motor_on_pulse_pending = r.bool()?;
    let motor_off_pulse_pending = r.bool()?;

    let config = fdc.export_state().config;
    let state = FdcState {
        config,
        enabled,
        interrupt_enable,
        track_register,
        sector_register,
        command_register,
        data_register,
        flags,
        decoded,
        current_drive,
        side_one_selected,
        drives,
        read_address_data,
        read_address_index,
        dam_bytes_checked,
        sector_length,
        bytes_transferred,
        crc_calc,
        stored_crc,
        command,
        op_status,
        is_polling,
        target_data_index,
        index_check_start_tick,
        command_pulse_pending,
        motor_on_pulse_pending,
        motor_off_pulse_pending,
    };
    fdc.import_state(state, clock, scheduler);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trs80_core::PeripheralConfig;
    use trs80_floppy::InMemoryFloppy;

    fn fdc_with_blank_disk() -> Fdc {
        let config = PeripheralConfig::default();
        let mut fdc = Fdc::new(&config);
        let image = InMemoryFloppy::blank(80, 1, trs80_floppy::DD_TRACK_LEN).expect("valid");
        fdc.drives_mut()[0].insert(Box::new(image));
        fdc
    }

    #[test]
    fn encode_then_decode_round_trips_through_bytes() {
        let mut fdc = fdc_with_blank_disk();
        fdc.drives_mut()[0].set_write_protected(true);
        for _ in 0..7 {
            fdc.drives_mut()[0].step_up();
        }

        let bytes = encode_fdc(&fdc);

        let mut restored = fdc_with_blank_disk();
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        decode_fdc(&mut restored, &bytes, &clock, &mut scheduler).expect("valid snapshot");

        assert_eq!(restored.track_register(), fdc.track_register());
        assert!(restored.drives()[0].write_protected());
        assert_eq!(restored.drives()[0].physical_track(), 7);
    }

    #[test]
    fn rejects_future_version() {
        let mut buf = Vec::new();
        push_u16(&mut buf, VERSION + 1);
        let mut fdc = fdc_with_blank_disk();
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let result = decode_fdc(&mut fdc, &buf, &clock, &mut scheduler);
        assert!(result.is_err());
    }
}
