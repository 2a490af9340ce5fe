//! `Observable` wiring for the FDC.

use trs80_core::{Observable, Value};

use crate::command::OpStatus;
use crate::fdc::Fdc;

const PATHS: &[&str] = &[
    "enabled",
    "busy",
    "track_register",
    "sector_register",
    "current_drive",
    "is_polling",
    "op_status",
    "interrupt_enable",
];

impl Observable for Fdc {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "enabled" => Some(Value::Bool(self.enabled())),
            "busy" => Some(Value::Bool(self.is_busy())),
            "track_register" => Some(Value::U8(self.track_register())),
            "sector_register" => Some(Value::U8(self.sector_register())),
            "current_drive" => Some(match self.current_drive_index() {
                Some(index) => Value::U8(index as u8),
                None => Value::String("none".to_string()),
            }),
            "is_polling" => Some(Value::Bool(self.is_polling())),
            "op_status" => Some(Value::String(op_status_name(self.op_status()).to_string())),
            "interrupt_enable" => Some(Value::U8(self.interrupt_enable())),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        PATHS
    }
}

fn op_status_name(status: OpStatus) -> &'static str {
    match status {
        OpStatus::OpDone => "done",
        OpStatus::Prepare => "prepare",
        OpStatus::Delay => "delay",
        OpStatus::Step => "step",
        OpStatus::CheckVerify => "check_verify",
        OpStatus::SeekingIdam => "seeking_idam",
        OpStatus::ReadingAddressData => "reading_address_data",
        OpStatus::VerifyTrack => "verify_track",
        OpStatus::SeekingDam => "seeking_dam",
        OpStatus::ReadingData => "reading_data",
        OpStatus::ReadCrcHigh => "read_crc_high",
        OpStatus::ReadCrcLow => "read_crc_low",
        OpStatus::WriteDrqWait => "write_drq_wait",
        OpStatus::WriteFiller => "write_filler",
        OpStatus::WriteSync => "write_sync",
        OpStatus::WriteDam => "write_dam",
        OpStatus::WritingData => "writing_data",
        OpStatus::WriteCrcHigh => "write_crc_high",
        OpStatus::WriteCrcLow => "write_crc_low",
        OpStatus::WriteTrailer => "write_trailer",
        OpStatus::ReadAddressTransfer => "read_address_transfer",
        OpStatus::AwaitIndexForTrack => "await_index_for_track",
        OpStatus::TrackStream => "track_stream",
        OpStatus::Nmi => "nmi",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trs80_core::PeripheralConfig;

    #[test]
    fn query_paths_cover_every_queryable_field() {
        let fdc = Fdc::new(&PeripheralConfig::default());
        for &path in fdc.query_paths() {
            assert!(fdc.query(path).is_some(), "missing value for {path}");
        }
    }

    #[test]
    fn unknown_path_returns_none() {
        let fdc = Fdc::new(&PeripheralConfig::default());
        assert!(fdc.query("nonexistent").is_none());
    }
}
