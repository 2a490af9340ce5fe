//! WD179x-class floppy disk controller emulation.

mod command;
mod crc;
mod fdc;
mod observable;
mod registers;
mod sound;
mod timing;

pub use command::{Command, DecodedFlags, OpStatus};
pub use fdc::{
    DriveMechanicalState, Fdc, FdcCallback, FdcState, PORT_COMMAND_STATUS, PORT_DATA, PORT_DRIVE_SELECT,
    PORT_INTERRUPT_ENABLE_RANGE, PORT_SECTOR, PORT_TRACK,
};
pub use registers::StatusFlags;
pub use sound::{NullSoundSink, SoundSink};
