//! Track storage, drive mechanics, and the floppy image seam for the FDC.

mod drive;
mod image;
mod track;

pub use drive::DriveState;
pub use image::{FloppyImage, InMemoryFloppy};
pub use track::{Track, DD_TRACK_LEN, SD_TRACK_LEN};
