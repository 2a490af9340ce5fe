//! Per-drive mechanical state: head position, write-protect, inserted media.
//!
//! Grounded on `drive-amiga-floppy::AmigaFloppyDrive`'s clamped step
//! counter, generalized to a configurable track ceiling (80 here, vs the
//! Amiga drive's fixed 79).

use crate::image::FloppyImage;

/// One drive's mechanical state.
pub struct DriveState {
    physical_track: u8,
    write_protected: bool,
    max_track: u8,
    floppy: Option<Box<dyn FloppyImage>>,
}

impl DriveState {
    #[must_use]
    pub fn new(max_track: u8) -> Self {
        Self {
            physical_track: 0,
            write_protected: false,
            max_track,
            floppy: None,
        }
    }

    #[must_use]
    pub fn physical_track(&self) -> u8 {
        self.physical_track
    }

    #[must_use]
    pub fn write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.floppy.is_some()
    }

    pub fn insert(&mut self, floppy: Box<dyn FloppyImage>) {
        self.floppy = Some(floppy);
    }

    pub fn eject(&mut self) {
        self.floppy = None;
    }

    #[must_use]
    pub fn floppy(&self) -> Option<&dyn FloppyImage> {
        self.floppy.as_deref()
    }

    #[must_use]
    pub fn floppy_mut(&mut self) -> Option<&mut (dyn FloppyImage + 'static)> {
        self.floppy.as_deref_mut()
    }

    /// Step the head toward the spindle, clamped at `max_track`.
    ///
    /// Returns `true` if the physical track actually changed.
    pub fn step_up(&mut self) -> bool {
        if self.physical_track < self.max_track {
            self.physical_track += 1;
            true
        } else {
            false
        }
    }

    /// Step the head toward track 0, clamped at 0.
    ///
    /// Returns `true` if the physical track actually changed.
    pub fn step_down(&mut self) -> bool {
        if self.physical_track > 0 {
            self.physical_track -= 1;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn on_track_zero(&self) -> bool {
        self.physical_track == 0
    }

    #[must_use]
    pub fn max_track(&self) -> u8 {
        self.max_track
    }

    /// Directly set the physical track, clamped to `max_track`. Used to
    /// restore head position from a snapshot rather than stepping there.
    pub fn set_physical_track(&mut self, track: u8) {
        self.physical_track = track.min(self.max_track);
    }
}
