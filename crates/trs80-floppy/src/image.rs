//! The seam between the FDC and a concrete disk image loader.
//!
//! Parsing DMK/JV1/JV3 files is explicitly out of scope for this workspace;
//! a caller supplies any `FloppyImage` implementation. `InMemoryFloppy` is
//! the reference implementation used by this crate's and `trs80-fdc`'s
//! tests, built directly from `Track`s rather than a parsed file.

use crate::track::Track;

/// A source of per-track raw bytes and IDAM positions for one inserted disk.
pub trait FloppyImage {
    /// Number of cylinders this image has data for.
    fn num_tracks(&self) -> u8;

    /// Number of sides (1 or 2).
    fn num_sides(&self) -> u8;

    /// Borrow the track at (`physical_track`, `side`), if present.
    fn track(&self, physical_track: u8, side: u8) -> Option<&Track>;

    /// Mutably borrow the track at (`physical_track`, `side`), if present.
    fn track_mut(&mut self, physical_track: u8, side: u8) -> Option<&mut Track>;
}

/// A `FloppyImage` built directly from in-memory `Track`s.
///
/// Useful for tests and for callers who construct disk contents
/// programmatically rather than loading a file.
pub struct InMemoryFloppy {
    sides: u8,
    tracks: Vec<Vec<Track>>,
}

impl InMemoryFloppy {
    /// Build a blank image of `num_tracks` cylinders, `sides` heads, with
    /// every track backed by `cell_len` double-density cells.
    ///
    /// # Errors
    ///
    /// Returns an error string if `sides` is not 1 or 2.
    pub fn blank(num_tracks: u8, sides: u8, cell_len: usize) -> Result<Self, String> {
        if sides == 0 || sides > 2 {
            return Err(format!("unsupported side count: {sides}"));
        }
        let tracks = (0..num_tracks)
            .map(|_| (0..sides).map(|_| Track::new(cell_len)).collect())
            .collect();
        Ok(Self { sides, tracks })
    }
}

impl FloppyImage for InMemoryFloppy {
    fn num_tracks(&self) -> u8 {
        self.tracks.len() as u8
    }

    fn num_sides(&self) -> u8 {
        self.sides
    }

    fn track(&self, physical_track: u8, side: u8) -> Option<&Track> {
        self.tracks
            .get(physical_track as usize)?
            .get(side as usize)
    }

    fn track_mut(&mut self, physical_track: u8, side: u8) -> Option<&mut Track> {
        self.tracks
            .get_mut(physical_track as usize)?
            .get_mut(side as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::DD_TRACK_LEN;

    #[test]
    fn blank_image_has_requested_shape() {
        let image = InMemoryFloppy::blank(40, 1, DD_TRACK_LEN).expect("valid");
        assert_eq!(image.num_tracks(), 40);
        assert_eq!(image.num_sides(), 1);
        assert!(image.track(0, 0).is_some());
        assert!(image.track(39, 0).is_some());
        assert!(image.track(40, 0).is_none());
        assert!(image.track(0, 1).is_none());
    }

    #[test]
    fn rejects_bad_side_count() {
        assert!(InMemoryFloppy::blank(40, 0, DD_TRACK_LEN).is_err());
        assert!(InMemoryFloppy::blank(40, 3, DD_TRACK_LEN).is_err());
    }

    #[test]
    fn writes_are_visible_through_track_mut() {
        let mut image = InMemoryFloppy::blank(1, 1, DD_TRACK_LEN).expect("valid");
        image
            .track_mut(0, 0)
            .expect("present")
            .write_byte(0, true, 0xFE);
        assert_eq!(image.track(0, 0).expect("present").read_byte(0, true), 0xFE);
    }
}
