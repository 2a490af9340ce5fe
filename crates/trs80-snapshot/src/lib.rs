//! Versioned byte-stream snapshot encoding for the cassette and FDC
//! peripherals.
//!
//! Each peripheral owns its own plain `*State` export/import pair
//! (`trs80_cassette::CassetteState`, `trs80_fdc::FdcState`); this crate's
//! only job is framing those plain structs as a versioned byte stream, the
//! way `machine-c64::snapshot` frames its own state structs with a magic
//! header and a `pos`-tracked cursor rather than pulling in `serde`.

mod cassette;
mod fdc;
mod io;

pub use cassette::{decode_cassette, encode_cassette};
pub use fdc::{decode_fdc, encode_fdc};

use std::error::Error;
use std::fmt;

/// A thin, `Display`-only error for snapshot decode failures, matching this
/// workspace's convention of surfacing loader errors as `String`s rather
/// than a `thiserror`-derived error tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotError(String);

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for SnapshotError {}

impl From<String> for SnapshotError {
    fn from(message: String) -> Self {
        Self(message)
    }
}
