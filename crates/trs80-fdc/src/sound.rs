//! The sound-sink collaborator the FDC drives but never owns.

/// Audible feedback the FDC drives: drive motor hum and head-step clicks.
///
/// A caller-supplied implementation renders these; this crate never touches
/// an audio backend directly (mirrors `drive-amiga-floppy`'s decoupling
/// from its host chip, and `emu-core`'s optional `cpal` renderer staying
/// outside the core crate).
pub trait SoundSink {
    fn drive_motor_running(&mut self, running: bool);
    fn track_step(&mut self);
}

/// A `SoundSink` that discards every event, for tests and headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSoundSink;

impl SoundSink for NullSoundSink {
    fn drive_motor_running(&mut self, _running: bool) {}
    fn track_step(&mut self) {}
}
