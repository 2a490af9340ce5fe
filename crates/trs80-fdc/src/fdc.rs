//! The WD179x-class command state machine.

use trs80_core::{Clock, InterruptLatches, InterruptLine, PeripheralConfig, PulseBasis, PulseHandle, PulseScheduler, Ticks};
use trs80_floppy::DriveState;

use crate::command::{self, Command, DecodedFlags, OpStatus};
use crate::crc;
use crate::registers;
use crate::registers::StatusFlags;
use crate::sound::SoundSink;
use crate::timing::{self, Rotation};

pub const PORT_COMMAND_STATUS: u8 = 0xF0;
pub const PORT_TRACK: u8 = 0xF1;
pub const PORT_SECTOR: u8 = 0xF2;
pub const PORT_DATA: u8 = 0xF3;
pub const PORT_DRIVE_SELECT: u8 = 0xF4;
pub const PORT_INTERRUPT_ENABLE_RANGE: core::ops::RangeInclusive<u8> = 0xE4..=0xE7;

const SINGLE_DENSITY_DAM_WINDOW: usize = 30;
const DOUBLE_DENSITY_DAM_WINDOW: usize = 43;
const DAM_NORMAL: u8 = 0xFB;
const DAM_DELETED: u8 = 0xF8;
const SINGLE_DENSITY_FILLER_BYTES: usize = 6;
const DOUBLE_DENSITY_FILLER_BYTES: usize = 12;
const MAX_RESTORE_STEPS: u32 = 256;

/// Callbacks the FDC's own pulse scheduler fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdcCallback {
    /// Resume the active command's state machine.
    Command,
    /// The selected drive's motor has reached speed.
    MotorOn,
    /// The motor auto-off timer has expired.
    MotorOff,
}

/// Per-drive mechanical state captured in a snapshot. The loaded floppy
/// image itself is out of scope (disk-image file formats aren't this
/// workspace's concern) — only head position and write-protect survive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveMechanicalState {
    pub physical_track: u8,
    pub write_protected: bool,
}

/// A plain, versioned-snapshot-friendly copy of every field in the data
/// model, for `trs80-snapshot` to encode without needing access to `Fdc`'s
/// private fields directly. Pending pulse requests are captured only as
/// "was one pending", per the same simplification `CassetteState` makes.
#[derive(Debug, Clone)]
pub struct FdcState {
    pub config: PeripheralConfig,
    pub enabled: bool,
    pub interrupt_enable: u8,
    pub track_register: u8,
    pub sector_register: u8,
    pub command_register: u8,
    pub data_register: u8,
    pub flags: StatusFlags,
    pub decoded: DecodedFlags,
    pub current_drive: Option<usize>,
    pub side_one_selected: bool,
    pub drives: Vec<DriveMechanicalState>,
    pub read_address_data: [u8; 6],
    pub read_address_index: usize,
    pub dam_bytes_checked: usize,
    pub sector_length: usize,
    pub bytes_transferred: usize,
    pub crc_calc: u16,
    pub stored_crc: u16,
    pub command: Command,
    pub op_status: OpStatus,
    pub is_polling: bool,
    pub target_data_index: usize,
    pub index_check_start_tick: u64,
    pub command_pulse_pending: bool,
    pub motor_on_pulse_pending: bool,
    pub motor_off_pulse_pending: bool,
}

/// The WD179x-class floppy disk controller.
pub struct Fdc {
    config: PeripheralConfig,
    enabled: bool,
    interrupt_enable: u8,

    track_register: u8,
    sector_register: u8,
    command_register: u8,
    data_register: u8,

    flags: StatusFlags,
    decoded: DecodedFlags,

    current_drive: Option<usize>,
    side_one_selected: bool,
    drives: Vec<DriveState>,

    read_address_data: [u8; 6],
    read_address_index: usize,
    dam_bytes_checked: usize,
    sector_length: usize,
    bytes_transferred: usize,
    crc_calc: u16,
    stored_crc: u16,

    command: Command,
    op_status: OpStatus,

    is_polling: bool,
    target_data_index: usize,

    rotation: Rotation,

    command_pulse: Option<PulseHandle>,
    motor_on_pulse: Option<PulseHandle>,
    motor_off_pulse: Option<PulseHandle>,
}

impl Fdc {
    #[must_use]
    pub fn new(config: &PeripheralConfig) -> Self {
        Self {
            config: *config,
            enabled: true,
            interrupt_enable: 0,
            track_register: 0,
            sector_register: 0,
            command_register: 0,
            data_register: 0,
            flags: StatusFlags::default(),
            decoded: DecodedFlags::default(),
            current_drive: None,
            side_one_selected: false,
            drives: (0..config.num_drives)
                .map(|_| DriveState::new(config.max_tracks))
                .collect(),
            read_address_data: [0; 6],
            read_address_index: 0,
            dam_bytes_checked: 0,
            sector_length: 0,
            bytes_transferred: 0,
            crc_calc: crc::CRC_RESET,
            stored_crc: 0,
            command: Command::Restore,
            op_status: OpStatus::OpDone,
            is_polling: false,
            target_data_index: 0,
            rotation: Rotation::new(),
            command_pulse: None,
            motor_on_pulse: None,
            motor_off_pulse: None,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[must_use]
    pub fn drives(&self) -> &[DriveState] {
        &self.drives
    }

    pub fn drives_mut(&mut self) -> &mut [DriveState] {
        &mut self.drives
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.flags.busy
    }

    #[must_use]
    pub fn track_register(&self) -> u8 {
        self.track_register
    }

    #[must_use]
    pub fn sector_register(&self) -> u8 {
        self.sector_register
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.is_polling
    }

    #[must_use]
    pub fn current_drive_index(&self) -> Option<usize> {
        self.current_drive
    }

    #[must_use]
    pub fn op_status(&self) -> OpStatus {
        self.op_status
    }

    fn current_drive(&self) -> Option<&DriveState> {
        self.current_drive.and_then(|i| self.drives.get(i))
    }

    fn current_drive_mut(&mut self) -> Option<&mut DriveState> {
        self.current_drive.and_then(move |i| self.drives.get_mut(i))
    }

    fn on_track_zero(&self) -> bool {
        self.current_drive().is_some_and(DriveState::on_track_zero)
    }

    fn disk_angle(&self, clock: &Clock) -> u64 {
        Rotation::disk_angle(clock.tick_count(), self.config.ticks_per_rev())
    }

    fn index_pulse(&self, clock: &Clock) -> bool {
        Rotation::index_detect(self.flags.motor_on, self.disk_angle(clock))
    }

    fn track_len(&self) -> usize {
        self.current_drive()
            .and_then(|d| d.floppy())
            .and_then(|f| f.track(self.current_physical_track(), self.side()))
            .map_or(if self.flags.double_density { 12_500 } else { 6_250 }, |t| {
                t.logical_len(self.flags.double_density)
            })
    }

    fn current_physical_track(&self) -> u8 {
        self.current_drive().map_or(0, DriveState::physical_track)
    }

    fn side(&self) -> u8 {
        u8::from(self.side_one_selected)
    }

    fn track_data_index(&self, clock: &Clock) -> usize {
        Rotation::track_data_index(self.disk_angle(clock), self.track_len())
    }

    // -----------------------------------------------------------------
    // Port I/O
    // -----------------------------------------------------------------

    /// Read one of the four register ports. `None` for ports this FDC does
    /// not claim.
    #[must_use]
    pub fn port_in(&mut self, port: u8, clock: &Clock) -> Option<u8> {
        if !self.enabled && matches!(port, PORT_COMMAND_STATUS | PORT_TRACK | PORT_SECTOR | PORT_DATA) {
            return Some(0xFF);
        }
        match port {
            PORT_COMMAND_STATUS => {
                let index_pulse = self.index_pulse(clock);
                Some(registers::assemble(
                    &self.flags,
                    self.command.is_type_one(),
                    self.on_track_zero(),
                    index_pulse,
                ))
            }
            PORT_TRACK => Some(self.track_register),
            PORT_SECTOR => Some(self.sector_register),
            PORT_DATA => {
                self.flags.drq = false;
                Some(self.data_register)
            }
            _ => None,
        }
    }

    /// Write one of the five register/control ports.
    pub fn port_out(
        &mut self,
        port: u8,
        value: u8,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        sound: &mut dyn SoundSink,
    ) {
        match port {
            PORT_COMMAND_STATUS => self.start_command(value, clock, scheduler, latches),
            PORT_TRACK => self.track_register = value,
            PORT_SECTOR => self.sector_register = value,
            PORT_DATA => {
                self.data_register = value;
                self.flags.drq = false;
            }
            PORT_DRIVE_SELECT => self.select_drive(value, clock, scheduler, sound),
            p if PORT_INTERRUPT_ENABLE_RANGE.contains(&p) => self.interrupt_enable = value,
            _ => {}
        }
    }

    #[must_use]
    pub fn interrupt_enable(&self) -> u8 {
        self.interrupt_enable
    }

    /// Export every field named in the data model, as plain values
    /// `trs80-snapshot` can encode without reaching into private state.
    #[must_use]
    pub fn export_state(&self) -> FdcState {
        FdcState {
            config: self.config,
            enabled: self.enabled,
            interrupt_enable: self.interrupt_enable,
            track_register: self.track_register,
            sector_register: self.sector_register,
            command_register: self.command_register,
            data_register: self.data_register,
            flags: self.flags,
            decoded: self.decoded,
            current_drive: self.current_drive,
            side_one_selected: self.side_one_selected,
            drives: self
                .drives
                .iter()
                .map(|d| DriveMechanicalState {
                    physical_track: d.physical_track(),
                    write_protected: d.write_protected(),
                })
                .collect(),
            read_address_data: self.read_address_data,
            read_address_index: self.read_address_index,
            dam_bytes_checked: self.dam_bytes_checked,
            sector_length: self.sector_length,
            bytes_transferred: self.bytes_transferred,
            crc_calc: self.crc_calc,
            stored_crc: self.stored_crc,
            command: self.command,
            op_status: self.op_status,
            is_polling: self.is_polling,
            target_data_index: self.target_data_index,
            index_check_start_tick: self.rotation.index_check_start_tick().get(),
            command_pulse_pending: self.command_pulse.is_some(),
            motor_on_pulse_pending: self.motor_on_pulse.is_some(),
            motor_off_pulse_pending: self.motor_off_pulse.is_some(),
        }
    }

    /// Restore a previously exported state. Any pulse that was pending is
    /// re-registered to fire immediately, since the precise residual delay
    /// isn't captured (mirrors `CassetteState::import_state`'s approach).
    pub fn import_state(&mut self, state: FdcState, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>) {
        self.config = state.config;
        self.enabled = state.enabled;
        self.interrupt_enable = state.interrupt_enable;
        self.track_register = state.track_register;
        self.sector_register = state.sector_register;
        self.command_register = state.command_register;
        self.data_register = state.data_register;
        self.flags = state.flags;
        self.decoded = state.decoded;
        self.current_drive = state.current_drive;
        self.side_one_selected = state.side_one_selected;
        for (drive, mechanical) in self.drives.iter_mut().zip(state.drives.iter()) {
            drive.set_physical_track(mechanical.physical_track);
            drive.set_write_protected(mechanical.write_protected);
        }
        self.read_address_data = state.read_address_data;
        self.read_address_index = state.read_address_index;
        self.dam_bytes_checked = state.dam_bytes_checked;
        self.sector_length = state.sector_length;
        self.bytes_transferred = state.bytes_transferred;
        self.crc_calc = state.crc_calc;
        self.stored_crc = state.stored_crc;
        self.command = state.command;
        self.op_status = state.op_status;
        self.is_polling = state.is_polling;
        self.target_data_index = state.target_data_index;
        self.rotation = Rotation::from_parts(Ticks::new(state.index_check_start_tick));

        for handle in [
            self.command_pulse.take(),
            self.motor_on_pulse.take(),
            self.motor_off_pulse.take(),
        ]
        .into_iter()
        .flatten()
        {
            scheduler.expire(handle);
        }
        if state.command_pulse_pending {
            self.command_pulse = Some(scheduler.schedule(clock, PulseBasis::Ticks(0), FdcCallback::Command));
        }
        if state.motor_on_pulse_pending {
            self.motor_on_pulse = Some(scheduler.schedule(clock, PulseBasis::Ticks(0), FdcCallback::MotorOn));
        }
        if state.motor_off_pulse_pending {
            self.motor_off_pulse = Some(scheduler.schedule(clock, PulseBasis::Ticks(0), FdcCallback::MotorOff));
        }
    }

    fn select_drive(
        &mut self,
        value: u8,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        sound: &mut dyn SoundSink,
    ) {
        self.current_drive = (0..4).find(|bit| value & (1 << bit) != 0);
        self.side_one_selected = value & 0x10 != 0;
        self.flags.double_density = value & 0x80 != 0;
        self.flags.write_protected = self
            .current_drive()
            .is_some_and(DriveState::write_protected);

        if self.flags.motor_on {
            if let Some(handle) = self.motor_off_pulse.take() {
                scheduler.expire(handle);
            }
            self.motor_off_pulse = Some(scheduler.schedule(
                clock,
                PulseBasis::Ticks(self.config.motor_off_delay.get()),
                FdcCallback::MotorOff,
            ));
        } else if self.motor_on_pulse.is_none() {
            self.motor_on_pulse = Some(scheduler.schedule(
                clock,
                PulseBasis::Ticks(self.config.motor_on_delay.get()),
                FdcCallback::MotorOn,
            ));
        }
        let _ = sound;
    }

    // -----------------------------------------------------------------
    // Scheduler entry point
    // -----------------------------------------------------------------

    pub fn on_scheduler_fire(
        &mut self,
        callback: FdcCallback,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        sound: &mut dyn SoundSink,
    ) {
        match callback {
            FdcCallback::MotorOn => {
                self.motor_on_pulse = None;
                self.flags.motor_on = true;
                self.rotation.reset_index_count(clock.tick_count(), self.config.ticks_per_rev());
                sound.drive_motor_running(true);
                self.motor_off_pulse = Some(scheduler.schedule(
                    clock,
                    PulseBasis::Ticks(self.config.motor_off_delay.get()),
                    FdcCallback::MotorOff,
                ));
            }
            FdcCallback::MotorOff => {
                self.motor_off_pulse = None;
                self.flags.motor_on = false;
                sound.drive_motor_running(false);
                latches.latch(InterruptLine::FdcMotorOffNmi);
            }
            FdcCallback::Command => {
                self.command_pulse = None;
                self.is_polling = false;
                self.advance(clock, scheduler, latches, sound);
            }
        }
    }

    fn schedule_command_pulse(&mut self, clock: &Clock, delay: Ticks, scheduler: &mut PulseScheduler<FdcCallback>) {
        self.command_pulse = Some(scheduler.schedule(clock, PulseBasis::Ticks(delay.get()), FdcCallback::Command));
    }

    /// Schedule the next phase re-entry after `n` logical bytes pass under
    /// the head.
    fn poll_after_bytes(&mut self, clock: &Clock, n: usize, scheduler: &mut PulseScheduler<FdcCallback>) {
        let track_len = self.track_len();
        let current = self.track_data_index(clock);
        let target = timing::poll_target(current, n, track_len, self.flags.double_density);
        let delay = timing::ticks_until_target(current, target, track_len, &self.config);
        self.is_polling = true;
        self.target_data_index = target;
        self.schedule_command_pulse(clock, delay, scheduler);
    }

    fn schedule_delay(&mut self, clock: &Clock, delay: Ticks, scheduler: &mut PulseScheduler<FdcCallback>) {
        self.is_polling = false;
        self.schedule_command_pulse(clock, delay, scheduler);
    }

    // -----------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------

    fn start_command(
        &mut self,
        value: u8,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
    ) {
        let (command, flags) = command::decode(value);
        self.command_register = value;

        if command.is_type_four() {
            self.abort_to_nmi(command, clock, scheduler, latches);
            return;
        }

        if self.flags.busy {
            return; // a command is already executing; ignore new non-Type-IV writes
        }

        self.command = command;
        self.decoded = flags;
        self.flags.busy = true;
        self.flags.crc_error = false;
        self.flags.seek_error = false;
        self.flags.lost_data = false;
        self.read_address_index = 0;
        self.dam_bytes_checked = 0;
        self.bytes_transferred = 0;

        if let Command::Step { .. } | Command::StepIn { .. } | Command::StepOut { .. } = command {
            if let Command::StepIn { .. } = command {
                self.flags.last_step_dir_up = true;
            } else if let Command::StepOut { .. } = command {
                self.flags.last_step_dir_up = false;
            }
        }
        if matches!(command, Command::Restore) {
            self.track_register = 0xFF;
            self.data_register = 0;
        }

        self.op_status = OpStatus::Prepare;
        self.advance(clock, scheduler, latches, &mut crate::sound::NullSoundSink);
    }

    fn abort_to_nmi(
        &mut self,
        command: Command,
        _clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
    ) {
        if let Some(handle) = self.command_pulse.take() {
            scheduler.expire(handle);
        }
        self.command = command;
        self.is_polling = false;
        // All Type IV variants (ForceInterrupt, ForceInterruptImmediate, Reset)
        // latch NMI unconditionally without advancing state — none of them
        // get a delay or a trip through `advance()`.
        self.flags.busy = false;
        self.flags.drq = false;
        latches.latch(InterruptLine::FdcNmi);
    }

    /// Advance the active command's state machine by one phase.
    fn advance(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        sound: &mut dyn SoundSink,
    ) {
        if self.command.is_type_one() {
            self.advance_type_one(clock, scheduler, latches, sound);
        } else {
            match self.command {
                Command::ReadSector => self.advance_read_sector(clock, scheduler, latches),
                Command::WriteSector => self.advance_write_sector(clock, scheduler, latches),
                Command::ReadAddress => self.advance_read_address(clock, scheduler, latches),
                Command::ReadTrack => self.advance_read_track(clock, scheduler, latches),
                Command::WriteTrack => self.advance_write_track(clock, scheduler, latches),
                _ => unreachable!("Type IV commands complete in abort_to_nmi and never reach advance()"),
            }
        }
    }

    fn complete(&mut self, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>, _latches: &mut InterruptLatches) {
        self.op_status = OpStatus::Nmi;
        self.schedule_delay(clock, self.config.nmi_delay, scheduler);
    }

    fn do_nmi(&mut self, latches: &mut InterruptLatches) {
        self.flags.busy = false;
        self.flags.drq = false;
        latches.latch(InterruptLine::FdcNmi);
    }

    // -----------------------------------------------------------------
    // Type I: Restore / Seek / Step / StepIn / StepOut
    // -----------------------------------------------------------------

    fn advance_type_one(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        sound: &mut dyn SoundSink,
    ) {
        match self.op_status {
            OpStatus::Nmi => {
                self.do_nmi(latches);
                return;
            }
            OpStatus::Prepare => {
                self.op_status = OpStatus::Step;
            }
            _ => {}
        }

        match self.command {
            Command::Restore => self.step_restore(clock, scheduler, latches, sound),
            Command::Seek => self.step_seek(clock, scheduler, latches, sound),
            Command::Step { update_registers } => {
                self.step_once(self.flags.last_step_dir_up, update_registers, clock, scheduler, latches, sound);
            }
            Command::StepIn { update_registers } => {
                self.step_once(true, update_registers, clock, scheduler, latches, sound);
            }
            Command::StepOut { update_registers } => {
                self.step_once(false, update_registers, clock, scheduler, latches, sound);
            }
            _ => unreachable!("advance_type_one only dispatched for Type I commands"),
        }
    }

    fn do_step(&mut self, up: bool, sound: &mut dyn SoundSink) -> bool {
        let moved = if let Some(drive) = self.current_drive_mut() {
            if up { drive.step_up() } else { drive.step_down() }
        } else {
            false
        };
        if moved {
            sound.track_step();
            if self.on_track_zero() {
                self.track_register = 0;
            }
        }
        moved
    }

    fn step_restore(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        sound: &mut dyn SoundSink,
    ) {
        if self.on_track_zero() || self.bytes_transferred as u32 >= MAX_RESTORE_STEPS {
            self.track_register = 0;
            self.bytes_transferred = 0;
            self.finish_type_one(clock, scheduler, latches);
            return;
        }
        self.do_step(false, sound);
        self.bytes_transferred += 1;
        let step_rate = self.config.step_rates[command::step_rate_index(self.command_register)];
        self.schedule_delay(clock, step_rate, scheduler);
    }

    fn step_seek(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        sound: &mut dyn SoundSink,
    ) {
        let target = self.data_register;
        if self.track_register == target {
            self.finish_type_one(clock, scheduler, latches);
            return;
        }
        let up = target > self.track_register;
        let moved = self.do_step(up, sound);
        if !moved && !up {
            // Hit track 0 while still seeking inward; nothing more to do.
            self.track_register = 0;
            self.finish_type_one(clock, scheduler, latches);
            return;
        }
        self.track_register = if up {
            self.track_register.saturating_add(1)
        } else {
            self.track_register.saturating_sub(1)
        };
        let step_rate = self.config.step_rates[command::step_rate_index(self.command_register)];
        self.schedule_delay(clock, step_rate, scheduler);
    }

    fn step_once(
        &mut self,
        up: bool,
        update_registers: bool,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        sound: &mut dyn SoundSink,
    ) {
        self.do_step(up, sound);
        if update_registers {
            self.track_register = self.current_physical_track();
        }
        self.finish_type_one(clock, scheduler, latches);
    }

    fn finish_type_one(&mut self, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>, latches: &mut InterruptLatches) {
        if self.decoded.verify {
            self.op_status = OpStatus::SeekingIdam;
            self.rotation.reset_index_count(clock.tick_count(), self.config.ticks_per_rev());
            self.poll_after_bytes(clock, 1, scheduler);
            let _ = latches;
        } else {
            self.complete(clock, scheduler, latches);
        }
    }

    // -----------------------------------------------------------------
    // Shared address-field scanning (Type I verify, Type II, Type III)
    // -----------------------------------------------------------------

    /// Scan forward for the next IDAM. Returns `true` if one was found
    /// under the head right now.
    fn idam_under_head(&self, clock: &Clock) -> bool {
        let index = self.track_data_index(clock);
        self.current_drive()
            .and_then(|d| d.floppy())
            .and_then(|f| f.track(self.current_physical_track(), self.side()))
            .is_some_and(|t| t.has_idam_at(index, self.flags.double_density))
    }

    fn read_track_byte(&self, clock: &Clock, offset: usize) -> u8 {
        let track_len = self.track_len();
        let index = (self.track_data_index(clock) + offset) % track_len.max(1);
        self.current_drive()
            .and_then(|d| d.floppy())
            .and_then(|f| f.track(self.current_physical_track(), self.side()))
            .map_or(0, |t| t.read_byte(index, self.flags.double_density))
    }

    fn continue_seeking_idam(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        on_found: OpStatus,
        latches: &mut InterruptLatches,
    ) {
        if self.idam_under_head(clock) {
            self.read_address_index = 0;
            self.op_status = on_found;
            self.poll_after_bytes(clock, 1, scheduler);
            return;
        }
        if self.rotation.indexes_found(clock.tick_count(), self.config.ticks_per_rev()) >= 5 {
            self.flags.seek_error = true;
            self.complete(clock, scheduler, latches);
            return;
        }
        self.poll_after_bytes(clock, 1, scheduler);
    }

    fn continue_reading_address(
        &mut self,
        clock: &Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        next: AddressNext,
    ) {
        let byte = self.read_track_byte(clock, 0);
        self.read_address_data[self.read_address_index] = byte;
        self.read_address_index += 1;
        if self.read_address_index < self.read_address_data.len() {
            self.poll_after_bytes(clock, 1, scheduler);
            return;
        }

        self.stored_crc = (u16::from(self.read_address_data[4]) << 8) | u16::from(self.read_address_data[5]);
        match next {
            AddressNext::VerifyTrack => {
                if self.read_address_data[0] == self.track_register {
                    self.complete(clock, scheduler, latches);
                } else {
                    self.op_status = OpStatus::SeekingIdam;
                    self.poll_after_bytes(clock, 1, scheduler);
                }
            }
            AddressNext::SeekDataMark { for_write } => {
                let track_matches = self.read_address_data[0] == self.track_register;
                let sector_matches = self.read_address_data[2] == self.sector_register;
                let side_matches = !self.decoded.side_select_verify
                    || self.read_address_data[1] == u8::from(self.decoded.side_one_expected);
                if track_matches && sector_matches && side_matches {
                    self.sector_length = 128usize << self.read_address_data[3].min(3);
                    self.dam_bytes_checked = 0;
                    self.bytes_transferred = 0;
                    self.op_status = if for_write {
                        OpStatus::WriteDrqWait
                    } else {
                        OpStatus::SeekingDam
                    };
                    self.poll_after_bytes(clock, 1, scheduler);
                } else {
                    self.op_status = OpStatus::SeekingIdam;
                    self.poll_after_bytes(clock, 1, scheduler);
                }
            }
            AddressNext::Transfer => {
                self.track_register = self.read_address_data[0];
                self.sector_register = self.read_address_data[2];
                self.data_register = self.read_address_data[0];
                self.flags.drq = true;
                self.op_status = OpStatus::ReadAddressTransfer;
                self.poll_after_bytes(clock, 1, scheduler);
            }
        }
    }

    // -----------------------------------------------------------------
    // Type II: ReadSector
    // -----------------------------------------------------------------

    fn advance_read_sector(&mut self, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>, latches: &mut InterruptLatches) {
        match self.op_status {
            OpStatus::Prepare => {
                self.rotation.reset_index_count(clock.tick_count(), self.config.ticks_per_rev());
                if self.decoded.delay {
                    self.op_status = OpStatus::Delay;
                    self.schedule_delay(clock, self.config.head_load_delay, scheduler);
                } else {
                    self.op_status = OpStatus::SeekingIdam;
                    self.poll_after_bytes(clock, 1, scheduler);
                }
            }
            OpStatus::Delay => {
                self.op_status = OpStatus::SeekingIdam;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::SeekingIdam => {
                self.continue_seeking_idam(clock, scheduler, OpStatus::ReadingAddressData, latches);
            }
            OpStatus::ReadingAddressData => {
                self.continue_reading_address(
                    clock,
                    scheduler,
                    latches,
                    AddressNext::SeekDataMark { for_write: false },
                );
            }
            OpStatus::SeekingDam => {
                let window = if self.flags.double_density {
                    DOUBLE_DENSITY_DAM_WINDOW
                } else {
                    SINGLE_DENSITY_DAM_WINDOW
                };
                let byte = self.read_track_byte(clock, 0);
                if byte == DAM_NORMAL || byte == DAM_DELETED {
                    self.flags.sector_deleted = byte == DAM_DELETED;
                    self.crc_calc = if self.flags.double_density {
                        crc::CRC_RESET_A1_A1_A1
                    } else {
                        crc::CRC_RESET
                    };
                    self.crc_calc = crc::update(self.crc_calc, byte);
                    self.bytes_transferred = 0;
                    self.op_status = OpStatus::ReadingData;
                    self.poll_after_bytes(clock, 1, scheduler);
                } else if self.dam_bytes_checked + 1 >= window {
                    self.flags.seek_error = true;
                    self.complete(clock, scheduler, latches);
                } else {
                    self.dam_bytes_checked += 1;
                    self.poll_after_bytes(clock, 1, scheduler);
                }
            }
            OpStatus::ReadingData => {
                if self.flags.drq {
                    self.flags.lost_data = true;
                }
                let byte = self.read_track_byte(clock, 0);
                self.crc_calc = crc::update(self.crc_calc, byte);
                self.data_register = byte;
                self.flags.drq = true;
                self.bytes_transferred += 1;
                if self.bytes_transferred >= self.sector_length {
                    self.op_status = OpStatus::ReadCrcHigh;
                }
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::ReadCrcHigh => {
                let byte = self.read_track_byte(clock, 0);
                self.stored_crc = u16::from(byte) << 8;
                self.op_status = OpStatus::ReadCrcLow;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::ReadCrcLow => {
                let byte = self.read_track_byte(clock, 0);
                self.stored_crc |= u16::from(byte);
                if self.stored_crc != self.crc_calc {
                    self.flags.crc_error = true;
                    self.complete(clock, scheduler, latches);
                } else if self.decoded.multiple_records {
                    self.sector_register = self.sector_register.wrapping_add(1);
                    self.op_status = OpStatus::SeekingIdam;
                    self.poll_after_bytes(clock, 1, scheduler);
                } else {
                    self.complete(clock, scheduler, latches);
                }
            }
            OpStatus::Nmi => self.do_nmi(latches),
            _ => self.complete(clock, scheduler, latches),
        }
    }

    // -----------------------------------------------------------------
    // Type II: WriteSector
    // -----------------------------------------------------------------

    fn advance_write_sector(&mut self, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>, latches: &mut InterruptLatches) {
        if self.flags.write_protected && matches!(self.op_status, OpStatus::Prepare) {
            self.complete(clock, scheduler, latches);
            return;
        }

        match self.op_status {
            OpStatus::Prepare => {
                self.rotation.reset_index_count(clock.tick_count(), self.config.ticks_per_rev());
                if self.decoded.delay {
                    self.op_status = OpStatus::Delay;
                    self.schedule_delay(clock, self.config.head_load_delay, scheduler);
                } else {
                    self.op_status = OpStatus::SeekingIdam;
                    self.poll_after_bytes(clock, 1, scheduler);
                }
            }
            OpStatus::Delay => {
                self.op_status = OpStatus::SeekingIdam;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::SeekingIdam => {
                self.continue_seeking_idam(clock, scheduler, OpStatus::ReadingAddressData, latches);
            }
            OpStatus::ReadingAddressData => {
                self.continue_reading_address(
                    clock,
                    scheduler,
                    latches,
                    AddressNext::SeekDataMark { for_write: true },
                );
            }
            OpStatus::WriteDrqWait => {
                if self.flags.drq {
                    self.flags.lost_data = true;
                }
                self.flags.drq = true;
                self.bytes_transferred += 1;
                if self.bytes_transferred >= 8 {
                    self.op_status = OpStatus::WriteFiller;
                    self.bytes_transferred = 0;
                }
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::WriteFiller => {
                let filler_len = if self.flags.double_density {
                    DOUBLE_DENSITY_FILLER_BYTES
                } else {
                    SINGLE_DENSITY_FILLER_BYTES
                };
                self.write_track_byte(clock, 0x00);
                self.bytes_transferred += 1;
                if self.bytes_transferred >= filler_len {
                    self.bytes_transferred = 0;
                    self.op_status = if self.flags.double_density {
                        OpStatus::WriteSync
                    } else {
                        OpStatus::WriteDam
                    };
                }
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::WriteSync => {
                self.write_track_byte(clock, 0xA1);
                self.bytes_transferred += 1;
                if self.bytes_transferred >= 3 {
                    self.op_status = OpStatus::WriteDam;
                }
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::WriteDam => {
                let dam = if self.decoded.mark_sector_deleted {
                    DAM_DELETED
                } else {
                    DAM_NORMAL
                };
                self.crc_calc = if self.flags.double_density {
                    crc::CRC_RESET_A1_A1_A1
                } else {
                    crc::CRC_RESET
                };
                self.crc_calc = crc::update(self.crc_calc, dam);
                self.write_track_byte(clock, dam);
                self.bytes_transferred = 0;
                self.op_status = OpStatus::WritingData;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::WritingData => {
                let byte = if self.flags.drq {
                    self.flags.lost_data = true;
                    0x00
                } else {
                    self.data_register
                };
                self.crc_calc = crc::update(self.crc_calc, byte);
                self.write_track_byte(clock, byte);
                self.flags.drq = true;
                self.bytes_transferred += 1;
                if self.bytes_transferred >= self.sector_length {
                    self.op_status = OpStatus::WriteCrcHigh;
                }
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::WriteCrcHigh => {
                self.write_track_byte(clock, (self.crc_calc >> 8) as u8);
                self.op_status = OpStatus::WriteCrcLow;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::WriteCrcLow => {
                self.write_track_byte(clock, (self.crc_calc & 0xFF) as u8);
                self.op_status = OpStatus::WriteTrailer;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::WriteTrailer => {
                self.write_track_byte(clock, 0xFF);
                self.flags.drq = false;
                if self.decoded.multiple_records {
                    self.sector_register = self.sector_register.wrapping_add(1);
                    self.op_status = OpStatus::SeekingIdam;
                    self.poll_after_bytes(clock, 1, scheduler);
                } else {
                    self.complete(clock, scheduler, latches);
                }
            }
            OpStatus::Nmi => self.do_nmi(latches),
            _ => self.complete(clock, scheduler, latches),
        }
    }

    fn write_track_byte(&mut self, clock: &Clock, value: u8) {
        let index = self.track_data_index(clock);
        let double_density = self.flags.double_density;
        let physical_track = self.current_physical_track();
        let side = self.side();
        if let Some(track) = self
            .current_drive_mut()
            .and_then(|d| d.floppy_mut())
            .and_then(|f| f.track_mut(physical_track, side))
        {
            track.write_byte(index, double_density, value);
        }
    }

    // -----------------------------------------------------------------
    // Type III: ReadAddress / ReadTrack / WriteTrack
    // -----------------------------------------------------------------

    fn advance_read_address(&mut self, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>, latches: &mut InterruptLatches) {
        match self.op_status {
            OpStatus::Prepare => {
                self.rotation.reset_index_count(clock.tick_count(), self.config.ticks_per_rev());
                self.op_status = OpStatus::SeekingIdam;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::SeekingIdam => {
                self.continue_seeking_idam(clock, scheduler, OpStatus::ReadingAddressData, latches);
            }
            OpStatus::ReadingAddressData => {
                self.continue_reading_address(clock, scheduler, latches, AddressNext::Transfer);
            }
            OpStatus::ReadAddressTransfer => self.complete(clock, scheduler, latches),
            OpStatus::Nmi => self.do_nmi(latches),
            _ => self.complete(clock, scheduler, latches),
        }
    }

    fn advance_read_track(&mut self, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>, latches: &mut InterruptLatches) {
        match self.op_status {
            OpStatus::Prepare => {
                self.op_status = OpStatus::AwaitIndexForTrack;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::AwaitIndexForTrack => {
                if self.index_pulse(clock) {
                    self.bytes_transferred = 0;
                    self.op_status = OpStatus::TrackStream;
                }
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::TrackStream => {
                let byte = self.read_track_byte(clock, 0);
                self.data_register = byte;
                self.flags.drq = true;
                self.bytes_transferred += 1;
                if self.index_pulse(clock) && self.bytes_transferred > 1 {
                    self.complete(clock, scheduler, latches);
                } else {
                    self.poll_after_bytes(clock, 1, scheduler);
                }
            }
            OpStatus::Nmi => self.do_nmi(latches),
            _ => self.complete(clock, scheduler, latches),
        }
    }

    fn advance_write_track(&mut self, clock: &Clock, scheduler: &mut PulseScheduler<FdcCallback>, latches: &mut InterruptLatches) {
        if self.flags.write_protected && matches!(self.op_status, OpStatus::Prepare) {
            self.complete(clock, scheduler, latches);
            return;
        }
        match self.op_status {
            OpStatus::Prepare => {
                self.op_status = OpStatus::AwaitIndexForTrack;
                self.crc_calc = crc::CRC_RESET;
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::AwaitIndexForTrack => {
                if self.index_pulse(clock) {
                    self.bytes_transferred = 0;
                    self.flags.drq = true;
                    self.op_status = OpStatus::TrackStream;
                }
                self.poll_after_bytes(clock, 1, scheduler);
            }
            OpStatus::TrackStream => {
                let raw = self.data_register;
                let double_density = self.flags.double_density;
                let (out_byte, reset_crc, emit_crc) = transform_write_track_byte(raw, double_density);
                if reset_crc {
                    self.crc_calc = crc::CRC_RESET;
                }
                if emit_crc {
                    self.write_track_byte(clock, (self.crc_calc >> 8) as u8);
                } else {
                    self.crc_calc = crc::update(self.crc_calc, out_byte);
                    self.write_track_byte(clock, out_byte);
                }
                self.flags.drq = true;
                self.bytes_transferred += 1;
                if self.index_pulse(clock) && self.bytes_transferred > 1 {
                    self.flags.drq = false;
                    self.complete(clock, scheduler, latches);
                } else {
                    self.poll_after_bytes(clock, 1, scheduler);
                }
            }
            OpStatus::Nmi => self.do_nmi(latches),
            _ => self.complete(clock, scheduler, latches),
        }
    }
}

enum AddressNext {
    VerifyTrack,
    SeekDataMark { for_write: bool },
    Transfer,
}

/// Apply WriteTrack's special-byte substitution rules (§4.2).
///
/// Returns `(byte_to_write, reset_crc_after, emit_crc_instead)`.
fn transform_write_track_byte(raw: u8, double_density: bool) -> (u8, bool, bool) {
    if double_density {
        match raw {
            0xF5 => (0xA1, false, false),
            0xF6 => (0xC2, false, false),
            0xF7 => (0, false, true),
            _ => (raw, false, false),
        }
    } else {
        match raw {
            0xF7 => (0, false, true),
            0xF8..=0xFB | 0xFD | 0xFE => (raw, true, false),
            _ => (raw, false, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trs80_core::{Clock, InterruptLatches, PulseScheduler};
    use trs80_floppy::InMemoryFloppy;

    fn config() -> PeripheralConfig {
        PeripheralConfig::default()
    }

    fn fdc_with_blank_disk() -> Fdc {
        let config = config();
        let mut fdc = Fdc::new(&config);
        let image = InMemoryFloppy::blank(80, 1, trs80_floppy::DD_TRACK_LEN).expect("valid");
        fdc.drives_mut()[0].insert(Box::new(image));
        fdc.current_drive = Some(0);
        fdc
    }

    #[test]
    fn restore_drives_track_register_to_zero() {
        let mut fdc = fdc_with_blank_disk();
        for _ in 0..40 {
            fdc.drives_mut()[0].step_up();
        }
        fdc.track_register = 40;
        fdc.data_register = 0;

        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let mut sound = crate::sound::NullSoundSink;
        fdc.port_out(PORT_COMMAND_STATUS, 0x03, &clock, &mut scheduler, &mut latches, &mut sound);

        // Drain the scheduled step/verify/NMI chain. 40 steps at the slowest
        // (30ms) step rate is ~2.1e9 ticks; advance in coarse chunks well
        // past that.
        let mut clock = clock;
        for _ in 0..200 {
            if !fdc.is_busy() {
                break;
            }
            clock.advance(Ticks::new(60_000_000));
            let due = scheduler.poll(clock.tick_count());
            for cb in due {
                fdc.on_scheduler_fire(cb, &clock, &mut scheduler, &mut latches, &mut sound);
            }
        }

        assert_eq!(fdc.track_register(), 0);
        assert!(!fdc.is_busy());
        assert!(latches.is_latched(InterruptLine::FdcNmi));
    }

    #[test]
    fn step_up_and_down_clamp_via_drive_state() {
        let mut fdc = fdc_with_blank_disk();
        assert!(fdc.drives()[0].on_track_zero());
        let mut sound = crate::sound::NullSoundSink;
        assert!(fdc.do_step(true, &mut sound));
        assert_eq!(fdc.drives()[0].physical_track(), 1);
        assert!(fdc.do_step(false, &mut sound));
        assert!(!fdc.do_step(false, &mut sound));
    }

    #[test]
    fn write_protected_write_sector_aborts_immediately() {
        let mut fdc = fdc_with_blank_disk();
        fdc.drives_mut()[0].set_write_protected(true);
        fdc.flags.write_protected = true;

        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let mut sound = crate::sound::NullSoundSink;
        fdc.port_out(PORT_COMMAND_STATUS, 0xA0, &clock, &mut scheduler, &mut latches, &mut sound);

        let mut clock = clock;
        for _ in 0..10 {
            if !fdc.is_busy() {
                break;
            }
            clock.advance(Ticks::new(1_000_000));
            let due = scheduler.poll(clock.tick_count());
            for cb in due {
                fdc.on_scheduler_fire(cb, &clock, &mut scheduler, &mut latches, &mut sound);
            }
        }

        assert!(!fdc.is_busy());
        assert!(latches.is_latched(InterruptLine::FdcNmi));
    }

    #[test]
    fn read_sector_of_nonexistent_sector_times_out_after_five_revolutions() {
        // Blank media carries no IDAMs, so ReadSector can never find the
        // requested sector and must give up after five failed index passes.
        let mut fdc = fdc_with_blank_disk();
        fdc.track_register = 5;
        fdc.sector_register = 11;

        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let mut sound = crate::sound::NullSoundSink;
        fdc.port_out(PORT_COMMAND_STATUS, 0x80, &clock, &mut scheduler, &mut latches, &mut sound);

        let mut clock = clock;
        for _ in 0..2000 {
            if !fdc.is_busy() {
                break;
            }
            clock.advance(Ticks::new(1_000_000));
            let due = scheduler.poll(clock.tick_count());
            for cb in due {
                fdc.on_scheduler_fire(cb, &clock, &mut scheduler, &mut latches, &mut sound);
            }
        }

        assert!(fdc.flags.seek_error);
        assert!(latches.is_latched(InterruptLine::FdcNmi));
        assert!(!fdc.is_busy());
    }

    #[test]
    fn plain_force_interrupt_latches_nmi_without_delay_or_looping() {
        // 0xD4 is Type IV "interrupt on index pulse", not 0xD8. It must
        // complete exactly like ForceInterruptImmediate: no delay, no
        // rescheduling, busy/drq clear immediately.
        let mut fdc = fdc_with_blank_disk();
        fdc.flags.busy = true;
        fdc.flags.drq = true;

        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let mut sound = crate::sound::NullSoundSink;
        fdc.port_out(PORT_COMMAND_STATUS, 0xD4, &clock, &mut scheduler, &mut latches, &mut sound);

        assert!(!fdc.is_busy());
        assert!(!fdc.flags.drq);
        assert!(latches.is_latched(InterruptLine::FdcNmi));
        assert!(!fdc.is_polling());
        assert!(scheduler.poll(clock.tick_count() + Ticks::new(10_000_000_000)).is_empty());
    }

    /// Advance `clock` by exactly the delay the FDC itself would have used to
    /// schedule whatever pulse is currently pending, so the simulated head
    /// lands precisely on the next byte boundary instead of drifting past it
    /// over the course of a long scan.
    fn advance_to_pending_pulse(fdc: &Fdc, clock: &mut Clock) {
        if fdc.is_polling() {
            let track_len = fdc.track_len();
            let current = fdc.track_data_index(clock);
            let target = timing::poll_target(current, 1, track_len, fdc.flags.double_density);
            clock.advance(timing::ticks_until_target(current, target, track_len, &fdc.config));
        } else {
            clock.advance(fdc.config.nmi_delay);
        }
    }

    /// Run `fdc` to completion of its current command, feeding `on_byte`
    /// whenever a data byte can be transferred through the data register.
    fn run_command_to_completion(
        fdc: &mut Fdc,
        clock: &mut Clock,
        scheduler: &mut PulseScheduler<FdcCallback>,
        latches: &mut InterruptLatches,
        mut on_byte: impl FnMut(&mut Fdc, &Clock, &mut PulseScheduler<FdcCallback>, &mut InterruptLatches, &mut dyn SoundSink),
    ) {
        let mut sound = crate::sound::NullSoundSink;
        for _ in 0..10_000 {
            if !fdc.is_busy() {
                return;
            }
            let due = scheduler.poll(clock.tick_count());
            if due.is_empty() {
                advance_to_pending_pulse(fdc, clock);
                continue;
            }
            for cb in due {
                fdc.on_scheduler_fire(cb, clock, scheduler, latches, &mut sound);
            }
            on_byte(fdc, clock, scheduler, latches, &mut sound);
        }
        panic!("command did not complete within the iteration budget");
    }

    #[test]
    fn write_sector_then_read_sector_round_trips_data_and_crc() {
        let mut fdc = fdc_with_blank_disk();

        // Lay down a minimal address field directly on the track. The very
        // first `SeekingIdam` check lands two logical bytes past wherever the
        // command was issued (single-density polling steps the head two
        // logical positions at a time), so the IDAM sits at index 2 and its
        // six address-field content bytes follow two positions apart each,
        // at indices 4, 6, 8, 10, 12, 14. The address-field CRC itself isn't
        // checked by WriteSector/ReadSector's sector-matching logic, so it's
        // left zeroed.
        {
            let track = fdc.drives_mut()[0]
                .floppy_mut()
                .expect("drive has media")
                .track_mut(0, 0)
                .expect("track present");
            track.set_idam(2, false, true);
            track.write_byte(4, false, 0); // track
            track.write_byte(6, false, 0); // side
            track.write_byte(8, false, 1); // sector
            track.write_byte(10, false, 0); // length code -> 128 bytes
            track.write_byte(12, false, 0);
            track.write_byte(14, false, 0);
        }

        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let payload: Vec<u8> = (0u8..128).collect();

        fdc.track_register = 0;
        fdc.sector_register = 1;
        let mut clock = Clock::new();
        {
            let mut sound = crate::sound::NullSoundSink;
            fdc.port_out(PORT_COMMAND_STATUS, 0xA0, &clock, &mut scheduler, &mut latches, &mut sound);
        }

        let mut write_cursor = 0usize;
        run_command_to_completion(&mut fdc, &mut clock, &mut scheduler, &mut latches, |fdc, clock, scheduler, latches, sound| {
            if fdc.op_status() == OpStatus::WritingData && fdc.flags.drq && write_cursor < payload.len() {
                fdc.port_out(PORT_DATA, payload[write_cursor], clock, scheduler, latches, sound);
                write_cursor += 1;
            }
        });

        assert!(!fdc.is_busy(), "WriteSector never completed");
        assert!(!fdc.flags.crc_error);
        assert_eq!(write_cursor, payload.len());

        fdc.track_register = 0;
        fdc.sector_register = 1;
        {
            let mut sound = crate::sound::NullSoundSink;
            fdc.port_out(PORT_COMMAND_STATUS, 0x80, &clock, &mut scheduler, &mut latches, &mut sound);
        }

        let mut read_back = Vec::new();
        run_command_to_completion(&mut fdc, &mut clock, &mut scheduler, &mut latches, |fdc, clock, _scheduler, _latches, _sound| {
            if fdc.op_status() == OpStatus::ReadingData && fdc.flags.drq {
                read_back.push(fdc.port_in(PORT_DATA, clock).expect("data port always readable"));
            }
        });

        assert!(!fdc.is_busy(), "ReadSector never completed");
        assert!(!fdc.flags.crc_error);
        assert_eq!(read_back, payload);
    }

    #[test]
    fn force_interrupt_immediate_clears_busy_and_drq_without_delay() {
        let mut fdc = fdc_with_blank_disk();
        fdc.flags.busy = true;
        fdc.flags.drq = true;

        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let mut sound = crate::sound::NullSoundSink;
        fdc.port_out(PORT_COMMAND_STATUS, 0xD8, &clock, &mut scheduler, &mut latches, &mut sound);

        assert!(!fdc.is_busy());
        assert!(latches.is_latched(InterruptLine::FdcNmi));
    }

    #[test]
    fn disabled_fdc_reads_return_0xff() {
        let mut fdc = fdc_with_blank_disk();
        fdc.set_enabled(false);
        let clock = Clock::new();
        assert_eq!(fdc.port_in(PORT_COMMAND_STATUS, &clock), Some(0xFF));
        assert_eq!(fdc.port_in(PORT_TRACK, &clock), Some(0xFF));
        assert_eq!(fdc.port_in(PORT_SECTOR, &clock), Some(0xFF));
        assert_eq!(fdc.port_in(PORT_DATA, &clock), Some(0xFF));
    }

    #[test]
    fn interrupt_enable_port_range_is_stored_verbatim() {
        let mut fdc = fdc_with_blank_disk();
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        let mut latches = InterruptLatches::new();
        let mut sound = crate::sound::NullSoundSink;
        fdc.port_out(0xE6, 0x5A, &clock, &mut scheduler, &mut latches, &mut sound);
        assert_eq!(fdc.interrupt_enable(), 0x5A);
    }

    #[test]
    fn write_track_transform_rules_for_double_density() {
        assert_eq!(transform_write_track_byte(0xF5, true), (0xA1, false, false));
        assert_eq!(transform_write_track_byte(0xF6, true), (0xC2, false, false));
        let (_, _, emit) = transform_write_track_byte(0xF7, true);
        assert!(emit);
    }

    #[test]
    fn write_track_transform_rules_for_single_density() {
        let (byte, reset, _) = transform_write_track_byte(0xFE, false);
        assert_eq!(byte, 0xFE);
        assert!(reset);
    }

    #[test]
    fn export_then_import_restores_observable_state() {
        let mut fdc = fdc_with_blank_disk();
        fdc.track_register = 12;
        fdc.sector_register = 3;
        fdc.flags.busy = true;
        fdc.drives_mut()[0].set_write_protected(true);
        for _ in 0..5 {
            fdc.drives_mut()[0].step_up();
        }

        let state = fdc.export_state();

        let mut other = Fdc::new(&config());
        let image = InMemoryFloppy::blank(80, 1, trs80_floppy::DD_TRACK_LEN).expect("valid");
        other.drives_mut()[0].insert(Box::new(image));
        let clock = Clock::new();
        let mut scheduler = PulseScheduler::new();
        other.import_state(state, &clock, &mut scheduler);

        assert_eq!(other.track_register(), 12);
        assert_eq!(other.sector_register(), 3);
        assert!(other.is_busy());
        assert!(other.drives()[0].write_protected());
        assert_eq!(other.drives()[0].physical_track(), 5);
    }
}
