// NEC µPD765A floppy disk controller
//
// Register surface: main status register (read-only) and the data register.
// Every command runs Idle → Command → {Result | Execution → Result} → Idle;
// RECALIBRATE and SEEK go straight back to Idle and report through a
// deferred SeekEnd interrupt collected with SENSE INTERRUPT STATUS.

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::clock::{Delay, InterruptClock, InterruptState, LONG_DELAY_TICKS, SHORT_DELAY_TICKS};
use crate::commands::{Command, Direction, OPT_MFM, OPT_MULTI_TRACK, OPT_SKIP};
use crate::disk_drive::{Drive, DriveKind};
use crate::disk_error::{status_bits_for, ControllerError, DriveError};
use crate::media::{DataMark, MediaBackend, SectorId, SectorRequest};
use crate::phase::{
    FdcPhase, PhaseBuffer, COMMAND_BUFFER_SIZE, EXECUTION_BUFFER_SIZE, RESULT_BUFFER_SIZE,
};
use crate::status::{
    sector_size, unit_head_bits, MSR_COMMAND_BUSY, MSR_DATA_TO_HOST, MSR_EXECUTION, MSR_IDLE,
    MSR_REQUEST_FOR_MASTER, ST0_HEAD, ST0_INVALID, ST0_READY_CHANGED, ST0_SEEK_END,
    ST2_CONTROL_MARK, ST2_SCAN_HIT, ST2_SCAN_MASK, ST2_SCAN_NOT_SATISFIED, ST3_READY,
    ST3_WRITE_PROTECTED,
};
use crate::utils::hexdump;

pub const MAX_DRIVES: usize = 4;

/// Timing parameters programmed by SPECIFY. The emulation keeps them for
/// inspection only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecifyParams {
    pub step_rate: u8,
    pub head_unload: u8,
    pub head_load: u8,
    pub non_dma: bool,
}

impl SpecifyParams {
    pub fn from_bytes(srt_hut: u8, hlt_nd: u8) -> Self {
        Self {
            step_rate: srt_hut >> 4,
            head_unload: srt_hut & 0x0F,
            head_load: hlt_nd >> 1,
            non_dma: hlt_nd & 0x01 != 0,
        }
    }
}

/// Sector walk of the command in progress.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// C/H/R/N of the sector being transferred.
    pub id: SectorId,
    /// Physical head.
    pub head: u8,
    /// Last sector number (EOT), or sector count for FORMAT TRACK.
    pub eot: u8,
    /// Bytes per sector in the execution phase.
    pub size: usize,
    pub multi_track: bool,
    pub mfm: bool,
    pub skip: bool,
    /// Sector number increment (STP of the SCAN commands, 1 otherwise).
    #[serde(default)]
    pub step: u8,
    /// Stop after the current sector (control mark met without SK).
    pub last_sector: bool,
    pub filler: u8,
    /// Where the walk stood when the previous sector completed, until the
    /// first byte of the next one moves.
    #[serde(default)]
    pub completed: Option<SectorCheckpoint>,
}

/// Sector address and status of a completed sector.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorCheckpoint {
    pub id: SectorId,
    pub head: u8,
    pub st0: u8,
    pub st1: u8,
    pub st2: u8,
}

/// Serializable register state of the controller (drives excluded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdcState {
    pub phase: FdcPhase,
    pub main_status: u8,
    pub st0: u8,
    pub st1: u8,
    pub st2: u8,
    pub st3: u8,
    pub selected_unit: u8,
    pub selected_head: u8,
    pub specify: SpecifyParams,
    pub interrupt: InterruptClock,
    pub opcode: Option<u8>,
    pub write_deleted: bool,
    pub rotating_sector_index: usize,
    /// ST0 and unit reported by the next SENSE INTERRUPT STATUS.
    pub sense_status: u8,
    pub sense_unit: u8,
    /// Unit whose ready line changed while a command was running.
    #[serde(default)]
    pub pending_ready_change: Option<u8>,
    pub transfer: Transfer,
    pub command: PhaseBuffer<COMMAND_BUFFER_SIZE>,
    pub execution: PhaseBuffer<EXECUTION_BUFFER_SIZE>,
    pub result: PhaseBuffer<RESULT_BUFFER_SIZE>,
}

impl FdcState {
    pub fn new(interrupt: InterruptClock) -> Self {
        Self {
            phase: FdcPhase::Idle,
            main_status: MSR_IDLE,
            st0: 0,
            st1: 0,
            st2: 0,
            st3: 0,
            selected_unit: 0,
            selected_head: 0,
            specify: SpecifyParams::default(),
            interrupt,
            opcode: None,
            write_deleted: false,
            rotating_sector_index: 0,
            sense_status: 0,
            sense_unit: 0,
            pending_ready_change: None,
            transfer: Transfer::default(),
            command: PhaseBuffer::new(),
            execution: PhaseBuffer::new(),
            result: PhaseBuffer::new(),
        }
    }

    fn validate(&self) -> Result<(), ControllerError> {
        let pending = self.pending_ready_change.unwrap_or(0);
        if [self.selected_unit, self.sense_unit, pending]
            .iter()
            .any(|&unit| unit as usize >= MAX_DRIVES)
        {
            return Err(ControllerError::InvalidSnapshot("drive unit out of range"));
        }
        if self.selected_head > 1 || self.transfer.head > 1 {
            return Err(ControllerError::InvalidSnapshot("head out of range"));
        }
        if !self.command.is_consistent()
            || !self.execution.is_consistent()
            || !self.result.is_consistent()
        {
            return Err(ControllerError::InvalidSnapshot("phase buffer out of bounds"));
        }
        Ok(())
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Upd765 {
    state: FdcState,
    drives: [Option<Drive>; MAX_DRIVES],
    #[derivative(Debug = "ignore")]
    interrupt_handler: Option<Box<dyn FnMut(bool)>>,
}

impl Upd765 {
    pub fn new() -> Self {
        Self::with_delays(SHORT_DELAY_TICKS, LONG_DELAY_TICKS)
    }

    pub fn with_delays(short_delay: u32, long_delay: u32) -> Self {
        Self {
            state: FdcState::new(InterruptClock::new(short_delay, long_delay)),
            drives: Default::default(),
            interrupt_handler: None,
        }
    }

    /// Registers the interrupt line callback, invoked with `true` when the
    /// line is raised and `false` when it drops.
    pub fn set_interrupt_handler<F>(&mut self, handler: F)
    where
        F: FnMut(bool) + 'static,
    {
        self.interrupt_handler = Some(Box::new(handler));
    }

    pub fn reset(&mut self) {
        tracing::info!("[FDC] Reset");
        let clock = &self.state.interrupt;
        let interrupt = InterruptClock::new(clock.short_delay(), clock.long_delay());
        let was_asserted = self.state.interrupt.is_asserted();

        self.state = FdcState::new(interrupt);
        for drive in self.drives.iter_mut().flatten() {
            drive.set_motor(false);
        }

        if was_asserted {
            self.signal(false);
        }
    }

    // -----------------------------------------------------------------------
    // Register surface
    // -----------------------------------------------------------------------

    pub fn read_status(&self) -> u8 {
        self.state.main_status
    }

    pub fn read_data(&mut self) -> u8 {
        self.acknowledge_data_interrupt();

        let value = match self.state.phase {
            FdcPhase::Execution if self.direction() == Some(Direction::ToHost) => {
                self.execution_read()
            }
            FdcPhase::Result => self.result_read(),
            phase => {
                tracing::warn!("[FDC] Data register read during {} phase", phase);
                0xFF
            }
        };
        tracing::trace!("[FDC] [RD] [Data] = {:02X}", value);

        self.arm_data_interrupt();
        value
    }

    pub fn write_data(&mut self, value: u8) {
        tracing::trace!("[FDC] [WR] [Data] = {:02X}", value);
        self.acknowledge_data_interrupt();

        match self.state.phase {
            FdcPhase::Idle => self.begin_command(value),
            FdcPhase::Command => {
                self.state.command.push(value);
                if self.state.command.is_done() {
                    self.dispatch();
                }
            }
            FdcPhase::Execution if self.direction() == Some(Direction::FromHost) => {
                self.execution_write(value)
            }
            phase => tracing::warn!(
                "[FDC] Data register write {:02X} ignored during {} phase",
                value,
                phase
            ),
        }

        self.arm_data_interrupt();
    }

    /// Motor control, one bit per unit.
    pub fn set_motor(&mut self, mask: u8) {
        let mut changed = None;
        let mut abort = false;

        for (unit, slot) in self.drives.iter_mut().enumerate() {
            let Some(drive) = slot else { continue };
            let on = mask & (1 << unit) != 0;
            if drive.is_motor_on() == on {
                continue;
            }

            drive.set_motor(on);
            if drive.is_ready() {
                changed = Some(unit);
            }
            if !on
                && self.state.phase == FdcPhase::Execution
                && unit == self.state.selected_unit as usize
            {
                abort = true;
            }
        }

        if abort {
            self.abort_command();
        }

        if let Some(unit) = changed {
            if self.state.phase == FdcPhase::Idle {
                self.arm_ready_change(unit as u8);
            } else {
                tracing::debug!("[FDC] Ready change on unit {} deferred to idle", unit);
                self.state.pending_ready_change = Some(unit as u8);
            }
        }
    }

    /// Terminal count: ends the execution phase at the current byte.
    pub fn terminal_count(&mut self) {
        if self.state.phase != FdcPhase::Execution {
            return;
        }

        tracing::debug!(
            "[FDC] Terminal count after {} bytes",
            self.state.execution.position()
        );
        if self.state.execution.position() == 0 && self.rewind_to_completed() {
            self.finish_transfer();
            self.arm_data_interrupt();
            return;
        }

        match self.current_command() {
            Command::FormatTrack => self.commit_format(),
            Command::WriteData | Command::WriteDeletedData if self.state.execution.position() > 0 => {
                self.commit_partial_write()
            }
            _ => self.finish_transfer(),
        }
        self.arm_data_interrupt();
    }

    pub fn tick(&mut self) {
        if let Some(state) = self.state.interrupt.tick() {
            tracing::trace!("[FDC] Interrupt asserted ({:?})", state);
            self.signal(true);
        }
    }

    // -----------------------------------------------------------------------
    // Drives and media
    // -----------------------------------------------------------------------

    pub fn attach_drive(&mut self, unit: usize, drive: Drive) -> Result<Option<Drive>, ControllerError> {
        self.check_unit_idle(unit)?;
        tracing::info!("[FDC] Drive {:?} attached as unit {}", drive.kind(), unit);
        Ok(self.drives[unit].replace(drive))
    }

    pub fn detach_drive(&mut self, unit: usize) -> Result<Option<Drive>, ControllerError> {
        self.check_unit_idle(unit)?;
        Ok(self.drives[unit].take())
    }

    pub fn drive(&self, unit: usize) -> Option<&Drive> {
        self.drives.get(unit).and_then(Option::as_ref)
    }

    pub fn drive_mut(&mut self, unit: usize) -> Option<&mut Drive> {
        self.drives.get_mut(unit).and_then(Option::as_mut)
    }

    pub fn insert_media(
        &mut self,
        unit: usize,
        media: Box<dyn MediaBackend>,
    ) -> Result<(), ControllerError> {
        self.check_unit_idle(unit)?;
        let drive = self.drives[unit]
            .as_mut()
            .ok_or(ControllerError::EmptySlot(unit))?;
        drive.insert(media);
        Ok(())
    }

    pub fn eject_media(
        &mut self,
        unit: usize,
    ) -> Result<Option<Box<dyn MediaBackend>>, ControllerError> {
        self.check_unit_idle(unit)?;
        let drive = self.drives[unit]
            .as_mut()
            .ok_or(ControllerError::EmptySlot(unit))?;
        Ok(drive.eject())
    }

    fn check_unit_idle(&self, unit: usize) -> Result<(), ControllerError> {
        if unit >= MAX_DRIVES {
            return Err(ControllerError::InvalidUnit(unit));
        }
        if self.state.phase != FdcPhase::Idle && self.state.selected_unit as usize == unit {
            return Err(ControllerError::UnitBusy(unit));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> FdcPhase {
        self.state.phase
    }

    pub fn status_registers(&self) -> [u8; 4] {
        [self.state.st0, self.state.st1, self.state.st2, self.state.st3]
    }

    pub fn specify_params(&self) -> SpecifyParams {
        self.state.specify
    }

    pub fn selected_unit(&self) -> u8 {
        self.state.selected_unit
    }

    pub fn selected_head(&self) -> u8 {
        self.state.selected_head
    }

    pub fn interrupt_state(&self) -> InterruptState {
        self.state.interrupt.state()
    }

    pub fn is_interrupt_asserted(&self) -> bool {
        self.state.interrupt.is_asserted()
    }

    pub fn result_remaining(&self) -> usize {
        self.state.result.remaining()
    }

    pub fn execution_remaining(&self) -> usize {
        self.state.execution.remaining()
    }

    pub fn state(&self) -> &FdcState {
        &self.state
    }

    pub fn snapshot(&self) -> FdcState {
        self.state.clone()
    }

    /// Replaces the controller registers with `state`. Snapshots that would
    /// index past the drive slots or the phase buffers are rejected and the
    /// current state is kept.
    pub fn restore(&mut self, state: FdcState) -> Result<(), ControllerError> {
        state.validate()?;

        let was_asserted = self.state.interrupt.is_asserted();
        let now_asserted = state.interrupt.is_asserted();
        self.state = state;
        tracing::debug!("[FDC] State restored ({} phase)", self.state.phase);

        if was_asserted != now_asserted {
            self.signal(now_asserted);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phase handling
    // -----------------------------------------------------------------------

    fn current_command(&self) -> Command {
        self.state
            .opcode
            .map_or(Command::Invalid, Command::from_opcode)
    }

    fn direction(&self) -> Option<Direction> {
        self.current_command().direction()
    }

    fn set_phase(&mut self, phase: FdcPhase) {
        self.state.phase = phase;
        self.state.main_status = match phase {
            FdcPhase::Idle => MSR_IDLE,
            FdcPhase::Command => MSR_REQUEST_FOR_MASTER | MSR_COMMAND_BUSY,
            FdcPhase::Execution => {
                let mut msr = MSR_REQUEST_FOR_MASTER
                    | MSR_EXECUTION
                    | MSR_COMMAND_BUSY
                    | (1 << self.state.selected_unit);
                if self.direction() == Some(Direction::ToHost) {
                    msr |= MSR_DATA_TO_HOST;
                }
                msr
            }
            FdcPhase::Result => MSR_REQUEST_FOR_MASTER | MSR_DATA_TO_HOST | MSR_COMMAND_BUSY,
        };

        if phase == FdcPhase::Idle {
            self.state.opcode = None;
            self.state.write_deleted = false;
            if let Some(unit) = self.state.pending_ready_change.take() {
                self.arm_ready_change(unit);
            }
        }
    }

    fn begin_command(&mut self, opcode: u8) {
        let command = Command::from_opcode(opcode);
        self.state.opcode = Some(opcode);
        self.state.command.begin(command.length());
        self.state.command.push(opcode);

        if self.state.command.is_done() {
            self.dispatch();
        } else {
            self.set_phase(FdcPhase::Command);
        }
    }

    fn result_read(&mut self) -> u8 {
        let value = self.state.result.pop().unwrap_or(0xFF);
        if self.state.result.is_done() {
            self.set_phase(FdcPhase::Idle);
        }
        value
    }

    fn execution_read(&mut self) -> u8 {
        let Some(value) = self.state.execution.pop() else {
            return 0xFF;
        };

        if self.state.execution.is_done() {
            if self.current_command() == Command::ReadTrack {
                self.finish_transfer();
            } else if self.next_sector() && self.load_sector() {
                self.enter_execution();
            } else {
                self.finish_transfer();
            }
        }
        value
    }

    fn execution_write(&mut self, value: u8) {
        let command = self.current_command();
        if command.is_scan() {
            let disk = self.state.execution.pop().unwrap_or(0xFF);
            self.scan_compare(command, disk, value);
        } else {
            self.state.execution.push(value);
        }

        if !self.state.execution.is_done() {
            return;
        }

        match command {
            Command::FormatTrack => self.commit_format(),
            command if command.is_scan() => self.scan_sector_done(),
            _ => self.commit_write(),
        }
    }

    fn enter_execution(&mut self) {
        if self.state.execution.is_done() {
            self.finish_transfer();
        } else {
            self.set_phase(FdcPhase::Execution);
        }
    }

    fn finish_result(&mut self, bytes: &[u8]) {
        self.state.execution.clear();
        self.state.result.load(bytes);

        if bytes.is_empty() {
            self.set_phase(FdcPhase::Idle);
        } else {
            tracing::debug!("[FDC] Result {:02X?}", bytes);
            self.set_phase(FdcPhase::Result);
        }
    }

    /// Seven byte result of sector commands: ST0-ST2 then C, H, R, N.
    fn finish_transfer(&mut self) {
        let id = self.state.transfer.id;
        self.state.write_deleted = false;
        self.finish_result(&[
            self.state.st0,
            self.state.st1,
            self.state.st2,
            id.cylinder,
            id.head,
            id.sector,
            id.size_code,
        ]);
    }

    fn abort_command(&mut self) {
        tracing::warn!(
            "[FDC] Motor stopped on unit {} during execution, aborting {}",
            self.state.selected_unit,
            self.current_command()
        );
        self.state.st0 |= ST0_READY_CHANGED;
        self.state.execution.clear();
        self.finish_transfer();
        self.arm_data_interrupt();
    }

    // -----------------------------------------------------------------------
    // Interrupts
    // -----------------------------------------------------------------------

    fn signal(&mut self, asserted: bool) {
        if let Some(handler) = self.interrupt_handler.as_mut() {
            handler(asserted);
        }
    }

    fn arm(&mut self, state: InterruptState, delay: Delay) {
        if self.state.interrupt.schedule(state, delay) {
            self.signal(false);
        }
    }

    /// Data register traffic services byte/result interrupts, never the
    /// ones that need SENSE INTERRUPT STATUS.
    fn acknowledge_data_interrupt(&mut self) {
        let pending = self.state.interrupt.state();
        if matches!(
            pending,
            InterruptState::ResultReady | InterruptState::ExecByteReady
        ) && self.state.interrupt.acknowledge()
        {
            self.signal(false);
        }
    }

    /// A pending SeekEnd or ReadyChange keeps its own sense status.
    fn arm_ready_change(&mut self, unit: u8) {
        if self.state.interrupt.state().needs_sense() {
            return;
        }
        self.state.sense_status = ST0_READY_CHANGED | unit;
        self.state.sense_unit = unit;
        self.arm(InterruptState::ReadyChange, Delay::Long);
    }

    fn arm_data_interrupt(&mut self) {
        let state = match self.state.phase {
            FdcPhase::Execution => InterruptState::ExecByteReady,
            FdcPhase::Result => InterruptState::ResultReady,
            _ => return,
        };
        if self.state.interrupt.state().needs_sense() {
            return;
        }
        self.arm(state, Delay::Short);
    }

    // -----------------------------------------------------------------------
    // Drive access helpers
    // -----------------------------------------------------------------------

    fn select(&mut self, unit_head: u8) {
        self.state.selected_unit = unit_head & 0x03;
        self.state.selected_head = (unit_head >> 2) & 0x01;
    }

    /// Selects the unit and clears ST0-ST2 for a new operation.
    fn begin_status(&mut self, unit_head: u8) {
        self.select(unit_head);
        self.state.st0 = unit_head_bits(self.state.selected_unit, self.state.selected_head);
        self.state.st1 = 0;
        self.state.st2 = 0;
    }

    fn apply_error(&mut self, err: DriveError) {
        self.apply(&Err::<(), _>(err));
    }

    fn apply<T>(&mut self, result: &Result<T, DriveError>) {
        let bits = status_bits_for(result);
        self.state.st0 |= bits.st0;
        self.state.st1 |= bits.st1;
        self.state.st2 |= bits.st2;
        if let Err(err) = result {
            tracing::debug!(
                "[FDC] Unit {}: {} (ST0={:02X} ST1={:02X} ST2={:02X})",
                self.state.selected_unit,
                err,
                self.state.st0,
                self.state.st1,
                self.state.st2
            );
        }
    }

    fn active_drive(&mut self) -> Result<&mut Drive, DriveError> {
        self.drives[self.state.selected_unit as usize]
            .as_mut()
            .ok_or(DriveError::NotReady)
    }

    fn unit_ready(&self, unit: usize) -> bool {
        self.drives[unit]
            .as_ref()
            .is_some_and(|d| d.is_ready() && d.is_motor_on())
    }

    fn unit_read_only(&self, unit: usize) -> bool {
        self.drives[unit].as_ref().is_some_and(Drive::is_read_only)
    }

    /// ST3 bits reported by the drive, with motor-off forcing applied.
    fn drive_status(&self, unit: usize) -> u8 {
        let Some(drive) = &self.drives[unit] else {
            return 0;
        };

        let mut status = drive.drive_status();
        if drive.kind() != DriveKind::None && !drive.is_motor_on() {
            status &= !ST3_READY;
            // 5.25" drives do not report write protect while not ready
            if drive.kind() != DriveKind::FiveAndQuarterInch {
                status |= ST3_WRITE_PROTECTED;
            }
        }
        status
    }

    fn sector_request(&self, deleted: bool) -> SectorRequest {
        let transfer = &self.state.transfer;
        SectorRequest {
            cylinder: 0,
            head: transfer.head,
            id_cylinder: transfer.id.cylinder,
            id_head: transfer.id.head,
            sector: transfer.id.sector,
            deleted,
            skip_deleted: transfer.skip,
            mfm: transfer.mfm,
            multi_track: transfer.multi_track,
        }
    }

    /// Records the sector just completed, then advances the walk.
    fn next_sector(&mut self) -> bool {
        let transfer = &self.state.transfer;
        let checkpoint = SectorCheckpoint {
            id: transfer.id,
            head: transfer.head,
            st0: self.state.st0,
            st1: self.state.st1,
            st2: self.state.st2,
        };
        self.state.transfer.completed = Some(checkpoint);
        self.advance_sector()
    }

    /// Puts the walk back on the last completed sector when nothing of the
    /// following one has been transferred yet.
    fn rewind_to_completed(&mut self) -> bool {
        let Some(checkpoint) = self.state.transfer.completed.take() else {
            return false;
        };

        tracing::debug!("[FDC] Stopped on sector boundary after {:02X}", checkpoint.id.sector);
        self.state.transfer.id = checkpoint.id;
        self.state.transfer.head = checkpoint.head;
        self.state.selected_head = checkpoint.head;
        self.state.st0 = checkpoint.st0;
        self.state.st1 = checkpoint.st1;
        self.state.st2 = checkpoint.st2;
        true
    }

    /// Moves to the next sector of a multi-sector transfer. Returns `false`
    /// when the transfer is over.
    fn advance_sector(&mut self) -> bool {
        let transfer = &mut self.state.transfer;
        if transfer.last_sector {
            return false;
        }

        let next = transfer.id.sector.saturating_add(transfer.step.max(1));
        if transfer.id.sector >= transfer.eot || next > transfer.eot {
            if transfer.multi_track && transfer.head == 0 {
                transfer.head = 1;
                transfer.id.head = 1;
                transfer.id.sector = 1;
                self.state.selected_head = 1;
                self.state.st0 |= ST0_HEAD;
                return true;
            }
            return false;
        }

        transfer.id.sector = next;
        true
    }

    /// Reads the current sector into the execution buffer for READ or SCAN.
    /// Returns `false` when there is nothing (more) to transfer.
    fn load_sector(&mut self) -> bool {
        let command = self.current_command();
        let wants_deleted = command.wants_deleted();

        loop {
            let request = self.sector_request(wants_deleted);
            let size = self.state.transfer.size.min(EXECUTION_BUFFER_SIZE);
            let result = match self.drives[self.state.selected_unit as usize].as_mut() {
                Some(drive) => {
                    drive.read_sector(&request, &mut self.state.execution.storage_mut()[..size])
                }
                None => Err(DriveError::NotReady),
            };

            let mark = match result {
                Ok(mark) => mark,
                Err(err) => {
                    self.apply_error(err);
                    return false;
                }
            };

            if (mark == DataMark::Deleted) != wants_deleted {
                self.state.st2 |= ST2_CONTROL_MARK;
                if self.state.transfer.skip {
                    tracing::debug!("[FDC] Skipping sector {:02X}", request.sector);
                    if !self.advance_sector() {
                        return false;
                    }
                    continue;
                }
                self.state.transfer.last_sector = true;
            }

            self.state.execution.begin(size);
            return true;
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn dispatch(&mut self) {
        let cmd = self.state.command.contents().to_vec();
        let command = Command::from_opcode(cmd[0]);
        tracing::debug!("[FDC] {} {:02X?}", command, cmd);

        if command != Command::ReadId {
            self.state.rotating_sector_index = 0;
        }

        match command {
            Command::Specify => self.specify(&cmd),
            Command::SenseDriveStatus => self.sense_drive_status(&cmd),
            Command::Recalibrate => self.seek(&cmd, 0),
            Command::Seek => self.seek(&cmd, cmd[2]),
            Command::SenseInterruptStatus => self.sense_interrupt_status(),
            Command::ReadId => self.read_id(&cmd),
            Command::ReadTrack => self.read_track(&cmd),
            Command::FormatTrack => self.format_track(&cmd),
            Command::ReadData
            | Command::ReadDeletedData
            | Command::WriteData
            | Command::WriteDeletedData
            | Command::ScanEqual
            | Command::ScanLowOrEqual
            | Command::ScanHighOrEqual => self.data_command(command, &cmd),
            Command::Invalid => {
                self.state.st0 = ST0_INVALID;
                self.finish_result(&[ST0_INVALID]);
            }
        }
    }

    fn specify(&mut self, cmd: &[u8]) {
        self.state.specify = SpecifyParams::from_bytes(cmd[1], cmd[2]);
        tracing::debug!("[FDC] {:?}", self.state.specify);
        self.finish_result(&[]);
    }

    fn sense_drive_status(&mut self, cmd: &[u8]) {
        self.select(cmd[1]);
        let unit = self.state.selected_unit;
        self.state.st3 = self.drive_status(unit as usize) | unit_head_bits(unit, self.state.selected_head);
        self.finish_result(&[self.state.st3]);
    }

    fn seek(&mut self, cmd: &[u8], cylinder: u8) {
        self.begin_status(cmd[1]);
        let result = self
            .active_drive()
            .and_then(|drive| drive.seek_cylinder(cylinder));

        self.state.st0 |= ST0_SEEK_END;
        self.apply(&result);

        // Going idle may arm a deferred ready change, which SeekEnd replaces
        self.finish_result(&[]);
        self.state.sense_status = self.state.st0;
        self.state.sense_unit = self.state.selected_unit;
        self.arm(InterruptState::SeekEnd, Delay::Short);
    }

    fn sense_interrupt_status(&mut self) {
        if !self.state.interrupt.state().needs_sense() {
            self.state.st0 = ST0_INVALID;
            self.finish_result(&[ST0_INVALID]);
            return;
        }

        // An empty slot has no head position to report
        let cylinder = self
            .drive(self.state.sense_unit as usize)
            .map_or(0, Drive::cylinder);
        self.state.st0 = self.state.sense_status;
        if self.state.interrupt.acknowledge() {
            self.signal(false);
        }
        self.finish_result(&[self.state.st0, cylinder]);
    }

    fn read_id(&mut self, cmd: &[u8]) {
        self.begin_status(cmd[1]);
        let unit = self.state.selected_unit as usize;
        let head = self.state.selected_head;
        let sequence = self.state.rotating_sector_index;
        self.state.rotating_sector_index = sequence.wrapping_add(1);

        let result = if self.unit_ready(unit) {
            self.active_drive()
                .and_then(|drive| drive.read_sector_id(head, sequence))
        } else {
            Err(DriveError::NotReady)
        };
        self.apply(&result);

        let cylinder = self.drive(unit).map_or(0, Drive::cylinder);
        self.state.transfer.id = result.unwrap_or(SectorId::new(cylinder, head, 0, 0));
        self.finish_transfer();
    }

    /// Common setup of the nine byte sector commands. The last byte is DTL,
    /// except for the SCAN commands where it is STP.
    fn setup_transfer(&mut self, cmd: &[u8]) {
        self.begin_status(cmd[1]);
        let size_code = cmd[5];
        let (size, step) = if Command::from_opcode(cmd[0]).is_scan() {
            (sector_size(size_code), cmd[8].max(1))
        } else if size_code == 0 {
            (cmd[8] as usize, 1)
        } else {
            (sector_size(size_code), 1)
        };

        self.state.transfer = Transfer {
            id: SectorId::new(cmd[2], cmd[3], cmd[4], size_code),
            head: self.state.selected_head,
            eot: cmd[6],
            size,
            multi_track: cmd[0] & OPT_MULTI_TRACK != 0,
            mfm: cmd[0] & OPT_MFM != 0,
            skip: cmd[0] & OPT_SKIP != 0,
            step,
            last_sector: false,
            filler: 0,
            completed: None,
        };
    }

    fn data_command(&mut self, command: Command, cmd: &[u8]) {
        self.setup_transfer(cmd);
        self.state.write_deleted = command == Command::WriteDeletedData;
        let unit = self.state.selected_unit as usize;

        if !self.unit_ready(unit) {
            self.apply_error(DriveError::NotReady);
            self.finish_transfer();
            return;
        }

        if command.is_scan() {
            self.state.st2 |= ST2_SCAN_HIT;
        } else if command.direction() == Some(Direction::FromHost) {
            if self.unit_read_only(unit) {
                self.apply_error(DriveError::ReadOnly);
                self.finish_transfer();
                return;
            }
            let size = self.state.transfer.size;
            self.state.execution.begin(size);
            self.enter_execution();
            return;
        }

        if self.load_sector() {
            self.enter_execution();
        } else {
            self.finish_transfer();
        }
    }

    fn read_track(&mut self, cmd: &[u8]) {
        self.setup_transfer(cmd);
        let unit = self.state.selected_unit as usize;

        if !self.unit_ready(unit) {
            self.apply_error(DriveError::NotReady);
            self.finish_transfer();
            return;
        }

        let request = self.sector_request(false);
        let result = match self.drives[unit].as_mut() {
            Some(drive) => drive.read_track(&request, self.state.execution.storage_mut()),
            None => Err(DriveError::NotReady),
        };

        match result {
            Ok(len) => {
                tracing::debug!("[FDC] Track read, {} bytes", len);
                self.state.execution.begin(len);
                self.enter_execution();
            }
            Err(err) => {
                self.apply_error(err);
                self.finish_transfer();
            }
        }
    }

    fn format_track(&mut self, cmd: &[u8]) {
        self.begin_status(cmd[1]);
        let unit = self.state.selected_unit as usize;
        let head = self.state.selected_head;
        let cylinder = self.drive(unit).map_or(0, Drive::cylinder);
        let sectors = cmd[3];

        self.state.transfer = Transfer {
            id: SectorId::new(cylinder, head, 0, cmd[2]),
            head,
            eot: sectors,
            size: 4 * sectors as usize,
            filler: cmd[5],
            ..Default::default()
        };

        if !self.unit_ready(unit) {
            self.apply_error(DriveError::NotReady);
            self.finish_transfer();
            return;
        }
        if self.unit_read_only(unit) {
            self.apply_error(DriveError::ReadOnly);
            self.finish_transfer();
            return;
        }

        self.state.execution.begin(self.state.transfer.size);
        if self.state.execution.is_done() {
            self.commit_format();
        } else {
            self.set_phase(FdcPhase::Execution);
        }
    }

    fn commit_format(&mut self) {
        let ids: Vec<SectorId> = self
            .state
            .execution
            .transferred()
            .chunks_exact(4)
            .map(SectorId::from_bytes)
            .collect();
        let head = self.state.transfer.head;
        let filler = self.state.transfer.filler;

        let result = self
            .active_drive()
            .and_then(|drive| drive.format_track(head, &ids, filler));
        self.apply(&result);

        if let Some(last) = ids.last() {
            self.state.transfer.id = SectorId {
                size_code: self.state.transfer.id.size_code,
                ..*last
            };
        }
        self.finish_transfer();
    }

    fn commit_write(&mut self) {
        let request = self.sector_request(self.state.write_deleted);
        let unit = self.state.selected_unit as usize;
        let result = match self.drives[unit].as_mut() {
            Some(drive) => drive.write_sector(&request, self.state.execution.transferred()),
            None => Err(DriveError::NotReady),
        };

        if let Err(err) = result {
            self.apply_error(err);
            self.finish_transfer();
            return;
        }

        let written = self.state.execution.transferred();
        tracing::trace!(
            "[FDC] Wrote sector {:02X}:\n{}",
            request.sector,
            hexdump(&written[..written.len().min(64)])
        );

        if self.next_sector() {
            let size = self.state.transfer.size;
            self.state.execution.begin(size);
            self.enter_execution();
        } else {
            self.finish_transfer();
        }
    }

    /// Commits a sector cut short by terminal count, keeping the rest of
    /// its previous contents.
    fn commit_partial_write(&mut self) {
        let request = self.sector_request(self.state.write_deleted);
        let written = self.state.execution.transferred().to_vec();
        let mut sector = vec![0u8; self.state.execution.contents().len()];

        let result = self.active_drive().and_then(|drive| {
            if drive.read_sector(&request, &mut sector).is_err() {
                tracing::debug!("[FDC] Previous sector contents unavailable, padding with zeros");
            }
            sector[..written.len()].copy_from_slice(&written);
            drive.write_sector(&request, &sector)
        });

        self.apply(&result);
        self.finish_transfer();
    }

    fn scan_compare(&mut self, command: Command, disk: u8, host: u8) {
        if disk == 0xFF || host == 0xFF || disk == host {
            return;
        }

        self.state.st2 &= !ST2_SCAN_HIT;
        let satisfied = match command {
            Command::ScanLowOrEqual => disk < host,
            Command::ScanHighOrEqual => disk > host,
            _ => false,
        };
        if !satisfied {
            self.state.st2 |= ST2_SCAN_NOT_SATISFIED;
        }
    }

    fn scan_sector_done(&mut self) {
        if self.state.st2 & ST2_SCAN_NOT_SATISFIED == 0 {
            self.finish_transfer();
            return;
        }

        if !self.next_sector() {
            self.finish_transfer();
            return;
        }

        self.state.st2 = (self.state.st2 & !ST2_SCAN_MASK) | ST2_SCAN_HIT;
        if self.load_sector() {
            self.enter_execution();
        } else {
            self.finish_transfer();
        }
    }
}

impl Default for Upd765 {
    fn default() -> Self {
        Self::new()
    }
}
