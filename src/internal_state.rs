use std::fmt;

use serde::Serialize;

use crate::clock::InterruptState;
use crate::commands::Command;
use crate::disk_drive::DriveKind;
use crate::fdc::{Upd765, MAX_DRIVES};
use crate::phase::FdcPhase;

/// Point-in-time view of the controller and its drives for debuggers and
/// front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InternalState {
    pub phase: FdcPhase,
    pub main_status: u8,
    pub st0: u8,
    pub st1: u8,
    pub st2: u8,
    pub st3: u8,
    pub command: Option<Command>,
    pub selected_unit: u8,
    pub selected_head: u8,
    pub interrupt: InterruptState,
    pub interrupt_asserted: bool,
    pub execution_remaining: usize,
    pub result_remaining: usize,
    pub drives: Vec<DriveState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriveState {
    pub unit: usize,
    pub kind: DriveKind,
    pub cylinder: u8,
    pub motor_on: bool,
    pub has_media: bool,
    pub ready: bool,
    pub read_only: bool,
}

impl InternalState {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for InternalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let command = self
            .command
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        write!(
            f,
            "{:<9} MSR: #{:02X} ST0: #{:02X} ST1: #{:02X} ST2: #{:02X} ST3: #{:02X} - {} U{} H{} - INT: {:?}{}",
            self.phase.to_string(),
            self.main_status,
            self.st0,
            self.st1,
            self.st2,
            self.st3,
            command,
            self.selected_unit,
            self.selected_head,
            self.interrupt,
            if self.interrupt_asserted { " (raised)" } else { "" }
        )
    }
}

pub trait ReportState {
    fn report_state(&mut self) -> anyhow::Result<InternalState>;
}

impl ReportState for Upd765 {
    fn report_state(&mut self) -> anyhow::Result<InternalState> {
        let state = self.state();
        let drives = (0..MAX_DRIVES)
            .filter_map(|unit| {
                self.drive(unit).map(|drive| DriveState {
                    unit,
                    kind: drive.kind(),
                    cylinder: drive.cylinder(),
                    motor_on: drive.is_motor_on(),
                    has_media: drive.has_media(),
                    ready: drive.is_ready() && drive.is_motor_on(),
                    read_only: drive.is_read_only(),
                })
            })
            .collect();

        Ok(InternalState {
            phase: state.phase,
            main_status: state.main_status,
            st0: state.st0,
            st1: state.st1,
            st2: state.st2,
            st3: state.st3,
            command: state.opcode.map(Command::from_opcode),
            selected_unit: state.selected_unit,
            selected_head: state.selected_head,
            interrupt: state.interrupt.state(),
            interrupt_asserted: state.interrupt.is_asserted(),
            execution_remaining: state.execution.remaining(),
            result_remaining: state.result.remaining(),
            drives,
        })
    }
}
