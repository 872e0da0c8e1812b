// µPD765 command decoding
//
// The low five bits of the first command byte select the command; the top
// three carry the MT (multi-track), MF (MFM) and SK (skip deleted) options.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const OPT_MULTI_TRACK: u8 = 0x80;
pub const OPT_MFM: u8 = 0x40;
pub const OPT_SKIP: u8 = 0x20;
pub const COMMAND_MASK: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    ReadTrack,
    Specify,
    SenseDriveStatus,
    WriteData,
    ReadData,
    Recalibrate,
    SenseInterruptStatus,
    WriteDeletedData,
    ReadId,
    ReadDeletedData,
    FormatTrack,
    Seek,
    ScanEqual,
    ScanLowOrEqual,
    ScanHighOrEqual,
    Invalid,
}

/// Which way data bytes flow during the execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    ToHost,
    FromHost,
}

impl Command {
    pub fn from_opcode(opcode: u8) -> Self {
        match opcode & COMMAND_MASK {
            0x02 => Command::ReadTrack,
            0x03 => Command::Specify,
            0x04 => Command::SenseDriveStatus,
            0x05 => Command::WriteData,
            0x06 => Command::ReadData,
            0x07 => Command::Recalibrate,
            0x08 => Command::SenseInterruptStatus,
            0x09 => Command::WriteDeletedData,
            0x0A => Command::ReadId,
            0x0C => Command::ReadDeletedData,
            0x0D => Command::FormatTrack,
            0x0F => Command::Seek,
            0x11 => Command::ScanEqual,
            0x19 => Command::ScanLowOrEqual,
            0x1D => Command::ScanHighOrEqual,
            _ => Command::Invalid,
        }
    }

    /// Total number of command bytes, opcode included.
    pub fn length(&self) -> usize {
        match self {
            Command::SenseInterruptStatus | Command::Invalid => 1,
            Command::SenseDriveStatus | Command::Recalibrate | Command::ReadId => 2,
            Command::Specify | Command::Seek => 3,
            Command::FormatTrack => 6,
            Command::ReadTrack
            | Command::WriteData
            | Command::ReadData
            | Command::WriteDeletedData
            | Command::ReadDeletedData
            | Command::ScanEqual
            | Command::ScanLowOrEqual
            | Command::ScanHighOrEqual => 9,
        }
    }

    /// Direction of the execution phase, `None` for commands without one.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Command::ReadTrack | Command::ReadData | Command::ReadDeletedData => {
                Some(Direction::ToHost)
            }
            Command::WriteData
            | Command::WriteDeletedData
            | Command::FormatTrack
            | Command::ScanEqual
            | Command::ScanLowOrEqual
            | Command::ScanHighOrEqual => Some(Direction::FromHost),
            _ => None,
        }
    }

    pub fn is_scan(&self) -> bool {
        matches!(
            self,
            Command::ScanEqual | Command::ScanLowOrEqual | Command::ScanHighOrEqual
        )
    }

    /// Whether the command addresses deleted-data sectors.
    pub fn wants_deleted(&self) -> bool {
        matches!(self, Command::ReadDeletedData | Command::WriteDeletedData)
    }
}

/// Total command length for a first command byte.
pub fn command_length(opcode: u8) -> usize {
    Command::from_opcode(opcode).length()
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::ReadTrack => "READ TRACK",
            Command::Specify => "SPECIFY",
            Command::SenseDriveStatus => "SENSE DRIVE STATUS",
            Command::WriteData => "WRITE DATA",
            Command::ReadData => "READ DATA",
            Command::Recalibrate => "RECALIBRATE",
            Command::SenseInterruptStatus => "SENSE INTERRUPT STATUS",
            Command::WriteDeletedData => "WRITE DELETED DATA",
            Command::ReadId => "READ ID",
            Command::ReadDeletedData => "READ DELETED DATA",
            Command::FormatTrack => "FORMAT TRACK",
            Command::Seek => "SEEK",
            Command::ScanEqual => "SCAN EQUAL",
            Command::ScanLowOrEqual => "SCAN LOW OR EQUAL",
            Command::ScanHighOrEqual => "SCAN HIGH OR EQUAL",
            Command::Invalid => "INVALID",
        };
        write!(f, "{}", name)
    }
}
