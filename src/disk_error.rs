// Drive error types and their translation into FDC status bits

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::{
    ST0_ABNORMAL, ST0_NOT_READY, ST1_DATA_ERROR, ST1_END_OF_CYLINDER, ST1_NO_DATA,
    ST1_NOT_WRITABLE, ST2_BAD_CYLINDER, ST2_DATA_ERROR_IN_DATA, ST2_MISSING_DATA_MARK,
};

/// Failure reported by a drive or its media backend.
///
/// This is a closed vocabulary: every backend failure has to be expressed as
/// one of these so the controller can turn it into status register bits.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriveError {
    #[error("seek failed")]
    SeekFailed,
    #[error("no address mark")]
    NoAddressMark,
    #[error("no data")]
    NoData,
    #[error("data error (CRC)")]
    DataError,
    #[error("no matching sector")]
    NoMatchingSector,
    #[error("drive not ready")]
    NotReady,
    #[error("disk is write protected")]
    ReadOnly,
}

/// Bits OR-ed into ST0, ST1 and ST2 for a given drive outcome.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatusBits {
    pub st0: u8,
    pub st1: u8,
    pub st2: u8,
}

impl DriveError {
    pub const ALL: [DriveError; 7] = [
        DriveError::SeekFailed,
        DriveError::NoAddressMark,
        DriveError::NoData,
        DriveError::DataError,
        DriveError::NoMatchingSector,
        DriveError::NotReady,
        DriveError::ReadOnly,
    ];

    pub fn status_bits(&self) -> StatusBits {
        let (st0, st1, st2) = match self {
            DriveError::NotReady => (ST0_ABNORMAL | ST0_NOT_READY, 0, 0),
            DriveError::SeekFailed => (ST0_ABNORMAL, 0, ST2_BAD_CYLINDER),
            DriveError::NoAddressMark => (ST0_ABNORMAL, 0, ST2_MISSING_DATA_MARK),
            DriveError::NoData => (ST0_ABNORMAL, ST1_NO_DATA, 0),
            // A CRC error does not flag abnormal termination on its own
            DriveError::DataError => (0, ST1_DATA_ERROR, ST2_DATA_ERROR_IN_DATA),
            DriveError::NoMatchingSector => (ST0_ABNORMAL, ST1_END_OF_CYLINDER | ST1_NOT_WRITABLE, 0),
            DriveError::ReadOnly => (ST0_ABNORMAL, ST1_NOT_WRITABLE, 0),
        };

        StatusBits { st0, st1, st2 }
    }
}

/// Status deltas for the outcome of a drive operation; success sets nothing.
pub fn status_bits_for<T>(result: &Result<T, DriveError>) -> StatusBits {
    match result {
        Ok(_) => StatusBits::default(),
        Err(err) => err.status_bits(),
    }
}

/// Failure of a host-side management request (media insertion, ejection).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ControllerError {
    #[error("invalid drive unit {0}")]
    InvalidUnit(usize),
    #[error("drive unit {0} is busy with a command")]
    UnitBusy(usize),
    #[error("no drive attached to unit {0}")]
    EmptySlot(usize),
    #[error("invalid controller snapshot: {0}")]
    InvalidSnapshot(&'static str),
}
