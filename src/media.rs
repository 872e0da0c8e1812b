// Media backend interface
//
// A drive delegates every media operation to exactly one backend. Concrete
// backends (disk image files, compressed images, in-memory media) live
// outside the controller and only need to map their failures onto
// `DriveError`.

use serde::{Deserialize, Serialize};

use crate::disk_error::DriveError;

/// Contents of a sector ID field (C, H, R, N).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorId {
    pub cylinder: u8,
    pub head: u8,
    pub sector: u8,
    pub size_code: u8,
}

impl SectorId {
    pub fn new(cylinder: u8, head: u8, sector: u8, size_code: u8) -> Self {
        Self {
            cylinder,
            head,
            sector,
            size_code,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

/// Address mark found in front of a sector's data field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataMark {
    Normal,
    Deleted,
}

impl DataMark {
    pub fn from_deleted(deleted: bool) -> Self {
        if deleted {
            DataMark::Deleted
        } else {
            DataMark::Normal
        }
    }
}

/// Addressing and options for a sector or track transfer.
///
/// `cylinder`/`head` locate the physical track; `id_cylinder`/`id_head`/
/// `sector` are the values the ID field has to carry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SectorRequest {
    pub cylinder: u8,
    pub head: u8,
    pub id_cylinder: u8,
    pub id_head: u8,
    pub sector: u8,
    pub deleted: bool,
    pub skip_deleted: bool,
    pub mfm: bool,
    pub multi_track: bool,
}

pub trait MediaBackend {
    /// Called after the drive head has moved to `cylinder`.
    fn seek_cylinder(&mut self, cylinder: u8) -> Result<(), DriveError> {
        let _ = cylinder;
        Ok(())
    }

    /// The `sequence`-th ID field passing under `head` on `cylinder`.
    /// Backends wrap around the track themselves.
    fn read_sector_id(
        &mut self,
        cylinder: u8,
        head: u8,
        sequence: usize,
    ) -> Result<SectorId, DriveError>;

    /// Fills `buf` from the addressed sector and reports its data mark.
    fn read_sector(
        &mut self,
        request: &SectorRequest,
        buf: &mut [u8],
    ) -> Result<DataMark, DriveError>;

    fn write_sector(&mut self, request: &SectorRequest, data: &[u8]) -> Result<(), DriveError>;

    /// Reads the whole track in physical order, returning the number of
    /// bytes placed in `buf`.
    fn read_track(&mut self, request: &SectorRequest, buf: &mut [u8]) -> Result<usize, DriveError>;

    fn format_track(
        &mut self,
        cylinder: u8,
        head: u8,
        sectors: &[SectorId],
        filler: u8,
    ) -> Result<(), DriveError>;

    fn is_ready(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn eject(&mut self) {}
}
