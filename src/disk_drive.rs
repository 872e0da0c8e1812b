// Floppy disk drive emulation
// One physical drive unit: mechanics (motor, head position) plus the media
// backend currently inserted in it.

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::disk_error::DriveError;
use crate::media::{DataMark, MediaBackend, SectorId, SectorRequest};
use crate::status::{ST3_READY, ST3_TRACK_0, ST3_TWO_SIDE, ST3_WRITE_PROTECTED};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveKind {
    #[default]
    None,
    #[serde(rename = "3in")]
    ThreeInch,
    #[serde(rename = "3.5in")]
    ThreeAndHalfInch,
    #[serde(rename = "5.25in")]
    FiveAndQuarterInch,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Drive {
    kind: DriveKind,
    heads: u8,
    cylinders: u8,
    read_only: bool,
    motor_on: bool,
    cylinder: u8,
    #[derivative(Debug = "ignore")]
    media: Option<Box<dyn MediaBackend>>,
}

impl Drive {
    pub fn new(kind: DriveKind, heads: u8, cylinders: u8) -> Self {
        Self {
            kind,
            heads: heads.clamp(1, 2),
            cylinders: cylinders.max(1),
            read_only: false,
            motor_on: false,
            cylinder: 0,
            media: None,
        }
    }

    pub fn kind(&self) -> DriveKind {
        self.kind
    }

    pub fn heads(&self) -> u8 {
        self.heads
    }

    pub fn cylinders(&self) -> u8 {
        self.cylinders
    }

    pub fn cylinder(&self) -> u8 {
        self.cylinder
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only || self.media.as_ref().is_some_and(|m| m.is_read_only())
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    pub fn is_motor_on(&self) -> bool {
        self.motor_on
    }

    pub fn set_motor(&mut self, on: bool) {
        if self.motor_on != on {
            tracing::info!("[FDD] Motor {}", if on { "ON" } else { "OFF" });
        }
        self.motor_on = on;
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn insert(&mut self, media: Box<dyn MediaBackend>) {
        if self.media.is_some() {
            self.eject();
        }
        self.media = Some(media);
        tracing::info!("[FDD] Media inserted ({:?} drive)", self.kind);
    }

    pub fn eject(&mut self) -> Option<Box<dyn MediaBackend>> {
        let mut media = self.media.take()?;
        media.eject();
        tracing::info!("[FDD] Media ejected ({:?} drive)", self.kind);
        Some(media)
    }

    /// Drive present, media inserted and the media reports ready. Motor
    /// state is applied by the controller.
    pub fn is_ready(&self) -> bool {
        self.kind != DriveKind::None && self.media.as_ref().is_some_and(|m| m.is_ready())
    }

    /// Write protect, ready, track 0 and two-side bits of ST3.
    pub fn drive_status(&self) -> u8 {
        let mut status = 0;
        if self.kind == DriveKind::None {
            return status;
        }

        if self.is_read_only() {
            status |= ST3_WRITE_PROTECTED;
        }
        if self.is_ready() {
            status |= ST3_READY;
        }
        if self.cylinder == 0 {
            status |= ST3_TRACK_0;
        }
        if self.heads > 1 {
            status |= ST3_TWO_SIDE;
        }
        status
    }

    pub fn seek_cylinder(&mut self, cylinder: u8) -> Result<(), DriveError> {
        if self.kind == DriveKind::None {
            return Err(DriveError::NotReady);
        }

        if cylinder >= self.cylinders {
            // The head stops against the end stop
            self.cylinder = self.cylinders - 1;
            tracing::debug!(
                "[FDD] Seek to {} beyond last cylinder {}",
                cylinder,
                self.cylinder
            );
            return Err(DriveError::SeekFailed);
        }

        self.cylinder = cylinder;
        match &mut self.media {
            Some(media) => media.seek_cylinder(cylinder),
            None => Ok(()),
        }
    }

    pub fn read_sector_id(&mut self, head: u8, sequence: usize) -> Result<SectorId, DriveError> {
        let cylinder = self.cylinder;
        let head = self.check_head(head)?;
        self.ready_media()?.read_sector_id(cylinder, head, sequence)
    }

    pub fn read_sector(
        &mut self,
        request: &SectorRequest,
        buf: &mut [u8],
    ) -> Result<DataMark, DriveError> {
        let request = self.locate(request)?;
        self.ready_media()?.read_sector(&request, buf)
    }

    pub fn write_sector(&mut self, request: &SectorRequest, data: &[u8]) -> Result<(), DriveError> {
        let request = self.locate(request)?;
        if self.is_read_only() {
            return Err(DriveError::ReadOnly);
        }
        self.ready_media()?.write_sector(&request, data)
    }

    pub fn read_track(&mut self, request: &SectorRequest, buf: &mut [u8]) -> Result<usize, DriveError> {
        let request = self.locate(request)?;
        self.ready_media()?.read_track(&request, buf)
    }

    pub fn format_track(
        &mut self,
        head: u8,
        sectors: &[SectorId],
        filler: u8,
    ) -> Result<(), DriveError> {
        let cylinder = self.cylinder;
        let head = self.check_head(head)?;
        if self.is_read_only() {
            return Err(DriveError::ReadOnly);
        }
        self.ready_media()?.format_track(cylinder, head, sectors, filler)
    }

    fn ready_media(&mut self) -> Result<&mut Box<dyn MediaBackend>, DriveError> {
        if !self.is_ready() {
            return Err(DriveError::NotReady);
        }
        self.media.as_mut().ok_or(DriveError::NotReady)
    }

    fn check_head(&self, head: u8) -> Result<u8, DriveError> {
        if self.kind == DriveKind::None || !self.has_media() {
            return Err(DriveError::NotReady);
        }
        if head >= self.heads {
            return Err(DriveError::NoAddressMark);
        }
        Ok(head)
    }

    /// Pins a request to the track under the head.
    fn locate(&self, request: &SectorRequest) -> Result<SectorRequest, DriveError> {
        let head = self.check_head(request.head)?;
        Ok(SectorRequest {
            cylinder: self.cylinder,
            head,
            ..*request
        })
    }
}

impl Default for Drive {
    fn default() -> Self {
        Self::new(DriveKind::None, 1, 1)
    }
}
