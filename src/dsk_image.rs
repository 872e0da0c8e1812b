// In-memory disk media
// Tracks hold their sectors in physical order, each with its own ID field,
// data mark and contents, so copy-protected layouts (odd sector numbers,
// mixed sizes, deleted data) can be represented as well as plain ones.

use thiserror::Error;

use crate::disk_error::DriveError;
use crate::media::{DataMark, MediaBackend, SectorId, SectorRequest};
use crate::status::sector_size;
use crate::utils::hexdump;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid disk image size: {actual} bytes (expected {expected})")]
    InvalidSize { actual: usize, expected: usize },
    #[error("unrecognized raw image size: {0} bytes")]
    UnknownSize(usize),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
}

/// Uniform layout used to build or flatten an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u8,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub size_code: u8,
    pub first_sector: u8,
}

impl Geometry {
    pub fn new(
        cylinders: u8,
        heads: u8,
        sectors_per_track: u8,
        size_code: u8,
        first_sector: u8,
    ) -> Self {
        Self {
            cylinders,
            heads,
            sectors_per_track,
            size_code,
            first_sector,
        }
    }

    pub fn sector_size(&self) -> usize {
        sector_size(self.size_code)
    }

    pub fn track_size(&self) -> usize {
        self.sectors_per_track as usize * self.sector_size()
    }

    pub fn total_size(&self) -> usize {
        self.cylinders as usize * self.heads as usize * self.track_size()
    }

    fn validate(&self) -> Result<(), ImageError> {
        if self.cylinders == 0 {
            return Err(ImageError::InvalidGeometry("no cylinders".to_string()));
        }
        if !(1..=2).contains(&self.heads) {
            return Err(ImageError::InvalidGeometry(format!(
                "{} heads",
                self.heads
            )));
        }
        if self.sectors_per_track == 0 {
            return Err(ImageError::InvalidGeometry("no sectors".to_string()));
        }
        if self.size_code > 6 {
            return Err(ImageError::InvalidGeometry(format!(
                "sector size code {}",
                self.size_code
            )));
        }
        if self.first_sector as usize + self.sectors_per_track as usize > 0x100 {
            return Err(ImageError::InvalidGeometry(
                "sector numbers overflow".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sector {
    pub id: SectorId,
    pub deleted: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Track {
    sectors: Vec<Sector>,
}

impl Track {
    fn uniform(geometry: &Geometry, cylinder: u8, head: u8, filler: u8) -> Self {
        let sectors = (0..geometry.sectors_per_track)
            .map(|index| Sector {
                id: SectorId::new(
                    cylinder,
                    head,
                    geometry.first_sector.wrapping_add(index),
                    geometry.size_code,
                ),
                deleted: false,
                data: vec![filler; geometry.sector_size()],
            })
            .collect();
        Self { sectors }
    }

    fn find(&self, request: &SectorRequest) -> Result<&Sector, DriveError> {
        if self.sectors.is_empty() {
            return Err(DriveError::NoAddressMark);
        }
        self.sectors
            .iter()
            .find(|s| matches_request(&s.id, request))
            .ok_or(DriveError::NoData)
    }

    fn find_mut(&mut self, request: &SectorRequest) -> Result<&mut Sector, DriveError> {
        if self.sectors.is_empty() {
            return Err(DriveError::NoAddressMark);
        }
        self.sectors
            .iter_mut()
            .find(|s| matches_request(&s.id, request))
            .ok_or(DriveError::NoData)
    }
}

fn matches_request(id: &SectorId, request: &SectorRequest) -> bool {
    id.sector == request.sector
        && id.cylinder == request.id_cylinder
        && id.head == request.id_head
}

#[derive(Debug, Clone)]
pub struct DiskImage {
    geometry: Geometry,
    tracks: Vec<Track>,
    write_protected: bool,
}

impl DiskImage {
    /// A freshly formatted image with every sector filled with `filler`.
    pub fn formatted(geometry: Geometry, filler: u8) -> Self {
        let mut tracks = Vec::with_capacity(geometry.cylinders as usize * geometry.heads as usize);
        for cylinder in 0..geometry.cylinders {
            for head in 0..geometry.heads {
                tracks.push(Track::uniform(&geometry, cylinder, head, filler));
            }
        }

        Self {
            geometry,
            tracks,
            write_protected: false,
        }
    }

    /// Builds an image from a flat sector dump, cylinder by cylinder and
    /// head by head.
    pub fn from_raw(data: &[u8], geometry: Geometry) -> Result<Self, ImageError> {
        geometry.validate()?;
        if data.len() != geometry.total_size() {
            return Err(ImageError::InvalidSize {
                actual: data.len(),
                expected: geometry.total_size(),
            });
        }

        let mut image = Self::formatted(geometry, 0);
        let sector_size = geometry.sector_size();
        for (track, chunk) in image
            .tracks
            .iter_mut()
            .zip(data.chunks(geometry.track_size()))
        {
            for (sector, bytes) in track.sectors.iter_mut().zip(chunk.chunks(sector_size)) {
                sector.data.copy_from_slice(bytes);
            }
        }

        tracing::debug!(
            "[DSK] Loaded raw image: {} cylinders, {} heads, {} sectors of {} bytes",
            geometry.cylinders,
            geometry.heads,
            geometry.sectors_per_track,
            sector_size
        );
        Ok(image)
    }

    /// Raw sector dump of a standard PC/MSX format, detected by size.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImageError> {
        let geometry = match data.len() {
            163840 => Geometry::new(40, 1, 8, 2, 1), // 160KB
            184320 => Geometry::new(40, 1, 9, 2, 1), // 180KB
            368640 => Geometry::new(80, 1, 9, 2, 1), // 360KB single sided 3.5"
            737280 => Geometry::new(80, 2, 9, 2, 1), // 720KB
            1474560 => Geometry::new(80, 2, 18, 2, 1), // 1.44MB
            len => return Err(ImageError::UnknownSize(len)),
        };
        Self::from_raw(data, geometry)
    }

    /// Flat sector dump in the layout accepted by `from_raw`.
    pub fn to_raw(&self) -> Vec<u8> {
        self.tracks
            .iter()
            .flat_map(|track| track.sectors.iter())
            .flat_map(|sector| sector.data.iter().copied())
            .collect()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn sectors(&self, cylinder: u8, head: u8) -> &[Sector] {
        self.track(cylinder, head)
            .map(|t| t.sectors.as_slice())
            .unwrap_or(&[])
    }

    /// Sector by physical position on a track.
    pub fn sector_mut(&mut self, cylinder: u8, head: u8, index: usize) -> Option<&mut Sector> {
        self.track_mut(cylinder, head)
            .and_then(|t| t.sectors.get_mut(index))
    }

    fn track_index(&self, cylinder: u8, head: u8) -> Option<usize> {
        if cylinder >= self.geometry.cylinders || head >= self.geometry.heads {
            return None;
        }
        Some(cylinder as usize * self.geometry.heads as usize + head as usize)
    }

    fn track(&self, cylinder: u8, head: u8) -> Option<&Track> {
        self.track_index(cylinder, head).map(|i| &self.tracks[i])
    }

    fn track_mut(&mut self, cylinder: u8, head: u8) -> Option<&mut Track> {
        self.track_index(cylinder, head)
            .map(move |i| &mut self.tracks[i])
    }
}

impl MediaBackend for DiskImage {
    fn read_sector_id(
        &mut self,
        cylinder: u8,
        head: u8,
        sequence: usize,
    ) -> Result<SectorId, DriveError> {
        let sectors = self.sectors(cylinder, head);
        if sectors.is_empty() {
            return Err(DriveError::NoAddressMark);
        }
        Ok(sectors[sequence % sectors.len()].id)
    }

    fn read_sector(
        &mut self,
        request: &SectorRequest,
        buf: &mut [u8],
    ) -> Result<DataMark, DriveError> {
        let track = self
            .track(request.cylinder, request.head)
            .ok_or(DriveError::NoAddressMark)?;
        let sector = track.find(request)?;

        let len = buf.len().min(sector.data.len());
        buf[..len].copy_from_slice(&sector.data[..len]);
        buf[len..].fill(0);

        tracing::trace!(
            "[DSK] Read C{} H{} R{}:\n{}",
            sector.id.cylinder,
            sector.id.head,
            sector.id.sector,
            hexdump(&buf[..len.min(64)])
        );
        Ok(DataMark::from_deleted(sector.deleted))
    }

    fn write_sector(&mut self, request: &SectorRequest, data: &[u8]) -> Result<(), DriveError> {
        if self.write_protected {
            return Err(DriveError::ReadOnly);
        }

        let track = self
            .track_mut(request.cylinder, request.head)
            .ok_or(DriveError::NoAddressMark)?;
        let sector = track.find_mut(request)?;

        let len = data.len().min(sector.data.len());
        sector.data[..len].copy_from_slice(&data[..len]);
        sector.deleted = request.deleted;
        Ok(())
    }

    fn read_track(&mut self, request: &SectorRequest, buf: &mut [u8]) -> Result<usize, DriveError> {
        let track = self
            .track(request.cylinder, request.head)
            .ok_or(DriveError::NoAddressMark)?;
        if track.sectors.is_empty() {
            return Err(DriveError::NoAddressMark);
        }

        let mut len = 0;
        for sector in &track.sectors {
            let count = sector.data.len().min(buf.len() - len);
            buf[len..len + count].copy_from_slice(&sector.data[..count]);
            len += count;
            if len == buf.len() {
                break;
            }
        }
        Ok(len)
    }

    fn format_track(
        &mut self,
        cylinder: u8,
        head: u8,
        sectors: &[SectorId],
        filler: u8,
    ) -> Result<(), DriveError> {
        if self.write_protected {
            return Err(DriveError::ReadOnly);
        }

        let track = self
            .track_mut(cylinder, head)
            .ok_or(DriveError::NoData)?;
        track.sectors = sectors
            .iter()
            .map(|id| Sector {
                id: *id,
                deleted: false,
                data: vec![filler; sector_size(id.size_code)],
            })
            .collect();

        tracing::debug!(
            "[DSK] Formatted C{} H{} with {} sectors, filler {:02X}",
            cylinder,
            head,
            sectors.len(),
            filler
        );
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.write_protected
    }

    fn eject(&mut self) {
        tracing::debug!("[DSK] Image released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(cylinder: u8, head: u8, sector: u8) -> SectorRequest {
        SectorRequest {
            cylinder,
            head,
            id_cylinder: cylinder,
            id_head: head,
            sector,
            ..Default::default()
        }
    }

    #[test]
    fn test_raw_layout() {
        let geometry = Geometry::new(2, 2, 2, 0, 1);
        let data: Vec<u8> = (0..geometry.total_size()).map(|i| (i / 128) as u8).collect();
        let mut image = DiskImage::from_raw(&data, geometry).unwrap();

        let mut buf = [0u8; 128];
        image.read_sector(&request(1, 0, 2), &mut buf).unwrap();
        // cylinder 1, head 0, second sector = 5th sector in the dump
        assert!(buf.iter().all(|&b| b == 5));
        assert_eq!(image.to_raw(), data);
    }

    #[test]
    fn test_from_bytes_detects_720k() {
        let image = DiskImage::from_bytes(&vec![0u8; 737280]).unwrap();
        assert_eq!(image.geometry(), Geometry::new(80, 2, 9, 2, 1));
        assert_eq!(
            DiskImage::from_bytes(&[0u8; 1000]).unwrap_err(),
            ImageError::UnknownSize(1000)
        );
    }

    #[test]
    fn test_wrong_size_rejected() {
        let geometry = Geometry::new(40, 1, 9, 2, 0xC1);
        let err = DiskImage::from_raw(&[0u8; 512], geometry).unwrap_err();
        assert_eq!(
            err,
            ImageError::InvalidSize {
                actual: 512,
                expected: 40 * 9 * 512
            }
        );
    }

    #[test]
    fn test_missing_sector_is_no_data() {
        let mut image = DiskImage::formatted(Geometry::new(40, 1, 9, 2, 0xC1), 0xE5);
        let mut buf = [0u8; 512];
        assert_eq!(
            image.read_sector(&request(0, 0, 0x01), &mut buf),
            Err(DriveError::NoData)
        );
        assert_eq!(
            image.read_sector(&request(0, 0, 0xC1), &mut buf),
            Ok(DataMark::Normal)
        );
        assert!(buf.iter().all(|&b| b == 0xE5));
    }

    #[test]
    fn test_read_sector_id_wraps() {
        let mut image = DiskImage::formatted(Geometry::new(40, 1, 9, 2, 0xC1), 0xE5);
        assert_eq!(image.read_sector_id(3, 0, 0).unwrap().sector, 0xC1);
        assert_eq!(image.read_sector_id(3, 0, 10).unwrap().sector, 0xC2);
        assert_eq!(image.read_sector_id(3, 0, 10).unwrap().cylinder, 3);
    }

    #[test]
    fn test_write_keeps_deleted_mark() {
        let mut image = DiskImage::formatted(Geometry::new(40, 1, 9, 2, 1), 0xE5);
        let mut req = request(0, 0, 3);
        req.deleted = true;
        image.write_sector(&req, &[0x11; 512]).unwrap();

        let mut buf = [0u8; 512];
        assert_eq!(image.read_sector(&request(0, 0, 3), &mut buf), Ok(DataMark::Deleted));
        assert_eq!(buf[0], 0x11);
    }

    #[test]
    fn test_format_replaces_track() {
        let mut image = DiskImage::formatted(Geometry::new(40, 1, 9, 2, 1), 0xE5);
        let ids = [SectorId::new(7, 0, 0x41, 1), SectorId::new(7, 0, 0x42, 1)];
        image.format_track(5, 0, &ids, 0x5A).unwrap();

        let sectors = image.sectors(5, 0);
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[1].id, ids[1]);
        assert_eq!(sectors[1].data, vec![0x5A; 256]);

        let mut buf = [0u8; 1024];
        assert_eq!(image.read_track(&request(5, 0, 1), &mut buf), Ok(512));
    }

    #[test]
    fn test_write_protection() {
        let mut image = DiskImage::formatted(Geometry::new(40, 1, 9, 2, 1), 0xE5);
        image.set_write_protected(true);
        assert_eq!(
            image.write_sector(&request(0, 0, 1), &[0; 512]),
            Err(DriveError::ReadOnly)
        );
        assert_eq!(image.format_track(0, 0, &[], 0), Err(DriveError::ReadOnly));
    }
}
