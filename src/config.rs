// Controller configuration
//
// Interrupt delays and the drive population, loadable from JSON. The
// builder wires a configured controller together the same way whether the
// configuration came from a file or from code.

use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::clock::{LONG_DELAY_TICKS, SHORT_DELAY_TICKS};
use crate::disk_drive::{Drive, DriveKind};
use crate::fdc::{Upd765, MAX_DRIVES};
use crate::media::MediaBackend;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub unit: usize,
    pub kind: DriveKind,
    pub heads: u8,
    pub cylinders: u8,
    pub read_only: bool,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            unit: 0,
            kind: DriveKind::ThreeInch,
            heads: 1,
            cylinders: 40,
            read_only: false,
        }
    }
}

impl DriveConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.unit >= MAX_DRIVES {
            bail!("drive unit {} out of range", self.unit);
        }
        if !(1..=2).contains(&self.heads) {
            bail!("drive {}: {} heads", self.unit, self.heads);
        }
        if self.cylinders == 0 {
            bail!("drive {}: no cylinders", self.unit);
        }
        Ok(())
    }

    pub fn to_drive(&self) -> Drive {
        let mut drive = Drive::new(self.kind, self.heads, self.cylinders);
        drive.set_read_only(self.read_only);
        drive
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdcConfig {
    pub short_delay: u32,
    pub long_delay: u32,
    pub drives: Vec<DriveConfig>,
}

impl Default for FdcConfig {
    fn default() -> Self {
        Self {
            short_delay: SHORT_DELAY_TICKS,
            long_delay: LONG_DELAY_TICKS,
            drives: vec![
                DriveConfig::default(),
                DriveConfig {
                    unit: 1,
                    ..Default::default()
                },
            ],
        }
    }
}

impl FdcConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: FdcConfig =
            serde_json::from_str(json).context("parsing controller configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("loading {}", path.display()))
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.short_delay == 0 || self.long_delay == 0 {
            bail!("interrupt delays must be at least one tick");
        }
        if self.drives.len() > MAX_DRIVES {
            bail!("{} drives configured, at most {}", self.drives.len(), MAX_DRIVES);
        }

        let mut seen = [false; MAX_DRIVES];
        for drive in &self.drives {
            drive.validate()?;
            if std::mem::replace(&mut seen[drive.unit], true) {
                bail!("drive unit {} configured twice", drive.unit);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FdcBuilder {
    config: FdcConfig,
    media: Vec<(usize, Box<dyn MediaBackend>)>,
}

impl FdcBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: FdcConfig) -> Self {
        Self {
            config,
            media: Vec::new(),
        }
    }

    pub fn delays(&mut self, short_delay: u32, long_delay: u32) -> &mut Self {
        self.config.short_delay = short_delay;
        self.config.long_delay = long_delay;
        self
    }

    pub fn no_drives(&mut self) -> &mut Self {
        self.config.drives.clear();
        self
    }

    pub fn drive(&mut self, unit: usize, kind: DriveKind, heads: u8, cylinders: u8) -> &mut Self {
        self.config.drives.retain(|d| d.unit != unit);
        self.config.drives.push(DriveConfig {
            unit,
            kind,
            heads,
            cylinders,
            read_only: false,
        });
        self
    }

    pub fn media(&mut self, unit: usize, media: Box<dyn MediaBackend>) -> &mut Self {
        self.media.push((unit, media));
        self
    }

    pub fn build(&mut self) -> anyhow::Result<Upd765> {
        self.config.validate()?;

        let mut fdc = Upd765::with_delays(self.config.short_delay, self.config.long_delay);
        for drive in &self.config.drives {
            fdc.attach_drive(drive.unit, drive.to_drive())?;
        }
        for (unit, media) in self.media.drain(..) {
            fdc.insert_media(unit, media)
                .with_context(|| format!("inserting media into unit {}", unit))?;
        }

        tracing::info!(
            "[FDC] Built with {} drive(s), delays {}/{} ticks",
            self.config.drives.len(),
            self.config.short_delay,
            self.config.long_delay
        );
        Ok(fdc)
    }
}
