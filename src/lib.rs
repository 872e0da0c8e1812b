pub mod bus;
pub mod clock;
pub mod commands;
pub mod config;
pub mod disk_drive;
pub mod disk_error;
pub mod dsk_image;
pub mod fdc;
pub mod internal_state;
pub mod media;
pub mod phase;
pub mod status;
pub mod utils;

pub use bus::{FdcBus, Message, PortMap};
pub use clock::InterruptState;
pub use config::{DriveConfig, FdcBuilder, FdcConfig};
pub use disk_drive::{Drive, DriveKind};
pub use disk_error::{ControllerError, DriveError};
pub use dsk_image::{DiskImage, Geometry, ImageError};
pub use fdc::{FdcState, SpecifyParams, Upd765};
pub use internal_state::{InternalState, ReportState};
pub use media::{DataMark, MediaBackend, SectorId, SectorRequest};
pub use phase::FdcPhase;
pub use utils::hexdump;

use tracing_subscriber::EnvFilter;
use wasm_bindgen::prelude::*;

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[wasm_bindgen(js_name = Fdc)]
pub struct JsFdc(FdcBus);

#[wasm_bindgen(js_class = Fdc)]
impl JsFdc {
    #[wasm_bindgen(constructor)]
    pub fn new(plus3: bool) -> Result<JsFdc, JsValue> {
        console_error_panic_hook::set_once();
        let _ = tracing_wasm::try_set_as_global_default();

        let fdc = FdcBuilder::new().build().map_err(to_js_error)?;
        let ports = if plus3 { PortMap::Plus3 } else { PortMap::Cpc };
        Ok(Self(FdcBus::new(fdc, ports)))
    }

    pub fn input(&mut self, port: u16) -> u8 {
        self.0.input(port)
    }

    pub fn output(&mut self, port: u16, value: u8) {
        self.0.output(port, value);
    }

    pub fn clock(&mut self, ticks: u32) {
        self.0.clock(ticks);
    }

    pub fn reset(&mut self) {
        self.0.reset();
    }

    #[wasm_bindgen(js_name = terminalCount)]
    pub fn terminal_count(&mut self) {
        self.0.terminal_count();
    }

    #[wasm_bindgen(js_name = insertDisk)]
    pub fn insert_disk(&mut self, unit: usize, data: &[u8]) -> Result<(), JsValue> {
        let image = DiskImage::from_bytes(data).map_err(to_js_error)?;
        self.0
            .fdc
            .insert_media(unit, Box::new(image))
            .map_err(to_js_error)
    }

    #[wasm_bindgen(js_name = ejectDisk)]
    pub fn eject_disk(&mut self, unit: usize) -> Result<bool, JsValue> {
        let media = self.0.fdc.eject_media(unit).map_err(to_js_error)?;
        Ok(media.is_some())
    }

    #[wasm_bindgen(getter)]
    pub fn interrupt(&self) -> bool {
        self.0.interrupt_line()
    }

    #[wasm_bindgen(getter)]
    pub fn state(&mut self) -> Result<String, JsValue> {
        self.0
            .fdc
            .report_state()
            .and_then(|state| state.to_json())
            .map_err(to_js_error)
    }
}

fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}
