use anyhow::{bail, Result};
use image::RgbaImage;

use crate::window::{CaptureRegion, Desktop, WindowCandidate};

/// Hosts without a supported capture backend: no windows, so the bridge idles.
#[derive(Debug, Default)]
pub struct HostDesktop;

impl HostDesktop {
    pub fn new() -> Self {
        log::warn!("window capture is not supported on this platform; activity will never be detected");
        Self
    }
}

impl Desktop for HostDesktop {
    fn top_level_windows(&mut self) -> Result<Vec<WindowCandidate>> {
        Ok(Vec::new())
    }

    fn grab(&mut self, _region: &CaptureRegion) -> Result<RgbaImage> {
        bail!("screen capture is not supported on this platform")
    }
}
