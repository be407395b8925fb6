use image::{Rgba, RgbaImage};

use crate::window::{CaptureRegion, Desktop};

/// Pure black; alpha is ignored.
const SENTINEL_RGB: [u8; 3] = [0, 0, 0];

pub fn count_sentinel_pixels(image: &RgbaImage) -> u64 {
    image
        .pixels()
        .filter(|Rgba([r, g, b, _])| [*r, *g, *b] == SENTINEL_RGB)
        .count() as u64
}

/// Activity measure for `region`, or `None` when no usable sample was taken.
///
/// A count of zero is reported as `None` as well: an empty region and a failed
/// grab are indistinguishable to the caller. Kept for compatibility with the
/// deployed indicator behaviour.
pub fn sample<D: Desktop>(desktop: &mut D, region: &CaptureRegion) -> Option<u64> {
    let image = match desktop.grab(region) {
        Ok(image) => image,
        Err(err) => {
            log::debug!("capture failed for {region:?}: {err:#}");
            return None;
        }
    };

    match count_sentinel_pixels(&image) {
        0 => None,
        count => Some(count),
    }
}
