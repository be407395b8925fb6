use anyhow::Result;
use image::RgbaImage;

/// Screen rectangle, top-left origin, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WindowRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl WindowRect {
    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// The slice of a window that gets sampled. Rebuilt every cycle.
pub type CaptureRegion = WindowRect;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCandidate {
    pub title: String,
    pub rect: WindowRect,
}

/// Host windowing surface: top-level window listing plus pixel capture.
pub trait Desktop {
    fn top_level_windows(&mut self) -> Result<Vec<WindowCandidate>>;
    fn grab(&mut self, region: &CaptureRegion) -> Result<RgbaImage>;
}

/// Picks the monitored window.
///
/// Match fragments are tried in order; for each one the first window whose
/// lowercased title contains it, and contains none of the exclusions, wins.
pub fn select_window<'a>(
    candidates: &'a [WindowCandidate],
    matches: &[&str],
    excludes: &[&str],
) -> Option<&'a WindowCandidate> {
    let excludes: Vec<String> = excludes.iter().map(|e| e.to_lowercase()).collect();

    for fragment in matches {
        let fragment = fragment.to_lowercase();
        let hit = candidates.iter().find(|candidate| {
            let title = candidate.title.to_lowercase();
            title.contains(&fragment) && !excludes.iter().any(|e| title.contains(e.as_str()))
        });
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// Top `fraction` of the window. Degenerate windows (minimised, zero height
/// after scaling) produce no region.
pub fn capture_region(rect: &WindowRect, fraction: f64) -> Option<CaptureRegion> {
    let height = rect.height();
    if rect.width() <= 0 || height <= 0 {
        return None;
    }
    // Truncation towards zero, same as an integer cast of the scaled height.
    let scaled = (f64::from(height) * fraction).trunc();
    if scaled < 1.0 {
        return None;
    }
    let scaled = scaled.min(f64::from(height)) as i32;

    Some(CaptureRegion {
        left: rect.left,
        top: rect.top,
        right: rect.right,
        bottom: rect.top + scaled,
    })
}
