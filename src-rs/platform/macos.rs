use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

use crate::window::{CaptureRegion, Desktop, WindowCandidate, WindowRect};

/// Walking every foreground process through System Events is slow on a busy
/// desktop; a short bound here reads as "no window" on every tick.
const LIST_WINDOWS_TIMEOUT: Duration = Duration::from_secs(3);
const OSASCRIPT_ATTEMPTS: u32 = 2;
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

const LIST_WINDOWS_SCRIPT: &str = r#"
on cleanText(v)
  try
    set t to v as text
  on error
    set t to ""
  end try
  set AppleScript's text item delimiters to {return, linefeed, tab}
  set parts to text items of t
  set AppleScript's text item delimiters to " "
  set clean to parts as text
  set AppleScript's text item delimiters to ""
  return clean
end cleanText

tell application "System Events"
  set linesOut to {}
  repeat with procRef in (application processes whose background only is false)
    try
      repeat with winRef in windows of procRef
        try
          set p to position of winRef
          set s to size of winRef
          set wt to ""
          try
            set wt to name of winRef
          end try
          set end of linesOut to ((item 1 of p) as text) & tab & ((item 2 of p) as text) & tab & ((item 1 of s) as text) & tab & ((item 2 of s) as text) & tab & my cleanText(wt)
        end try
      end repeat
    end try
  end repeat
  set AppleScript's text item delimiters to linefeed
  set outText to linesOut as text
  set AppleScript's text item delimiters to ""
  return outText
end tell
"#;

/// System Events listing plus `screencapture -R`.
#[derive(Debug, Default)]
pub struct HostDesktop;

impl HostDesktop {
    pub fn new() -> Self {
        Self
    }
}

impl Desktop for HostDesktop {
    fn top_level_windows(&mut self) -> Result<Vec<WindowCandidate>> {
        let raw = run_osascript_with_retry(
            LIST_WINDOWS_SCRIPT,
            LIST_WINDOWS_TIMEOUT,
            OSASCRIPT_ATTEMPTS,
            40,
        )?;
        Ok(parse_window_rows(&raw))
    }

    fn grab(&mut self, region: &CaptureRegion) -> Result<RgbaImage> {
        let file = tempfile::Builder::new()
            .prefix("activity-beacon-")
            .suffix(".png")
            .tempfile()
            .context("failed to create capture file")?;
        let rect = format!(
            "{},{},{},{}",
            region.left,
            region.top,
            region.width(),
            region.height()
        );

        let mut child = Command::new("screencapture")
            .arg("-x")
            .arg("-R")
            .arg(&rect)
            .arg(file.path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn screencapture")?;
        match child.wait_timeout(CAPTURE_TIMEOUT)? {
            Some(status) if status.success() => {}
            Some(status) => bail!("screencapture exited with {status}"),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                bail!("screencapture timed out after {}ms", CAPTURE_TIMEOUT.as_millis());
            }
        }

        let image = image::open(file.path())
            .with_context(|| format!("failed to read capture: {}", file.path().display()))?;
        Ok(image.to_rgba8())
    }
}

fn run_osascript_with_retry(
    script: &str,
    timeout: Duration,
    attempts: u32,
    delay_ms: u64,
) -> Result<String> {
    let max_attempts = attempts.max(1);
    let mut last_error = String::from("osascript returned empty output");

    for attempt in 1..=max_attempts {
        let mut child = Command::new("osascript")
            .arg("-e")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn osascript")?;

        match child.wait_timeout(timeout) {
            Ok(Some(_)) => {
                let output = child.wait_with_output().context("failed to read osascript output")?;
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if output.status.success() {
                    // No matching windows is a valid, empty answer.
                    return Ok(stdout);
                }
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                last_error = if stderr.is_empty() {
                    format!("osascript failed with {}", output.status)
                } else {
                    stderr
                };
            }
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                last_error = format!(
                    "osascript timed out after {}ms (attempt {attempt}/{max_attempts})",
                    timeout.as_millis()
                );
            }
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                last_error = err.to_string();
            }
        }

        if attempt < max_attempts {
            let backoff = delay_ms.saturating_mul(u64::from(attempt));
            thread::sleep(Duration::from_millis(backoff.max(10)));
        }
    }

    bail!(last_error)
}

/// Parses `x<TAB>y<TAB>w<TAB>h<TAB>title` rows; malformed rows are skipped.
fn parse_window_rows(raw: &str) -> Vec<WindowCandidate> {
    let mut items = Vec::new();
    for line in raw.lines() {
        let parts: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
        let [x, y, w, h, rest @ ..] = parts.as_slice() else {
            continue;
        };
        let Some([x, y, w, h]) = [x, y, w, h]
            .iter()
            .map(|v| v.trim().parse::<f64>().ok().map(|v| v.round() as i32))
            .collect::<Option<Vec<i32>>>()
            .and_then(|v| <[i32; 4]>::try_from(v).ok())
        else {
            continue;
        };
        if w <= 0 || h <= 0 {
            continue;
        }
        items.push(WindowCandidate {
            title: rest.first().map(|t| t.trim().to_string()).unwrap_or_default(),
            rect: WindowRect {
                left: x,
                top: y,
                right: x.saturating_add(w),
                bottom: y.saturating_add(h),
            },
        });
    }
    items
}
