use anyhow::{bail, Result};
use std::time::Duration;

use crate::discovery::DeviceIdentity;

pub const DEFAULT_LIMIT: u64 = 3;
pub const DEFAULT_FRACTION: f64 = 0.2;
pub const DEFAULT_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RETRY_MS: u64 = 1000;

const MIN_FRACTION: f64 = 0.01;
const MAX_FRACTION: f64 = 0.99;

/// USB identity of the indicator board (BBC micro:bit DAPLink interface).
pub const INDICATOR_IDENTITY: DeviceIdentity = DeviceIdentity {
    vid: 3368,
    pid: 516,
};

pub const BAUD_RATE: u32 = 9600;
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Total time one payload may sit behind a deasserted CTS before the write
/// counts as failed. Each underlying call is still bounded by `READ_TIMEOUT`.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// The only message the indicator understands. No framing, no newline.
pub const FLASH_PAYLOAD: &[u8] = b"flash";

/// Window title fragments, in priority order.
pub const TITLE_MATCHES: &[&str] = &["grid", "communicator"];
pub const TITLE_EXCLUDES: &[&str] = &["grid 3.exe", "users"];

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    pub limit: u64,
    pub fraction: f64,
    pub interval: Duration,
    pub retry: Duration,
    /// Explicit serial address; skips USB discovery when set.
    pub port: Option<String>,
}

impl BridgeConfig {
    pub fn new(
        limit: u64,
        fraction: f64,
        interval_ms: u64,
        retry_ms: u64,
        port: Option<String>,
    ) -> Result<Self> {
        check_fraction(fraction)?;
        if interval_ms == 0 {
            bail!("--interval-ms must be greater than zero");
        }
        let port = port
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            limit,
            fraction,
            interval: Duration::from_millis(interval_ms),
            retry: Duration::from_millis(retry_ms.max(10)),
            port,
        })
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            fraction: DEFAULT_FRACTION,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            retry: Duration::from_millis(DEFAULT_RETRY_MS),
            port: None,
        }
    }
}

pub fn check_fraction(fraction: f64) -> Result<()> {
    // NaN fails both comparisons and lands here too.
    if !(fraction > MIN_FRACTION && fraction < MAX_FRACTION) {
        bail!("fraction needs to be between {MIN_FRACTION} and {MAX_FRACTION}, got {fraction}");
    }
    Ok(())
}
