use chrono::Local;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{BridgeConfig, FLASH_PAYLOAD, INDICATOR_IDENTITY, TITLE_EXCLUDES, TITLE_MATCHES};
use crate::detector::ChangeDetector;
use crate::discovery::{discover_blocking, PortLister};
use crate::link::{Connector, DeviceHandle, DeviceLink, LinkError};
use crate::sampler::sample;
use crate::window::{capture_region, select_window, Desktop};

/// Blocking wait between polls. Returns false once shutdown has been requested.
pub trait Pause {
    fn pause(&mut self, duration: Duration) -> bool;
}

/// Sleeps in short slices so Ctrl-C is noticed within one slice.
#[derive(Debug, Clone)]
pub struct ShutdownPause {
    shutdown: Arc<AtomicBool>,
}

impl ShutdownPause {
    const SLICE: Duration = Duration::from_millis(50);

    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { shutdown }
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Pause for ShutdownPause {
    fn pause(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stopping() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Self::SLICE));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    SearchingDevice,
    /// Connected, presence flash not yet sent.
    ConnectedIdle,
    ConnectedMonitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    DeviceLost,
    Shutdown,
}

pub struct Bridge<D, L, C, P> {
    config: BridgeConfig,
    desktop: D,
    ports: L,
    link: DeviceLink<C>,
    pause: P,
    detector: ChangeDetector,
    state: BridgeState,
    window_missing: bool,
    sessions: u64,
}

impl<D, L, C, P> Bridge<D, L, C, P>
where
    D: Desktop,
    L: PortLister,
    C: Connector,
    P: Pause,
{
    pub fn new(config: BridgeConfig, desktop: D, ports: L, link: DeviceLink<C>, pause: P) -> Self {
        Self {
            config,
            desktop,
            ports,
            link,
            pause,
            detector: ChangeDetector::new(),
            state: BridgeState::SearchingDevice,
            window_missing: false,
            sessions: 0,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Runs until the pause reports shutdown. Any live handle is released
    /// before this returns.
    pub fn run(&mut self) {
        log::info!(
            "limit={} fraction={} interval={}ms",
            self.config.limit,
            self.config.fraction,
            self.config.interval.as_millis()
        );
        loop {
            self.set_state(BridgeState::SearchingDevice);
            let Some(handle) = self.connect() else {
                break;
            };
            match self.run_session(handle) {
                SessionEnd::DeviceLost => continue,
                SessionEnd::Shutdown => break,
            }
        }
        log::info!(
            "bridge stopped in {:?} after {} session(s)",
            self.state(),
            self.sessions()
        );
    }

    /// SEARCHING_DEVICE: discover, then connect, retrying on open failure.
    /// `None` means shutdown was requested while searching.
    fn connect(&mut self) -> Option<DeviceHandle> {
        loop {
            let address = match &self.config.port {
                Some(address) => address.clone(),
                None => discover_blocking(
                    &mut self.ports,
                    &INDICATOR_IDENTITY,
                    self.config.retry,
                    &mut self.pause,
                )?,
            };

            match self.link.connect(&address) {
                Ok(handle) => return Some(handle),
                Err(err) => {
                    log::warn!("{err}; retrying in {}ms", self.config.retry.as_millis());
                    if !self.pause.pause(self.config.retry) {
                        return None;
                    }
                }
            }
        }
    }

    /// One connected session. The handle is owned here and released on every
    /// way out, including unwinding.
    pub(crate) fn run_session(&mut self, mut handle: DeviceHandle) -> SessionEnd {
        self.sessions += 1;
        self.set_state(BridgeState::ConnectedIdle);
        log::info!("session {} on {}", self.sessions, handle.address());

        if let Err(err) = handle.send(FLASH_PAYLOAD) {
            return self.lose_device(handle, &err);
        }
        self.set_state(BridgeState::ConnectedMonitoring);

        loop {
            if let Err(err) = self.monitor_cycle(&mut handle) {
                return self.lose_device(handle, &err);
            }
            if !self.pause.pause(self.config.interval) {
                return SessionEnd::Shutdown;
            }
        }
    }

    fn lose_device(&mut self, handle: DeviceHandle, err: &LinkError) -> SessionEnd {
        log::warn!("indicator lost: {err}");
        drop(handle);
        self.set_state(BridgeState::SearchingDevice);
        SessionEnd::DeviceLost
    }

    /// One CONNECTED_MONITORING tick: locate, sample, compare, maybe flash.
    fn monitor_cycle(&mut self, handle: &mut DeviceHandle) -> Result<(), LinkError> {
        let windows = match self.desktop.top_level_windows() {
            Ok(windows) => windows,
            Err(err) => {
                log::debug!("window enumeration failed: {err:#}");
                Vec::new()
            }
        };

        let Some(window) = select_window(&windows, TITLE_MATCHES, TITLE_EXCLUDES) else {
            if !self.window_missing {
                log::info!("no communication software found for {TITLE_MATCHES:?}");
                self.window_missing = true;
            }
            return Ok(());
        };
        if self.window_missing {
            log::info!("monitoring {:?}", window.title);
            self.window_missing = false;
        }

        let Some(region) = capture_region(&window.rect, self.config.fraction) else {
            log::debug!("window {:?} has no capturable area", window.title);
            return Ok(());
        };
        let title = window.title.clone();

        let measure = sample(&mut self.desktop, &region);
        log::debug!("measure {measure:?}, previous {}", self.detector.previous());
        if self.detector.evaluate(measure, self.config.limit) {
            log::info!(
                "{} change detected {title}",
                Local::now().format("%H:%M:%S")
            );
            handle.send(FLASH_PAYLOAD)?;
        }
        Ok(())
    }

    fn set_state(&mut self, next: BridgeState) {
        if self.state != next {
            log::debug!("bridge {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}
