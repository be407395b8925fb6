use anyhow::{Context, Result};
use serialport::SerialPortType;
use std::time::Duration;

use crate::bridge::Pause;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vid: u16,
    pub pid: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortCandidate {
    pub address: String,
    pub kind: &'static str,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

impl PortCandidate {
    pub fn matches(&self, identity: &DeviceIdentity) -> bool {
        self.vid == Some(identity.vid) && self.pid == Some(identity.pid)
    }
}

pub trait PortLister {
    fn list_ports(&mut self) -> Result<Vec<PortCandidate>>;
}

/// Serial devices currently enumerated by the OS.
#[derive(Debug, Default)]
pub struct SystemPorts;

impl PortLister for SystemPorts {
    fn list_ports(&mut self) -> Result<Vec<PortCandidate>> {
        let ports = serialport::available_ports().context("failed to enumerate serial ports")?;
        Ok(ports
            .into_iter()
            .map(|port| {
                let (kind, vid, pid) = match port.port_type {
                    SerialPortType::UsbPort(info) => ("usb", Some(info.vid), Some(info.pid)),
                    SerialPortType::BluetoothPort => ("bluetooth", None, None),
                    SerialPortType::PciPort => ("pci", None, None),
                    SerialPortType::Unknown => ("unknown", None, None),
                };
                PortCandidate {
                    address: port.port_name,
                    kind,
                    vid,
                    pid,
                }
            })
            .collect())
    }
}

/// Address of the first enumerated port with the given identity.
pub fn discover<L: PortLister>(lister: &mut L, identity: &DeviceIdentity) -> Option<String> {
    let ports = match lister.list_ports() {
        Ok(ports) => ports,
        Err(err) => {
            log::debug!("port enumeration failed, treating as empty: {err:#}");
            return None;
        }
    };

    ports
        .into_iter()
        .find(|port| port.matches(identity))
        .map(|port| port.address)
}

/// Polls [`discover`] until the device appears. Returns `None` only when the
/// pause is interrupted by shutdown.
pub fn discover_blocking<L: PortLister, P: Pause>(
    lister: &mut L,
    identity: &DeviceIdentity,
    interval: Duration,
    pause: &mut P,
) -> Option<String> {
    let mut announced = false;
    loop {
        if let Some(address) = discover(lister, identity) {
            log::info!("indicator found at {address}");
            return Some(address);
        }
        if !announced {
            log::info!(
                "waiting for indicator {:04x}:{:04x} to be plugged in",
                identity.vid,
                identity.pid
            );
            announced = true;
        }
        if !pause.pause(interval) {
            return None;
        }
    }
}
