use serialport::{ClearBuffer, FlowControl};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{READ_TIMEOUT, WRITE_TIMEOUT};

pub type Port = Box<dyn Write + Send>;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("failed to open serial port {address}: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("write to {address} failed: {source}")]
    WriteFailed {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("a connection to {address} is already live")]
    AlreadyConnected { address: String },
}

/// Opens the OS-level connection. Split out so sessions can run against fakes.
pub trait Connector {
    fn open(&mut self, address: &str, baud_rate: u32) -> io::Result<Port>;
}

#[derive(Debug, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&mut self, address: &str, baud_rate: u32) -> io::Result<Port> {
        let mut port = serialport::new(address, baud_rate)
            .flow_control(FlowControl::Hardware)
            .timeout(READ_TIMEOUT)
            .open()?;
        port.write_data_terminal_ready(true)?;
        port.clear(ClearBuffer::Input)?;
        Ok(Box::new(StallTolerant::new(port, WRITE_TIMEOUT)))
    }
}

/// Retries timed-out writes until `bound` has passed.
///
/// The serial timeout applies to reads and writes alike, so under hardware
/// flow control a short CTS stall would otherwise surface as a lost device.
struct StallTolerant<W> {
    inner: W,
    bound: Duration,
}

impl<W: Write> StallTolerant<W> {
    fn new(inner: W, bound: Duration) -> Self {
        Self { inner, bound }
    }

    fn retry<T>(&mut self, mut op: impl FnMut(&mut W) -> io::Result<T>) -> io::Result<T> {
        let deadline = Instant::now() + self.bound;
        loop {
            match op(&mut self.inner) {
                Err(err) if err.kind() == io::ErrorKind::TimedOut && Instant::now() < deadline => {
                    log::debug!("serial write stalled, retrying");
                }
                other => return other,
            }
        }
    }
}

impl<W: Write> Write for StallTolerant<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.retry(|inner| inner.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.retry(|inner| inner.flush())
    }
}

/// Owner of the single permitted connection to the indicator.
pub struct DeviceLink<C> {
    connector: C,
    baud_rate: u32,
    live: Arc<AtomicBool>,
}

impl<C: Connector> DeviceLink<C> {
    pub fn new(connector: C, baud_rate: u32) -> Self {
        Self {
            connector,
            baud_rate,
            live: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Opens `address`. Fails without touching the OS while another handle from
    /// this link is still alive.
    pub fn connect(&mut self, address: &str) -> Result<DeviceHandle, LinkError> {
        if self.is_live() {
            return Err(LinkError::AlreadyConnected {
                address: address.to_string(),
            });
        }

        log::info!("connecting to {address} at {} baud", self.baud_rate);
        let port = self
            .connector
            .open(address, self.baud_rate)
            .map_err(|source| LinkError::ConnectionFailed {
                address: address.to_string(),
                source,
            })?;
        self.live.store(true, Ordering::SeqCst);
        log::info!("serial port {address} set up");

        Ok(DeviceHandle {
            address: address.to_string(),
            port: Some(port),
            live: Arc::clone(&self.live),
        })
    }
}

/// A live connection. Dropping it closes the port and frees the link slot.
pub struct DeviceHandle {
    address: String,
    port: Option<Port>,
    live: Arc<AtomicBool>,
}

impl DeviceHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn send(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let Some(port) = self.port.as_mut() else {
            return Err(LinkError::WriteFailed {
                address: self.address.clone(),
                source: io::Error::new(io::ErrorKind::NotConnected, "port already released"),
            });
        };

        port.write_all(payload)
            .and_then(|()| port.flush())
            .map_err(|source| LinkError::WriteFailed {
                address: self.address.clone(),
                source,
            })
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        // Close the OS handle before the slot opens up for the next connect.
        drop(self.port.take());
        self.live.store(false, Ordering::SeqCst);
        log::info!("released serial port {}", self.address);
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{FakeConnector, PortEvent};
    use super::*;

    #[test]
    fn send_writes_payload() {
        let connector = FakeConnector::default();
        let mut link = DeviceLink::new(connector.clone(), 9600);
        let mut handle = link.connect("COM3").unwrap();
        handle.send(b"flash").unwrap();
        assert_eq!(
            connector.events(),
            vec![
                PortEvent::Open("COM3".to_string()),
                PortEvent::Write("COM3".to_string(), b"flash".to_vec()),
            ]
        );
    }

    #[test]
    fn second_connect_while_live_opens_nothing() {
        let connector = FakeConnector::default();
        let mut link = DeviceLink::new(connector.clone(), 9600);
        let _first = link.connect("COM3").unwrap();

        let err = link.connect("COM3").err().unwrap();
        assert!(matches!(err, LinkError::AlreadyConnected { .. }));
        let err = link.connect("COM4").err().unwrap();
        assert!(matches!(err, LinkError::AlreadyConnected { .. }));

        assert_eq!(connector.count(|e| matches!(e, PortEvent::Open(_))), 1);
    }

    #[test]
    fn drop_releases_port_and_slot() {
        let connector = FakeConnector::default();
        let mut link = DeviceLink::new(connector.clone(), 9600);
        let handle = link.connect("COM3").unwrap();
        assert!(link.is_live());
        drop(handle);
        assert!(!link.is_live());
        assert_eq!(connector.count(|e| matches!(e, PortEvent::Close(_))), 1);

        let _again = link.connect("COM3").unwrap();
        assert_eq!(connector.count(|e| matches!(e, PortEvent::Open(_))), 2);
    }

    #[test]
    fn open_failure_is_connection_failed_and_leaves_slot_free() {
        let connector = FakeConnector {
            refuse_opens: 1,
            ..FakeConnector::default()
        };
        let mut link = DeviceLink::new(connector.clone(), 9600);
        let err = link.connect("COM3").err().unwrap();
        assert!(matches!(err, LinkError::ConnectionFailed { .. }));
        assert!(!link.is_live());
        assert!(link.connect("COM3").is_ok());
    }

    #[test]
    fn unplugged_device_reports_write_failed() {
        let connector = FakeConnector {
            writes_before_unplug: Some(1),
            ..FakeConnector::default()
        };
        let mut link = DeviceLink::new(connector.clone(), 9600);
        let mut handle = link.connect("COM3").unwrap();
        assert!(handle.send(b"flash").is_ok());
        let err = handle.send(b"flash").unwrap_err();
        assert!(matches!(err, LinkError::WriteFailed { .. }));
        assert!(err.to_string().contains("COM3"));
    }

    /// Times out `stalls` times before accepting anything.
    struct Stalled {
        stalls: usize,
        written: Vec<u8>,
    }

    impl Write for Stalled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stalls > 0 {
                self.stalls -= 1;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "CTS low"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_cts_stall_does_not_fail_the_write() {
        let mut port = StallTolerant::new(
            Stalled {
                stalls: 3,
                written: Vec::new(),
            },
            Duration::from_secs(5),
        );
        port.write_all(b"flash").unwrap();
        assert_eq!(port.inner.written, b"flash");
    }

    #[test]
    fn stall_past_the_bound_is_reported() {
        let mut port = StallTolerant::new(
            Stalled {
                stalls: usize::MAX,
                written: Vec::new(),
            },
            Duration::from_millis(20),
        );
        let err = port.write_all(b"flash").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(port.inner.written.is_empty());
    }

    #[test]
    fn handle_released_when_caller_panics() {
        let connector = FakeConnector::default();
        let events = connector.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut link = DeviceLink::new(connector, 9600);
            let _handle = link.connect("COM3").unwrap();
            panic!("caller blew up mid-session");
        }));
        assert!(result.is_err());
        assert_eq!(events.count(|e| matches!(e, PortEvent::Close(_))), 1);
    }
}
