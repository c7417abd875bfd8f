//! Serial port seam for the modem link.
//!
//! The AT channel only needs two primitives: write everything, and read
//! whatever is pending without blocking. The host implementation sits on the
//! `serialport` crate; the ESP32 one on the UART driver (see `uart`).

use std::io;

/// Half-duplex byte pipe to the modem.
pub trait SerialPort: Send {
    /// Write all bytes, blocking until they are queued for transmission.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Read pending bytes into `buf`.
    ///
    /// Must not block; returns `Ok(0)` when nothing is waiting.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: SerialPort + ?Sized> SerialPort for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }
}

/// Stand-in when no modem is attached; every write fails immediately so
/// cellular probes report unavailable without waiting out timeouts.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unplugged;

impl SerialPort for Unplugged {
    fn write_all(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::NotConnected, "no modem attached"))
    }

    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

/// Default modem baud rate (SIM800 autobaud settles here).
pub const DEFAULT_BAUD: u32 = 9600;

#[cfg(not(target_os = "espidf"))]
pub use host::{find_modem_port, HostSerial, MODEM_PORT_PATTERNS};

#[cfg(not(target_os = "espidf"))]
mod host {
    use super::SerialPort;
    use log::{debug, info};
    use std::io::{self, Read, Write};
    use std::time::Duration;

    /// Device paths a USB-serial modem adapter typically shows up under.
    pub const MODEM_PORT_PATTERNS: &[&str] = &[
        "/dev/ttyUSB*",
        "/dev/ttyACM*",
        "/dev/cu.usbserial*",
        "/dev/cu.SLAB_USBtoUART*",
        "/dev/cu.wchusbserial*",
    ];

    /// Modem attached to the host through a serial adapter.
    pub struct HostSerial {
        port: Box<dyn serialport::SerialPort>,
    }

    impl HostSerial {
        /// Open `path` at `baud`.
        pub fn open(path: &str, baud: u32) -> io::Result<Self> {
            let port = serialport::new(path, baud)
                .timeout(Duration::from_millis(1))
                .open()
                .map_err(io::Error::from)?;
            info!("Opened modem port {} at {} baud", path, baud);
            Ok(Self { port })
        }
    }

    impl SerialPort for HostSerial {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.port.write_all(bytes)?;
            self.port.flush()
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let pending = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
            if pending == 0 || buf.is_empty() {
                return Ok(0);
            }
            let want = pending.min(buf.len());
            match self.port.read(&mut buf[..want]) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e),
            }
        }
    }

    /// First existing device matching [`MODEM_PORT_PATTERNS`].
    pub fn find_modem_port() -> Option<String> {
        for pattern in MODEM_PORT_PATTERNS {
            let Ok(paths) = glob::glob(pattern) else {
                continue;
            };
            if let Some(path) = paths.flatten().next() {
                let path = path.display().to_string();
                debug!("Modem port candidate: {}", path);
                return Some(path);
            }
        }
        None
    }
}
