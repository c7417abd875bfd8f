//! UART-backed modem port for the ESP32.

use super::serial::{SerialPort, DEFAULT_BAUD};
use esp_idf_hal::delay::NON_BLOCK;
use esp_idf_hal::gpio::{AnyIOPin, InputPin, OutputPin};
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::uart::{config::Config, Uart, UartDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_sys::EspError;
use std::io;

/// Modem on a hardware UART (TX gpio17 / RX gpio16 on the reference board).
pub struct UartSerial<'d> {
    driver: UartDriver<'d>,
}

impl<'d> UartSerial<'d> {
    pub fn new(
        uart: impl Peripheral<P = impl Uart> + 'd,
        tx: impl Peripheral<P = impl OutputPin> + 'd,
        rx: impl Peripheral<P = impl InputPin> + 'd,
    ) -> Result<Self, EspError> {
        let config = Config::new().baudrate(Hertz(DEFAULT_BAUD));
        let driver = UartDriver::new(
            uart,
            tx,
            rx,
            Option::<AnyIOPin>::None,
            Option::<AnyIOPin>::None,
            &config,
        )?;
        Ok(Self { driver })
    }
}

fn to_io(e: EspError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("UART error: {:?}", e))
}

impl SerialPort for UartSerial<'_> {
    fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            let written = self.driver.write(bytes).map_err(to_io)?;
            bytes = &bytes[written..];
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.driver.read(buf, NON_BLOCK) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == esp_idf_sys::ESP_ERR_TIMEOUT as i32 => Ok(0),
            Err(e) => Err(to_io(e)),
        }
    }
}
