//! Serial port driver on top of the `serialport` crate. Covers real UARTs
//! as well as USB CDC-ACM bridges and rfcomm/ircomm ttys bound by the
//! Bluetooth or IrDA stack.

use std::io::Read;
use std::time::Duration;

use serialport::{ClearBuffer, Parity, SerialPort};

use crate::error::Error;

use super::DeviceAccess;

/// Read timeout; short so the engine's own poll loop stays in charge of
/// waiting.
const READ_TIMEOUT: Duration = Duration::from_millis(10);
const OPEN_SPEED: u32 = 19200;

#[derive(Default)]
pub struct SerialDevice {
    port: Option<Box<dyn SerialPort>>,
}

impl SerialDevice {
    pub fn new() -> Self {
        SerialDevice { port: None }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, Error> {
        self.port.as_mut().ok_or(Error::NotConnected)
    }
}

fn map_open_error(err: &serialport::Error) -> Error {
    match err.kind() {
        serialport::ErrorKind::NoDevice => Error::DeviceNotExist,
        serialport::ErrorKind::InvalidInput => Error::DeviceNotExist,
        serialport::ErrorKind::Io(kind) => match kind {
            std::io::ErrorKind::NotFound => Error::DeviceNotExist,
            std::io::ErrorKind::PermissionDenied => Error::DeviceNoPermission,
            std::io::ErrorKind::ResourceBusy => Error::DeviceBusy,
            _ => Error::DeviceOpenError,
        },
        _ => Error::DeviceOpenError,
    }
}

impl DeviceAccess for SerialDevice {
    fn open(&mut self, path: &str) -> Result<(), Error> {
        let port = serialport::new(path, OPEN_SPEED)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| {
                log::debug!("serial: opening {path} failed: {e}");
                map_open_error(&e)
            })?;
        let _ = port.clear(ClearBuffer::All);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.port = None;
        Ok(())
    }

    fn set_speed(&mut self, speed: u32) -> Result<(), Error> {
        self.port_mut()?
            .set_baud_rate(speed)
            .map_err(|_| Error::DeviceChangeSpeedError)
    }

    fn set_parity(&mut self, odd: bool) -> Result<(), Error> {
        let parity = if odd { Parity::Odd } else { Parity::None };
        self.port_mut()?
            .set_parity(parity)
            .map_err(|_| Error::DeviceNotWork)
    }

    fn set_dtr_rts(&mut self, dtr: bool, rts: bool) -> Result<(), Error> {
        let port = self.port_mut()?;
        port.write_data_terminal_ready(dtr)
            .and_then(|_| port.write_request_to_send(rts))
            .map_err(|_| Error::DeviceDtrRtsError)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let port = self.port_mut()?;
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(_) => Err(Error::DeviceReadError),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        let port = self.port_mut()?;
        std::io::Write::write(port, buf).map_err(|_| Error::DeviceWriteError)
    }
}
