//! The no-hardware device behind the `none` connection: always opens,
//! never has data.

use crate::error::Error;

use super::DeviceAccess;

#[derive(Debug, Default)]
pub struct NoneDevice;

impl NoneDevice {
    pub fn new() -> Self {
        NoneDevice
    }
}

impl DeviceAccess for NoneDevice {
    fn open(&mut self, _path: &str) -> Result<(), Error> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn set_speed(&mut self, _speed: u32) -> Result<(), Error> {
        Ok(())
    }

    fn set_parity(&mut self, _odd: bool) -> Result<(), Error> {
        Ok(())
    }

    fn set_dtr_rts(&mut self, _dtr: bool, _rts: bool) -> Result<(), Error> {
        Ok(())
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Error> {
        Ok(0)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        Ok(buf.len())
    }
}
