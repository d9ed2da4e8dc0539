//! Null framing for the `none` connection: nothing goes out, nothing is
//! expected back.

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{LinkOptions, Message, Protocol};

#[derive(Debug, Default)]
pub struct NoProtocol;

impl NoProtocol {
    pub fn new() -> Self {
        NoProtocol
    }
}

impl Protocol for NoProtocol {
    fn initialise(
        &mut self,
        _device: &mut dyn DeviceAccess,
        _link: &LinkOptions,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn terminate(&mut self, _device: &mut dyn DeviceAccess) -> Result<(), Error> {
        Ok(())
    }

    fn write_message(
        &mut self,
        _device: &mut dyn DeviceAccess,
        _payload: &[u8],
        _msg_type: u8,
    ) -> Result<(), Error> {
        Ok(())
    }

    fn feed(
        &mut self,
        _device: &mut dyn DeviceAccess,
        _byte: u8,
    ) -> Result<Option<Message>, Error> {
        Ok(None)
    }
}
