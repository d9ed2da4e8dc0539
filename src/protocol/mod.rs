//! Wire framings.
//!
//! A protocol turns outgoing `(type, payload)` pairs into frames on the
//! device and reassembles incoming bytes into [`Message`]s. Parsers are fed
//! one byte at a time; a `Some(message)` return hands a complete frame to
//! the coordinator. Framings that acknowledge on the wire (FBUS) get the
//! device handle during reception for exactly that purpose.

#[cfg(feature = "at")]
pub mod at;
#[cfg(feature = "fbus2")]
pub mod fbus2;
#[cfg(feature = "gnapbus")]
pub mod gnapbus;
#[cfg(feature = "mbus2")]
pub mod mbus2;
pub mod none;
#[cfg(feature = "obex")]
pub mod obex;
#[cfg(feature = "phonet")]
pub mod phonet;
#[cfg(feature = "s60")]
pub mod s60;

use crate::device::DeviceAccess;
use crate::error::Error;

/// One reassembled frame: the protocol-level type tag plus the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u8,
    pub buffer: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: u8, buffer: Vec<u8>) -> Self {
        Message { msg_type, buffer }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Link parameters the framing needs when bringing the device up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkOptions {
    /// Leave DTR/RTS alone (`-nodtr` cables, IrDA dongles).
    pub skip_dtr_rts: bool,
    /// Cable is not powered from the control lines (`-nopower`).
    pub no_power_cable: bool,
    /// Serial speed override from the connection string; 0 keeps the
    /// framing's default.
    pub speed: u32,
}

pub trait Protocol {
    /// Prepares the link: speed, parity, control lines, sync traffic.
    fn initialise(&mut self, device: &mut dyn DeviceAccess, link: &LinkOptions)
        -> Result<(), Error>;

    /// Shuts the framing down; the device stays open.
    fn terminate(&mut self, device: &mut dyn DeviceAccess) -> Result<(), Error>;

    /// Frames and writes one message.
    fn write_message(
        &mut self,
        device: &mut dyn DeviceAccess,
        payload: &[u8],
        msg_type: u8,
    ) -> Result<(), Error>;

    /// Consumes one received byte; returns a message when it completed a
    /// frame.
    fn feed(&mut self, device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error>;
}

/// Writes the whole buffer, turning short writes into a loop.
pub(crate) fn write_all(device: &mut dyn DeviceAccess, mut data: &[u8]) -> Result<(), Error> {
    while !data.is_empty() {
        let n = device.write(data)?;
        if n == 0 {
            return Err(Error::DeviceWriteError);
        }
        data = &data[n..];
    }
    Ok(())
}
