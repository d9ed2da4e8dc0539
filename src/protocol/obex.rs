//! OBEX packet framing: `opcode len-hi len-lo fields...`, where the length
//! covers the whole packet. The opcode doubles as the message type; the
//! session logic (connect, capability fetches) lives in the OBEX phone
//! module.

use heapless::Vec as BoundedVec;

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{write_all, LinkOptions, Message, Protocol};

const MAX_PACKET: usize = 4096;
const HEADER_LEN: usize = 3;

pub struct ObexProtocol {
    buf: BoundedVec<u8, MAX_PACKET>,
    expected: usize,
}

impl ObexProtocol {
    pub fn new() -> Self {
        ObexProtocol {
            buf: BoundedVec::new(),
            expected: 0,
        }
    }

    pub(crate) fn encode_packet(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let total = payload.len() + HEADER_LEN;
        let mut packet = Vec::with_capacity(total);
        packet.push(opcode);
        packet.push((total >> 8) as u8);
        packet.push((total & 0xFF) as u8);
        packet.extend_from_slice(payload);
        packet
    }
}

impl Default for ObexProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for ObexProtocol {
    fn initialise(
        &mut self,
        _device: &mut dyn DeviceAccess,
        _link: &LinkOptions,
    ) -> Result<(), Error> {
        self.buf.clear();
        self.expected = 0;
        Ok(())
    }

    fn terminate(&mut self, _device: &mut dyn DeviceAccess) -> Result<(), Error> {
        Ok(())
    }

    fn write_message(
        &mut self,
        device: &mut dyn DeviceAccess,
        payload: &[u8],
        msg_type: u8,
    ) -> Result<(), Error> {
        if payload.len() + HEADER_LEN > MAX_PACKET {
            return Err(Error::MoreMemory);
        }
        write_all(device, &Self::encode_packet(msg_type, payload))
    }

    fn feed(&mut self, _device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        if self.buf.push(byte).is_err() {
            self.buf.clear();
            self.expected = 0;
            return Ok(None);
        }
        if self.buf.len() == HEADER_LEN {
            self.expected = ((self.buf[1] as usize) << 8) | self.buf[2] as usize;
            if self.expected < HEADER_LEN || self.expected > MAX_PACKET {
                log::debug!("obex: implausible packet length {}", self.expected);
                self.buf.clear();
                self.expected = 0;
                return Ok(None);
            }
        }
        if self.expected != 0 && self.buf.len() == self.expected {
            let msg = Message::new(self.buf[0], self.buf[HEADER_LEN..].to_vec());
            self.buf.clear();
            self.expected = 0;
            return Ok(Some(msg));
        }
        Ok(None)
    }
}
