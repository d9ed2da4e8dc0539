//! GNAPBUS framing for the Nokia gnapplet companion application:
//! `47 4E type 00 len-hi len-lo payload chk`, one XOR checksum.

use heapless::Vec as BoundedVec;

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{write_all, LinkOptions, Message, Protocol};

const MAGIC: [u8; 2] = [0x47, 0x4E]; // "GN"

const MAX_PAYLOAD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Magic2,
    Type,
    Reserved,
    LenHi,
    LenLo,
    Payload,
    Chk,
}

pub struct Gnapbus {
    state: State,
    msg_type: u8,
    length: usize,
    received: BoundedVec<u8, MAX_PAYLOAD>,
    xor: u8,
}

impl Gnapbus {
    pub fn new() -> Self {
        Gnapbus {
            state: State::Idle,
            msg_type: 0,
            length: 0,
            received: BoundedVec::new(),
            xor: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.received.clear();
        self.xor = 0;
    }

    pub(crate) fn encode_frame(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(payload.len() + 7);
        frame.extend_from_slice(&MAGIC);
        frame.push(msg_type);
        frame.push(0x00);
        frame.push((payload.len() >> 8) as u8);
        frame.push((payload.len() & 0xFF) as u8);
        frame.extend_from_slice(payload);
        let chk = frame.iter().fold(0u8, |acc, b| acc ^ b);
        frame.push(chk);
        frame
    }
}

impl Default for Gnapbus {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for Gnapbus {
    fn initialise(
        &mut self,
        _device: &mut dyn DeviceAccess,
        _link: &LinkOptions,
    ) -> Result<(), Error> {
        self.reset();
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
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::MoreMemory);
        }
        write_all(device, &Self::encode_frame(msg_type, payload))
    }

    fn feed(&mut self, _device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        match self.state {
            State::Idle => {
                if byte == MAGIC[0] {
                    self.reset();
                    self.xor = byte;
                    self.state = State::Magic2;
                }
            }
            State::Magic2 => {
                if byte == MAGIC[1] {
                    self.xor ^= byte;
                    self.state = State::Type;
                } else {
                    self.reset();
                }
            }
            State::Type => {
                self.msg_type = byte;
                self.xor ^= byte;
                self.state = State::Reserved;
            }
            State::Reserved => {
                self.xor ^= byte;
                self.state = State::LenHi;
            }
            State::LenHi => {
                self.length = (byte as usize) << 8;
                self.xor ^= byte;
                self.state = State::LenLo;
            }
            State::LenLo => {
                self.length |= byte as usize;
                self.xor ^= byte;
                if self.length > MAX_PAYLOAD {
                    self.reset();
                } else if self.length == 0 {
                    self.state = State::Chk;
                } else {
                    self.state = State::Payload;
                }
            }
            State::Payload => {
                self.xor ^= byte;
                if self.received.push(byte).is_err() {
                    self.reset();
                    return Ok(None);
                }
                if self.received.len() == self.length {
                    self.state = State::Chk;
                }
            }
            State::Chk => {
                let ok = byte == self.xor;
                if !ok {
                    log::debug!("gnapbus: checksum mismatch, dropping frame");
                    self.reset();
                    return Ok(None);
                }
                let msg = Message::new(self.msg_type, self.received.as_slice().to_vec());
                self.reset();
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockDevice;

    #[test]
    fn frame_round_trip() {
        let mut proto = Gnapbus::new();
        let mut device = MockDevice::new();
        let frame = Gnapbus::encode_frame(0x02, &[0x00, 0x02, b'E', b'5', b'2']);
        let mut msg = None;
        for b in frame {
            if let Some(m) = proto.feed(&mut device, b).unwrap() {
                msg = Some(m);
            }
        }
        let msg = msg.expect("frame");
        assert_eq!(msg.msg_type, 0x02);
        assert_eq!(&msg.buffer[2..], b"E52");
    }
}
