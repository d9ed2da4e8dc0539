//! MBUS version 2 framing, the old single-wire Nokia service bus.
//!
//! Frame layout: `1F dst src type len-hi len-lo payload seq chk`, one XOR
//! checksum over everything before it. The bus runs at 9600 baud with odd
//! parity and no handshaking.

use std::time::Duration;

use heapless::Vec as BoundedVec;

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{write_all, LinkOptions, Message, Protocol};

const FRAME_ID: u8 = 0x1F;
const DEVICE_PHONE: u8 = 0x00;
const DEVICE_HOST: u8 = 0x1D;

const MAX_PAYLOAD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Dest,
    Src,
    Type,
    LenHi,
    LenLo,
    Payload,
    Seq,
    Chk,
}

pub struct Mbus2 {
    state: State,
    msg_type: u8,
    length: usize,
    received: BoundedVec<u8, MAX_PAYLOAD>,
    xor: u8,
    seq_out: u8,
}

impl Mbus2 {
    pub fn new() -> Self {
        Mbus2 {
            state: State::Idle,
            msg_type: 0,
            length: 0,
            received: BoundedVec::new(),
            xor: 0,
            seq_out: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.received.clear();
        self.xor = 0;
    }

    pub(crate) fn encode_frame(dest: u8, src: u8, msg_type: u8, payload: &[u8], seq: u8) -> Vec<u8> {
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.push(FRAME_ID);
        frame.push(dest);
        frame.push(src);
        frame.push(msg_type);
        frame.push((payload.len() >> 8) as u8);
        frame.push((payload.len() & 0xFF) as u8);
        frame.extend_from_slice(payload);
        frame.push(seq);
        let chk = frame.iter().fold(0u8, |acc, b| acc ^ b);
        frame.push(chk);
        frame
    }
}

impl Default for Mbus2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for Mbus2 {
    fn initialise(
        &mut self,
        device: &mut dyn DeviceAccess,
        link: &LinkOptions,
    ) -> Result<(), Error> {
        self.reset();
        self.seq_out = 0;

        device.set_parity(true)?;
        if !link.skip_dtr_rts {
            // The bus is driven through TX only; keep both lines down.
            device.set_dtr_rts(false, false)?;
        }
        device.set_speed(9600)?;
        std::thread::sleep(Duration::from_millis(200));
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
        self.seq_out = self.seq_out.wrapping_add(1);
        let frame = Self::encode_frame(DEVICE_PHONE, DEVICE_HOST, msg_type, payload, self.seq_out);
        write_all(device, &frame)
    }

    fn feed(&mut self, _device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        match self.state {
            State::Idle => {
                if byte == FRAME_ID {
                    self.reset();
                    self.xor = byte;
                    self.state = State::Dest;
                }
            }
            State::Dest => {
                if byte == DEVICE_HOST {
                    self.xor ^= byte;
                    self.state = State::Src;
                } else {
                    self.reset();
                }
            }
            State::Src => {
                self.xor ^= byte;
                self.state = State::Type;
            }
            State::Type => {
                self.msg_type = byte;
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
                    self.state = State::Seq;
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
                    self.state = State::Seq;
                }
            }
            State::Seq => {
                self.xor ^= byte;
                self.state = State::Chk;
            }
            State::Chk => {
                let ok = byte == self.xor;
                if !ok {
                    log::debug!("mbus2: checksum mismatch, dropping frame");
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
