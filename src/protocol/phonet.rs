//! PHONET framing, used by newer Nokia firmware over USB, IrDA and
//! Bluetooth links.
//!
//! Frame layout: `id dst src type len-hi len-lo payload`, no checksum (the
//! underlying link is assumed reliable). The frame id byte differs per
//! link kind, so the registry constructs the right variant.

use heapless::Vec as BoundedVec;

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{write_all, LinkOptions, Message, Protocol};

pub(crate) const FRAME_ID_CABLE: u8 = 0x14;
pub(crate) const FRAME_ID_BLUE: u8 = 0x19;
pub(crate) const FRAME_ID_USB: u8 = 0x1B;

const DEVICE_PHONE: u8 = 0x00;
const DEVICE_HOST: u8 = 0x0C;

const MAX_PAYLOAD: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Dest,
    Src,
    Type,
    LenHi,
    LenLo,
    Payload,
}

pub struct Phonet {
    frame_id: u8,
    state: State,
    msg_type: u8,
    length: usize,
    received: BoundedVec<u8, MAX_PAYLOAD>,
}

impl Phonet {
    fn with_frame_id(frame_id: u8) -> Self {
        Phonet {
            frame_id,
            state: State::Idle,
            msg_type: 0,
            length: 0,
            received: BoundedVec::new(),
        }
    }

    pub fn cable() -> Self {
        Self::with_frame_id(FRAME_ID_CABLE)
    }

    pub fn bluetooth() -> Self {
        Self::with_frame_id(FRAME_ID_BLUE)
    }

    pub fn usb() -> Self {
        Self::with_frame_id(FRAME_ID_USB)
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.received.clear();
    }

    pub(crate) fn encode_frame(
        frame_id: u8,
        dest: u8,
        src: u8,
        msg_type: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut frame = Vec::with_capacity(payload.len() + 6);
        frame.push(frame_id);
        frame.push(dest);
        frame.push(src);
        frame.push(msg_type);
        frame.push((payload.len() >> 8) as u8);
        frame.push((payload.len() & 0xFF) as u8);
        frame.extend_from_slice(payload);
        frame
    }
}

impl Protocol for Phonet {
    fn initialise(
        &mut self,
        device: &mut dyn DeviceAccess,
        link: &LinkOptions,
    ) -> Result<(), Error> {
        self.reset();
        if self.frame_id == FRAME_ID_BLUE {
            // The Bluetooth bridge wants one hello frame before it starts
            // relaying traffic.
            let hello = Self::encode_frame(self.frame_id, DEVICE_PHONE, DEVICE_HOST, 0xD0, &[0x00, 0x01]);
            write_all(device, &hello)?;
        } else if !link.skip_dtr_rts {
            device.set_dtr_rts(true, true)?;
        }
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
        let frame = Self::encode_frame(self.frame_id, DEVICE_PHONE, DEVICE_HOST, msg_type, payload);
        write_all(device, &frame)
    }

    fn feed(&mut self, _device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        match self.state {
            State::Idle => {
                if byte == self.frame_id {
                    self.reset();
                    self.state = State::Dest;
                }
            }
            State::Dest => {
                if byte == DEVICE_HOST {
                    self.state = State::Src;
                } else {
                    self.reset();
                }
            }
            State::Src => {
                self.state = State::Type;
            }
            State::Type => {
                self.msg_type = byte;
                self.state = State::LenHi;
            }
            State::LenHi => {
                self.length = (byte as usize) << 8;
                self.state = State::LenLo;
            }
            State::LenLo => {
                self.length |= byte as usize;
                if self.length > MAX_PAYLOAD {
                    self.reset();
                } else if self.length == 0 {
                    let msg = Message::new(self.msg_type, Vec::new());
                    self.reset();
                    return Ok(Some(msg));
                } else {
                    self.state = State::Payload;
                }
            }
            State::Payload => {
                if self.received.push(byte).is_err() {
                    self.reset();
                    return Ok(None);
                }
                if self.received.len() == self.length {
                    let msg = Message::new(self.msg_type, self.received.as_slice().to_vec());
                    self.reset();
                    return Ok(Some(msg));
                }
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
    fn parses_cable_frame() {
        let mut proto = Phonet::cable();
        let mut device = MockDevice::new();
        let frame =
            Phonet::encode_frame(FRAME_ID_CABLE, DEVICE_HOST, DEVICE_PHONE, 0x1B, &[1, 2, 3]);
        let mut msg = None;
        for b in frame {
            if let Some(m) = proto.feed(&mut device, b).unwrap() {
                msg = Some(m);
            }
        }
        let msg = msg.expect("complete frame");
        assert_eq!(msg.msg_type, 0x1B);
        assert_eq!(msg.buffer, vec![1, 2, 3]);
    }

    #[test]
    fn wrong_frame_id_is_noise() {
        let mut proto = Phonet::bluetooth();
        let mut device = MockDevice::new();
        let frame =
            Phonet::encode_frame(FRAME_ID_CABLE, DEVICE_HOST, DEVICE_PHONE, 0x1B, &[1, 2, 3]);
        for b in frame {
            assert!(proto.feed(&mut device, b).unwrap().is_none());
        }
    }

    #[test]
    fn empty_payload_completes_at_length() {
        let mut proto = Phonet::usb();
        let mut device = MockDevice::new();
        let frame = Phonet::encode_frame(FRAME_ID_USB, DEVICE_HOST, DEVICE_PHONE, 0x7E, &[]);
        let mut msg = None;
        for b in frame {
            if let Some(m) = proto.feed(&mut device, b).unwrap() {
                msg = Some(m);
            }
        }
        assert_eq!(msg.expect("frame").len(), 0);
    }
}
