//! FBUS version 2 framing, the Nokia cable protocol.
//!
//! Frame layout: `1E dst src type len-hi len-lo payload [pad] chk chk`.
//! The payload of a data frame ends with a `frames-to-go` byte and a
//! sequence byte; multi-frame messages are reassembled until the counter
//! reaches one. Every received data frame is acknowledged on the wire with
//! a type `0x7F` frame, and incoming acks are consumed silently. The two
//! trailing checksums are XORs over the even- and odd-indexed frame bytes;
//! a pad byte keeps the checked region even-sized.

use std::time::Duration;

use heapless::Vec as BoundedVec;

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{write_all, LinkOptions, Message, Protocol};

const FRAME_ID: u8 = 0x1E;
const DEVICE_PHONE: u8 = 0x00;
const DEVICE_HOST: u8 = 0x0C;
const FRAME_TYPE_ACK: u8 = 0x7F;

/// Largest wire payload a single frame may carry (incl. the two trailer
/// bytes).
const MAX_WIRE_PAYLOAD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Dest,
    Src,
    Type,
    LenHi,
    LenLo,
    Payload,
    Pad,
    ChkEven,
    ChkOdd,
}

pub struct Fbus2 {
    state: State,
    msg_type: u8,
    length: usize,
    received: BoundedVec<u8, MAX_WIRE_PAYLOAD>,
    /// Message bytes collected across continuation frames.
    assembled: Vec<u8>,
    xor_even: u8,
    xor_odd: u8,
    pos: usize,
    chk_first: u8,
    seq_out: u8,
}

impl Fbus2 {
    pub fn new() -> Self {
        Fbus2 {
            state: State::Idle,
            msg_type: 0,
            length: 0,
            received: BoundedVec::new(),
            assembled: Vec::new(),
            xor_even: 0,
            xor_odd: 0,
            pos: 0,
            chk_first: 0,
            seq_out: 0,
        }
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.received.clear();
        self.xor_even = 0;
        self.xor_odd = 0;
        self.pos = 0;
    }

    fn accumulate(&mut self, byte: u8) {
        if self.pos % 2 == 0 {
            self.xor_even ^= byte;
        } else {
            self.xor_odd ^= byte;
        }
        self.pos += 1;
    }

    /// Builds one frame. `dest`/`src` are parameters so tests can craft
    /// phone-to-host traffic with the same code that sends.
    pub(crate) fn encode_frame(dest: u8, src: u8, msg_type: u8, wire_payload: &[u8]) -> Vec<u8> {
        let len = wire_payload.len();
        let mut frame = Vec::with_capacity(len + 9);
        frame.push(FRAME_ID);
        frame.push(dest);
        frame.push(src);
        frame.push(msg_type);
        frame.push((len >> 8) as u8);
        frame.push((len & 0xFF) as u8);
        frame.extend_from_slice(wire_payload);
        if len % 2 == 1 {
            frame.push(0x00);
        }
        let mut even = 0u8;
        let mut odd = 0u8;
        for (i, b) in frame.iter().enumerate() {
            if i % 2 == 0 {
                even ^= *b;
            } else {
                odd ^= *b;
            }
        }
        frame.push(even);
        frame.push(odd);
        frame
    }

    fn send_ack(
        &mut self,
        device: &mut dyn DeviceAccess,
        msg_type: u8,
        seq: u8,
    ) -> Result<(), Error> {
        let frame = Self::encode_frame(
            DEVICE_PHONE,
            DEVICE_HOST,
            FRAME_TYPE_ACK,
            &[msg_type, seq & 0x07],
        );
        write_all(device, &frame)
    }

    /// A full, checksummed frame arrived.
    fn complete_frame(&mut self, device: &mut dyn DeviceAccess) -> Result<Option<Message>, Error> {
        if self.msg_type == FRAME_TYPE_ACK {
            log::trace!("fbus2: ack for type 0x{:02X}", self.received.first().copied().unwrap_or(0));
            return Ok(None);
        }
        if self.received.len() < 2 {
            return Ok(None);
        }
        let seq = self.received[self.received.len() - 1];
        let frames_to_go = self.received[self.received.len() - 2];
        self.send_ack(device, self.msg_type, seq)?;
        let chunk = &self.received[..self.received.len() - 2];
        self.assembled.extend_from_slice(chunk);
        if frames_to_go == 0x01 {
            let buffer = std::mem::take(&mut self.assembled);
            return Ok(Some(Message::new(self.msg_type, buffer)));
        }
        Ok(None)
    }
}

impl Default for Fbus2 {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for Fbus2 {
    fn initialise(
        &mut self,
        device: &mut dyn DeviceAccess,
        link: &LinkOptions,
    ) -> Result<(), Error> {
        self.reset();
        self.assembled.clear();
        self.seq_out = 0;

        device.set_parity(false)?;
        if !link.skip_dtr_rts {
            // DTR high / RTS low powers the DLR-3 style cable electronics.
            device.set_dtr_rts(true, false)?;
            if !link.no_power_cable {
                std::thread::sleep(Duration::from_millis(100));
            }
        }
        device.set_speed(115200)?;

        // Wake the phone UART with a run of sync characters.
        write_all(device, &[0x55; 55])?;
        std::thread::sleep(Duration::from_millis(50));
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
        if payload.len() + 2 > MAX_WIRE_PAYLOAD {
            return Err(Error::MoreMemory);
        }
        let seq = 0x40 | self.seq_out;
        self.seq_out = (self.seq_out + 1) & 0x07;
        let mut wire = Vec::with_capacity(payload.len() + 2);
        wire.extend_from_slice(payload);
        wire.push(0x01);
        wire.push(seq);
        let frame = Self::encode_frame(DEVICE_PHONE, DEVICE_HOST, msg_type, &wire);
        write_all(device, &frame)
    }

    fn feed(&mut self, device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        match self.state {
            State::Idle => {
                if byte == FRAME_ID {
                    self.reset();
                    self.accumulate(byte);
                    self.state = State::Dest;
                }
            }
            State::Dest => {
                if byte == DEVICE_HOST {
                    self.accumulate(byte);
                    self.state = State::Src;
                } else {
                    self.reset();
                }
            }
            State::Src => {
                self.accumulate(byte);
                self.state = State::Type;
            }
            State::Type => {
                self.msg_type = byte;
                self.accumulate(byte);
                self.state = State::LenHi;
            }
            State::LenHi => {
                self.length = (byte as usize) << 8;
                self.accumulate(byte);
                self.state = State::LenLo;
            }
            State::LenLo => {
                self.length |= byte as usize;
                self.accumulate(byte);
                if self.length == 0 || self.length > MAX_WIRE_PAYLOAD {
                    self.reset();
                } else {
                    self.state = State::Payload;
                }
            }
            State::Payload => {
                self.accumulate(byte);
                if self.received.push(byte).is_err() {
                    self.reset();
                    return Ok(None);
                }
                if self.received.len() == self.length {
                    self.state = if self.length % 2 == 1 {
                        State::Pad
                    } else {
                        State::ChkEven
                    };
                }
            }
            State::Pad => {
                self.accumulate(byte);
                self.state = State::ChkEven;
            }
            State::ChkEven => {
                self.chk_first = byte;
                self.state = State::ChkOdd;
            }
            State::ChkOdd => {
                let ok = self.chk_first == self.xor_even && byte == self.xor_odd;
                if !ok {
                    log::debug!("fbus2: checksum mismatch, dropping frame");
                    self.reset();
                    return Ok(None);
                }
                let result = self.complete_frame(device);
                self.reset();
                return result;
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockDevice;

    fn feed_all(proto: &mut Fbus2, device: &mut MockDevice, bytes: &[u8]) -> Option<Message> {
        let mut out = None;
        for b in bytes {
            if let Some(msg) = proto.feed(device, *b).unwrap() {
                out = Some(msg);
            }
        }
        out
    }

    #[test]
    fn parses_phone_frame_and_acks_it() {
        let mut proto = Fbus2::new();
        let mut device = MockDevice::new();
        // Payload "ab" + trailer (last frame, seq 0x41).
        let frame = Fbus2::encode_frame(DEVICE_HOST, DEVICE_PHONE, 0x1B, &[b'a', b'b', 0x01, 0x41]);
        let msg = feed_all(&mut proto, &mut device, &frame).expect("complete frame");
        assert_eq!(msg.msg_type, 0x1B);
        assert_eq!(msg.buffer, b"ab");
        // The parser answered with an ack for type 0x1B, sequence 1.
        let expected_ack =
            Fbus2::encode_frame(DEVICE_PHONE, DEVICE_HOST, FRAME_TYPE_ACK, &[0x1B, 0x01]);
        assert_eq!(device.written(), expected_ack);
    }

    #[test]
    fn reassembles_continuation_frames() {
        let mut proto = Fbus2::new();
        let mut device = MockDevice::new();
        let first = Fbus2::encode_frame(DEVICE_HOST, DEVICE_PHONE, 0x14, &[1, 2, 0x02, 0x41]);
        let second = Fbus2::encode_frame(DEVICE_HOST, DEVICE_PHONE, 0x14, &[3, 4, 0x01, 0x42]);
        assert!(feed_all(&mut proto, &mut device, &first).is_none());
        let msg = feed_all(&mut proto, &mut device, &second).expect("assembled");
        assert_eq!(msg.buffer, vec![1, 2, 3, 4]);
    }

    #[test]
    fn corrupted_checksum_is_dropped() {
        let mut proto = Fbus2::new();
        let mut device = MockDevice::new();
        let mut frame = Fbus2::encode_frame(DEVICE_HOST, DEVICE_PHONE, 0x1B, &[9, 9, 0x01, 0x41]);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(feed_all(&mut proto, &mut device, &frame).is_none());
        assert!(device.written().is_empty());
    }

    #[test]
    fn incoming_acks_are_swallowed() {
        let mut proto = Fbus2::new();
        let mut device = MockDevice::new();
        let ack = Fbus2::encode_frame(DEVICE_HOST, DEVICE_PHONE, FRAME_TYPE_ACK, &[0x1B, 0x01]);
        assert!(feed_all(&mut proto, &mut device, &ack).is_none());
        assert!(device.written().is_empty());
    }

    #[test]
    fn noise_before_frame_is_ignored() {
        let mut proto = Fbus2::new();
        let mut device = MockDevice::new();
        let mut stream = vec![0x55, 0x55, 0x00];
        stream.extend(Fbus2::encode_frame(DEVICE_HOST, DEVICE_PHONE, 0x40, &[7, 0x01, 0x43]));
        let msg = feed_all(&mut proto, &mut device, &stream).expect("frame after noise");
        assert_eq!(msg.buffer, vec![7]);
    }
}
