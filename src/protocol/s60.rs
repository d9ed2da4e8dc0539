//! Line framing for the Series 60 companion applet: `<id>:<payload>\n`.
//! Frame ids are decimal numbers, which is why the dispatcher has a
//! dedicated long-id match kind for this protocol family.

use heapless::Vec as BoundedVec;

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{write_all, LinkOptions, Message, Protocol};

const MAX_LINE: usize = 4096;

pub struct S60Protocol {
    buf: BoundedVec<u8, MAX_LINE>,
}

impl S60Protocol {
    pub fn new() -> Self {
        S60Protocol {
            buf: BoundedVec::new(),
        }
    }

    fn parse_line(line: &[u8]) -> Option<Message> {
        let sep = line.iter().position(|b| *b == b':')?;
        let id = std::str::from_utf8(&line[..sep]).ok()?.trim();
        let id: u8 = id.parse().ok()?;
        Some(Message::new(id, line[sep + 1..].to_vec()))
    }
}

impl Default for S60Protocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for S60Protocol {
    fn initialise(
        &mut self,
        _device: &mut dyn DeviceAccess,
        _link: &LinkOptions,
    ) -> Result<(), Error> {
        self.buf.clear();
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
        let mut line = format!("{msg_type}:").into_bytes();
        line.extend_from_slice(payload);
        line.push(b'\n');
        write_all(device, &line)
    }

    fn feed(&mut self, _device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        if byte == b'\n' {
            let msg = Self::parse_line(self.buf.as_slice());
            if msg.is_none() && !self.buf.is_empty() {
                log::debug!("s60: malformed line, dropping");
            }
            self.buf.clear();
            return Ok(msg);
        }
        if self.buf.push(byte).is_err() {
            self.buf.clear();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockDevice;

    #[test]
    fn numbered_lines_become_messages() {
        let mut proto = S60Protocol::new();
        let mut device = MockDevice::new();
        let mut msg = None;
        for b in b"17:Nokia|E52|031.012\n" {
            if let Some(m) = proto.feed(&mut device, *b).unwrap() {
                msg = Some(m);
            }
        }
        let msg = msg.expect("line");
        assert_eq!(msg.msg_type, 17);
        assert_eq!(msg.buffer, b"Nokia|E52|031.012");
    }

    #[test]
    fn malformed_lines_are_dropped() {
        let mut proto = S60Protocol::new();
        let mut device = MockDevice::new();
        for b in b"not a frame\n" {
            assert!(proto.feed(&mut device, *b).unwrap().is_none());
        }
    }
}
