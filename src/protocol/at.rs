//! AT command framing.
//!
//! There is no binary structure on the wire; a "frame" is the whole reply
//! block from the echoed command up to and including the final result
//! code. Unsolicited lines (`RING`, `+CMT:`, ...) that arrive outside a
//! reply window are delivered on their own as soon as the line is
//! complete.

use heapless::Vec as BoundedVec;

use crate::device::DeviceAccess;
use crate::error::Error;

use super::{write_all, LinkOptions, Message, Protocol};

/// Type tag put on every assembled reply block.
pub const AT_MSG_TYPE: u8 = 0x01;

const MAX_REPLY: usize = 4096;
const DEFAULT_SPEED: u32 = 19200;

/// Final result codes that close a reply block.
const FINAL_CODES: &[&str] = &[
    "OK",
    "ERROR",
    "CONNECT",
    "NO CARRIER",
    "NO DIALTONE",
    "NO ANSWER",
    "BUSY",
];

const FINAL_PREFIXES: &[&str] = &["+CME ERROR", "+CMS ERROR"];

/// Lines the phone pushes on its own; delivered without waiting for a
/// result code.
const UNSOLICITED_PREFIXES: &[&str] = &[
    "RING", "+CRING", "+CLIP:", "+CMT:", "+CMTI:", "+CBM:", "+CUSD", "+CDS:",
];

pub struct AtProtocol {
    buf: BoundedVec<u8, MAX_REPLY>,
}

impl AtProtocol {
    pub fn new() -> Self {
        AtProtocol {
            buf: BoundedVec::new(),
        }
    }

    fn take_message(&mut self) -> Message {
        let buffer = self.buf.as_slice().to_vec();
        self.buf.clear();
        Message::new(AT_MSG_TYPE, buffer)
    }

    fn last_line(text: &str) -> Option<&str> {
        text.lines().rev().find(|l| !l.trim().is_empty())
    }

    fn is_final_line(line: &str) -> bool {
        let line = line.trim();
        FINAL_CODES.iter().any(|c| line == *c)
            || FINAL_PREFIXES.iter().any(|p| line.starts_with(p))
    }

    fn is_unsolicited_block(text: &str) -> bool {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else {
            return false;
        };
        if lines.next().is_some() {
            return false;
        }
        UNSOLICITED_PREFIXES.iter().any(|p| first.trim().starts_with(p))
    }
}

impl Default for AtProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for AtProtocol {
    fn initialise(
        &mut self,
        device: &mut dyn DeviceAccess,
        link: &LinkOptions,
    ) -> Result<(), Error> {
        self.buf.clear();
        device.set_parity(false)?;
        if !link.skip_dtr_rts {
            device.set_dtr_rts(true, true)?;
        }
        let speed = if link.speed != 0 { link.speed } else { DEFAULT_SPEED };
        device.set_speed(speed)?;
        Ok(())
    }

    fn terminate(&mut self, _device: &mut dyn DeviceAccess) -> Result<(), Error> {
        Ok(())
    }

    fn write_message(
        &mut self,
        device: &mut dyn DeviceAccess,
        payload: &[u8],
        _msg_type: u8,
    ) -> Result<(), Error> {
        // A new command invalidates whatever half-line was pending.
        self.buf.clear();
        write_all(device, payload)
    }

    fn feed(&mut self, _device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        if self.buf.is_empty() && (byte == b'\r' || byte == b'\n') {
            return Ok(None);
        }
        if self.buf.push(byte).is_err() {
            log::debug!("at: reply longer than {MAX_REPLY} bytes, dropping");
            self.buf.clear();
            return Ok(None);
        }
        if byte != b'\n' {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(self.buf.as_slice()).into_owned();
        if let Some(last) = Self::last_line(&text) {
            if Self::is_final_line(last) || Self::is_unsolicited_block(&text) {
                return Ok(Some(self.take_message()));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockDevice;

    fn feed_str(proto: &mut AtProtocol, text: &str) -> Option<Message> {
        let mut device = MockDevice::new();
        let mut out = None;
        for b in text.bytes() {
            if let Some(m) = proto.feed(&mut device, b).unwrap() {
                out = Some(m);
            }
        }
        out
    }

    #[test]
    fn reply_block_closes_on_ok() {
        let mut proto = AtProtocol::new();
        let msg = feed_str(&mut proto, "AT+CGMM\r\r\nNokia 6230i\r\n\r\nOK\r\n").unwrap();
        assert_eq!(msg.msg_type, AT_MSG_TYPE);
        let text = String::from_utf8(msg.buffer).unwrap();
        assert!(text.starts_with("AT+CGMM"));
        assert!(text.trim_end().ends_with("OK"));
    }

    #[test]
    fn cme_error_is_final() {
        let mut proto = AtProtocol::new();
        let msg = feed_str(&mut proto, "AT+CGMI\r\r\n+CME ERROR: 10\r\n").unwrap();
        assert!(String::from_utf8(msg.buffer).unwrap().contains("+CME ERROR"));
    }

    #[test]
    fn ring_is_delivered_alone() {
        let mut proto = AtProtocol::new();
        let msg = feed_str(&mut proto, "\r\nRING\r\n").unwrap();
        assert_eq!(&msg.buffer[..4], b"RING");
    }

    #[test]
    fn partial_reply_stays_buffered() {
        let mut proto = AtProtocol::new();
        assert!(feed_str(&mut proto, "AT+CGMR\r\r\nV 3.42\r\n").is_none());
        assert!(feed_str(&mut proto, "\r\nOK\r\n").is_some());
    }

    #[test]
    fn new_command_discards_stale_bytes() {
        let mut proto = AtProtocol::new();
        let mut device = MockDevice::new();
        assert!(feed_str(&mut proto, "garbage without end").is_none());
        proto.write_message(&mut device, b"AT\r", AT_MSG_TYPE).unwrap();
        assert_eq!(device.written(), b"AT\r");
        let msg = feed_str(&mut proto, "AT\r\r\nOK\r\n").unwrap();
        assert!(String::from_utf8(msg.buffer).unwrap().starts_with("AT"));
    }
}
