//! Generic AT module: identity queries over the standard 07.07 command
//! set, clock access over `+CCLK`, and delivery of unsolicited lines to
//! the user callbacks.
//!
//! Reply matching keys on the echoed command, so initialisation forces
//! echo on with `ATE1`.

use chrono::NaiveDateTime;

use crate::dispatch::{self, FramePattern, ReplyEntry, RequestId};
use crate::error::Error;
use crate::phones;
use crate::protocol::at::AT_MSG_TYPE;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::PhoneModule;

const REPLY_TIMEOUT: u32 = 4;

#[derive(Debug, Default)]
pub struct AtGen;

impl AtGen {
    pub const MODELS: &'static str = "atgen at";

    pub fn new() -> Self {
        AtGen
    }

    const REPLIES: &'static [ReplyEntry<AtGen>] = &[
        ReplyEntry {
            pattern: FramePattern::Prefix(b"AT+CGMM"),
            request: RequestId::GetModel,
            handler: AtGen::reply_get_model,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"AT+CGMI"),
            request: RequestId::GetManufacturer,
            handler: AtGen::reply_get_manufacturer,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"AT+CGMR"),
            request: RequestId::GetFirmware,
            handler: AtGen::reply_get_firmware,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"AT+CGSN"),
            request: RequestId::GetImei,
            handler: AtGen::reply_get_imei,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"AT+CCLK?"),
            request: RequestId::GetDateTime,
            handler: AtGen::reply_get_date_time,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"AT+CCLK="),
            request: RequestId::SetDateTime,
            handler: AtGen::reply_generic,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"ATE1"),
            request: RequestId::Initialise,
            handler: AtGen::reply_generic,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"AT\r"),
            request: RequestId::Initialise,
            handler: AtGen::reply_generic,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"RING"),
            request: RequestId::IncomingFrame,
            handler: AtGen::reply_ring,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"+CRING"),
            request: RequestId::IncomingFrame,
            handler: AtGen::reply_ring,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"+CLIP:"),
            request: RequestId::IncomingFrame,
            handler: AtGen::reply_clip,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"+CUSD"),
            request: RequestId::IncomingFrame,
            handler: AtGen::reply_ussd,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"+CMT:"),
            request: RequestId::IncomingFrame,
            handler: AtGen::reply_incoming_sms,
        },
        ReplyEntry {
            pattern: FramePattern::Prefix(b"+CBM:"),
            request: RequestId::IncomingFrame,
            handler: AtGen::reply_incoming_cb,
        },
    ];

    /// Non-empty trimmed lines of a reply block plus whether it ended in
    /// `OK`.
    fn reply_text(msg: &Message) -> (Vec<String>, bool) {
        let text = String::from_utf8_lossy(&msg.buffer);
        let lines: Vec<String> = text
            .lines()
            .map(|l| l.trim().to_owned())
            .filter(|l| !l.is_empty())
            .collect();
        let ok = lines.last().map(|l| l == "OK").unwrap_or(false);
        (lines, ok)
    }

    /// First line that is neither the echo nor a status line.
    fn payload_line(lines: &[String]) -> Option<String> {
        lines
            .iter()
            .find(|line| {
                let upper = line.to_ascii_uppercase();
                !upper.starts_with("AT")
                    && upper != "OK"
                    && upper != "ERROR"
                    && !upper.starts_with("+CME ERROR")
                    && !upper.starts_with("+CMS ERROR")
            })
            .map(|line| strip_response_header(line).trim_matches('"').to_owned())
    }

    fn reply_generic(&mut self, msg: &Message, _s: &mut StateMachine) -> Result<(), Error> {
        let (lines, ok) = Self::reply_text(msg);
        if ok {
            return Ok(());
        }
        match lines.last() {
            Some(last)
                if last == "ERROR"
                    || last.starts_with("+CME ERROR")
                    || last.starts_with("+CMS ERROR") =>
            {
                Err(Error::NotSupported)
            }
            _ => Err(Error::UnknownResponse),
        }
    }

    fn reply_get_model(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let (lines, ok) = Self::reply_text(msg);
        if !ok {
            return Err(Error::NotSupported);
        }
        let Some(model) = Self::payload_line(&lines) else {
            return Err(Error::UnknownResponse);
        };
        s.trace(&format!("phone model: \"{model}\""));
        let data = s.phone_data_mut();
        data.model = model;
        let entry = phones::model_data(&data.model);
        data.model_info = Some(entry.into());
        Ok(())
    }

    fn reply_get_manufacturer(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let (lines, ok) = Self::reply_text(msg);
        if !ok {
            return Err(Error::NotSupported);
        }
        let Some(manufacturer) = Self::payload_line(&lines) else {
            return Err(Error::UnknownResponse);
        };
        s.phone_data_mut().manufacturer = manufacturer;
        Ok(())
    }

    fn reply_get_firmware(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let (lines, ok) = Self::reply_text(msg);
        if !ok {
            return Err(Error::NotSupported);
        }
        let Some(version) = Self::payload_line(&lines) else {
            return Err(Error::UnknownResponse);
        };
        let data = s.phone_data_mut();
        data.ver_num = parse_version_number(&version);
        data.version = version;
        Ok(())
    }

    fn reply_get_imei(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let (lines, ok) = Self::reply_text(msg);
        if !ok {
            return Err(Error::NotSupported);
        }
        let Some(imei) = Self::payload_line(&lines) else {
            return Err(Error::UnknownResponse);
        };
        s.phone_data_mut().imei = imei;
        Ok(())
    }

    fn reply_get_date_time(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let (lines, ok) = Self::reply_text(msg);
        if !ok {
            return Err(Error::NotSupported);
        }
        let Some(value) = Self::payload_line(&lines) else {
            return Err(Error::UnknownResponse);
        };
        // "yy/MM/dd,hh:mm:ss" with an optional zone suffix.
        let clock = value
            .split_once(['+', '-'])
            .map(|(head, _)| head)
            .unwrap_or_else(|| value.as_str());
        match NaiveDateTime::parse_from_str(clock, "%y/%m/%d,%H:%M:%S") {
            Ok(when) => {
                s.phone_data_mut().date_time = Some(when);
                Ok(())
            }
            Err(_) => Err(Error::UnknownResponse),
        }
    }

    fn reply_ring(&mut self, _msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        if s.phone_data().enable_incoming_call {
            let mut callback = s.user_mut().incoming_call.take();
            if let Some(f) = callback.as_mut() {
                f("");
            }
            if s.user_mut().incoming_call.is_none() {
                s.user_mut().incoming_call = callback;
            }
        }
        Ok(())
    }

    fn reply_clip(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        if s.phone_data().enable_incoming_call {
            let text = String::from_utf8_lossy(&msg.buffer);
            let number = quoted_field(&text).unwrap_or_default();
            let mut callback = s.user_mut().incoming_call.take();
            if let Some(f) = callback.as_mut() {
                f(&number);
            }
            if s.user_mut().incoming_call.is_none() {
                s.user_mut().incoming_call = callback;
            }
        }
        Ok(())
    }

    fn reply_ussd(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        if s.phone_data().enable_incoming_ussd {
            let text = String::from_utf8_lossy(&msg.buffer);
            let content = quoted_field(&text).unwrap_or_default();
            let mut callback = s.user_mut().incoming_ussd.take();
            if let Some(f) = callback.as_mut() {
                f(&content);
            }
            if s.user_mut().incoming_ussd.is_none() {
                s.user_mut().incoming_ussd = callback;
            }
        }
        Ok(())
    }

    fn reply_incoming_sms(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        if s.phone_data().enable_incoming_sms {
            // The PDU rides on the line after the +CMT header.
            let text = String::from_utf8_lossy(&msg.buffer).into_owned();
            let pdu = text.lines().nth(1).unwrap_or("").trim().as_bytes().to_vec();
            let mut callback = s.user_mut().incoming_sms.take();
            if let Some(f) = callback.as_mut() {
                f(&pdu);
            }
            if s.user_mut().incoming_sms.is_none() {
                s.user_mut().incoming_sms = callback;
            }
        }
        Ok(())
    }

    fn reply_incoming_cb(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        if s.phone_data().enable_incoming_cb {
            let text = String::from_utf8_lossy(&msg.buffer).into_owned();
            let pdu = text.lines().nth(1).unwrap_or("").trim().as_bytes().to_vec();
            let mut callback = s.user_mut().incoming_cb.take();
            if let Some(f) = callback.as_mut() {
                f(&pdu);
            }
            if s.user_mut().incoming_cb.is_none() {
                s.user_mut().incoming_cb = callback;
            }
        }
        Ok(())
    }
}

fn strip_response_header(line: &str) -> &str {
    if line.starts_with('+') {
        if let Some((_, rest)) = line.split_once(':') {
            return rest.trim();
        }
    }
    line
}

/// First numeric run in a version string, as the comparable firmware
/// number (e.g. `V 03.42` -> 3.42).
fn parse_version_number(version: &str) -> f64 {
    let start = version.find(|c: char| c.is_ascii_digit());
    let Some(start) = start else {
        return 0.0;
    };
    let tail = &version[start..];
    let end = tail
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(tail.len());
    tail[..end].parse().unwrap_or(0.0)
}

fn quoted_field(text: &str) -> Option<String> {
    let open = text.find('"')?;
    let rest = &text[open + 1..];
    let close = rest.find('"')?;
    Some(rest[..close].to_owned())
}

impl PhoneModule for AtGen {
    fn models(&self) -> &'static str {
        Self::MODELS
    }

    fn initialise(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(self, b"AT\r", AT_MSG_TYPE, REPLY_TIMEOUT, RequestId::Initialise)?;
        s.wait_for(self, b"ATE1\r", AT_MSG_TYPE, REPLY_TIMEOUT, RequestId::Initialise)
    }

    fn terminate(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }

    fn get_manufacturer(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().manufacturer.is_empty() {
            return Ok(());
        }
        s.wait_for(
            self,
            b"AT+CGMI\r",
            AT_MSG_TYPE,
            REPLY_TIMEOUT,
            RequestId::GetManufacturer,
        )
    }

    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().model.is_empty() {
            return Ok(());
        }
        s.wait_for(
            self,
            b"AT+CGMM\r",
            AT_MSG_TYPE,
            REPLY_TIMEOUT,
            RequestId::GetModel,
        )
    }

    fn get_firmware(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(
            self,
            b"AT+CGMR\r",
            AT_MSG_TYPE,
            REPLY_TIMEOUT,
            RequestId::GetFirmware,
        )
    }

    fn get_imei(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().imei.is_empty() {
            return Ok(());
        }
        s.wait_for(
            self,
            b"AT+CGSN\r",
            AT_MSG_TYPE,
            REPLY_TIMEOUT,
            RequestId::GetImei,
        )
    }

    fn get_date_time(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(
            self,
            b"AT+CCLK?\r",
            AT_MSG_TYPE,
            REPLY_TIMEOUT,
            RequestId::GetDateTime,
        )
    }

    fn set_date_time(&mut self, s: &mut StateMachine, when: &NaiveDateTime) -> Result<(), Error> {
        let command = format!("AT+CCLK=\"{}\"\r", when.format("%y/%m/%d,%H:%M:%S"));
        s.wait_for(
            self,
            command.as_bytes(),
            AT_MSG_TYPE,
            REPLY_TIMEOUT,
            RequestId::SetDateTime,
        )
    }

    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        dispatch::run_table(self, Self::REPLIES, msg, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_msg(text: &str) -> Message {
        Message::new(AT_MSG_TYPE, text.as_bytes().to_vec())
    }

    #[test]
    fn model_reply_parsing() {
        let mut module = AtGen::new();
        let mut s = StateMachine::new();
        let msg = at_msg("AT+CGMM\r\r\n\"Nokia 6230i\"\r\n\r\nOK\r\n");
        module.reply_get_model(&msg, &mut s).unwrap();
        assert_eq!(s.phone_data().model, "Nokia 6230i");
    }

    #[test]
    fn error_reply_reads_as_not_supported() {
        let mut module = AtGen::new();
        let mut s = StateMachine::new();
        let msg = at_msg("AT+CGMM\r\r\nERROR\r\n");
        assert_eq!(
            module.reply_get_model(&msg, &mut s),
            Err(Error::NotSupported)
        );
    }

    #[test]
    fn firmware_reply_extracts_comparable_number() {
        let mut module = AtGen::new();
        let mut s = StateMachine::new();
        let msg = at_msg("AT+CGMR\r\r\n+CGMR: V 05.57\r\n\r\nOK\r\n");
        module.reply_get_firmware(&msg, &mut s).unwrap();
        assert_eq!(s.phone_data().version, "V 05.57");
        assert!((s.phone_data().ver_num - 5.57).abs() < 1e-9);
    }

    #[test]
    fn clock_reply_parses_with_zone_suffix() {
        let mut module = AtGen::new();
        let mut s = StateMachine::new();
        let msg = at_msg("AT+CCLK?\r\r\n+CCLK: \"26/07/31,17:40:02+08\"\r\n\r\nOK\r\n");
        module.reply_get_date_time(&msg, &mut s).unwrap();
        let when = s.phone_data().date_time.unwrap();
        assert_eq!(
            when.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2026-07-31 17:40:02"
        );
    }

    #[test]
    fn version_number_parsing() {
        assert!((parse_version_number("V 03.42") - 3.42).abs() < 1e-9);
        assert!((parse_version_number("7.20a") - 7.20).abs() < 1e-9);
        assert_eq!(parse_version_number("no digits"), 0.0);
    }
}
