//! Series 40 module (6510 generation and its successors) over the Nokia
//! binary links.
//!
//! Identity, hardware and product-code queries all ride on the 0x1B
//! identification frame; the subcommand byte in the reply tells them
//! apart, which is what the subtype position in the reply table keys on.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::dispatch::{self, FramePattern, ReplyEntry, RequestId};
use crate::error::Error;
use crate::phones;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::PhoneModule;

const MSG_IDENT: u8 = 0x1B;
const MSG_CLOCK: u8 = 0x19;
const MSG_DISPLAY: u8 = 0x7A;

const SUB_VERSION: u8 = 0x07;
const SUB_HARDWARE: u8 = 0x0B;
const SUB_PRODUCT_CODE: u8 = 0x0C;

/// Byte of the reply payload carrying the echoed subcommand.
const SUB_POSITION: usize = 3;

const REPLY_TIMEOUT: u32 = 4;

#[derive(Debug, Default)]
pub struct N6510;

impl N6510 {
    pub const MODELS: &'static str =
        "6510 6310 6310i 8310 6020 6021 6030 6100 6170 6230 6230i 6610 7210";

    pub fn new() -> Self {
        N6510
    }

    const REPLIES: &'static [ReplyEntry<N6510>] = &[
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: MSG_IDENT,
                subtype: Some((SUB_POSITION, SUB_VERSION)),
            },
            request: RequestId::GetModel,
            handler: N6510::reply_version,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: MSG_IDENT,
                subtype: Some((SUB_POSITION, SUB_VERSION)),
            },
            request: RequestId::GetFirmware,
            handler: N6510::reply_version,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: MSG_IDENT,
                subtype: Some((SUB_POSITION, SUB_HARDWARE)),
            },
            request: RequestId::GetHardware,
            handler: N6510::reply_hardware,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: MSG_IDENT,
                subtype: Some((SUB_POSITION, SUB_PRODUCT_CODE)),
            },
            request: RequestId::GetProductCode,
            handler: N6510::reply_product_code,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: MSG_CLOCK,
                subtype: None,
            },
            request: RequestId::SetDateTime,
            handler: N6510::reply_ack,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: MSG_DISPLAY,
                subtype: None,
            },
            request: RequestId::ShowStartInfo,
            handler: N6510::reply_ack,
        },
    ];

    fn ident_request(subcommand: u8) -> [u8; 6] {
        [0x00, 0x01, 0x00, subcommand, 0x01, 0x00]
    }

    /// Text block after the subcommand echo: `V <ver>\n<date>\n<product>`.
    fn ident_text(msg: &Message) -> Vec<String> {
        let tail = msg.buffer.get(SUB_POSITION + 1..).unwrap_or(&[]);
        String::from_utf8_lossy(tail)
            .lines()
            .map(|l| l.trim_matches(char::from(0)).trim().to_owned())
            .filter(|l| !l.is_empty())
            .collect()
    }

    fn reply_version(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let lines = Self::ident_text(msg);
        let Some(product) = lines.get(2) else {
            return Err(Error::UnknownResponse);
        };
        let product = product.clone();
        let data = s.phone_data_mut();
        if let Some(version) = lines.first() {
            data.version = version.trim_start_matches("V ").to_owned();
            data.ver_num = data
                .version
                .split(|c: char| !c.is_ascii_digit() && c != '.')
                .find(|t| !t.is_empty())
                .and_then(|t| t.parse().ok())
                .unwrap_or(0.0);
        }
        if let Some(date) = lines.get(1) {
            data.ver_date = date.clone();
        }
        data.model = product;
        // Keep guessed features when the table has nothing better.
        let entry = phones::model_data(&data.model);
        if entry.model != "unknown" {
            data.model_info = Some(entry.into());
        }
        Ok(())
    }

    fn reply_hardware(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let lines = Self::ident_text(msg);
        let Some(hardware) = lines.first() else {
            return Err(Error::UnknownResponse);
        };
        s.phone_data_mut().hardware_cache = hardware.clone();
        Ok(())
    }

    fn reply_product_code(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let lines = Self::ident_text(msg);
        let Some(code) = lines.first() else {
            return Err(Error::UnknownResponse);
        };
        s.phone_data_mut().product_code_cache = code.clone();
        Ok(())
    }

    fn reply_ack(&mut self, _msg: &Message, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }
}

impl PhoneModule for N6510 {
    fn models(&self) -> &'static str {
        Self::MODELS
    }

    fn initialise(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }

    fn terminate(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }

    fn get_manufacturer(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.phone_data_mut().manufacturer = "Nokia".to_owned();
        Ok(())
    }

    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().model.is_empty() {
            return Ok(());
        }
        s.wait_for(
            self,
            &Self::ident_request(SUB_VERSION),
            MSG_IDENT,
            REPLY_TIMEOUT,
            RequestId::GetModel,
        )
    }

    fn get_firmware(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().version.is_empty() {
            return Ok(());
        }
        s.wait_for(
            self,
            &Self::ident_request(SUB_VERSION),
            MSG_IDENT,
            REPLY_TIMEOUT,
            RequestId::GetFirmware,
        )
    }

    fn get_hardware(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(
            self,
            &Self::ident_request(SUB_HARDWARE),
            MSG_IDENT,
            REPLY_TIMEOUT,
            RequestId::GetHardware,
        )
    }

    fn get_product_code(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(
            self,
            &Self::ident_request(SUB_PRODUCT_CODE),
            MSG_IDENT,
            REPLY_TIMEOUT,
            RequestId::GetProductCode,
        )
    }

    fn set_date_time(&mut self, s: &mut StateMachine, when: &NaiveDateTime) -> Result<(), Error> {
        let year = when.year() as u16;
        let payload = [
            0x00,
            0x01,
            0x00,
            (year >> 8) as u8,
            (year & 0xFF) as u8,
            when.month() as u8,
            when.day() as u8,
            when.hour() as u8,
            when.minute() as u8,
            when.second() as u8,
        ];
        s.wait_for(
            self,
            &payload,
            MSG_CLOCK,
            REPLY_TIMEOUT,
            RequestId::SetDateTime,
        )
    }

    fn show_start_info(&mut self, s: &mut StateMachine, enable: bool) -> Result<(), Error> {
        let payload = [0x00, 0x01, if enable { 0x01 } else { 0x02 }];
        s.wait_for(
            self,
            &payload,
            MSG_DISPLAY,
            REPLY_TIMEOUT,
            RequestId::ShowStartInfo,
        )
    }

    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        dispatch::run_table(self, Self::REPLIES, msg, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident_reply(subcommand: u8, text: &str) -> Message {
        let mut buffer = vec![0x00, 0x01, 0x00, subcommand];
        buffer.extend_from_slice(text.as_bytes());
        Message::new(MSG_IDENT, buffer)
    }

    #[test]
    fn version_reply_fills_identity() {
        let mut module = N6510::new();
        let mut s = StateMachine::new();
        let msg = ident_reply(SUB_VERSION, "V 06.33\n20-09-05\nRM-72");
        module.reply_version(&msg, &mut s).unwrap();
        let data = s.phone_data();
        assert_eq!(data.model, "RM-72");
        assert_eq!(data.version, "06.33");
        assert!((data.ver_num - 6.33).abs() < 1e-9);
        // RM-72 resolves through the table to the 6230i entry.
        assert_eq!(data.model_info.as_ref().unwrap().model, "6230i");
    }

    #[test]
    fn hardware_reply_goes_to_cache() {
        let mut module = N6510::new();
        let mut s = StateMachine::new();
        let msg = ident_reply(SUB_HARDWARE, "0903");
        module.reply_hardware(&msg, &mut s).unwrap();
        assert_eq!(s.phone_data().hardware_cache, "0903");
    }

    #[test]
    fn unknown_product_keeps_existing_model_info() {
        let mut module = N6510::new();
        let mut s = StateMachine::new();
        s.phone_data_mut().model_info = Some(phones::model_data("unknown").into());
        let msg = ident_reply(SUB_VERSION, "V 01.00\n01-01-06\nRM-999");
        module.reply_version(&msg, &mut s).unwrap();
        assert_eq!(s.phone_data().model, "RM-999");
        assert_eq!(s.phone_data().model_info.as_ref().unwrap().model, "unknown");
    }
}
