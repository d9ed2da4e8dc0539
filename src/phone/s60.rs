//! Module for the Series 60 companion applet. One sysinfo exchange
//! carries manufacturer, model and firmware, separated by pipes; the
//! line protocol's numeric ids are matched through the long-id pattern.

use crate::dispatch::{self, FramePattern, ReplyEntry, RequestId};
use crate::error::Error;
use crate::phones;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::PhoneModule;

const REQ_SYSINFO: u8 = 16;
const RESP_SYSINFO: u8 = 17;

const REPLY_TIMEOUT: u32 = 8;

#[derive(Debug, Default)]
pub struct S60Phone;

impl S60Phone {
    pub const MODELS: &'static str = "s60 symbian";

    pub fn new() -> Self {
        S60Phone
    }

    const REPLIES: &'static [ReplyEntry<S60Phone>] = &[
        ReplyEntry {
            pattern: FramePattern::LongId(RESP_SYSINFO),
            request: RequestId::GetModel,
            handler: S60Phone::reply_sysinfo,
        },
        ReplyEntry {
            pattern: FramePattern::LongId(RESP_SYSINFO),
            request: RequestId::GetManufacturer,
            handler: S60Phone::reply_sysinfo,
        },
        ReplyEntry {
            pattern: FramePattern::LongId(RESP_SYSINFO),
            request: RequestId::GetFirmware,
            handler: S60Phone::reply_sysinfo,
        },
    ];

    /// `manufacturer|model|version`
    fn reply_sysinfo(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let text = String::from_utf8_lossy(&msg.buffer).into_owned();
        let mut fields = text.trim().split('|');
        let (Some(manufacturer), Some(model), Some(version)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::UnknownResponse);
        };
        let data = s.phone_data_mut();
        data.manufacturer = manufacturer.to_owned();
        data.model = model.to_owned();
        data.version = version.to_owned();
        data.ver_num = version
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .find(|t| !t.is_empty())
            .and_then(|t| t.parse().ok())
            .unwrap_or(0.0);
        let entry = phones::model_data(&data.model);
        if entry.model != "unknown" {
            data.model_info = Some(entry.into());
        }
        Ok(())
    }

    fn query_sysinfo(&mut self, s: &mut StateMachine, request: RequestId) -> Result<(), Error> {
        s.wait_for(self, &[], REQ_SYSINFO, REPLY_TIMEOUT, request)
    }
}

impl PhoneModule for S60Phone {
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
        if !s.phone_data().manufacturer.is_empty() {
            return Ok(());
        }
        self.query_sysinfo(s, RequestId::GetManufacturer)
    }

    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().model.is_empty() {
            return Ok(());
        }
        self.query_sysinfo(s, RequestId::GetModel)
    }

    fn get_firmware(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().version.is_empty() {
            return Ok(());
        }
        self.query_sysinfo(s, RequestId::GetFirmware)
    }

    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        dispatch::run_table(self, Self::REPLIES, msg, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_reply_fills_all_identity_fields() {
        let mut module = S60Phone::new();
        let mut s = StateMachine::new();
        let msg = Message::new(RESP_SYSINFO, b"Nokia|E52|031.012".to_vec());
        module.reply_sysinfo(&msg, &mut s).unwrap();
        let data = s.phone_data();
        assert_eq!(data.manufacturer, "Nokia");
        assert_eq!(data.model, "E52");
        assert_eq!(data.version, "031.012");
        assert!((data.ver_num - 31.012).abs() < 1e-9);
    }

    #[test]
    fn short_sysinfo_is_unknown_response() {
        let mut module = S60Phone::new();
        let mut s = StateMachine::new();
        let msg = Message::new(RESP_SYSINFO, b"Nokia|E52".to_vec());
        assert_eq!(
            module.reply_sysinfo(&msg, &mut s),
            Err(Error::UnknownResponse)
        );
    }
}
