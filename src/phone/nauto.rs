//! Auto-detection probe for Nokia links.
//!
//! Sends the identification request every DCT-era firmware answers and
//! parses the model out of the version text. Only ever used to populate
//! the model string before real module selection; the dispatcher knows it
//! by its `NAUTO` marker and keeps its noise out of the diagnostics.

use crate::dispatch::{self, FramePattern, ReplyEntry, RequestId};
use crate::error::Error;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::{PhoneModule, PROBE_MODULE_MODELS};

const MSG_ID_REQUEST: u8 = 0xD1;
const MSG_ID_REPLY: u8 = 0xD2;
const ID_REQUEST: &[u8] = &[0x00, 0x01, 0x00, 0x03, 0x00];
const REPLY_TIMEOUT: u32 = 4;

#[derive(Debug, Default)]
pub struct NokiaAuto;

impl NokiaAuto {
    pub fn new() -> Self {
        NokiaAuto
    }

    const REPLIES: &'static [ReplyEntry<NokiaAuto>] = &[ReplyEntry {
        pattern: FramePattern::SingleByte {
            msg_type: MSG_ID_REPLY,
            subtype: None,
        },
        request: RequestId::GetModel,
        handler: NokiaAuto::reply_identification,
    }];

    /// The identification text is `V <ver>\n<date>\n<product>\n...`.
    fn reply_identification(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let text = String::from_utf8_lossy(&msg.buffer).into_owned();
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let Some(product) = lines.get(2) else {
            return Err(Error::UnknownResponse);
        };
        let data = s.phone_data_mut();
        data.model = (*product).to_owned();
        if let Some(version) = lines.first() {
            data.version = version.trim_start_matches("V ").to_owned();
        }
        if let Some(date) = lines.get(1) {
            data.ver_date = (*date).to_owned();
        }
        s.trace(&format!("probed phone: \"{}\"", s.phone_data().model));
        Ok(())
    }
}

impl PhoneModule for NokiaAuto {
    fn models(&self) -> &'static str {
        PROBE_MODULE_MODELS
    }

    fn initialise(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }

    fn terminate(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }

    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(
            self,
            ID_REQUEST,
            MSG_ID_REQUEST,
            REPLY_TIMEOUT,
            RequestId::GetModel,
        )
    }

    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        dispatch::run_table(self, Self::REPLIES, msg, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_text_is_parsed() {
        let mut module = NokiaAuto::new();
        let mut s = StateMachine::new();
        let msg = Message::new(
            MSG_ID_REPLY,
            b"V 05.57\n27-07-04\nRM-72\n(c) NMP".to_vec(),
        );
        module.reply_identification(&msg, &mut s).unwrap();
        assert_eq!(s.phone_data().model, "RM-72");
        assert_eq!(s.phone_data().version, "05.57");
        assert_eq!(s.phone_data().ver_date, "27-07-04");
    }

    #[test]
    fn truncated_identification_is_unknown_response() {
        let mut module = NokiaAuto::new();
        let mut s = StateMachine::new();
        let msg = Message::new(MSG_ID_REPLY, b"V 05.57\n".to_vec());
        assert_eq!(
            module.reply_identification(&msg, &mut s),
            Err(Error::UnknownResponse)
        );
    }
}
