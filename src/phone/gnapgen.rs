//! Module for the gnapplet companion application running on the phone.
//! Replies open with a two-byte operation code, matched as a binary
//! prefix.

use crate::dispatch::{self, FramePattern, ReplyEntry, RequestId};
use crate::error::Error;
use crate::phones;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::PhoneModule;

const MSG_INFO: u8 = 0x02;
const OP_INFO_REQUEST: &[u8] = &[0x00, 0x01];
const OP_INFO_REPLY: &[u8] = &[0x00, 0x02];

const REPLY_TIMEOUT: u32 = 4;

#[derive(Debug, Default)]
pub struct GnapGen;

impl GnapGen {
    pub const MODELS: &'static str = "gnapgen gnap";

    pub fn new() -> Self {
        GnapGen
    }

    const REPLIES: &'static [ReplyEntry<GnapGen>] = &[ReplyEntry {
        pattern: FramePattern::Prefix(OP_INFO_REPLY),
        request: RequestId::GetModel,
        handler: GnapGen::reply_info,
    }];

    fn reply_info(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let model = String::from_utf8_lossy(&msg.buffer[OP_INFO_REPLY.len()..])
            .trim_matches(char::from(0))
            .trim()
            .to_owned();
        if model.is_empty() {
            return Err(Error::UnknownResponse);
        }
        let data = s.phone_data_mut();
        data.model = model;
        let entry = phones::model_data(&data.model);
        if entry.model != "unknown" {
            data.model_info = Some(entry.into());
        }
        Ok(())
    }
}

impl PhoneModule for GnapGen {
    fn models(&self) -> &'static str {
        Self::MODELS
    }

    fn initialise(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }

    fn terminate(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Ok(())
    }

    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !s.phone_data().model.is_empty() {
            return Ok(());
        }
        s.wait_for(
            self,
            OP_INFO_REQUEST,
            MSG_INFO,
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
    fn info_reply_sets_model() {
        let mut module = GnapGen::new();
        let mut s = StateMachine::new();
        let mut buffer = OP_INFO_REPLY.to_vec();
        buffer.extend_from_slice(b"E52\0");
        let msg = Message::new(MSG_INFO, buffer);
        module.reply_info(&msg, &mut s).unwrap();
        assert_eq!(s.phone_data().model, "E52");
    }
}
