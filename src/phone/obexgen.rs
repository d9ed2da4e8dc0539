//! Generic OBEX module. Identity queries have no portable OBEX
//! equivalent, so they report as unsupported and the init ladder moves
//! on; the module's job is the session handshake.

use crate::dispatch::{self, FramePattern, ReplyEntry, RequestId};
use crate::error::Error;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::PhoneModule;

const OBEX_CONNECT: u8 = 0x80;
const OBEX_DISCONNECT: u8 = 0x81;
const OBEX_SUCCESS: u8 = 0xA0;

/// OBEX protocol version 1.0, no flags, 1 KiB max packet.
const CONNECT_FIELDS: &[u8] = &[0x10, 0x00, 0x04, 0x00];

const REPLY_TIMEOUT: u32 = 8;

#[derive(Debug, Default)]
pub struct ObexGen {
    connected: bool,
}

impl ObexGen {
    pub const MODELS: &'static str = "obexgen obex";

    pub fn new() -> Self {
        ObexGen { connected: false }
    }

    const REPLIES: &'static [ReplyEntry<ObexGen>] = &[
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: OBEX_SUCCESS,
                subtype: None,
            },
            request: RequestId::Initialise,
            handler: ObexGen::reply_connect,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: OBEX_SUCCESS,
                subtype: None,
            },
            request: RequestId::Terminate,
            handler: ObexGen::reply_disconnect,
        },
    ];

    fn reply_connect(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        if msg.len() < 2 {
            return Err(Error::UnknownResponse);
        }
        self.connected = true;
        s.trace(&format!(
            "obex session up, peer speaks version {}.{}",
            msg.buffer[0] >> 4,
            msg.buffer[0] & 0x0F
        ));
        Ok(())
    }

    fn reply_disconnect(&mut self, _msg: &Message, _s: &mut StateMachine) -> Result<(), Error> {
        self.connected = false;
        Ok(())
    }
}

impl PhoneModule for ObexGen {
    fn models(&self) -> &'static str {
        Self::MODELS
    }

    fn initialise(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(
            self,
            CONNECT_FIELDS,
            OBEX_CONNECT,
            REPLY_TIMEOUT,
            RequestId::Initialise,
        )
    }

    fn terminate(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        if !self.connected {
            return Ok(());
        }
        s.wait_for(self, &[], OBEX_DISCONNECT, REPLY_TIMEOUT, RequestId::Terminate)
    }

    fn get_model(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        dispatch::run_table(self, Self::REPLIES, msg, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_reply_marks_session_up() {
        let mut module = ObexGen::new();
        let mut s = StateMachine::new();
        let msg = Message::new(OBEX_SUCCESS, vec![0x10, 0x00]);
        module.reply_connect(&msg, &mut s).unwrap();
        assert!(module.connected);
    }

    #[test]
    fn terminate_without_session_is_a_no_op() {
        let mut module = ObexGen::new();
        let mut s = StateMachine::new();
        assert_eq!(module.terminate(&mut s), Ok(()));
    }
}
