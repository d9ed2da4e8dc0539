//! Scripted layer implementations for engine tests: a device that plays
//! back canned reads, a trivial `[type, len, payload]` framing, and a
//! phone module that records what the coordinator does to it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::DeviceAccess;
use crate::dispatch::{self, FramePattern, ReplyEntry, RequestId};
use crate::error::Error;
use crate::phone::PhoneModule;
use crate::protocol::{LinkOptions, Message, Protocol};
use crate::state::StateMachine;

#[derive(Debug, Default)]
pub(crate) struct MockDevice {
    pub reads: VecDeque<Vec<u8>>,
    pub fail_open: Option<Error>,
    written: Vec<u8>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reads(reads: Vec<Vec<u8>>) -> Self {
        MockDevice {
            reads: reads.into(),
            ..Default::default()
        }
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl DeviceAccess for MockDevice {
    fn open(&mut self, _path: &str) -> Result<(), Error> {
        match self.fail_open {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn set_speed(&mut self, _speed: u32) -> Result<(), Error> {
        Ok(())
    }

    fn set_parity(&mut self, _odd: bool) -> Result<(), Error> {
        Ok(())
    }

    fn set_dtr_rts(&mut self, _dtr: bool, _rts: bool) -> Result<(), Error> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        match self.reads.pop_front() {
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }
}

/// Minimal framing for tests: `type`, one length byte, payload.
#[derive(Debug, Default)]
pub(crate) struct TestProtocol {
    header: Vec<u8>,
    payload: Vec<u8>,
    expected: Option<usize>,
}

impl TestProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(msg_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![msg_type, payload.len() as u8];
        frame.extend_from_slice(payload);
        frame
    }
}

impl Protocol for TestProtocol {
    fn initialise(
        &mut self,
        _device: &mut dyn DeviceAccess,
        _link: &LinkOptions,
    ) -> Result<(), Error> {
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
        let frame = Self::encode(msg_type, payload);
        device.write(&frame)?;
        Ok(())
    }

    fn feed(&mut self, _device: &mut dyn DeviceAccess, byte: u8) -> Result<Option<Message>, Error> {
        match self.expected {
            None => {
                self.header.push(byte);
                if self.header.len() == 2 {
                    self.expected = Some(self.header[1] as usize);
                    self.payload.clear();
                    if self.header[1] == 0 {
                        let msg = Message::new(self.header[0], Vec::new());
                        self.header.clear();
                        self.expected = None;
                        return Ok(Some(msg));
                    }
                }
                Ok(None)
            }
            Some(expected) => {
                self.payload.push(byte);
                if self.payload.len() == expected {
                    let msg = Message::new(self.header[0], std::mem::take(&mut self.payload));
                    self.header.clear();
                    self.expected = None;
                    return Ok(Some(msg));
                }
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProbeState {
    pub start_info: Vec<bool>,
    pub incoming: usize,
    pub seen_request: Option<RequestId>,
    pub partial: usize,
}

/// Shared window into a [`RecordingPhone`] after it moved into the
/// machine.
#[derive(Debug, Clone, Default)]
pub(crate) struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    pub fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.0.lock().unwrap()
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingPhone {
    pub probe: Probe,
}

impl RecordingPhone {
    pub const MSG_MODEL: u8 = 0x10;
    pub const MSG_INCOMING: u8 = 0x20;
    pub const MSG_TWO_PART: u8 = 0x30;
    pub const REPLY_TIMEOUT: u32 = 1;

    pub fn new(probe: Probe) -> Self {
        RecordingPhone { probe }
    }

    const REPLIES: &'static [ReplyEntry<RecordingPhone>] = &[
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: RecordingPhone::MSG_MODEL,
                subtype: None,
            },
            request: RequestId::GetModel,
            handler: RecordingPhone::reply_model,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: RecordingPhone::MSG_INCOMING,
                subtype: None,
            },
            request: RequestId::IncomingFrame,
            handler: RecordingPhone::reply_incoming,
        },
        ReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: RecordingPhone::MSG_TWO_PART,
                subtype: None,
            },
            request: RequestId::GetFirmware,
            handler: RecordingPhone::reply_two_part,
        },
    ];

    fn reply_model(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        self.probe.state().seen_request = Some(s.phone_data().request_id);
        s.phone_data_mut().model = String::from_utf8_lossy(&msg.buffer).into_owned();
        Ok(())
    }

    fn reply_incoming(&mut self, _msg: &Message, _s: &mut StateMachine) -> Result<(), Error> {
        self.probe.state().incoming += 1;
        Ok(())
    }

    fn reply_two_part(&mut self, _msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        let partial = {
            let mut state = self.probe.state();
            state.partial += 1;
            state.partial
        };
        if partial < 2 {
            Err(Error::NeedAnotherAnswer)
        } else {
            s.phone_data_mut().version = "two-part".to_owned();
            Ok(())
        }
    }
}

impl PhoneModule for RecordingPhone {
    fn models(&self) -> &'static str {
        "mock"
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
            &[0x01],
            Self::MSG_MODEL,
            Self::REPLY_TIMEOUT,
            RequestId::GetModel,
        )
    }

    fn get_firmware(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.wait_for(
            self,
            &[0x02],
            Self::MSG_TWO_PART,
            Self::REPLY_TIMEOUT,
            RequestId::GetFirmware,
        )
    }

    fn show_start_info(&mut self, _s: &mut StateMachine, enable: bool) -> Result<(), Error> {
        self.probe.state().start_info.push(enable);
        Ok(())
    }

    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        dispatch::run_table(self, Self::REPLIES, msg, s)
    }
}
