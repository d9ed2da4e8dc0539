//! Alcatel module. The vendor's binary sync mode matters for data
//! features; everything this crate's surface needs (identity, clock) is
//! served over the AT command mode, so the module wraps the generic AT
//! driver and keeps its own model list.

use chrono::NaiveDateTime;

use crate::error::Error;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::{atgen::AtGen, PhoneModule};

#[derive(Debug, Default)]
pub struct Alcatel {
    at: AtGen,
}

impl Alcatel {
    pub const MODELS: &'static str = "alcatel A500 OT535 OT735";

    pub fn new() -> Self {
        Alcatel { at: AtGen::new() }
    }
}

impl PhoneModule for Alcatel {
    fn models(&self) -> &'static str {
        Self::MODELS
    }

    fn initialise(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        self.at.initialise(s)
    }

    fn terminate(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        self.at.terminate(s)
    }

    fn get_manufacturer(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        self.at.get_manufacturer(s)
    }

    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        self.at.get_model(s)
    }

    fn get_firmware(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        self.at.get_firmware(s)
    }

    fn get_imei(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        self.at.get_imei(s)
    }

    fn get_date_time(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        self.at.get_date_time(s)
    }

    fn set_date_time(&mut self, s: &mut StateMachine, when: &NaiveDateTime) -> Result<(), Error> {
        self.at.set_date_time(s, when)
    }

    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        self.at.dispatch(msg, s)
    }
}
