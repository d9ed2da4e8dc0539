//! Sony-Ericsson module: AT for control, OBEX for data transfers. The
//! OBEX side is only entered for file traffic, which is outside this
//! crate's surface, so the control path delegates to the generic AT
//! driver under a vendor model list.

use chrono::NaiveDateTime;

use crate::error::Error;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::{atgen::AtGen, PhoneModule};

#[derive(Debug, Default)]
pub struct AtObex {
    at: AtGen,
}

impl AtObex {
    pub const MODELS: &'static str = "atobex K750 K750i W800 Z530";

    pub fn new() -> Self {
        AtObex { at: AtGen::new() }
    }
}

impl PhoneModule for AtObex {
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
