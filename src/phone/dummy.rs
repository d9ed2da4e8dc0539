//! Phone module behind the `none` connection: canned identity, no wire
//! traffic. Handy for exercising the engine without hardware.

use chrono::NaiveDateTime;

use crate::error::Error;
use crate::phones;
use crate::protocol::Message;
use crate::state::StateMachine;

use super::PhoneModule;

#[derive(Debug, Default)]
pub struct Dummy;

impl Dummy {
    pub const MODELS: &'static str = "dummy";

    pub fn new() -> Self {
        Dummy
    }
}

impl PhoneModule for Dummy {
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
        s.phone_data_mut().manufacturer = "Dummy".to_owned();
        Ok(())
    }

    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        let data = s.phone_data_mut();
        data.model = "dummy".to_owned();
        data.model_info = Some(phones::model_data("unknown").into());
        Ok(())
    }

    fn get_firmware(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        let data = s.phone_data_mut();
        data.version = "1.0".to_owned();
        data.ver_num = 1.0;
        Ok(())
    }

    fn get_imei(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.phone_data_mut().imei = "999999999999999".to_owned();
        Ok(())
    }

    fn get_date_time(&mut self, s: &mut StateMachine) -> Result<(), Error> {
        s.phone_data_mut().date_time = Some(chrono::Local::now().naive_local());
        Ok(())
    }

    fn set_date_time(&mut self, _s: &mut StateMachine, _when: &NaiveDateTime) -> Result<(), Error> {
        Ok(())
    }

    fn show_start_info(&mut self, s: &mut StateMachine, enable: bool) -> Result<(), Error> {
        s.trace(if enable {
            "start info banner up"
        } else {
            "start info banner down"
        });
        Ok(())
    }

    fn dispatch(&mut self, _msg: &Message, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::UnknownFrame)
    }
}
