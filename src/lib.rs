//! # handset-link
//!
//! Host-side driver crate for GSM handsets speaking the proprietary
//! Nokia framings (FBUS2, MBUS2, PHONET), OBEX, GNAPBUS, the S60
//! companion-applet protocol and plain AT, over serial, USB-serial, IrDA
//! and Bluetooth links.
//!
//! The heart of the crate is [`StateMachine`]: it binds a transport
//! driver, a wire framing and a vendor phone module from configuration,
//! walks the configured connection ladder until one comes up, and runs
//! the request/response engine with retries, timeouts and cooperative
//! abort. Phone modules describe the frames they understand in static
//! reply tables ([`dispatch`]); everything the wire produces funnels
//! through one dispatcher.
//!
//! ## Example
//!
//! ```no_run
//! use handset_link::{config, Error, StateMachine};
//!
//! fn main() -> Result<(), Error> {
//!     let doc = config::find_config(None).ok();
//!     let mut machine = StateMachine::new();
//!     match machine.read_config(doc.as_ref(), 0) {
//!         Ok(()) | Err(Error::UsingDefaults) => {}
//!         Err(other) => return Err(other),
//!     }
//!     machine.set_config_num(1);
//!
//!     machine.init_connection(3)?;
//!     println!("talking to a {}", machine.get_model()?);
//!     machine.terminate_connection()
//! }
//! ```
//!
//! Backends are cargo features; the default set covers every framing and
//! phone module plus the serial transport. Connection names whose
//! backend is not compiled in parse fine and report
//! [`Error::Disabled`] when used, so configurations stay portable
//! across builds.

pub mod config;
pub mod connection;
pub mod debug;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod ini;
pub mod phone;
pub mod phones;
pub mod protocol;
mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::Config;
pub use connection::ConnectionType;
pub use dispatch::{FramePattern, RequestId, UserReplyEntry};
pub use error::Error;
pub use protocol::Message;
pub use state::{PhoneData, StateMachine, UserCallbacks, MAX_CONFIG_NUM};

/// Prelude - include traits
pub mod prelude {
    pub use crate::device::DeviceAccess;
    pub use crate::phone::PhoneModule;
    pub use crate::protocol::Protocol;
    pub use crate::{Config, ConnectionType, Error, RequestId, StateMachine};
}
