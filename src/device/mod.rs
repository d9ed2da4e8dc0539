//! Transport drivers.
//!
//! A device is a raw byte pipe with a few control knobs. Reads are
//! expected to return quickly: `Ok(0)` means "nothing there right now",
//! and the engine's poll loop supplies the waiting.

pub mod lock;
pub mod none;
#[cfg(feature = "serial-device")]
pub mod serial;

use crate::error::Error;

pub trait DeviceAccess {
    /// Opens the endpoint at `path`. Errors map onto the device error
    /// taxonomy so the init ladder can tell recoverable failures apart.
    fn open(&mut self, path: &str) -> Result<(), Error>;

    /// Closes the endpoint. Closing a never-opened device is fine.
    fn close(&mut self) -> Result<(), Error>;

    fn set_speed(&mut self, speed: u32) -> Result<(), Error>;

    /// `odd` selects odd parity; `false` means none.
    fn set_parity(&mut self, odd: bool) -> Result<(), Error>;

    fn set_dtr_rts(&mut self, dtr: bool, rts: bool) -> Result<(), Error>;

    /// Non-blocking-ish read; `Ok(0)` when no data is pending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;

    /// Writes as much as the driver accepts, returning the count.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;
}
