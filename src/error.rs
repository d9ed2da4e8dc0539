use thiserror::Error;

/// Every failure the engine can surface.
///
/// One flat space: lifecycle errors from configuration and registration,
/// device errors from the transport drivers, protocol errors from the
/// request/response engine and operation errors from the phone modules all
/// travel through the same channel, because the init ladder and the
/// dispatcher route on them (see [`Error::is_recoverable_device_error`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// No configuration section could be brought up.
    #[error("no usable configuration")]
    Unconfigured,
    /// The configuration file was missing or unreadable; built-in defaults
    /// were installed into the first slot instead.
    #[error("no configuration file found, using built-in defaults")]
    UsingDefaults,
    /// The requested configuration section does not exist.
    #[error("configuration section not found")]
    MissingSection,
    /// The configuration file could not be opened.
    #[error("cannot open configuration file")]
    CantOpenFile,
    /// The connection name is known but its driver or framing was left out
    /// of this build.
    #[error("connection type disabled at compile time")]
    Disabled,
    /// The connection name did not match any known connection.
    #[error("unknown connection type string")]
    UnknownConnection,
    /// The model string did not match any phone module.
    #[error("unknown model string")]
    UnknownModel,
    /// A bounded buffer could not hold the data.
    #[error("data does not fit")]
    MoreMemory,
    /// Malformed data in a frame or a configuration value.
    #[error("corrupted data")]
    BadData,

    #[error("can not open specified device")]
    DeviceOpenError,
    #[error("device is locked by another process")]
    DeviceLocked,
    #[error("device does not exist")]
    DeviceNotExist,
    #[error("device is busy")]
    DeviceBusy,
    #[error("no permission to access device")]
    DeviceNoPermission,
    #[error("no driver for device")]
    DeviceNoDriver,
    #[error("device does not work properly")]
    DeviceNotWork,
    #[error("error while writing to device")]
    DeviceWriteError,
    #[error("error while reading from device")]
    DeviceReadError,
    #[error("can not set DTR/RTS on device")]
    DeviceDtrRtsError,
    #[error("can not change device speed")]
    DeviceChangeSpeedError,

    /// No (matching) reply arrived within the wait budget.
    #[error("no response in specified timeout")]
    Timeout,
    /// The pending wait was cancelled through the abort flag.
    #[error("operation aborted")]
    Aborted,
    /// A frame arrived that no reply table knows about.
    #[error("unknown frame")]
    UnknownFrame,
    /// A handler recognised the frame but could not make sense of it.
    #[error("unknown response")]
    UnknownResponse,
    /// A frame matched a reply entry bound to a different request.
    #[error("frame not requested now")]
    FrameNotRequested,
    /// Returned by a handler to keep the request pending: more frames
    /// belonging to the same reply are expected. Never surfaces to the
    /// waiter.
    #[error("one reply read, more expected")]
    NeedAnotherAnswer,

    #[error("no connection to phone")]
    NotConnected,
    #[error("function not supported by phone")]
    NotSupported,
    #[error("unknown error")]
    Unknown,
}

impl Error {
    /// Device failures the init ladder treats as "try the next slot".
    pub fn is_recoverable_device_error(self) -> bool {
        matches!(
            self,
            Error::DeviceOpenError
                | Error::DeviceLocked
                | Error::DeviceNotExist
                | Error::DeviceBusy
                | Error::DeviceNoPermission
                | Error::DeviceNoDriver
                | Error::DeviceNotWork
        )
    }
}
