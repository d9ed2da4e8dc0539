//! The coordinator: one state machine owns one session to one phone.
//!
//! It binds the three layers (transport driver, wire framing, phone
//! module) from configuration, walks the configuration ladder until a
//! slot connects, and runs the request/response engine: requests go out
//! through the framing with bounded retries, received bytes are pumped
//! through the framing's parser, and completed frames are dispatched to
//! the user's or the module's reply table.
//!
//! One machine serves one request at a time; the poll loop inside
//! [`StateMachine::wait_for`] is the only place that blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;

use crate::config::Config;
use crate::connection::{self, ConnectionType};
use crate::debug::{lock_global, DebugInfo, DebugLevel, Direction};
use crate::device::lock::{lock_device, DeviceLock};
use crate::device::DeviceAccess;
use crate::dispatch::{self, RequestId, UserReplyEntry};
use crate::error::Error;
use crate::ini::IniDocument;
use crate::phone::{self, PhoneModule};
use crate::phones::{self, PhoneModelInfo};
use crate::protocol::{LinkOptions, Message, Protocol};

/// Highest usable configuration slot index; slots run `0..=MAX_CONFIG_NUM`.
pub const MAX_CONFIG_NUM: usize = 5;

/// Requests the start-info banner stays up for after init.
const START_INFO_REQUESTS: u32 = 30;

/// Default pause between empty device polls inside one read window.
pub const DEFAULT_READ_SLEEP: Duration = Duration::from_millis(5);
/// Default pause between poll rounds while waiting for a reply.
pub const DEFAULT_WAIT_SLEEP: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 2048;

/// Callback for incoming calls; receives the caller id when known.
pub type IncomingCallHandler = Box<dyn FnMut(&str) + Send>;
/// Callback for unstructured incoming text (USSD).
pub type IncomingTextHandler = Box<dyn FnMut(&str) + Send>;
/// Callback for raw incoming payloads (SMS, cell broadcast).
pub type IncomingDataHandler = Box<dyn FnMut(&[u8]) + Send>;

/// User-registered hooks consulted before the phone module's reply table.
#[derive(Default)]
pub struct UserCallbacks {
    pub(crate) reply_functions: Option<Vec<UserReplyEntry>>,
    pub(crate) incoming_call: Option<IncomingCallHandler>,
    pub(crate) incoming_ussd: Option<IncomingTextHandler>,
    pub(crate) incoming_sms: Option<IncomingDataHandler>,
    pub(crate) incoming_cb: Option<IncomingDataHandler>,
}

/// Mutable per-connection scratch shared between the coordinator and the
/// reply handlers.
#[derive(Debug)]
pub struct PhoneData {
    /// Resolved entry of the connected phone; owned so heuristics may add
    /// features without touching the static table.
    pub model_info: Option<PhoneModelInfo>,
    pub manufacturer: String,
    /// Model string as probed or parsed from replies. For Nokia hardware
    /// this may be a product number like `RM-72`.
    pub model: String,
    pub version: String,
    pub ver_date: String,
    pub ver_num: f64,
    pub imei: String,
    pub hardware_cache: String,
    pub product_code_cache: String,
    pub date_time: Option<NaiveDateTime>,
    pub enable_incoming_call: bool,
    pub enable_incoming_sms: bool,
    pub enable_incoming_cb: bool,
    pub enable_incoming_ussd: bool,
    /// Remaining requests until the start-info banner is taken down.
    pub start_info_counter: u32,
    /// Copy of the frame currently on the wire, kept only for diagnostic
    /// dumps while its reply is awaited.
    pub sent_msg: Option<Message>,
    pub request_id: RequestId,
    /// Last frame handed to the dispatcher.
    pub request_msg: Option<Message>,
    /// Outcome the dispatcher left for the waiter.
    pub dispatch_error: Result<(), Error>,
}

impl Default for PhoneData {
    fn default() -> Self {
        PhoneData {
            model_info: None,
            manufacturer: String::new(),
            model: String::new(),
            version: String::new(),
            ver_date: String::new(),
            ver_num: 0.0,
            imei: String::new(),
            hardware_cache: String::new(),
            product_code_cache: String::new(),
            date_time: None,
            enable_incoming_call: false,
            enable_incoming_sms: false,
            enable_incoming_cb: false,
            enable_incoming_ussd: false,
            start_info_counter: 0,
            sent_msg: None,
            request_id: RequestId::None,
            request_msg: None,
            dispatch_error: Ok(()),
        }
    }
}

impl PhoneData {
    fn fresh() -> Self {
        PhoneData {
            model_info: Some(PhoneModelInfo::from(phones::model_data("unknown"))),
            ..Default::default()
        }
    }
}

enum SlotOutcome {
    Connected,
    NextSlot,
    Failed(Error),
}

pub struct StateMachine {
    configs: Vec<Config>,
    config_num: usize,
    current_config: usize,
    connection_type: Option<ConnectionType>,
    skip_dtr_rts: bool,
    no_power_cable: bool,
    /// Serial speed forced by the connection string; 0 = framing default.
    speed: u32,
    /// How many times a request is re-sent before giving up.
    reply_num: usize,
    opened: bool,
    abort: AtomicBool,
    lock_file: Option<DeviceLock>,
    device: Option<Box<dyn DeviceAccess>>,
    protocol: Option<Box<dyn Protocol>>,
    phone: Option<Box<dyn PhoneModule>>,
    phone_data: PhoneData,
    user: UserCallbacks,
    di: DebugInfo,
    read_sleep: Duration,
    wait_sleep: Duration,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine {
            configs: (0..=MAX_CONFIG_NUM).map(|_| Config::default()).collect(),
            config_num: 0,
            current_config: 0,
            connection_type: None,
            skip_dtr_rts: false,
            no_power_cable: false,
            speed: 0,
            reply_num: 3,
            opened: false,
            abort: AtomicBool::new(false),
            lock_file: None,
            device: None,
            protocol: None,
            phone: None,
            phone_data: PhoneData::default(),
            user: UserCallbacks::default(),
            di: DebugInfo::default(),
            read_sleep: DEFAULT_READ_SLEEP,
            wait_sleep: DEFAULT_WAIT_SLEEP,
        }
    }

    // --- configuration ---------------------------------------------------

    /// Fills configuration slot `num` from `doc`. With no document (or no
    /// matching section) slot 0 is filled with built-in defaults and
    /// `UsingDefaults` is reported; higher slots fail hard.
    pub fn read_config(&mut self, doc: Option<&IniDocument>, num: usize) -> Result<(), Error> {
        if num > MAX_CONFIG_NUM {
            return Err(Error::MoreMemory);
        }
        crate::config::fill_from_ini(&mut self.configs[num], doc, num)
    }

    pub fn config_num(&self) -> usize {
        self.config_num
    }

    /// Declares how many leading slots the init ladder should try.
    pub fn set_config_num(&mut self, sections: usize) {
        if sections <= MAX_CONFIG_NUM + 1 {
            self.config_num = sections;
        }
    }

    /// Borrow of slot `num`, or of the current slot when `None`.
    pub fn get_config(&self, num: Option<usize>) -> Option<&Config> {
        self.configs.get(num.unwrap_or(self.current_config))
    }

    pub fn get_config_mut(&mut self, num: Option<usize>) -> Option<&mut Config> {
        let index = num.unwrap_or(self.current_config);
        self.configs.get_mut(index)
    }

    /// Index of the slot the ladder is on (or connected through).
    pub fn current_config_index(&self) -> usize {
        self.current_config
    }

    pub fn used_connection(&self) -> Option<ConnectionType> {
        self.connection_type
    }

    pub fn phone_data(&self) -> &PhoneData {
        &self.phone_data
    }

    pub fn phone_data_mut(&mut self) -> &mut PhoneData {
        &mut self.phone_data
    }

    pub fn model_info(&self) -> Option<&PhoneModelInfo> {
        self.phone_data.model_info.as_ref()
    }

    pub(crate) fn user_mut(&mut self) -> &mut UserCallbacks {
        &mut self.user
    }

    /// Overrides the engine's poll pacing. The defaults are conservative
    /// heuristics, not contracts.
    pub fn set_poll_intervals(&mut self, read_sleep: Duration, wait_sleep: Duration) {
        self.read_sleep = read_sleep;
        self.wait_sleep = wait_sleep;
    }

    // --- user hooks ------------------------------------------------------

    /// Installs a reply table consulted before the phone module's own.
    pub fn set_user_reply_functions(&mut self, table: Vec<UserReplyEntry>) {
        self.user.reply_functions = Some(table);
    }

    pub fn set_incoming_call_callback(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.user.incoming_call = Some(Box::new(callback));
    }

    pub fn set_incoming_ussd_callback(&mut self, callback: impl FnMut(&str) + Send + 'static) {
        self.user.incoming_ussd = Some(Box::new(callback));
    }

    pub fn set_incoming_sms_callback(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.user.incoming_sms = Some(Box::new(callback));
    }

    pub fn set_incoming_cb_callback(&mut self, callback: impl FnMut(&[u8]) + Send + 'static) {
        self.user.incoming_cb = Some(Box::new(callback));
    }

    pub fn enable_incoming_call(&mut self, enable: bool) {
        self.phone_data.enable_incoming_call = enable;
    }

    pub fn enable_incoming_sms(&mut self, enable: bool) {
        self.phone_data.enable_incoming_sms = enable;
    }

    pub fn enable_incoming_cb(&mut self, enable: bool) {
        self.phone_data.enable_incoming_cb = enable;
    }

    pub fn enable_incoming_ussd(&mut self, enable: bool) {
        self.phone_data.enable_incoming_ussd = enable;
    }

    // --- tracing ---------------------------------------------------------

    pub(crate) fn with_di<R>(&mut self, f: impl FnOnce(&mut DebugInfo) -> R) -> R {
        if self.di.use_global {
            f(&mut lock_global())
        } else {
            f(&mut self.di)
        }
    }

    pub(crate) fn trace(&mut self, text: &str) {
        self.with_di(|di| di.line(false, text));
    }

    pub(crate) fn trace_error(&mut self, text: &str) {
        self.with_di(|di| di.line(true, text));
    }

    fn log_error(&mut self, what: &str, error: Error) {
        self.trace_error(&format!("init: {what} failed: {error}"));
        log::debug!("init: {what} failed: {error}");
    }

    // --- connection lifecycle --------------------------------------------

    /// Resolves a connection string and binds the transport driver and the
    /// wire framing for it.
    pub(crate) fn register_all_connections(&mut self, connection: &str) -> Result<(), Error> {
        self.connection_type = None;
        self.skip_dtr_rts = false;
        self.no_power_cable = false;

        let parsed = connection::parse_connection_string(connection)?;
        self.skip_dtr_rts = parsed.skip_dtr_rts;
        self.no_power_cable = parsed.no_power_cable;
        if parsed.speed != 0 {
            self.speed = parsed.speed;
        }
        self.connection_type = Some(parsed.connection);

        match connection::bind_tables(parsed.connection) {
            Some((device, protocol)) => {
                self.device = Some(device);
                self.protocol = Some(protocol);
                Ok(())
            }
            None => {
                self.trace(&format!(
                    "connection \"{connection}\" is known but its backend is not part of this build"
                ));
                Err(Error::Disabled)
            }
        }
    }

    /// Chooses the phone module for the current slot (see the selection
    /// rules in `phone`).
    pub(crate) fn register_all_phone_modules(&mut self) -> Result<(), Error> {
        let connection = self.connection_type.ok_or(Error::UnknownConnection)?;
        let config_model = self.configs[self.current_config].model.clone();
        let module = phone::select_module(connection, &config_model, &mut self.phone_data)?;
        self.trace(&format!("[module - \"{}\"]", module.models()));
        self.phone = Some(module);
        Ok(())
    }

    /// Locks (if asked to), opens the device and brings the framing up. A
    /// framing failure leaves the device open; the caller tears down.
    pub(crate) fn open_connection(&mut self) -> Result<(), Error> {
        let cfg = &self.configs[self.current_config];
        let path = cfg.device.clone();
        if cfg.lock_device {
            self.lock_file = lock_device(&path)?;
        }
        {
            let device = self.device.as_mut().ok_or(Error::NotConnected)?;
            if let Err(error) = device.open(&path) {
                self.lock_file = None;
                return Err(error);
            }
        }
        self.opened = true;

        let link = LinkOptions {
            skip_dtr_rts: self.skip_dtr_rts,
            no_power_cable: self.no_power_cable,
            speed: self.speed,
        };
        let (device, protocol) = match (self.device.as_mut(), self.protocol.as_mut()) {
            (Some(device), Some(protocol)) => (device, protocol),
            _ => return Err(Error::NotConnected),
        };
        protocol.initialise(device.as_mut(), &link)
    }

    /// Tears the framing and device down and forgets the phone identity.
    pub(crate) fn close_connection(&mut self) -> Result<(), Error> {
        self.trace("[closing]");
        if let (Some(device), Some(protocol)) = (self.device.as_mut(), self.protocol.as_mut()) {
            protocol.terminate(device.as_mut())?;
            device.close()?;
        }
        self.lock_file = None;

        let data = &mut self.phone_data;
        data.model_info = None;
        data.manufacturer.clear();
        data.model.clear();
        data.version.clear();
        data.ver_date.clear();
        data.ver_num = 0.0;
        Ok(())
    }

    /// Auto-probe: opens the connection and, when no model is known yet,
    /// runs a provisional module through init/get-model/terminate purely to
    /// learn the model string. The device stays open for the real module.
    pub(crate) fn try_get_model(&mut self) -> Result<(), Error> {
        self.open_connection()?;

        if !self.phone_data.model.is_empty() {
            return Ok(());
        }
        self.trace("[module - auto-probe]");
        let connection = self.connection_type.ok_or(Error::UnknownConnection)?;
        let Some(mut module) = phone::provisional_module(connection) else {
            self.trace_error("no module available for auto-detection");
            return Err(Error::Unknown);
        };
        module.initialise(self)?;
        module.get_model(self)?;
        module.terminate(self)?;
        Ok(())
    }

    /// Walks the configuration ladder until a slot produces a working
    /// connection. Recoverable device errors, and timeouts during early
    /// phone talk, fall through to the next slot; anything else aborts the
    /// ladder. With every slot exhausted the machine is `Unconfigured`.
    pub fn init_connection(&mut self, reply_num: usize) -> Result<(), Error> {
        for index in 0..self.config_num {
            self.current_config = index;
            let last = index + 1 == self.config_num;
            match self.init_slot(index, reply_num, last) {
                SlotOutcome::Connected => return Ok(()),
                SlotOutcome::NextSlot => continue,
                SlotOutcome::Failed(error) => {
                    if self.opened {
                        let _ = self.close_connection();
                    }
                    self.opened = false;
                    self.lock_file = None;
                    return Err(error);
                }
            }
        }
        Err(Error::Unconfigured)
    }

    fn init_slot(&mut self, index: usize, reply_num: usize, last: bool) -> SlotOutcome {
        if self.configs[index].connection.trim().is_empty() {
            self.trace_error(&format!("[empty configuration slot {index}]"));
            return SlotOutcome::NextSlot;
        }

        self.speed = 0;
        self.reply_num = reply_num;
        self.phone_data = PhoneData::fresh();
        self.user = UserCallbacks::default();
        self.lock_file = None;
        self.opened = false;
        self.phone = None;
        self.device = None;
        self.protocol = None;
        self.connection_type = None;

        // Per-slot trace sink, unless everything goes to the global one.
        let use_global = self.configs[index].use_global_debug_file;
        self.di = DebugInfo {
            use_global,
            ..Default::default()
        };
        if !use_global {
            let level_name = self.configs[index].debug_level.clone();
            match DebugLevel::from_name(&level_name) {
                Some(level) => self.di.level = level,
                None => log::warn!("unknown logformat {level_name:?}, tracing stays off"),
            }
            let debug_file = self.configs[index].debug_file.clone();
            if let Err(error) = self.di.set_file(&debug_file) {
                self.log_error("installing the trace sink", error);
                return SlotOutcome::Failed(error);
            }
        }

        // Whitespace in config values is a classic copy-paste accident.
        {
            let cfg = &mut self.configs[index];
            cfg.device = cfg.device.trim().to_owned();
            cfg.model = cfg.model.trim().to_owned();
            cfg.connection = cfg.connection.trim().to_owned();
        }

        let version = env!("CARGO_PKG_VERSION");
        self.trace_error(&format!("[library    - {version}]"));
        self.trace_error(&format!(
            "[connection - \"{}\"]",
            self.configs[index].connection
        ));
        self.trace_error(&format!("[slot       - {index}]"));
        self.trace_error(&format!("[model      - \"{}\"]", self.configs[index].model));
        self.trace_error(&format!("[device     - \"{}\"]", self.configs[index].device));
        self.with_di(|di| di.binary_version(version));

        let connection_name = self.configs[index].connection.clone();
        if let Err(error) = self.register_all_connections(&connection_name) {
            self.log_error("resolving the connection", error);
            return SlotOutcome::Failed(error);
        }

        // Module selection, with one retry after dropping a model string
        // nothing matched.
        loop {
            let connection = match self.connection_type {
                Some(connection) => connection,
                None => return SlotOutcome::Failed(Error::UnknownConnection),
            };
            if self.configs[index].model.is_empty() && phone::supports_auto_probe(connection) {
                match self.try_get_model() {
                    Ok(()) => {}
                    Err(error) if error.is_recoverable_device_error() && !last => {
                        let _ = self.close_connection();
                        return SlotOutcome::NextSlot;
                    }
                    Err(error) => {
                        self.log_error("probing the model", error);
                        return SlotOutcome::Failed(error);
                    }
                }
            }
            match self.register_all_phone_modules() {
                Ok(()) => break,
                Err(Error::UnknownModel) if !self.configs[index].model.is_empty() => {
                    let stale = self.configs[index].model.clone();
                    self.trace(&format!(
                        "configured model \"{stale}\" is not known, retrying with autodetection"
                    ));
                    self.configs[index].model.clear();
                }
                Err(error) => {
                    self.log_error("selecting the phone module", error);
                    return SlotOutcome::Failed(error);
                }
            }
        }

        // The probe may have opened the device already.
        if !self.opened {
            match self.open_connection() {
                Ok(()) => {}
                Err(error) if error.is_recoverable_device_error() && !last => {
                    let _ = self.close_connection();
                    return SlotOutcome::NextSlot;
                }
                Err(error) => {
                    self.log_error("opening the connection", error);
                    return SlotOutcome::Failed(error);
                }
            }
        }

        match self.phone_op(|module, s| module.initialise(s)) {
            Ok(()) => {}
            Err(Error::Timeout) if !last => {
                let _ = self.close_connection();
                return SlotOutcome::NextSlot;
            }
            Err(error) => {
                self.log_error("initialising the phone module", error);
                return SlotOutcome::Failed(error);
            }
        }

        if self.configs[index].start_info {
            let _ = self.phone_op(|module, s| module.show_start_info(s, true));
            self.phone_data.start_info_counter = START_INFO_REQUESTS;
        }

        if self.configs[index].sync_time {
            let now = chrono::Local::now().naive_local();
            let _ = self.phone_op(move |module, s| module.set_date_time(s, &now));
        }

        // Identity queries; knowing what is on the other end makes every
        // later trace readable. A phone that cannot answer is not an
        // error.
        match self.phone_op(|module, s| module.get_manufacturer(s)) {
            Ok(()) | Err(Error::NotSupported) => {}
            Err(Error::Timeout) if !last => {
                let _ = self.close_connection();
                return SlotOutcome::NextSlot;
            }
            Err(error) => {
                self.log_error("reading the manufacturer", error);
                return SlotOutcome::Failed(error);
            }
        }
        match self.phone_op(|module, s| module.get_model(s)) {
            Ok(()) | Err(Error::NotSupported) => {}
            Err(error) => {
                self.log_error("reading the model", error);
                return SlotOutcome::Failed(error);
            }
        }
        match self.phone_op(|module, s| module.get_firmware(s)) {
            Ok(()) | Err(Error::NotSupported) => {}
            Err(error) => {
                self.log_error("reading the firmware", error);
                return SlotOutcome::Failed(error);
            }
        }

        self.trace("[connected]");
        SlotOutcome::Connected
    }

    /// Takes the session down. A no-op once the machine is closed.
    pub fn terminate_connection(&mut self) -> Result<(), Error> {
        if !self.opened {
            return Ok(());
        }
        self.trace("[terminating]");

        if self.configs[self.current_config].start_info && self.phone_data.start_info_counter > 0 {
            let _ = self.phone_op(|module, s| module.show_start_info(s, false));
        }
        if self.phone.is_some() {
            self.phone_op(|module, s| module.terminate(s))?;
        }
        self.close_connection()?;
        self.di.close_output();
        self.opened = false;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.opened && self.phone.is_some()
    }

    /// Requests cancellation of the in-flight wait. Safe to call from a
    /// signal handler or another thread; the flag stays set until
    /// [`StateMachine::clear_abort`].
    pub fn abort_operation(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn clear_abort(&self) {
        self.abort.store(false, Ordering::Relaxed);
    }

    // --- request/response engine -----------------------------------------

    /// Runs a phone-module operation with the module temporarily detached,
    /// so the operation can drive this machine (and dispatch back into the
    /// module) without aliasing.
    pub(crate) fn phone_op(
        &mut self,
        f: impl FnOnce(&mut dyn PhoneModule, &mut StateMachine) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut module = self.phone.take().ok_or(Error::NotConnected)?;
        let result = f(module.as_mut(), self);
        self.phone = Some(module);
        result
    }

    fn send_message(&mut self, payload: &[u8], msg_type: u8) -> Result<(), Error> {
        self.with_di(|di| di.dump_frame(Direction::Sent, msg_type, payload));
        let (device, protocol) = match (self.device.as_mut(), self.protocol.as_mut()) {
            (Some(device), Some(protocol)) => (device, protocol),
            _ => return Err(Error::NotConnected),
        };
        protocol.write_message(device.as_mut(), payload, msg_type)
    }

    /// Sends a request and blocks until a dispatcher settles it, the retry
    /// budget runs out, or the wait is aborted. `request == RequestId::None`
    /// sends fire-and-forget. `timeout` is counted in poll rounds of
    /// roughly [`DEFAULT_WAIT_SLEEP`] each plus the read window.
    pub fn wait_for(
        &mut self,
        module: &mut dyn PhoneModule,
        payload: &[u8],
        msg_type: u8,
        timeout: u32,
        request: RequestId,
    ) -> Result<(), Error> {
        if self.configs[self.current_config].start_info && self.phone_data.start_info_counter > 0 {
            self.phone_data.start_info_counter -= 1;
            if self.phone_data.start_info_counter == 0 {
                let _ = module.show_start_info(self, false);
            }
        }

        self.phone_data.request_id = request;
        self.phone_data.dispatch_error = Err(Error::Timeout);

        for reply in 0..self.reply_num {
            if reply != 0 {
                self.trace_error(&format!("[retry {reply} for type 0x{msg_type:02X}]"));
            }
            self.send_message(payload, msg_type)?;

            if request == RequestId::None {
                return Ok(());
            }

            match self.wait_for_once(module, payload, msg_type, timeout) {
                Err(Error::Timeout) => continue,
                settled => return settled,
            }
        }
        Err(Error::Timeout)
    }

    /// One wait window: polls the device, counts idle rounds, and returns
    /// the dispatcher's outcome as soon as the pending request is cleared.
    fn wait_for_once(
        &mut self,
        module: &mut dyn PhoneModule,
        payload: &[u8],
        msg_type: u8,
        timeout: u32,
    ) -> Result<(), Error> {
        let mut idle = 0u32;
        loop {
            // Park a copy of the outgoing frame where the dispatcher's
            // diagnostics can see it, strictly for the span of this poll.
            if !payload.is_empty() {
                self.phone_data.sent_msg = Some(Message::new(msg_type, payload.to_vec()));
            }

            let received = match self.read_device_with(module, true) {
                Ok(count) => count,
                Err(error) => {
                    self.phone_data.sent_msg = None;
                    return Err(error);
                }
            };
            if received > 0 {
                idle = 0;
            } else {
                if self.abort.load(Ordering::Relaxed) {
                    self.phone_data.sent_msg = None;
                    return Err(Error::Aborted);
                }
                std::thread::sleep(self.wait_sleep);
            }

            self.phone_data.sent_msg = None;

            if self.phone_data.request_id == RequestId::None {
                return self.phone_data.dispatch_error;
            }
            idle += 1;
            if idle >= timeout {
                return Err(Error::Timeout);
            }
        }
    }

    /// Pumps pending bytes into the framing parser, dispatching every
    /// completed frame. With `wait_for_reply` the poll insists for up to
    /// one wall-clock second tick; otherwise one read attempt is made.
    /// Returns the number of bytes consumed.
    pub fn read_device(&mut self, wait_for_reply: bool) -> Result<usize, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let mut module = self.phone.take().ok_or(Error::NotConnected)?;
        let result = self.read_device_with(module.as_mut(), wait_for_reply);
        self.phone = Some(module);
        result
    }

    pub(crate) fn read_device_with(
        &mut self,
        module: &mut dyn PhoneModule,
        wait_for_reply: bool,
    ) -> Result<usize, Error> {
        if !self.opened {
            return Err(Error::NotConnected);
        }

        let mut buf = [0u8; READ_CHUNK];
        let started = wall_second();
        let mut count = 0usize;
        loop {
            if self.abort.load(Ordering::Relaxed) {
                break;
            }
            count = {
                let device = self.device.as_mut().ok_or(Error::NotConnected)?;
                device.read(&mut buf)?
            };
            if !wait_for_reply || count > 0 {
                break;
            }
            std::thread::sleep(self.read_sleep);
            // Both bounds matter: the caller's loop meters total wait in
            // rounds, this one guarantees a round ends at the next second
            // tick even on a silent line.
            if wall_second() != started {
                break;
            }
        }

        for &byte in &buf[..count] {
            let completed = {
                let (device, protocol) = match (self.device.as_mut(), self.protocol.as_mut()) {
                    (Some(device), Some(protocol)) => (device, protocol),
                    _ => return Err(Error::NotConnected),
                };
                protocol.feed(device.as_mut(), byte)?
            };
            if let Some(msg) = completed {
                let outcome = self.dispatch_message(module, msg);
                self.phone_data.dispatch_error = outcome;
            }
        }
        Ok(count)
    }

    /// Routes one completed frame: user table first, then the module's
    /// reply table, then the diagnostic / translation policy.
    pub(crate) fn dispatch_message(
        &mut self,
        module: &mut dyn PhoneModule,
        msg: Message,
    ) -> Result<(), Error> {
        self.with_di(|di| di.dump_frame(Direction::Received, msg.msg_type, &msg.buffer));

        let mut outcome: Result<(), Error> = Err(Error::UnknownFrame);
        if let Some(table) = self.user.reply_functions.take() {
            outcome = dispatch::run_user_table(&table, &msg, self);
            if self.user.reply_functions.is_none() {
                self.user.reply_functions = Some(table);
            }
        }
        // A user entry that recognised the frame owns it, even when it was
        // not the one awaited; only a complete miss falls through.
        if outcome == Err(Error::UnknownFrame) {
            outcome = module.dispatch(&msg, self);
        }

        // The auto-detection probe deliberately pokes phones with frames
        // they may not know; keep its noise out of the diagnostics.
        if module.models() != phone::PROBE_MODULE_MODELS {
            let diagnose = matches!(
                outcome,
                Err(Error::UnknownResponse | Error::UnknownFrame | Error::FrameNotRequested)
            );
            match outcome {
                Err(Error::UnknownResponse) => self.trace_error("unknown response"),
                Err(Error::UnknownFrame) => self.trace_error("unknown frame"),
                Err(Error::FrameNotRequested) => {
                    self.trace_error("frame arrived outside its request window")
                }
                _ => {}
            }
            if matches!(outcome, Err(Error::UnknownFrame | Error::FrameNotRequested)) {
                // Let the retry loop re-send rather than surfacing a frame
                // level problem to the caller.
                outcome = Err(Error::Timeout);
            }
            if diagnose {
                if let Some(sent) = self.phone_data.sent_msg.take() {
                    self.trace_error(&format!(
                        "last sent frame type 0x{:02X}/length {}",
                        sent.msg_type,
                        sent.len()
                    ));
                    self.with_di(|di| di.dump_frame(Direction::Sent, sent.msg_type, &sent.buffer));
                    self.phone_data.sent_msg = Some(sent);
                }
                self.trace_error(&format!(
                    "received frame type 0x{:02X}/length {}",
                    msg.msg_type,
                    msg.len()
                ));
            }
        }

        self.phone_data.request_msg = Some(msg);
        outcome
    }

    // --- phone operations -------------------------------------------------

    pub fn get_manufacturer(&mut self) -> Result<String, Error> {
        self.phone_op(|module, s| module.get_manufacturer(s))?;
        Ok(self.phone_data.manufacturer.clone())
    }

    pub fn get_model(&mut self) -> Result<String, Error> {
        self.phone_op(|module, s| module.get_model(s))?;
        Ok(self.phone_data.model.clone())
    }

    /// Firmware version string; `phone_data()` additionally carries the
    /// parsed numeric version and its date when the phone reports them.
    pub fn get_firmware(&mut self) -> Result<String, Error> {
        self.phone_op(|module, s| module.get_firmware(s))?;
        Ok(self.phone_data.version.clone())
    }

    pub fn get_imei(&mut self) -> Result<String, Error> {
        self.phone_op(|module, s| module.get_imei(s))?;
        Ok(self.phone_data.imei.clone())
    }

    pub fn get_hardware(&mut self) -> Result<String, Error> {
        if self.phone_data.hardware_cache.is_empty() {
            self.phone_op(|module, s| module.get_hardware(s))?;
        }
        Ok(self.phone_data.hardware_cache.clone())
    }

    pub fn get_product_code(&mut self) -> Result<String, Error> {
        if self.phone_data.product_code_cache.is_empty() {
            self.phone_op(|module, s| module.get_product_code(s))?;
        }
        Ok(self.phone_data.product_code_cache.clone())
    }

    pub fn get_date_time(&mut self) -> Result<NaiveDateTime, Error> {
        self.phone_op(|module, s| module.get_date_time(s))?;
        self.phone_data.date_time.ok_or(Error::Unknown)
    }

    pub fn set_date_time(&mut self, when: &NaiveDateTime) -> Result<(), Error> {
        let when = *when;
        self.phone_op(move |module, s| module.set_date_time(s, &when))
    }

    // --- test scaffolding -------------------------------------------------

    /// Wires arbitrary layer implementations straight into the machine,
    /// bypassing configuration. The connection counts as opened.
    #[cfg(test)]
    pub(crate) fn attach_for_test(
        &mut self,
        device: Box<dyn DeviceAccess>,
        protocol: Box<dyn Protocol>,
        module: Box<dyn PhoneModule>,
    ) {
        self.config_num = 1;
        self.reply_num = 1;
        self.connection_type = Some(ConnectionType::None);
        self.device = Some(device);
        self.protocol = Some(protocol);
        self.phone = Some(module);
        self.phone_data = PhoneData::fresh();
        self.opened = true;
    }
}

fn wall_second() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FramePattern;
    use crate::test_helpers::{MockDevice, Probe, RecordingPhone, TestProtocol};

    fn mock_machine(reads: Vec<Vec<u8>>) -> (StateMachine, Probe) {
        let probe = Probe::default();
        let mut s = StateMachine::new();
        s.set_poll_intervals(Duration::from_millis(1), Duration::from_millis(1));
        s.attach_for_test(
            Box::new(MockDevice::with_reads(reads)),
            Box::new(TestProtocol::new()),
            Box::new(RecordingPhone::new(probe.clone())),
        );
        (s, probe)
    }

    #[test]
    fn request_reply_round_trip() {
        let frame = TestProtocol::encode(RecordingPhone::MSG_MODEL, b"6230i");
        let (mut s, probe) = mock_machine(vec![frame]);
        assert_eq!(s.get_model().unwrap(), "6230i");
        // The handler saw its own request pending; settling cleared it.
        assert_eq!(probe.state().seen_request, Some(RequestId::GetModel));
        assert_eq!(s.phone_data().request_id, RequestId::None);
    }

    #[test]
    fn need_another_answer_keeps_request_pending() {
        let mut chunk = TestProtocol::encode(RecordingPhone::MSG_TWO_PART, &[0xAA]);
        chunk.extend(TestProtocol::encode(RecordingPhone::MSG_TWO_PART, &[0xBB]));
        let (mut s, probe) = mock_machine(vec![chunk]);
        assert_eq!(s.get_firmware().unwrap(), "two-part");
        assert_eq!(probe.state().partial, 2);
        assert_eq!(s.phone_data().request_id, RequestId::None);
    }

    #[test]
    fn abort_terminates_the_wait() {
        let (mut s, _probe) = mock_machine(vec![]);
        s.abort_operation();
        assert_eq!(s.get_model(), Err(Error::Aborted));
        // The flag is sticky until explicitly cleared.
        assert_eq!(s.get_model(), Err(Error::Aborted));
        s.clear_abort();
    }

    #[test]
    fn silent_line_times_out() {
        let (mut s, _probe) = mock_machine(vec![]);
        assert_eq!(s.get_model(), Err(Error::Timeout));
    }

    #[test]
    fn unrequested_frame_translates_to_timeout() {
        // A reply entry exists for this frame, but nothing awaits it.
        let frame = TestProtocol::encode(RecordingPhone::MSG_MODEL, b"x");
        let (mut s, probe) = mock_machine(vec![frame]);
        s.read_device(false).unwrap();
        assert_eq!(s.phone_data().dispatch_error, Err(Error::Timeout));
        assert!(s.phone_data().model.is_empty());
        assert!(probe.state().seen_request.is_none());
    }

    #[test]
    fn unknown_frame_translates_to_timeout() {
        let frame = TestProtocol::encode(0x77, &[1, 2]);
        let (mut s, _probe) = mock_machine(vec![frame]);
        s.read_device(false).unwrap();
        assert_eq!(s.phone_data().dispatch_error, Err(Error::Timeout));
    }

    #[test]
    fn incoming_entries_fire_without_a_waiter() {
        let frame = TestProtocol::encode(RecordingPhone::MSG_INCOMING, &[]);
        let (mut s, probe) = mock_machine(vec![frame]);
        s.read_device(false).unwrap();
        assert_eq!(probe.state().incoming, 1);
        assert_eq!(s.phone_data().dispatch_error, Ok(()));
    }

    fn user_grabs(_msg: &Message, s: &mut StateMachine) -> Result<(), Error> {
        s.phone_data_mut().manufacturer = "user-table".to_owned();
        Ok(())
    }

    #[test]
    fn user_reply_table_is_consulted_first() {
        let frame = TestProtocol::encode(RecordingPhone::MSG_INCOMING, &[]);
        let (mut s, probe) = mock_machine(vec![frame]);
        s.set_user_reply_functions(vec![UserReplyEntry {
            pattern: FramePattern::SingleByte {
                msg_type: RecordingPhone::MSG_INCOMING,
                subtype: None,
            },
            request: RequestId::IncomingFrame,
            handler: user_grabs,
        }]);
        s.read_device(false).unwrap();
        assert_eq!(s.phone_data().manufacturer, "user-table");
        assert_eq!(probe.state().incoming, 0);
    }

    #[test]
    fn start_info_counts_down_and_clears_banner() {
        let (mut s, probe) = mock_machine(vec![]);
        s.get_config_mut(Some(0)).unwrap().start_info = true;
        s.phone_data_mut().start_info_counter = START_INFO_REQUESTS;

        for _ in 0..29 {
            s.phone_op(|m, s| s.wait_for(m, &[0x00], 0x42, 1, RequestId::None))
                .unwrap();
        }
        assert!(probe.state().start_info.is_empty());

        s.phone_op(|m, s| s.wait_for(m, &[0x00], 0x42, 1, RequestId::None))
            .unwrap();
        assert_eq!(probe.state().start_info, vec![false]);

        // Counter exhausted: no further banner traffic.
        s.phone_op(|m, s| s.wait_for(m, &[0x00], 0x42, 1, RequestId::None))
            .unwrap();
        assert_eq!(probe.state().start_info, vec![false]);
    }

    #[test]
    fn read_device_without_connection_is_an_error() {
        let mut s = StateMachine::new();
        assert_eq!(s.read_device(false), Err(Error::NotConnected));
    }

    // --- configuration ladder --------------------------------------------

    #[test]
    fn ladder_falls_back_to_next_slot() {
        let mut s = StateMachine::new();
        {
            let cfg = s.get_config_mut(Some(0)).unwrap();
            cfg.connection = "fbus".to_owned();
            cfg.device = "/nonexistent/ttyHL0".to_owned();
        }
        s.get_config_mut(Some(1)).unwrap().connection = "none".to_owned();
        s.set_config_num(2);

        s.init_connection(3).unwrap();
        assert_eq!(s.current_config_index(), 1);
        assert!(s.is_connected());
        assert_eq!(s.phone_data().model, "dummy");
        assert_eq!(s.phone_data().manufacturer, "Dummy");
        s.terminate_connection().unwrap();
    }

    #[test]
    fn unknown_configured_model_retries_with_autodetection() {
        let mut s = StateMachine::new();
        {
            let cfg = s.get_config_mut(Some(0)).unwrap();
            cfg.connection = "none".to_owned();
            cfg.model = "MadeUp".to_owned();
        }
        s.set_config_num(1);

        s.init_connection(3).unwrap();
        // The stale model was dropped in place and auto-detection took
        // over.
        assert_eq!(s.get_config(Some(0)).unwrap().model, "");
        assert_eq!(s.phone_data().model, "dummy");
        s.terminate_connection().unwrap();
    }

    #[test]
    fn failing_last_slot_leaves_machine_closed() {
        let mut s = StateMachine::new();
        {
            let cfg = s.get_config_mut(Some(0)).unwrap();
            cfg.connection = "fbus".to_owned();
            cfg.device = "/nonexistent/ttyHL0".to_owned();
        }
        s.set_config_num(1);

        let error = s.init_connection(3).unwrap_err();
        assert!(error.is_recoverable_device_error());
        assert!(!s.is_connected());
    }

    #[test]
    fn disabled_backend_surfaces_from_ladder() {
        let mut s = StateMachine::new();
        s.get_config_mut(Some(0)).unwrap().connection = "bluephonet".to_owned();
        s.set_config_num(1);
        assert_eq!(s.init_connection(3), Err(Error::Disabled));
    }

    #[test]
    fn unknown_connection_string_fails_the_ladder() {
        let mut s = StateMachine::new();
        s.get_config_mut(Some(0)).unwrap().connection = "warpdrive".to_owned();
        s.set_config_num(1);
        assert_eq!(s.init_connection(3), Err(Error::UnknownConnection));
    }

    #[test]
    fn empty_slots_end_in_unconfigured() {
        let mut s = StateMachine::new();
        s.set_config_num(2);
        assert_eq!(s.init_connection(3), Err(Error::Unconfigured));
    }

    #[test]
    fn terminate_is_idempotent_once_closed() {
        let mut s = StateMachine::new();
        assert_eq!(s.terminate_connection(), Ok(()));

        s.get_config_mut(Some(0)).unwrap().connection = "none".to_owned();
        s.set_config_num(1);
        s.init_connection(3).unwrap();
        assert_eq!(s.terminate_connection(), Ok(()));
        assert_eq!(s.terminate_connection(), Ok(()));
        assert!(!s.is_connected());
    }

    #[test]
    fn identity_queries_over_none_connection() {
        let mut s = StateMachine::new();
        s.get_config_mut(Some(0)).unwrap().connection = "none".to_owned();
        s.set_config_num(1);
        s.init_connection(3).unwrap();

        assert_eq!(s.get_manufacturer().unwrap(), "Dummy");
        assert_eq!(s.get_firmware().unwrap(), "1.0");
        assert_eq!(s.get_imei().unwrap(), "999999999999999");
        assert!(s.get_date_time().is_ok());
        assert_eq!(s.used_connection(), Some(ConnectionType::None));
        s.terminate_connection().unwrap();
    }
}
