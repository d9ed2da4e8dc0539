//! Configuration sections and rc-file discovery.
//!
//! Sections are named `[gammu]`, `[gammu1]`, ... for compatibility with
//! existing rc files. A missing file or section still yields a usable
//! slot 0 filled with built-in defaults, reported as `UsingDefaults` so
//! callers can tell.

use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::ini::IniDocument;
use crate::phones::{self, Feature};

#[cfg(windows)]
pub const DEFAULT_DEVICE: &str = "com2:";
#[cfg(not(windows))]
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

pub const DEFAULT_CONNECTION: &str = "at";

/// One configuration slot. An empty `connection` marks the slot as not
/// configured; the init ladder skips it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path or address of the physical endpoint.
    pub device: String,
    /// Connection name, with optional `-nodtr`/`-nopower`/baud suffixes.
    pub connection: String,
    /// Forced phone module; empty means auto-detect.
    pub model: String,
    /// Push host time into the phone at init.
    pub sync_time: bool,
    /// Take an advisory lock on the device node.
    pub lock_device: bool,
    /// Show the connection banner for the first requests.
    pub start_info: bool,
    pub debug_file: String,
    pub debug_level: String,
    /// Route traces to the process-global sink instead of a per-machine
    /// one.
    pub use_global_debug_file: bool,
    pub text_reminder: String,
    pub text_meeting: String,
    pub text_call: String,
    pub text_birthday: String,
    pub text_memo: String,
    /// Explicit capability override from the `features` key.
    pub phone_features: Vec<Feature>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: String::new(),
            connection: String::new(),
            model: String::new(),
            sync_time: false,
            lock_device: false,
            start_info: false,
            debug_file: String::new(),
            debug_level: String::new(),
            use_global_debug_file: true,
            text_reminder: String::new(),
            text_meeting: String::new(),
            text_call: String::new(),
            text_birthday: String::new(),
            text_memo: String::new(),
            phone_features: Vec::new(),
        }
    }
}

fn apply_defaults(cfg: &mut Config) {
    cfg.device = DEFAULT_DEVICE.to_owned();
    cfg.connection = DEFAULT_CONNECTION.to_owned();
    cfg.model.clear();
    cfg.sync_time = false;
    cfg.lock_device = false;
    cfg.start_info = false;
    cfg.debug_file.clear();
    cfg.debug_level.clear();
    cfg.use_global_debug_file = true;
    cfg.text_reminder = "Reminder".to_owned();
    cfg.text_meeting = "Meeting".to_owned();
    cfg.text_call = "Call".to_owned();
    cfg.text_birthday = "Birthday".to_owned();
    cfg.text_memo = "Memo".to_owned();
    cfg.phone_features.clear();
}

fn section_name(num: usize) -> String {
    if num == 0 {
        "gammu".to_owned()
    } else {
        format!("gammu{num}")
    }
}

/// Fills `cfg` from section `num` of `doc`. On any failure slot 0 is
/// still made valid with defaults (`UsingDefaults`); higher slots report
/// the failure as-is.
pub(crate) fn fill_from_ini(
    cfg: &mut Config,
    doc: Option<&IniDocument>,
    num: usize,
) -> Result<(), Error> {
    cfg.use_global_debug_file = true;

    let fail = |cfg: &mut Config, error: Error| {
        if num == 0 {
            apply_defaults(cfg);
            Err(Error::UsingDefaults)
        } else {
            Err(error)
        }
    };

    let Some(doc) = doc else {
        return fail(cfg, Error::Unconfigured);
    };
    let section = section_name(num);
    if doc.section(&section).is_none() {
        return fail(cfg, Error::MissingSection);
    }

    cfg.device = doc
        .value(&section, "device")
        .or_else(|| doc.value(&section, "port"))
        .unwrap_or(DEFAULT_DEVICE)
        .to_owned();
    cfg.connection = doc
        .value(&section, "connection")
        .unwrap_or(DEFAULT_CONNECTION)
        .to_owned();
    cfg.sync_time = doc.bool_value(&section, "synchronizetime", false);
    cfg.debug_file = doc
        .value(&section, "logfile")
        .map(expand_user_path)
        .unwrap_or_default();
    cfg.lock_device = doc.bool_value(&section, "use_locking", false);
    cfg.model = match doc.value(&section, "model") {
        None => String::new(),
        // "auto" is spelled-out auto-detection.
        Some(m) if m == "auto" => String::new(),
        Some(m) => m.to_owned(),
    };
    cfg.debug_level = doc.value(&section, "logformat").unwrap_or("").to_owned();
    cfg.start_info = doc.bool_value(&section, "startinfo", false);

    cfg.text_reminder = doc.value(&section, "reminder").unwrap_or("Reminder").to_owned();
    cfg.text_meeting = doc.value(&section, "meeting").unwrap_or("Meeting").to_owned();
    cfg.text_call = doc.value(&section, "call").unwrap_or("Call").to_owned();
    cfg.text_birthday = doc.value(&section, "birthday").unwrap_or("Birthday").to_owned();
    cfg.text_memo = doc.value(&section, "memo").unwrap_or("Memo").to_owned();

    match doc.value(&section, "features") {
        None => cfg.phone_features.clear(),
        Some(text) => match phones::parse_feature_string(text) {
            Ok(features) => cfg.phone_features = features,
            Err(error) => return fail(cfg, error),
        },
    }
    Ok(())
}

/// `~` expansion against `$HOME`.
pub fn expand_user_path(path: &str) -> String {
    expand_with_home(path, std::env::var("HOME").ok().as_deref())
}

fn expand_with_home(path: &str, home: Option<&str>) -> String {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => format!("{home}{rest}"),
        _ => path.to_owned(),
    }
}

fn try_read(path: &Path) -> Result<IniDocument, Error> {
    log::debug!("looking for configuration at {}", path.display());
    IniDocument::read_file(path)
}

/// Locates and parses the rc file: an explicit override, the platform's
/// per-user locations, then the system fallback. The first readable file
/// wins.
pub fn find_config(force_path: Option<&Path>) -> Result<IniDocument, Error> {
    if let Some(path) = force_path {
        return try_read(path);
    }

    let mut candidates: Vec<PathBuf> = Vec::new();

    #[cfg(windows)]
    if let Ok(appdata) = std::env::var("APPDATA") {
        candidates.push(Path::new(&appdata).join("gammurc"));
    }

    match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) => candidates.push(Path::new(&xdg).join("gammu").join("config")),
        Err(_) => {
            if let Ok(home) = std::env::var("HOME") {
                candidates.push(Path::new(&home).join(".config").join("gammu").join("config"));
            }
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        candidates.push(Path::new(&home).join(".gammurc"));
    }

    #[cfg(windows)]
    if let (Ok(drive), Ok(path)) = (std::env::var("HOMEDRIVE"), std::env::var("HOMEPATH")) {
        candidates.push(Path::new(&format!("{drive}{path}")).join("gammurc"));
    }

    for candidate in &candidates {
        if let Ok(doc) = try_read(candidate) {
            return Ok(doc);
        }
    }

    #[cfg(windows)]
    let fallback = Path::new("gammurc");
    #[cfg(not(windows))]
    let fallback = Path::new("/etc/gammurc");
    try_read(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[gammu]
port = /dev/ttyACM2
connection = dku5-nopower
model = auto
synchronizetime = yes
logfile = ~/gammu.log
logformat = textall
use_locking = yes
startinfo = yes
reminder = Erinnerung

[gammu1]
device = /dev/rfcomm3
connection = bluephonet
model = 6230i
features = series40_30, radio
";

    #[test]
    fn reads_primary_section() {
        let doc = IniDocument::parse(SAMPLE);
        let mut cfg = Config::default();
        fill_from_ini(&mut cfg, Some(&doc), 0).unwrap();
        assert_eq!(cfg.device, "/dev/ttyACM2");
        assert_eq!(cfg.connection, "dku5-nopower");
        // "auto" collapses to the empty auto-detect marker.
        assert_eq!(cfg.model, "");
        assert!(cfg.sync_time);
        assert!(cfg.lock_device);
        assert!(cfg.start_info);
        assert_eq!(cfg.debug_level, "textall");
        assert_eq!(cfg.text_reminder, "Erinnerung");
        assert_eq!(cfg.text_meeting, "Meeting");
    }

    #[test]
    fn reads_numbered_section_with_features() {
        let doc = IniDocument::parse(SAMPLE);
        let mut cfg = Config::default();
        fill_from_ini(&mut cfg, Some(&doc), 1).unwrap();
        assert_eq!(cfg.device, "/dev/rfcomm3");
        assert_eq!(cfg.model, "6230i");
        assert_eq!(
            cfg.phone_features,
            vec![Feature::Series40_30, Feature::Radio]
        );
    }

    #[test]
    fn missing_document_defaults_slot_zero() {
        let mut cfg = Config::default();
        assert_eq!(fill_from_ini(&mut cfg, None, 0), Err(Error::UsingDefaults));
        assert_eq!(cfg.device, DEFAULT_DEVICE);
        assert_eq!(cfg.connection, DEFAULT_CONNECTION);
        assert_eq!(cfg.text_memo, "Memo");
    }

    #[test]
    fn missing_section_fails_higher_slots() {
        let doc = IniDocument::parse(SAMPLE);
        let mut cfg = Config::default();
        assert_eq!(
            fill_from_ini(&mut cfg, Some(&doc), 4),
            Err(Error::MissingSection)
        );
    }

    #[test]
    fn bad_feature_string_still_defaults_slot_zero() {
        let doc = IniDocument::parse("[gammu]\nfeatures = warp_drive\n");
        let mut cfg = Config::default();
        assert_eq!(fill_from_ini(&mut cfg, Some(&doc), 0), Err(Error::UsingDefaults));
        assert_eq!(cfg.connection, DEFAULT_CONNECTION);
    }

    #[test]
    fn tilde_expansion() {
        assert_eq!(
            expand_with_home("~/trace.log", Some("/home/me")),
            "/home/me/trace.log"
        );
        assert_eq!(expand_with_home("~/x", None), "~/x");
        assert_eq!(expand_with_home("/abs/x", Some("/home/me")), "/abs/x");
    }

    #[test]
    fn forced_path_wins_discovery() {
        let dir = std::env::temp_dir().join(format!("handset-link-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("rc");
        std::fs::write(&file, "[gammu]\nconnection = none\n").unwrap();
        let doc = find_config(Some(&file)).unwrap();
        assert_eq!(doc.value("gammu", "connection"), Some("none"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_forced_path_reports_open_error() {
        assert_eq!(
            find_config(Some(Path::new("/nonexistent/rc"))).unwrap_err(),
            Error::CantOpenFile
        );
    }
}
