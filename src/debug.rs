//! Trace sinks for wire traffic.
//!
//! Besides the usual [`log`] events, the engine can mirror every sent and
//! received frame into a per-machine or process-global sink. The level
//! names accepted in the `logformat` configuration key match the original
//! tooling so existing log post-processors keep working; `binary` emits
//! length-prefixed raw records instead of text.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::Error;

/// How much, and in which form, a sink records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugLevel {
    #[default]
    Nothing,
    /// Sent/received frame dumps.
    Text,
    /// Frame dumps plus every trace line.
    TextAll,
    /// Only error trace lines.
    TextError,
    /// Like `Text`, with a timestamp on each line.
    TextDate,
    /// Like `TextAll`, with a timestamp on each line.
    TextAllDate,
    /// Like `TextError`, with a timestamp on each line.
    TextErrorDate,
    /// Length-prefixed raw records: `direction(1) | type(1) | len-BE(2) | bytes`.
    Binary,
}

impl DebugLevel {
    /// Parses a `logformat` value. Unknown names are rejected.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "" | "nothing" => Some(DebugLevel::Nothing),
            "text" => Some(DebugLevel::Text),
            "textall" => Some(DebugLevel::TextAll),
            "texterror" => Some(DebugLevel::TextError),
            "textdate" => Some(DebugLevel::TextDate),
            "textalldate" => Some(DebugLevel::TextAllDate),
            "texterrordate" => Some(DebugLevel::TextErrorDate),
            "binary" => Some(DebugLevel::Binary),
            _ => None,
        }
    }

    fn with_date(self) -> bool {
        matches!(
            self,
            DebugLevel::TextDate | DebugLevel::TextAllDate | DebugLevel::TextErrorDate
        )
    }

    fn dumps_frames(self) -> bool {
        matches!(
            self,
            DebugLevel::Text | DebugLevel::TextAll | DebugLevel::TextDate | DebugLevel::TextAllDate
        )
    }

    fn text_lines(self, error_line: bool) -> bool {
        match self {
            DebugLevel::Text
            | DebugLevel::TextAll
            | DebugLevel::TextDate
            | DebugLevel::TextAllDate => true,
            DebugLevel::TextError | DebugLevel::TextErrorDate => error_line,
            DebugLevel::Nothing | DebugLevel::Binary => false,
        }
    }
}

/// Direction tag used in dumps and binary records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    fn record_code(self) -> u8 {
        match self {
            Direction::Sent => 0x01,
            Direction::Received => 0x02,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Direction::Sent => "SENDING frame",
            Direction::Received => "RECEIVED frame",
        }
    }
}

/// One trace sink: a level plus an output stream.
///
/// Sink write failures are swallowed; tracing must never take the
/// connection down.
#[derive(Default)]
pub struct DebugInfo {
    pub level: DebugLevel,
    /// Redirect everything to the process-global sink instead of this one.
    pub use_global: bool,
    pub(crate) output: Option<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for DebugInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugInfo")
            .field("level", &self.level)
            .field("use_global", &self.use_global)
            .field("output", &self.output.is_some())
            .finish()
    }
}

impl DebugInfo {
    pub fn set_output(&mut self, output: Box<dyn Write + Send>) {
        self.output = Some(output);
    }

    /// Opens `path` for appending and directs the sink at it. An empty
    /// path detaches the current output.
    pub fn set_file(&mut self, path: &str) -> Result<(), Error> {
        if path.is_empty() {
            self.output = None;
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|_| Error::CantOpenFile)?;
        self.output = Some(Box::new(file));
        Ok(())
    }

    pub fn close_output(&mut self) {
        self.output = None;
    }

    /// Emits one trace line, subject to the level.
    pub fn line(&mut self, error_line: bool, text: &str) {
        if !self.level.text_lines(error_line) {
            return;
        }
        let mut prefix = String::new();
        if self.level.with_date() {
            let _ = write!(prefix, "{} ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        }
        if let Some(out) = self.output.as_mut() {
            let _ = writeln!(out, "{prefix}{text}");
        }
    }

    /// Records one frame: an annotated hex dump at the text levels, a raw
    /// record at the binary level.
    pub fn dump_frame(&mut self, direction: Direction, msg_type: u8, data: &[u8]) {
        if self.level == DebugLevel::Binary {
            self.binary_record(direction, msg_type, data);
            return;
        }
        if !self.level.dumps_frames() {
            return;
        }
        let header = format!(
            "{} type 0x{msg_type:02X}/length 0x{len:02X}/{len}",
            direction.label(),
            len = data.len()
        );
        self.line(false, &header);
        let dump = hex_dump(data);
        if let Some(out) = self.output.as_mut() {
            let _ = out.write_all(dump.as_bytes());
        }
    }

    fn binary_record(&mut self, direction: Direction, msg_type: u8, data: &[u8]) {
        let Some(out) = self.output.as_mut() else {
            return;
        };
        let len = data.len().min(u16::MAX as usize) as u16;
        let header = [
            direction.record_code(),
            msg_type,
            (len >> 8) as u8,
            (len & 0xFF) as u8,
        ];
        let _ = out.write_all(&header);
        let _ = out.write_all(&data[..len as usize]);
    }

    /// Version stamp written at ladder start when the sink is binary, so a
    /// record stream is self-describing.
    pub fn binary_version(&mut self, version: &str) {
        if self.level != DebugLevel::Binary {
            return;
        }
        let Some(out) = self.output.as_mut() else {
            return;
        };
        let len = version.len().min(u8::MAX as usize);
        let _ = out.write_all(&[len as u8]);
        let _ = out.write_all(&version.as_bytes()[..len]);
    }
}

/// 16 bytes per row with an ASCII gutter.
fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for row in data.chunks(16) {
        for (i, byte) in row.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02X}");
        }
        for _ in row.len()..16 {
            out.push_str("   ");
        }
        out.push_str("  ");
        for byte in row {
            out.push(if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}

static GLOBAL_DEBUG: OnceLock<Mutex<DebugInfo>> = OnceLock::new();

/// The process-global sink used by machines whose `use_global` flag is set.
pub fn global_debug() -> &'static Mutex<DebugInfo> {
    GLOBAL_DEBUG.get_or_init(|| Mutex::new(DebugInfo::default()))
}

pub(crate) fn lock_global() -> MutexGuard<'static, DebugInfo> {
    match global_debug().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
