//! Minimal INI reader for the rc-file format: `[section]` headers,
//! `key = value` pairs, `;`/`#` comments. Lookups are case-insensitive on
//! both section and key, matching how the files have historically been
//! written.

use std::path::Path;

use crate::error::Error;

#[derive(Debug, Clone, Default)]
pub struct IniSection {
    pub name: String,
    entries: Vec<(String, String)>,
}

impl IniSection {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    sections: Vec<IniSection>,
}

impl IniDocument {
    pub fn read_file(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|_| Error::CantOpenFile)?;
        Ok(Self::parse(&text))
    }

    /// Lenient line parser; anything that is not a header or a pair is
    /// skipped.
    pub fn parse(text: &str) -> Self {
        let mut doc = IniDocument::default();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                doc.sections.push(IniSection {
                    name: name.trim().to_owned(),
                    entries: Vec::new(),
                });
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if let Some(section) = doc.sections.last_mut() {
                section
                    .entries
                    .push((key.trim().to_owned(), value.trim().to_owned()));
            }
        }
        doc
    }

    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| s.value(key))
    }

    /// `true`/`yes`/`1` and `false`/`no`/`0`; anything else falls back to
    /// the default.
    pub fn bool_value(&self, section: &str, key: &str, default: bool) -> bool {
        match self.value(section, key).map(str::to_ascii_lowercase) {
            Some(v) if matches!(v.as_str(), "true" | "yes" | "1") => true,
            Some(v) if matches!(v.as_str(), "false" | "no" | "0") => false,
            _ => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
; front matter comment
[gammu]
device = /dev/ttyACM0
connection = fbus
use_locking = yes

[gammu1]
# other port
Device = /dev/rfcomm0
Connection = bluephonet
";

    #[test]
    fn sections_and_values() {
        let doc = IniDocument::parse(SAMPLE);
        assert_eq!(doc.value("gammu", "device"), Some("/dev/ttyACM0"));
        assert_eq!(doc.value("gammu1", "connection"), Some("bluephonet"));
        assert_eq!(doc.value("gammu2", "device"), None);
    }

    #[test]
    fn lookups_ignore_case() {
        let doc = IniDocument::parse(SAMPLE);
        assert_eq!(doc.value("GAMMU1", "DEVICE"), Some("/dev/rfcomm0"));
    }

    #[test]
    fn bools() {
        let doc = IniDocument::parse(SAMPLE);
        assert!(doc.bool_value("gammu", "use_locking", false));
        assert!(!doc.bool_value("gammu", "startinfo", false));
        assert!(doc.bool_value("gammu", "startinfo", true));
    }

    #[test]
    fn junk_lines_are_skipped() {
        let doc = IniDocument::parse("orphan = 1\n[ok]\nnoise\nkey=v\n");
        assert_eq!(doc.value("ok", "key"), Some("v"));
        assert!(doc.section("orphan").is_none());
    }
}
