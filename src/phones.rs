//! Known phone models and their capability flags.
//!
//! The table drives module selection: auto-detected model strings (either a
//! sales name like `6230i` or a product number like `RM-72`) are resolved
//! here, and the resolved feature set decides which vendor module takes the
//! connection.

use crate::error::Error;

/// Capability flags attached to a model entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Phone speaks the Alcatel binary extensions on top of AT.
    Alcatel,
    /// Phone exposes an OBEX service next to AT (Sony-Ericsson style).
    Obex,
    /// Series 40 3rd edition and newer firmware family.
    Series40_30,
    /// Filesystem version 2.
    Files2,
    /// Todo entries with 6-byte dates.
    Todo66,
    /// FM radio menus.
    Radio,
    /// Notes folder.
    Notes,
    /// SMS stored in the filesystem.
    SmsFiles,
    /// 6230i-style caller groups.
    Caller6230i,
    /// Battery status over the power frame.
    PowerBattery,
}

impl Feature {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "alcatel" => Some(Feature::Alcatel),
            "obex" => Some(Feature::Obex),
            "series40_30" | "series40" => Some(Feature::Series40_30),
            "files2" => Some(Feature::Files2),
            "todo66" => Some(Feature::Todo66),
            "radio" => Some(Feature::Radio),
            "notes" => Some(Feature::Notes),
            "sms_files" => Some(Feature::SmsFiles),
            "6230icaller" => Some(Feature::Caller6230i),
            "power_battery" => Some(Feature::PowerBattery),
            _ => None,
        }
    }
}

/// Parses the `features` configuration override, a comma- or
/// whitespace-separated list of flag names.
pub fn parse_feature_string(text: &str) -> Result<Vec<Feature>, Error> {
    let mut features = Vec::new();
    for name in text.split(|c: char| c == ',' || c.is_whitespace()) {
        if name.is_empty() {
            continue;
        }
        match Feature::from_name(name) {
            Some(f) => features.push(f),
            None => return Err(Error::BadData),
        }
    }
    Ok(features)
}

/// One static table row.
#[derive(Debug)]
pub struct PhoneModelEntry {
    /// Sales name, e.g. `6230i`.
    pub model: &'static str,
    /// Product number, e.g. `RM-72`.
    pub number: &'static str,
    pub features: &'static [Feature],
}

use Feature::*;

const SERIES40_30_SET: &[Feature] =
    &[Series40_30, Files2, Todo66, Radio, Notes, SmsFiles, PowerBattery];

/// Identified models. The `unknown` row is the lookup fallback; keep it
/// last.
static PHONE_MODELS: &[PhoneModelEntry] = &[
    PhoneModelEntry { model: "3310", number: "NHM-5", features: &[] },
    PhoneModelEntry { model: "3330", number: "NHM-6", features: &[] },
    PhoneModelEntry { model: "6110", number: "NSE-3", features: &[] },
    PhoneModelEntry { model: "6150", number: "NSM-1", features: &[] },
    PhoneModelEntry { model: "6210", number: "NPE-3", features: &[] },
    PhoneModelEntry { model: "6310", number: "NPE-4", features: &[] },
    PhoneModelEntry { model: "6310i", number: "NPL-1", features: &[] },
    PhoneModelEntry { model: "8310", number: "NHM-7", features: &[] },
    PhoneModelEntry {
        model: "6020",
        number: "RM-30",
        features: SERIES40_30_SET,
    },
    PhoneModelEntry {
        model: "6021",
        number: "RM-94",
        features: SERIES40_30_SET,
    },
    PhoneModelEntry {
        model: "6030",
        number: "RM-74",
        features: SERIES40_30_SET,
    },
    PhoneModelEntry {
        model: "6230",
        number: "RH-12",
        features: &[Series40_30, Radio, Notes, PowerBattery],
    },
    PhoneModelEntry {
        model: "6230i",
        number: "RM-72",
        features: &[Series40_30, Files2, Todo66, Radio, Notes, SmsFiles, Caller6230i],
    },
    PhoneModelEntry {
        model: "6170",
        number: "RM-47",
        features: SERIES40_30_SET,
    },
    PhoneModelEntry { model: "A500", number: "", features: &[Alcatel] },
    PhoneModelEntry { model: "OT535", number: "", features: &[Alcatel] },
    PhoneModelEntry { model: "OT735", number: "", features: &[Alcatel] },
    PhoneModelEntry { model: "K750", number: "", features: &[Obex] },
    PhoneModelEntry { model: "K750i", number: "", features: &[Obex] },
    PhoneModelEntry { model: "W800", number: "", features: &[Obex] },
    PhoneModelEntry { model: "Z530", number: "", features: &[Obex] },
    // Fallback row, must stay last.
    PhoneModelEntry { model: "unknown", number: "", features: &[] },
];

/// Looks an entry up by sales name or product number. Unrecognised input
/// resolves to the `unknown` row.
pub fn model_data(model: &str) -> &'static PhoneModelEntry {
    PHONE_MODELS
        .iter()
        .find(|e| {
            (!e.model.is_empty() && e.model.eq_ignore_ascii_case(model))
                || (!e.number.is_empty() && e.number.eq_ignore_ascii_case(model))
        })
        .unwrap_or(unknown_entry())
}

pub(crate) fn unknown_entry() -> &'static PhoneModelEntry {
    &PHONE_MODELS[PHONE_MODELS.len() - 1]
}

/// Owned, mutable copy of a table row; this is what lives in the
/// per-connection state so heuristics can add features without touching
/// the static table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhoneModelInfo {
    pub model: String,
    pub number: String,
    pub features: Vec<Feature>,
}

impl From<&'static PhoneModelEntry> for PhoneModelInfo {
    fn from(entry: &'static PhoneModelEntry) -> Self {
        PhoneModelInfo {
            model: entry.model.to_owned(),
            number: entry.number.to_owned(),
            features: entry.features.to_vec(),
        }
    }
}

impl PhoneModelInfo {
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn add_feature(&mut self, feature: Feature) {
        if !self.has_feature(feature) {
            self.features.push(feature);
        }
    }
}

/// Product numbers above these are assumed to be Series40 3rd-edition
/// hardware when the table has no row for them. Both values are educated
/// guesses over the known numbering; adjust when a counterexample shows
/// up.
pub const RM_SERIES40_GUESS: u32 = 167;
pub const RH_SERIES40_GUESS: u32 = 63;

/// Applies the unknown-Nokia heuristic: an unlisted `RM-n`/`RH-n` product
/// number above the guess threshold gets the Series40 feature bundle (plus
/// the 6230i caller groups for RM hardware). Returns whether anything was
/// guessed.
pub(crate) fn guess_series40(info: &mut PhoneModelInfo, probed_model: &str) -> bool {
    let caller_groups = if let Some(rest) = probed_model.strip_prefix("RM-") {
        if rest.parse::<u32>().map_or(true, |n| n <= RM_SERIES40_GUESS) {
            return false;
        }
        true
    } else if let Some(rest) = probed_model.strip_prefix("RH-") {
        if rest.parse::<u32>().map_or(true, |n| n <= RH_SERIES40_GUESS) {
            return false;
        }
        false
    } else {
        return false;
    };

    log::warn!("phone {probed_model} not in the model table, guessing Series40 firmware");
    info.add_feature(Series40_30);
    info.add_feature(Files2);
    info.add_feature(Todo66);
    info.add_feature(Radio);
    info.add_feature(Notes);
    info.add_feature(SmsFiles);
    if caller_groups {
        info.add_feature(Caller6230i);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_number() {
        assert_eq!(model_data("6230i").number, "RM-72");
        assert_eq!(model_data("RM-72").model, "6230i");
        assert_eq!(model_data("rm-72").model, "6230i");
        assert_eq!(model_data("T68i").model, "unknown");
    }

    #[test]
    fn rm_guess_above_threshold() {
        let mut info = PhoneModelInfo::from(unknown_entry());
        assert!(guess_series40(&mut info, "RM-217"));
        assert!(info.has_feature(Feature::Series40_30));
        assert!(info.has_feature(Feature::Caller6230i));
    }

    #[test]
    fn rh_guess_has_no_caller_groups() {
        let mut info = PhoneModelInfo::from(unknown_entry());
        assert!(guess_series40(&mut info, "RH-64"));
        assert!(info.has_feature(Feature::Series40_30));
        assert!(!info.has_feature(Feature::Caller6230i));
    }

    #[test]
    fn guess_respects_thresholds() {
        let mut info = PhoneModelInfo::from(unknown_entry());
        assert!(!guess_series40(&mut info, "RM-167"));
        assert!(!guess_series40(&mut info, "RH-63"));
        assert!(!guess_series40(&mut info, "NHM-5"));
        assert!(info.features.is_empty());
    }

    #[test]
    fn feature_string_parsing() {
        let parsed = parse_feature_string("series40_30, radio notes").unwrap();
        assert_eq!(
            parsed,
            vec![Feature::Series40_30, Feature::Radio, Feature::Notes]
        );
        assert_eq!(parse_feature_string("warp_drive"), Err(Error::BadData));
        assert!(parse_feature_string("").unwrap().is_empty());
    }
}
