//! Phone modules: one driver per vendor protocol family.
//!
//! A module implements the operations the coordinator consumes plus a
//! static reply table describing which incoming frames it understands.
//! Operations receive the state machine by reference (the module itself is
//! detached from the machine for the duration of the call) and drive the
//! wire through [`StateMachine::wait_for`].

#[cfg(feature = "alcatel")]
pub mod alcatel;
#[cfg(feature = "atgen")]
pub mod atgen;
#[cfg(feature = "atobex")]
pub mod atobex;
#[cfg(feature = "dummy")]
pub mod dummy;
#[cfg(feature = "gnapgen")]
pub mod gnapgen;
#[cfg(feature = "nokia6510")]
pub mod n6510;
#[cfg(feature = "nokia-auto")]
pub mod nauto;
#[cfg(feature = "obexgen")]
pub mod obexgen;
#[cfg(feature = "s60")]
pub mod s60;

use chrono::NaiveDateTime;

use crate::connection::ConnectionType;
use crate::error::Error;
use crate::phones::{self, Feature, PhoneModelInfo};
use crate::protocol::Message;
use crate::state::{PhoneData, StateMachine};

/// `models()` marker of the auto-detection probe; its dispatch noise is
/// exempt from diagnostics.
pub(crate) const PROBE_MODULE_MODELS: &str = "NAUTO";

pub trait PhoneModule {
    /// Space-separated model names this module serves, used by the
    /// explicit-model selection scan.
    fn models(&self) -> &'static str;

    fn initialise(&mut self, s: &mut StateMachine) -> Result<(), Error>;

    fn terminate(&mut self, s: &mut StateMachine) -> Result<(), Error>;

    fn get_manufacturer(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Fills `PhoneData::model` (and usually `model_info`).
    fn get_model(&mut self, s: &mut StateMachine) -> Result<(), Error>;

    fn get_firmware(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn get_imei(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn get_hardware(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn get_product_code(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn get_date_time(&mut self, _s: &mut StateMachine) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    fn set_date_time(&mut self, _s: &mut StateMachine, _when: &NaiveDateTime) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Puts the connection banner up (`true`) or takes it down (`false`).
    fn show_start_info(&mut self, _s: &mut StateMachine, _enable: bool) -> Result<(), Error> {
        Err(Error::NotSupported)
    }

    /// Runs `msg` against this module's reply table.
    fn dispatch(&mut self, msg: &Message, s: &mut StateMachine) -> Result<(), Error>;
}

/// Whether the coordinator may run the open/get-model/terminate probe on
/// this connection type. Links whose generic module works without a model
/// name skip it.
pub(crate) fn supports_auto_probe(connection: ConnectionType) -> bool {
    !matches!(
        connection,
        ConnectionType::None
            | ConnectionType::IrdaObex
            | ConnectionType::BlueObex
            | ConnectionType::BlueGnapbus
            | ConnectionType::IrdaGnapbus
            | ConnectionType::BlueS60
    )
}

/// Module used by the probe itself, chosen from the connection type alone.
pub(crate) fn provisional_module(connection: ConnectionType) -> Option<Box<dyn PhoneModule>> {
    #[cfg(feature = "dummy")]
    if connection == ConnectionType::None {
        return Some(Box::new(dummy::Dummy::new()));
    }
    #[cfg(feature = "atgen")]
    if connection.is_at_family() {
        return Some(Box::new(atgen::AtGen::new()));
    }
    #[cfg(feature = "obexgen")]
    if matches!(
        connection,
        ConnectionType::IrdaObex | ConnectionType::BlueObex
    ) {
        return Some(Box::new(obexgen::ObexGen::new()));
    }
    #[cfg(feature = "gnapgen")]
    if matches!(
        connection,
        ConnectionType::BlueGnapbus | ConnectionType::IrdaGnapbus
    ) {
        return Some(Box::new(gnapgen::GnapGen::new()));
    }
    #[cfg(feature = "s60")]
    if connection == ConnectionType::BlueS60 {
        return Some(Box::new(s60::S60Phone::new()));
    }
    #[cfg(feature = "nokia-auto")]
    if connection.is_nokia_link() {
        return Some(Box::new(nauto::NokiaAuto::new()));
    }
    let _ = connection;
    None
}

fn model_listed(models: &str, model: &str) -> bool {
    !model.is_empty() && models.split_whitespace().any(|m| m == model)
}

/// Selection rules, first match wins. With an empty configured model the
/// connection type and the probed model's features choose; otherwise the
/// configured model is scanned against every module's `models` list.
pub(crate) fn select_module(
    connection: ConnectionType,
    config_model: &str,
    data: &mut PhoneData,
) -> Result<Box<dyn PhoneModule>, Error> {
    if config_model.is_empty() {
        let mut info = PhoneModelInfo::from(phones::model_data(&data.model));

        #[cfg(feature = "atgen")]
        if connection.is_at_family() {
            // Vendor extensions first, when the probed model advertises
            // them; plain AT handles everything else, known or not.
            #[cfg(feature = "alcatel")]
            if info.has_feature(Feature::Alcatel) {
                data.model_info = Some(info);
                return Ok(Box::new(alcatel::Alcatel::new()));
            }
            #[cfg(feature = "atobex")]
            if info.has_feature(Feature::Obex) {
                data.model_info = Some(info);
                return Ok(Box::new(atobex::AtObex::new()));
            }
            data.model_info = Some(info);
            return Ok(Box::new(atgen::AtGen::new()));
        }
        #[cfg(feature = "obexgen")]
        if matches!(
            connection,
            ConnectionType::IrdaObex | ConnectionType::BlueObex
        ) {
            data.model_info = Some(info);
            return Ok(Box::new(obexgen::ObexGen::new()));
        }
        #[cfg(feature = "dummy")]
        if connection == ConnectionType::None {
            data.model_info = Some(info);
            return Ok(Box::new(dummy::Dummy::new()));
        }
        #[cfg(feature = "gnapgen")]
        if matches!(
            connection,
            ConnectionType::BlueGnapbus | ConnectionType::IrdaGnapbus
        ) {
            data.model_info = Some(info);
            return Ok(Box::new(gnapgen::GnapGen::new()));
        }
        #[cfg(feature = "s60")]
        if connection == ConnectionType::BlueS60 {
            data.model_info = Some(info);
            return Ok(Box::new(s60::S60Phone::new()));
        }
        #[cfg(feature = "nokia6510")]
        if connection.is_nokia_link() {
            if info.model == "unknown" && info.features.is_empty() {
                phones::guess_series40(&mut info, &data.model);
            }
            if info.has_feature(Feature::Series40_30) {
                data.model_info = Some(info);
                return Ok(Box::new(n6510::N6510::new()));
            }
        }
        data.model_info = Some(info);
    }

    // Scan the registered modules against the effective model name: the
    // configured one, or the table name the probed string resolved to.
    let effective: String = if config_model.is_empty() {
        data.model_info
            .as_ref()
            .map(|info| info.model.clone())
            .unwrap_or_default()
    } else {
        config_model.to_owned()
    };

    let mut chosen: Option<Box<dyn PhoneModule>> = None;
    #[cfg(feature = "atgen")]
    if connection.is_at_family() && model_listed(atgen::AtGen::MODELS, &effective) {
        chosen = Some(Box::new(atgen::AtGen::new()));
    }
    #[cfg(feature = "dummy")]
    if chosen.is_none() && model_listed(dummy::Dummy::MODELS, &effective) {
        chosen = Some(Box::new(dummy::Dummy::new()));
    }
    #[cfg(feature = "obexgen")]
    if chosen.is_none() && model_listed(obexgen::ObexGen::MODELS, &effective) {
        chosen = Some(Box::new(obexgen::ObexGen::new()));
    }
    #[cfg(feature = "gnapgen")]
    if chosen.is_none() && model_listed(gnapgen::GnapGen::MODELS, &effective) {
        chosen = Some(Box::new(gnapgen::GnapGen::new()));
    }
    #[cfg(feature = "s60")]
    if chosen.is_none() && model_listed(s60::S60Phone::MODELS, &effective) {
        chosen = Some(Box::new(s60::S60Phone::new()));
    }
    #[cfg(feature = "nokia6510")]
    if chosen.is_none() && model_listed(n6510::N6510::MODELS, &effective) {
        chosen = Some(Box::new(n6510::N6510::new()));
    }
    #[cfg(feature = "alcatel")]
    if chosen.is_none() && model_listed(alcatel::Alcatel::MODELS, &effective) {
        chosen = Some(Box::new(alcatel::Alcatel::new()));
    }
    #[cfg(feature = "atobex")]
    if chosen.is_none() && model_listed(atobex::AtObex::MODELS, &effective) {
        chosen = Some(Box::new(atobex::AtObex::new()));
    }

    let _ = &effective;
    chosen.ok_or(Error::UnknownModel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PhoneData;

    fn data_with_model(model: &str) -> PhoneData {
        let mut data = PhoneData::default();
        data.model = model.to_owned();
        data
    }

    #[test]
    fn auto_at_falls_back_to_atgen() {
        let mut data = data_with_model("SomethingNew");
        let module = select_module(ConnectionType::At, "", &mut data).unwrap();
        assert_eq!(module.models(), atgen::AtGen::MODELS);
    }

    #[test]
    fn auto_at_prefers_vendor_extensions() {
        let mut data = data_with_model("OT535");
        let module = select_module(ConnectionType::At, "", &mut data).unwrap();
        assert_eq!(module.models(), alcatel::Alcatel::MODELS);

        let mut data = data_with_model("K750");
        let module = select_module(ConnectionType::BlueAt, "", &mut data).unwrap();
        assert_eq!(module.models(), atobex::AtObex::MODELS);
    }

    #[test]
    fn auto_nokia_cable_picks_series40_module() {
        let mut data = data_with_model("6230i");
        let module = select_module(ConnectionType::Fbus2, "", &mut data).unwrap();
        assert_eq!(module.models(), n6510::N6510::MODELS);
        assert!(data
            .model_info
            .as_ref()
            .unwrap()
            .has_feature(Feature::Series40_30));
    }

    #[test]
    fn auto_nokia_cable_guesses_unknown_rm_numbers() {
        let mut data = data_with_model("RM-217");
        let module = select_module(ConnectionType::BluePhonet, "", &mut data).unwrap();
        assert_eq!(module.models(), n6510::N6510::MODELS);
    }

    #[test]
    fn auto_none_connection_is_dummy() {
        let mut data = data_with_model("");
        let module = select_module(ConnectionType::None, "", &mut data).unwrap();
        assert_eq!(module.models(), dummy::Dummy::MODELS);
    }

    #[test]
    fn link_bound_generics() {
        let mut data = PhoneData::default();
        assert_eq!(
            select_module(ConnectionType::BlueObex, "", &mut data)
                .unwrap()
                .models(),
            obexgen::ObexGen::MODELS
        );
        assert_eq!(
            select_module(ConnectionType::IrdaGnapbus, "", &mut data)
                .unwrap()
                .models(),
            gnapgen::GnapGen::MODELS
        );
        assert_eq!(
            select_module(ConnectionType::BlueS60, "", &mut data)
                .unwrap()
                .models(),
            s60::S60Phone::MODELS
        );
    }

    #[test]
    fn explicit_model_scans_module_lists() {
        let mut data = PhoneData::default();
        let module = select_module(ConnectionType::Fbus2, "6310i", &mut data).unwrap();
        assert_eq!(module.models(), n6510::N6510::MODELS);
    }

    #[test]
    fn unknown_explicit_model_is_rejected() {
        let mut data = PhoneData::default();
        assert!(matches!(
            select_module(ConnectionType::At, "MadeUp", &mut data),
            Err(Error::UnknownModel)
        ));
    }

    #[test]
    fn unknown_probed_nokia_without_features_is_rejected() {
        // A DCT3-era phone: probed fine, but no module in this build
        // serves it.
        let mut data = data_with_model("3310");
        assert!(matches!(
            select_module(ConnectionType::Fbus2, "", &mut data),
            Err(Error::UnknownModel)
        ));
    }

    #[test]
    fn probe_gating_follows_link_kind() {
        assert!(supports_auto_probe(ConnectionType::At));
        assert!(supports_auto_probe(ConnectionType::Fbus2));
        assert!(!supports_auto_probe(ConnectionType::None));
        assert!(!supports_auto_probe(ConnectionType::BlueObex));
        assert!(!supports_auto_probe(ConnectionType::BlueS60));
    }
}
