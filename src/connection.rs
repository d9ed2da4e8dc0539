//! Connection names, their parsing and the binding of transport driver and
//! wire framing for each connection type.

use crate::device::DeviceAccess;
use crate::error::Error;
use crate::protocol::Protocol;

/// Transport x framing pair, one tag per supported combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    None,
    At,
    BlueAt,
    IrdaAt,
    Dku2At,
    Mbus2,
    Fbus2,
    Fbus2Usb,
    Fbus2Dlr3,
    Dku5Fbus2,
    Fbus2Pl2303,
    Fbus2Blue,
    Fbus2Irda,
    BlueFbus2,
    Dku2Phonet,
    PhonetBlue,
    IrdaPhonet,
    BluePhonet,
    IrdaObex,
    BlueObex,
    IrdaGnapbus,
    BlueGnapbus,
    BlueS60,
}

impl ConnectionType {
    /// Connection types speaking plain AT over some link.
    pub fn is_at_family(self) -> bool {
        matches!(
            self,
            ConnectionType::At
                | ConnectionType::BlueAt
                | ConnectionType::IrdaAt
                | ConnectionType::Dku2At
        )
    }

    /// Nokia cable/link set handled by the binary Nokia protocols.
    pub fn is_nokia_link(self) -> bool {
        matches!(
            self,
            ConnectionType::Mbus2
                | ConnectionType::Fbus2
                | ConnectionType::Fbus2Usb
                | ConnectionType::Fbus2Dlr3
                | ConnectionType::Fbus2Pl2303
                | ConnectionType::Fbus2Blue
                | ConnectionType::Fbus2Irda
                | ConnectionType::Dku5Fbus2
                | ConnectionType::Dku2Phonet
                | ConnectionType::PhonetBlue
                | ConnectionType::IrdaPhonet
                | ConnectionType::BlueFbus2
                | ConnectionType::BluePhonet
        )
    }
}

/// One row of the connection-name table.
struct ConnectionInfo {
    name: &'static str,
    connection: ConnectionType,
    /// Default for connections whose adapter breaks when DTR/RTS are
    /// driven.
    skip_dtr_rts: bool,
}

/// Mapping of configuration names to connection types. Order and aliases
/// are part of the compatibility surface; keep new rows at the end of
/// their group.
const CONNECTIONS: &[ConnectionInfo] = &[
    ConnectionInfo { name: "at", connection: ConnectionType::At, skip_dtr_rts: false },
    // cables
    ConnectionInfo { name: "mbus", connection: ConnectionType::Mbus2, skip_dtr_rts: false },
    ConnectionInfo { name: "fbus", connection: ConnectionType::Fbus2, skip_dtr_rts: false },
    ConnectionInfo { name: "fbususb", connection: ConnectionType::Fbus2Usb, skip_dtr_rts: false },
    ConnectionInfo { name: "fbuspl2303", connection: ConnectionType::Fbus2Pl2303, skip_dtr_rts: false },
    ConnectionInfo { name: "dlr3", connection: ConnectionType::Fbus2Dlr3, skip_dtr_rts: false },
    ConnectionInfo { name: "fbusdlr3", connection: ConnectionType::Fbus2Dlr3, skip_dtr_rts: false },
    ConnectionInfo { name: "dku5", connection: ConnectionType::Dku5Fbus2, skip_dtr_rts: false },
    ConnectionInfo { name: "fbusdku5", connection: ConnectionType::Dku5Fbus2, skip_dtr_rts: false },
    ConnectionInfo { name: "dku5fbus", connection: ConnectionType::Dku5Fbus2, skip_dtr_rts: false },
    ConnectionInfo { name: "ark3116fbus", connection: ConnectionType::Dku5Fbus2, skip_dtr_rts: true },
    #[cfg(windows)]
    ConnectionInfo { name: "dku2", connection: ConnectionType::Dku2Phonet, skip_dtr_rts: false },
    #[cfg(windows)]
    ConnectionInfo { name: "dku2phonet", connection: ConnectionType::Dku2Phonet, skip_dtr_rts: false },
    #[cfg(not(windows))]
    ConnectionInfo { name: "dku2", connection: ConnectionType::Fbus2Usb, skip_dtr_rts: false },
    #[cfg(not(windows))]
    ConnectionInfo { name: "dku2phonet", connection: ConnectionType::Fbus2Usb, skip_dtr_rts: false },
    ConnectionInfo { name: "dku2at", connection: ConnectionType::Dku2At, skip_dtr_rts: false },
    // serial ports assigned by a Bluetooth stack
    ConnectionInfo { name: "fbusblue", connection: ConnectionType::Fbus2Blue, skip_dtr_rts: false },
    ConnectionInfo { name: "phonetblue", connection: ConnectionType::PhonetBlue, skip_dtr_rts: false },
    // native Bluetooth
    ConnectionInfo { name: "blueobex", connection: ConnectionType::BlueObex, skip_dtr_rts: false },
    ConnectionInfo { name: "bluephonet", connection: ConnectionType::BluePhonet, skip_dtr_rts: false },
    ConnectionInfo { name: "blueat", connection: ConnectionType::BlueAt, skip_dtr_rts: false },
    ConnectionInfo { name: "bluerfobex", connection: ConnectionType::BlueObex, skip_dtr_rts: false },
    ConnectionInfo { name: "bluefbus", connection: ConnectionType::BlueFbus2, skip_dtr_rts: false },
    ConnectionInfo { name: "bluerffbus", connection: ConnectionType::BlueFbus2, skip_dtr_rts: false },
    ConnectionInfo { name: "bluerfphonet", connection: ConnectionType::BluePhonet, skip_dtr_rts: false },
    ConnectionInfo { name: "bluerfat", connection: ConnectionType::BlueAt, skip_dtr_rts: false },
    ConnectionInfo { name: "bluerfgnapbus", connection: ConnectionType::BlueGnapbus, skip_dtr_rts: false },
    ConnectionInfo { name: "blues60", connection: ConnectionType::BlueS60, skip_dtr_rts: false },
    ConnectionInfo { name: "bluerfs60", connection: ConnectionType::BlueS60, skip_dtr_rts: false },
    // "serial" IrDA adapters
    ConnectionInfo { name: "infrared", connection: ConnectionType::Fbus2Irda, skip_dtr_rts: false },
    ConnectionInfo { name: "fbusirda", connection: ConnectionType::Fbus2Irda, skip_dtr_rts: false },
    // socket IrDA
    ConnectionInfo { name: "irda", connection: ConnectionType::IrdaPhonet, skip_dtr_rts: false },
    ConnectionInfo { name: "irdaphonet", connection: ConnectionType::IrdaPhonet, skip_dtr_rts: false },
    ConnectionInfo { name: "irdaat", connection: ConnectionType::IrdaAt, skip_dtr_rts: false },
    ConnectionInfo { name: "irdaobex", connection: ConnectionType::IrdaObex, skip_dtr_rts: false },
    ConnectionInfo { name: "irdagnapbus", connection: ConnectionType::IrdaGnapbus, skip_dtr_rts: false },
    // testing purposes
    ConnectionInfo { name: "none", connection: ConnectionType::None, skip_dtr_rts: false },
];

/// Serial speeds the `at<baud>` shorthand accepts.
const SERIAL_SPEEDS: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800,
];

/// Validates a textual baud rate; 0 means "not a usable speed".
pub(crate) fn find_serial_speed(text: &str) -> u32 {
    match text.parse::<u32>() {
        Ok(speed) if SERIAL_SPEEDS.contains(&speed) => speed,
        _ => 0,
    }
}

/// Result of parsing a connection string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedConnection {
    pub connection: ConnectionType,
    pub skip_dtr_rts: bool,
    pub no_power_cable: bool,
    /// Serial speed from the `at<baud>` form; 0 when unspecified.
    pub speed: u32,
}

/// Truncates `name` at the first case-insensitive occurrence of `suffix`.
fn strip_marker(name: &mut String, suffix: &str) -> bool {
    match name.to_ascii_lowercase().find(suffix) {
        Some(pos) => {
            name.truncate(pos);
            true
        }
        None => false,
    }
}

/// Resolves a configuration connection string: optional `-nodtr` and
/// `-nopower` markers, then a case-insensitive table lookup, then the
/// `at<baud>` shorthand.
pub fn parse_connection_string(raw: &str) -> Result<ParsedConnection, Error> {
    let mut name = raw.to_owned();
    // Cable quirks ride on the name as suffixes. `-nodtr` is cut first, so
    // it also swallows anything written after it.
    let forced_nodtr = strip_marker(&mut name, "-nodtr");
    let no_power_cable = strip_marker(&mut name, "-nopower");

    let mut parsed = None;
    for info in CONNECTIONS {
        if info.name.eq_ignore_ascii_case(&name) {
            parsed = Some(ParsedConnection {
                connection: info.connection,
                skip_dtr_rts: info.skip_dtr_rts,
                no_power_cable,
                speed: 0,
            });
            break;
        }
    }

    // Special case: `at` can carry a baud rate.
    if parsed.is_none() && name.len() > 2 && name[..2].eq_ignore_ascii_case("at") {
        let speed = find_serial_speed(&name[2..]);
        if speed != 0 {
            parsed = Some(ParsedConnection {
                connection: ConnectionType::At,
                skip_dtr_rts: false,
                no_power_cable,
                speed,
            });
        }
    }

    match parsed {
        Some(mut p) => {
            if forced_nodtr {
                p.skip_dtr_rts = true;
            }
            Ok(p)
        }
        None => Err(Error::UnknownConnection),
    }
}

/// Binds the driver and framing implementations for a resolved connection
/// type. `None` means the type is known but its backend is not part of
/// this build.
pub(crate) fn bind_tables(
    connection: ConnectionType,
) -> Option<(Box<dyn DeviceAccess>, Box<dyn Protocol>)> {
    use crate::device::none::NoneDevice;
    #[cfg(feature = "serial-device")]
    use crate::device::serial::SerialDevice;
    use crate::protocol::none::NoProtocol;

    match connection {
        ConnectionType::None => Some((Box::new(NoneDevice::new()), Box::new(NoProtocol::new()))),
        #[cfg(all(feature = "serial-device", feature = "mbus2"))]
        ConnectionType::Mbus2 => Some((
            Box::new(SerialDevice::new()),
            Box::new(crate::protocol::mbus2::Mbus2::new()),
        )),
        #[cfg(all(feature = "serial-device", feature = "fbus2"))]
        ConnectionType::Fbus2
        | ConnectionType::Fbus2Dlr3
        | ConnectionType::Dku5Fbus2
        | ConnectionType::Fbus2Pl2303
        | ConnectionType::Fbus2Blue
        | ConnectionType::Fbus2Irda => Some((
            Box::new(SerialDevice::new()),
            Box::new(crate::protocol::fbus2::Fbus2::new()),
        )),
        #[cfg(all(feature = "serial-device", feature = "phonet"))]
        ConnectionType::Dku2Phonet => Some((
            Box::new(SerialDevice::new()),
            Box::new(crate::protocol::phonet::Phonet::cable()),
        )),
        // The DKU-2 USB link shows up as a CDC-ACM tty, so the serial
        // driver carries it.
        #[cfg(all(feature = "serial-device", feature = "phonet"))]
        ConnectionType::Fbus2Usb => Some((
            Box::new(SerialDevice::new()),
            Box::new(crate::protocol::phonet::Phonet::usb()),
        )),
        #[cfg(all(feature = "serial-device", feature = "phonet"))]
        ConnectionType::PhonetBlue => Some((
            Box::new(SerialDevice::new()),
            Box::new(crate::protocol::phonet::Phonet::bluetooth()),
        )),
        #[cfg(all(feature = "serial-device", feature = "at"))]
        ConnectionType::At | ConnectionType::Dku2At => Some((
            Box::new(SerialDevice::new()),
            Box::new(crate::protocol::at::AtProtocol::new()),
        )),
        // Everything below needs a USB, IrDA or Bluetooth socket driver.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_with_speed_and_nodtr() {
        let p = parse_connection_string("at19200-nodtr").unwrap();
        assert_eq!(p.connection, ConnectionType::At);
        assert_eq!(p.speed, 19200);
        assert!(p.skip_dtr_rts);
        assert!(!p.no_power_cable);
    }

    #[test]
    fn dku5_without_power_cable() {
        let p = parse_connection_string("dku5-nopower").unwrap();
        assert_eq!(p.connection, ConnectionType::Dku5Fbus2);
        assert!(!p.skip_dtr_rts);
        assert!(p.no_power_cable);
    }

    #[test]
    fn aliases_resolve_to_same_type() {
        let a = parse_connection_string("dlr3").unwrap();
        let b = parse_connection_string("fbusdlr3").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn lookup_ignores_case() {
        let p = parse_connection_string("BluePhonet").unwrap();
        assert_eq!(p.connection, ConnectionType::BluePhonet);
    }

    #[test]
    fn quirky_adapter_skips_dtr_by_default() {
        let p = parse_connection_string("ark3116fbus").unwrap();
        assert!(p.skip_dtr_rts);
    }

    #[test]
    fn nodtr_cuts_rest_of_string() {
        // The first marker truncates, so a later `-nopower` is lost too.
        let p = parse_connection_string("fbus-nodtr-nopower").unwrap();
        assert_eq!(p.connection, ConnectionType::Fbus2);
        assert!(p.skip_dtr_rts);
        assert!(!p.no_power_cable);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert_eq!(
            parse_connection_string("carrierpigeon"),
            Err(Error::UnknownConnection)
        );
        assert_eq!(parse_connection_string("at123"), Err(Error::UnknownConnection));
    }

    #[test]
    fn parsing_is_stable_across_repeats() {
        for raw in ["at115200", "bluephonet-nodtr", "dku5-nopower", "none"] {
            let first = parse_connection_string(raw).unwrap();
            for _ in 0..3 {
                assert_eq!(parse_connection_string(raw).unwrap(), first);
            }
        }
    }

    #[test]
    fn disabled_backends_bind_nothing() {
        assert!(bind_tables(ConnectionType::BlueObex).is_none());
        assert!(bind_tables(ConnectionType::IrdaPhonet).is_none());
        assert!(bind_tables(ConnectionType::None).is_some());
    }
}
