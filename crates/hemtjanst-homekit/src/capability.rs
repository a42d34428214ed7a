//! Name tables mapping device metadata onto accessory building blocks
//!
//! Feature names map to characteristic descriptors, device types map to a
//! main service and an accessory category. Lookups are case-insensitive.
//! New capabilities are added as table rows.

use crate::accessory::Format;

/// How a feature name is presented as a characteristic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapabilityDescriptor {
    /// Lower-case feature name
    pub name: &'static str,
    /// Short hex characteristic type
    pub type_code: &'static str,
    pub format: Format,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    /// Whether the controller may write this value
    pub writable: bool,
}

impl CapabilityDescriptor {
    /// Numeric formats take bounds from feature metadata
    pub fn is_numeric(&self) -> bool {
        self.format.is_numeric()
    }
}

const fn flag(name: &'static str, type_code: &'static str, writable: bool) -> CapabilityDescriptor {
    CapabilityDescriptor {
        name,
        type_code,
        format: Format::Bool,
        min: None,
        max: None,
        step: None,
        writable,
    }
}

const fn ranged(
    name: &'static str,
    type_code: &'static str,
    format: Format,
    min: f64,
    max: f64,
    step: f64,
    writable: bool,
) -> CapabilityDescriptor {
    CapabilityDescriptor {
        name,
        type_code,
        format,
        min: Some(min),
        max: Some(max),
        step: Some(step),
        writable,
    }
}

/// Known feature names
pub static CAPABILITIES: &[CapabilityDescriptor] = &[
    flag("on", "25", true),
    ranged("brightness", "8", Format::Int32, 0.0, 100.0, 1.0, true),
    ranged("hue", "13", Format::Float, 0.0, 360.0, 1.0, true),
    ranged("saturation", "2F", Format::Float, 0.0, 100.0, 1.0, true),
    ranged("colortemperature", "CE", Format::UInt32, 50.0, 400.0, 1.0, true),
    ranged("contactsensorstate", "6A", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("currenttemperature", "11", Format::Float, 0.0, 100.0, 0.1, false),
    ranged("targettemperature", "35", Format::Float, 10.0, 38.0, 0.1, true),
    ranged("temperaturedisplayunits", "36", Format::UInt8, 0.0, 1.0, 1.0, true),
    ranged("currentheatingcoolingstate", "F", Format::UInt8, 0.0, 2.0, 1.0, false),
    ranged("targetheatingcoolingstate", "33", Format::UInt8, 0.0, 3.0, 1.0, true),
    ranged("currentrelativehumidity", "10", Format::Float, 0.0, 100.0, 1.0, false),
    ranged("targetrelativehumidity", "34", Format::Float, 0.0, 100.0, 1.0, true),
    flag("motiondetected", "22", false),
    ranged("occupancydetected", "71", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("smokedetected", "76", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("leakdetected", "70", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("carbonmonoxidedetected", "69", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("carbondioxidedetected", "92", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("carbondioxidelevel", "93", Format::Float, 0.0, 100000.0, 1.0, false),
    ranged("currentambientlightlevel", "6B", Format::Float, 0.0001, 100000.0, 0.0001, false),
    ranged("airquality", "95", Format::UInt8, 0.0, 5.0, 1.0, false),
    ranged("batterylevel", "68", Format::UInt8, 0.0, 100.0, 1.0, false),
    ranged("chargingstate", "8F", Format::UInt8, 0.0, 2.0, 1.0, false),
    ranged("statuslowbattery", "79", Format::UInt8, 0.0, 1.0, 1.0, false),
    flag("statusactive", "75", false),
    ranged("statusfault", "77", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("statustampered", "7A", Format::UInt8, 0.0, 1.0, 1.0, false),
    flag("outletinuse", "26", false),
    ranged("active", "B0", Format::UInt8, 0.0, 1.0, 1.0, true),
    ranged("inuse", "D2", Format::UInt8, 0.0, 1.0, 1.0, false),
    ranged("rotationspeed", "29", Format::Float, 0.0, 100.0, 1.0, true),
    ranged("rotationdirection", "28", Format::Int32, 0.0, 1.0, 1.0, true),
    ranged("currentposition", "6D", Format::UInt8, 0.0, 100.0, 1.0, false),
    ranged("targetposition", "7C", Format::UInt8, 0.0, 100.0, 1.0, true),
    ranged("positionstate", "72", Format::UInt8, 0.0, 2.0, 1.0, false),
    ranged("currentdoorstate", "E", Format::UInt8, 0.0, 4.0, 1.0, false),
    ranged("targetdoorstate", "32", Format::UInt8, 0.0, 1.0, 1.0, true),
    flag("obstructiondetected", "24", false),
    ranged("lockcurrentstate", "1D", Format::UInt8, 0.0, 3.0, 1.0, false),
    ranged("locktargetstate", "1E", Format::UInt8, 0.0, 1.0, 1.0, true),
    ranged("securitysystemcurrentstate", "66", Format::UInt8, 0.0, 4.0, 1.0, false),
    ranged("securitysystemtargetstate", "67", Format::UInt8, 0.0, 3.0, 1.0, true),
    ranged("programmableswitchevent", "73", Format::UInt8, 0.0, 2.0, 1.0, false),
    ranged("volume", "119", Format::UInt8, 0.0, 100.0, 1.0, true),
    flag("mute", "11A", true),
];

/// Alternative feature names
static ALIASES: &[(&str, &str)] = &[("state", "contactsensorstate")];

/// Characteristic descriptor for a feature name
pub fn capability_for(feature: &str) -> Option<&'static CapabilityDescriptor> {
    let name = feature.to_lowercase();
    let name = ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, target)| *target)
        .unwrap_or(name.as_str());
    CAPABILITIES.iter().find(|c| c.name == name)
}

/// Main service for a device type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub type_code: &'static str,
}

/// Known device types with a main service
pub static SERVICES: &[ServiceDescriptor] = &[
    ServiceDescriptor { name: "lightbulb", type_code: "43" },
    ServiceDescriptor { name: "switch", type_code: "49" },
    ServiceDescriptor { name: "outlet", type_code: "47" },
    ServiceDescriptor { name: "fan", type_code: "40" },
    ServiceDescriptor { name: "fanv2", type_code: "B7" },
    ServiceDescriptor { name: "airpurifier", type_code: "BB" },
    ServiceDescriptor { name: "airqualitysensor", type_code: "8D" },
    ServiceDescriptor { name: "batteryservice", type_code: "96" },
    ServiceDescriptor { name: "carbondioxidesensor", type_code: "97" },
    ServiceDescriptor { name: "carbonmonoxidesensor", type_code: "7F" },
    ServiceDescriptor { name: "contactsensor", type_code: "80" },
    ServiceDescriptor { name: "door", type_code: "81" },
    ServiceDescriptor { name: "garagedooropener", type_code: "41" },
    ServiceDescriptor { name: "humiditysensor", type_code: "82" },
    ServiceDescriptor { name: "leaksensor", type_code: "83" },
    ServiceDescriptor { name: "lightsensor", type_code: "84" },
    ServiceDescriptor { name: "lockmechanism", type_code: "45" },
    ServiceDescriptor { name: "motionsensor", type_code: "85" },
    ServiceDescriptor { name: "occupancysensor", type_code: "86" },
    ServiceDescriptor { name: "securitysystem", type_code: "7E" },
    ServiceDescriptor { name: "smokesensor", type_code: "87" },
    ServiceDescriptor { name: "speaker", type_code: "113" },
    ServiceDescriptor { name: "statelessprogrammableswitch", type_code: "89" },
    ServiceDescriptor { name: "temperaturesensor", type_code: "8A" },
    ServiceDescriptor { name: "thermostat", type_code: "4A" },
    ServiceDescriptor { name: "window", type_code: "8B" },
    ServiceDescriptor { name: "windowcovering", type_code: "8C" },
];

/// Service every accessory carries for its identity
pub const ACCESSORY_INFORMATION: ServiceDescriptor = ServiceDescriptor {
    name: "accessoryinformation",
    type_code: "3E",
};

/// Service holding the reachable flag
pub const BRIDGING_STATE: ServiceDescriptor = ServiceDescriptor {
    name: "bridgingstate",
    type_code: "62",
};

/// Characteristic types used by the fixed services
pub mod fixed {
    pub const IDENTIFY: &str = "14";
    pub const MANUFACTURER: &str = "20";
    pub const MODEL: &str = "21";
    pub const NAME: &str = "23";
    pub const SERIAL_NUMBER: &str = "30";
    pub const REACHABLE: &str = "63";
}

pub fn service_for(device_type: &str) -> Option<&'static ServiceDescriptor> {
    let name = device_type.to_lowercase();
    SERVICES.iter().find(|s| s.name == name)
}

/// Accessory categories by device type
static CATEGORIES: &[(&str, u8)] = &[
    ("other", 1),
    ("bridge", 2),
    ("fan", 3),
    ("garagedooropener", 4),
    ("lightbulb", 5),
    ("doorlock", 6),
    ("outlet", 7),
    ("switch", 8),
    ("thermostat", 9),
    ("sensor", 10),
    ("securitysystem", 11),
    ("door", 12),
    ("window", 13),
    ("windowcovering", 14),
    ("programmableswitch", 15),
    ("ipcamera", 17),
    ("videodoorbell", 18),
    ("airpurifier", 19),
    ("heater", 20),
    ("airconditioner", 21),
    ("humidifier", 22),
    ("dehumidifier", 23),
    ("sprinklers", 28),
    ("faucets", 29),
    ("showersystems", 30),
];

/// Accessory category for a device type, 0 when unknown
pub fn category_for(device_type: &str) -> u8 {
    let name = device_type.to_lowercase();
    CATEGORIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, c)| *c)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::type_to_id;
    use std::collections::HashSet;

    #[test]
    fn test_lookup_case_insensitive() {
        assert_eq!(capability_for("colorTemperature").unwrap().type_code, "CE");
        assert_eq!(capability_for("ON").unwrap().format, Format::Bool);
        assert!(capability_for("teleport").is_none());
    }

    #[test]
    fn test_alias() {
        assert_eq!(capability_for("state"), capability_for("contactSensorState"));
    }

    #[test]
    fn test_service_and_category() {
        assert_eq!(service_for("Lightbulb").unwrap().type_code, "43");
        assert!(service_for("toaster").is_none());
        assert_eq!(category_for("lightbulb"), 5);
        assert_eq!(category_for("toaster"), 0);
    }

    #[test]
    fn test_table_ids_unique_and_derivable() {
        let mut ids = HashSet::new();
        let codes = CAPABILITIES
            .iter()
            .map(|c| c.type_code)
            .chain(SERVICES.iter().map(|s| s.type_code))
            .chain([ACCESSORY_INFORMATION.type_code, BRIDGING_STATE.type_code])
            .chain([
                fixed::IDENTIFY,
                fixed::MANUFACTURER,
                fixed::MODEL,
                fixed::NAME,
                fixed::SERIAL_NUMBER,
                fixed::REACHABLE,
            ]);
        for code in codes {
            let id = type_to_id(code).unwrap_or_else(|| panic!("bad type code {code}"));
            assert!(ids.insert(id), "duplicate type code {code}");
        }
    }

    #[test]
    fn test_numeric_defaults_are_bounded() {
        for cap in CAPABILITIES.iter().filter(|c| c.is_numeric()) {
            let (min, max) = (cap.min.unwrap(), cap.max.unwrap());
            assert!(min < max, "{} has empty range", cap.name);
        }
    }
}
