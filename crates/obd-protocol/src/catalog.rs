//! OBD-II Parameter Catalog
//!
//! Maps symbolic parameter names to `(mode, pid)` requests and decodes raw
//! reply bytes into values. The session only depends on [`ParameterCatalog`];
//! [`StandardCatalog`] carries the SAE J1979 mode 01 table plus the DTC and
//! vehicle-information requests.

use crate::mode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decoded parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    /// Diagnostic trouble codes such as `P0133`
    Codes(Vec<String>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Codes(codes) => f.write_str(&codes.join(",")),
        }
    }
}

/// Conversion rule from data bytes to a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoder {
    /// Bit-encoded field, value is the big-endian integer of all bytes
    Bits,
    /// Plain unsigned integer (A, or A*256+B)
    Integer,
    /// A * 100 / 255 (%)
    Percent,
    /// A - 40 (°C)
    Temperature,
    /// (A - 128) * 100 / 128 (%)
    FuelTrim,
    /// A * 3 (kPa)
    FuelRailPressure,
    /// ((A*256)+B) * 0.079 (kPa)
    FuelRailRelative,
    /// ((A*256)+B) * 10 (kPa)
    FuelRailGauge,
    /// ((A*256)+B) / 4 (rev/min)
    Rpm,
    /// A / 2 - 64 (degrees)
    TimingAdvance,
    /// ((A*256)+B) / 100 (g/s)
    AirFlowRate,
    /// A * 0.005 (V)
    OxygenVoltage,
    /// ((A*256)+B) * 2 / 65536 (ratio)
    Lambda,
    /// signed ((A*256)+B) / 4 (Pa)
    EvapPressure,
    /// ((A*256)+B) / 10 - 40 (°C)
    CatalystTemp,
    /// ((A*256)+B) / 1000 (V)
    ModuleVoltage,
    /// ((A*256)+B) * 100 / 255 (%)
    AbsoluteLoad,
    /// Pairs of bytes decoded as P/C/B/U trouble codes
    TroubleCodes,
    /// Bytes interpreted as ASCII text
    Ascii,
}

impl Decoder {
    /// Decode the data bytes of a reply (mode and pid bytes already stripped)
    pub fn decode(&self, bytes: &[u8]) -> Value {
        let a = bytes.first().copied().unwrap_or(0) as f64;
        let b = bytes.get(1).copied().unwrap_or(0) as f64;
        let word = a * 256.0 + b;

        match self {
            Decoder::Bits => Value::Number(
                bytes
                    .iter()
                    .fold(0u64, |acc, byte| (acc << 8) | *byte as u64) as f64,
            ),
            Decoder::Integer => Value::Number(if bytes.len() >= 2 { word } else { a }),
            Decoder::Percent => Value::Number(a * 100.0 / 255.0),
            Decoder::Temperature => Value::Number(a - 40.0),
            Decoder::FuelTrim => Value::Number((a - 128.0) * 100.0 / 128.0),
            Decoder::FuelRailPressure => Value::Number(a * 3.0),
            Decoder::FuelRailRelative => Value::Number(word * 0.079),
            Decoder::FuelRailGauge => Value::Number(word * 10.0),
            Decoder::Rpm => Value::Number(word / 4.0),
            Decoder::TimingAdvance => Value::Number(a / 2.0 - 64.0),
            Decoder::AirFlowRate => Value::Number(word / 100.0),
            Decoder::OxygenVoltage => Value::Number(a * 0.005),
            Decoder::Lambda => Value::Number(word * 2.0 / 65536.0),
            Decoder::EvapPressure => Value::Number((word as u16 as i16) as f64 / 4.0),
            Decoder::CatalystTemp => Value::Number(word / 10.0 - 40.0),
            Decoder::ModuleVoltage => Value::Number(word / 1000.0),
            Decoder::AbsoluteLoad => Value::Number(word * 100.0 / 255.0),
            Decoder::TroubleCodes => Value::Codes(decode_trouble_codes(bytes)),
            Decoder::Ascii => Value::Text(
                bytes
                    .iter()
                    .filter(|b| b.is_ascii_graphic())
                    .map(|b| *b as char)
                    .collect(),
            ),
        }
    }
}

/// Decode stored trouble codes, two bytes per code, `0000` is padding
fn decode_trouble_codes(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks_exact(2)
        .filter(|pair| pair[0] != 0 || pair[1] != 0)
        .map(|pair| {
            let system = match pair[0] >> 6 {
                0 => 'P',
                1 => 'C',
                2 => 'B',
                _ => 'U',
            };
            format!(
                "{}{}{:X}{:02X}",
                system,
                (pair[0] >> 4) & 0x03,
                pair[0] & 0x0F,
                pair[1]
            )
        })
        .collect()
}

/// A catalog entry
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    /// Request mode
    pub mode: u8,
    /// Parameter id, `None` for modes that take no pid
    pub pid: Option<u8>,
    /// Number of data bytes in the reply
    pub bytes: usize,
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub decoder: Decoder,
}

impl ParameterDef {
    /// Request text sent to the adapter (`010C`, or just `03` for pid-less modes)
    pub fn request(&self) -> String {
        match self.pid {
            Some(pid) => format!("{:02X}{:02X}", self.mode, pid),
            None => format!("{:02X}", self.mode),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Value {
        self.decoder.decode(bytes)
    }
}

/// Lookup table consumed by the frame parser and the session
pub trait ParameterCatalog: Send + Sync {
    /// Find an entry by its symbolic name
    fn lookup(&self, name: &str) -> Option<&ParameterDef>;

    /// Find a current-data (mode 01) entry by pid
    fn lookup_by_pid(&self, pid: u8) -> Option<&ParameterDef>;

    /// Find the entry for a mode that takes no pid
    fn lookup_by_mode(&self, mode: u8) -> Option<&ParameterDef>;
}

const fn current(
    pid: u8,
    bytes: usize,
    name: &'static str,
    description: &'static str,
    unit: &'static str,
    decoder: Decoder,
) -> ParameterDef {
    ParameterDef {
        mode: mode::CURRENT_DATA,
        pid: Some(pid),
        bytes,
        name,
        description,
        unit,
        decoder,
    }
}

use Decoder::*;

static STANDARD_PARAMETERS: &[ParameterDef] = &[
    current(0x00, 4, "pidsupp0", "PIDs supported 01-20", "Bit Encoded", Bits),
    current(0x01, 4, "dtc_cnt", "Monitor status since DTCs cleared", "Bit Encoded", Bits),
    current(0x02, 2, "dtcfrzf", "DTC that caused required freeze frame data storage", "Bit Encoded", Bits),
    current(0x03, 2, "fuelsys", "Fuel system 1 and 2 status", "Bit Encoded", Bits),
    current(0x04, 1, "load_pct", "Calculated LOAD Value", "%", Percent),
    current(0x05, 1, "temp", "Engine Coolant Temperature", "Celsius", Temperature),
    current(0x06, 1, "shrtft13", "Short Term Fuel Trim - Bank 1,3", "%", FuelTrim),
    current(0x07, 1, "longft13", "Long Term Fuel Trim - Bank 1,3", "%", FuelTrim),
    current(0x08, 1, "shrtft24", "Short Term Fuel Trim - Bank 2,4", "%", FuelTrim),
    current(0x09, 1, "longft24", "Long Term Fuel Trim - Bank 2,4", "%", FuelTrim),
    current(0x0A, 1, "frp", "Fuel Rail Pressure (gauge)", "kPa", FuelRailPressure),
    current(0x0B, 1, "map", "Intake Manifold Absolute Pressure", "kPa", Integer),
    current(0x0C, 2, "rpm", "Engine RPM", "rev/min", Rpm),
    current(0x0D, 1, "vss", "Vehicle Speed Sensor", "km/h", Integer),
    current(0x0E, 1, "sparkadv", "Ignition Timing Advance for #1 Cylinder", "degrees", TimingAdvance),
    current(0x0F, 1, "iat", "Intake Air Temperature", "Celsius", Temperature),
    current(0x10, 2, "maf", "Air Flow Rate from Mass Air Flow Sensor", "g/s", AirFlowRate),
    current(0x11, 1, "throttlepos", "Absolute Throttle Position", "%", Percent),
    current(0x12, 1, "air_stat", "Commanded Secondary Air Status", "Bit Encoded", Bits),
    current(0x13, 1, "o2sloc", "Location of Oxygen Sensors", "Bit Encoded", Bits),
    current(0x14, 2, "o2s11", "Bank 1 - Sensor 1 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x15, 2, "o2s12", "Bank 1 - Sensor 2 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x16, 2, "o2s13", "Bank 1 - Sensor 3 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x17, 2, "o2s14", "Bank 1 - Sensor 4 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x18, 2, "o2s21", "Bank 2 - Sensor 1 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x19, 2, "o2s22", "Bank 2 - Sensor 2 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x1A, 2, "o2s23", "Bank 2 - Sensor 3 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x1B, 2, "o2s24", "Bank 2 - Sensor 4 Oxygen Sensor Output Voltage", "V", OxygenVoltage),
    current(0x1C, 1, "obdsup", "OBD requirements to which vehicle is designed", "Bit Encoded", Bits),
    current(0x1D, 1, "o2sloc2", "Location of oxygen sensors", "Bit Encoded", Bits),
    current(0x1E, 1, "pto_stat", "Auxiliary Input Status", "Bit Encoded", Bits),
    current(0x1F, 2, "runtm", "Time Since Engine Start", "seconds", Integer),
    current(0x20, 4, "piddsupp2", "PIDs supported 21-40", "Bit Encoded", Bits),
    current(0x21, 2, "mil_dist", "Distance Travelled While MIL is Activated", "km", Integer),
    current(0x22, 2, "frpm", "Fuel Rail Pressure relative to manifold vacuum", "kPa", FuelRailRelative),
    current(0x23, 2, "frpd", "Fuel Rail Pressure (diesel)", "kPa", FuelRailGauge),
    current(0x24, 4, "lambda11", "Bank 1 - Sensor 1 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x25, 4, "lambda12", "Bank 1 - Sensor 2 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x26, 4, "lambda13", "Bank 1 - Sensor 3 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x27, 4, "lambda14", "Bank 1 - Sensor 4 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x28, 4, "lambda21", "Bank 2 - Sensor 1 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x29, 4, "lambda22", "Bank 2 - Sensor 2 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x2A, 4, "lambda23", "Bank 2 - Sensor 3 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x2B, 4, "lambda24", "Bank 2 - Sensor 4 Equivalence Ratio / Voltage", "(ratio)", Lambda),
    current(0x2C, 1, "egr_pct", "Commanded EGR", "%", Percent),
    current(0x2D, 1, "egr_err", "EGR Error", "%", FuelTrim),
    current(0x2E, 1, "evap_pct", "Commanded Evaporative Purge", "%", Percent),
    current(0x2F, 1, "fli", "Fuel Level Input", "%", Percent),
    current(0x30, 1, "warm_ups", "Number of warm-ups since diagnostic trouble codes cleared", "", Integer),
    current(0x31, 2, "clr_dist", "Distance since diagnostic trouble codes cleared", "km", Integer),
    current(0x32, 2, "evap_vp", "Evap System Vapour Pressure", "Pa", EvapPressure),
    current(0x33, 1, "baro", "Barometric Pressure", "kPa", Integer),
    current(0x34, 4, "lambdac11", "Bank 1 - Sensor 1 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x35, 4, "lambdac12", "Bank 1 - Sensor 2 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x36, 4, "lambdac13", "Bank 1 - Sensor 3 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x37, 4, "lambdac14", "Bank 1 - Sensor 4 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x38, 4, "lambdac21", "Bank 2 - Sensor 1 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x39, 4, "lambdac22", "Bank 2 - Sensor 2 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x3A, 4, "lambdac23", "Bank 2 - Sensor 3 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x3B, 4, "lambdac24", "Bank 2 - Sensor 4 Equivalence Ratio / Current", "(ratio)", Lambda),
    current(0x3C, 2, "catemp11", "Catalyst Temperature Bank 1 / Sensor 1", "Celsius", CatalystTemp),
    current(0x3D, 2, "catemp21", "Catalyst Temperature Bank 2 / Sensor 1", "Celsius", CatalystTemp),
    current(0x3E, 2, "catemp12", "Catalyst Temperature Bank 1 / Sensor 2", "Celsius", CatalystTemp),
    current(0x3F, 2, "catemp22", "Catalyst Temperature Bank 2 / Sensor 2", "Celsius", CatalystTemp),
    current(0x40, 4, "piddsupp4", "PIDs supported 41-60", "Bit Encoded", Bits),
    current(0x41, 4, "monitorstat", "Monitor status this driving cycle", "Bit Encoded", Bits),
    current(0x42, 2, "vpwr", "Control module voltage", "V", ModuleVoltage),
    current(0x43, 2, "load_abs", "Absolute Load Value", "%", AbsoluteLoad),
    current(0x44, 2, "lambda", "Fuel/air Commanded Equivalence Ratio", "(ratio)", Lambda),
    current(0x45, 1, "tp_r", "Relative Throttle Position", "%", Percent),
    current(0x46, 1, "aat", "Ambient air temperature", "Celsius", Temperature),
    current(0x47, 1, "tp_b", "Absolute Throttle Position B", "%", Percent),
    current(0x48, 1, "tp_c", "Absolute Throttle Position C", "%", Percent),
    current(0x49, 1, "app_d", "Accelerator Pedal Position D", "%", Percent),
    current(0x4A, 1, "app_e", "Accelerator Pedal Position E", "%", Percent),
    current(0x4B, 1, "app_f", "Accelerator Pedal Position F", "%", Percent),
    current(0x4C, 1, "tac_pct", "Commanded Throttle Actuator Control", "%", Percent),
    current(0x4D, 2, "mil_time", "Time run by the engine while MIL activated", "minutes", Integer),
    current(0x4E, 2, "clr_time", "Time since diagnostic trouble codes cleared", "minutes", Integer),
    current(0x4F, 4, "exttest1", "External Test Equipment Configuration #1", "Bit Encoded", Bits),
    current(0x50, 4, "exttest2", "External Test Equipment Configuration #2", "Bit Encoded", Bits),
    current(0x51, 1, "fuel_type", "Fuel Type", "Bit Encoded", Bits),
    current(0x52, 1, "alch_pct", "Ethanol fuel %", "%", Percent),
    ParameterDef {
        mode: mode::READ_DTC,
        pid: None,
        bytes: 6,
        name: "requestdtc",
        description: "Requested DTC",
        unit: "",
        decoder: TroubleCodes,
    },
    ParameterDef {
        mode: mode::CLEAR_DTC,
        pid: None,
        bytes: 0,
        name: "cleardtc",
        description: "Clear Trouble Codes (Clear engine light)",
        unit: "",
        decoder: Bits,
    },
    ParameterDef {
        mode: mode::VEHICLE_INFO,
        pid: Some(0x00),
        bytes: 4,
        name: "vinsupp0",
        description: "Vehicle information PIDs supported",
        unit: "Bit Encoded",
        decoder: Bits,
    },
    ParameterDef {
        mode: mode::VEHICLE_INFO,
        pid: Some(0x01),
        bytes: 1,
        name: "vin_msgs",
        description: "Vehicle Identification Number message count",
        unit: "",
        decoder: Integer,
    },
    ParameterDef {
        mode: mode::VEHICLE_INFO,
        pid: Some(0x02),
        bytes: 17,
        name: "vin",
        description: "Vehicle Identification Number",
        unit: "",
        decoder: Ascii,
    },
];

/// The built-in SAE J1979 catalog
#[derive(Debug, Clone)]
pub struct StandardCatalog {
    entries: &'static [ParameterDef],
}

impl StandardCatalog {
    pub fn new() -> Self {
        Self {
            entries: STANDARD_PARAMETERS,
        }
    }

    /// All known entries, mode 01 first
    pub fn entries(&self) -> &[ParameterDef] {
        self.entries
    }
}

impl Default for StandardCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterCatalog for StandardCatalog {
    fn lookup(&self, name: &str) -> Option<&ParameterDef> {
        self.entries.iter().find(|def| def.name == name)
    }

    fn lookup_by_pid(&self, pid: u8) -> Option<&ParameterDef> {
        self.entries
            .iter()
            .find(|def| def.mode == mode::CURRENT_DATA && def.pid == Some(pid))
    }

    fn lookup_by_mode(&self, mode: u8) -> Option<&ParameterDef> {
        self.entries
            .iter()
            .find(|def| def.mode == mode && def.pid.is_none())
    }
}
