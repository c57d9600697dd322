use serde::{Deserialize, Serialize};

/// kind of sensor a reading came from
///
/// the wire carries this as a single byte. codes we don't know yet decode
/// to `Other` so newer nodes can talk to older leaders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Fake,
    Atmospheric,
    Other(u8),
}

impl SensorKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => SensorKind::Fake,
            1 => SensorKind::Atmospheric,
            other => SensorKind::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SensorKind::Fake => 0,
            SensorKind::Atmospheric => 1,
            SensorKind::Other(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Fake => "fake",
            SensorKind::Atmospheric => "atmospheric",
            SensorKind::Other(_) => "unknown",
        }
    }
}

/// a raw reading as produced by a sensor adapter
///
/// the node never interprets `raw`; parsing happens on the leader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    pub kind: SensorKind,
    pub raw: Vec<u8>,
}

impl Reading {
    pub fn new(kind: SensorKind, raw: impl Into<Vec<u8>>) -> Self {
        Self { kind, raw: raw.into() }
    }
}

/// number of comma separated fields in an atmospheric line
pub const ATMOSPHERIC_FIELDS: usize = 6;

/// one line from the atmospheric driver: `ts,temp,humidity,pressure,altitude,voc`
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtmosphericReading {
    /// unix seconds
    pub timestamp: i64,
    /// celsius
    pub temperature: f32,
    /// relative humidity (0-100%)
    pub humidity: f32,
    /// hPa
    pub pressure: f32,
    /// meters
    pub altitude: f32,
    pub voc_index: f32,
}

impl AtmosphericReading {
    /// parse a driver line.
    ///
    /// a line with the wrong field count yields the zero reading; a single
    /// unparsable field defaults to zero without spoiling the others.
    pub fn parse_line(line: &str) -> Self {
        let fields: Vec<&str> = line.trim().split(',').map(str::trim).collect();
        if fields.len() != ATMOSPHERIC_FIELDS {
            return Self::default();
        }

        let num = |s: &str| s.parse::<f32>().unwrap_or(0.0);
        Self {
            timestamp: fields[0].parse().unwrap_or(0),
            temperature: num(fields[1]),
            humidity: num(fields[2]),
            pressure: num(fields[3]),
            altitude: num(fields[4]),
            voc_index: num(fields[5]),
        }
    }

    pub fn temperature_f(&self) -> f32 {
        self.temperature * 9.0 / 5.0 + 32.0
    }
}
