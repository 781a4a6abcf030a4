//! NMEA 0183 sentence decoder
//!
//! Decodes the three sentence types that feed position capture:
//! - RMC: Recommended Minimum Navigation Information
//! - GGA: Global Positioning System Fix Data
//! - VTG: Track Made Good and Ground Speed
//!
//! Malformed input is routine on a GPS serial line, so [`decode`] returns
//! `None` instead of an error for anything it cannot use.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kilometres per hour in one knot
pub const KMH_PER_KNOT: f64 = 1.852;

/// Miles per hour in one knot
pub const MPH_PER_KNOT: f64 = 1.150_78;

/// Talker prefixes that identify GNSS traffic on a line
pub const GPS_TALKER_PREFIXES: &[&str] = &["$GP", "$GN", "$GL", "$GA", "$GB", "$BD"];

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// NMEA sentence types handled by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentenceType {
    /// Recommended minimum
    Rmc,
    /// Fix data
    Gga,
    /// Track and ground speed
    Vtg,
}

impl SentenceType {
    /// Resolve a message identifier, with or without its talker ID
    pub fn from_identifier(id: &str) -> Option<Self> {
        let id = id.trim();
        if !id.is_ascii() {
            return None;
        }
        let formatter = if id.len() == 5 { &id[2..] } else { id };
        match formatter.to_ascii_uppercase().as_str() {
            "RMC" => Some(Self::Rmc),
            "GGA" => Some(Self::Gga),
            "VTG" => Some(Self::Vtg),
            _ => None,
        }
    }

    /// Minimum number of comma-separated fields, identifier included
    pub fn required_fields(self) -> usize {
        match self {
            Self::Rmc => 10,
            Self::Gga => 10,
            Self::Vtg => 8,
        }
    }
}

/// GPS fix quality as reported in GGA field 6
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GpsFixQuality {
    #[default]
    Invalid = 0,
    GpsFix = 1,
    DgpsFix = 2,
    PpsFix = 3,
    Rtk = 4,
    FloatRtk = 5,
    Estimated = 6,
    Manual = 7,
    Simulation = 8,
}

impl GpsFixQuality {
    /// Every known code, in code order
    pub const ALL: [GpsFixQuality; 9] = [
        Self::Invalid,
        Self::GpsFix,
        Self::DgpsFix,
        Self::PpsFix,
        Self::Rtk,
        Self::FloatRtk,
        Self::Estimated,
        Self::Manual,
        Self::Simulation,
    ];

    /// Look up a raw code; unknown codes have no variant
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }

    /// Numeric code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Symbolic label stored alongside the numeric code
    pub fn label(self) -> &'static str {
        match self {
            Self::Invalid => "Invalid",
            Self::GpsFix => "GPS",
            Self::DgpsFix => "DGPS",
            Self::PpsFix => "PPS",
            Self::Rtk => "RTK",
            Self::FloatRtk => "FloatRTK",
            Self::Estimated => "Estimated",
            Self::Manual => "Manual",
            Self::Simulation => "Simulation",
        }
    }

    /// Label for a raw code, `"Unknown"` when the code is out of range
    pub fn label_for(code: u8) -> &'static str {
        Self::from_code(code).map_or("Unknown", Self::label)
    }
}

impl fmt::Display for GpsFixQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ground speed in the units carried downstream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Speed {
    pub knots: f64,
    pub kmh: f64,
    pub mph: f64,
}

impl Speed {
    /// Build from a speed over ground in knots
    pub fn from_knots(knots: f64) -> Self {
        Self {
            knots,
            kmh: knots * KMH_PER_KNOT,
            mph: knots * MPH_PER_KNOT,
        }
    }

    /// Build from a speed in km/h (VTG fallback when knots are missing)
    pub fn from_kmh(kmh: f64) -> Self {
        Self::from_knots(kmh / KMH_PER_KNOT)
    }
}

/// Parsed RMC sentence
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RmcData {
    pub time: Option<NaiveTime>,
    /// A=Active, V=Void
    pub status: Option<char>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<Speed>,
    pub course: Option<f64>,
    pub date: Option<NaiveDate>,
}

/// Parsed GGA sentence
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GgaData {
    pub time: Option<NaiveTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub fix_quality: Option<u8>,
    pub satellites: Option<u8>,
    pub hdop: Option<f64>,
    /// Metres above mean sea level
    pub altitude: Option<f64>,
}

/// Parsed VTG sentence
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VtgData {
    /// True track, degrees
    pub course: Option<f64>,
    pub speed: Option<Speed>,
}

/// A decoded sentence
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "sentence", rename_all = "UPPERCASE")]
pub enum Sentence {
    Rmc(RmcData),
    Gga(GgaData),
    Vtg(VtgData),
}

impl Sentence {
    /// Sentence type of this variant
    pub fn sentence_type(&self) -> SentenceType {
        match self {
            Self::Rmc(_) => SentenceType::Rmc,
            Self::Gga(_) => SentenceType::Gga,
            Self::Vtg(_) => SentenceType::Vtg,
        }
    }
}

/// XOR checksum over the characters between `$` and `*`
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Strip the leading `$` and trailing checksum, verifying it when present.
///
/// Returns `None` for lines without `$`, and for checksums that are not two
/// hex digits or do not match the payload.
pub fn strip_checksum(line: &str) -> Option<&str> {
    let line = line.trim();
    let body = line.strip_prefix('$')?;

    match body.rfind('*') {
        Some(star) => {
            let (payload, tail) = body.split_at(star);
            let digits = tail[1..].trim();
            if digits.len() != 2 {
                return None;
            }
            let expected = u8::from_str_radix(digits, 16).ok()?;
            (checksum(payload) == expected).then_some(payload)
        }
        None => Some(body),
    }
}

/// Decode one line into a typed sentence.
pub fn decode(line: &str) -> Option<Sentence> {
    let payload = strip_checksum(line)?;
    let fields: Vec<&str> = payload.split(',').collect();

    let sentence_type = SentenceType::from_identifier(fields.first()?)?;
    if fields.len() < sentence_type.required_fields() {
        return None;
    }

    let sentence = match sentence_type {
        SentenceType::Rmc => Sentence::Rmc(parse_rmc(&fields)),
        SentenceType::Gga => Sentence::Gga(parse_gga(&fields)),
        SentenceType::Vtg => Sentence::Vtg(parse_vtg(&fields)),
    };
    Some(sentence)
}

/// Map a course in degrees to one of sixteen compass points
pub fn compass_direction(degrees: f64) -> &'static str {
    if !degrees.is_finite() {
        return COMPASS_POINTS[0];
    }
    let index = (degrees / 22.5).round().rem_euclid(16.0) as usize;
    COMPASS_POINTS[index % 16]
}

/// Parse a `(D)DDMM.MMMM` coordinate with its hemisphere into signed degrees.
///
/// `degree_digits` is 2 for latitude and 3 for longitude.
pub fn parse_coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    let value = value.trim();
    if value.len() <= degree_digits || !value.is_char_boundary(degree_digits) {
        return None;
    }

    let degrees: f64 = value[..degree_digits].parse().ok()?;
    let minutes: f64 = value[degree_digits..].parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }
    let decimal = degrees + minutes / 60.0;

    match hemisphere.trim() {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}

/// Parse time from HHMMSS.sss format
fn parse_time(s: &str) -> Option<NaiveTime> {
    if s.len() < 6 || !s.is_ascii() {
        return None;
    }

    let hours: u32 = s[0..2].parse().ok()?;
    let minutes: u32 = s[2..4].parse().ok()?;
    let seconds: f64 = s[4..].parse().ok()?;

    let secs = seconds.floor() as u32;
    let nanos = ((seconds - seconds.floor()) * 1_000_000_000.0) as u32;

    NaiveTime::from_hms_nano_opt(hours, minutes, secs, nanos)
}

/// Parse date from DDMMYY format
fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 || !s.is_ascii() {
        return None;
    }

    let day: u32 = s[0..2].parse().ok()?;
    let month: u32 = s[2..4].parse().ok()?;
    let year: i32 = s[4..6].parse().ok()?;

    // Two-digit years above 80 belong to the last century
    let full_year = if year > 80 { 1900 + year } else { 2000 + year };

    NaiveDate::from_ymd_opt(full_year, month, day)
}

fn parse_f64(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_char(s: &str) -> Option<char> {
    s.trim().chars().next()
}

fn field<'a>(fields: &[&'a str], index: usize) -> &'a str {
    fields.get(index).copied().unwrap_or("")
}

fn parse_rmc(fields: &[&str]) -> RmcData {
    RmcData {
        time: parse_time(field(fields, 1)),
        status: parse_char(field(fields, 2)),
        latitude: parse_coordinate(field(fields, 3), field(fields, 4), 2),
        longitude: parse_coordinate(field(fields, 5), field(fields, 6), 3),
        speed: parse_f64(field(fields, 7)).map(Speed::from_knots),
        course: parse_f64(field(fields, 8)),
        date: parse_date(field(fields, 9)),
    }
}

fn parse_gga(fields: &[&str]) -> GgaData {
    GgaData {
        time: parse_time(field(fields, 1)),
        latitude: parse_coordinate(field(fields, 2), field(fields, 3), 2),
        longitude: parse_coordinate(field(fields, 4), field(fields, 5), 3),
        fix_quality: field(fields, 6).trim().parse().ok(),
        satellites: field(fields, 7).trim().parse().ok(),
        hdop: parse_f64(field(fields, 8)),
        altitude: parse_f64(field(fields, 9)),
    }
}

fn parse_vtg(fields: &[&str]) -> VtgData {
    let speed = parse_f64(field(fields, 5))
        .map(Speed::from_knots)
        .or_else(|| parse_f64(field(fields, 7)).map(Speed::from_kmh));

    VtgData {
        course: parse_f64(field(fields, 1)),
        speed,
    }
}
