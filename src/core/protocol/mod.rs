//! Protocol implementations
//!
//! Provides the NMEA 0183 decoder used by position capture.

pub mod nmea;

pub use nmea::{
    checksum, compass_direction, decode, GgaData, GpsFixQuality, RmcData, Sentence, SentenceType,
    Speed, VtgData, GPS_TALKER_PREFIXES,
};
