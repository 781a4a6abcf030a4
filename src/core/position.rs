//! Position accumulation
//!
//! NMEA receivers spread one fix across several sentences. [`PositionState`]
//! folds them together: each sentence overwrites only the fields it carries,
//! everything else keeps its last known value.

use super::protocol::nmea::{compass_direction, GgaData, RmcData, Sentence, Speed, VtgData};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Running position assembled from decoded sentences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub device_id: String,
    /// Receiver time of the last fix, UTC
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub speed_kmh: Option<f64>,
    pub speed_mph: Option<f64>,
    /// Course over ground, degrees true
    pub course: Option<f64>,
    pub course_direction: Option<String>,
    pub satellites: Option<u8>,
    pub fix_quality: Option<u8>,
    pub hdop: Option<f64>,
    /// RMC status letter, "A" active or "V" void
    pub status: Option<String>,
}

impl PositionState {
    /// Empty state for a device
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Whether both coordinates are known
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Fold one decoded sentence into the state.
    ///
    /// `today` supplies the date for GGA times when no RMC date has been
    /// seen yet.
    pub fn apply(&mut self, sentence: &Sentence, today: NaiveDate) {
        match sentence {
            Sentence::Rmc(rmc) => self.apply_rmc(rmc, today),
            Sentence::Gga(gga) => self.apply_gga(gga, today),
            Sentence::Vtg(vtg) => self.apply_vtg(vtg),
        }
    }

    fn apply_rmc(&mut self, rmc: &RmcData, today: NaiveDate) {
        if let Some(time) = rmc.time {
            self.set_fix_time(time, rmc.date, today);
        }
        if let Some(status) = rmc.status {
            self.status = Some(status.to_string());
        }
        update(&mut self.latitude, rmc.latitude);
        update(&mut self.longitude, rmc.longitude);
        if let Some(speed) = rmc.speed {
            self.set_speed(speed);
        }
        if let Some(course) = rmc.course {
            self.set_course(course);
        }
    }

    fn apply_gga(&mut self, gga: &GgaData, today: NaiveDate) {
        if let Some(time) = gga.time {
            self.set_fix_time(time, None, today);
        }
        update(&mut self.latitude, gga.latitude);
        update(&mut self.longitude, gga.longitude);
        update(&mut self.altitude, gga.altitude);
        update(&mut self.fix_quality, gga.fix_quality);
        update(&mut self.satellites, gga.satellites);
        update(&mut self.hdop, gga.hdop);
    }

    fn apply_vtg(&mut self, vtg: &VtgData) {
        if let Some(speed) = vtg.speed {
            self.set_speed(speed);
        }
        if let Some(course) = vtg.course {
            self.set_course(course);
        }
    }

    fn set_speed(&mut self, speed: Speed) {
        self.speed_kmh = Some(speed.kmh);
        self.speed_mph = Some(speed.mph);
    }

    fn set_course(&mut self, course: f64) {
        self.course = Some(course);
        self.course_direction = Some(compass_direction(course).to_string());
    }

    fn set_fix_time(&mut self, time: NaiveTime, date: Option<NaiveDate>, today: NaiveDate) {
        let date = date
            .or_else(|| self.timestamp.map(|ts| ts.date_naive()))
            .unwrap_or(today);
        self.timestamp = Some(date.and_time(time).and_utc());
    }

    /// Deep copy of the current state, stamped with the capture instant
    pub fn snapshot(&self, captured_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            captured_at,
            position: self.clone(),
        }
    }
}

fn update<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Immutable copy of the position at one capture instant.
///
/// This is the unit of record flowing through filtering and dispatch, and
/// its JSON form is what every sink stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub captured_at: DateTime<Utc>,
    #[serde(flatten)]
    pub position: PositionState,
}

impl Snapshot {
    /// Receiver time when known, otherwise the capture instant
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.position.timestamp.unwrap_or(self.captured_at)
    }

    /// Coordinates as a pair when both are present
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.position.latitude.zip(self.position.longitude)
    }

    /// Format position as human-readable string
    pub fn format_position(&self) -> Option<String> {
        let (lat, lon) = self.coordinates()?;

        let lat_dir = if lat >= 0.0 { "N" } else { "S" };
        let lon_dir = if lon >= 0.0 { "E" } else { "W" };

        Some(format!(
            "{:.6}° {}, {:.6}° {}",
            lat.abs(),
            lat_dir,
            lon.abs(),
            lon_dir
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::decode;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_partial_update_keeps_previous_values() {
        let mut state = PositionState::new("gps-01");
        state.apply(
            &decode("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47").unwrap(),
            today(),
        );
        state.apply(
            &decode("$GPVTG,054.7,T,034.4,M,005.5,N,010.2,K*48").unwrap(),
            today(),
        );

        assert_eq!(state.satellites, Some(8));
        assert_eq!(state.altitude, Some(545.4));
        assert_eq!(state.course, Some(54.7));
        assert_eq!(state.course_direction.as_deref(), Some("NE"));
        assert!(state.has_position());
    }

    #[test]
    fn test_gga_time_uses_known_date() {
        let mut state = PositionState::new("gps-01");
        state.apply(
            &decode("$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A")
                .unwrap(),
            today(),
        );
        state.apply(
            &decode("$GPGGA,123520,4807.041,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*43").unwrap(),
            today(),
        );

        let ts = state.timestamp.unwrap();
        assert_eq!(ts.date_naive(), NaiveDate::from_ymd_opt(1994, 3, 23).unwrap());
        assert_eq!(ts.time(), NaiveTime::from_hms_opt(12, 35, 20).unwrap());
    }

    #[test]
    fn test_gga_time_without_date_uses_today() {
        let mut state = PositionState::new("gps-01");
        state.apply(
            &decode("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47").unwrap(),
            today(),
        );
        assert_eq!(state.timestamp.unwrap().date_naive(), today());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut state = PositionState::new("gps-01");
        state.latitude = Some(1.0);
        let snapshot = state.snapshot(Utc::now());
        state.latitude = Some(2.0);

        assert_eq!(snapshot.position.latitude, Some(1.0));
    }

    #[test]
    fn test_snapshot_json_is_flat() {
        let mut state = PositionState::new("gps-01");
        state.latitude = Some(48.1173);
        let json = serde_json::to_value(state.snapshot(Utc::now())).unwrap();

        assert_eq!(json["device_id"], "gps-01");
        assert_eq!(json["latitude"], 48.1173);
        assert!(json.get("captured_at").is_some());
    }
}
