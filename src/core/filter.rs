//! Snapshot filtering
//!
//! Two stages sit between capture and dispatch:
//! - [`QualityGate`] drops snapshots with a bad fix or impossible coordinates
//! - [`MovementFilter`] drops snapshots that barely moved since the last one sent

use super::position::Snapshot;
use std::fmt;

/// Mean Earth radius in metres
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in metres between two points in decimal degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    EARTH_RADIUS_M * c
}

/// Why a snapshot failed the quality gate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Latitude or longitude missing
    MissingPosition,
    /// Fix quality reported as no fix
    NoFix(u8),
    /// Too few satellites in use
    TooFewSatellites(u8),
    /// Coordinates outside the valid range
    OutOfRange { latitude: f64, longitude: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPosition => write!(f, "missing position"),
            Self::NoFix(q) => write!(f, "fix quality {}", q),
            Self::TooFewSatellites(n) => write!(f, "{} satellites", n),
            Self::OutOfRange {
                latitude,
                longitude,
            } => write!(f, "coordinates out of range ({}, {})", latitude, longitude),
        }
    }
}

/// Stateless fix quality check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    pub min_fix_quality: u8,
    pub min_satellites: u8,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            min_fix_quality: 1,
            min_satellites: 3,
        }
    }
}

impl QualityGate {
    /// Check a snapshot. Absent optional fields pass; only present-but-bad
    /// values reject.
    pub fn check(&self, snapshot: &Snapshot) -> Result<(), Rejection> {
        let p = &snapshot.position;
        let (Some(latitude), Some(longitude)) = (p.latitude, p.longitude) else {
            return Err(Rejection::MissingPosition);
        };

        if let Some(quality) = p.fix_quality {
            if quality < self.min_fix_quality {
                return Err(Rejection::NoFix(quality));
            }
        }
        if let Some(satellites) = p.satellites {
            if satellites < self.min_satellites {
                return Err(Rejection::TooFewSatellites(satellites));
            }
        }
        if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
            return Err(Rejection::OutOfRange {
                latitude,
                longitude,
            });
        }

        Ok(())
    }

    /// Convenience predicate
    pub fn accepts(&self, snapshot: &Snapshot) -> bool {
        self.check(snapshot).is_ok()
    }
}

/// Outcome of the movement check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Movement {
    /// No reference yet; always sent
    First,
    /// Moved at least the threshold
    Moved(f64),
    /// Moved less than the threshold; suppressed
    Stationary(f64),
}

impl Movement {
    /// Whether the snapshot should be dispatched
    pub fn is_emit(&self) -> bool {
        !matches!(self, Self::Stationary(_))
    }
}

/// Displacement filter remembering the last dispatched snapshot
#[derive(Debug, Clone)]
pub struct MovementFilter {
    min_distance_m: f64,
    last_emitted: Option<Snapshot>,
}

impl MovementFilter {
    /// Create a filter with the minimum movement in metres
    pub fn new(min_distance_m: f64) -> Self {
        Self {
            min_distance_m,
            last_emitted: None,
        }
    }

    /// Minimum movement threshold in metres
    pub fn threshold(&self) -> f64 {
        self.min_distance_m
    }

    /// Last snapshot that passed the filter
    pub fn last_emitted(&self) -> Option<&Snapshot> {
        self.last_emitted.as_ref()
    }

    /// Decide on a gate-approved snapshot; on emit it becomes the new reference.
    pub fn evaluate(&mut self, candidate: &Snapshot) -> Movement {
        let distance = self
            .last_emitted
            .as_ref()
            .and_then(Snapshot::coordinates)
            .zip(candidate.coordinates())
            .map(|((lat1, lon1), (lat2, lon2))| haversine_distance(lat1, lon1, lat2, lon2));

        let movement = match (&self.last_emitted, distance) {
            (None, _) | (Some(_), None) => Movement::First,
            (Some(_), Some(d)) if d < self.min_distance_m => Movement::Stationary(d),
            (Some(_), Some(d)) => Movement::Moved(d),
        };

        if movement.is_emit() {
            self.last_emitted = Some(candidate.clone());
        }
        movement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::position::PositionState;
    use chrono::Utc;

    fn snapshot(lat: f64, lon: f64) -> Snapshot {
        let mut state = PositionState::new("gps-01");
        state.latitude = Some(lat);
        state.longitude = Some(lon);
        state.snapshot(Utc::now())
    }

    /// Latitude offset in degrees for a northward displacement in metres
    fn north_by(meters: f64) -> f64 {
        (meters / EARTH_RADIUS_M).to_degrees()
    }

    #[test]
    fn test_haversine_properties() {
        assert_eq!(haversine_distance(48.1, 11.5, 48.1, 11.5), 0.0);

        let ab = haversine_distance(48.1, 11.5, 52.5, 13.4);
        let ba = haversine_distance(52.5, 13.4, 48.1, 11.5);
        assert!((ab - ba).abs() < 1e-6);

        let mut previous = 0.0;
        for step in 1..20 {
            let d = haversine_distance(10.0, 20.0, 10.0 + step as f64 * 0.5, 20.0 + step as f64 * 0.5);
            assert!(d > previous);
            previous = d;
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude along a meridian
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.9).abs() < 1.0);
    }

    #[test]
    fn test_quality_gate_boundaries() {
        let gate = QualityGate::default();
        let mut base = snapshot(45.0, 10.0);
        base.position.satellites = Some(3);
        base.position.fix_quality = Some(1);
        assert!(gate.accepts(&base));

        let mut two_sats = base.clone();
        two_sats.position.satellites = Some(2);
        assert_eq!(gate.check(&two_sats), Err(Rejection::TooFewSatellites(2)));

        let mut no_fix = base.clone();
        no_fix.position.fix_quality = Some(0);
        assert_eq!(gate.check(&no_fix), Err(Rejection::NoFix(0)));

        let mut north_of_pole = base.clone();
        north_of_pole.position.latitude = Some(90.5);
        assert!(matches!(
            gate.check(&north_of_pole),
            Err(Rejection::OutOfRange { .. })
        ));

        let mut bad_lon = base;
        bad_lon.position.longitude = Some(-180.1);
        assert!(!gate.accepts(&bad_lon));
    }

    #[test]
    fn test_quality_gate_permissive_on_absent() {
        let gate = QualityGate::default();
        assert!(gate.accepts(&snapshot(-33.9, 151.2)));

        let mut missing = snapshot(0.0, 0.0);
        missing.position.longitude = None;
        assert_eq!(gate.check(&missing), Err(Rejection::MissingPosition));
    }

    #[test]
    fn test_first_snapshot_always_emitted() {
        let mut filter = MovementFilter::new(1_000_000.0);
        assert_eq!(filter.evaluate(&snapshot(10.0, 10.0)), Movement::First);
        assert!(filter.last_emitted().is_some());
    }

    #[test]
    fn test_movement_threshold() {
        let mut filter = MovementFilter::new(10.0);
        filter.evaluate(&snapshot(48.0, 11.0));

        let small = snapshot(48.0 + north_by(5.0), 11.0);
        assert!(matches!(filter.evaluate(&small), Movement::Stationary(_)));
        assert_eq!(filter.last_emitted().unwrap().position.latitude, Some(48.0));

        let just_enough = snapshot(48.0 + north_by(10.001), 11.0);
        assert!(matches!(filter.evaluate(&just_enough), Movement::Moved(_)));
        assert_eq!(
            filter.last_emitted().unwrap().position.latitude,
            just_enough.position.latitude
        );
    }

    #[test]
    fn test_displacement_equal_to_threshold_is_emitted() {
        let origin = snapshot(48.0, 11.0);
        let candidate = snapshot(48.0 + north_by(10.0), 11.0);
        let exact = haversine_distance(48.0, 11.0, 48.0 + north_by(10.0), 11.0);

        let mut filter = MovementFilter::new(exact);
        filter.evaluate(&origin);
        assert_eq!(filter.evaluate(&candidate), Movement::Moved(exact));
        assert_eq!(
            filter.last_emitted().unwrap().position.latitude,
            candidate.position.latitude
        );
    }

    #[test]
    fn test_zero_threshold_emits_everything() {
        let mut filter = MovementFilter::new(0.0);
        filter.evaluate(&snapshot(1.0, 1.0));
        assert!(filter.evaluate(&snapshot(1.0, 1.0)).is_emit());
    }
}
