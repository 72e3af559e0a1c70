//! Distance and inverse-distance weight kernel.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Length of one degree of arc on the reference sphere.
pub const KM_PER_DEGREE: f64 = EARTH_RADIUS_KM * PI / 180.0;
pub const DEFAULT_POWER: f64 = 2.0;
pub const DEFAULT_EPS_KM: f64 = 1e-10;
/// Distances at or below this are treated as the same location.
pub const COLOCATION_TOLERANCE_KM: f64 = 1e-8;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Coord { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

pub trait DistanceMetric {
    fn distance_km(&self, a: Coord, b: Coord) -> f64;
}

/// Great-circle distance on a sphere of radius [`EARTH_RADIUS_KM`].
#[derive(Debug, Copy, Clone, Default)]
pub struct Haversine;

impl DistanceMetric for Haversine {
    fn distance_km(&self, a: Coord, b: Coord) -> f64 {
        let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (b.lon - a.lon).to_radians();
        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        // clamp guards asin against rounding just above 1.0 for antipodal points
        2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
    }
}

/// Euclidean distance over raw degree coordinates, scaled by [`KM_PER_DEGREE`].
/// Ignores meridian convergence, so it overstates east-west distances away from
/// the equator.
#[derive(Debug, Copy, Clone, Default)]
pub struct PlanarDegrees;

impl DistanceMetric for PlanarDegrees {
    fn distance_km(&self, a: Coord, b: Coord) -> f64 {
        (b.lat - a.lat).hypot(b.lon - a.lon) * KM_PER_DEGREE
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MetricKind {
    #[default]
    Haversine,
    Planar,
}

impl DistanceMetric for MetricKind {
    fn distance_km(&self, a: Coord, b: Coord) -> f64 {
        match self {
            MetricKind::Haversine => Haversine.distance_km(a, b),
            MetricKind::Planar => PlanarDegrees.distance_km(a, b),
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "haversine" => Ok(MetricKind::Haversine),
            "planar" | "euclidean" => Ok(MetricKind::Planar),
            other => Err(format!("unknown distance metric '{}' (expected haversine|planar)", other)),
        }
    }
}

/// Distances from each point to a single target, in input order.
pub fn distances_to<M: DistanceMetric + ?Sized>(metric: &M, points: &[Coord], target: Coord) -> Vec<f64> {
    points.iter().map(|p| metric.distance_km(*p, target)).collect()
}

pub fn weight(distance_km: f64, power: f64, eps: f64) -> f64 {
    1.0 / distance_km.max(eps).powf(power)
}

pub fn is_colocated(distance_km: f64) -> bool {
    distance_km.abs() <= COLOCATION_TOLERANCE_KM
}
