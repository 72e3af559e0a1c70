//! Domain types shared by the ingestion, imputation and interpolation stages.

use crate::fields::{EMPTY_VALUES, FieldValues};
use crate::geo::Coord;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A configured sensor site. Its coordinate is both where the upstream API is
/// queried and the camera/target coordinate interpolation writes back to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorLocation {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl SensorLocation {
    pub fn coord(&self) -> Coord {
        Coord::new(self.latitude, self.longitude)
    }
}

/// Identifies one cycle; all rows written by a cycle share it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CycleKey {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl CycleKey {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        CycleKey {
            date,
            time: time.with_nanosecond(0).unwrap_or(time),
        }
    }

    /// Key for a cycle triggered at `instant`: local wall-clock time in `tz`,
    /// shifted back by `lag` (readings describe the preceding hour).
    pub fn for_trigger<Tz: TimeZone>(instant: DateTime<Utc>, tz: &Tz, lag: Duration) -> Self {
        let local = (instant - lag).with_timezone(tz).naive_local();
        CycleKey::new(local.date(), local.time())
    }

    pub fn hour(&self) -> u32 {
        self.time.hour()
    }
}

impl fmt::Display for CycleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time.format("%H:%M:%S"))
    }
}

/// One station's reading for the current cycle, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub station_id: String,
    /// Configured coordinate of the site.
    pub target: Coord,
    /// Coordinate reported by the upstream API, `None` when the fetch failed.
    pub source: Option<Coord>,
    pub values: FieldValues,
    /// Bit `i` set when `values[i]` was filled by imputation.
    pub imputed_mask: i32,
}

impl RawReading {
    pub fn empty(location: &SensorLocation) -> Self {
        RawReading {
            station_id: location.station_id.clone(),
            target: location.coord(),
            source: None,
            values: EMPTY_VALUES,
            imputed_mask: 0,
        }
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }
}

/// A persisted row of the current cycle as seen by the estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRow {
    pub row_id: i64,
    pub station_id: String,
    pub source: Option<Coord>,
    pub values: FieldValues,
    pub imputed_mask: i32,
}

/// A persisted row whose target coordinate needs interpolated values.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetRow {
    pub row_id: i64,
    pub station_id: String,
    pub coord: Coord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedUpdate {
    pub row_id: i64,
    pub values: FieldValues,
}
