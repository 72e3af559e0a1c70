//! Diesel row structs for `pollution_data`.
//!
//! Each struct converts to/from the positional [`FieldValues`] arrays used by the
//! pipeline. The field order in every conversion follows [`Field::ALL`].

use chrono::{NaiveDate, NaiveTime};
use diesel::prelude::*;

use crate::fields::{Field, FieldValues};
use crate::geo::Coord;
use crate::models::pollution::{CycleKey, InterpolatedUpdate, RawReading, StationRow, TargetRow};
use crate::schema;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::pollution_data)]
pub struct NewPollutionRow {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub station_id: String,
    pub target_lat: Option<f64>,
    pub target_lon: Option<f64>,
    pub source_lat: Option<f64>,
    pub source_lon: Option<f64>,
    pub raw_pm25: Option<f64>,
    pub raw_pm10: Option<f64>,
    pub raw_no2: Option<f64>,
    pub raw_o3: Option<f64>,
    pub raw_so2: Option<f64>,
    pub raw_co: Option<f64>,
    pub raw_us_epa_index: Option<f64>,
    pub raw_temperature_c: Option<f64>,
    pub raw_humidity_percent: Option<f64>,
    pub raw_wind_speed_kmh: Option<f64>,
    pub raw_precipitation_mm: Option<f64>,
    pub imputed_mask: i32,
}

impl NewPollutionRow {
    pub fn from_reading(key: &CycleKey, reading: &RawReading) -> Self {
        let v = &reading.values;
        NewPollutionRow {
            date: key.date,
            time: key.time,
            station_id: reading.station_id.clone(),
            target_lat: Some(reading.target.lat),
            target_lon: Some(reading.target.lon),
            source_lat: reading.source.map(|c| c.lat),
            source_lon: reading.source.map(|c| c.lon),
            raw_pm25: v[Field::Pm25.index()],
            raw_pm10: v[Field::Pm10.index()],
            raw_no2: v[Field::No2.index()],
            raw_o3: v[Field::O3.index()],
            raw_so2: v[Field::So2.index()],
            raw_co: v[Field::Co.index()],
            raw_us_epa_index: v[Field::UsEpaIndex.index()],
            raw_temperature_c: v[Field::TemperatureC.index()],
            raw_humidity_percent: v[Field::HumidityPercent.index()],
            raw_wind_speed_kmh: v[Field::WindSpeedKmh.index()],
            raw_precipitation_mm: v[Field::PrecipitationMm.index()],
            imputed_mask: reading.imputed_mask,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::pollution_data)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CycleRowRecord {
    pub id: i64,
    pub station_id: String,
    pub source_lat: Option<f64>,
    pub source_lon: Option<f64>,
    pub raw_pm25: Option<f64>,
    pub raw_pm10: Option<f64>,
    pub raw_no2: Option<f64>,
    pub raw_o3: Option<f64>,
    pub raw_so2: Option<f64>,
    pub raw_co: Option<f64>,
    pub raw_us_epa_index: Option<f64>,
    pub raw_temperature_c: Option<f64>,
    pub raw_humidity_percent: Option<f64>,
    pub raw_wind_speed_kmh: Option<f64>,
    pub raw_precipitation_mm: Option<f64>,
    pub imputed_mask: i32,
}

impl From<CycleRowRecord> for StationRow {
    fn from(r: CycleRowRecord) -> Self {
        let source = match (r.source_lat, r.source_lon) {
            (Some(lat), Some(lon)) => Some(Coord::new(lat, lon)),
            _ => None,
        };
        StationRow {
            row_id: r.id,
            station_id: r.station_id,
            source,
            values: [
                r.raw_pm25,
                r.raw_pm10,
                r.raw_no2,
                r.raw_o3,
                r.raw_so2,
                r.raw_co,
                r.raw_us_epa_index,
                r.raw_temperature_c,
                r.raw_humidity_percent,
                r.raw_wind_speed_kmh,
                r.raw_precipitation_mm,
            ],
            imputed_mask: r.imputed_mask,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = schema::pollution_data)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TargetRecord {
    pub id: i64,
    pub station_id: String,
    pub target_lat: Option<f64>,
    pub target_lon: Option<f64>,
}

impl TargetRecord {
    /// `None` for rows without a usable target coordinate.
    pub fn into_target(self) -> Option<TargetRow> {
        let coord = Coord::new(self.target_lat?, self.target_lon?);
        coord.is_finite().then(|| TargetRow {
            row_id: self.id,
            station_id: self.station_id,
            coord,
        })
    }
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = schema::pollution_data)]
#[diesel(treat_none_as_null = true)]
pub struct InterpolatedChangeset {
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub so2: Option<f64>,
    pub co: Option<f64>,
    pub us_epa_index: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub precipitation_mm: Option<f64>,
}

impl From<&FieldValues> for InterpolatedChangeset {
    fn from(v: &FieldValues) -> Self {
        InterpolatedChangeset {
            pm25: v[Field::Pm25.index()],
            pm10: v[Field::Pm10.index()],
            no2: v[Field::No2.index()],
            o3: v[Field::O3.index()],
            so2: v[Field::So2.index()],
            co: v[Field::Co.index()],
            us_epa_index: v[Field::UsEpaIndex.index()],
            temperature_c: v[Field::TemperatureC.index()],
            humidity_percent: v[Field::HumidityPercent.index()],
            wind_speed_kmh: v[Field::WindSpeedKmh.index()],
            precipitation_mm: v[Field::PrecipitationMm.index()],
        }
    }
}

impl From<&InterpolatedUpdate> for InterpolatedChangeset {
    fn from(u: &InterpolatedUpdate) -> Self {
        InterpolatedChangeset::from(&u.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::EMPTY_VALUES;

    #[test]
    fn insert_row_keeps_positional_order() {
        let key = CycleKey::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        );
        let mut values = EMPTY_VALUES;
        for f in Field::ALL {
            values[f.index()] = Some(f.index() as f64);
        }
        let reading = RawReading {
            station_id: "PER-7-032".into(),
            target: Coord::new(18.79, 98.98),
            source: Some(Coord::new(18.8, 99.0)),
            values,
            imputed_mask: Field::Co.mask_bit(),
        };
        let row = NewPollutionRow::from_reading(&key, &reading);
        assert_eq!(row.raw_pm25, Some(0.0));
        assert_eq!(row.raw_co, Some(5.0));
        assert_eq!(row.raw_us_epa_index, Some(6.0));
        assert_eq!(row.raw_precipitation_mm, Some(10.0));
        assert_eq!(row.imputed_mask, 1 << 5);
        assert_eq!(row.source_lat, Some(18.8));
    }

    #[test]
    fn cycle_record_round_trips_into_positional_values() {
        let record = CycleRowRecord {
            id: 7,
            station_id: "PER-7-032".into(),
            source_lat: Some(1.0),
            source_lon: None,
            raw_pm25: Some(0.0),
            raw_pm10: Some(1.0),
            raw_no2: Some(2.0),
            raw_o3: Some(3.0),
            raw_so2: Some(4.0),
            raw_co: Some(5.0),
            raw_us_epa_index: Some(6.0),
            raw_temperature_c: Some(7.0),
            raw_humidity_percent: Some(8.0),
            raw_wind_speed_kmh: Some(9.0),
            raw_precipitation_mm: Some(10.0),
            imputed_mask: 0,
        };
        let row = StationRow::from(record);
        assert_eq!(row.source, None, "half a coordinate is no coordinate");
        for f in Field::ALL {
            assert_eq!(row.values[f.index()], Some(f.index() as f64), "{f}");
        }

        let changeset = InterpolatedChangeset::from(&row.values);
        assert_eq!(changeset.pm25, Some(0.0));
        assert_eq!(changeset.us_epa_index, Some(6.0));
        assert_eq!(changeset.precipitation_mm, Some(10.0));
    }

    #[test]
    fn target_record_requires_both_coordinates() {
        let ok = TargetRecord {
            id: 1,
            station_id: "a".into(),
            target_lat: Some(13.0),
            target_lon: Some(100.0),
        };
        assert_eq!(ok.into_target().map(|t| t.coord), Some(Coord::new(13.0, 100.0)));
        let missing = TargetRecord {
            id: 2,
            station_id: "b".into(),
            target_lat: None,
            target_lon: Some(100.0),
        };
        assert!(missing.into_target().is_none());
    }
}
