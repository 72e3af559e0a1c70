//! The eleven environmental quantities tracked per station.
//!
//! Raw columns (`raw_*`, as fetched/imputed) and interpolated columns (IDW output)
//! are positionally aligned: index `i` in either list names the same physical
//! quantity. Every positional array in the crate (`FieldValues`, diesel row
//! conversions, the imputed bit mask) is indexed through [`Field::index`].

pub const FIELD_COUNT: usize = 11;

/// One value slot per [`Field`], `None` when unknown.
pub type FieldValues = [Option<f64>; FIELD_COUNT];

pub const EMPTY_VALUES: FieldValues = [None; FIELD_COUNT];

pub const RAW_COLUMNS: [&str; FIELD_COUNT] = [
    "raw_pm25",
    "raw_pm10",
    "raw_no2",
    "raw_o3",
    "raw_so2",
    "raw_co",
    "raw_us_epa_index",
    "raw_temperature_c",
    "raw_humidity_percent",
    "raw_wind_speed_kmh",
    "raw_precipitation_mm",
];

pub const INTERPOLATED_COLUMNS: [&str; FIELD_COUNT] = [
    "pm25",
    "pm10",
    "no2",
    "o3",
    "so2",
    "co",
    "us_epa_index",
    "temperature_c",
    "humidity_percent",
    "wind_speed_kmh",
    "precipitation_mm",
];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Pm25,
    Pm10,
    No2,
    O3,
    So2,
    Co,
    UsEpaIndex,
    TemperatureC,
    HumidityPercent,
    WindSpeedKmh,
    PrecipitationMm,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::Pm25,
        Field::Pm10,
        Field::No2,
        Field::O3,
        Field::So2,
        Field::Co,
        Field::UsEpaIndex,
        Field::TemperatureC,
        Field::HumidityPercent,
        Field::WindSpeedKmh,
        Field::PrecipitationMm,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn raw_column(self) -> &'static str {
        RAW_COLUMNS[self.index()]
    }

    pub const fn interpolated_column(self) -> &'static str {
        INTERPOLATED_COLUMNS[self.index()]
    }

    /// Bit used for this field in a row's `imputed_mask`.
    pub const fn mask_bit(self) -> i32 {
        1 << self.index()
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.interpolated_column())
    }
}

/// Verify the raw/interpolated column lists still describe the same quantities
/// in the same order. Any mismatch would silently shift every estimate.
pub fn validate_alignment() -> Result<(), String> {
    for (i, field) in Field::ALL.iter().enumerate() {
        if field.index() != i {
            return Err(format!("field {:?} is declared at position {} but indexes {}", field, i, field.index()));
        }
        let raw = RAW_COLUMNS[i];
        let interp = INTERPOLATED_COLUMNS[i];
        match raw.strip_prefix("raw_") {
            Some(name) if name == interp => {}
            _ => {
                return Err(format!(
                    "raw column '{}' does not correspond to interpolated column '{}' at position {}",
                    raw, interp, i
                ));
            }
        }
    }
    Ok(())
}
