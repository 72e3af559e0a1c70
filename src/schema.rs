// Declarations mirror migrations/2024-11-01-000000_create_pollution_data.

diesel::table! {
    pollution_data (id) {
        id -> Int8,
        date -> Date,
        time -> Time,
        station_id -> Text,
        target_lat -> Nullable<Float8>,
        target_lon -> Nullable<Float8>,
        source_lat -> Nullable<Float8>,
        source_lon -> Nullable<Float8>,
        raw_pm25 -> Nullable<Float8>,
        raw_pm10 -> Nullable<Float8>,
        raw_no2 -> Nullable<Float8>,
        raw_o3 -> Nullable<Float8>,
        raw_so2 -> Nullable<Float8>,
        raw_co -> Nullable<Float8>,
        raw_us_epa_index -> Nullable<Float8>,
        raw_temperature_c -> Nullable<Float8>,
        raw_humidity_percent -> Nullable<Float8>,
        raw_wind_speed_kmh -> Nullable<Float8>,
        raw_precipitation_mm -> Nullable<Float8>,
        imputed_mask -> Int4,
        pm25 -> Nullable<Float8>,
        pm10 -> Nullable<Float8>,
        no2 -> Nullable<Float8>,
        o3 -> Nullable<Float8>,
        so2 -> Nullable<Float8>,
        co -> Nullable<Float8>,
        us_epa_index -> Nullable<Float8>,
        temperature_c -> Nullable<Float8>,
        humidity_percent -> Nullable<Float8>,
        wind_speed_kmh -> Nullable<Float8>,
        precipitation_mm -> Nullable<Float8>,
    }
}
