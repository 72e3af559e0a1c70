//! Payload of the weather/air-quality `current.json` endpoint.
//!
//! Only the subset consumed by the pipeline is modelled. Every modelled key is
//! required: a body missing any of them fails to deserialize and the sensor is
//! recorded as a null reading. A metric explicitly reported as `null` is
//! accepted and maps to `None`.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentResponse {
    pub location: ApiLocation,
    pub current: CurrentConditions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiLocation {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    #[serde(deserialize_with = "present_or_null")]
    pub temp_c: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub humidity: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub wind_kph: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub precip_mm: Option<f64>,
    pub air_quality: AirQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    #[serde(deserialize_with = "present_or_null")]
    pub co: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub no2: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub o3: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub so2: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub pm2_5: Option<f64>,
    #[serde(deserialize_with = "present_or_null")]
    pub pm10: Option<f64>,
    #[serde(rename = "us-epa-index", deserialize_with = "present_or_null")]
    pub us_epa_index: Option<f64>,
}

// Key must be present; `null` maps to `None`.
fn present_or_null<'de, D: Deserializer<'de>>(de: D) -> Result<Option<f64>, D::Error> {
    Option::<f64>::deserialize(de)
}
