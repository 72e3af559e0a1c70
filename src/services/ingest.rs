use crate::client::{WeatherApiClient, WeatherApiError};
use crate::fields::{EMPTY_VALUES, Field};
use crate::geo::Coord;
use crate::models::pollution::{RawReading, SensorLocation};
use crate::models::weather::CurrentResponse;
use log::{debug, warn};

/// Upstream provider of current conditions for a sensor location.
pub trait SensorSource {
    fn fetch_current(&self, location: &SensorLocation) -> Result<CurrentResponse, WeatherApiError>;
}

impl SensorSource for WeatherApiClient {
    fn fetch_current(&self, location: &SensorLocation) -> Result<CurrentResponse, WeatherApiError> {
        self.get_current(location.coord())
    }
}

#[derive(Debug, Default)]
pub struct FetchedBatch {
    pub readings: Vec<RawReading>,
    pub failures: usize,
}

/// Query every location in order. A failed fetch yields an all-null reading
/// without source coordinates; the batch always has one reading per location.
pub fn fetch_batch<S: SensorSource + ?Sized>(source: &S, locations: &[SensorLocation]) -> FetchedBatch {
    let mut batch = FetchedBatch {
        readings: Vec::with_capacity(locations.len()),
        failures: 0,
    };

    for location in locations {
        let reading = match source.fetch_current(location) {
            Ok(resp) => {
                let reading = reading_from_response(location, &resp);
                debug!(
                    "Fetch: {} ok ({} of {} fields null)",
                    location.station_id,
                    reading.null_count(),
                    reading.values.len()
                );
                reading
            }
            Err(e) => {
                warn!("Fetch: {} failed, recording null reading: {}", location.station_id, e);
                batch.failures += 1;
                RawReading::empty(location)
            }
        };
        batch.readings.push(reading);
    }

    batch
}

pub fn reading_from_response(location: &SensorLocation, resp: &CurrentResponse) -> RawReading {
    let aq = &resp.current.air_quality;
    let mut values = EMPTY_VALUES;
    values[Field::Pm25.index()] = aq.pm2_5;
    values[Field::Pm10.index()] = aq.pm10;
    values[Field::No2.index()] = aq.no2;
    values[Field::O3.index()] = aq.o3;
    values[Field::So2.index()] = aq.so2;
    values[Field::Co.index()] = aq.co;
    values[Field::UsEpaIndex.index()] = aq.us_epa_index;
    values[Field::TemperatureC.index()] = resp.current.temp_c;
    values[Field::HumidityPercent.index()] = resp.current.humidity;
    values[Field::WindSpeedKmh.index()] = resp.current.wind_kph;
    values[Field::PrecipitationMm.index()] = resp.current.precip_mm;
    for v in values.iter_mut() {
        *v = v.filter(|x| x.is_finite());
    }

    let source = Coord::new(resp.location.lat, resp.location.lon);
    RawReading {
        station_id: location.station_id.clone(),
        target: location.coord(),
        source: source.is_finite().then_some(source),
        values,
        imputed_mask: 0,
    }
}
