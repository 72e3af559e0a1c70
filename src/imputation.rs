//! Tiered imputation of missing raw values in a freshly fetched batch.
//!
//! Each null `(station, field)` is resolved by the first tier that yields a value:
//!
//! 1. mean of the field over the current batch
//! 2. same station, same hour of day, trailing 14 days
//! 3. all stations, same hour of day, trailing 14 days
//! 4. all stations, all hours, trailing 30 days
//! 5. `0.0`
//!
//! Historical tiers are memoised in a [`HistoryCache`] that lives for exactly one
//! cycle. They average every persisted value unless [`HistoryInput::Observed`]
//! is selected, in which case slots that were themselves imputed are skipped.

use crate::fields::{EMPTY_VALUES, FIELD_COUNT, Field, FieldValues};
use crate::models::pollution::{CycleKey, RawReading};
use crate::store::{HistoryQuery, Store};
use log::{debug, warn};
use std::collections::HashMap;
use std::str::FromStr;

pub const SAME_HOUR_WINDOW_DAYS: u32 = 14;
pub const ALL_HOURS_WINDOW_DAYS: u32 = 30;
pub const HARD_DEFAULT: f64 = 0.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tier {
    BatchMean,
    StationSameHour,
    NetworkSameHour,
    NetworkRecent,
    HardDefault,
}

/// Which persisted values the historical tiers average.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum HistoryInput {
    /// Everything persisted, earlier imputed fills included.
    #[default]
    All,
    /// Only values whose `imputed_mask` bit is clear.
    Observed,
}

impl FromStr for HistoryInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(HistoryInput::All),
            "observed" => Ok(HistoryInput::Observed),
            other => Err(format!("unknown history input '{}' (expected all|observed)", other)),
        }
    }
}

/// Historical averages resolved during one cycle.
///
/// Every entry is looked up at most once: per-station same-hour averages once
/// per station, network-wide averages once per cycle. A failed lookup is cached
/// as "no value" so the next tier takes over without re-querying.
#[derive(Debug)]
pub struct HistoryCache {
    key: CycleKey,
    observed_only: bool,
    per_station: HashMap<String, FieldValues>,
    network_same_hour: Option<FieldValues>,
    network_recent: Option<FieldValues>,
}

impl HistoryCache {
    pub fn new(key: CycleKey, input: HistoryInput) -> Self {
        HistoryCache {
            key,
            observed_only: input == HistoryInput::Observed,
            per_station: HashMap::new(),
            network_same_hour: None,
            network_recent: None,
        }
    }

    fn station_same_hour<S: Store + ?Sized>(&mut self, store: &S, station_id: &str) -> &FieldValues {
        let (key, observed_only) = (self.key, self.observed_only);
        self.per_station.entry(station_id.to_string()).or_insert_with(|| {
            lookup_all(store, |field| HistoryQuery {
                field,
                station_id: Some(station_id.to_string()),
                hour_of_day: Some(key.hour()),
                window_days: SAME_HOUR_WINDOW_DAYS,
                as_of: key.date,
                observed_only,
            })
        })
    }

    fn network_same_hour<S: Store + ?Sized>(&mut self, store: &S) -> &FieldValues {
        let (key, observed_only) = (self.key, self.observed_only);
        self.network_same_hour.get_or_insert_with(|| {
            lookup_all(store, |field| HistoryQuery {
                field,
                station_id: None,
                hour_of_day: Some(key.hour()),
                window_days: SAME_HOUR_WINDOW_DAYS,
                as_of: key.date,
                observed_only,
            })
        })
    }

    fn network_recent<S: Store + ?Sized>(&mut self, store: &S) -> &FieldValues {
        let (key, observed_only) = (self.key, self.observed_only);
        self.network_recent.get_or_insert_with(|| {
            lookup_all(store, |field| HistoryQuery {
                field,
                station_id: None,
                hour_of_day: None,
                window_days: ALL_HOURS_WINDOW_DAYS,
                as_of: key.date,
                observed_only,
            })
        })
    }
}

fn lookup_all<S, F>(store: &S, make_query: F) -> FieldValues
where
    S: Store + ?Sized,
    F: Fn(Field) -> HistoryQuery,
{
    let mut out = EMPTY_VALUES;
    for field in Field::ALL {
        let query = make_query(field);
        out[field.index()] = match store.historical_average(&query) {
            Ok(v) => v.filter(|x| x.is_finite()),
            Err(e) => {
                warn!(
                    "Imputation: historical average for {} (station={}, hour={:?}, {}d) failed: {}",
                    field,
                    query.station_id.as_deref().unwrap_or("*"),
                    query.hour_of_day,
                    query.window_days,
                    e
                );
                None
            }
        };
    }
    out
}

/// How many values each tier filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImputationSummary {
    pub filled: [usize; 5],
}

impl ImputationSummary {
    pub fn total(&self) -> usize {
        self.filled.iter().sum()
    }

    pub fn count(&self, tier: Tier) -> usize {
        self.filled[tier as usize]
    }
}

/// Per-field mean over the batch as fetched (nulls excluded).
pub fn batch_means(batch: &[RawReading]) -> FieldValues {
    let mut sums = [0.0; FIELD_COUNT];
    let mut counts = [0usize; FIELD_COUNT];
    for reading in batch {
        for (i, v) in reading.values.iter().enumerate() {
            if let Some(x) = v {
                sums[i] += x;
                counts[i] += 1;
            }
        }
    }
    let mut out = EMPTY_VALUES;
    for i in 0..FIELD_COUNT {
        if counts[i] > 0 {
            out[i] = Some(sums[i] / counts[i] as f64);
        }
    }
    out
}

/// Replace every null in `batch`, marking filled slots in each reading's
/// `imputed_mask`. Never fails: missing history degrades to [`HARD_DEFAULT`].
pub fn impute_batch<S: Store + ?Sized>(batch: &mut [RawReading], store: &S, cache: &mut HistoryCache) -> ImputationSummary {
    let means = batch_means(batch);
    let mut summary = ImputationSummary::default();

    for reading in batch.iter_mut() {
        if reading.null_count() == 0 {
            continue;
        }
        for field in Field::ALL {
            let i = field.index();
            if reading.values[i].is_some() {
                continue;
            }

            let (value, tier) = if let Some(v) = means[i] {
                (v, Tier::BatchMean)
            } else if let Some(v) = cache.station_same_hour(store, &reading.station_id)[i] {
                (v, Tier::StationSameHour)
            } else if let Some(v) = cache.network_same_hour(store)[i] {
                (v, Tier::NetworkSameHour)
            } else if let Some(v) = cache.network_recent(store)[i] {
                (v, Tier::NetworkRecent)
            } else {
                (HARD_DEFAULT, Tier::HardDefault)
            };

            reading.values[i] = Some(value);
            reading.imputed_mask |= field.mask_bit();
            summary.filled[tier as usize] += 1;
            debug!(
                "Imputation: {} {} <- {:.3} ({:?})",
                reading.station_id, field, value, tier
            );
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coord;
    use crate::store::memory::MemoryStore;
    use chrono::{NaiveDate, NaiveTime};

    fn key(day: u32, hour: u32) -> CycleKey {
        CycleKey::new(
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        )
    }

    fn reading(station: &str, values: FieldValues) -> RawReading {
        RawReading {
            station_id: station.to_string(),
            target: Coord::new(0.0, 0.0),
            source: Some(Coord::new(0.0, 0.0)),
            values,
            imputed_mask: 0,
        }
    }

    fn with(field: Field, v: f64) -> FieldValues {
        let mut values = EMPTY_VALUES;
        values[field.index()] = Some(v);
        values
    }

    #[test]
    fn batch_mean_takes_precedence_over_history() {
        let store = MemoryStore::new();
        // history for A says 500 at the same hour; batch mean must still win
        store.seed(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), NaiveTime::from_hms_opt(8, 0, 0).unwrap(), "A", with(Field::Pm25, 500.0));

        let mut batch = vec![
            reading("A", EMPTY_VALUES),
            reading("B", with(Field::Pm25, 10.0)),
            reading("C", with(Field::Pm25, 30.0)),
        ];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::All);
        let summary = impute_batch(&mut batch, &store, &mut cache);

        assert_eq!(batch[0].values[Field::Pm25.index()], Some(20.0));
        assert_eq!(batch[0].imputed_mask & Field::Pm25.mask_bit(), Field::Pm25.mask_bit());
        assert_eq!(batch[1].imputed_mask & Field::Pm25.mask_bit(), 0);
        assert!(summary.count(Tier::BatchMean) >= 1);
    }

    #[test]
    fn falls_through_tiers_in_order() {
        let store = MemoryStore::new();
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let at = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();

        // pm25: station A has same-hour history
        store.seed(d(5), at(8), "A", with(Field::Pm25, 40.0));
        store.seed(d(6), at(8), "A", with(Field::Pm25, 60.0));
        // no2: only another station at the same hour
        store.seed(d(6), at(8), "Z", with(Field::No2, 7.0));
        // o3: only other hours, within 30 days but outside 14
        store.seed(d(1) - chrono::Days::new(10), at(15), "Z", with(Field::O3, 90.0));
        // so2: same hour but older than 30 days, so ignored entirely
        store.seed(d(1) - chrono::Days::new(40), at(8), "A", with(Field::So2, 3.0));

        let mut batch = vec![reading("A", EMPTY_VALUES)];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::All);
        let summary = impute_batch(&mut batch, &store, &mut cache);
        let v = batch[0].values;

        assert_eq!(v[Field::Pm25.index()], Some(50.0));
        assert_eq!(v[Field::No2.index()], Some(7.0));
        assert_eq!(v[Field::O3.index()], Some(90.0));
        assert_eq!(v[Field::So2.index()], Some(HARD_DEFAULT));
        assert_eq!(batch[0].imputed_mask, (1 << FIELD_COUNT) - 1);
        assert_eq!(batch[0].null_count(), 0);

        assert_eq!(summary.count(Tier::BatchMean), 0);
        assert_eq!(summary.count(Tier::StationSameHour), 1);
        assert_eq!(summary.count(Tier::NetworkSameHour), 1);
        assert_eq!(summary.count(Tier::NetworkRecent), 1);
        assert_eq!(summary.count(Tier::HardDefault), FIELD_COUNT - 3);
        assert_eq!(summary.total(), FIELD_COUNT);
    }

    fn store_with_imputed_co() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), NaiveTime::from_hms_opt(8, 0, 0).unwrap(), "A", with(Field::Co, 1.0));
        store.rows.borrow_mut()[0].imputed_mask = Field::Co.mask_bit();
        store
    }

    #[test]
    fn imputed_history_is_averaged_by_default() {
        let store = store_with_imputed_co();
        let mut batch = vec![reading("A", EMPTY_VALUES)];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::default());
        let summary = impute_batch(&mut batch, &store, &mut cache);
        assert_eq!(batch[0].values[Field::Co.index()], Some(1.0));
        assert_eq!(summary.count(Tier::StationSameHour), 1);
        assert!(store.history_queries.borrow().iter().all(|q| !q.observed_only));
    }

    #[test]
    fn observed_history_skips_imputed_values() {
        let store = store_with_imputed_co();
        let mut batch = vec![reading("A", EMPTY_VALUES)];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::Observed);
        impute_batch(&mut batch, &store, &mut cache);
        assert_eq!(batch[0].values[Field::Co.index()], Some(HARD_DEFAULT));
        assert!(store.history_queries.borrow().iter().all(|q| q.observed_only));
    }

    #[test]
    fn history_input_from_str() {
        assert_eq!("all".parse::<HistoryInput>(), Ok(HistoryInput::All));
        assert_eq!(" Observed ".parse::<HistoryInput>(), Ok(HistoryInput::Observed));
        assert!("imputed".parse::<HistoryInput>().is_err());
    }

    #[test]
    fn station_history_is_queried_once_per_station() {
        let store = MemoryStore::new();
        let mut batch = vec![reading("A", EMPTY_VALUES), reading("B", EMPTY_VALUES)];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::All);
        impute_batch(&mut batch, &store, &mut cache);

        let queries = store.history_queries.borrow();
        let per_station = |s: &str| {
            queries
                .iter()
                .filter(|q| q.station_id.as_deref() == Some(s))
                .count()
        };
        assert_eq!(per_station("A"), FIELD_COUNT);
        assert_eq!(per_station("B"), FIELD_COUNT);
        // network-wide tiers: one lookup per field per cycle
        assert_eq!(queries.len(), 4 * FIELD_COUNT);
    }

    #[test]
    fn fresh_cache_requeries_history_for_next_cycle() {
        let store = MemoryStore::new();
        let d = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        store.seed(d, NaiveTime::from_hms_opt(8, 0, 0).unwrap(), "A", with(Field::Pm10, 11.0));

        let mut first = vec![reading("A", EMPTY_VALUES)];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::All);
        impute_batch(&mut first, &store, &mut cache);
        assert_eq!(first[0].values[Field::Pm10.index()], Some(11.0));
        let after_first = store.history_query_count();

        // new history arrives between cycles
        store.seed(d, NaiveTime::from_hms_opt(13, 0, 0).unwrap(), "A", with(Field::Pm10, 99.0));

        let mut second = vec![reading("A", EMPTY_VALUES)];
        let mut cache = HistoryCache::new(key(10, 13), HistoryInput::All);
        impute_batch(&mut second, &store, &mut cache);
        assert!(store.history_query_count() > after_first);
        assert_eq!(second[0].values[Field::Pm10.index()], Some(99.0));
        assert!(store.history_queries.borrow()[after_first..].iter().all(|q| q.hour_of_day.is_none_or(|h| h == 13)));
    }

    #[test]
    fn history_failures_degrade_to_default() {
        let store = MemoryStore::new();
        store.fail_history.set(true);
        let mut batch = vec![reading("A", EMPTY_VALUES)];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::All);
        let summary = impute_batch(&mut batch, &store, &mut cache);
        assert!(batch[0].values.iter().all(|v| *v == Some(HARD_DEFAULT)));
        assert_eq!(summary.count(Tier::HardDefault), FIELD_COUNT);
    }

    #[test]
    fn complete_batch_is_untouched() {
        let store = MemoryStore::new();
        let full = [Some(1.0); FIELD_COUNT];
        let mut batch = vec![reading("A", full)];
        let mut cache = HistoryCache::new(key(10, 8), HistoryInput::All);
        let summary = impute_batch(&mut batch, &store, &mut cache);
        assert_eq!(summary.total(), 0);
        assert_eq!(batch[0].imputed_mask, 0);
        assert_eq!(store.history_query_count(), 0);
    }
}
