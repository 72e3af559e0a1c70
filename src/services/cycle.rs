//! One fetch → impute → persist → interpolate cycle.

use crate::geo::MetricKind;
use crate::idw::{self, IdwParams, InterpolationInput};
use crate::imputation::{self, HistoryCache, HistoryInput, Tier};
use crate::models::pollution::{CycleKey, SensorLocation};
use crate::services::ingest::{self, SensorSource};
use crate::store::{Store, StoreError};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Imputing,
    PersistingRaw,
    Interpolating,
    PersistingInterp,
}

#[derive(Debug)]
pub enum CycleError {
    Storage { phase: CyclePhase, source: StoreError },
}

impl Display for CycleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CycleError::Storage { phase, source } => write!(f, "storage failure while {:?}: {}", phase, source),
        }
    }
}

impl Error for CycleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CycleError::Storage { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub idw: IdwParams,
    pub metric: MetricKind,
    pub input: InterpolationInput,
    pub history: HistoryInput,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            idw: IdwParams::default(),
            metric: MetricKind::Haversine,
            input: InterpolationInput::Raw,
            history: HistoryInput::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub key: CycleKey,
    pub phases: Vec<CyclePhase>,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub imputed: usize,
    pub inserted: usize,
    pub interpolated: usize,
}

impl CycleReport {
    fn new(key: CycleKey) -> Self {
        CycleReport {
            key,
            phases: vec![CyclePhase::Idle],
            fetched: 0,
            fetch_failures: 0,
            imputed: 0,
            inserted: 0,
            interpolated: 0,
        }
    }

    fn enter(&mut self, phase: CyclePhase) {
        let from = self.phases.last().copied().unwrap_or(CyclePhase::Idle);
        debug!("Cycle {}: {:?} -> {:?}", self.key, from, phase);
        self.phases.push(phase);
    }
}

pub struct Pipeline<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    store: &'a D,
    locations: &'a [SensorLocation],
    settings: PipelineSettings,
}

impl<'a, S, D> Pipeline<'a, S, D>
where
    S: SensorSource + ?Sized,
    D: Store + ?Sized,
{
    pub fn new(source: &'a S, store: &'a D, locations: &'a [SensorLocation], settings: PipelineSettings) -> Self {
        Pipeline {
            source,
            store,
            locations,
            settings,
        }
    }

    /// Run one complete cycle for `key`. Upstream failures are absorbed; storage
    /// failures abort the cycle.
    pub fn run_cycle(&self, key: CycleKey) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::new(key);
        info!("Cycle {}: starting for {} location(s)", key, self.locations.len());

        report.enter(CyclePhase::Fetching);
        let fetched = ingest::fetch_batch(self.source, self.locations);
        report.fetched = fetched.readings.len();
        report.fetch_failures = fetched.failures;
        let mut readings = fetched.readings;

        report.enter(CyclePhase::Imputing);
        let mut cache = HistoryCache::new(key, self.settings.history);
        let summary = imputation::impute_batch(&mut readings, self.store, &mut cache);
        drop(cache);
        report.imputed = summary.total();
        if summary.total() > 0 {
            info!(
                "Cycle {}: imputed {} value(s) (batch={}, station-hour={}, network-hour={}, network-30d={}, default={})",
                key,
                summary.total(),
                summary.count(Tier::BatchMean),
                summary.count(Tier::StationSameHour),
                summary.count(Tier::NetworkSameHour),
                summary.count(Tier::NetworkRecent),
                summary.count(Tier::HardDefault)
            );
        }

        report.enter(CyclePhase::PersistingRaw);
        report.inserted = self
            .store
            .insert_raw_batch(&key, &readings)
            .map_err(|source| CycleError::Storage {
                phase: CyclePhase::PersistingRaw,
                source,
            })?;
        if report.inserted < readings.len() {
            warn!(
                "Cycle {}: {} of {} row(s) already existed and were skipped",
                key,
                readings.len() - report.inserted,
                readings.len()
            );
        }

        self.interpolate_into(&mut report)?;

        report.enter(CyclePhase::Idle);
        info!(
            "Cycle {}: complete (fetched={}, failed={}, imputed={}, inserted={}, interpolated={})",
            key, report.fetched, report.fetch_failures, report.imputed, report.inserted, report.interpolated
        );
        Ok(report)
    }

    /// Recompute and persist interpolated fields for an already persisted cycle.
    pub fn interpolate(&self, key: CycleKey) -> Result<usize, CycleError> {
        let mut report = CycleReport::new(key);
        self.interpolate_into(&mut report)?;
        Ok(report.interpolated)
    }

    fn interpolate_into(&self, report: &mut CycleReport) -> Result<(), CycleError> {
        let key = report.key;
        report.enter(CyclePhase::Interpolating);
        let storage = |source| CycleError::Storage {
            phase: CyclePhase::Interpolating,
            source,
        };
        let stations = self.store.read_cycle_rows(&key).map_err(storage)?;
        let targets = self.store.read_targets(&key).map_err(storage)?;
        for s in stations.iter().filter(|s| s.source.is_none()) {
            debug!("Cycle {}: station {} has no source coordinates", key, s.station_id);
        }
        if stations.iter().all(|s| s.source.is_none()) {
            warn!("Cycle {}: no station rows with source coordinates; skipping interpolation", key);
            return Ok(());
        }
        if targets.is_empty() {
            warn!("Cycle {}: no target coordinates; skipping interpolation", key);
            return Ok(());
        }

        let s = &self.settings;
        let updates = idw::interpolate_targets(&s.metric, &stations, &targets, &s.idw, s.input);

        report.enter(CyclePhase::PersistingInterp);
        report.interpolated = self
            .store
            .update_interpolated(&updates)
            .map_err(|source| CycleError::Storage {
                phase: CyclePhase::PersistingInterp,
                source,
            })?;
        debug!(
            "Cycle {}: interpolated {} target(s) from {} station row(s)",
            key,
            report.interpolated,
            stations.len()
        );
        Ok(())
    }
}
