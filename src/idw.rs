//! Inverse-distance-weighted spatial estimation.

use crate::fields::{EMPTY_VALUES, Field};
use crate::geo::{self, Coord, DistanceMetric};
use crate::models::pollution::{InterpolatedUpdate, StationRow, TargetRow};
use log::debug;
use std::num::NonZeroUsize;
use std::str::FromStr;

pub const DEFAULT_K_NEAREST: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdwParams {
    pub power: f64,
    /// Keep only this many nearest contributors; `None` uses all of them.
    pub k_nearest: Option<NonZeroUsize>,
    pub eps: f64,
}

impl Default for IdwParams {
    fn default() -> Self {
        IdwParams {
            power: geo::DEFAULT_POWER,
            k_nearest: NonZeroUsize::new(DEFAULT_K_NEAREST),
            eps: geo::DEFAULT_EPS_KM,
        }
    }
}

/// Which persisted values count as contributing sensor data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum InterpolationInput {
    /// Observed values only; slots filled by imputation are skipped.
    #[default]
    Raw,
    /// Everything persisted, imputed values included.
    Imputed,
}

impl FromStr for InterpolationInput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(InterpolationInput::Raw),
            "imputed" => Ok(InterpolationInput::Imputed),
            other => Err(format!("unknown interpolation input '{}' (expected raw|imputed)", other)),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Sample {
    pub coord: Coord,
    pub value: f64,
}

/// Estimate the value at `target` from `samples`.
///
/// Returns `None` without contributors. Co-located samples short-circuit to
/// their plain mean; otherwise the `k` nearest (ties by input order) are
/// weighted by `1 / max(d, eps)^power`.
pub fn estimate<M: DistanceMetric + ?Sized>(metric: &M, samples: &[Sample], target: Coord, params: &IdwParams) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let coords: Vec<Coord> = samples.iter().map(|s| s.coord).collect();
    let mut scored: Vec<(f64, f64)> = geo::distances_to(metric, &coords, target)
        .into_iter()
        .zip(samples.iter().map(|s| s.value))
        .collect();

    let colocated: Vec<f64> = scored.iter().filter(|(d, _)| geo::is_colocated(*d)).map(|(_, v)| *v).collect();
    if !colocated.is_empty() {
        return Some(colocated.iter().sum::<f64>() / colocated.len() as f64);
    }
    if let [(_, only)] = scored.as_slice() {
        return Some(*only);
    }

    if let Some(k) = params.k_nearest
        && k.get() < scored.len()
    {
        // stable sort keeps input order among equal distances
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        scored.truncate(k.get());
    }

    let (weighted, total) = scored.iter().fold((0.0, 0.0), |(num, den), (d, v)| {
        let w = geo::weight(*d, params.power, params.eps);
        (num + w * v, den + w)
    });
    if total > 0.0 && total.is_finite() {
        Some(weighted / total)
    } else {
        None
    }
}

/// Contributing samples for `field` among this cycle's station rows.
pub fn samples_for(rows: &[StationRow], field: Field, input: InterpolationInput) -> Vec<Sample> {
    let i = field.index();
    rows.iter()
        .filter(|r| input == InterpolationInput::Imputed || r.imputed_mask & field.mask_bit() == 0)
        .filter_map(|r| {
            let coord = r.source.filter(Coord::is_finite)?;
            let value = r.values[i].filter(|v| v.is_finite())?;
            Some(Sample { coord, value })
        })
        .collect()
}

/// Estimate all fields at every target. Output order follows `targets`.
pub fn interpolate_targets<M: DistanceMetric + ?Sized>(
    metric: &M,
    stations: &[StationRow],
    targets: &[TargetRow],
    params: &IdwParams,
    input: InterpolationInput,
) -> Vec<InterpolatedUpdate> {
    let per_field: Vec<Vec<Sample>> = Field::ALL.iter().map(|f| samples_for(stations, *f, input)).collect();

    targets
        .iter()
        .map(|t| {
            let mut values = EMPTY_VALUES;
            for field in Field::ALL {
                values[field.index()] = estimate(metric, &per_field[field.index()], t.coord, params);
            }
            let missing = values.iter().filter(|v| v.is_none()).count();
            if missing > 0 {
                debug!("IDW: {} (row {}) has no estimate for {} field(s)", t.station_id, t.row_id, missing);
            }
            InterpolatedUpdate {
                row_id: t.row_id,
                values,
            }
        })
        .collect()
}
