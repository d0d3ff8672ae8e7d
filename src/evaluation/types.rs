//! Data types flowing through the evaluation pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::Anomaly;
use crate::layer::FeatureId;

/// A station with its bound measurements, resolved once from the scan.
/// `scr` is 0 until stage 1 fills it in. A `degenerate` station keeps the
/// fallback SCR of 0 but contributes nothing to its stratum's statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub key: FeatureId,
    pub stratum_id: Option<i64>,
    pub catch: Option<f64>,
    pub distance: Option<f64>,
    pub width: Option<f64>,
    pub vertical_availability: Option<f64>,
    pub areal_availability: Option<f64>,
    pub scr: f64,
    pub degenerate: bool,
}

/// Where a stratum lives in its table and how large it is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StratumRef {
    pub feature: FeatureId,
    pub area: Option<f64>,
}

/// Strata by the id stations refer to.
pub type StratumIndex = BTreeMap<i64, StratumRef>;

/// Stage 2 output for one stratum. `None` marks an undefined statistic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StratumStats {
    pub count: usize,
    pub sum_scr: f64,
    pub mean_scr: Option<f64>,
    pub var_scr: Option<f64>,
}

/// Final per-stratum result, as written to the stratum table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumMetrics {
    pub stratum_id: i64,
    pub feature: FeatureId,
    pub area: Option<f64>,
    pub count: usize,
    pub sum_scr: f64,
    pub mean_scr: Option<f64>,
    pub var_scr: Option<f64>,
    pub sumvar: Option<f64>,
    pub biomass: Option<f64>,
    pub cv: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationScr {
    pub station: FeatureId,
    pub stratum_id: Option<i64>,
    pub scr: f64,
}

/// Which logical pass over the stations a run is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPass {
    Scr,
    Variance,
    Biomass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    ScanningStations(ScanPass),
    Writing,
    Done,
    Failed,
}

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub evaluated_at: DateTime<Utc>,
    pub sample_layer: String,
    pub strata_layer: String,
    pub species_vulnerability: f64,
    pub stations: Vec<StationScr>,
    pub strata: Vec<StratumMetrics>,
    pub anomalies: Vec<Anomaly>,
}

impl EvaluationReport {
    pub fn stratum(&self, stratum_id: i64) -> Option<&StratumMetrics> {
        self.strata.iter().find(|m| m.stratum_id == stratum_id)
    }

    /// Stations that could not be attached to a stratum.
    pub fn data_integrity_errors(&self) -> Vec<&Anomaly> {
        self.anomalies
            .iter()
            .filter(|a| a.is_data_integrity())
            .collect()
    }

    /// True when every station was attached to a stratum.
    pub fn is_complete(&self) -> bool {
        self.data_integrity_errors().is_empty()
    }
}
