use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::config::SurveyConfig;
use crate::error::EvalError;
use crate::evaluation::aggregate::aggregate_strata;
use crate::evaluation::biomass::estimate_biomass;
use crate::evaluation::catchability::enrich_stations;
use crate::evaluation::schema::{ResultFields, STATION_SCR_FIELD, StationSchema, resolve_strata};
use crate::evaluation::types::{EvaluationReport, RunPhase, ScanPass, StationScr, StratumMetrics};
use crate::layer::{EditSession, FeatureSource, FieldType, FieldValue, ResultWriter, StratumLayer};

/// Shared flag to stop a run before it reaches the writing phase.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one evaluation run from configuration to written results.
///
/// The stratum layer is borrowed mutably for the whole run, so no other
/// evaluation can interleave with it. Results are written in a single edit
/// session that is rolled back on any failure.
pub struct SurveyEvaluator {
    config: SurveyConfig,
    cancel: CancelFlag,
    phase: RunPhase,
}

impl SurveyEvaluator {
    pub fn new(config: SurveyConfig) -> Self {
        Self {
            config,
            cancel: CancelFlag::new(),
            phase: RunPhase::Idle,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &SurveyConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Evaluates every stratum and writes the results into `strata`.
    ///
    /// Configuration problems, layer failures and cancellation abort with
    /// nothing written. Per-record problems are collected in the report's
    /// anomaly list and the remaining strata are still written.
    #[tracing::instrument(
        skip_all,
        fields(sample_layer = stations.name(), strata_layer = strata.name())
    )]
    pub fn evaluate<S, T>(
        &mut self,
        stations: &S,
        strata: &mut T,
    ) -> Result<EvaluationReport, EvalError>
    where
        S: FeatureSource + ?Sized,
        T: StratumLayer + ?Sized,
    {
        self.phase = RunPhase::Idle;
        let result = self.run(stations, strata);
        if let Err(e) = &result {
            warn!(error = %e, "Survey evaluation failed");
            self.phase = RunPhase::Failed;
        }
        result
    }

    fn run<S, T>(&mut self, stations: &S, strata: &mut T) -> Result<EvaluationReport, EvalError>
    where
        S: FeatureSource + ?Sized,
        T: StratumLayer + ?Sized,
    {
        self.config.validate()?;
        if stations.name() != self.config.sample_layer {
            return Err(EvalError::configuration(format!(
                "sample layer '{}' could not be resolved (got '{}')",
                self.config.sample_layer,
                stations.name()
            )));
        }
        let schema = StationSchema::resolve(&self.config, stations)?;
        let strata_index = resolve_strata(&self.config, &*strata)?;
        let vulnerability = self.config.species_vulnerability;

        self.enter(RunPhase::ScanningStations(ScanPass::Scr))?;
        let (enriched, mut anomalies) =
            enrich_stations(stations.scan(schema.columns())?, &schema, vulnerability);

        self.enter(RunPhase::ScanningStations(ScanPass::Variance))?;
        let aggregation = aggregate_strata(&enriched, &strata_index);
        anomalies.extend(aggregation.anomalies);

        self.enter(RunPhase::ScanningStations(ScanPass::Biomass))?;
        let estimation = estimate_biomass(&enriched, &aggregation.stats, &strata_index);
        anomalies.extend(estimation.anomalies);
        let metrics: Vec<StratumMetrics> = estimation.metrics.into_values().collect();

        self.enter(RunPhase::Writing)?;
        write_results(strata, &metrics)?;
        self.phase = RunPhase::Done;

        let report = EvaluationReport {
            evaluated_at: Utc::now(),
            sample_layer: stations.name().to_string(),
            strata_layer: strata.name().to_string(),
            species_vulnerability: vulnerability,
            stations: enriched
                .iter()
                .map(|s| StationScr {
                    station: s.key,
                    stratum_id: s.stratum_id,
                    scr: s.scr,
                })
                .collect(),
            strata: metrics,
            anomalies,
        };

        info!(
            stations = report.stations.len(),
            strata = report.strata.len(),
            anomalies = report.anomalies.len(),
            data_integrity_errors = report.data_integrity_errors().len(),
            "Survey evaluation complete"
        );
        Ok(report)
    }

    fn enter(&mut self, phase: RunPhase) -> Result<(), EvalError> {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        debug!(?phase, "Entering phase");
        self.phase = phase;
        Ok(())
    }

    /// Writes each station's SCR from `report` into an `scr` field of the
    /// station layer, in one edit session. Returns the number of stations
    /// written.
    #[tracing::instrument(skip_all, fields(stations = report.stations.len()))]
    pub fn persist_station_scr<W>(
        &self,
        stations: &mut W,
        report: &EvaluationReport,
    ) -> Result<usize, EvalError>
    where
        W: ResultWriter + ?Sized,
    {
        if self.cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let mut session = EditSession::begin(stations)?;
        let scr = session.ensure_field(STATION_SCR_FIELD, FieldType::Real)?;
        for station in &report.stations {
            session
                .write_fields(station.station, &[(scr, FieldValue::Real(station.scr))])
                .map_err(EvalError::Layer)?;
        }
        session.commit()?;
        Ok(report.stations.len())
    }
}

fn write_results<T: ResultWriter + ?Sized>(
    strata: &mut T,
    metrics: &[StratumMetrics],
) -> Result<(), EvalError> {
    let mut session = EditSession::begin(strata)?;
    let fields = ResultFields::ensure(&mut *session)?;
    for m in metrics {
        session
            .write_fields(m.feature, &fields.values(m))
            .map_err(|source| EvalError::Write {
                stratum: m.feature,
                source,
            })?;
    }
    session.commit()?;
    debug!(strata = metrics.len(), "Results committed");
    Ok(())
}
