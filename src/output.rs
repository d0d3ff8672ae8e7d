//! Output formatting and persistence for evaluation results.
//!
//! Supports pretty-printing, a JSON run report, and a CSV table of
//! per-stratum metrics.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

use crate::evaluation::{EvaluationReport, StratumMetrics};

/// Logs the report using Rust's debug pretty-print format.
pub fn print_pretty(report: &EvaluationReport) {
    debug!("{:#?}", report);
}

/// Logs the report as pretty-printed JSON.
pub fn print_json(report: &EvaluationReport) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Writes the full report as pretty-printed JSON, replacing any existing file.
pub fn write_report_json(path: impl AsRef<Path>, report: &EvaluationReport) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("failed to create report file: {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)?;
    debug!(path = %path.display(), "Report written");
    Ok(())
}

/// Writes one CSV row per stratum. Undefined metrics are left empty.
pub fn write_metrics_csv(path: impl AsRef<Path>, metrics: &[StratumMetrics]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to create metrics file: {}", path.display()))?;

    for m in metrics {
        writer.serialize(m)?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = metrics.len(), "Metrics written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::FeatureId;
    use chrono::Utc;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn metrics(stratum_id: i64, count: usize) -> StratumMetrics {
        let defined = (count > 0).then_some(1.5);
        StratumMetrics {
            stratum_id,
            feature: FeatureId(stratum_id as u64),
            area: Some(100.0),
            count,
            sum_scr: 1.5 * count as f64,
            mean_scr: defined,
            var_scr: defined,
            sumvar: defined,
            biomass: defined,
            cv: defined,
        }
    }

    fn report() -> EvaluationReport {
        EvaluationReport {
            evaluated_at: Utc::now(),
            sample_layer: "stations".into(),
            strata_layer: "strata".into(),
            species_vulnerability: 1.0,
            stations: vec![],
            strata: vec![metrics(0, 2), metrics(1, 0)],
            anomalies: vec![],
        }
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&report());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&report()).unwrap();
    }

    #[test]
    fn test_write_report_json() {
        let path = temp_path("survey_eval_test_report.json");
        let _ = fs::remove_file(&path);

        write_report_json(&path, &report()).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["sample_layer"], "stations");
        assert_eq!(parsed["strata"].as_array().unwrap().len(), 2);
        assert!(parsed["strata"][1]["biomass"].is_null());

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_write_metrics_csv_one_row_per_stratum() {
        let path = temp_path("survey_eval_test_metrics.csv");
        let _ = fs::remove_file(&path);

        write_metrics_csv(&path, &report().strata).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("stratum_id,feature,area,count"));
        // empty stratum: undefined metrics are blank
        assert!(lines[2].ends_with(",,,,,"));

        fs::remove_file(&path).unwrap();
    }
}
