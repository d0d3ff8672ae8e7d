//! Stage 3: area-weighted biomass, summed variance and CV per stratum.
//!
//! Every contributing station of a stratum adds one term with its own width
//! `w` and areal availability `a`:
//!
//! ```text
//! biomass += mean · area / (w · a)
//! sumvar  += var · area / (w² · a² · count)
//! ```
//!
//! Degenerate stations do not contribute.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::Anomaly;
use crate::evaluation::types::{
    StationRecord, StratumIndex, StratumMetrics, StratumRef, StratumStats,
};

/// Stage 3 output.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimation {
    pub metrics: BTreeMap<i64, StratumMetrics>,
    pub anomalies: Vec<Anomaly>,
}

/// `100 × sqrt(sumvar) / biomass`, undefined unless biomass is positive.
pub fn coefficient_of_variation(sumvar: Option<f64>, biomass: Option<f64>) -> Option<f64> {
    match (sumvar, biomass) {
        (Some(sumvar), Some(biomass)) if biomass > 0.0 && sumvar >= 0.0 => {
            Some(100.0 * sumvar.sqrt() / biomass).filter(|cv| cv.is_finite())
        }
        _ => None,
    }
}

/// Width and areal availability of a station, if both are usable divisors.
/// A missing areal availability means no correction (1.0).
fn usable_effort(station: &StationRecord) -> Option<(f64, f64)> {
    let width = station.width?;
    let areal = station.areal_availability.unwrap_or(1.0);
    let usable = |v: f64| v.is_finite() && v > 0.0;
    (usable(width) && usable(areal)).then_some((width, areal))
}

fn accumulate(stats: &StratumStats, area: f64, efforts: &[(f64, f64)]) -> Option<(f64, f64)> {
    let (mean, var) = (stats.mean_scr?, stats.var_scr?);
    if efforts.is_empty() {
        return None;
    }
    let count = stats.count as f64;
    let mut biomass = 0.0;
    let mut sumvar = 0.0;
    for &(width, areal) in efforts {
        biomass += (mean * area) / (width * areal);
        sumvar += (var * area) / (width.powi(2) * areal.powi(2) * count);
    }
    Some((biomass, sumvar))
}

fn valid_area(stratum: &StratumRef) -> Option<f64> {
    stratum.area.filter(|a| a.is_finite() && *a > 0.0)
}

/// Combines stage 2 statistics with stratum areas and per-station effort.
pub fn estimate_biomass(
    stations: &[StationRecord],
    stats: &BTreeMap<i64, StratumStats>,
    strata: &StratumIndex,
) -> Estimation {
    let mut anomalies = Vec::new();

    // third pass: per-station effort for every contributing station
    let mut efforts: BTreeMap<i64, Vec<(f64, f64)>> = BTreeMap::new();
    for station in stations.iter().filter(|s| !s.degenerate) {
        let Some(stratum_id) = station.stratum_id.filter(|id| stats.contains_key(id)) else {
            continue;
        };
        match usable_effort(station) {
            Some(effort) => efforts.entry(stratum_id).or_default().push(effort),
            None => anomalies.push(Anomaly::UnusableEffort {
                station: station.key,
            }),
        }
    }

    let mut metrics = BTreeMap::new();
    for (&stratum_id, stratum_stats) in stats {
        let Some(stratum) = strata.get(&stratum_id) else {
            continue;
        };

        let area = valid_area(stratum);
        if area.is_none() {
            anomalies.push(Anomaly::InvalidArea {
                stratum: stratum_id,
            });
        }

        let estimate = area.and_then(|area| {
            let efforts = efforts.get(&stratum_id).map(Vec::as_slice).unwrap_or_default();
            accumulate(stratum_stats, area, efforts)
        });
        let biomass = estimate.map(|(biomass, _)| biomass);
        let sumvar = estimate.map(|(_, sumvar)| sumvar);
        let cv = coefficient_of_variation(sumvar, biomass);
        if biomass.is_some() && cv.is_none() {
            anomalies.push(Anomaly::UndefinedCv {
                stratum: stratum_id,
            });
        }

        debug!(stratum_id, ?biomass, ?sumvar, ?cv, "Stratum estimated");
        metrics.insert(
            stratum_id,
            StratumMetrics {
                stratum_id,
                feature: stratum.feature,
                area: stratum.area,
                count: stratum_stats.count,
                sum_scr: stratum_stats.sum_scr,
                mean_scr: stratum_stats.mean_scr,
                var_scr: stratum_stats.var_scr,
                sumvar,
                biomass,
                cv,
            },
        );
    }

    Estimation { metrics, anomalies }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::FeatureId;

    fn station(key: u64, stratum_id: i64, width: f64, areal: Option<f64>) -> StationRecord {
        StationRecord {
            key: FeatureId(key),
            stratum_id: Some(stratum_id),
            catch: None,
            distance: None,
            width: Some(width),
            vertical_availability: None,
            areal_availability: areal,
            scr: 0.0,
            degenerate: false,
        }
    }

    fn single_stratum(
        area: Option<f64>,
        stats: StratumStats,
    ) -> (StratumIndex, BTreeMap<i64, StratumStats>) {
        let strata = StratumIndex::from([(
            1,
            StratumRef {
                feature: FeatureId(1),
                area,
            },
        )]);
        (strata, BTreeMap::from([(1, stats)]))
    }

    fn stats(count: usize, mean: f64, var: f64) -> StratumStats {
        StratumStats {
            count,
            sum_scr: mean * count as f64,
            mean_scr: Some(mean),
            var_scr: Some(var),
        }
    }

    #[test]
    fn test_each_station_adds_one_term() {
        let (strata, stats) = single_stratum(Some(1_000_000.0), stats(2, 750.0, 125_000.0));
        let stations = vec![station(0, 1, 20.0, Some(0.5)), station(1, 1, 20.0, Some(0.5))];

        let result = estimate_biomass(&stations, &stats, &strata);
        let m = &result.metrics[&1];

        let biomass = 2.0 * (750.0 * 1_000_000.0 / (20.0 * 0.5));
        let term = 125_000.0 * 1_000_000.0 / (20.0_f64.powi(2) * 0.5_f64.powi(2) * 2.0);
        let sumvar = 2.0 * term;
        assert!((m.biomass.unwrap() - biomass).abs() < 1e-6);
        assert!((m.sumvar.unwrap() - sumvar).abs() < 1e-6);
        assert!((m.cv.unwrap() - 100.0 * sumvar.sqrt() / biomass).abs() < 1e-9);
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn test_per_station_effort_is_summed() {
        let (strata, stats) = single_stratum(Some(100.0), stats(2, 2.0, 0.0));
        let stations = vec![station(0, 1, 10.0, Some(1.0)), station(1, 1, 20.0, Some(1.0))];

        let m = &estimate_biomass(&stations, &stats, &strata).metrics[&1];

        // 2·100/10 + 2·100/20
        assert_eq!(m.biomass, Some(30.0));
        assert_eq!(m.sumvar, Some(0.0));
        assert_eq!(m.cv, Some(0.0));
    }

    #[test]
    fn test_missing_areal_availability_means_no_correction() {
        let (strata, stats) = single_stratum(Some(100.0), stats(1, 4.0, 0.0));
        let stations = vec![station(0, 1, 10.0, None)];

        let m = &estimate_biomass(&stations, &stats, &strata).metrics[&1];
        assert_eq!(m.biomass, Some(40.0));
    }

    #[test]
    fn test_unusable_effort_is_skipped_and_reported() {
        let (strata, stats) = single_stratum(Some(100.0), stats(2, 4.0, 0.0));
        let stations = vec![station(0, 1, 10.0, Some(1.0)), station(1, 1, 0.0, Some(1.0))];

        let result = estimate_biomass(&stations, &stats, &strata);

        assert_eq!(result.metrics[&1].biomass, Some(40.0));
        assert_eq!(
            result.anomalies,
            vec![Anomaly::UnusableEffort {
                station: FeatureId(1)
            }]
        );
    }

    #[test]
    fn test_degenerate_station_does_not_contribute() {
        let (strata, stats) = single_stratum(Some(100.0), stats(1, 4.0, 0.0));
        let degenerate = StationRecord {
            degenerate: true,
            ..station(1, 1, 10.0, Some(1.0))
        };
        let stations = vec![station(0, 1, 10.0, Some(1.0)), degenerate];

        let result = estimate_biomass(&stations, &stats, &strata);

        assert_eq!(result.metrics[&1].biomass, Some(40.0));
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn test_zero_biomass_leaves_cv_undefined() {
        let (strata, stats) = single_stratum(Some(100.0), stats(2, 0.0, 0.0));
        let stations = vec![station(0, 1, 10.0, Some(1.0)), station(1, 1, 10.0, Some(1.0))];

        let result = estimate_biomass(&stations, &stats, &strata);
        let m = &result.metrics[&1];

        assert_eq!(m.biomass, Some(0.0));
        assert_eq!(m.cv, None);
        assert_eq!(result.anomalies, vec![Anomaly::UndefinedCv { stratum: 1 }]);
    }

    #[test]
    fn test_empty_stratum_is_undefined() {
        let empty = StratumStats {
            count: 0,
            sum_scr: 0.0,
            mean_scr: None,
            var_scr: None,
        };
        let (strata, stats) = single_stratum(Some(100.0), empty);

        let result = estimate_biomass(&[], &stats, &strata);
        let m = &result.metrics[&1];

        assert_eq!(m.count, 0);
        assert_eq!((m.biomass, m.sumvar, m.cv), (None, None, None));
        assert!(result.anomalies.is_empty());
    }

    #[test]
    fn test_invalid_area_is_reported() {
        let (strata, stats) = single_stratum(None, stats(1, 4.0, 0.0));
        let stations = vec![station(0, 1, 10.0, Some(1.0))];

        let result = estimate_biomass(&stations, &stats, &strata);

        assert_eq!(result.metrics[&1].biomass, None);
        assert_eq!(result.anomalies, vec![Anomaly::InvalidArea { stratum: 1 }]);
    }

    #[test]
    fn test_cv_helper() {
        assert_eq!(coefficient_of_variation(Some(4.0), Some(10.0)), Some(20.0));
        assert_eq!(coefficient_of_variation(Some(4.0), Some(0.0)), None);
        assert_eq!(coefficient_of_variation(Some(4.0), Some(-10.0)), None);
        assert_eq!(coefficient_of_variation(None, Some(1.0)), None);
    }
}
