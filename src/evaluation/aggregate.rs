//! Stage 2: per-stratum count, sum, mean and sample variance of SCR.

use std::collections::BTreeMap;
use tracing::warn;

use crate::error::Anomaly;
use crate::evaluation::types::{StationRecord, StratumIndex, StratumStats};
use crate::evaluation::utility::{mean, sample_variance};

/// Stage 2 output: statistics for every stratum in the index, plus the
/// stations that could not be attached to one.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub stats: BTreeMap<i64, StratumStats>,
    pub anomalies: Vec<Anomaly>,
}

impl StratumStats {
    /// Two passes over one stratum's SCR values: sum and mean first, then the
    /// squared deviations.
    pub fn from_samples(scrs: &[f64]) -> Self {
        let mean_scr = mean(scrs);
        StratumStats {
            count: scrs.len(),
            sum_scr: scrs.iter().sum(),
            mean_scr,
            var_scr: mean_scr.map(|m| sample_variance(scrs, m)),
        }
    }
}

/// Groups stations by stratum id and summarizes each group.
///
/// Every stratum of `strata` appears in the result, including empty ones.
/// Degenerate stations are still checked against the strata but add no
/// sample, so `count` is the number of stations with a trusted SCR.
/// Output order follows stratum id and each group keeps scan order, so the
/// result does not depend on how the stations were ordered across strata.
pub fn aggregate_strata(stations: &[StationRecord], strata: &StratumIndex) -> Aggregation {
    let mut anomalies = Vec::new();
    let mut members: BTreeMap<i64, Vec<f64>> = strata.keys().map(|&id| (id, Vec::new())).collect();

    for station in stations {
        let Some(stratum_id) = station.stratum_id else {
            warn!(station = %station.key, "Station has no stratum id");
            anomalies.push(Anomaly::MissingStratumId {
                station: station.key,
            });
            continue;
        };
        match members.get_mut(&stratum_id) {
            Some(_) if station.degenerate => {}
            Some(scrs) => scrs.push(station.scr),
            None => {
                warn!(station = %station.key, stratum_id, "Station references unknown stratum");
                anomalies.push(Anomaly::OrphanStation {
                    station: station.key,
                    stratum_id,
                });
            }
        }
    }

    let stats = members
        .into_iter()
        .map(|(stratum_id, scrs)| {
            if scrs.is_empty() {
                anomalies.push(Anomaly::EmptyStratum {
                    stratum: stratum_id,
                });
            }
            (stratum_id, StratumStats::from_samples(&scrs))
        })
        .collect();

    Aggregation { stats, anomalies }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::types::StratumRef;
    use crate::layer::FeatureId;

    fn station(key: u64, stratum_id: Option<i64>, scr: f64) -> StationRecord {
        StationRecord {
            key: FeatureId(key),
            stratum_id,
            catch: None,
            distance: None,
            width: Some(20.0),
            vertical_availability: None,
            areal_availability: Some(1.0),
            scr,
            degenerate: false,
        }
    }

    fn index(ids: &[i64]) -> StratumIndex {
        ids.iter()
            .map(|&id| {
                (
                    id,
                    StratumRef {
                        feature: FeatureId(id as u64),
                        area: Some(1.0),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_single_station_has_zero_variance() {
        let result = aggregate_strata(&[station(0, Some(1), 3.5)], &index(&[1]));
        let stats = result.stats[&1];

        assert_eq!(stats.count, 1);
        assert_eq!(stats.mean_scr, Some(3.5));
        assert_eq!(stats.var_scr, Some(0.0));
    }

    #[test]
    fn test_identical_scr_has_zero_variance() {
        let stations: Vec<_> = (0..5).map(|k| station(k, Some(1), 0.7)).collect();
        let stats = aggregate_strata(&stations, &index(&[1])).stats[&1];

        assert_eq!(stats.count, 5);
        assert_eq!(stats.var_scr, Some(0.0));
    }

    #[test]
    fn test_mean_times_count_is_sum() {
        let stations = vec![
            station(0, Some(1), 1.25),
            station(1, Some(1), 7.5),
            station(2, Some(1), 0.3),
            station(3, Some(2), 4.0),
        ];
        let result = aggregate_strata(&stations, &index(&[1, 2]));

        for stats in result.stats.values() {
            let mean = stats.mean_scr.unwrap();
            assert!((mean * stats.count as f64 - stats.sum_scr).abs() < 1e-9);
        }
    }

    #[test]
    fn test_two_station_variance() {
        let stations = vec![station(0, Some(1), 500.0), station(1, Some(1), 1000.0)];
        let stats = aggregate_strata(&stations, &index(&[1])).stats[&1];

        assert_eq!(stats.mean_scr, Some(750.0));
        assert_eq!(stats.var_scr, Some(125_000.0));
    }

    #[test]
    fn test_empty_stratum_is_kept_and_flagged() {
        let result = aggregate_strata(&[station(0, Some(1), 2.0)], &index(&[1, 2]));
        let empty = result.stats[&2];

        assert_eq!(empty.count, 0);
        assert_eq!(empty.sum_scr, 0.0);
        assert_eq!(empty.mean_scr, None);
        assert_eq!(empty.var_scr, None);
        assert_eq!(result.anomalies, vec![Anomaly::EmptyStratum { stratum: 2 }]);
    }

    #[test]
    fn test_orphans_and_missing_ids_are_reported() {
        let stations = vec![
            station(0, Some(1), 2.0),
            station(1, Some(9), 2.0),
            station(2, None, 2.0),
        ];
        let result = aggregate_strata(&stations, &index(&[1]));

        assert_eq!(result.stats[&1].count, 1);
        assert_eq!(
            result.anomalies,
            vec![
                Anomaly::OrphanStation {
                    station: FeatureId(1),
                    stratum_id: 9
                },
                Anomaly::MissingStratumId {
                    station: FeatureId(2)
                },
            ]
        );
    }

    #[test]
    fn test_degenerate_station_adds_no_sample() {
        let degenerate = StationRecord {
            degenerate: true,
            ..station(1, Some(1), 0.0)
        };
        let stations = vec![station(0, Some(1), 500.0), degenerate];
        let stats = aggregate_strata(&stations, &index(&[1])).stats[&1];

        assert_eq!(stats.count, 1);
        assert_eq!(stats.sum_scr, 500.0);
        assert_eq!(stats.mean_scr, Some(500.0));
        assert_eq!(stats.var_scr, Some(0.0));
    }

    #[test]
    fn test_degenerate_orphan_is_still_reported() {
        let orphan = StationRecord {
            degenerate: true,
            ..station(0, Some(9), 0.0)
        };
        let result = aggregate_strata(&[orphan], &index(&[1]));

        assert!(result.anomalies.contains(&Anomaly::OrphanStation {
            station: FeatureId(0),
            stratum_id: 9
        }));
    }

    #[test]
    fn test_interleaved_order_gives_same_stats() {
        let grouped = vec![
            station(0, Some(1), 1.0),
            station(1, Some(1), 2.0),
            station(2, Some(2), 3.0),
            station(3, Some(2), 5.0),
        ];
        let interleaved = vec![
            grouped[2].clone(),
            grouped[0].clone(),
            grouped[3].clone(),
            grouped[1].clone(),
        ];

        assert_eq!(
            aggregate_strata(&grouped, &index(&[1, 2])).stats,
            aggregate_strata(&interleaved, &index(&[1, 2])).stats
        );
    }
}
