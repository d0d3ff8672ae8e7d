//! Stage 1: standardized catch rate (SCR) per station.

use tracing::debug;

use crate::error::Anomaly;
use crate::evaluation::schema::StationSchema;
use crate::evaluation::types::StationRecord;
use crate::layer::Feature;

/// `catch / (distance × width / 1000 × species_vulnerability × vertical_availability)`.
///
/// Falls back to 0 when an input is negative, the denominator is exactly 0 or
/// the quotient is not finite, so the result is never negative, NaN or
/// infinite.
pub fn standardized_catch_rate(
    catch: f64,
    distance: f64,
    width: f64,
    species_vulnerability: f64,
    vertical_availability: f64,
) -> f64 {
    try_scr(
        catch,
        distance,
        width,
        species_vulnerability,
        vertical_availability,
    )
    .unwrap_or(0.0)
}

fn try_scr(
    catch: f64,
    distance: f64,
    width: f64,
    species_vulnerability: f64,
    vertical_availability: f64,
) -> Result<f64, &'static str> {
    let inputs = [
        catch,
        distance,
        width,
        species_vulnerability,
        vertical_availability,
    ];
    if inputs.iter().any(|v| *v < 0.0) {
        return Err("negative measurement");
    }
    let denominator =
        distance * width / 1000.0 * species_vulnerability * vertical_availability;
    if denominator == 0.0 {
        return Err("zero effort denominator");
    }
    let scr = catch / denominator;
    if !scr.is_finite() {
        return Err("non-finite catch rate");
    }
    Ok(scr)
}

fn station_scr(record: &StationRecord, species_vulnerability: f64) -> Result<f64, &'static str> {
    let (Some(catch), Some(distance), Some(width), Some(vertical_availability)) = (
        record.catch,
        record.distance,
        record.width,
        record.vertical_availability,
    ) else {
        return Err("missing measurement");
    };
    try_scr(
        catch,
        distance,
        width,
        species_vulnerability,
        vertical_availability,
    )
}

/// Turns scanned station features into records carrying their SCR.
///
/// Stations whose SCR fell back to 0 keep that 0, are marked degenerate and
/// are reported.
pub fn enrich_stations(
    features: impl Iterator<Item = Feature>,
    schema: &StationSchema,
    species_vulnerability: f64,
) -> (Vec<StationRecord>, Vec<Anomaly>) {
    let mut anomalies = Vec::new();
    let stations: Vec<StationRecord> = features
        .map(|feature| {
            let mut record = schema.record(feature);
            record.scr = station_scr(&record, species_vulnerability).unwrap_or_else(|reason| {
                debug!(station = %record.key, reason, "SCR fell back to 0");
                record.degenerate = true;
                anomalies.push(Anomaly::DegenerateScr {
                    station: record.key,
                    reason: reason.to_string(),
                });
                0.0
            });
            record
        })
        .collect();

    (stations, anomalies)
}
