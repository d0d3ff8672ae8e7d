//! Stratified survey evaluation.
//!
//! Stations are enriched with a standardized catch rate, grouped by the
//! stratum they fall in, and turned into area-weighted biomass estimates
//! that are written back onto the stratum table in one edit session.

pub mod aggregate;
pub mod biomass;
pub mod catchability;
pub mod evaluator;
pub mod schema;
pub mod types;
pub mod utility;

pub use evaluator::{CancelFlag, SurveyEvaluator};
pub use types::{EvaluationReport, RunPhase, ScanPass, StationScr, StratumMetrics};
