//! Error and anomaly types for survey evaluation.
//!
//! [`EvalError`] is fatal to a run and guarantees that nothing was committed to
//! the stratum table. [`Anomaly`] is a per-record finding collected while the
//! run keeps going; the full list is returned in the evaluation report.

use serde::Serialize;
use thiserror::Error;

use crate::layer::{FeatureId, FieldType};

/// Failures raised by a layer collaborator (scan, schema or write).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LayerError {
    #[error("field '{0}' does not exist")]
    UnknownField(String),

    #[error("field '{name}' already exists as {existing:?}, requested {requested:?}")]
    FieldTypeConflict {
        name: String,
        existing: FieldType,
        requested: FieldType,
    },

    #[error("feature {0} does not exist")]
    UnknownFeature(FeatureId),

    #[error("value for field '{field}' does not fit type {expected:?}")]
    ValueType { field: String, expected: FieldType },

    #[error("no edit session is open")]
    NoEditSession,

    #[error("an edit session is already open")]
    EditSessionOpen,

    #[error("scan failed: {0}")]
    Scan(String),
}

/// Fatal evaluation errors. None of these leave partial writes behind.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Missing or unusable layer/column binding, detected before any scan.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("layer error: {0}")]
    Layer(#[from] LayerError),

    #[error("writing stratum {stratum} failed: {source}")]
    Write {
        stratum: FeatureId,
        #[source]
        source: LayerError,
    },

    #[error("evaluation cancelled before writing")]
    Cancelled,
}

impl EvalError {
    pub fn configuration(message: impl Into<String>) -> Self {
        EvalError::Configuration(message.into())
    }
}

/// Non-fatal findings collected during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Station references a stratum id with no stratum record.
    OrphanStation { station: FeatureId, stratum_id: i64 },
    /// Station has no stratum id at all.
    MissingStratumId { station: FeatureId },
    /// SCR fell back to 0.
    DegenerateScr { station: FeatureId, reason: String },
    /// Width or areal availability unusable for the biomass stage.
    UnusableEffort { station: FeatureId },
    /// Stratum has no stations; mean, variance and biomass are undefined.
    EmptyStratum { stratum: i64 },
    /// Biomass is zero or undefined, so CV is undefined.
    UndefinedCv { stratum: i64 },
    /// Stratum area missing, zero or not finite.
    InvalidArea { stratum: i64 },
}

impl Anomaly {
    /// True for the data-integrity class (stations that could not be
    /// attached to a stratum).
    pub fn is_data_integrity(&self) -> bool {
        matches!(
            self,
            Anomaly::OrphanStation { .. } | Anomaly::MissingStratumId { .. }
        )
    }
}
