//! Run configuration for one survey evaluation.
//!
//! Stored as a plain JSON object on disk:
//! ```json
//! {
//!   "sample_layer": "stations",
//!   "stratum_id_column": "stratum",
//!   "catch_column": "catch",
//!   "distance_column": "dist",
//!   "width_column": "width",
//!   "vertical_availability_column": "vavail",
//!   "areal_availability_column": "aavail",
//!   "species_vulnerability": 0.8
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Name of the station layer the bindings refer to.
    pub sample_layer: String,
    pub stratum_id_column: String,
    pub catch_column: String,
    pub distance_column: String,
    pub width_column: String,
    pub vertical_availability_column: String,
    pub areal_availability_column: String,
    pub species_vulnerability: f64,
    /// Stratum attribute holding the id stations refer to. When unset, the
    /// stratum feature id is used.
    pub stratum_key_column: Option<String>,
    /// Also persist each station's SCR into an `scr` field of the station layer.
    pub write_station_scr: bool,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            sample_layer: String::new(),
            stratum_id_column: String::new(),
            catch_column: String::new(),
            distance_column: String::new(),
            width_column: String::new(),
            vertical_availability_column: String::new(),
            areal_availability_column: String::new(),
            species_vulnerability: 1.0,
            stratum_key_column: None,
            write_station_scr: false,
        }
    }
}

impl SurveyConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read survey config '{path}'"))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse survey config '{path}'"))?;
        Ok(config)
    }

    /// Column bindings in the order the station schema resolves them,
    /// paired with the role each column plays.
    pub fn bindings(&self) -> [(&'static str, &str); 6] {
        [
            ("stratum id", self.stratum_id_column.as_str()),
            ("catch", self.catch_column.as_str()),
            ("distance", self.distance_column.as_str()),
            ("width", self.width_column.as_str()),
            ("vertical availability", self.vertical_availability_column.as_str()),
            ("areal availability", self.areal_availability_column.as_str()),
        ]
    }

    /// Checks that every required binding is present and the vulnerability
    /// is usable. Column existence is checked later against the layer.
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.sample_layer.trim().is_empty() {
            return Err(EvalError::configuration("no sample layer configured"));
        }

        for (role, column) in self.bindings() {
            if column.trim().is_empty() {
                return Err(EvalError::configuration(format!(
                    "no column bound for {role}"
                )));
            }
        }

        if matches!(&self.stratum_key_column, Some(c) if c.trim().is_empty()) {
            return Err(EvalError::configuration("stratum key column is empty"));
        }

        let v = self.species_vulnerability;
        if !v.is_finite() || v < 0.0 {
            return Err(EvalError::configuration(format!(
                "species vulnerability must be a non-negative number, got {v}"
            )));
        }
        if v == 0.0 {
            warn!("Species vulnerability is 0; every SCR will fall back to 0");
        }

        Ok(())
    }
}
