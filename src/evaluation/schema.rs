//! Binding configured column names to typed fields, once per run.

use std::collections::btree_map::Entry;
use tracing::debug;

use crate::config::SurveyConfig;
use crate::error::{EvalError, LayerError};
use crate::evaluation::types::{StationRecord, StratumIndex, StratumMetrics, StratumRef};
use crate::layer::{
    AreaSource, Feature, FeatureSource, FieldHandle, FieldType, FieldValue, ResultWriter,
};

pub const COUNT_FIELD: &str = "n_st";
pub const SUM_SCR_FIELD: &str = "sum_scr";
pub const MEAN_SCR_FIELD: &str = "mean_scr";
pub const VAR_SCR_FIELD: &str = "var_scr";
pub const SUMVAR_FIELD: &str = "sumvar";
pub const BIOMASS_FIELD: &str = "biomass";
pub const CV_FIELD: &str = "cv";
pub const STATION_SCR_FIELD: &str = "scr";

/// Column indices of the bound station fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationSchema {
    columns: [usize; 6],
}

impl StationSchema {
    /// Resolves every binding against the station layer, failing on the
    /// first column that is absent or not numeric.
    pub fn resolve<S: FeatureSource + ?Sized>(
        config: &SurveyConfig,
        layer: &S,
    ) -> Result<Self, EvalError> {
        let mut columns = [0; 6];
        for (slot, (role, name)) in columns.iter_mut().zip(config.bindings()) {
            *slot = numeric_column(layer, role, name)?;
        }
        debug!(layer = layer.name(), ?columns, "Station schema resolved");
        Ok(Self { columns })
    }

    /// Scan projection, in the order [`StationSchema::record`] expects.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    pub fn record(&self, feature: Feature) -> StationRecord {
        let value = |i: usize| feature.values.get(i).and_then(FieldValue::as_f64);
        StationRecord {
            key: feature.id,
            stratum_id: feature.values.first().and_then(FieldValue::as_i64),
            catch: value(1),
            distance: value(2),
            width: value(3),
            vertical_availability: value(4),
            areal_availability: value(5),
            scr: 0.0,
            degenerate: false,
        }
    }
}

fn numeric_column<S: FeatureSource + ?Sized>(
    layer: &S,
    role: &str,
    name: &str,
) -> Result<usize, EvalError> {
    let index = layer.field_index(name).ok_or_else(|| {
        EvalError::configuration(format!(
            "column '{name}' bound for {role} not found in layer '{}'",
            layer.name()
        ))
    })?;
    let field_type = layer.fields()[index].field_type;
    if !field_type.is_numeric() {
        return Err(EvalError::configuration(format!(
            "column '{name}' bound for {role} is {field_type:?}, expected a numeric column"
        )));
    }
    Ok(index)
}

/// Collects stratum ids, feature keys and areas.
///
/// Ids come from `stratum_key_column` when configured, otherwise from the
/// feature id. A stratum without a usable id, or an id used twice, makes the
/// station references ambiguous and aborts the run.
pub fn resolve_strata<T: FeatureSource + AreaSource + ?Sized>(
    config: &SurveyConfig,
    strata: &T,
) -> Result<StratumIndex, EvalError> {
    let key_column = config
        .stratum_key_column
        .as_deref()
        .map(|name| numeric_column(strata, "stratum key", name))
        .transpose()?;
    let projection: Vec<usize> = key_column.into_iter().collect();

    let mut index = StratumIndex::new();
    for feature in strata.scan(&projection)? {
        let stratum_id = match key_column {
            Some(_) => feature.values.first().and_then(FieldValue::as_i64),
            None => i64::try_from(feature.id.0).ok(),
        }
        .ok_or_else(|| {
            EvalError::configuration(format!(
                "stratum feature {} has no usable stratum id",
                feature.id
            ))
        })?;

        let stratum = StratumRef {
            feature: feature.id,
            area: strata.area(feature.id),
        };
        match index.entry(stratum_id) {
            Entry::Vacant(slot) => {
                slot.insert(stratum);
            }
            Entry::Occupied(_) => {
                return Err(EvalError::configuration(format!(
                    "stratum id {stratum_id} appears more than once in layer '{}'",
                    strata.name()
                )));
            }
        }
    }

    debug!(layer = strata.name(), strata = index.len(), "Strata resolved");
    Ok(index)
}

/// Handles of the result fields on the stratum table.
#[derive(Debug, Clone, Copy)]
pub struct ResultFields {
    count: FieldHandle,
    sum_scr: FieldHandle,
    mean_scr: FieldHandle,
    var_scr: FieldHandle,
    sumvar: FieldHandle,
    biomass: FieldHandle,
    cv: FieldHandle,
}

impl ResultFields {
    pub fn ensure<W: ResultWriter + ?Sized>(writer: &mut W) -> Result<Self, LayerError> {
        Ok(Self {
            count: writer.ensure_field(COUNT_FIELD, FieldType::Integer)?,
            sum_scr: writer.ensure_field(SUM_SCR_FIELD, FieldType::Real)?,
            mean_scr: writer.ensure_field(MEAN_SCR_FIELD, FieldType::Real)?,
            var_scr: writer.ensure_field(VAR_SCR_FIELD, FieldType::Real)?,
            sumvar: writer.ensure_field(SUMVAR_FIELD, FieldType::Real)?,
            biomass: writer.ensure_field(BIOMASS_FIELD, FieldType::Real)?,
            cv: writer.ensure_field(CV_FIELD, FieldType::Real)?,
        })
    }

    pub fn values(&self, metrics: &StratumMetrics) -> [(FieldHandle, FieldValue); 7] {
        [
            (self.count, FieldValue::Integer(metrics.count as i64)),
            (self.sum_scr, FieldValue::Real(metrics.sum_scr)),
            (self.mean_scr, metrics.mean_scr.into()),
            (self.var_scr, metrics.var_scr.into()),
            (self.sumvar, metrics.sumvar.into()),
            (self.biomass, metrics.biomass.into()),
            (self.cv, metrics.cv.into()),
        ]
    }
}
