//! Attribute-table collaborators used by the evaluation engine.
//!
//! The engine never owns a table. It reads through [`FeatureSource`] and
//! [`AreaSource`], and mutates only through [`ResultWriter`] inside an
//! [`EditSession`]. [`MemoryLayer`] is the reference implementation, and
//! [`delimited`] loads it from and saves it to CSV.

pub mod delimited;
mod memory;

pub use memory::{MemoryFeature, MemoryLayer};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::LayerError;

/// Opaque feature key, stable across scans of the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(pub u64);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Integer,
    Real,
    Text,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Real)
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Numeric view of the value. Text and NULL have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of the value. Reals qualify only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Real(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Whether the value may be stored in a field of type `field_type`.
    pub fn fits(&self, field_type: FieldType) -> bool {
        match (self, field_type) {
            (FieldValue::Null, _) => true,
            (FieldValue::Integer(_), FieldType::Integer | FieldType::Real) => true,
            (FieldValue::Real(_), FieldType::Real) => true,
            (FieldValue::Text(_), FieldType::Text) => true,
            _ => false,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Real(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
}

impl Field {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Index of a field in its layer's schema, as returned by
/// [`ResultWriter::ensure_field`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldHandle(pub usize);

/// One scanned row, projected onto the requested columns in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub values: Vec<FieldValue>,
}

/// Read access to a table of features.
///
/// `scan` must be restartable: every call yields a fresh, complete pass.
pub trait FeatureSource {
    fn name(&self) -> &str;

    fn fields(&self) -> &[Field];

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields().iter().position(|f| f.name == name)
    }

    fn scan<'a>(
        &'a self,
        columns: &[usize],
    ) -> Result<Box<dyn Iterator<Item = Feature> + 'a>, LayerError>;
}

/// Planar area of a feature's polygon, in squared survey length units.
pub trait AreaSource {
    fn area(&self, id: FeatureId) -> Option<f64>;
}

/// Schema and attribute mutation. Writes are only legal inside an edit session.
pub trait ResultWriter {
    /// Returns the handle of `name`, creating the field if it does not exist.
    fn ensure_field(&mut self, name: &str, field_type: FieldType)
    -> Result<FieldHandle, LayerError>;

    /// Writes all `values` of one feature, or none of them.
    fn write_fields(
        &mut self,
        id: FeatureId,
        values: &[(FieldHandle, FieldValue)],
    ) -> Result<(), LayerError>;

    fn begin_edit(&mut self) -> Result<(), LayerError>;

    fn commit_edit(&mut self) -> Result<(), LayerError>;

    /// Discards every change since `begin_edit`. No-op without a session.
    fn rollback_edit(&mut self);
}

/// Everything the engine needs from the stratum table.
pub trait StratumLayer: FeatureSource + AreaSource + ResultWriter {}

impl<T: FeatureSource + AreaSource + ResultWriter + ?Sized> StratumLayer for T {}

/// Scoped write access. Rolls back on drop unless [`EditSession::commit`]
/// succeeded.
pub struct EditSession<'a, W: ResultWriter + ?Sized> {
    writer: &'a mut W,
    committed: bool,
}

impl<'a, W: ResultWriter + ?Sized> EditSession<'a, W> {
    pub fn begin(writer: &'a mut W) -> Result<Self, LayerError> {
        writer.begin_edit()?;
        Ok(Self {
            writer,
            committed: false,
        })
    }

    pub fn commit(mut self) -> Result<(), LayerError> {
        self.writer.commit_edit()?;
        self.committed = true;
        Ok(())
    }
}

impl<W: ResultWriter + ?Sized> Deref for EditSession<'_, W> {
    type Target = W;

    fn deref(&self) -> &W {
        &*self.writer
    }
}

impl<W: ResultWriter + ?Sized> DerefMut for EditSession<'_, W> {
    fn deref_mut(&mut self) -> &mut W {
        &mut *self.writer
    }
}

impl<W: ResultWriter + ?Sized> Drop for EditSession<'_, W> {
    fn drop(&mut self) {
        if !self.committed {
            self.writer.rollback_edit();
        }
    }
}
