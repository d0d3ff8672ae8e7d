use std::collections::HashMap;

use super::{
    AreaSource, Feature, FeatureId, FeatureSource, Field, FieldHandle, FieldType, FieldValue,
    ResultWriter,
};
use crate::error::LayerError;
use crate::geometry::MultiPolygon;

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryFeature {
    pub id: FeatureId,
    pub attributes: Vec<FieldValue>,
    pub geometry: Option<MultiPolygon>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    fields: Vec<Field>,
    features: Vec<MemoryFeature>,
}

/// An attribute table held in memory, with optional polygon geometry per
/// feature.
///
/// Area comes from the `area_field` column when one is set and the value is
/// numeric, otherwise from the feature's geometry.
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    name: String,
    fields: Vec<Field>,
    features: Vec<MemoryFeature>,
    index: HashMap<FeatureId, usize>,
    area_field: Option<String>,
    snapshot: Option<Snapshot>,
}

impl MemoryLayer {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
            features: Vec::new(),
            index: HashMap::new(),
            area_field: None,
            snapshot: None,
        }
    }

    pub fn with_area_field(mut self, name: impl Into<String>) -> Self {
        self.area_field = Some(name.into());
        self
    }

    pub fn area_field(&self) -> Option<&str> {
        self.area_field.as_deref()
    }

    pub fn features(&self) -> &[MemoryFeature] {
        &self.features
    }

    pub fn feature(&self, id: FeatureId) -> Option<&MemoryFeature> {
        self.index.get(&id).map(|&i| &self.features[i])
    }

    pub fn value(&self, id: FeatureId, field: &str) -> Option<&FieldValue> {
        let column = self.field_index(field)?;
        self.feature(id).map(|f| &f.attributes[column])
    }

    pub fn in_edit_session(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Appends a feature with the next free id. Missing trailing attributes
    /// are NULL.
    pub fn add_feature(&mut self, attributes: Vec<FieldValue>) -> FeatureId {
        let id = self.next_id();
        self.push_feature(id, attributes, None);
        id
    }

    pub fn add_feature_with_geometry(
        &mut self,
        attributes: Vec<FieldValue>,
        geometry: MultiPolygon,
    ) -> FeatureId {
        let id = self.next_id();
        self.push_feature(id, attributes, Some(geometry));
        id
    }

    /// Inserts a feature under an explicit id, replacing any feature that
    /// already carries it.
    pub fn insert_feature(
        &mut self,
        id: FeatureId,
        attributes: Vec<FieldValue>,
        geometry: Option<MultiPolygon>,
    ) {
        self.push_feature(id, attributes, geometry);
    }

    /// One past the largest id, or the lowest free id once `u64::MAX` is taken.
    fn next_id(&self) -> FeatureId {
        let after_max = match self.features.iter().map(|f| f.id.0).max() {
            Some(max) => max.checked_add(1),
            None => Some(0),
        };
        after_max
            .or_else(|| (0..u64::MAX).find(|&id| !self.index.contains_key(&FeatureId(id))))
            .map_or(FeatureId(u64::MAX), FeatureId)
    }

    fn push_feature(
        &mut self,
        id: FeatureId,
        mut attributes: Vec<FieldValue>,
        geometry: Option<MultiPolygon>,
    ) {
        attributes.resize(self.fields.len(), FieldValue::Null);
        let feature = MemoryFeature {
            id,
            attributes,
            geometry,
        };
        match self.index.get(&id) {
            Some(&i) => self.features[i] = feature,
            None => {
                self.index.insert(id, self.features.len());
                self.features.push(feature);
            }
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .features
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id, i))
            .collect();
    }
}

impl FeatureSource for MemoryLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn scan<'a>(
        &'a self,
        columns: &[usize],
    ) -> Result<Box<dyn Iterator<Item = Feature> + 'a>, LayerError> {
        if let Some(&bad) = columns.iter().find(|&&c| c >= self.fields.len()) {
            return Err(LayerError::Scan(format!(
                "column {bad} out of range for layer '{}'",
                self.name
            )));
        }
        let columns = columns.to_vec();
        Ok(Box::new(self.features.iter().map(move |f| Feature {
            id: f.id,
            values: columns.iter().map(|&c| f.attributes[c].clone()).collect(),
        })))
    }
}

impl AreaSource for MemoryLayer {
    fn area(&self, id: FeatureId) -> Option<f64> {
        let feature = self.feature(id)?;
        let from_field = self
            .area_field
            .as_deref()
            .and_then(|name| self.field_index(name))
            .and_then(|column| feature.attributes[column].as_f64());

        from_field.or_else(|| feature.geometry.as_ref().map(MultiPolygon::area))
    }
}

impl ResultWriter for MemoryLayer {
    fn ensure_field(
        &mut self,
        name: &str,
        field_type: FieldType,
    ) -> Result<FieldHandle, LayerError> {
        if self.snapshot.is_none() {
            return Err(LayerError::NoEditSession);
        }
        if let Some(column) = self.field_index(name) {
            let existing = self.fields[column].field_type;
            if existing != field_type {
                return Err(LayerError::FieldTypeConflict {
                    name: name.to_string(),
                    existing,
                    requested: field_type,
                });
            }
            return Ok(FieldHandle(column));
        }

        self.fields.push(Field::new(name, field_type));
        for feature in &mut self.features {
            feature.attributes.push(FieldValue::Null);
        }
        Ok(FieldHandle(self.fields.len() - 1))
    }

    fn write_fields(
        &mut self,
        id: FeatureId,
        values: &[(FieldHandle, FieldValue)],
    ) -> Result<(), LayerError> {
        if self.snapshot.is_none() {
            return Err(LayerError::NoEditSession);
        }
        let row = *self.index.get(&id).ok_or(LayerError::UnknownFeature(id))?;

        // validate everything before touching the row
        for (FieldHandle(column), value) in values {
            let field = self
                .fields
                .get(*column)
                .ok_or_else(|| LayerError::UnknownField(format!("#{column}")))?;
            if !value.fits(field.field_type) {
                return Err(LayerError::ValueType {
                    field: field.name.clone(),
                    expected: field.field_type,
                });
            }
        }

        let feature = &mut self.features[row];
        for (FieldHandle(column), value) in values {
            feature.attributes[*column] = value.clone();
        }
        Ok(())
    }

    fn begin_edit(&mut self) -> Result<(), LayerError> {
        if self.snapshot.is_some() {
            return Err(LayerError::EditSessionOpen);
        }
        self.snapshot = Some(Snapshot {
            fields: self.fields.clone(),
            features: self.features.clone(),
        });
        Ok(())
    }

    fn commit_edit(&mut self) -> Result<(), LayerError> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or(LayerError::NoEditSession)
    }

    fn rollback_edit(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.fields = snapshot.fields;
            self.features = snapshot.features;
            self.reindex();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;

    fn strata_layer() -> MemoryLayer {
        MemoryLayer::new("strata", vec![Field::new("name", FieldType::Text)])
    }

    #[test]
    fn test_add_feature_assigns_sequential_ids() {
        let mut layer = strata_layer();
        let a = layer.add_feature(vec![FieldValue::Text("a".into())]);
        let b = layer.add_feature(vec![]);

        assert_eq!(a, FeatureId(0));
        assert_eq!(b, FeatureId(1));
        assert_eq!(layer.value(b, "name"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_scan_projects_requested_columns() {
        let mut layer = MemoryLayer::new(
            "stations",
            vec![
                Field::new("catch", FieldType::Real),
                Field::new("dist", FieldType::Real),
            ],
        );
        layer.add_feature(vec![FieldValue::Real(10.0), FieldValue::Real(1.0)]);

        let rows: Vec<_> = layer.scan(&[1, 0]).unwrap().collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].values,
            vec![FieldValue::Real(1.0), FieldValue::Real(10.0)]
        );

        // restartable
        assert_eq!(layer.scan(&[0]).unwrap().count(), 1);
    }

    #[test]
    fn test_scan_rejects_unknown_column() {
        let layer = strata_layer();
        assert!(matches!(layer.scan(&[3]), Err(LayerError::Scan(_))));
    }

    #[test]
    fn test_area_from_geometry_and_override() {
        let square = Polygon::new(
            vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]],
            vec![],
        );
        let mut layer = MemoryLayer::new("strata", vec![Field::new("area", FieldType::Real)])
            .with_area_field("area");
        let from_geometry = layer.add_feature_with_geometry(vec![], square.clone().into());
        let overridden =
            layer.add_feature_with_geometry(vec![FieldValue::Real(5.0)], square.into());
        let bare = layer.add_feature(vec![]);

        assert_eq!(layer.area(from_geometry), Some(10_000.0));
        assert_eq!(layer.area(overridden), Some(5.0));
        assert_eq!(layer.area(bare), None);
    }

    #[test]
    fn test_ensure_field_is_idempotent() {
        let mut layer = strata_layer();
        layer.add_feature(vec![]);
        layer.begin_edit().unwrap();

        let first = layer.ensure_field("biomass", FieldType::Real).unwrap();
        let second = layer.ensure_field("biomass", FieldType::Real).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            layer.fields().iter().filter(|f| f.name == "biomass").count(),
            1
        );
        assert_eq!(layer.features()[0].attributes.len(), 2);
    }

    #[test]
    fn test_ensure_field_type_conflict() {
        let mut layer = strata_layer();
        layer.begin_edit().unwrap();
        assert!(matches!(
            layer.ensure_field("name", FieldType::Real),
            Err(LayerError::FieldTypeConflict { .. })
        ));
    }

    #[test]
    fn test_writes_require_edit_session() {
        let mut layer = strata_layer();
        let id = layer.add_feature(vec![]);
        assert_eq!(
            layer.write_fields(id, &[(FieldHandle(0), FieldValue::Null)]),
            Err(LayerError::NoEditSession)
        );
        assert_eq!(
            layer.ensure_field("x", FieldType::Real),
            Err(LayerError::NoEditSession)
        );
    }

    #[test]
    fn test_write_is_atomic_per_feature() {
        let mut layer = MemoryLayer::new(
            "strata",
            vec![
                Field::new("n", FieldType::Integer),
                Field::new("label", FieldType::Text),
            ],
        );
        let id = layer.add_feature(vec![FieldValue::Integer(1), FieldValue::Null]);
        layer.begin_edit().unwrap();

        let result = layer.write_fields(
            id,
            &[
                (FieldHandle(0), FieldValue::Integer(9)),
                (FieldHandle(1), FieldValue::Real(1.0)),
            ],
        );

        assert!(matches!(result, Err(LayerError::ValueType { .. })));
        assert_eq!(layer.value(id, "n"), Some(&FieldValue::Integer(1)));
    }

    #[test]
    fn test_rollback_restores_schema_and_values() {
        let mut layer = strata_layer();
        let id = layer.add_feature(vec![FieldValue::Text("a".into())]);

        layer.begin_edit().unwrap();
        let handle = layer.ensure_field("cv", FieldType::Real).unwrap();
        layer
            .write_fields(id, &[(handle, FieldValue::Real(12.5))])
            .unwrap();
        layer.rollback_edit();

        assert_eq!(layer.fields().len(), 1);
        assert_eq!(layer.value(id, "cv"), None);
        assert_eq!(layer.feature(id).unwrap().attributes.len(), 1);
    }

    #[test]
    fn test_nested_edit_session_rejected() {
        let mut layer = strata_layer();
        layer.begin_edit().unwrap();
        assert_eq!(layer.begin_edit(), Err(LayerError::EditSessionOpen));
        layer.commit_edit().unwrap();
        assert_eq!(layer.commit_edit(), Err(LayerError::NoEditSession));
    }

    #[test]
    fn test_add_after_max_id_takes_lowest_free_id() {
        let mut layer = strata_layer();
        layer.insert_feature(FeatureId(u64::MAX), vec![], None);
        layer.insert_feature(FeatureId(0), vec![], None);

        let id = layer.add_feature(vec![]);

        assert_eq!(id, FeatureId(1));
        assert_eq!(layer.features().len(), 3);
    }
}
