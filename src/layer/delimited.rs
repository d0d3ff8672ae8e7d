//! CSV persistence for [`MemoryLayer`].
//!
//! Layout: an optional `fid` column holds the feature key (the row number is
//! used when it is absent), an optional `wkt` column holds polygon geometry,
//! and every other column is an attribute. Attribute types are inferred per
//! column: all-integer columns become `Integer`, all-numeric columns `Real`,
//! anything else `Text`. Empty cells are NULL.

use anyhow::{Context, Result, bail};
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use super::{FeatureId, FeatureSource, Field, FieldType, FieldValue, MemoryLayer};
use crate::geometry::parse_wkt;

pub const FID_COLUMN: &str = "fid";
pub const WKT_COLUMN: &str = "wkt";
pub const AREA_COLUMN: &str = "area";

/// Loads a layer from a CSV file. The layer is named after the file stem.
pub fn read_layer(path: impl AsRef<Path>) -> Result<MemoryLayer> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("layer")
        .to_string();
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open layer file '{}'", path.display()))?;

    read_layer_from(&name, file).with_context(|| format!("failed to read '{}'", path.display()))
}

/// Loads a layer from any CSV reader.
pub fn read_layer_from<R: Read>(name: &str, reader: R) -> Result<MemoryLayer> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr.headers()?.clone();

    let fid_column = headers.iter().position(|h| h == FID_COLUMN);
    let wkt_column = headers.iter().position(|h| h == WKT_COLUMN);
    let attribute_columns: Vec<usize> = (0..headers.len())
        .filter(|&i| Some(i) != fid_column && Some(i) != wkt_column)
        .collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        rows.push(record?);
    }

    let fields: Vec<Field> = attribute_columns
        .iter()
        .map(|&column| {
            let cells = rows.iter().map(|r| r.get(column).unwrap_or(""));
            Field::new(&headers[column], infer_type(cells))
        })
        .collect();

    let has_area = fields.iter().any(|f| f.name == AREA_COLUMN);
    let mut layer = MemoryLayer::new(name, fields.clone());
    if has_area {
        layer = layer.with_area_field(AREA_COLUMN);
    }

    for (row_number, record) in rows.iter().enumerate() {
        let id = match fid_column.and_then(|c| record.get(c)).map(str::trim) {
            Some(cell) if !cell.is_empty() => FeatureId(
                cell.parse()
                    .with_context(|| format!("row {}: invalid fid '{cell}'", row_number + 1))?,
            ),
            _ => FeatureId(row_number as u64),
        };
        if layer.feature(id).is_some() {
            bail!("row {}: duplicate fid {id}", row_number + 1);
        }

        let geometry = match wkt_column.and_then(|c| record.get(c)).map(str::trim) {
            Some(cell) if !cell.is_empty() => Some(
                parse_wkt(cell).with_context(|| format!("row {}: invalid wkt", row_number + 1))?,
            ),
            _ => None,
        };

        let attributes = attribute_columns
            .iter()
            .zip(&fields)
            .map(|(&column, field)| parse_cell(record.get(column).unwrap_or(""), field.field_type))
            .collect();

        layer.insert_feature(id, attributes, geometry);
    }

    debug!(
        layer = name,
        features = layer.features().len(),
        fields = layer.fields().len(),
        "Layer loaded"
    );
    Ok(layer)
}

/// Writes a layer to a CSV file, replacing it.
pub fn write_layer(path: impl AsRef<Path>, layer: &MemoryLayer) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    write_layer_to(file, layer)?;
    debug!(path = %path.display(), layer = layer.name(), "Layer written");
    Ok(())
}

pub fn write_layer_to<W: Write>(writer: W, layer: &MemoryLayer) -> Result<()> {
    let has_geometry = layer.features().iter().any(|f| f.geometry.is_some());
    let mut wtr = csv::Writer::from_writer(writer);

    let mut header = vec![FID_COLUMN.to_string()];
    header.extend(layer.fields().iter().map(|f| f.name.clone()));
    if has_geometry {
        header.push(WKT_COLUMN.to_string());
    }
    wtr.write_record(&header)?;

    for feature in layer.features() {
        let mut row = vec![feature.id.to_string()];
        row.extend(feature.attributes.iter().map(format_cell));
        if has_geometry {
            row.push(
                feature
                    .geometry
                    .as_ref()
                    .map(|g| g.to_wkt())
                    .unwrap_or_default(),
            );
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/// A column with no values at all is read as `Real`, so an all-NULL result
/// column loads back with the type it was written with.
fn infer_type<'a>(cells: impl Iterator<Item = &'a str>) -> FieldType {
    let mut cells = cells.map(str::trim).filter(|c| !c.is_empty()).peekable();
    if cells.peek().is_none() {
        return FieldType::Real;
    }
    let mut field_type = FieldType::Integer;
    for cell in cells {
        if field_type == FieldType::Integer && cell.parse::<i64>().is_err() {
            field_type = FieldType::Real;
        }
        if field_type == FieldType::Real && cell.parse::<f64>().is_err() {
            return FieldType::Text;
        }
    }
    field_type
}

fn parse_cell(cell: &str, field_type: FieldType) -> FieldValue {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return FieldValue::Null;
    }
    match field_type {
        FieldType::Integer => trimmed
            .parse()
            .map_or(FieldValue::Null, FieldValue::Integer),
        FieldType::Real => trimmed.parse().map_or(FieldValue::Null, FieldValue::Real),
        FieldType::Text => FieldValue::Text(cell.to_string()),
    }
}

/// Reals are written with `{:?}` so they keep a decimal point and re-infer
/// as `Real`.
fn format_cell(value: &FieldValue) -> String {
    match value {
        FieldValue::Null => String::new(),
        FieldValue::Integer(v) => v.to_string(),
        FieldValue::Real(v) => format!("{v:?}"),
        FieldValue::Text(v) => v.clone(),
    }
}
