//! Planar stratum polygons.
//!
//! Only what the area query needs: polygons with holes, multipolygons, the
//! shoelace area and a reader/writer for the WKT `POLYGON` / `MULTIPOLYGON`
//! text used in delimited stratum files.

use std::fmt::Write as _;
use thiserror::Error;

pub type Ring = Vec<[f64; 2]>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("unsupported geometry type '{0}'")]
    UnsupportedType(String),
    #[error("malformed WKT at byte {offset}: {message}")]
    Malformed { offset: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    pub exterior: Ring,
    pub interiors: Vec<Ring>,
}

impl Polygon {
    pub fn new(exterior: Ring, interiors: Vec<Ring>) -> Self {
        Self {
            exterior,
            interiors,
        }
    }

    /// Exterior area minus the area of all holes. Ring orientation is ignored.
    pub fn area(&self) -> f64 {
        let holes: f64 = self.interiors.iter().map(|r| ring_area(r).abs()).sum();
        (ring_area(&self.exterior).abs() - holes).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiPolygon(pub Vec<Polygon>);

impl MultiPolygon {
    pub fn area(&self) -> f64 {
        self.0.iter().map(Polygon::area).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Writes the geometry as `POLYGON` (single part) or `MULTIPOLYGON`.
    pub fn to_wkt(&self) -> String {
        let mut out = String::new();
        match self.0.as_slice() {
            [] => out.push_str("POLYGON EMPTY"),
            [single] => {
                out.push_str("POLYGON ");
                write_polygon(&mut out, single);
            }
            parts => {
                out.push_str("MULTIPOLYGON (");
                for (i, polygon) in parts.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_polygon(&mut out, polygon);
                }
                out.push(')');
            }
        }
        out
    }
}

impl From<Polygon> for MultiPolygon {
    fn from(polygon: Polygon) -> Self {
        MultiPolygon(vec![polygon])
    }
}

/// Signed shoelace area; positive for counter-clockwise rings.
///
/// Works on open and closed rings alike, since a repeated closing vertex
/// contributes zero.
pub fn ring_area(ring: &[[f64; 2]]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, a) in ring.iter().enumerate() {
        let b = ring[(i + 1) % ring.len()];
        twice += a[0] * b[1] - b[0] * a[1];
    }
    twice / 2.0
}

fn write_polygon(out: &mut String, polygon: &Polygon) {
    out.push('(');
    let rings = std::iter::once(&polygon.exterior).chain(polygon.interiors.iter());
    for (i, ring) in rings.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('(');
        for (j, [x, y]) in ring.iter().enumerate() {
            if j > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{x} {y}");
        }
        out.push(')');
    }
    out.push(')');
}

/// Parses `POLYGON` and `MULTIPOLYGON` WKT. A Z coordinate is accepted and
/// dropped.
pub fn parse_wkt(text: &str) -> Result<MultiPolygon, GeometryError> {
    let mut cursor = Cursor::new(text);
    let keyword = cursor.keyword();
    let upper = keyword.to_ascii_uppercase();

    // optional dimension tag, e.g. "POLYGON Z"
    let save = cursor.pos;
    let tag = cursor.keyword().to_ascii_uppercase();
    if !matches!(tag.as_str(), "Z" | "M" | "ZM") {
        cursor.pos = save;
    }

    let save = cursor.pos;
    if cursor.keyword().eq_ignore_ascii_case("EMPTY") {
        cursor.expect_end()?;
        return match upper.as_str() {
            "POLYGON" | "MULTIPOLYGON" => Ok(MultiPolygon::default()),
            _ => Err(GeometryError::UnsupportedType(keyword.to_string())),
        };
    }
    cursor.pos = save;

    let geometry = match upper.as_str() {
        "POLYGON" => MultiPolygon(vec![cursor.polygon()?]),
        "MULTIPOLYGON" => {
            let mut parts = Vec::new();
            cursor.expect(b'(')?;
            loop {
                parts.push(cursor.polygon()?);
                if !cursor.separator()? {
                    break;
                }
            }
            MultiPolygon(parts)
        }
        _ => return Err(GeometryError::UnsupportedType(keyword.to_string())),
    };

    cursor.expect_end()?;
    Ok(geometry)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn skip_ws(&mut self) {
        let rest = &self.text[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.text.as_bytes().get(self.pos).copied()
    }

    fn error(&self, message: impl Into<String>) -> GeometryError {
        GeometryError::Malformed {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn keyword(&mut self) -> &'a str {
        self.skip_ws();
        let rest = &self.text[self.pos..];
        let len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn expect(&mut self, byte: u8) -> Result<(), GeometryError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", byte as char)))
        }
    }

    fn expect_end(&mut self) -> Result<(), GeometryError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.error("trailing characters")),
        }
    }

    /// Consumes `,` (true) or `)` (false).
    fn separator(&mut self) -> Result<bool, GeometryError> {
        match self.peek() {
            Some(b',') => {
                self.pos += 1;
                Ok(true)
            }
            Some(b')') => {
                self.pos += 1;
                Ok(false)
            }
            _ => Err(self.error("expected ',' or ')'")),
        }
    }

    fn number(&mut self) -> Result<f64, GeometryError> {
        self.skip_ws();
        let rest = &self.text[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')))
            .unwrap_or(rest.len());
        let value = rest[..len]
            .parse::<f64>()
            .map_err(|_| self.error("expected a number"))?;
        self.pos += len;
        Ok(value)
    }

    fn coordinate(&mut self) -> Result<[f64; 2], GeometryError> {
        let x = self.number()?;
        let y = self.number()?;
        if !matches!(self.peek(), Some(b',') | Some(b')')) {
            self.number()?;
        }
        Ok([x, y])
    }

    fn ring(&mut self) -> Result<Ring, GeometryError> {
        self.expect(b'(')?;
        let mut ring = Vec::new();
        loop {
            ring.push(self.coordinate()?);
            if !self.separator()? {
                break;
            }
        }
        Ok(ring)
    }

    fn polygon(&mut self) -> Result<Polygon, GeometryError> {
        self.expect(b'(')?;
        let exterior = self.ring()?;
        let mut interiors = Vec::new();
        while self.separator()? {
            interiors.push(self.ring()?);
        }
        Ok(Polygon::new(exterior, interiors))
    }
}
