//! In-memory lookups built from one pass over a table.
//!
//! A [`ValueLookup`] maps a key field to one value field, a [`RowLookup`]
//! maps it to several and a [`NodeSet`] holds the node keys of a feature
//! class's shapes. Rows with a null key are skipped. Without
//! `duplicate_keys` the last row with a given key wins; with it, every row is
//! kept in table order.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDateTime;
use geo_types::{Coord, Geometry, Polygon};
use gpf_core_common::{TableHandle, Value};

use crate::error::{ConfigError, FieldError, Result, SchemaError};
use crate::fields::SHAPE_TOKEN;
use crate::workspace::Geodatabase;

/// Coordinates closer than this (in coordinate system units) share a node key.
pub const XY_RESOLUTION: f64 = 0.0001;

/// A hashable lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupKey {
    /// Integer (and integral double) keys.
    Integer(i64),
    /// Text keys, compared exactly.
    Text(String),
    /// Date keys.
    Date(NaiveDateTime),
    /// A point snapped to [`XY_RESOLUTION`], see [`LookupKey::node`].
    Node(i64, i64),
}

impl LookupKey {
    /// Builds the key of a coordinate by truncating it to the resolution grid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn node(x: f64, y: f64) -> Self {
        Self::Node((x / XY_RESOLUTION) as i64, (y / XY_RESOLUTION) as i64)
    }

    /// Approximate coordinates of a node key. The truncation in
    /// [`LookupKey::node`] cannot be undone, so use this for output only.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_xy(&self) -> Option<(f64, f64)> {
        match self {
            Self::Node(x, y) => Some((*x as f64 * XY_RESOLUTION, *y as f64 * XY_RESOLUTION)),
            _ => None,
        }
    }

    /// Converts a field value into a key. Null yields `Ok(None)`.
    fn from_value(table: &TableHandle, field: &str, value: &Value) -> Result<Option<Self>> {
        let key = match value {
            Value::Null => return Ok(None),
            Value::Integer(i) => Self::Integer(*i),
            Value::Double(d) if d.fract() == 0.0 && d.abs() < 9.007_199_254_740_992e15 => {
                #[allow(clippy::cast_possible_truncation)]
                Self::Integer(*d as i64)
            },
            Value::Text(s) => Self::Text(s.clone()),
            Value::Date(d) => Self::Date(*d),
            Value::Geometry(Geometry::Point(p)) => Self::node(p.x(), p.y()),
            other => {
                return Err(FieldError::TypeMismatch {
                    table: table.to_string(),
                    field: field.to_string(),
                    expected: "integer, text, date or point key".to_string(),
                    found: other.type_name().to_string(),
                }
                .into());
            },
        };
        Ok(Some(key))
    }
}

impl From<i64> for LookupKey {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for LookupKey {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LookupKey {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDateTime> for LookupKey {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

/// How a lookup is populated.
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupOptions<'a> {
    /// Where clause restricting the rows read.
    pub filter: Option<&'a str>,
    /// Keep every row per key instead of the last one.
    pub duplicate_keys: bool,
}

/// Checks every field against the table before any row is read.
fn check_fields(gdb: &Geodatabase, table: &TableHandle, fields: &[&str]) -> Result<()> {
    let schema = gdb.describe(table)?;
    for field in fields {
        schema.require(field)?;
    }
    Ok(())
}

fn insert_entry<V>(entries: &mut HashMap<LookupKey, Vec<V>>, key: LookupKey, value: V, duplicates: bool) {
    let slot = entries.entry(key).or_default();
    if !duplicates {
        slot.clear();
    }
    slot.push(value);
}

/// Key to single value lookup.
#[derive(Debug, Clone, Default)]
pub struct ValueLookup {
    entries: HashMap<LookupKey, Vec<Value>>,
}

impl ValueLookup {
    /// Reads `key_field` and `value_field` of every (filtered) row of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::NotFound`] for unknown fields before reading
    /// anything, [`FieldError::TypeMismatch`] for keys that cannot be hashed
    /// (non-integral doubles, blobs, non-point shapes) and the errors of the
    /// underlying search session.
    pub fn build(
        gdb: &Geodatabase,
        table: &TableHandle,
        key_field: &str,
        value_field: &str,
        options: LookupOptions<'_>,
    ) -> Result<Self> {
        let fields = [key_field, value_field];
        check_fields(gdb, table, &fields)?;

        let mut entries = HashMap::new();
        for row in gdb.search(table, &fields, options.filter)? {
            let row = row?;
            let Some(key) = LookupKey::from_value(table, key_field, row.get(key_field)?)? else {
                continue;
            };
            insert_entry(&mut entries, key, row.get(value_field)?.clone(), options.duplicate_keys);
        }
        Ok(Self { entries })
    }

    /// The value of the last row with `key`.
    #[must_use]
    pub fn get(&self, key: &LookupKey) -> Option<&Value> {
        self.entries.get(key).and_then(|v| v.last())
    }

    /// All values stored for `key` (one unless built with `duplicate_keys`).
    #[must_use]
    pub fn get_all(&self, key: &LookupKey) -> &[Value] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &LookupKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no row had a non-null key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the distinct keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &LookupKey> {
        self.entries.keys()
    }
}

/// Key to several values lookup.
#[derive(Debug, Clone, Default)]
pub struct RowLookup {
    fields: Vec<String>,
    positions: HashMap<String, usize>,
    entries: HashMap<LookupKey, Vec<Vec<Value>>>,
}

impl RowLookup {
    /// Reads `key_field` and `value_fields` of every (filtered) row of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for fewer than two value fields
    /// (use a [`ValueLookup`] instead) and the errors of
    /// [`ValueLookup::build`].
    pub fn build(
        gdb: &Geodatabase,
        table: &TableHandle,
        key_field: &str,
        value_fields: &[&str],
        options: LookupOptions<'_>,
    ) -> Result<Self> {
        if value_fields.len() < 2 {
            return Err(ConfigError::InvalidOption {
                option: "value_fields".to_string(),
                message: "a row lookup needs at least two value fields, use a value lookup instead"
                    .to_string(),
            }
            .into());
        }
        let fields: Vec<&str> = std::iter::once(key_field)
            .chain(value_fields.iter().copied())
            .collect();
        check_fields(gdb, table, &fields)?;

        let mut entries = HashMap::new();
        for row in gdb.search(table, &fields, options.filter)? {
            let row = row?;
            let Some(key) = LookupKey::from_value(table, key_field, row.get(key_field)?)? else {
                continue;
            };
            let values = value_fields
                .iter()
                .map(|f| row.get(f).cloned())
                .collect::<Result<Vec<_>>>()?;
            insert_entry(&mut entries, key, values, options.duplicate_keys);
        }

        let positions = value_fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.trim().to_ascii_uppercase(), i))
            .collect();
        Ok(Self {
            fields: value_fields.iter().map(|f| f.trim().to_string()).collect(),
            positions,
            entries,
        })
    }

    /// The value fields, in the order values are stored.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The values of the last row with `key`.
    #[must_use]
    pub fn get(&self, key: &LookupKey) -> Option<&[Value]> {
        self.entries.get(key).and_then(|v| v.last()).map(Vec::as_slice)
    }

    /// All rows stored for `key` (one unless built with `duplicate_keys`).
    #[must_use]
    pub fn get_all(&self, key: &LookupKey) -> &[Vec<Value>] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    /// One value of the last row with `key`. `field` is matched
    /// case-insensitively against the value fields the lookup was built with.
    #[must_use]
    pub fn field_value(&self, key: &LookupKey, field: &str) -> Option<&Value> {
        let position = *self.positions.get(&field.trim().to_ascii_uppercase())?;
        self.get(key).and_then(|values| values.get(position))
    }

    /// Returns `true` if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &LookupKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no row had a non-null key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The unique node keys of the shapes in a feature class.
///
/// Points and multipoints contribute every coordinate. Other shapes
/// contribute their first and last vertex, or every vertex when built with
/// `all_vertices`.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: HashSet<LookupKey>,
}

impl NodeSet {
    /// Reads the shape of every (filtered) row of `table`. Null shapes are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NotFeatureClass`] for tables without a shape
    /// field and the errors of the underlying search session.
    pub fn build(
        gdb: &Geodatabase,
        table: &TableHandle,
        filter: Option<&str>,
        all_vertices: bool,
    ) -> Result<Self> {
        if gdb.describe(table)?.shape_field().is_none() {
            return Err(SchemaError::NotFeatureClass {
                table: table.to_string(),
            }
            .into());
        }

        let mut nodes = HashSet::new();
        let mut coords = Vec::new();
        for row in gdb.search(table, &[SHAPE_TOKEN], filter)? {
            let row = row?;
            let Value::Geometry(geometry) = row.get(SHAPE_TOKEN)? else {
                continue;
            };
            coords.clear();
            collect_vertices(geometry, &mut coords);

            let every = all_vertices || matches!(geometry, Geometry::Point(_) | Geometry::MultiPoint(_));
            if every {
                nodes.extend(coords.iter().map(|c| LookupKey::node(c.x, c.y)));
            } else if let (Some(first), Some(last)) = (coords.first(), coords.last()) {
                nodes.insert(LookupKey::node(first.x, first.y));
                nodes.insert(LookupKey::node(last.x, last.y));
            }
        }
        Ok(Self { nodes })
    }

    /// Returns `true` if `key` is a node of the set.
    #[must_use]
    pub fn contains(&self, key: &LookupKey) -> bool {
        self.nodes.contains(key)
    }

    /// Returns `true` if the coordinate snaps to a node of the set.
    #[must_use]
    pub fn contains_xy(&self, x: f64, y: f64) -> bool {
        self.nodes.contains(&LookupKey::node(x, y))
    }

    /// Number of distinct nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when no shape contributed a node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over the node keys, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &LookupKey> {
        self.nodes.iter()
    }
}

fn collect_polygon(polygon: &Polygon<f64>, out: &mut Vec<Coord<f64>>) {
    out.extend(polygon.exterior().coords().copied());
    for ring in polygon.interiors() {
        out.extend(ring.coords().copied());
    }
}

/// Appends the vertices of `geometry` in part order.
fn collect_vertices(geometry: &Geometry<f64>, out: &mut Vec<Coord<f64>>) {
    match geometry {
        Geometry::Point(p) => out.push(p.0),
        Geometry::Line(l) => out.extend([l.start, l.end]),
        Geometry::LineString(ls) => out.extend(ls.coords().copied()),
        Geometry::Polygon(p) => collect_polygon(p, out),
        Geometry::MultiPoint(mp) => out.extend(mp.iter().map(|p| p.0)),
        Geometry::MultiLineString(mls) => {
            for ls in mls {
                out.extend(ls.coords().copied());
            }
        },
        Geometry::MultiPolygon(mp) => {
            for p in mp {
                collect_polygon(p, out);
            }
        },
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_vertices(g, out);
            }
        },
        Geometry::Rect(r) => collect_polygon(&r.to_polygon(), out),
        Geometry::Triangle(t) => collect_polygon(&t.to_polygon(), out),
    }
}
