//! Attribute values and the field types that declare them.

use std::fmt;

use chrono::NaiveDateTime;
use geo_types::Geometry;

/// Declared type of a table field.
///
/// The variants follow the field types a geodatabase reports. External engines
/// describe types with string codes; [`FieldType::from_code`] is the only
/// place those codes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Variable length text.
    Text,
    /// 16-bit signed integer.
    SmallInteger,
    /// 32-bit signed integer.
    Integer,
    /// Single precision float.
    Single,
    /// Double precision float.
    Double,
    /// Date and time without time zone.
    Date,
    /// Feature geometry.
    Geometry,
    /// Binary large object.
    Blob,
    /// Object id maintained by the engine.
    ObjectId,
    /// GUID text in registry format (`{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`).
    Guid,
    /// Global id maintained by the engine.
    GlobalId,
}

impl FieldType {
    /// Maps an external type code to a field type.
    ///
    /// Codes are matched case-insensitively. Returns `None` for codes this
    /// toolkit cannot represent (rasters, for example).
    ///
    /// # Examples
    ///
    /// ```
    /// use gpf_core_common::FieldType;
    ///
    /// assert_eq!(FieldType::from_code("smallinteger"), Some(FieldType::SmallInteger));
    /// assert_eq!(FieldType::from_code("OID"), Some(FieldType::ObjectId));
    /// assert_eq!(FieldType::from_code("Raster"), None);
    /// ```
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        let field_type = match code.trim().to_ascii_lowercase().as_str() {
            "string" | "text" => Self::Text,
            "smallinteger" | "short" => Self::SmallInteger,
            "integer" | "long" => Self::Integer,
            "single" | "float" => Self::Single,
            "double" => Self::Double,
            "date" => Self::Date,
            "geometry" => Self::Geometry,
            "blob" => Self::Blob,
            "oid" => Self::ObjectId,
            "guid" => Self::Guid,
            "globalid" => Self::GlobalId,
            _ => return None,
        };
        Some(field_type)
    }

    /// Returns the canonical type code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Text => "String",
            Self::SmallInteger => "SmallInteger",
            Self::Integer => "Integer",
            Self::Single => "Single",
            Self::Double => "Double",
            Self::Date => "Date",
            Self::Geometry => "Geometry",
            Self::Blob => "Blob",
            Self::ObjectId => "OID",
            Self::Guid => "GUID",
            Self::GlobalId => "GlobalID",
        }
    }

    /// Returns `true` for integer and floating point types.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::SmallInteger | Self::Integer | Self::Single | Self::Double | Self::ObjectId
        )
    }

    /// Returns `true` for types whose values the engine assigns.
    #[must_use]
    pub fn is_system_maintained(&self) -> bool {
        matches!(self, Self::ObjectId | Self::GlobalId)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Any integer (object ids included).
    Integer(i64),
    /// Any floating point number.
    Double(f64),
    /// Text, GUIDs included.
    Text(String),
    /// Date and time.
    Date(NaiveDateTime),
    /// Feature geometry.
    Geometry(Geometry<f64>),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Short name of the value's variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Geometry(_) => "geometry",
            Self::Blob(_) => "blob",
        }
    }

    /// Returns the text if this is a [`Value::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is a [`Value::Integer`].
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the number as `f64` for integers and doubles.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("<null>"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Self::Geometry(g) => f.write_str(geometry_kind(g)),
            Self::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "<Point>",
        Geometry::Line(_) => "<Line>",
        Geometry::LineString(_) => "<LineString>",
        Geometry::Polygon(_) => "<Polygon>",
        Geometry::MultiPoint(_) => "<MultiPoint>",
        Geometry::MultiLineString(_) => "<MultiLineString>",
        Geometry::MultiPolygon(_) => "<MultiPolygon>",
        Geometry::GeometryCollection(_) => "<GeometryCollection>",
        Geometry::Rect(_) => "<Rect>",
        Geometry::Triangle(_) => "<Triangle>",
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::Date(value)
    }
}

impl From<Geometry<f64>> for Value {
    fn from(value: Geometry<f64>) -> Self {
        Self::Geometry(value)
    }
}

impl From<geo_types::Point<f64>> for Value {
    fn from(value: geo_types::Point<f64>) -> Self {
        Self::Geometry(Geometry::Point(value))
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Conversion from a borrowed [`Value`] into a Rust type.
///
/// Returns `None` when the value has a different variant. Null handling is left
/// to the caller.
pub trait FromValue: Sized {
    /// Name of the target type for error messages.
    const TYPE_NAME: &'static str;

    /// Converts the value, or returns `None` on a variant mismatch.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for i64 {
    const TYPE_NAME: &'static str = "integer";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl FromValue for f64 {
    const TYPE_NAME: &'static str = "double";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for String {
    const TYPE_NAME: &'static str = "text";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_text().map(str::to_string)
    }
}

impl FromValue for NaiveDateTime {
    const TYPE_NAME: &'static str = "date";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl FromValue for Geometry<f64> {
    const TYPE_NAME: &'static str = "geometry";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Geometry(g) => Some(g.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const TYPE_NAME: &'static str = "blob";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Blob(b) => Some(b.clone()),
            _ => None,
        }
    }
}
