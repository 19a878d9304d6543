//! Column encoding shared by the reader and the writer.

use citydb_core::{AttributeValue, Lod};

use crate::error::TransferError;

/// Value of `property.kind` for each property variant.
pub(crate) mod kind {
    pub(crate) const ATTRIBUTE: &str = "attribute";
    pub(crate) const GEOMETRY: &str = "geometry";
    pub(crate) const IMPLICIT_GEOMETRY: &str = "implicit_geometry";
    pub(crate) const FEATURE: &str = "feature";
    pub(crate) const APPEARANCE: &str = "appearance";
    pub(crate) const ADDRESS: &str = "address";
}

/// Attribute spread over the typed value columns of `property`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AttributeColumns {
    pub(crate) datatype: &'static str,
    pub(crate) string: Option<String>,
    pub(crate) int: Option<i64>,
    pub(crate) double: Option<f64>,
    pub(crate) uom: Option<String>,
}

impl AttributeColumns {
    pub(crate) fn encode(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::String(text) => Self {
                datatype: "string",
                string: Some(text.clone()),
                ..Self::default()
            },
            AttributeValue::Uri(uri) => Self {
                datatype: "uri",
                string: Some(uri.clone()),
                ..Self::default()
            },
            AttributeValue::Integer(number) => Self {
                datatype: "integer",
                int: Some(*number),
                ..Self::default()
            },
            AttributeValue::Boolean(flag) => Self {
                datatype: "boolean",
                int: Some(i64::from(*flag)),
                ..Self::default()
            },
            AttributeValue::Double(number) => Self {
                datatype: "double",
                double: Some(*number),
                ..Self::default()
            },
            AttributeValue::Measure { value, uom } => Self {
                datatype: "measure",
                double: Some(*value),
                uom: uom.clone(),
                ..Self::default()
            },
        }
    }

    /// Inverse of [`AttributeColumns::encode`]; `None` when the datatype is
    /// unknown or its column is empty.
    pub(crate) fn decode(
        datatype: &str,
        string: Option<String>,
        int: Option<i64>,
        double: Option<f64>,
        uom: Option<String>,
    ) -> Option<AttributeValue> {
        Some(match datatype {
            "string" => AttributeValue::String(string?),
            "uri" => AttributeValue::Uri(string?),
            "integer" => AttributeValue::Integer(int?),
            "boolean" => AttributeValue::Boolean(int? != 0),
            "double" => AttributeValue::Double(double?),
            "measure" => AttributeValue::Measure { value: double?, uom },
            _ => return None,
        })
    }
}

/// Decode a stored LOD column.
pub(crate) fn decode_lod(id: i64, level: Option<i64>) -> Result<Option<Lod>, TransferError> {
    let Some(level) = level else {
        return Ok(None);
    };
    let level = u8::try_from(level).map_err(|_| TransferError::InvalidRow {
        table: "property",
        id,
        reason: format!("LOD {level} is out of range"),
    })?;
    Ok(Some(Lod::new(level)?))
}

/// Encode an optional flag; absent flags stay `NULL`.
pub(crate) fn encode_flag(flag: Option<bool>) -> Option<i64> {
    flag.map(i64::from)
}
