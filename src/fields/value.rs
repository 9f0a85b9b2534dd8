//! Typed field values

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Identifier of a field within a form schema
pub type FieldId = String;

/// One row of a repeatable group, keyed by column field id
pub type GroupRow = BTreeMap<FieldId, FieldValue>;

/// Field id → value mapping of a form
pub type FieldMap = BTreeMap<FieldId, FieldValue>;

/// Values of fields the current schema does not know, kept verbatim
pub type Extensions = BTreeMap<String, serde_json::Value>;

/// A value that can be stored in a form field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    Number(f64),
    Boolean(bool),
    Enum(String),
    Group(Vec<GroupRow>),
}

/// The tag of a [`FieldValue`], matched against a field's semantic type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Text,
    Date,
    Time,
    DateTime,
    Number,
    Boolean,
    Enum,
    Group,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Text => "text",
            ValueKind::Date => "date",
            ValueKind::Time => "time",
            ValueKind::DateTime => "date_time",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Enum => "enum",
            ValueKind::Group => "group",
        };
        f.write_str(name)
    }
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    pub fn number(n: f64) -> Self {
        FieldValue::Number(n)
    }

    pub fn boolean(b: bool) -> Self {
        FieldValue::Boolean(b)
    }

    pub fn enum_tag(tag: impl Into<String>) -> Self {
        FieldValue::Enum(tag.into())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Text(_) => ValueKind::Text,
            FieldValue::Date(_) => ValueKind::Date,
            FieldValue::Time(_) => ValueKind::Time,
            FieldValue::DateTime(_) => ValueKind::DateTime,
            FieldValue::Number(_) => ValueKind::Number,
            FieldValue::Boolean(_) => ValueKind::Boolean,
            FieldValue::Enum(_) => ValueKind::Enum,
            FieldValue::Group(_) => ValueKind::Group,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_rows(&self) -> Option<&[GroupRow]> {
        match self {
            FieldValue::Group(rows) => Some(rows),
            _ => None,
        }
    }

    /// Whether the value counts as "filled in" for presence checks.
    ///
    /// Blank text and `false` do not hold a value; an empty group does not either.
    pub fn holds_value(&self) -> bool {
        match self {
            FieldValue::Text(s) | FieldValue::Enum(s) => !s.trim().is_empty(),
            FieldValue::Boolean(b) => *b,
            FieldValue::Group(rows) => !rows.is_empty(),
            _ => true,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) | FieldValue::Enum(s) => f.write_str(s),
            FieldValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            FieldValue::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            FieldValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Boolean(b) => write!(f, "{}", b),
            FieldValue::Group(rows) => write!(f, "[{} rows]", rows.len()),
        }
    }
}
