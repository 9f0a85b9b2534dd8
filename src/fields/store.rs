//! Typed container for one form's field values

use std::sync::Arc;

use super::validation::{self, ValidationReport};
use super::value::{Extensions, FieldMap, FieldValue, GroupRow};
use super::FieldError;
use crate::schema::{FieldDescriptor, FormSchema};

/// Result of reading a known field
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Slot<'a> {
    /// The field holds a value
    Set(&'a FieldValue),
    /// The field is unset; this is the schema's declared default
    Default(&'a FieldValue),
    /// The field is unset and has no default
    Unset,
}

impl<'a> Slot<'a> {
    /// The effective value, whether set or defaulted
    pub fn value(self) -> Option<&'a FieldValue> {
        match self {
            Slot::Set(v) | Slot::Default(v) => Some(v),
            Slot::Unset => None,
        }
    }

    pub fn is_set(self) -> bool {
        matches!(self, Slot::Set(_))
    }
}

/// Field values of one form instance, checked against its schema on every write.
#[derive(Clone, Debug)]
pub struct FieldValueStore {
    schema: Arc<FormSchema>,
    values: FieldMap,
    extensions: Extensions,
}

impl FieldValueStore {
    /// Create an empty store
    pub fn new(schema: Arc<FormSchema>) -> Self {
        Self {
            schema,
            values: FieldMap::new(),
            extensions: Extensions::new(),
        }
    }

    /// Create a store from an existing mapping, checking every value
    pub fn from_values(
        schema: Arc<FormSchema>,
        values: FieldMap,
        extensions: Extensions,
    ) -> Result<Self, FieldError> {
        for (field_id, value) in &values {
            check_value(&schema, field_id, value)?;
        }
        Ok(Self {
            schema,
            values,
            extensions,
        })
    }

    pub fn schema(&self) -> &Arc<FormSchema> {
        &self.schema
    }

    pub fn form_type(&self) -> &str {
        self.schema.form_type()
    }

    /// Set a field, returning the value it replaced
    pub fn set(&mut self, field_id: &str, value: FieldValue) -> Result<Option<FieldValue>, FieldError> {
        check_value(&self.schema, field_id, &value)?;
        Ok(self.values.insert(field_id.to_string(), value))
    }

    /// Return a field to unset, returning the value it held
    pub fn clear(&mut self, field_id: &str) -> Result<Option<FieldValue>, FieldError> {
        top_level_descriptor(&self.schema, field_id)?;
        Ok(self.values.remove(field_id))
    }

    /// Set or clear a field depending on `value`
    pub fn put(
        &mut self,
        field_id: &str,
        value: Option<FieldValue>,
    ) -> Result<Option<FieldValue>, FieldError> {
        match value {
            Some(value) => self.set(field_id, value),
            None => self.clear(field_id),
        }
    }

    /// Read a field. Unknown fields are a schema violation; known unset
    /// fields report their default or [`Slot::Unset`].
    pub fn get(&self, field_id: &str) -> Result<Slot<'_>, FieldError> {
        let descriptor = top_level_descriptor(&self.schema, field_id)?;
        Ok(match (self.values.get(field_id), &descriptor.default) {
            (Some(value), _) => Slot::Set(value),
            (None, Some(default)) => Slot::Default(default),
            (None, None) => Slot::Unset,
        })
    }

    /// The stored value only, ignoring defaults
    pub fn value(&self, field_id: &str) -> Option<&FieldValue> {
        self.values.get(field_id)
    }

    pub fn values(&self) -> &FieldMap {
        &self.values
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn into_parts(self) -> (FieldMap, Extensions) {
        (self.values, self.extensions)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Run the validation engine; never mutates the store
    pub fn validate(&self) -> ValidationReport {
        validation::validate(&self.schema, &self.values)
    }
}

fn top_level_descriptor<'a>(
    schema: &'a FormSchema,
    field_id: &str,
) -> Result<&'a FieldDescriptor, FieldError> {
    let descriptor = schema.descriptor(field_id).ok_or_else(|| {
        FieldError::violation(
            field_id,
            format!("not a field of {}", schema.form_type()),
        )
    })?;
    if let Some(group) = &descriptor.group {
        return Err(FieldError::violation(
            field_id,
            format!("column of group '{}' cannot be addressed directly", group),
        ));
    }
    Ok(descriptor)
}

/// Check that `value` may be stored in `field_id` under `schema`.
pub fn check_value(schema: &FormSchema, field_id: &str, value: &FieldValue) -> Result<(), FieldError> {
    let descriptor = top_level_descriptor(schema, field_id)?;
    check_against(descriptor, value)?;

    if let FieldValue::Group(rows) = value {
        for (index, row) in rows.iter().enumerate() {
            check_row(schema, field_id, index, row)?;
        }
    }
    Ok(())
}

fn check_row(schema: &FormSchema, group: &str, index: usize, row: &GroupRow) -> Result<(), FieldError> {
    for (column_id, cell) in row {
        let column = schema
            .descriptor(column_id)
            .filter(|c| c.group.as_deref() == Some(group))
            .ok_or_else(|| {
                FieldError::violation(
                    group,
                    format!("row {} holds '{}' which is not a column of this group", index + 1, column_id),
                )
            })?;
        check_against(column, cell)?;
    }
    Ok(())
}

fn check_against(descriptor: &FieldDescriptor, value: &FieldValue) -> Result<(), FieldError> {
    let expected = descriptor.semantic_type.kind();
    if value.kind() != expected {
        return Err(FieldError::violation(
            &descriptor.field_id,
            format!("expected {} value, got {}", expected, value.kind()),
        ));
    }
    if let FieldValue::Number(n) = value {
        if !n.is_finite() {
            return Err(FieldError::violation(
                &descriptor.field_id,
                "number must be finite",
            ));
        }
    }
    Ok(())
}
