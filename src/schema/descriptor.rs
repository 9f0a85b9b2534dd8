//! Field descriptors, cross-field rules and the per-form schema

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::SchemaError;
use crate::fields::{FieldValue, ValueKind};

/// The semantic type declared for a field
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SemanticType {
    Text,
    Date,
    Time,
    DateTime,
    Number,
    Boolean,
    /// A choice among declared tags
    Enum { choices: Vec<String> },
    /// A repeatable group; its columns are the descriptors naming it as `group`
    Group,
}

impl SemanticType {
    /// The value tag a field of this type must carry
    pub fn kind(&self) -> ValueKind {
        match self {
            SemanticType::Text => ValueKind::Text,
            SemanticType::Date => ValueKind::Date,
            SemanticType::Time => ValueKind::Time,
            SemanticType::DateTime => ValueKind::DateTime,
            SemanticType::Number => ValueKind::Number,
            SemanticType::Boolean => ValueKind::Boolean,
            SemanticType::Enum { .. } => ValueKind::Enum,
            SemanticType::Group => ValueKind::Group,
        }
    }

    pub fn enumeration<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SemanticType::Enum {
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }
}

/// Specification for a single field of a form
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    pub field_id: String,
    /// Compact code used by ICS-DES tokens
    pub short_code: String,
    pub semantic_type: SemanticType,
    pub required: bool,
    /// Owning group field, for group columns
    pub group: Option<String>,
    /// Value reported by `get` while the field is unset
    pub default: Option<FieldValue>,
    /// Maximum text length in characters
    pub max_len: Option<usize>,
    /// Inclusive numeric range
    pub range: Option<(f64, f64)>,
}

impl FieldDescriptor {
    pub fn new(
        field_id: impl Into<String>,
        short_code: impl Into<String>,
        semantic_type: SemanticType,
    ) -> Self {
        Self {
            field_id: field_id.into(),
            short_code: short_code.into(),
            semantic_type,
            required: false,
            group: None,
            default: None,
            max_len: None,
            range: None,
        }
    }

    pub fn text(field_id: impl Into<String>, short_code: impl Into<String>) -> Self {
        Self::new(field_id, short_code, SemanticType::Text)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn is_group(&self) -> bool {
        self.semantic_type == SemanticType::Group
    }
}

/// A point in time assembled from one or two fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Moment {
    /// A single DateTime field
    DateTime(String),
    /// A Date field combined with a Time field
    DateAndTime { date: String, time: String },
}

impl Moment {
    /// The field a violation involving this moment is reported against
    pub fn anchor(&self) -> &str {
        match self {
            Moment::DateTime(field) => field,
            Moment::DateAndTime { date, .. } => date,
        }
    }

    fn referenced(&self) -> Vec<(&str, ValueKind)> {
        match self {
            Moment::DateTime(field) => vec![(field.as_str(), ValueKind::DateTime)],
            Moment::DateAndTime { date, time } => vec![
                (date.as_str(), ValueKind::Date),
                (time.as_str(), ValueKind::Time),
            ],
        }
    }
}

/// Predicate descriptors evaluated over the whole form after per-field rules
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CrossFieldRule {
    /// `end` must not precede `start`
    NotBefore { start: Moment, end: Moment },
    /// A repeatable group must carry at least `min` rows
    MinRows { group: String, min: usize },
    /// `field` must be set whenever `trigger` holds a value
    RequiredWith { field: String, trigger: String },
}

/// Schema of one form type
#[derive(Clone, Debug)]
pub struct FormSchema {
    form_type: String,
    type_code: String,
    title: String,
    fields: Vec<FieldDescriptor>,
    rules: Vec<CrossFieldRule>,
    by_id: HashMap<String, usize>,
    by_code: HashMap<String, usize>,
}

impl FormSchema {
    pub fn new(form_type: impl Into<String>, type_code: impl Into<String>) -> Self {
        Self {
            form_type: form_type.into(),
            type_code: type_code.into(),
            title: String::new(),
            fields: Vec::new(),
            rules: Vec::new(),
            by_id: HashMap::new(),
            by_code: HashMap::new(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    pub fn rule(mut self, rule: CrossFieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn form_type(&self) -> &str {
        &self.form_type
    }

    /// Compact form type name used in ICS-DES headers
    pub fn type_code(&self) -> &str {
        &self.type_code
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// All descriptors in declaration order, group columns included
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn rules(&self) -> &[CrossFieldRule] {
        &self.rules
    }

    pub fn descriptor(&self, field_id: &str) -> Option<&FieldDescriptor> {
        self.by_id.get(field_id).map(|&i| &self.fields[i])
    }

    pub fn by_short_code(&self, code: &str) -> Option<&FieldDescriptor> {
        self.by_code.get(code).map(|&i| &self.fields[i])
    }

    /// Descriptors that are not group columns, in schema order
    pub fn top_level(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.group.is_none())
    }

    /// Column descriptors of a group, in schema order
    pub fn columns<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a FieldDescriptor> {
        self.fields
            .iter()
            .filter(move |f| f.group.as_deref() == Some(group))
    }

    /// Build the lookup indexes and check the schema is self-consistent.
    pub(crate) fn seal(mut self) -> Result<Self, SchemaError> {
        let form_type = self.form_type.clone();

        if !is_code(&self.type_code) {
            return Err(SchemaError::invalid(
                &form_type,
                format!("type code '{}' is not a valid token", self.type_code),
            ));
        }

        self.by_id.clear();
        self.by_code.clear();
        for (i, field) in self.fields.iter().enumerate() {
            if field.field_id.is_empty() {
                return Err(SchemaError::invalid(&form_type, "empty field id"));
            }
            if !is_code(&field.short_code) {
                return Err(SchemaError::invalid(
                    &form_type,
                    format!(
                        "short code '{}' of field '{}' is not a valid token",
                        field.short_code, field.field_id
                    ),
                ));
            }
            if self.by_id.insert(field.field_id.clone(), i).is_some() {
                return Err(SchemaError::invalid(
                    &form_type,
                    format!("duplicate field id '{}'", field.field_id),
                ));
            }
            if self.by_code.insert(field.short_code.clone(), i).is_some() {
                return Err(SchemaError::invalid(
                    &form_type,
                    format!("duplicate short code '{}'", field.short_code),
                ));
            }
            if let SemanticType::Enum { choices } = &field.semantic_type {
                if choices.is_empty() {
                    return Err(SchemaError::invalid(
                        &form_type,
                        format!("enum field '{}' declares no choices", field.field_id),
                    ));
                }
            }
            if let Some(default) = &field.default {
                if default.kind() != field.semantic_type.kind() {
                    return Err(SchemaError::invalid(
                        &form_type,
                        format!(
                            "default of '{}' is {} but the field is {}",
                            field.field_id,
                            default.kind(),
                            field.semantic_type.kind()
                        ),
                    ));
                }
            }
        }

        for field in &self.fields {
            let Some(group) = &field.group else { continue };
            if field.is_group() {
                return Err(SchemaError::invalid(
                    &form_type,
                    format!("group '{}' cannot nest inside '{}'", field.field_id, group),
                ));
            }
            match self.descriptor(group) {
                Some(owner) if owner.is_group() && owner.group.is_none() => {}
                _ => {
                    return Err(SchemaError::invalid(
                        &form_type,
                        format!(
                            "column '{}' names '{}' which is not a top-level group",
                            field.field_id, group
                        ),
                    ))
                }
            }
        }

        for rule in &self.rules {
            self.check_rule(rule)?;
        }

        Ok(self)
    }

    fn check_rule(&self, rule: &CrossFieldRule) -> Result<(), SchemaError> {
        let mut refs: Vec<(&str, Option<ValueKind>)> = Vec::new();
        match rule {
            CrossFieldRule::NotBefore { start, end } => {
                for (field, kind) in start.referenced().into_iter().chain(end.referenced()) {
                    refs.push((field, Some(kind)));
                }
            }
            CrossFieldRule::MinRows { group, .. } => refs.push((group, Some(ValueKind::Group))),
            CrossFieldRule::RequiredWith { field, trigger } => {
                refs.push((field, None));
                refs.push((trigger, None));
            }
        }

        for (field, kind) in refs {
            let descriptor = self
                .descriptor(field)
                .filter(|d| d.group.is_none())
                .ok_or_else(|| {
                    SchemaError::invalid(
                        &self.form_type,
                        format!("rule references unknown top-level field '{}'", field),
                    )
                })?;
            if let Some(kind) = kind {
                if descriptor.semantic_type.kind() != kind {
                    return Err(SchemaError::invalid(
                        &self.form_type,
                        format!("rule expects '{}' to be {}", field, kind),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Codes travel inside ICS-DES tokens, so they may not contain any of the
/// grammar's separators.
fn is_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}
