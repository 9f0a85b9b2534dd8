//! The validation engine
//!
//! Per-field rules run first, in schema order; cross-field rules declared by
//! the schema run afterwards, in declaration order. Validation only reads.

use std::fmt;

use chrono::NaiveDateTime;

use super::value::{FieldMap, FieldValue, GroupRow};
use crate::schema::{CrossFieldRule, FieldDescriptor, FormSchema, Moment, SemanticType};

/// Kind of rule a violation broke
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuleKind {
    MissingRequired,
    FormatInvalid,
    RangeInvalid,
    CrossFieldInconsistent,
}

/// One broken rule
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    pub field_id: String,
    pub kind: RuleKind,
    /// 1-based row, for violations inside a repeatable group
    pub row: Option<usize>,
    pub message: String,
}

impl Violation {
    fn new(field_id: &str, kind: RuleKind, message: impl Into<String>) -> Self {
        Self {
            field_id: field_id.to_string(),
            kind,
            row: None,
            message: message.into(),
        }
    }

    fn in_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "{} (row {}): {}", self.field_id, row, self.message),
            None => write!(f, "{}: {}", self.field_id, self.message),
        }
    }
}

/// Outcome of validating a form
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn for_field<'a>(&'a self, field_id: &'a str) -> impl Iterator<Item = &'a Violation> {
        self.violations.iter().filter(move |v| v.field_id == field_id)
    }

    pub fn has(&self, field_id: &str, kind: RuleKind) -> bool {
        self.for_field(field_id).any(|v| v.kind == kind)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} violation(s)", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "; {}", violation)?;
        }
        Ok(())
    }
}

/// Validate a field mapping against its schema.
pub fn validate(schema: &FormSchema, values: &FieldMap) -> ValidationReport {
    let mut violations = Vec::new();

    for descriptor in schema.top_level() {
        let value = effective(descriptor, values);
        check_field(descriptor, value, &mut violations);

        if let Some(FieldValue::Group(rows)) = value {
            for (index, row) in rows.iter().enumerate() {
                check_row(schema, descriptor, row, index + 1, &mut violations);
            }
        }
    }

    for rule in schema.rules() {
        check_rule(schema, rule, values, &mut violations);
    }

    ValidationReport { violations }
}

fn effective<'a>(descriptor: &'a FieldDescriptor, values: &'a FieldMap) -> Option<&'a FieldValue> {
    values
        .get(&descriptor.field_id)
        .or(descriptor.default.as_ref())
}

fn check_field(descriptor: &FieldDescriptor, value: Option<&FieldValue>, out: &mut Vec<Violation>) {
    let id = descriptor.field_id.as_str();
    let Some(value) = value else {
        if descriptor.required {
            out.push(Violation::new(id, RuleKind::MissingRequired, "required field is unset"));
        }
        return;
    };

    if descriptor.required && !value.holds_value() && !matches!(value, FieldValue::Boolean(_)) {
        out.push(Violation::new(id, RuleKind::MissingRequired, "required field is blank"));
        return;
    }

    match (value, &descriptor.semantic_type) {
        (FieldValue::Enum(tag), SemanticType::Enum { choices }) => {
            if !choices.iter().any(|c| c == tag) {
                out.push(Violation::new(
                    id,
                    RuleKind::FormatInvalid,
                    format!("'{}' is not one of {}", tag, choices.join(", ")),
                ));
            }
        }
        (FieldValue::Text(text), _) => {
            if let Some(max) = descriptor.max_len {
                let len = text.chars().count();
                if len > max {
                    out.push(Violation::new(
                        id,
                        RuleKind::FormatInvalid,
                        format!("{} characters exceeds the limit of {}", len, max),
                    ));
                }
            }
        }
        (FieldValue::Number(n), _) => {
            if let Some((min, max)) = descriptor.range {
                if *n < min || *n > max {
                    out.push(Violation::new(
                        id,
                        RuleKind::RangeInvalid,
                        format!("{} is outside {}..={}", n, min, max),
                    ));
                }
            }
        }
        _ => {}
    }
}

fn check_row(
    schema: &FormSchema,
    group: &FieldDescriptor,
    row: &GroupRow,
    row_number: usize,
    out: &mut Vec<Violation>,
) {
    for column in schema.columns(&group.field_id) {
        let mut found = Vec::new();
        check_field(column, effective(column, row), &mut found);
        out.extend(found.into_iter().map(|v| v.in_row(row_number)));
    }
}

fn check_rule(schema: &FormSchema, rule: &CrossFieldRule, values: &FieldMap, out: &mut Vec<Violation>) {
    match rule {
        CrossFieldRule::NotBefore { start, end } => {
            if let (Some(from), Some(to)) = (resolve(start, values), resolve(end, values)) {
                if to < from {
                    out.push(Violation::new(
                        end.anchor(),
                        RuleKind::CrossFieldInconsistent,
                        format!("{} precedes {}", to, from),
                    ));
                }
            }
        }
        CrossFieldRule::MinRows { group, min } => {
            let rows = values
                .get(group)
                .and_then(FieldValue::as_rows)
                .map_or(0, |rows| rows.len());
            // An unset required group is already reported as missing.
            let reported = rows == 0
                && schema.descriptor(group).map_or(false, |d| d.required);
            if rows < *min && !reported {
                out.push(Violation::new(
                    group,
                    RuleKind::CrossFieldInconsistent,
                    format!("needs at least {} row(s), has {}", min, rows),
                ));
            }
        }
        CrossFieldRule::RequiredWith { field, trigger } => {
            let triggered = values.get(trigger).map_or(false, FieldValue::holds_value);
            let present = values.get(field).map_or(false, FieldValue::holds_value);
            if triggered && !present {
                out.push(Violation::new(
                    field,
                    RuleKind::CrossFieldInconsistent,
                    format!("required when '{}' is filled in", trigger),
                ));
            }
        }
    }
}

fn resolve(moment: &Moment, values: &FieldMap) -> Option<NaiveDateTime> {
    match moment {
        Moment::DateTime(field) => match values.get(field) {
            Some(FieldValue::DateTime(dt)) => Some(*dt),
            _ => None,
        },
        Moment::DateAndTime { date, time } => match (values.get(date), values.get(time)) {
            (Some(FieldValue::Date(d)), Some(FieldValue::Time(t))) => Some(d.and_time(*t)),
            _ => None,
        },
    }
}
