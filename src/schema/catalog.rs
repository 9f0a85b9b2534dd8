//! The schema catalog
//!
//! Maps form types (and their compact type codes) to sealed schemas. The
//! catalog is assembled through [`CatalogBuilder`] and is immutable once
//! built; there is no process-wide registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::descriptor::{CrossFieldRule, FieldDescriptor, FormSchema};
use super::SchemaError;

#[derive(Debug, Default)]
pub struct SchemaCatalog {
    forms: HashMap<String, Arc<FormSchema>>,
    codes: HashMap<String, String>,
    order: Vec<String>,
}

impl SchemaCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The catalog of representative ICS forms shipped with the crate
    pub fn standard() -> Result<Self, SchemaError> {
        super::ics::standard_catalog()
    }

    /// Schema for a form type
    pub fn lookup(&self, form_type: &str) -> Result<&Arc<FormSchema>, SchemaError> {
        self.forms
            .get(form_type)
            .ok_or_else(|| SchemaError::UnknownFormType(form_type.to_string()))
    }

    /// Ordered field descriptors for a form type
    pub fn descriptors(&self, form_type: &str) -> Result<&[FieldDescriptor], SchemaError> {
        Ok(self.lookup(form_type)?.fields())
    }

    /// Cross-field predicates declared for a form type
    pub fn validate_rules(&self, form_type: &str) -> Result<&[CrossFieldRule], SchemaError> {
        Ok(self.lookup(form_type)?.rules())
    }

    /// Schema for a compact type code as carried in ICS-DES headers
    pub fn by_type_code(&self, code: &str) -> Result<&Arc<FormSchema>, SchemaError> {
        self.codes
            .get(code)
            .and_then(|form_type| self.forms.get(form_type))
            .ok_or_else(|| SchemaError::UnknownFormType(code.to_string()))
    }

    pub fn contains(&self, form_type: &str) -> bool {
        self.forms.contains_key(form_type)
    }

    /// Registered form types in registration order
    pub fn form_types(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Assembles a [`SchemaCatalog`], sealing each schema as it is registered
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    catalog: SchemaCatalog,
}

impl CatalogBuilder {
    pub fn register(mut self, schema: FormSchema) -> Result<Self, SchemaError> {
        let schema = schema.seal()?;
        let form_type = schema.form_type().to_string();
        let code = schema.type_code().to_string();

        if self.catalog.forms.contains_key(&form_type) {
            return Err(SchemaError::DuplicateFormType(form_type));
        }
        if self.catalog.codes.contains_key(&code) {
            return Err(SchemaError::DuplicateTypeCode(code));
        }

        log::debug!(
            "Registered form type {} ({} fields, code {})",
            form_type,
            schema.fields().len(),
            code
        );
        self.catalog.codes.insert(code, form_type.clone());
        self.catalog.order.push(form_type.clone());
        self.catalog.forms.insert(form_type, Arc::new(schema));
        Ok(self)
    }

    pub fn build(self) -> SchemaCatalog {
        self.catalog
    }
}
