//! Table schema: field names, types, and widths (C8).

use crate::error::{DbError, Result};
use crate::storage::Page;
use std::collections::HashMap;

/// A closed set of storable field types. There is no user-extensible type
/// system — adding a type means adding a variant here and a case in every
/// match on it, which is the point: every field width is known statically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    TinyInt,
    SmallInt,
    Int,
    Long,
    /// A short, fixed-capacity identifier string (table/column names and
    /// similar), capped at 32 bytes of UTF-8 before length-prefixing.
    Name,
    /// Free-form text capped at `max_len` bytes before length-prefixing.
    VarlenText { max_len: usize },
}

impl FieldType {
    pub const NAME_MAX_LEN: usize = 32;

    pub fn is_fixed_len(self) -> bool {
        matches!(
            self,
            FieldType::TinyInt | FieldType::SmallInt | FieldType::Int | FieldType::Long
        )
    }

    /// Worst-case bytes this field occupies in a record, length prefix included.
    pub fn max_bytes(self) -> usize {
        match self {
            FieldType::TinyInt => 1,
            FieldType::SmallInt => 2,
            FieldType::Int => 4,
            FieldType::Long => 8,
            FieldType::Name => Page::max_length_for_bytes(Self::NAME_MAX_LEN),
            FieldType::VarlenText { max_len } => Page::max_length_for_bytes(max_len),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<String>,
    info: HashMap<String, FieldType>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_field(&mut self, name: impl Into<String>, field_type: FieldType) {
        let name = name.into();
        if !self.info.contains_key(&name) {
            self.fields.push(name.clone());
        }
        self.info.insert(name, field_type);
    }

    pub fn add_tiny_int(&mut self, name: impl Into<String>) {
        self.add_field(name, FieldType::TinyInt);
    }

    pub fn add_small_int(&mut self, name: impl Into<String>) {
        self.add_field(name, FieldType::SmallInt);
    }

    pub fn add_int(&mut self, name: impl Into<String>) {
        self.add_field(name, FieldType::Int);
    }

    pub fn add_long(&mut self, name: impl Into<String>) {
        self.add_field(name, FieldType::Long);
    }

    pub fn add_name(&mut self, name: impl Into<String>) {
        self.add_field(name, FieldType::Name);
    }

    pub fn add_varlen_text(&mut self, name: impl Into<String>, max_len: usize) {
        self.add_field(name, FieldType::VarlenText { max_len });
    }

    /// Copies one field's type definition from another schema, matching the
    /// common "project this column from table A into the index/view schema"
    /// use.
    pub fn add(&mut self, name: &str, other: &Schema) -> Result<()> {
        let field_type = other.field_type(name)?;
        self.add_field(name, field_type);
        Ok(())
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.info.contains_key(name)
    }

    pub fn field_type(&self, name: &str) -> Result<FieldType> {
        self.info
            .get(name)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("field '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_kept_in_insertion_order() {
        let mut schema = Schema::new();
        schema.add_int("id");
        schema.add_name("name");
        schema.add_varlen_text("bio", 200);
        assert_eq!(schema.fields(), &["id", "name", "bio"]);
        assert_eq!(schema.field_type("id").unwrap(), FieldType::Int);
        assert!(schema.field_type("bio").unwrap().max_bytes() > 200);
    }

    #[test]
    fn re_adding_a_field_replaces_its_type_without_duplicating() {
        let mut schema = Schema::new();
        schema.add_int("id");
        schema.add_long("id");
        assert_eq!(schema.fields().len(), 1);
        assert_eq!(schema.field_type("id").unwrap(), FieldType::Long);
    }

    #[test]
    fn field_type_of_unknown_field_is_not_found() {
        let schema = Schema::new();
        assert!(matches!(
            schema.field_type("missing"),
            Err(crate::error::DbError::NotFound(_))
        ));
    }
}
