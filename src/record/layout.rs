//! Static byte-offset layout derived from a [`Schema`] (C8 §4.8.1).
//!
//! Every record of a table has the same worst-case size: variable-length
//! fields reserve their maximum width up front, so a slot's size never
//! changes after the table is created. This is what lets the slotted page
//! place a new record without first knowing its actual content length.

use super::schema::Schema;
use crate::error::{DbError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Layout {
    schema: Schema,
    offsets: HashMap<String, usize>,
    slot_size: usize,
}

impl Layout {
    pub fn new(schema: Schema) -> Self {
        let mut offsets = HashMap::new();
        let mut pos = 0usize;
        for field in schema.fields() {
            offsets.insert(field.clone(), pos);
            pos += schema
                .field_type(field)
                .expect("field came from this schema's own field list")
                .max_bytes();
        }
        Self {
            schema,
            offsets,
            slot_size: pos,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn offset(&self, field: &str) -> Result<usize> {
        self.offsets
            .get(field)
            .copied()
            .ok_or_else(|| DbError::NotFound(format!("field '{field}'")))
    }

    /// Worst-case size, in bytes, of one record's field data (slot-header
    /// bytes tracked by the slotted page are not included here).
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }
}
