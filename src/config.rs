//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Construction parameters for a [`Store`](crate::Store).
///
/// The config is serde-friendly so it can be loaded from JSON alongside the
/// initial data set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Field that uniquely identifies each entity.
    pub primary_key: String,
    /// Fields that get a secondary index at construction.
    #[serde(default)]
    pub indexed_fields: Vec<String>,
}

impl StoreConfig {
    #[must_use]
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            indexed_fields: Vec::new(),
        }
    }

    /// Declare an additional indexed field.
    #[must_use]
    pub fn with_index(mut self, field: impl Into<String>) -> Self {
        self.indexed_fields.push(field.into());
        self
    }

    /// Check the config and return the de-duplicated index field list.
    pub(crate) fn validate(&self) -> Result<Vec<String>, ValidationError> {
        if self.primary_key.trim().is_empty() {
            return Err(ValidationError::config("primary key field cannot be empty"));
        }

        let mut fields: Vec<String> = Vec::with_capacity(self.indexed_fields.len());
        for (pos, field) in self.indexed_fields.iter().enumerate() {
            if field.trim().is_empty() {
                return Err(ValidationError::config(format!(
                    "indexed field at position {pos} is not a field name"
                )));
            }
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        Ok(fields)
    }
}
