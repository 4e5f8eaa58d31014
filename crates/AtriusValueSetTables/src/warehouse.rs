//! The warehouse capability consumed by the materialization engine.
//!
//! The engine needs exactly two things from a warehouse: create a table if it
//! is missing, and run a literal SQL statement to completion. [`BigQueryClient`]
//! is the production implementation; tests substitute an in-memory fake.
//!
//! [`BigQueryClient`]: crate::bigquery::BigQueryClient

use crate::error::WarehouseError;
use crate::table::TableReference;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Column mode of a [`SchemaField`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    Nullable,
}

/// One column of a table schema, shaped like a BigQuery `TableFieldSchema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: FieldMode,
}

impl SchemaField {
    pub fn new(name: &str, field_type: &str, mode: FieldMode) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode,
        }
    }
}

/// A table as reported by the warehouse after creation or lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub reference: TableReference,
    pub schema: Vec<SchemaField>,
    pub clustering_fields: Vec<String>,
}

impl Table {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.schema.iter().map(|field| field.name.as_str())
    }
}

/// A warehouse that can host the value set codes table.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Project used to qualify two-part table identifiers.
    fn default_project(&self) -> &str;

    /// Creates the table if it does not exist and returns it.
    ///
    /// An existing table is returned unchanged, even when its schema differs.
    /// Losing a creation race must also resolve to the existing table.
    async fn create_table(
        &self,
        reference: &TableReference,
        schema: &[SchemaField],
        clustering_fields: &[&str],
    ) -> Result<Table, WarehouseError>;

    /// Runs a literal SQL statement and waits for it to complete.
    async fn run(&self, sql: &str) -> Result<(), WarehouseError>;
}
