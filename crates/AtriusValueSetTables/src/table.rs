//! The value set codes table: its identity, its fixed schema, and provisioning.
//!
//! The schema follows the SQL-on-FHIR value set support convention
//! (<https://github.com/FHIR/sql-on-fhir/blob/master/sql-on-fhir.md#valueset-support>)
//! and must not be changed:
//!
//! ```text
//! valueseturi      STRING  REQUIRED
//! valuesetversion  STRING  NULLABLE
//! system           STRING  REQUIRED
//! code             STRING  REQUIRED
//! CLUSTER BY valueseturi, code
//! ```

use crate::error::WarehouseError;
use crate::warehouse::{FieldMode, SchemaField, Table, WarehouseClient};
use std::fmt;
use tracing::info;

pub const VALUESET_URI_COLUMN: &str = "valueseturi";
pub const VALUESET_VERSION_COLUMN: &str = "valuesetversion";
pub const SYSTEM_COLUMN: &str = "system";
pub const CODE_COLUMN: &str = "code";

/// Column order used both for the table schema and for insert statements.
pub const COLUMNS: [&str; 4] = [
    VALUESET_URI_COLUMN,
    VALUESET_VERSION_COLUMN,
    SYSTEM_COLUMN,
    CODE_COLUMN,
];

pub const CLUSTERING_FIELDS: [&str; 2] = [VALUESET_URI_COLUMN, CODE_COLUMN];

/// The schema of the value set codes table.
pub fn value_set_codes_schema() -> Vec<SchemaField> {
    vec![
        SchemaField::new(VALUESET_URI_COLUMN, "STRING", FieldMode::Required),
        SchemaField::new(VALUESET_VERSION_COLUMN, "STRING", FieldMode::Nullable),
        SchemaField::new(SYSTEM_COLUMN, "STRING", FieldMode::Required),
        SchemaField::new(CODE_COLUMN, "STRING", FieldMode::Required),
    ]
}

/// Fully qualified `project.dataset.table` identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    pub project: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableReference {
    pub fn new(
        project: impl Into<String>,
        dataset_id: impl Into<String>,
        table_id: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset_id: dataset_id.into(),
            table_id: table_id.into(),
        }
    }

    /// Parses `dataset.table` or `project.dataset.table`.
    ///
    /// The two-part form is qualified with `default_project`.
    pub fn parse(identifier: &str, default_project: &str) -> Result<Self, WarehouseError> {
        let parts: Vec<&str> = identifier.trim().split('.').collect();
        let (project, dataset, table) = match parts.as_slice() {
            [dataset, table] => (default_project, *dataset, *table),
            [project, dataset, table] => (*project, *dataset, *table),
            _ => {
                return Err(WarehouseError::InvalidTableReference(format!(
                    "'{}' must be 'dataset.table' or 'project.dataset.table'",
                    identifier
                )));
            }
        };

        if project.is_empty() || dataset.is_empty() || table.is_empty() {
            return Err(WarehouseError::InvalidTableReference(format!(
                "'{}' has an empty project, dataset or table component",
                identifier
            )));
        }

        Ok(Self::new(project, dataset, table))
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset_id, self.table_id)
    }
}

/// Creates the value set codes table if it does not already exist.
///
/// An existing table is returned as-is; its schema is not validated.
pub async fn ensure_table<W>(client: &W, reference: &TableReference) -> Result<Table, WarehouseError>
where
    W: WarehouseClient + ?Sized,
{
    info!("Ensuring value set codes table {} exists", reference);
    client
        .create_table(reference, &value_set_codes_schema(), &CLUSTERING_FIELDS)
        .await
}
