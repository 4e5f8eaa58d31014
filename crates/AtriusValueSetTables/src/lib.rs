//! # Value Set Tables
//!
//! This crate materializes FHIR ValueSet expansions into a warehouse table so
//! that SQL-on-FHIR views can test code membership with a join instead of a
//! terminology call at query time. The table follows the SQL-on-FHIR
//! [value set support](https://github.com/FHIR/sql-on-fhir/blob/master/sql-on-fhir.md#valueset-support)
//! convention: one row per `(valueseturi, valuesetversion, system, code)`.
//!
//! ## Architecture
//!
//! - **Table provisioning** ([`table`]): the fixed schema and [`ensure_table`]
//! - **Row batching** ([`batch`]): value sets to bounded batches of [`CodeRow`]s
//! - **SQL rendering** ([`sql`]): one deduplicating `INSERT ... SELECT` per batch
//! - **Expansion** ([`expansion`]): [`ExpansionSource`] over a local
//!   [`ValueSetResolver`] or a remote [`TerminologyService`]
//! - **Orchestration** ([`manager`]): [`ValueSetManager`]
//! - **Warehouse** ([`warehouse`], [`bigquery`]): the [`WarehouseClient`]
//!   capability and its BigQuery REST implementation
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use atrius_value_set_tables::{
//!     BigQueryClient, BigQueryConfig, ExpansionSource, TerminologyServiceClient,
//!     ValueSet, ValueSetManager,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BigQueryClient::new(
//!     BigQueryConfig::new("my-project").with_access_token("ya29...."),
//! );
//! let manager = ValueSetManager::from_table_id(client, "terminology.valueset_codes")?;
//!
//! // Pre-expanded value sets
//! let vs = ValueSet::new(
//!     "http://x/vs1",
//!     Some("1".to_string()),
//!     [("sys1", "a"), ("sys2", "b")],
//! );
//! manager.materialize_value_sets(vec![vs], 500).await?;
//!
//! // Expansion through a terminology service inferred from each URL's domain
//! let source = ExpansionSource::service(TerminologyServiceClient::new(), None);
//! manager
//!     .materialize_value_set_expansion(
//!         ["http://hl7.org/fhir/ValueSet/administrative-gender"],
//!         &source,
//!         500,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - Rows already present in the table are never inserted again and never
//!   modified, so repeating a call is safe.
//! - Each insert holds at most `batch_size` rows and runs to completion before
//!   the next one starts.
//! - Failures abort the call immediately; earlier batches stay committed.

pub mod batch;
pub mod bigquery;
pub mod error;
pub mod expansion;
pub mod manager;
pub mod models;
pub mod resolver;
pub mod sql;
pub mod table;
pub mod terminology_client;
pub mod warehouse;

pub use batch::{CodeRowBatcher, DEFAULT_BATCH_SIZE};
pub use bigquery::{BigQueryClient, BigQueryConfig};
pub use error::{ExpansionError, MaterializeError, MaterializeResult, ServiceError, WarehouseError};
pub use expansion::{Expander, ExpansionSource, TerminologyService, ValueSetResolver};
pub use manager::{MaterializeReport, ValueSetManager};
pub use models::{CodeRow, ValueSet};
pub use resolver::LocalValueSetResolver;
pub use table::{TableReference, ensure_table, value_set_codes_schema};
pub use terminology_client::TerminologyServiceClient;
pub use warehouse::{FieldMode, SchemaField, Table, WarehouseClient};
