//! Error types for value set materialization.
//!
//! Each external collaborator gets its own error enum so callers can tell a
//! terminology failure from a warehouse failure. [`MaterializeError`] wraps
//! them with the context of the operation that failed (the value set URL or
//! the index of the batch being inserted).

use thiserror::Error;

/// Result type alias for materialization operations
pub type MaterializeResult<T> = Result<T, MaterializeError>;

/// Errors raised by a [`WarehouseClient`](crate::warehouse::WarehouseClient).
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The table identifier could not be parsed into project, dataset and table.
    #[error("Invalid table reference: {0}")]
    InvalidTableReference(String),

    /// The request never produced a response (connection, TLS, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The warehouse answered with a non-success status.
    #[error("Warehouse API error {status}: {message}")]
    Api { status: u16, message: String },

    /// A query job completed but reported errors.
    #[error("Query job failed: {0}")]
    Job(String),

    /// The response body did not have the expected shape.
    #[error("Failed to parse warehouse response: {0}")]
    Parse(String),
}

/// Errors raised by a local [`ValueSetResolver`](crate::expansion::ValueSetResolver).
#[derive(Debug, Error)]
pub enum ExpansionError {
    /// No value set with this URL (and version) is known to the resolver.
    #[error("Unknown value set: {0}")]
    UnknownValueSet(String),

    /// The value set is known but cannot be expanded without a terminology service.
    #[error("Value set {0} cannot be expanded locally; a terminology service is required")]
    RequiresTerminologyService(String),

    /// A value set definition could not be read or parsed.
    #[error("Invalid value set definition in {location}: {message}")]
    InvalidDefinition { location: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a remote [`TerminologyService`](crate::expansion::TerminologyService).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No default terminology service is known for the value set URL's domain.
    #[error("Unable to infer a terminology service for value set URL {0}")]
    UnknownDomain(String),

    /// The value set URL or service URL is not a valid URL.
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    /// The terminology service answered with a non-success status.
    #[error("ValueSet expansion failed with status {status}: {body}")]
    Http { status: u16, body: String },

    /// The service response was not a usable ValueSet.
    #[error("Malformed terminology service response: {0}")]
    Parse(String),
}

/// Errors surfaced by [`ValueSetManager`](crate::manager::ValueSetManager).
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// An invalid combination of arguments, detected before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The local resolver failed to expand a value set URL.
    #[error("Failed to expand value set {url}: {source}")]
    Expansion {
        url: String,
        #[source]
        source: ExpansionError,
    },

    /// The terminology service failed to expand a value set URL.
    #[error("Terminology service failed to expand value set {url}: {source}")]
    Service {
        url: String,
        #[source]
        source: ServiceError,
    },

    /// A value set in the input cannot produce rows (for example it has no `url`).
    #[error("Invalid value set: {0}")]
    InvalidValueSet(String),

    /// The target table could not be created or looked up.
    #[error("Failed to provision value set codes table: {0}")]
    TableProvisioning(#[source] WarehouseError),

    /// An insert statement failed. Batches before `batch_index` are committed.
    #[error("Failed to insert batch {batch_index} ({rows} rows): {source}")]
    BatchInsert {
        batch_index: usize,
        rows: usize,
        #[source]
        source: WarehouseError,
    },
}

impl MaterializeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
