//! Materializing value set expansions into a warehouse table.
//!
//! [`ValueSetManager`] owns the flow from value sets to committed rows:
//!
//! 1. provision the codes table once per call;
//! 2. pull value sets one at a time from the (possibly lazy) input;
//! 3. turn each into code rows and group them into batches of `batch_size`;
//! 4. render each batch as a deduplicating insert and run it to completion
//!    before starting the next.
//!
//! There is no retry and no rollback. If batch `n` fails, batches `0..n` stay
//! committed and the error reports `batch_index = n`. Because every insert
//! skips rows that already exist, re-running the same call afterwards is safe.

use crate::batch::CodeRowBatcher;
use crate::error::{MaterializeError, MaterializeResult};
use crate::expansion::{Expander, ExpansionSource};
use crate::models::{CodeRow, ValueSet};
use crate::sql::insert_statement_for;
use crate::table::{TableReference, ensure_table};
use crate::warehouse::WarehouseClient;
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info, warn};

/// Counts from one materialization call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Value sets consumed from the input.
    pub value_sets: usize,
    /// Distinct rows submitted to the warehouse. Rows already present in the
    /// table are filtered out by the warehouse and still counted here.
    pub rows: usize,
    /// Insert statements executed.
    pub batches: usize,
}

/// Writes value set expansions into a value set codes table.
pub struct ValueSetManager<W> {
    client: W,
    value_set_codes_table: TableReference,
}

impl<W: WarehouseClient> ValueSetManager<W> {
    pub fn new(client: W, value_set_codes_table: TableReference) -> Self {
        Self {
            client,
            value_set_codes_table,
        }
    }

    /// Creates a manager from a `dataset.table` or `project.dataset.table`
    /// identifier, qualified with the client's default project when needed.
    pub fn from_table_id(client: W, table_id: &str) -> MaterializeResult<Self> {
        let reference = TableReference::parse(table_id, client.default_project())
            .map_err(|e| MaterializeError::configuration(e.to_string()))?;
        Ok(Self::new(client, reference))
    }

    pub fn value_set_codes_table(&self) -> &TableReference {
        &self.value_set_codes_table
    }

    pub fn client(&self) -> &W {
        &self.client
    }

    /// Materializes already-expanded value sets.
    ///
    /// The table is created if missing. Rows already in the table are not
    /// inserted again and existing rows are never modified.
    pub async fn materialize_value_sets<I>(
        &self,
        value_sets: I,
        batch_size: usize,
    ) -> MaterializeResult<MaterializeReport>
    where
        I: IntoIterator<Item = ValueSet>,
    {
        self.materialize(stream::iter(value_sets.into_iter().map(Ok)), batch_size)
            .await
    }

    /// Materializes a single-pass stream of value sets.
    ///
    /// The stream is polled once per value set and never restarted; an error item
    /// aborts the call after the batches already executed.
    pub async fn materialize<S>(
        &self,
        value_sets: S,
        batch_size: usize,
    ) -> MaterializeResult<MaterializeReport>
    where
        S: Stream<Item = MaterializeResult<ValueSet>>,
    {
        let mut batcher = CodeRowBatcher::new(batch_size)?;

        let table = ensure_table(&self.client, &self.value_set_codes_table)
            .await
            .map_err(MaterializeError::TableProvisioning)?;
        let target = table.reference;

        let mut report = MaterializeReport::default();
        let mut value_sets = std::pin::pin!(value_sets);

        while let Some(value_set) = value_sets.next().await {
            let value_set = value_set?;
            report.value_sets += 1;

            let url = value_set.url.as_deref().unwrap_or("<no url>");
            if value_set.is_expanded() {
                info!(
                    "Materializing value set {} (version {})",
                    url,
                    value_set.version.as_deref().unwrap_or("none")
                );
            } else {
                warn!("Value set {} has no expansion; it contributes no rows", url);
            }

            for batch in batcher.push_value_set(&value_set)? {
                self.insert_batch(&target, &batch, &mut report).await?;
            }
        }

        if let Some(batch) = batcher.finish() {
            self.insert_batch(&target, &batch, &mut report).await?;
        }

        info!(
            "Materialized {} value sets into {}: {} rows in {} batches",
            report.value_sets, target, report.rows, report.batches
        );
        Ok(report)
    }

    /// Expands each URL and materializes the results.
    ///
    /// URLs are expanded lazily and serially: URL `n + 1` is not expanded until
    /// every full batch that URL `n` produced has been inserted.
    pub async fn materialize_value_set_expansion<I, U>(
        &self,
        urls: I,
        source: &ExpansionSource,
        batch_size: usize,
    ) -> MaterializeResult<MaterializeReport>
    where
        I: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        let expanded = stream::iter(urls).then(|url| async move {
            source.expand(url.as_ref()).await
        });
        self.materialize(expanded, batch_size).await
    }

    /// Like [`materialize_value_set_expansion`](Self::materialize_value_set_expansion),
    /// pairing `expander` with an optional terminology service URL first.
    ///
    /// A service URL with a local resolver fails with
    /// [`MaterializeError::Configuration`] before any expansion or warehouse call.
    pub async fn materialize_value_set_expansion_with<I, U>(
        &self,
        urls: I,
        expander: Expander,
        terminology_service_url: Option<String>,
        batch_size: usize,
    ) -> MaterializeResult<MaterializeReport>
    where
        I: IntoIterator<Item = U>,
        U: AsRef<str>,
    {
        let source = ExpansionSource::new(expander, terminology_service_url)?;
        self.materialize_value_set_expansion(urls, &source, batch_size)
            .await
    }

    async fn insert_batch(
        &self,
        target: &TableReference,
        batch: &[CodeRow],
        report: &mut MaterializeReport,
    ) -> MaterializeResult<()> {
        let Some(sql) = insert_statement_for(target, batch) else {
            return Ok(());
        };

        let batch_index = report.batches;
        debug!("Inserting batch {} ({} rows)", batch_index, batch.len());
        debug!("{}", sql);

        self.client
            .run(&sql)
            .await
            .map_err(|source| MaterializeError::BatchInsert {
                batch_index,
                rows: batch.len(),
                source,
            })?;

        report.batches += 1;
        report.rows += batch.len();
        Ok(())
    }
}
