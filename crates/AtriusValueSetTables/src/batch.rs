//! Turning value sets into bounded batches of code rows.

use crate::error::MaterializeError;
use crate::models::{CodeRow, ValueSet};
use std::collections::HashSet;
use std::mem;

pub const DEFAULT_BATCH_SIZE: usize = 500;

/// The rows contributed by one value set, in expansion order.
///
/// Duplicates are kept; [`CodeRowBatcher`] collapses them.
pub fn rows_for(value_set: &ValueSet) -> Result<Vec<CodeRow>, MaterializeError> {
    let uri = value_set.url.as_deref().ok_or_else(|| {
        MaterializeError::InvalidValueSet("value set has no url".to_string())
    })?;
    let version = value_set.version.as_deref();

    Ok(value_set
        .codes()
        .into_iter()
        .map(|(system, code)| CodeRow::new(uri, version, system, code))
        .collect())
}

/// Accumulates rows from successive value sets into batches of at most
/// `batch_size` rows.
///
/// Repeated `(system, code)` pairs of the same value set are dropped before they
/// take a slot in a batch. The dedup set lives only as long as consecutive input
/// shares a `(uri, version)`, so memory stays bounded by the largest value set.
#[derive(Debug)]
pub struct CodeRowBatcher {
    batch_size: usize,
    pending: Vec<CodeRow>,
    current: Option<(String, Option<String>)>,
    seen: HashSet<CodeRow>,
}

impl CodeRowBatcher {
    pub fn new(batch_size: usize) -> Result<Self, MaterializeError> {
        if batch_size == 0 {
            return Err(MaterializeError::configuration(
                "batch_size must be at least 1",
            ));
        }
        Ok(Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
            current: None,
            seen: HashSet::new(),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Adds the rows of `value_set` and returns every batch that became full.
    pub fn push_value_set(
        &mut self,
        value_set: &ValueSet,
    ) -> Result<Vec<Vec<CodeRow>>, MaterializeError> {
        let rows = rows_for(value_set)?;

        let identity = (
            value_set.url.clone().unwrap_or_default(),
            value_set.version.clone(),
        );
        if self.current.as_ref() != Some(&identity) {
            self.seen.clear();
            self.current = Some(identity);
        }

        let mut full = Vec::new();
        for row in rows {
            if !self.seen.insert(row.clone()) {
                continue;
            }
            self.pending.push(row);
            if self.pending.len() == self.batch_size {
                full.push(mem::replace(
                    &mut self.pending,
                    Vec::with_capacity(self.batch_size),
                ));
            }
        }
        Ok(full)
    }

    /// Returns the final, partially filled batch, if any rows remain.
    pub fn finish(self) -> Option<Vec<CodeRow>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending)
        }
    }
}
