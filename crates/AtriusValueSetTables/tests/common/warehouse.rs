//! In-memory warehouse that understands the insert statements rendered by
//! `atrius_value_set_tables::sql`, applying their "insert rows not already
//! present" semantics to a vector of rows.

use async_trait::async_trait;
use atrius_value_set_tables::{
    CodeRow, SchemaField, Table, TableReference, WarehouseClient, WarehouseError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CreateTable(String),
    Run { rows: usize },
    Expand(String),
}

/// Ordered record of calls shared between fakes.
pub type EventLog = Arc<Mutex<Vec<Event>>>;

#[derive(Default)]
struct State {
    tables: HashMap<TableReference, Table>,
    rows: Vec<CodeRow>,
    statements: Vec<String>,
    run_calls: usize,
}

pub struct FakeWarehouse {
    project: String,
    state: Mutex<State>,
    fail_runs: HashSet<usize>,
    events: EventLog,
}

impl FakeWarehouse {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            state: Mutex::new(State::default()),
            fail_runs: HashSet::new(),
            events: EventLog::default(),
        }
    }

    /// Makes the `index`-th call to `run` (0-based) fail.
    pub fn failing_run(mut self, index: usize) -> Self {
        self.fail_runs.insert(index);
        self
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn with_existing_table(self, table: Table) -> Self {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(table.reference.clone(), table);
        self
    }

    pub fn rows(&self) -> Vec<CodeRow> {
        self.state.lock().unwrap().rows.clone()
    }

    pub fn sorted_rows(&self) -> Vec<CodeRow> {
        let mut rows = self.rows();
        rows.sort();
        rows
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn table(&self, reference: &TableReference) -> Option<Table> {
        self.state.lock().unwrap().tables.get(reference).cloned()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::CreateTable(_)))
            .count()
    }
}

#[async_trait]
impl WarehouseClient for FakeWarehouse {
    fn default_project(&self) -> &str {
        &self.project
    }

    async fn create_table(
        &self,
        reference: &TableReference,
        schema: &[SchemaField],
        clustering_fields: &[&str],
    ) -> Result<Table, WarehouseError> {
        self.events
            .lock()
            .unwrap()
            .push(Event::CreateTable(reference.to_string()));
        let mut state = self.state.lock().unwrap();
        let table = state
            .tables
            .entry(reference.clone())
            .or_insert_with(|| Table {
                reference: reference.clone(),
                schema: schema.to_vec(),
                clustering_fields: clustering_fields.iter().map(|f| f.to_string()).collect(),
            })
            .clone();
        Ok(table)
    }

    async fn run(&self, sql: &str) -> Result<(), WarehouseError> {
        let rows = parse_insert_rows(sql)?;
        self.events
            .lock()
            .unwrap()
            .push(Event::Run { rows: rows.len() });

        let mut state = self.state.lock().unwrap();
        let call = state.run_calls;
        state.run_calls += 1;
        if self.fail_runs.contains(&call) {
            return Err(WarehouseError::Job(format!("injected failure on run {}", call)));
        }

        state.statements.push(sql.to_string());
        for row in rows {
            if !state.rows.contains(&row) {
                state.rows.push(row);
            }
        }
        Ok(())
    }
}

/// Extracts the row tuples of a rendered insert statement.
pub fn parse_insert_rows(sql: &str) -> Result<Vec<CodeRow>, WarehouseError> {
    if !sql.starts_with("INSERT INTO `") || !sql.contains("WHERE NOT EXISTS (") {
        return Err(WarehouseError::Job(format!("unexpected statement: {}", sql)));
    }
    let start = sql
        .find(">>[\n")
        .ok_or_else(|| WarehouseError::Job("no row array".to_string()))?
        + 4;
    let end = sql
        .find("\n]) AS codes")
        .ok_or_else(|| WarehouseError::Job("unterminated row array".to_string()))?;

    sql[start..end]
        .lines()
        .map(|line| {
            let tuple = line
                .trim()
                .trim_end_matches(',')
                .strip_prefix('(')
                .and_then(|t| t.strip_suffix(')'))
                .ok_or_else(|| WarehouseError::Job(format!("bad tuple: {}", line)))?;
            match parse_literals(tuple).as_slice() {
                [Some(uri), version, Some(system), Some(code)] => Ok(CodeRow {
                    valueset_uri: uri.clone(),
                    valueset_version: version.clone(),
                    system: system.clone(),
                    code: code.clone(),
                }),
                other => Err(WarehouseError::Job(format!("bad row: {:?}", other))),
            }
        })
        .collect()
}

fn parse_literals(tuple: &str) -> Vec<Option<String>> {
    let mut values = Vec::new();
    let mut chars = tuple.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | ',' => {
                chars.next();
            }
            'N' => {
                for _ in 0..4 {
                    chars.next();
                }
                values.push(None);
            }
            '\'' => {
                chars.next();
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\'' => break,
                        '\\' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('r') => value.push('\r'),
                            Some('t') => value.push('\t'),
                            Some('u') => {
                                let hex: String = (0..4).filter_map(|_| chars.next()).collect();
                                if let Some(ch) =
                                    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                                {
                                    value.push(ch);
                                }
                            }
                            Some(other) => value.push(other),
                            None => {}
                        },
                        c => value.push(c),
                    }
                }
                values.push(Some(value));
            }
            _ => {
                chars.next();
            }
        }
    }
    values
}
