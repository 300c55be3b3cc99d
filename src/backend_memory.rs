//! In-process table store with the hosted service's query and error surface.
//!
//! Used by the test-suite and by `Marketplace::in_memory` for offline runs.
//! Missing tables fail with the same "relation does not exist" error the
//! real service returns, and `create_<table>_table` RPCs create them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::backend::{Backend, BackendFactory};
use crate::client::created_table;
use crate::errors::BackendError;
use crate::headers::HeaderSet;
use crate::query::{compare, loose_eq, Direction, Operation, Query};

/// One request as the store saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub table: String,
    pub operation: &'static str,
    pub headers: HeaderSet,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Value>>,
    next_ids: HashMap<String, i64>,
    failures: HashMap<String, BackendError>,
    calls: Vec<RecordedCall>,
}

/// Shared table data. Backends built from it see the same rows.
#[derive(Default)]
pub struct MemoryDatabase {
    inner: RwLock<Inner>,
}

fn poisoned() -> BackendError {
    BackendError::other("memory database lock poisoned")
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A database with the given tables created and empty.
    pub fn with_tables(tables: &[&str]) -> Self {
        let db = Self::new();
        for table in tables {
            db.create_table(table);
        }
        db
    }

    pub fn create_table(&self, table: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.tables.entry(table.to_string()).or_default();
        }
    }

    pub fn drop_table(&self, table: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.tables.remove(table);
        }
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.inner
            .read()
            .map(|inner| inner.tables.contains_key(table))
            .unwrap_or(false)
    }

    /// Insert rows as-is, creating the table when needed.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        if let Ok(mut inner) = self.inner.write() {
            let inner = &mut *inner;
            let next = inner.next_ids.entry(table.to_string()).or_insert(1);
            for row in &rows {
                if let Some(id) = row.get("id").and_then(Value::as_i64) {
                    *next = (*next).max(id + 1);
                }
            }
            inner.tables.entry(table.to_string()).or_default().extend(rows);
        }
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.tables.get(table).cloned())
            .unwrap_or_default()
    }

    /// Make every request against `table` fail with `error`.
    pub fn fail_table(&self, table: &str, error: BackendError) {
        if let Ok(mut inner) = self.inner.write() {
            inner.failures.insert(table.to_string(), error);
        }
    }

    /// Make every call to the RPC `function` fail with `error`.
    pub fn fail_function(&self, function: &str, error: BackendError) {
        self.fail_table(&format!("rpc/{function}"), error);
    }

    pub fn clear_failure(&self, table: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.failures.remove(table);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.read().map(|inner| inner.calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, table: &str) -> usize {
        self.inner
            .read()
            .map(|inner| inner.calls.iter().filter(|c| c.table == table).count())
            .unwrap_or(0)
    }

    fn run(&self, query: &Query, headers: &HeaderSet) -> Result<Vec<Value>, BackendError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;

        inner.calls.push(RecordedCall {
            table: query.table.clone(),
            operation: operation_name(&query.operation),
            headers: headers.clone(),
        });

        if let Some(err) = inner.failures.get(&query.table) {
            return Err(err.clone().on_table(&query.table));
        }

        if !inner.tables.contains_key(&query.table) {
            return Err(BackendError::schema_missing(&query.table));
        }

        match &query.operation {
            Operation::Select => {
                let rows = inner.tables.get(&query.table).cloned().unwrap_or_default();
                let mut selected: Vec<Value> = rows
                    .into_iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .collect();

                sort_rows(&mut selected, query);

                if let Some((from, to)) = query.range {
                    let count = to.saturating_sub(from).saturating_add(1);
                    selected = selected.into_iter().skip(from).take(count).collect();
                }

                let projected = selected
                    .into_iter()
                    .map(|row| project(row, &query.columns))
                    .collect();

                Ok(attach_embeds(&inner.tables, &query.table, projected, query))
            }
            Operation::Insert(rows) => {
                let mut inserted = Vec::with_capacity(rows.len());
                for row in rows {
                    let row = inner.prepare_insert(&query.table, row.clone());
                    inner.table_mut(&query.table).push(row.clone());
                    inserted.push(row);
                }
                Ok(inserted)
            }
            Operation::Upsert { rows, on_conflict } => {
                let mut written = Vec::with_capacity(rows.len());
                for row in rows {
                    let key = row.get(on_conflict).cloned().unwrap_or(Value::Null);
                    let existing = inner
                        .table_mut(&query.table)
                        .iter_mut()
                        .find(|r| !key.is_null() && loose_eq(r.get(on_conflict).unwrap_or(&Value::Null), &key));

                    match existing {
                        Some(current) => {
                            merge(current, row);
                            written.push(current.clone());
                        }
                        None => {
                            let row = inner.prepare_insert(&query.table, row.clone());
                            inner.table_mut(&query.table).push(row.clone());
                            written.push(row);
                        }
                    }
                }
                Ok(written)
            }
            Operation::Update(patch) => {
                let mut updated = Vec::new();
                for row in inner.table_mut(&query.table).iter_mut() {
                    if query.filters.iter().all(|f| f.matches(row)) {
                        merge(row, patch);
                        updated.push(row.clone());
                    }
                }
                Ok(updated)
            }
            Operation::Delete => {
                let table = inner.table_mut(&query.table);
                let (removed, kept): (Vec<Value>, Vec<Value>) = table
                    .drain(..)
                    .partition(|row| query.filters.iter().all(|f| f.matches(row)));
                *table = kept;
                Ok(removed)
            }
        }
    }

    fn call_function(&self, function: &str, headers: &HeaderSet) -> Result<Value, BackendError> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let key = format!("rpc/{function}");
        inner.calls.push(RecordedCall {
            table: key.clone(),
            operation: "rpc",
            headers: headers.clone(),
        });
        if let Some(err) = inner.failures.get(&key) {
            return Err(err.clone());
        }

        match created_table(function) {
            Some(table) => {
                inner.tables.entry(table.to_string()).or_default();
                inner.failures.remove(table);
                Ok(Value::Bool(true))
            }
            None => Err(BackendError::classify(
                Some("PGRST202"),
                format!("Could not find the function public.{function}"),
            )),
        }
    }
}

impl Inner {
    fn table_mut(&mut self, table: &str) -> &mut Vec<Value> {
        self.tables.entry(table.to_string()).or_default()
    }

    fn prepare_insert(&mut self, table: &str, mut row: Value) -> Value {
        if let Value::Object(map) = &mut row {
            if !map.contains_key("id") {
                let next = self.next_ids.entry(table.to_string()).or_insert(1);
                map.insert("id".to_string(), Value::from(*next));
                *next += 1;
            } else if let Some(id) = map.get("id").and_then(Value::as_i64) {
                let next = self.next_ids.entry(table.to_string()).or_insert(1);
                *next = (*next).max(id + 1);
            }
            map.entry("created_at")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        }
        row
    }
}

fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Select => "select",
        Operation::Insert(_) => "insert",
        Operation::Update(_) => "update",
        Operation::Upsert { .. } => "upsert",
        Operation::Delete => "delete",
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

fn sort_rows(rows: &mut [Value], query: &Query) {
    if query.order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for order in &query.order {
            let left = a.get(&order.column).unwrap_or(&Value::Null);
            let right = b.get(&order.column).unwrap_or(&Value::Null);
            let ord = match (left.is_null(), right.is_null()) {
                (true, true) => std::cmp::Ordering::Equal,
                // nulls last regardless of direction
                (true, false) => return std::cmp::Ordering::Greater,
                (false, true) => return std::cmp::Ordering::Less,
                _ => compare(left, right).unwrap_or(std::cmp::Ordering::Equal),
            };
            let ord = match order.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Keep only the plain columns named in `columns` (`*` keeps everything).
fn project(row: Value, columns: &str) -> Value {
    let plain: Vec<&str> = columns
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty() && !c.contains('(') && !c.contains(')'))
        .collect();

    if plain.is_empty() || plain.contains(&"*") {
        return row;
    }

    match row {
        Value::Object(map) => {
            let kept: Map<String, Value> = map
                .into_iter()
                .filter(|(k, _)| plain.contains(&k.as_str()))
                .collect();
            Value::Object(kept)
        }
        other => other,
    }
}

fn singular(table: &str) -> String {
    if let Some(stem) = table.strip_suffix("ies") {
        format!("{stem}y")
    } else if let Some(stem) = table.strip_suffix('s') {
        stem.to_string()
    } else {
        table.to_string()
    }
}

/// Resolve `related(*)` entries: many-to-one when the parent row carries
/// `<related>_id`, otherwise one-to-many via `<parent>_id` on the related rows.
fn attach_embeds(
    tables: &HashMap<String, Vec<Value>>,
    parent_table: &str,
    rows: Vec<Value>,
    query: &Query,
) -> Vec<Value> {
    let embeds = query.embeds();
    if embeds.is_empty() {
        return rows;
    }

    rows.into_iter()
        .map(|mut row| {
            for embed in &embeds {
                let related = tables.get(&embed.table).cloned().unwrap_or_default();
                let nested = Query::table(embed.table.clone()).select(embed.columns.clone());
                let fk_on_parent = format!("{}_id", singular(&embed.table));

                let value = match row.get(&fk_on_parent).cloned() {
                    Some(fk) if !fk.is_null() => {
                        let found: Vec<Value> = related
                            .into_iter()
                            .filter(|r| loose_eq(r.get("id").unwrap_or(&Value::Null), &fk))
                            .take(1)
                            .map(|r| project(r, &embed.columns))
                            .collect();
                        attach_embeds(tables, &embed.table, found, &nested)
                            .into_iter()
                            .next()
                            .unwrap_or(Value::Null)
                    }
                    _ => {
                        let fk_on_child = format!("{}_id", singular(parent_table));
                        let parent_id = row.get("id").cloned().unwrap_or(Value::Null);
                        let children: Vec<Value> = related
                            .into_iter()
                            .filter(|r| loose_eq(r.get(&fk_on_child).unwrap_or(&Value::Null), &parent_id))
                            .map(|r| project(r, &embed.columns))
                            .collect();
                        Value::Array(attach_embeds(tables, &embed.table, children, &nested))
                    }
                };

                if let Value::Object(map) = &mut row {
                    map.insert(embed.name.clone(), value);
                }
            }
            row
        })
        .collect()
}

/// A view of a `MemoryDatabase` carrying one header set.
pub struct MemoryBackend {
    db: Arc<MemoryDatabase>,
    headers: HeaderSet,
}

impl MemoryBackend {
    pub fn new(db: Arc<MemoryDatabase>, headers: HeaderSet) -> Self {
        Self { db, headers }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn execute(&self, query: &Query) -> Result<Vec<Value>, BackendError> {
        self.db.run(query, &self.headers)
    }

    async fn rpc(&self, function: &str, _args: Value) -> Result<Value, BackendError> {
        self.db.call_function(function, &self.headers)
    }

    fn headers(&self) -> &HeaderSet {
        &self.headers
    }
}

pub struct MemoryBackendFactory {
    db: Arc<MemoryDatabase>,
    base_credential: String,
}

impl MemoryBackendFactory {
    pub fn new(db: Arc<MemoryDatabase>, base_credential: impl Into<String>) -> Self {
        Self {
            db,
            base_credential: base_credential.into(),
        }
    }

    pub fn database(&self) -> Arc<MemoryDatabase> {
        Arc::clone(&self.db)
    }
}

impl BackendFactory for MemoryBackendFactory {
    fn build(&self, headers: &HeaderSet) -> Result<Arc<dyn Backend>, BackendError> {
        Ok(Arc::new(MemoryBackend::new(Arc::clone(&self.db), headers.clone())))
    }

    fn base_credential(&self) -> &str {
        &self.base_credential
    }
}
