use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use jobsync_core::{RowFields, RowId, StoredRow};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{row_title, Filters, RowStore, StoreError};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: RowId,
    rows: BTreeMap<RowId, RowFields>,
    failing_create_titles: BTreeSet<String>,
    failing_updates: BTreeSet<RowId>,
    failing_deletes: BTreeSet<RowId>,
    fail_listing: bool,
}

/// In-process row store. Backs `--dry-run` and the engine tests; individual
/// rows can be rigged to fail to exercise partial-batch handling.
#[derive(Debug, Default)]
pub struct MemoryRowStore {
    state: Mutex<MemoryState>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows keep the `id` and `created_on` they were given; rows without an
    /// id get the next free one.
    pub fn seeded(rows: impl IntoIterator<Item = Value>) -> Self {
        let mut state = MemoryState {
            next_id: 1,
            ..MemoryState::default()
        };
        for row in rows {
            let Value::Object(mut fields) = row else {
                continue;
            };
            let id = match fields.get("id").and_then(Value::as_u64) {
                Some(id) => id,
                None => {
                    let id = state.next_id;
                    fields.insert("id".into(), Value::from(id));
                    id
                }
            };
            state.next_id = state.next_id.max(id + 1);
            state.rows.insert(id, fields);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_failing_create(mut self, title: &str) -> Self {
        self.state.get_mut().failing_create_titles.insert(title.to_string());
        self
    }

    pub fn with_failing_update(mut self, row_id: RowId) -> Self {
        self.state.get_mut().failing_updates.insert(row_id);
        self
    }

    pub fn with_failing_delete(mut self, row_id: RowId) -> Self {
        self.state.get_mut().failing_deletes.insert(row_id);
        self
    }

    pub fn with_failing_listing(mut self) -> Self {
        self.state.get_mut().fail_listing = true;
        self
    }

    pub async fn snapshot(&self) -> Vec<RowFields> {
        self.state.lock().await.rows.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn to_row(fields: &RowFields) -> Result<StoredRow, StoreError> {
    serde_json::from_value(Value::Object(fields.clone())).map_err(StoreError::Encode)
}

fn matches_filters(fields: &RowFields, filters: &Filters) -> bool {
    filters.iter().all(|(key, expected)| {
        let Some(field) = key
            .strip_prefix("filter__")
            .and_then(|rest| rest.strip_suffix("__equal"))
        else {
            return true;
        };
        match fields.get(field) {
            Some(Value::String(s)) => s == expected,
            Some(Value::Object(select)) => {
                select.get("value").and_then(Value::as_str) == Some(expected.as_str())
            }
            Some(Value::Null) | None => expected.is_empty(),
            Some(other) => other.to_string() == *expected,
        }
    })
}

fn rejected(operation: &'static str, reason: impl Into<String>) -> StoreError {
    StoreError::Rejected {
        operation,
        reason: reason.into(),
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn list_all(&self, filters: &Filters) -> Result<Vec<StoredRow>, StoreError> {
        let state = self.state.lock().await;
        if state.fail_listing {
            return Err(rejected("list", "listing disabled"));
        }
        state
            .rows
            .values()
            .filter(|fields| matches_filters(fields, filters))
            .map(to_row)
            .collect()
    }

    async fn get(&self, row_id: RowId) -> Result<Option<StoredRow>, StoreError> {
        let state = self.state.lock().await;
        state.rows.get(&row_id).map(to_row).transpose()
    }

    async fn create(&self, fields: &RowFields) -> Result<StoredRow, StoreError> {
        let mut state = self.state.lock().await;
        let title = row_title(fields);
        if state.failing_create_titles.contains(title) {
            return Err(rejected("create", format!("create refused for {title:?}")));
        }
        state.next_id = state.next_id.max(1);
        let id = state.next_id;
        state.next_id += 1;

        let mut stored = fields.clone();
        stored.insert("id".into(), Value::from(id));
        stored
            .entry("created_on")
            .or_insert_with(|| {
                Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
            });
        let row = to_row(&stored)?;
        state.rows.insert(id, stored);
        Ok(row)
    }

    async fn update(&self, row_id: RowId, fields: &RowFields) -> Result<StoredRow, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_updates.contains(&row_id) {
            return Err(rejected("update", format!("update refused for row {row_id}")));
        }
        let stored = state
            .rows
            .get_mut(&row_id)
            .ok_or(StoreError::NotFound { row_id })?;
        for (key, value) in fields {
            if key != "id" {
                stored.insert(key.clone(), value.clone());
            }
        }
        to_row(stored)
    }

    async fn delete(&self, row_id: RowId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_deletes.contains(&row_id) {
            return Err(rejected("delete", format!("delete refused for row {row_id}")));
        }
        Ok(state.rows.remove(&row_id).is_some())
    }
}
