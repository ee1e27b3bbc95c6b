use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use jobsync_core::{CellValue, NormalizedJobRecord, RowFields, StoredRow};
use jobsync_storage::{RowStore, StoreError};
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};

pub const DEFAULT_DEDUP_FIELD: &str = "job_uid";

/// A dedup cell read once into the form the match policy consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParse {
    Integer(i64),
    Text(String),
    Missing,
}

impl KeyParse {
    pub fn from_cell(cell: Option<&CellValue>) -> Self {
        match cell {
            None => Self::Missing,
            Some(CellValue::Integer(i)) => Self::Integer(*i),
            Some(CellValue::Float(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Self::Integer(*f as i64)
            }
            Some(other) => Self::from_text(&other.to_text()),
        }
    }

    pub fn from_text(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::Missing;
        }
        match text.parse::<i64>() {
            Ok(i) => Self::Integer(i),
            Err(_) => Self::Text(text.to_string()),
        }
    }

    /// Zero is the ingestion fallback for an unreadable uid, so it never
    /// identifies a job.
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Missing | Self::Integer(0))
    }

    /// Canonical string form used as a grouping key.
    pub fn canonical(&self) -> Option<String> {
        match self {
            Self::Integer(i) => Some(i.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Missing => None,
        }
    }
}

/// Integer equality when both sides are integers, string equality otherwise.
pub fn keys_match(a: &KeyParse, b: &KeyParse) -> bool {
    if !a.is_usable() || !b.is_usable() {
        return false;
    }
    match (a, b) {
        (KeyParse::Integer(x), KeyParse::Integer(y)) => x == y,
        _ => a.canonical() == b.canonical(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    /// Pause after each successful create and each duplicate deletion.
    pub pacing: Duration,
    /// Also match against rows created earlier in the same upload.
    pub track_batch_creates: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(500),
            track_batch_creates: true,
        }
    }
}

pub struct DeduplicationEngine {
    store: Arc<dyn RowStore>,
    config: DedupConfig,
}

impl DeduplicationEngine {
    pub fn new(store: Arc<dyn RowStore>, config: DedupConfig) -> Self {
        Self { store, config }
    }

    pub async fn upload(
        &self,
        records: &[NormalizedJobRecord],
    ) -> Result<Vec<StoredRow>, StoreError> {
        self.upload_by(records, DEFAULT_DEDUP_FIELD).await
    }

    /// Create every record whose `dedup_field` matches no existing row.
    ///
    /// Errors only when the snapshot cannot be fetched; single-row failures
    /// are logged and skipped.
    pub async fn upload_by(
        &self,
        records: &[NormalizedJobRecord],
        dedup_field: &str,
    ) -> Result<Vec<StoredRow>, StoreError> {
        let span = info_span!("upload", records = records.len(), dedup_field);
        async {
            let mut created = Vec::new();
            if records.is_empty() {
                warn!("no rows to upload");
                return Ok::<_, StoreError>(created);
            }

            let snapshot = self.store.list_all(&[]).await?;
            info!(existing = snapshot.len(), "fetched rows for deduplication check");
            let mut known = snapshot
                .iter()
                .map(|row| KeyParse::from_cell(row.cell(dedup_field).as_ref()))
                .collect::<Vec<_>>();

            for record in records {
                let key = KeyParse::from_cell(record.cell(dedup_field).as_ref());
                if known.iter().any(|existing| keys_match(existing, &key)) {
                    info!(key = ?key, title = %record.job_title, "skipping duplicate row");
                    continue;
                }

                let fields = match record.to_row_fields() {
                    Ok(fields) => stringify_nested(fields),
                    Err(err) => {
                        error!(title = %record.job_title, error = %err, "could not encode row");
                        continue;
                    }
                };
                match self.store.create(&fields).await {
                    Ok(row) => {
                        if self.config.track_batch_creates {
                            known.push(key);
                        }
                        created.push(row);
                        tokio::time::sleep(self.config.pacing).await;
                    }
                    Err(err) => {
                        error!(title = %record.job_title, error = %err, "error uploading row");
                    }
                }
            }
            info!(created = created.len(), "uploaded rows");
            Ok::<_, StoreError>(created)
        }
        .instrument(span)
        .await
    }

    /// Rows grouped by canonical `job_uid`, only groups with more than one
    /// member. Blank and zero uids are not grouped.
    pub async fn find_duplicates(&self) -> Result<BTreeMap<String, Vec<StoredRow>>, StoreError> {
        let rows = self.store.list_all(&[]).await?;
        let mut groups: BTreeMap<String, Vec<StoredRow>> = BTreeMap::new();
        for row in rows {
            let key = KeyParse::from_cell(row.job_uid.as_ref());
            if !key.is_usable() {
                continue;
            }
            if let Some(canonical) = key.canonical() {
                groups.entry(canonical).or_default().push(row);
            }
        }
        groups.retain(|_, rows| rows.len() > 1);

        if groups.is_empty() {
            info!("no duplicates found");
        } else {
            info!(groups = groups.len(), "found job uids with duplicates");
            for (uid, rows) in &groups {
                info!(job_uid = %uid, count = rows.len(), "duplicate entries");
            }
        }
        Ok(groups)
    }

    /// Keep one row per duplicate group, the newest by
    /// (`posted_time_date`, `id`) or the oldest, and delete the rest.
    pub async fn delete_duplicates(&self, keep_newest: bool) -> Result<usize, StoreError> {
        let duplicates = self.find_duplicates().await?;
        let mut deleted = 0usize;
        for (uid, mut rows) in duplicates {
            rows.sort_by(age_order);
            if keep_newest {
                rows.reverse();
            }
            for row in rows.iter().skip(1) {
                match self.store.delete(row.id).await {
                    Ok(true) => {
                        deleted += 1;
                        info!(row_id = row.id, job_uid = %uid, "deleted duplicate row");
                        tokio::time::sleep(self.config.pacing).await;
                    }
                    Ok(false) => {
                        warn!(row_id = row.id, job_uid = %uid, "duplicate row was already gone");
                    }
                    Err(err) => {
                        error!(
                            row_id = row.id,
                            job_uid = %uid,
                            error = %err,
                            "failed to delete duplicate row"
                        );
                    }
                }
            }
        }
        info!(deleted, "deleted duplicate rows");
        Ok(deleted)
    }
}

// Unparsable dates sort first, as the oldest.
fn age_order(a: &StoredRow, b: &StoredRow) -> Ordering {
    (a.posted_at(), a.id).cmp(&(b.posted_at(), b.id))
}

fn stringify_nested(fields: RowFields) -> RowFields {
    fields
        .into_iter()
        .map(|(key, value)| match value {
            Value::Object(_) | Value::Array(_) => (key, Value::String(value.to_string())),
            other => (key, other),
        })
        .collect()
}
