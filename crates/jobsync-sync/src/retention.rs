use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use jobsync_core::parse_iso_instant;
use jobsync_storage::{RowStore, StoreError};
use tracing::{error, info, warn};

pub const DEFAULT_DATE_FIELD: &str = "created_on";

/// Age-based deletion. A date that cannot be read keeps its row.
pub struct RetentionSweeper {
    store: Arc<dyn RowStore>,
    pacing: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn RowStore>, pacing: Duration) -> Self {
        Self { store, pacing }
    }

    pub async fn clean_up_old_rows(
        &self,
        max_age_days: u32,
        date_field: &str,
    ) -> Result<usize, StoreError> {
        self.clean_up_old_rows_at(max_age_days, date_field, Utc::now()).await
    }

    pub async fn clean_up_old_rows_at(
        &self,
        max_age_days: u32,
        date_field: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let cutoff = TimeDelta::try_days(i64::from(max_age_days))
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let rows = self.store.list_all(&[]).await?;
        info!(rows = rows.len(), %cutoff, "checking rows for cleanup");

        let mut deleted = 0usize;
        for row in rows {
            let Some(raw) = row.text(date_field).filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            let Some(date) = parse_iso_instant(&raw) else {
                warn!(
                    row_id = row.id,
                    value = %raw,
                    date_field,
                    "could not parse date; keeping row"
                );
                continue;
            };
            if date >= cutoff {
                continue;
            }
            match self.store.delete(row.id).await {
                Ok(true) => {
                    deleted += 1;
                    info!(row_id = row.id, title = row.title_or_placeholder(), "deleted old row");
                    tokio::time::sleep(self.pacing).await;
                }
                Ok(false) => {}
                Err(err) => error!(row_id = row.id, error = %err, "failed to delete old row"),
            }
        }
        info!(deleted, "cleaned up old rows");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{SecondsFormat, TimeZone};
    use jobsync_storage::MemoryRowStore;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).single().unwrap()
    }

    fn days_ago(days: i64) -> String {
        (now() - TimeDelta::days(days)).to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    #[tokio::test]
    async fn deletes_only_rows_past_the_cutoff() {
        let store = Arc::new(MemoryRowStore::seeded([
            json!({"id": 1, "created_on": days_ago(31)}),
            json!({"id": 2, "created_on": days_ago(29)}),
            json!({"id": 3, "created_on": "last tuesday"}),
            json!({"id": 4}),
            json!({"id": 5, "created_on": "2020-01-01"}),
            json!({"id": 6, "created_on": "2020-01-01T10:00:00"}),
        ]));
        let sweeper = RetentionSweeper::new(store.clone(), Duration::ZERO);
        let deleted = sweeper
            .clean_up_old_rows_at(30, DEFAULT_DATE_FIELD, now())
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        for kept in [2, 3, 4] {
            assert!(store.get(kept).await.unwrap().is_some(), "row {kept}");
        }
    }

    #[tokio::test]
    async fn honours_alternative_date_fields_and_delete_failures() {
        let store = Arc::new(
            MemoryRowStore::seeded([
                json!({"id": 1, "created_on": days_ago(1), "posted_time_date": days_ago(40)}),
                json!({"id": 2, "created_on": days_ago(1), "posted_time_date": days_ago(50)}),
            ])
            .with_failing_delete(2),
        );
        let sweeper = RetentionSweeper::new(store.clone(), Duration::ZERO);
        let deleted = sweeper
            .clean_up_old_rows_at(30, "posted_time_date", now())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deletions_are_paced() {
        let store = Arc::new(MemoryRowStore::seeded([
            json!({"id": 1, "created_on": days_ago(40)}),
            json!({"id": 2, "created_on": days_ago(41)}),
            json!({"id": 3, "created_on": days_ago(1)}),
        ]));
        let sweeper = RetentionSweeper::new(store.clone(), Duration::from_millis(500));
        let started = tokio::time::Instant::now();
        let deleted = sweeper
            .clean_up_old_rows_at(30, DEFAULT_DATE_FIELD, now())
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }
}

