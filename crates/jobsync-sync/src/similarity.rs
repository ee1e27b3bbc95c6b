use std::collections::BTreeMap;
use std::sync::Arc;

use jobsync_core::{JobStatus, RowFields, StoredRow};
use jobsync_storage::{RowStore, StoreError};
use serde_json::Value;
use tracing::{error, info};

/// Joins the parts of a similarity key; never appears in scraped text.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// `None` for rows without a title.
pub fn similarity_key(row: &StoredRow) -> Option<String> {
    let part = |value: Option<&str>| value.unwrap_or_default().trim().to_lowercase();
    let title = part(row.job_title.as_deref());
    if title.is_empty() {
        return None;
    }
    let location = part(row.location.as_deref());
    let skills = part(row.skills.as_deref());
    Some(format!("{title}{KEY_SEPARATOR}{location}{KEY_SEPARATOR}{skills}"))
}

/// Groups rows that share title, location and skills even when their uids
/// differ, and can tag them as duplicates. It never deletes.
pub struct SimilarityGrouper {
    store: Arc<dyn RowStore>,
}

impl SimilarityGrouper {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    pub async fn find_similar_jobs(
        &self,
        update_status: bool,
    ) -> Result<BTreeMap<String, Vec<StoredRow>>, StoreError> {
        let rows = self.store.list_all(&[]).await?;
        let mut groups: BTreeMap<String, Vec<StoredRow>> = BTreeMap::new();
        for row in rows {
            if let Some(key) = similarity_key(&row) {
                groups.entry(key).or_default().push(row);
            }
        }
        groups.retain(|_, rows| rows.len() > 1);

        if groups.is_empty() {
            info!("no similar jobs found");
            return Ok(groups);
        }
        info!(groups = groups.len(), "found groups of similar jobs");

        let mut tag = RowFields::new();
        tag.insert("status".into(), Value::from(JobStatus::Duplicate.as_str()));
        for rows in groups.values() {
            let first = &rows[0];
            info!(
                title = first.title_or_placeholder(),
                location = first.location.as_deref().unwrap_or("N/A"),
                count = rows.len(),
                "similar jobs"
            );
            if !update_status {
                continue;
            }
            for row in rows {
                if let Err(err) = self.store.update(row.id, &tag).await {
                    error!(row_id = row.id, error = %err, "failed to tag similar job");
                }
            }
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobsync_storage::MemoryRowStore;
    use serde_json::json;

    fn store() -> MemoryRowStore {
        MemoryRowStore::seeded([
            json!({
                "id": 1, "job_uid": 1, "job_title": "Scrape Shop ",
                "location": "Germany", "skills": "[\"Python\"]"
            }),
            json!({
                "id": 2, "job_uid": 2, "job_title": "scrape shop",
                "location": "germany", "skills": "[\"python\"]"
            }),
            json!({
                "id": 3, "job_uid": 3, "job_title": "scrape shop",
                "location": "France", "skills": "[\"python\"]"
            }),
            json!({"id": 4, "job_uid": 4, "location": "Germany"}),
            json!({"id": 5, "job_uid": 5, "job_title": "", "location": "Germany"}),
            json!({"id": 6, "job_uid": 6, "location": "Germany"}),
        ])
    }

    #[test]
    fn keys_ignore_case_and_padding() {
        let mut row = StoredRow::new(1);
        row.job_title = Some("  Data Entry ".into());
        row.location = Some("USA".into());
        assert_eq!(similarity_key(&row), Some("data entry\u{1f}usa\u{1f}".to_string()));
        assert_eq!(similarity_key(&StoredRow::new(2)), None);
    }

    #[tokio::test]
    async fn groups_only_titled_multi_member_sets_without_tagging() {
        let store = Arc::new(store());
        let groups = SimilarityGrouper::new(store.clone())
            .find_similar_jobs(false)
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        let ids = groups.values().next().unwrap().iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
        assert!(store.snapshot().await.iter().all(|r| r.get("status").is_none()));
    }

    #[tokio::test]
    async fn tagging_marks_members_and_deletes_nothing() {
        let store = Arc::new(store().with_failing_update(2));
        let groups = SimilarityGrouper::new(store.clone())
            .find_similar_jobs(true)
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(store.len().await, 6);

        let first = store.get(1).await.unwrap().unwrap();
        assert_eq!(first.status, Some(JobStatus::Duplicate));
        let failed = store.get(2).await.unwrap().unwrap();
        assert_eq!(failed.status, None);
        let other = store.get(3).await.unwrap().unwrap();
        assert_eq!(other.status, None);
    }
}
