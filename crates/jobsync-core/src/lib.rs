//! Core job-record model shared by the scraper, the store client and the sync engines.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub mod datetime;

pub use datetime::{parse_iso_instant, parse_relative_time};

pub const CRATE_NAME: &str = "jobsync-core";

/// Opaque identifier assigned by the remote row store.
pub type RowId = u64;

/// Flat column/value payload sent to the row store.
pub type RowFields = Map<String, Value>;

/// Lifecycle tag stored in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Scraped,
    LowRating,
    Duplicate,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scraped => "scraped",
            Self::LowRating => "low_rating",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "scraped" => Some(Self::Scraped),
            "low_rating" => Some(Self::LowRating),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_verified: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// One job tile as extracted from a search results page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawJobRecord {
    #[serde(default)]
    pub job_uid: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub job_url: Option<String>,
    #[serde(default)]
    pub posted_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub client_info: ClientInfo,
    #[serde(default)]
    pub job_details: JobDetails,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub proposals: Option<String>,
}

/// Store-ready record. Nested scraper objects are carried as JSON text because
/// the store has no nested column type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedJobRecord {
    pub job_uid: i64,
    pub job_title: String,
    pub job_url: String,
    pub posted_time: String,
    pub posted_time_date: DateTime<Utc>,
    pub description: String,
    pub client_info: String,
    pub job_details: String,
    pub skills: String,
    pub proposals: String,
    pub rating: f64,
    pub status: JobStatus,
    pub location: String,
    pub budget: String,
    pub job_type: String,
}

impl NormalizedJobRecord {
    pub fn to_row_fields(&self) -> serde_json::Result<RowFields> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Ok(Map::from_iter([("value".to_string(), other)])),
        }
    }

    pub fn cell(&self, field: &str) -> Option<CellValue> {
        match field {
            "job_uid" => Some(CellValue::Integer(self.job_uid)),
            "rating" => Some(CellValue::Float(self.rating)),
            "status" => Some(CellValue::Text(self.status.as_str().to_string())),
            "posted_time_date" => Some(CellValue::Text(
                self.posted_time_date.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            )),
            _ => self
                .to_row_fields()
                .ok()
                .and_then(|fields| fields.get(field).and_then(CellValue::from_json)),
        }
    }
}

/// A scalar cell as it comes back from the store. The dedup key may be typed
/// as a number or as text depending on the table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl CellValue {
    /// `null` maps to `None`; objects and arrays collapse to their JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Self::Integer(i)),
                None => n.as_f64().map(Self::Float),
            },
            Value::String(s) => Some(Self::Text(s.clone())),
            other => Some(Self::Text(other.to_string())),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

/// A row owned by the remote store: a normalized record plus `id` and `created_on`.
///
/// Only the columns the sync engines read are typed; everything else lands in
/// `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub id: RowId,
    #[serde(default, deserialize_with = "text_cell", skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    #[serde(default, deserialize_with = "scalar_cell", skip_serializing_if = "Option::is_none")]
    pub job_uid: Option<CellValue>,
    #[serde(default, deserialize_with = "text_cell", skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, deserialize_with = "text_cell", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "text_cell", skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    #[serde(default, deserialize_with = "text_cell", skip_serializing_if = "Option::is_none")]
    pub posted_time_date: Option<String>,
    #[serde(default, deserialize_with = "status_cell", skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl StoredRow {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            created_on: None,
            job_uid: None,
            job_title: None,
            location: None,
            skills: None,
            posted_time_date: None,
            status: None,
            extra: BTreeMap::new(),
        }
    }

    /// Look up any column by its user-facing field name.
    pub fn cell(&self, field: &str) -> Option<CellValue> {
        let text = |v: &Option<String>| v.clone().map(CellValue::Text);
        match field {
            "id" => i64::try_from(self.id).ok().map(CellValue::Integer),
            "created_on" => text(&self.created_on),
            "job_uid" => self.job_uid.clone(),
            "job_title" => text(&self.job_title),
            "location" => text(&self.location),
            "skills" => text(&self.skills),
            "posted_time_date" => text(&self.posted_time_date),
            "status" => self.status.map(|s| CellValue::Text(s.as_str().to_string())),
            other => self.extra.get(other).and_then(CellValue::from_json),
        }
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.cell(field).map(|c| c.to_text())
    }

    pub fn title_or_placeholder(&self) -> &str {
        self.job_title.as_deref().unwrap_or("No title")
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_time_date.as_deref().and_then(parse_iso_instant)
    }
}

fn scalar_cell<'de, D>(deserializer: D) -> Result<Option<CellValue>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(CellValue::from_json(&value))
}

fn text_cell<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(CellValue::from_json(&value).map(|c| c.to_text()))
}

// Single-select columns arrive as `{"id": .., "value": "duplicate", "color": ..}`.
fn status_cell<'de, D>(deserializer: D) -> Result<Option<JobStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let text = match &value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("value").and_then(Value::as_str),
        _ => None,
    };
    Ok(text.and_then(JobStatus::parse))
}
