use chrono::{DateTime, Utc};
use jobsync_core::{parse_relative_time, JobStatus, NormalizedJobRecord, RawJobRecord};
use serde::Serialize;
use tracing::warn;

pub const MAX_RATING: f64 = 5.0;
pub const LOW_RATING_THRESHOLD: f64 = 4.0;

/// `0.0` means "no rating": missing, malformed, non-finite or out of range.
pub fn parse_rating(text: Option<&str>) -> f64 {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return 0.0;
    };
    match text.parse::<f64>() {
        Ok(rating) if rating.is_finite() && (0.0..=MAX_RATING).contains(&rating) => rating,
        Ok(rating) => {
            warn!(rating, "client rating out of range; using 0.0");
            0.0
        }
        Err(_) => {
            warn!(text, "client rating is not a number; using 0.0");
            0.0
        }
    }
}

pub fn classify_status(rating: f64) -> JobStatus {
    if rating > 0.0 && rating < LOW_RATING_THRESHOLD {
        JobStatus::LowRating
    } else {
        JobStatus::Scraped
    }
}

fn json_text<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn owned(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Raw scraper output to store-ready records. Never drops a record: bad
/// fields fall back to sentinels with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestionPipeline;

impl IngestionPipeline {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &[RawJobRecord]) -> Vec<NormalizedJobRecord> {
        self.normalize_at(raw, Utc::now())
    }

    pub fn normalize_at(
        &self,
        raw: &[RawJobRecord],
        reference: DateTime<Utc>,
    ) -> Vec<NormalizedJobRecord> {
        raw.iter().map(|job| self.normalize_one(job, reference)).collect()
    }

    fn normalize_one(&self, job: &RawJobRecord, reference: DateTime<Utc>) -> NormalizedJobRecord {
        let title = job.job_title.as_deref().unwrap_or("No title");
        let posted_time = owned(&job.posted_time);
        let (posted_time_date, recognized) = parse_relative_time(&posted_time, reference);
        if !recognized {
            warn!(
                title,
                posted_time = %posted_time,
                "unrecognized posted time; using reference time"
            );
        }

        let job_uid = match job.job_uid.as_deref().map(str::trim).map(str::parse::<i64>) {
            Some(Ok(uid)) => uid,
            _ => {
                warn!(title, job_uid = ?job.job_uid, "job uid is not an integer; using 0");
                0
            }
        };

        let rating = parse_rating(job.client_info.rating.as_deref());

        NormalizedJobRecord {
            job_uid,
            job_title: owned(&job.job_title),
            job_url: owned(&job.job_url),
            posted_time,
            posted_time_date,
            description: owned(&job.description),
            client_info: json_text(&job.client_info),
            job_details: json_text(&job.job_details),
            skills: json_text(&job.skills),
            proposals: owned(&job.proposals),
            rating,
            status: classify_status(rating),
            location: owned(&job.client_info.location),
            budget: owned(&job.job_details.budget),
            job_type: owned(&job.job_details.job_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use jobsync_core::{ClientInfo, JobDetails};

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).single().unwrap()
    }

    fn raw(uid: &str, rating: &str) -> RawJobRecord {
        RawJobRecord {
            job_uid: Some(uid.to_string()),
            job_title: Some("Scrape listings".into()),
            job_url: Some("https://www.upwork.com/jobs/~01".into()),
            posted_time: Some("3 hours ago".into()),
            description: None,
            client_info: ClientInfo {
                location: Some("Germany".into()),
                rating: Some(rating.to_string()),
                ..ClientInfo::default()
            },
            job_details: JobDetails {
                job_type: Some("Hourly".into()),
                budget: Some("$40".into()),
                ..JobDetails::default()
            },
            skills: vec!["Python".into(), "Scrapy".into()],
            proposals: Some("5 to 10".into()),
        }
    }

    #[test]
    fn rating_thresholds_drive_status() {
        assert_eq!(classify_status(parse_rating(Some("3.5"))), JobStatus::LowRating);
        assert_eq!(classify_status(parse_rating(Some("0"))), JobStatus::Scraped);
        assert_eq!(classify_status(parse_rating(Some("4.9"))), JobStatus::Scraped);
        assert_eq!(classify_status(parse_rating(Some("4.0"))), JobStatus::Scraped);
    }

    #[test]
    fn malformed_or_out_of_range_ratings_become_zero() {
        assert_eq!(parse_rating(None), 0.0);
        assert_eq!(parse_rating(Some("  ")), 0.0);
        assert_eq!(parse_rating(Some("five")), 0.0);
        assert_eq!(parse_rating(Some("7.5")), 0.0);
        assert_eq!(parse_rating(Some("-1")), 0.0);
        assert_eq!(parse_rating(Some("NaN")), 0.0);
        assert_eq!(parse_rating(Some(" 4.25 ")), 4.25);
    }

    #[test]
    fn normalizes_every_field() {
        let out = IngestionPipeline::new().normalize_at(&[raw("1902", "4.8")], reference());
        let job = &out[0];
        assert_eq!(job.job_uid, 1902);
        assert_eq!(job.posted_time_date, reference() - TimeDelta::hours(3));
        assert_eq!(job.rating, 4.8);
        assert_eq!(job.status, JobStatus::Scraped);
        assert_eq!(job.location, "Germany");
        assert_eq!(job.budget, "$40");
        assert_eq!(job.job_type, "Hourly");
        assert_eq!(job.skills, r#"["Python","Scrapy"]"#);
        assert_eq!(job.client_info, r#"{"location":"Germany","rating":"4.8"}"#);
        assert_eq!(job.description, "");
    }

    #[test]
    fn bad_fields_fall_back_without_dropping_records() {
        let mut odd = raw("not-a-number", "2.0");
        odd.posted_time = Some("sometime".into());
        let mut missing = raw("", "");
        missing.job_uid = None;
        let out = IngestionPipeline::new().normalize_at(&[odd, missing], reference());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].job_uid, 0);
        assert_eq!(out[0].posted_time_date, reference());
        assert_eq!(out[0].status, JobStatus::LowRating);
        assert_eq!(out[1].job_uid, 0);
        assert_eq!(out[1].rating, 0.0);
    }
}
