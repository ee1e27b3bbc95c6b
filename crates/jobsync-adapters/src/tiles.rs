//! Job-tile extraction from a marketplace search results page.

use jobsync_core::{ClientInfo, JobDetails, RawJobRecord};
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::AdapterError;

pub const SITE_ROOT: &str = "https://www.upwork.com";

const TILE: &str = "article.job-tile";
const UID_ATTR: &str = "data-ev-job-uid";
const TITLE_LINK: &str = "h2.job-tile-title a";
// The misspelling is in the site's markup.
const POSTED: &str = r#"small[data-test="job-pubilshed-date"] span:last-child"#;
const DESCRIPTION: &str = r#"div[data-test="UpCLineClamp JobDescription"]"#;
const DESCRIPTION_PARAGRAPHS: &str = r#"div[data-test="UpCLineClamp JobDescription"] p"#;
const CLIENT_INFO: &str = r#"ul[data-test="JobInfoClient"]"#;
const PAYMENT_VERIFIED: &str = r#"li[data-test="payment-verified"] .air3-badge-tagline"#;
const RATING: &str = ".air3-rating-value-text";
const TOTAL_FEEDBACK: &str = r#"li[data-test="total-feedback"] div.air3-popper-content div"#;
const SPENT: &str = ".air3-badge-tagline strong";
const LOCATION: &str = r#"li[data-test="location"] div.air3-badge-tagline"#;
const JOB_INFO: &str = r#"ul[data-test="JobInfo"]"#;
const JOB_TYPE: &str = r#"li[data-test="job-type-label"] strong"#;
const EXPERIENCE: &str = r#"li[data-test="experience-level"] strong"#;
const BUDGET: &str = r#"li[data-test="is-fixed-price"] strong:last-child"#;
const DURATION: &str = r#"li[data-test="duration-label"] strong:last-child"#;
const SKILLS: &str = "div.air3-token-container button.air3-token span";
const PROPOSALS: &str = r#"li[data-test="proposals-tier"] strong"#;

fn selector(css: &'static str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector {
        selector: css,
        reason: e.to_string(),
    })
}

struct TileSelectors {
    tile: Selector,
    title_link: Selector,
    posted: Selector,
    description: Selector,
    description_paragraphs: Selector,
    client_info: Selector,
    payment_verified: Selector,
    rating: Selector,
    total_feedback: Selector,
    spent: Selector,
    location: Selector,
    job_info: Selector,
    job_type: Selector,
    experience: Selector,
    budget: Selector,
    duration: Selector,
    skills: Selector,
    proposals: Selector,
}

impl TileSelectors {
    fn compile() -> Result<Self, AdapterError> {
        Ok(Self {
            tile: selector(TILE)?,
            title_link: selector(TITLE_LINK)?,
            posted: selector(POSTED)?,
            description: selector(DESCRIPTION)?,
            description_paragraphs: selector(DESCRIPTION_PARAGRAPHS)?,
            client_info: selector(CLIENT_INFO)?,
            payment_verified: selector(PAYMENT_VERIFIED)?,
            rating: selector(RATING)?,
            total_feedback: selector(TOTAL_FEEDBACK)?,
            spent: selector(SPENT)?,
            location: selector(LOCATION)?,
            job_info: selector(JOB_INFO)?,
            job_type: selector(JOB_TYPE)?,
            experience: selector(EXPERIENCE)?,
            budget: selector(BUDGET)?,
            duration: selector(DURATION)?,
            skills: selector(SKILLS)?,
            proposals: selector(PROPOSALS)?,
        })
    }
}

/// Collapse all whitespace runs to single spaces.
fn clean_text(element: ElementRef<'_>) -> Option<String> {
    let text = element.text().collect::<Vec<_>>().join(" ");
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!cleaned.is_empty()).then_some(cleaned)
}

fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).find_map(clean_text)
}

fn absolute_url(href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(SITE_ROOT).ok()?;
    base.join(href).ok().map(String::from)
}

fn description(tile: ElementRef<'_>, sels: &TileSelectors) -> Option<String> {
    let paragraphs = tile
        .select(&sels.description_paragraphs)
        .filter_map(clean_text)
        .collect::<Vec<_>>();
    if !paragraphs.is_empty() {
        return Some(paragraphs.join("\n"));
    }
    first_text(tile, &sels.description)
}

fn client_info(tile: ElementRef<'_>, sels: &TileSelectors) -> ClientInfo {
    let Some(block) = tile.select(&sels.client_info).next() else {
        return ClientInfo::default();
    };
    ClientInfo {
        location: first_text(block, &sels.location),
        rating: first_text(block, &sels.rating),
        total_feedback: first_text(block, &sels.total_feedback),
        spent: first_text(block, &sels.spent),
        payment_verified: first_text(block, &sels.payment_verified),
    }
}

fn job_details(tile: ElementRef<'_>, sels: &TileSelectors) -> JobDetails {
    let Some(block) = tile.select(&sels.job_info).next() else {
        return JobDetails::default();
    };
    JobDetails {
        job_type: first_text(block, &sels.job_type),
        experience_level: first_text(block, &sels.experience),
        budget: first_text(block, &sels.budget),
        duration: first_text(block, &sels.duration),
    }
}

fn parse_tile(tile: ElementRef<'_>, sels: &TileSelectors) -> Option<RawJobRecord> {
    let job_uid = tile
        .value()
        .attr(UID_ATTR)
        .map(str::trim)
        .filter(|uid| !uid.is_empty())?
        .to_string();
    let link = tile.select(&sels.title_link).next()?;
    let job_title = clean_text(link)?;
    let job_url = link.value().attr("href").and_then(absolute_url)?;

    Some(RawJobRecord {
        job_uid: Some(job_uid),
        job_title: Some(job_title),
        job_url: Some(job_url),
        posted_time: first_text(tile, &sels.posted),
        description: description(tile, sels),
        client_info: client_info(tile, sels),
        job_details: job_details(tile, sels),
        skills: tile.select(&sels.skills).filter_map(clean_text).collect(),
        proposals: first_text(tile, &sels.proposals),
    })
}

/// Extract every complete job tile from a results page. Tiles without a uid,
/// title or link are dropped.
pub fn parse_job_tiles(html: &str) -> Result<Vec<RawJobRecord>, AdapterError> {
    let sels = TileSelectors::compile()?;
    let document = Html::parse_document(html);
    let mut jobs = Vec::new();
    let mut dropped = 0usize;
    for tile in document.select(&sels.tile) {
        match parse_tile(tile, &sels) {
            Some(job) => jobs.push(job),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, kept = jobs.len(), "dropped incomplete job tiles");
    }
    Ok(jobs)
}
