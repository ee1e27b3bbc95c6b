//! Cookie-backed marketplace session.
//!
//! Interactive login is out of scope: a session is only ever built from a
//! cookie export on disk, and is rejected when that export looks unusable.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_COOKIES_FILE: &str = "upwork_cookies.json";
pub const DEFAULT_COOKIE_MAX_AGE_DAYS: u64 = 7;

/// At least one of these must be present for the export to be usable.
pub const ESSENTIAL_COOKIES: [&str; 3] = ["XSRF-TOKEN", "visitor_id", "upwork_ws_access_token"];

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<f64>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cookies file not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("cookies in {} are older than {max_age_days} days", path.display())]
    Stale { path: PathBuf, max_age_days: u64 },
    #[error("cookies file {} contains no cookies", path.display())]
    Empty { path: PathBuf },
    #[error("cookies file {} lacks every essential cookie", path.display())]
    MissingEssential { path: PathBuf },
    #[error("cookie {name:?} has expired")]
    Expired { name: String },
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedSession {
    pub cookies: Vec<Cookie>,
    /// Always `false` for file-backed sessions.
    pub freshly_logged_in: bool,
}

impl AuthenticatedSession {
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct CookieFileSession {
    path: PathBuf,
    max_age: Duration,
    max_age_days: u64,
}

impl CookieFileSession {
    pub fn new(path: impl Into<PathBuf>, max_age_days: u64) -> Self {
        Self {
            path: path.into(),
            max_age: Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY)),
            max_age_days,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_if_valid(&self) -> Result<AuthenticatedSession, SessionError> {
        self.load_if_valid_at(SystemTime::now())
    }

    pub fn load_if_valid_at(&self, now: SystemTime) -> Result<AuthenticatedSession, SessionError> {
        let path = &self.path;
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "cookies file not found");
                return Err(SessionError::NotFound { path: path.clone() });
            }
            Err(source) => return Err(SessionError::Io { path: path.clone(), source }),
        };
        let modified = metadata
            .modified()
            .map_err(|source| SessionError::Io { path: path.clone(), source })?;
        if now.duration_since(modified).unwrap_or_default() > self.max_age {
            info!(max_age_days = self.max_age_days, "cookies are too old");
            return Err(SessionError::Stale {
                path: path.clone(),
                max_age_days: self.max_age_days,
            });
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|source| SessionError::Io { path: path.clone(), source })?;
        let cookies: Vec<Cookie> = serde_json::from_str(&raw)
            .map_err(|source| SessionError::Parse { path: path.clone(), source })?;
        if cookies.is_empty() {
            warn!(path = %path.display(), "cookies file contains no cookies");
            return Err(SessionError::Empty { path: path.clone() });
        }
        if !cookies.iter().any(|c| ESSENTIAL_COOKIES.contains(&c.name.as_str())) {
            warn!(path = %path.display(), "essential cookies are missing");
            return Err(SessionError::MissingEssential { path: path.clone() });
        }

        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        if let Some(expired) = cookies
            .iter()
            .find(|c| c.expiry.is_some_and(|exp| exp < now_secs))
        {
            info!(name = %expired.name, "at least one cookie has expired");
            return Err(SessionError::Expired {
                name: expired.name.clone(),
            });
        }

        info!(count = cookies.len(), "using existing valid cookies");
        Ok(AuthenticatedSession {
            cookies,
            freshly_logged_in: false,
        })
    }
}
