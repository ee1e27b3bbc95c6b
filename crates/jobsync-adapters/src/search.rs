use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::AdapterError;

pub const SEARCH_URL: &str = "https://www.upwork.com/nx/search/jobs/";
pub const DEFAULT_CLIENT_HIRES: &str = "1-9,10-";

fn default_sort() -> String {
    "recency".to_string()
}

fn default_client_hires() -> Option<String> {
    Some(DEFAULT_CLIENT_HIRES.to_string())
}

/// One saved search. Deserializes from `searches.yaml` entries where only
/// `query` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_sort")]
    pub sort: String,
    #[serde(default = "default_client_hires")]
    pub client_hires: Option<String>,
    #[serde(default)]
    pub proposals: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub payment_verified: bool,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            sort: default_sort(),
            client_hires: default_client_hires(),
            proposals: None,
            location: None,
            payment_verified: false,
        }
    }

    pub fn page_url(&self, page: u32) -> Result<Url, AdapterError> {
        self.page_url_from(SEARCH_URL, page)
    }

    pub fn page_url_from(&self, base: &str, page: u32) -> Result<Url, AdapterError> {
        let mut url = Url::parse(base).map_err(|e| AdapterError::Url {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", self.query.trim())
                .append_pair("sort", &self.sort)
                .append_pair("page", &page.max(1).to_string());
            if let Some(hires) = self.client_hires.as_deref().filter(|h| !h.is_empty()) {
                pairs.append_pair("client_hires", hires);
            }
            if let Some(proposals) = self.proposals.as_deref().filter(|p| !p.is_empty()) {
                pairs.append_pair("proposals", proposals);
            }
            if let Some(location) = self.location.as_deref().filter(|l| !l.is_empty()) {
                pairs.append_pair("location", location);
            }
            if self.payment_verified {
                pairs.append_pair("payment_verified", "1");
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_search_url_matches_marketplace_format() {
        let url = SearchRequest::new("web scraping").page_url(2).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.upwork.com/nx/search/jobs/?q=web+scraping&sort=recency&page=2&client_hires=1-9%2C10-"
        );
    }

    #[test]
    fn optional_filters_are_appended() {
        let mut search = SearchRequest::new("rust");
        search.client_hires = None;
        search.proposals = Some("0-4".into());
        search.location = Some("Europe".into());
        search.payment_verified = true;
        let url = search.page_url(0).unwrap();
        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
        assert!(pairs.contains(&("page".into(), "1".into())));
        assert!(pairs.contains(&("proposals".into(), "0-4".into())));
        assert!(pairs.contains(&("location".into(), "Europe".into())));
        assert!(pairs.contains(&("payment_verified".into(), "1".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "client_hires"));
    }

    #[test]
    fn saved_search_entries_only_need_a_query() {
        let raw = r#"[{"query": "scrapy"}, {"query": "rust", "payment_verified": true}]"#;
        let searches: Vec<SearchRequest> = serde_json::from_str(raw).unwrap();
        assert_eq!(searches[0], SearchRequest::new("scrapy"));
        assert!(searches[1].payment_verified);
    }
}
