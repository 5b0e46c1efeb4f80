//! RxNav drug-class API client

use crate::client::UpstreamClient;
use crate::error::{Error, Result};
use crate::models::{ClassByRxcuiResponse, ClassConcept, ClassLookupParams};
use reqwest::header::HeaderMap;
use serde_json::Value;

/// RxClass API root; requests go to `{base}/class/byRxcui.json`.
pub const RXNAV_BASE_URL: &str = "https://rxnav.nlm.nih.gov/REST/rxclass";

/// Client for the NLM RxClass `class/byRxcui` endpoint.
#[derive(Debug, Clone)]
pub struct DrugClassClient {
    upstream: UpstreamClient,
    base_url: String,
}

impl DrugClassClient {
    pub fn new(upstream: UpstreamClient, base_url: impl Into<String>) -> Self {
        Self {
            upstream,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the class concepts RxNav associates with a concept.
    ///
    /// No client headers are sent: this is a public third-party API.
    pub async fn classes_by_rxcui(&self, params: &ClassLookupParams) -> Result<Vec<ClassConcept>> {
        if params.rxcui.trim().is_empty() {
            return Err(Error::InvalidUrl("rxcui must not be empty".into()));
        }

        let url = format!("{}/class/byRxcui.json", self.base_url.trim_end_matches('/'));
        let response = self
            .upstream
            .fetch(&url, &params.to_query(), &HeaderMap::new())
            .await?;

        parse_class_response(&response.url, response.body)
    }

    /// Class identifiers for `rxcui`, in response order.
    pub async fn class_ids_by_rxcui(&self, rxcui: &str) -> Result<Vec<String>> {
        let classes = self.classes_by_rxcui(&ClassLookupParams::new(rxcui)).await?;
        Ok(classes.into_iter().map(|class| class.class_id).collect())
    }
}

/// Interpret a `class/byRxcui.json` body.
pub fn parse_class_response(url: &str, body: Value) -> Result<Vec<ClassConcept>> {
    if !body.is_object() {
        return Err(Error::Malformed {
            url: url.to_string(),
            reason: "expected a JSON object".into(),
        });
    }

    let parsed: ClassByRxcuiResponse =
        serde_json::from_value(body).map_err(|e| Error::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    Ok(parsed.classes())
}
