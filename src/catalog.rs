// 🌐 Card Catalog Client
// Authenticated GET requests against the rewards card catalog API

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::card::CardProfile;

pub const DEFAULT_API_URL: &str = "https://rewardscc-api.azure-api.net/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Where the catalog lives and how to authenticate against it.
#[derive(Clone)]
pub struct CatalogConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl CatalogConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        CatalogConfig {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// Keep the key out of logs and panic messages
impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Catalog endpoints this client knows how to call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    CardList,
    CardDetail,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::CardList => "creditcard-cardlist",
            Endpoint::CardDetail => "creditcard-detail-bycard",
        }
    }
}

// ============================================================================
// RESPONSES
// ============================================================================

/// One issuer's entry in the card list response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerCards {
    pub card_issuer: String,
    #[serde(rename = "card", default)]
    pub cards: Vec<CardSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSummary {
    pub card_key: String,
    pub card_name: String,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("HTTP request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("unexpected status code {status} from {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no details found for card key: {0}")]
    CardNotFound(String),
}

// ============================================================================
// CATALOG TRAIT
// ============================================================================

/// Source of card profiles.
///
/// The HTTP client is the production implementation; anything that can
/// produce the same documents (fixtures, a mirror) can stand in for it.
pub trait CardCatalog: Send + Sync {
    /// All issuers and their card keys
    fn fetch_card_list(&self) -> Result<Vec<IssuerCards>, CatalogError>;

    /// Full profile for one card
    fn fetch_card_detail(&self, card_key: &str) -> Result<CardProfile, CatalogError>;

    /// Card keys from the list, issuer by issuer, in response order
    fn card_keys(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .fetch_card_list()?
            .into_iter()
            .flat_map(|issuer| issuer.cards.into_iter().map(|card| card.card_key))
            .collect())
    }
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

pub struct CatalogClient {
    http: Client,
    config: CatalogConfig,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(CatalogError::Client)?;

        Ok(CatalogClient { http, config })
    }

    /// `<base>/<endpoint>[/<param>...]`, without the credential
    pub fn endpoint_url(&self, endpoint: Endpoint, params: &[&str]) -> String {
        let mut url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.path()
        );
        for param in params {
            url.push('/');
            url.push_str(&urlencoding::encode(param));
        }
        url
    }

    /// GET an endpoint and decode its JSON body
    fn fetch<T>(&self, endpoint: Endpoint, params: &[&str]) -> Result<T, CatalogError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.endpoint_url(endpoint, params);
        debug!(%url, "fetching from card catalog");

        let response = self
            .http
            .get(&url)
            .query(&[("skey", self.config.api_key.as_str())])
            .send()
            .map_err(|source| CatalogError::Request {
                url: url.clone(),
                source: source.without_url(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status { url, status });
        }

        response.json::<T>().map_err(|source| CatalogError::Decode {
            url,
            source: source.without_url(),
        })
    }
}

impl CardCatalog for CatalogClient {
    fn fetch_card_list(&self) -> Result<Vec<IssuerCards>, CatalogError> {
        self.fetch(Endpoint::CardList, &[])
    }

    fn fetch_card_detail(&self, card_key: &str) -> Result<CardProfile, CatalogError> {
        let details: Vec<CardProfile> = self.fetch(Endpoint::CardDetail, &[card_key])?;
        details
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::CardNotFound(card_key.to_string()))
    }
}
