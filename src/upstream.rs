//! Upstream MineOS App Market client
//!
//! This module defines the fetcher abstraction the proxy core resolves cache
//! misses through, plus the production HTTP client for the live market API.
//! It also owns the mapping between a market request (script plus parameters)
//! and the cache identifier that names it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::record::Value;
use crate::store::{InvalidIdentifier, ScriptId};

/// Base URL of the live MineOS App Market API
pub const DEFAULT_BASE_URL: &str = "http://mineos.buttex.ru/MineOSAPI/2.04";

/// Browser User-Agent sent with upstream requests
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_3) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/64.0.3282.119 Safari/537.36";

/// Errors that can occur when fetching from the upstream market
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Upstream did not produce a usable response
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),
}

/// Fetches the current payload for an identifier from the upstream market
///
/// The proxy core resolves cache misses through this trait; implementations
/// own all URL and transport concerns.
#[async_trait]
pub trait UpstreamFetcher: Send + Sync {
    /// Fetches the payload stored upstream for the given identifier
    async fn fetch(&self, id: &ScriptId) -> Result<Value, FetchError>;
}

/// A market request: one script name plus its merged parameters
///
/// Parameters are deduplicated (later pairs win) and sorted by key, so the
/// same logical request always produces the same cache identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
    script: String,
    params: Vec<(String, String)>,
}

impl RequestKey {
    /// Builds a key from a script name and parameter pairs
    ///
    /// A trailing `.php` is stripped from the script name, matching how the
    /// market names its endpoints. Later pairs win on duplicate parameter
    /// keys, so callers pass query pairs before form pairs to let form
    /// values take precedence.
    pub fn new(
        script: &str,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, InvalidIdentifier> {
        let script = script.strip_suffix(".php").unwrap_or(script);

        if script.is_empty() {
            return Err(InvalidIdentifier::Empty);
        }
        if let Some(ch) = script.chars().find(|c| !is_script_char(*c)) {
            return Err(InvalidIdentifier::ForbiddenCharacter { ch });
        }

        let merged: BTreeMap<String, String> = params.into_iter().collect();

        Ok(Self {
            script: script.to_string(),
            params: merged.into_iter().collect(),
        })
    }

    /// Returns the script name without its `.php` suffix
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Returns the sorted parameter pairs
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Derives the cache identifier for this request
    ///
    /// A request without parameters is identified by its bare script name.
    /// Otherwise the sorted pairs are serialized to JSON and hex-encoded
    /// into a `.q` suffix, which keeps the identifier URL- and file-safe
    /// while remaining reversible.
    pub fn to_script_id(&self) -> Result<ScriptId, InvalidIdentifier> {
        if self.params.is_empty() {
            return ScriptId::new(self.script.clone());
        }

        let encoded = hex::encode(self.params_json());
        ScriptId::new(format!("{}.q{}", self.script, encoded))
    }

    /// Recovers the request from a cache identifier
    ///
    /// Inverts `to_script_id`. An identifier whose `.q` suffix does not
    /// decode is treated as a bare script name.
    pub fn parse(id: &ScriptId) -> Self {
        let text = id.as_str();

        if let Some((script, encoded)) = text.split_once(".q") {
            if let Some(params) = decode_params(encoded) {
                return Self {
                    script: script.to_string(),
                    params,
                };
            }
        }

        Self {
            script: text.to_string(),
            params: Vec::new(),
        }
    }

    /// Serializes the parameter pairs as a JSON array of `[key, value]` pairs
    fn params_json(&self) -> String {
        let pairs: Vec<serde_json::Value> = self
            .params
            .iter()
            .map(|(k, v)| serde_json::json!([k, v]))
            .collect();
        serde_json::Value::Array(pairs).to_string()
    }
}

/// Script names may not contain dots, so the `.q` marker splits cleanly
fn is_script_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
}

fn decode_params(encoded: &str) -> Option<Vec<(String, String)>> {
    let bytes = hex::decode(encoded).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// HTTP client for the live MineOS App Market
///
/// Sends `GET {base}/{script}.php` for parameterless requests and `POST`
/// with a form body otherwise, matching how MineOS clients talk to the
/// API. Timeouts and the User-Agent are fixed at construction.
#[derive(Debug, Clone)]
pub struct MarketClient {
    client: Client,
    base_url: String,
}

impl MarketClient {
    /// Creates a client for the given base URL with a request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Returns the URL a script is served from
    fn script_url(&self, script: &str) -> String {
        format!("{}/{}.php", self.base_url, script)
    }
}

#[async_trait]
impl UpstreamFetcher for MarketClient {
    async fn fetch(&self, id: &ScriptId) -> Result<Value, FetchError> {
        let key = RequestKey::parse(id);
        let url = self.script_url(key.script());

        let request = if key.params().is_empty() {
            self.client.get(&url)
        } else {
            self.client.post(&url).form(key.params())
        };

        let response = request.send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        Ok(decode_body(&bytes))
    }
}

/// Converts an upstream response body into a payload value
///
/// Market endpoints answer JSON, but a few legacy scripts return plain text,
/// so non-JSON bodies are kept as text, and bodies that are not UTF-8 are
/// kept as raw bytes.
fn decode_body(bytes: &[u8]) -> Value {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(bytes) {
        return Value::from_json(json);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Value::Text(text.to_string()),
        Err(_) => Value::Bytes(bytes.to_vec()),
    }
}
