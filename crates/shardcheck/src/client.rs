//! Shard query clients.
//!
//! The scanner only needs one remote operation: fetch the next page of
//! unique keys from a single core. [`ShardClient`] is that seam, and
//! [`ClientFactory`] builds one client per shard so every scanner owns its
//! own connection pool. [`SolrClient`] implements the operation against the
//! Solr `/select` handler over reqwest.

use crate::endpoint::ShardEndpoint;
use crate::types::{
    CheckError, CheckResult, Credentials, HttpVersion, Page, PageRequest, ScanError, ScanResult,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Longest slice of a non-JSON error body quoted in an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Fetches pages of unique keys from one core.
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Issue one non-distributed, cursor-paged query.
    async fn fetch_page(&self, request: &PageRequest) -> ScanResult<Page>;
}

/// Builds a dedicated client for each shard.
pub trait ClientFactory: Send + Sync {
    /// Create the client a scanner will own for its whole lifetime.
    fn connect(&self, endpoint: &ShardEndpoint) -> CheckResult<Box<dyn ShardClient>>;
}

/// Solr `/select` client for a single core.
pub struct SolrClient {
    client: Client,
    select_url: String,
    credentials: Option<Credentials>,
}

impl SolrClient {
    /// Create a client for the given core.
    pub fn new(
        endpoint: &ShardEndpoint,
        http_version: HttpVersion,
        credentials: Option<Credentials>,
    ) -> CheckResult<Self> {
        let builder = Client::builder();
        let builder = match http_version {
            HttpVersion::Http1 => builder.http1_only(),
            HttpVersion::Http2 => builder.http2_prior_knowledge(),
        };
        let client = builder.build().map_err(|e| {
            CheckError::Config(format!(
                "cannot build HTTP client for {}: {e}",
                endpoint.core_name
            ))
        })?;

        debug!(
            core = %endpoint.core_name,
            url = %endpoint.select_url(),
            version = %http_version,
            "Created shard client"
        );

        Ok(Self {
            client,
            select_url: endpoint.select_url(),
            credentials,
        })
    }

    /// Form parameters for a page request.
    fn params(request: &PageRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", "*:*".to_string()),
            ("distrib", "false".to_string()),
            ("fl", request.unique_key.clone()),
            ("sort", format!("{} asc", request.unique_key)),
            ("rows", request.rows.to_string()),
            ("cursorMark", request.cursor.clone()),
            ("wt", "json".to_string()),
        ];
        for filter in &request.filters {
            params.push(("fq", filter.clone()));
        }
        params
    }
}

#[async_trait]
impl ShardClient for SolrClient {
    async fn fetch_page(&self, request: &PageRequest) -> ScanResult<Page> {
        let mut req = self
            .client
            .post(&self.select_url)
            .form(&Self::params(request));
        if let Some(ref creds) = self.credentials {
            req = req.basic_auth(&creds.username, creds.password.as_ref());
        }

        let response = req
            .send()
            .await
            .map_err(|e| ScanError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ScanError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ScanError::RemoteQuery {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        parse_select_response(&body, &request.unique_key)
    }
}

/// Factory producing [`SolrClient`]s with uniform transport settings.
#[derive(Debug, Clone, Default)]
pub struct SolrClientFactory {
    http_version: HttpVersion,
    credentials: Option<Credentials>,
}

impl SolrClientFactory {
    /// Create a factory for the given HTTP version.
    pub fn new(http_version: HttpVersion) -> Self {
        Self {
            http_version,
            credentials: None,
        }
    }

    /// Forward basic-auth credentials on every request.
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }
}

impl ClientFactory for SolrClientFactory {
    fn connect(&self, endpoint: &ShardEndpoint) -> CheckResult<Box<dyn ShardClient>> {
        let client = SolrClient::new(endpoint, self.http_version, self.credentials.clone())?;
        Ok(Box::new(client))
    }
}

#[derive(Deserialize)]
struct SelectResponse {
    response: Option<ResultSet>,
    #[serde(rename = "nextCursorMark")]
    next_cursor_mark: Option<String>,
}

#[derive(Deserialize)]
struct ResultSet {
    #[serde(rename = "numFound")]
    num_found: Option<u64>,
    #[serde(default)]
    docs: Vec<serde_json::Map<String, Value>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    msg: Option<String>,
}

/// Decode a JSON `/select` response into a page of keys.
pub fn parse_select_response(body: &str, unique_key: &str) -> ScanResult<Page> {
    let parsed: SelectResponse = serde_json::from_str(body)
        .map_err(|e| ScanError::MalformedResponse(format!("invalid JSON: {e}")))?;

    let result_set = parsed
        .response
        .ok_or_else(|| ScanError::MalformedResponse("missing 'response' section".into()))?;
    let next_cursor = parsed
        .next_cursor_mark
        .ok_or_else(|| ScanError::MalformedResponse("missing 'nextCursorMark'".into()))?;

    let keys = result_set
        .docs
        .iter()
        .map(|doc| key_value(doc, unique_key))
        .collect::<ScanResult<Vec<_>>>()?;

    Ok(Page {
        keys,
        next_cursor,
        num_found: result_set.num_found,
    })
}

fn key_value(doc: &serde_json::Map<String, Value>, unique_key: &str) -> ScanResult<String> {
    match doc.get(unique_key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(ScanError::MalformedResponse(format!(
            "field '{unique_key}' has unsupported value {other}"
        ))),
        None => Err(ScanError::MalformedResponse(format!(
            "document without field '{unique_key}'"
        ))),
    }
}

fn error_message(body: &str) -> String {
    if let Ok(ErrorResponse {
        error: ErrorBody { msg: Some(msg) },
    }) = serde_json::from_str::<ErrorResponse>(body)
    {
        return msg;
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}
