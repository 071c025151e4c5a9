//! Shard endpoint resolution.
//!
//! A shard is addressed by the URL of its core, e.g.
//! `https://solr1:8443/solr/books_shard1_replica_n1`. The last path
//! segment names the core and is used as the shard's identity for the
//! rest of the run.

use crate::types::{CheckError, CheckResult};
use reqwest::Url;

/// A resolved core address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardEndpoint {
    /// The address exactly as configured.
    pub raw: String,
    /// Host name or IP.
    pub host: String,
    /// Explicit port, or the scheme default.
    pub port: Option<u16>,
    /// URL path with trailing slashes removed.
    pub core_path: String,
    /// Final path segment; identifies the shard.
    pub core_name: String,
    base_url: Url,
}

impl ShardEndpoint {
    /// Parse a core URL.
    ///
    /// # Errors
    ///
    /// Returns `CheckError::Config` if the address is not an http(s) URL
    /// with a host and at least one path segment.
    pub fn parse(raw: &str) -> CheckResult<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| CheckError::Config(format!("invalid shard URL {raw:?}: {e}")))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(CheckError::Config(format!(
                "unsupported scheme {:?} in shard URL {raw:?}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CheckError::Config(format!("shard URL {raw:?} has no host")))?
            .to_string();

        let core_path = url.path().trim_end_matches('/').to_string();
        let core_name = core_path
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                CheckError::Config(format!(
                    "shard URL {raw:?} must end with a core name, e.g. http://host:8983/solr/core"
                ))
            })?
            .to_string();

        let mut base_url = url.clone();
        base_url.set_path(&core_path);
        base_url.set_query(None);
        base_url.set_fragment(None);

        Ok(Self {
            raw: raw.to_string(),
            host,
            port: url.port_or_known_default(),
            core_path,
            core_name,
            base_url,
        })
    }

    /// The core's base URL, without query or fragment.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the core's `/select` handler.
    pub fn select_url(&self) -> String {
        format!("{}/select", self.base_url.as_str().trim_end_matches('/'))
    }
}

impl std::fmt::Display for ShardEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.core_name, self.base_url)
    }
}

/// Resolve every configured address, failing on the first bad one.
pub fn resolve_all<S: AsRef<str>>(addresses: &[S]) -> CheckResult<Vec<ShardEndpoint>> {
    if addresses.is_empty() {
        return Err(CheckError::Config("at least one shard URL is required".into()));
    }
    addresses
        .iter()
        .map(|a| ShardEndpoint::parse(a.as_ref()))
        .collect()
}
