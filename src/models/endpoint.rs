use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use url::Url;

use crate::config::PoolConfig;
use crate::error::{RelayError, Result};

/// One upstream forwarder instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub name: Option<String>,
    pub url: Url,
}

impl Endpoint {
    /// Parse an endpoint base URL; only absolute http/https URLs are accepted
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let url = Url::parse(raw)
            .map_err(|e| RelayError::InvalidEndpoint(format!("{}: {}", raw, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::InvalidEndpoint(format!(
                "{}: scheme must be http or https",
                raw
            )));
        }
        if url.host_str().is_none() {
            return Err(RelayError::InvalidEndpoint(format!(
                "{}: missing host",
                raw
            )));
        }

        Ok(Self { name: None, url })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Base URL without a trailing slash
    pub fn base(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }

    /// Name for logs and reports
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.base())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base())
    }
}

/// Entry of the pool file: a bare URL or a record with at least a `url`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PoolEntry {
    Url(String),
    Record {
        url: String,
        #[serde(default)]
        name: Option<String>,
    },
}

impl PoolEntry {
    fn into_endpoint(self) -> Result<Endpoint> {
        match self {
            PoolEntry::Url(url) => Endpoint::parse(&url),
            PoolEntry::Record { url, name } => {
                let endpoint = Endpoint::parse(&url)?;
                Ok(match name {
                    Some(name) if !name.trim().is_empty() => endpoint.with_name(name.trim()),
                    _ => endpoint,
                })
            }
        }
    }
}

/// Read endpoints from a JSON pool file; a missing file contributes nothing
pub fn load_pool_file(path: &Path) -> Result<Vec<Endpoint>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(RelayError::InvalidConfig(format!(
                "cannot read pool file {}: {}",
                path.display(),
                e
            )))
        }
    };

    let entries: Vec<PoolEntry> = serde_json::from_str(&raw).map_err(|e| {
        RelayError::InvalidConfig(format!("malformed pool file {}: {}", path.display(), e))
    })?;

    entries.into_iter().map(PoolEntry::into_endpoint).collect()
}

/// Build the endpoint pool from inline entries followed by the pool file
///
/// Duplicates (by base URL) keep their first occurrence.
pub fn load_pool(config: &PoolConfig) -> Result<Vec<Endpoint>> {
    let mut endpoints = config
        .endpoints
        .iter()
        .map(|raw| Endpoint::parse(raw))
        .collect::<Result<Vec<_>>>()?;
    endpoints.extend(load_pool_file(&config.endpoints_file)?);

    let mut seen = HashSet::new();
    endpoints.retain(|endpoint| seen.insert(endpoint.base().to_string()));
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_endpoint_parse_and_base() {
        let endpoint = Endpoint::parse("https://w1.example/").unwrap();
        assert_eq!(endpoint.base(), "https://w1.example");
        assert_eq!(endpoint.label(), "https://w1.example");

        let named = Endpoint::parse("https://w2.example/relay/").unwrap().with_name("w2");
        assert_eq!(named.base(), "https://w2.example/relay");
        assert_eq!(named.label(), "w2");
    }

    #[test]
    fn test_endpoint_parse_rejects_bad_urls() {
        assert!(matches!(
            Endpoint::parse("w1.example"),
            Err(RelayError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            Endpoint::parse("ftp://w1.example"),
            Err(RelayError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_load_pool_file_mixed_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                "https://w1.example",
                {{"name": "w2", "url": "https://w2.example", "created_at": "2024-01-01"}}
            ]"#
        )
        .unwrap();

        let endpoints = load_pool_file(file.path()).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].base(), "https://w1.example");
        assert_eq!(endpoints[1].label(), "w2");
    }

    #[test]
    fn test_load_pool_file_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let endpoints = load_pool_file(&dir.path().join("absent.json")).unwrap();
        assert!(endpoints.is_empty());
    }

    #[test]
    fn test_load_pool_file_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            load_pool_file(file.path()),
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_load_pool_merges_and_dedups() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["https://w1.example/", "https://w3.example"]"#).unwrap();

        let config = PoolConfig {
            endpoints_file: file.path().to_path_buf(),
            endpoints: vec![
                "https://w1.example".to_string(),
                "https://w2.example".to_string(),
            ],
        };

        let bases: Vec<String> = load_pool(&config)
            .unwrap()
            .iter()
            .map(|e| e.base().to_string())
            .collect();
        assert_eq!(
            bases,
            vec![
                "https://w1.example",
                "https://w2.example",
                "https://w3.example"
            ]
        );
    }

    #[test]
    fn test_load_pool_rejects_invalid_inline_endpoint() {
        let config = PoolConfig {
            endpoints_file: PathBuf::from("/nonexistent/endpoints.json"),
            endpoints: vec!["not-a-url".to_string()],
        };
        assert!(matches!(
            load_pool(&config),
            Err(RelayError::InvalidEndpoint(_))
        ));
    }
}
