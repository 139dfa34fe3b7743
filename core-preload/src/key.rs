//! Cache key derivation.
//!
//! Keys are pure functions of the request: no I/O and no shared state, so
//! the same URL always lands on the same cache file across processes.

use crate::error::{PreloadError, Result};
use crate::manifest::{Manifest, VariantPolicy};
use crate::request::PreloadRequest;
use core_runtime::logging::redact_url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::trace;
use url::Url;

/// Media suffixes cut from host-agnostic keys.
const MEDIA_SUFFIXES: &[&str] = &[".mp4", ".mov", ".mkv"];

/// Stable identifier of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// On-disk data file name: hex SHA-256 of the key plus `.cache`.
    ///
    /// Hashing keeps arbitrary URL characters out of the file system and
    /// bounds the name length.
    pub fn file_name(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        format!("{}.cache", hex::encode(digest))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// URL normalization rules applied before a URL becomes a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyNormalization {
    /// Query parameters dropped from the key (signatures, expiry stamps).
    /// Matched case-insensitively.
    pub volatile_query_params: Vec<String>,
    /// Drop the whole query string.
    pub strip_all_query: bool,
    /// Key on the path alone: scheme and host dropped, media suffix cut,
    /// `/` replaced by `_`. The same video served from different CDN hosts
    /// then shares one entry.
    pub host_agnostic: bool,
    /// Separator for URL lists in the `url` field. The first URL is the
    /// master, the rest are backups.
    pub url_list_separator: Option<String>,
}

impl KeyNormalization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_volatile_param(mut self, name: impl Into<String>) -> Self {
        self.volatile_query_params.push(name.into());
        self
    }

    pub fn with_strip_all_query(mut self, strip: bool) -> Self {
        self.strip_all_query = strip;
        self
    }

    pub fn with_host_agnostic(mut self, enabled: bool) -> Self {
        self.host_agnostic = enabled;
        self
    }

    pub fn with_url_list_separator(mut self, separator: impl Into<String>) -> Self {
        self.url_list_separator = Some(separator.into());
        self
    }

    fn is_volatile(&self, name: &str) -> bool {
        self.volatile_query_params
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name))
    }
}

/// Outcome of resolving a request: where to fetch from and where to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub key: CacheKey,
    pub url: String,
    pub backup_urls: Vec<String>,
}

impl ResolvedSource {
    /// Master URL followed by backups, in failover order.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.url.as_str()).chain(self.backup_urls.iter().map(String::as_str))
    }
}

/// Derives cache keys from preload requests.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyResolver {
    normalization: KeyNormalization,
    policy: VariantPolicy,
}

impl CacheKeyResolver {
    pub fn new(normalization: KeyNormalization, policy: VariantPolicy) -> Self {
        Self {
            normalization,
            policy,
        }
    }

    /// Resolve a request to its key and fetch source.
    ///
    /// A manifest takes precedence over the plain URL.
    ///
    /// # Errors
    ///
    /// - [`PreloadError::InvalidManifest`] for malformed or empty manifests
    /// - [`PreloadError::InvalidRequest`] for unusable URLs
    pub fn resolve(&self, request: &PreloadRequest) -> Result<ResolvedSource> {
        if let Some(json) = request.manifest_json() {
            let manifest = Manifest::parse(json)?;
            let variant = manifest.select(self.policy).ok_or_else(|| {
                PreloadError::InvalidManifest("no variant matches the selection policy".to_string())
            })?;

            trace!(
                url = %redact_url(&variant.master_url),
                codec = ?variant.codec,
                backups = variant.backup_urls.len(),
                "Selected manifest variant"
            );

            return Ok(ResolvedSource {
                key: self.key_for_url(&variant.master_url)?,
                url: variant.master_url.clone(),
                backup_urls: variant.backup_urls.clone(),
            });
        }

        let raw = request
            .url()
            .ok_or_else(|| PreloadError::InvalidRequest("request has no url".to_string()))?;

        let mut urls = self.split_url_list(raw).into_iter();
        let url = urls
            .next()
            .ok_or_else(|| PreloadError::InvalidRequest("request has no url".to_string()))?;

        Ok(ResolvedSource {
            key: self.key_for_url(&url)?,
            url,
            backup_urls: urls.collect(),
        })
    }

    /// Key for a bare URL, as used by the external query operations.
    pub fn key_for_url(&self, raw: &str) -> Result<CacheKey> {
        let first = self
            .split_url_list(raw)
            .into_iter()
            .next()
            .ok_or_else(|| PreloadError::InvalidRequest("empty url".to_string()))?;
        let key = self.normalize(&first)?;
        trace!(key = %key, "Derived cache key");
        Ok(CacheKey::new(key))
    }

    fn split_url_list(&self, raw: &str) -> Vec<String> {
        match self.normalization.url_list_separator.as_deref() {
            Some(sep) if !sep.is_empty() => raw
                .split(sep)
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect(),
            _ => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Vec::new()
                } else {
                    vec![trimmed.to_string()]
                }
            }
        }
    }

    fn normalize(&self, raw: &str) -> Result<String> {
        let parsed = Url::parse(raw).map_err(|e| {
            PreloadError::InvalidRequest(format!("unparseable url {}: {}", redact_url(raw), e))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PreloadError::InvalidRequest(format!(
                "unsupported url scheme '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| PreloadError::InvalidRequest("url has no host".to_string()))?;

        if self.normalization.host_agnostic {
            let mut path = parsed.path().trim_start_matches('/').to_string();
            for suffix in MEDIA_SUFFIXES {
                if let Some(pos) = path.find(suffix) {
                    path.truncate(pos);
                }
            }
            if path.is_empty() {
                return Err(PreloadError::InvalidRequest(
                    "url has no path to key on".to_string(),
                ));
            }
            return Ok(path.replace('/', "_"));
        }

        let mut key = format!("{}://{}", parsed.scheme(), host);
        if let Some(port) = parsed.port() {
            key.push_str(&format!(":{}", port));
        }
        key.push_str(parsed.path());

        if !self.normalization.strip_all_query && parsed.query().is_some() {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(name, _)| !self.normalization.is_volatile(name))
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();

            if !kept.is_empty() {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(kept)
                    .finish();
                key.push('?');
                key.push_str(&query);
            }
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(normalization: KeyNormalization) -> CacheKeyResolver {
        CacheKeyResolver::new(normalization, VariantPolicy::default())
    }

    #[test]
    fn test_plain_url_key_keeps_scheme_host_path() {
        let key = CacheKeyResolver::default()
            .key_for_url("HTTPS://CDN.Example.com/v/1.mp4#t=10")
            .unwrap();
        assert_eq!(key.as_str(), "https://cdn.example.com/v/1.mp4");
    }

    #[test]
    fn test_volatile_params_are_dropped() {
        let r = resolver(
            KeyNormalization::new()
                .with_volatile_param("sign")
                .with_volatile_param("T"),
        );
        let a = r
            .key_for_url("https://cdn.example.com/v/1.mp4?sign=abc&t=1&quality=hd")
            .unwrap();
        let b = r
            .key_for_url("https://cdn.example.com/v/1.mp4?sign=xyz&t=2&quality=hd")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://cdn.example.com/v/1.mp4?quality=hd");
    }

    #[test]
    fn test_query_kept_without_normalization() {
        let r = CacheKeyResolver::default();
        let a = r.key_for_url("https://cdn.example.com/v?id=1").unwrap();
        let b = r.key_for_url("https://cdn.example.com/v?id=2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_strip_all_query() {
        let r = resolver(KeyNormalization::new().with_strip_all_query(true));
        let key = r.key_for_url("https://cdn.example.com/v/1.mp4?a=1&b=2").unwrap();
        assert_eq!(key.as_str(), "https://cdn.example.com/v/1.mp4");
    }

    #[test]
    fn test_host_agnostic_key() {
        let r = resolver(KeyNormalization::new().with_host_agnostic(true));
        let a = r
            .key_for_url("https://cdn-a.example.com/stream/abc/video.mp4?sign=1")
            .unwrap();
        let b = r
            .key_for_url("http://cdn-b.example.net/stream/abc/video.mp4")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "stream_abc_video");
    }

    #[test]
    fn test_rejects_non_http() {
        let err = CacheKeyResolver::default()
            .key_for_url("file:///etc/passwd")
            .unwrap_err();
        assert!(matches!(err, PreloadError::InvalidRequest(_)));

        assert!(CacheKeyResolver::default().key_for_url("not a url").is_err());
    }

    #[test]
    fn test_url_list_separator() {
        let r = resolver(KeyNormalization::new().with_url_list_separator(";"));
        let request = PreloadRequest::builder()
            .url("https://a.example.com/v.mp4;https://b.example.com/v.mp4")
            .cache_dir("/tmp/preload")
            .build()
            .unwrap();

        let source = r.resolve(&request).unwrap();
        assert_eq!(source.url, "https://a.example.com/v.mp4");
        assert_eq!(source.backup_urls, vec!["https://b.example.com/v.mp4"]);
        assert_eq!(source.candidates().count(), 2);
    }

    #[test]
    fn test_manifest_takes_precedence() {
        let request = PreloadRequest::builder()
            .url("https://ignored.example.com/x.mp4")
            .manifest_json(
                r#"{"stream": {"h264": [{"master_url": "https://cdn.example.com/m.mp4",
                    "backup_urls": ["https://backup.example.com/m.mp4"], "width": 1, "height": 1}]}}"#,
            )
            .cache_dir("/tmp/preload")
            .build()
            .unwrap();

        let source = CacheKeyResolver::default().resolve(&request).unwrap();
        assert_eq!(source.key.as_str(), "https://cdn.example.com/m.mp4");
        assert_eq!(source.backup_urls, vec!["https://backup.example.com/m.mp4"]);
    }

    #[test]
    fn test_malformed_manifest() {
        let request = PreloadRequest::builder()
            .manifest_json("{\"stream\": ")
            .cache_dir("/tmp/preload")
            .build()
            .unwrap();

        let err = CacheKeyResolver::default().resolve(&request).unwrap_err();
        assert!(matches!(err, PreloadError::InvalidManifest(_)));
    }

    #[test]
    fn test_file_name_is_stable_hash() {
        let key = CacheKey::new("https://cdn.example.com/v/1.mp4");
        let name = key.file_name();
        assert_eq!(name, CacheKey::new("https://cdn.example.com/v/1.mp4").file_name());
        assert!(name.ends_with(".cache"));
        assert_eq!(name.len(), 64 + ".cache".len());
    }
}
