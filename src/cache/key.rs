//! Request fingerprints shared by every cache tier

use std::fmt;

use reqwest::Url;
use sha2::{Digest, Sha256};

/// Stable fingerprint of a request
///
/// Built from the upper-cased method, the path with any trailing slash
/// removed, and the query parameters sorted by name then value. Two requests
/// that differ only in parameter order produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds a key from its parts
    pub fn new<I, K, V>(method: &str, path: &str, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut params: Vec<(String, String)> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        params.sort();

        let mut fingerprint = format!("{} {}", method.trim().to_uppercase(), normalize_path(path));
        if !params.is_empty() {
            fingerprint.push('?');
            let query: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            fingerprint.push_str(&query.join("&"));
        }
        Self(fingerprint)
    }

    /// Builds a key for a full URL
    ///
    /// The origin is folded into the path so identical paths on different
    /// hosts never collide. Fragments are ignored.
    pub fn from_url(method: &str, url: &Url) -> Self {
        let path = match url.host_str() {
            Some(_) => format!("{}{}", origin_of(url), url.path()),
            None => url.path().to_string(),
        };
        let params: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self::new(method, &path, params)
    }

    /// The fingerprint text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 hex digest of the fingerprint
    ///
    /// Filesystem-safe and stable across runs; the disk tier names its files
    /// after it.
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn origin_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_without_params() {
        let key = CacheKey::new("get", "/cards/random", Vec::<(String, String)>::new());
        assert_eq!(key.as_str(), "GET /cards/random");
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = CacheKey::new("GET", "/cards/search", [("q", "bolt"), ("page", "2")]);
        let b = CacheKey::new("GET", "/cards/search", [("page", "2"), ("q", "bolt")]);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "GET /cards/search?page=2&q=bolt");
    }

    #[test]
    fn test_trailing_slash_is_ignored() {
        let a = CacheKey::new("GET", "/sets/", Vec::<(String, String)>::new());
        let b = CacheKey::new("GET", "/sets", Vec::<(String, String)>::new());
        assert_eq!(a, b);

        let root = CacheKey::new("GET", "/", Vec::<(String, String)>::new());
        assert_eq!(root.as_str(), "GET /");
    }

    #[test]
    fn test_param_values_are_encoded() {
        let key = CacheKey::new("GET", "/cards/named", [("fuzzy", "lightning bolt&co")]);
        assert_eq!(key.as_str(), "GET /cards/named?fuzzy=lightning%20bolt%26co");

        let key = CacheKey::new("GET", "/cards/search", [("q", "t:elf~é"), ("a=b", "1")]);
        assert_eq!(key.as_str(), "GET /cards/search?a%3Db=1&q=t%3Aelf~%C3%A9");
    }

    #[test]
    fn test_from_url_includes_origin_and_sorts_query() {
        let url = Url::parse("https://API.example.com/cards/search?q=elf&order=name#top")
            .expect("valid url");
        let key = CacheKey::from_url("GET", &url);
        assert_eq!(
            key.as_str(),
            "GET https://api.example.com/cards/search?order=name&q=elf"
        );
    }

    #[test]
    fn test_same_path_on_different_hosts_differs() {
        let a = Url::parse("https://a.example.com/img.png").expect("valid url");
        let b = Url::parse("https://b.example.com/img.png").expect("valid url");
        assert_ne!(CacheKey::from_url("GET", &a), CacheKey::from_url("GET", &b));
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let key = CacheKey::new("GET", "/cards/random", Vec::<(String, String)>::new());
        let digest = key.digest();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, key.clone().digest());

        let other = CacheKey::new("GET", "/cards/other", Vec::<(String, String)>::new());
        assert_ne!(digest, other.digest());
    }
}
