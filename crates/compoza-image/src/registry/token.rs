//! Bearer token challenge parsing and the per-scope token cache

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// How long an issued registry token is reused
pub const TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Upper bound on cached tokens
pub const TOKEN_CACHE_CAPACITY: usize = 100;

/// Parsed `WWW-Authenticate: Bearer realm="...",service="...",scope="..."`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse a challenge header; `None` for non-Bearer schemes or a missing realm
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        for (key, value) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }

        Some(Self {
            realm: realm?,
            service,
            scope,
        })
    }

    /// Token endpoint URL with `service` and `scope` query parameters
    pub fn token_url(&self, fallback_scope: &str) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(&self.realm)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &self.service {
                query.append_pair("service", service);
            }
            query.append_pair("scope", self.scope.as_deref().unwrap_or(fallback_scope));
        }
        Ok(url)
    }
}

// Values are quoted and may themselves contain commas
// (scope="repository:a/b:pull,push"), so split on commas outside quotes only.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut flush = |current: &mut String| {
        if let Some((k, v)) = current.split_once('=') {
            let v = v.trim().trim_matches('"').to_string();
            out.push((k.trim().to_string(), v));
        }
        current.clear();
    };

    for ch in params.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => flush(&mut current),
            _ => current.push(ch),
        }
    }
    flush(&mut current);
    out
}

struct CachedToken {
    token: String,
    inserted_at: Instant,
}

/// Bounded token cache keyed by scope
///
/// Eviction removes expired tokens first, then the oldest remaining one.
pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new(TOKEN_TTL, TOKEN_CACHE_CAPACITY)
    }
}

impl TokenCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, scope: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(scope) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.token.clone()),
            Some(_) => {
                entries.remove(scope);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, scope: impl Into<String>, token: impl Into<String>) {
        let scope = scope.into();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&scope) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);

            if entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            scope,
            CachedToken {
                token: token.into(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge() {
        let header = r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/nginx:pull")
        );
    }

    #[test]
    fn test_parse_challenge_scope_with_comma() {
        let header = r#"Bearer realm="https://ghcr.io/token",scope="repository:org/app:pull,push""#;
        let challenge = BearerChallenge::parse(header).unwrap();
        assert_eq!(challenge.scope.as_deref(), Some("repository:org/app:pull,push"));
        assert!(challenge.service.is_none());
    }

    #[test]
    fn test_parse_rejects_basic_and_missing_realm() {
        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="x""#).is_none());
        assert!(BearerChallenge::parse("").is_none());
    }

    #[test]
    fn test_token_url() {
        let challenge = BearerChallenge {
            realm: "https://auth.docker.io/token".to_string(),
            service: Some("registry.docker.io".to_string()),
            scope: None,
        };
        let url = challenge.token_url("repository:library/nginx:pull").unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.docker.io/token?service=registry.docker.io&scope=repository%3Alibrary%2Fnginx%3Apull"
        );
    }

    #[test]
    fn test_token_cache_expiry() {
        let cache = TokenCache::new(Duration::from_millis(0), 10);
        cache.insert("a", "t");
        assert!(cache.get("a").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_token_cache_evicts_oldest_when_full() {
        let cache = TokenCache::new(Duration::from_secs(60), 2);
        cache.insert("a", "1");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", "2");
        cache.insert("c", "3");

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").as_deref(), Some("2"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn test_token_cache_replaces_existing_scope() {
        let cache = TokenCache::new(Duration::from_secs(60), 1);
        cache.insert("a", "1");
        cache.insert("a", "2");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").as_deref(), Some("2"));
    }
}
