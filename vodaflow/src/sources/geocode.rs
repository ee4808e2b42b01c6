//! Address geocoding with a persistent cache.
//!
//! Lookups go through [`Geocoder`], which consults the on-disk cache first
//! and only calls the provider on a miss. Negative answers are cached too so
//! unknown addresses are not requested again; transport failures are not.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GeocoderConfig;
use crate::errors::{Result, VodaflowError};
use crate::utils::{normalize_for_cache, LatLon};

/// Resolves a free-text query to coordinates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GeocodeProvider: Send + Sync + std::fmt::Debug {
    /// `Ok(None)` when the provider knows no such place.
    async fn lookup(&self, query: &str) -> Result<Option<LatLon>>;
}

/// Nominatim search client.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: reqwest::Client,
    config: GeocoderConfig,
}

#[derive(Debug, Deserialize)]
struct NominatimHit {
    lat: String,
    lon: String,
}

impl NominatimClient {
    /// Builds a client sending the configured user agent.
    pub fn new(config: GeocoderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl GeocodeProvider for NominatimClient {
    async fn lookup(&self, query: &str) -> Result<Option<LatLon>> {
        let request = self.client.get(&self.config.endpoint).query(&[
            ("q", query),
            ("format", "json"),
            ("limit", "1"),
            ("addressdetails", "0"),
        ]);
        let response = crate::pipeline::send_with_retry(&self.config.retry, request).await?;
        let hits: Vec<NominatimHit> = response.json().await?;
        let Some(hit) = hits.first() else {
            return Ok(None);
        };
        let lat = hit.lat.parse::<f64>();
        let lon = hit.lon.parse::<f64>();
        match (lat, lon) {
            (Ok(lat), Ok(lon)) => Ok(Some(LatLon::new(lat, lon))),
            _ => Err(VodaflowError::Api(format!(
                "unparseable coordinates '{}', '{}'",
                hit.lat, hit.lon
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct CacheEntry {
    lat: Option<f64>,
    lon: Option<f64>,
}

impl CacheEntry {
    fn coords(self) -> Option<LatLon> {
        Some(LatLon::new(self.lat?, self.lon?))
    }
}

impl From<Option<LatLon>> for CacheEntry {
    fn from(value: Option<LatLon>) -> Self {
        Self {
            lat: value.map(|c| c.lat),
            lon: value.map(|c| c.lon),
        }
    }
}

/// Normalized address to coordinates; `None` records a known miss.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodeCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl GeocodeCache {
    /// Loads the cache. A missing, unreadable or corrupt file gives an
    /// empty cache.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No geocode cache yet");
                return Self::default();
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Cannot read geocode cache, starting empty"
                );
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(entries) => Self { entries },
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Corrupt geocode cache, starting empty"
                );
                Self::default()
            }
        }
    }

    /// Writes the cache as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }

    /// Outer `None`: unknown key. Inner `None`: cached miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<LatLon>> {
        self.entries.get(key).map(|e| e.coords())
    }

    /// Records a result.
    pub fn insert(&mut self, key: impl Into<String>, value: Option<LatLon>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a lookup was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Answered from the cache (possibly a cached miss).
    Cached(Option<LatLon>),
    /// Fetched from the provider.
    Found(LatLon),
    /// The provider knows no such place; now cached.
    NotFound,
    /// The provider call failed; nothing cached.
    Failed(String),
}

impl Lookup {
    /// The coordinates, if any.
    #[must_use]
    pub fn coords(&self) -> Option<LatLon> {
        match self {
            Self::Cached(c) => *c,
            Self::Found(c) => Some(*c),
            Self::NotFound | Self::Failed(_) => None,
        }
    }
}

/// Cache-first geocoder.
pub struct Geocoder {
    provider: Arc<dyn GeocodeProvider>,
    cache: GeocodeCache,
    city_hint: String,
    delay: Duration,
}

impl std::fmt::Debug for Geocoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Geocoder")
            .field("cache_entries", &self.cache.len())
            .field("city_hint", &self.city_hint)
            .finish_non_exhaustive()
    }
}

impl Geocoder {
    /// Creates a geocoder over a loaded cache.
    pub fn new(
        provider: Arc<dyn GeocodeProvider>,
        cache: GeocodeCache,
        city_hint: impl Into<String>,
        delay: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            city_hint: city_hint.into(),
            delay,
        }
    }

    /// Resolves an address. Empty addresses resolve to a miss without any
    /// provider call.
    pub async fn locate(&mut self, address: &str) -> Lookup {
        let address = address.trim();
        if address.is_empty() {
            return Lookup::Cached(None);
        }
        let key = normalize_for_cache(address);
        if let Some(hit) = self.cache.get(&key) {
            return Lookup::Cached(hit);
        }

        let query = format!("{} {address}", self.city_hint);
        let result = self.provider.lookup(&query).await;
        let lookup = match result {
            Ok(Some(coords)) => {
                self.cache.insert(key, Some(coords));
                Lookup::Found(coords)
            }
            Ok(None) => {
                self.cache.insert(key, None);
                Lookup::NotFound
            }
            Err(e) => {
                debug!(address, error = %e, "Geocoding failed");
                return Lookup::Failed(e.to_string());
            }
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        lookup
    }

    /// The cache, for persisting.
    #[must_use]
    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use tempfile::tempdir;

    fn geocoder(provider: MockGeocodeProvider, cache: GeocodeCache) -> Geocoder {
        Geocoder::new(Arc::new(provider), cache, "Львів", Duration::ZERO)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_provider() {
        let mut provider = MockGeocodeProvider::new();
        provider.expect_lookup().times(0);
        let mut cache = GeocodeCache::default();
        cache.insert("шевченка, 12", Some(LatLon::new(49.8, 24.0)));
        cache.insert("нема, 1", None);
        let mut geo = geocoder(provider, cache);

        assert_eq!(
            geo.locate("вул. Шевченка, 12").await,
            Lookup::Cached(Some(LatLon::new(49.8, 24.0)))
        );
        assert_eq!(geo.locate("Нема, 1").await, Lookup::Cached(None));
    }

    #[tokio::test]
    async fn test_miss_queries_with_city_hint_and_caches() {
        let mut provider = MockGeocodeProvider::new();
        provider
            .expect_lookup()
            .with(eq("Львів Зелена 5"))
            .times(1)
            .returning(|_| Ok(Some(LatLon::new(49.82, 24.05))));
        let mut geo = geocoder(provider, GeocodeCache::default());

        assert_eq!(geo.locate("Зелена 5").await, Lookup::Found(LatLon::new(49.82, 24.05)));
        assert!(matches!(geo.locate("зелена 5").await, Lookup::Cached(Some(_))));
    }

    #[tokio::test]
    async fn test_not_found_cached_but_errors_not() {
        let mut provider = MockGeocodeProvider::new();
        provider
            .expect_lookup()
            .with(eq("Львів Unknown 1"))
            .times(1)
            .returning(|_| Ok(None));
        provider
            .expect_lookup()
            .with(eq("Львів Flaky 2"))
            .times(2)
            .returning(|_| Err(VodaflowError::Api("timeout".to_string())));
        let mut geo = geocoder(provider, GeocodeCache::default());

        assert_eq!(geo.locate("Unknown 1").await, Lookup::NotFound);
        assert_eq!(geo.locate("Unknown 1").await, Lookup::Cached(None));
        assert!(matches!(geo.locate("Flaky 2").await, Lookup::Failed(_)));
        assert!(matches!(geo.locate("Flaky 2").await, Lookup::Failed(_)));
        assert_eq!(geo.cache().len(), 1);
    }

    #[test]
    fn test_cache_file_round_trip_keeps_misses() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("address_cache.json");
        let mut cache = GeocodeCache::default();
        cache.insert("a", Some(LatLon::new(1.0, 2.0)));
        cache.insert("b", None);
        cache.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("null"));
        let loaded = GeocodeCache::load(&path);
        assert_eq!(loaded, cache);
        assert_eq!(loaded.get("b"), Some(None));
        assert_eq!(loaded.get("c"), None);
    }

    #[test]
    fn test_unreadable_cache_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(GeocodeCache::load(&path).is_empty());
        assert!(GeocodeCache::load(&dir.path().join("missing.json")).is_empty());
        assert!(GeocodeCache::load(dir.path()).is_empty());
    }
}
