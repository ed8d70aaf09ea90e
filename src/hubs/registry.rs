//! Tenant directory client and cache
//!
//! The directory is the list of hubs known to the network. It is served
//! either by a remote registry service (`HttpDirectory`) or, for single-node
//! deployments, by `registry.json` in the hubs directory (`FileDirectory`).
//! `DirectoryCache` keeps the last listing for a bounded time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::model::{DirectoryEntry, RegistrationRequest};
use crate::types::PortalError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("Directory unreachable: {0}")]
    Network(String),

    #[error("Directory rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid directory response: {0}")]
    InvalidResponse(String),

    #[error("Hub {0} is already registered")]
    Duplicate(String),

    #[error("Directory storage error: {0}")]
    Storage(String),
}

impl From<DirectoryError> for PortalError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::Rejected { status, message } if (400..500).contains(&status) => {
                PortalError::Validation(message)
            }
            DirectoryError::Duplicate(_) => PortalError::Validation(err.to_string()),
            DirectoryError::Storage(_) => PortalError::Internal(err.to_string()),
            other => PortalError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// Source of directory listings
#[async_trait::async_trait]
pub trait DirectorySource: Send + Sync {
    /// Every entry, active or not
    async fn fetch_entries(&self) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Register a hub; returns the service's own result document
    async fn register(&self, request: &RegistrationRequest) -> Result<Value, DirectoryError>;
}

/// Listing payloads come either bare or wrapped in `{ hubs: [...] }`
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum Listing {
    Wrapped { hubs: Vec<DirectoryEntry> },
    Bare(Vec<DirectoryEntry>),
}

impl Listing {
    fn into_entries(self) -> Vec<DirectoryEntry> {
        match self {
            Listing::Wrapped { hubs } => hubs,
            Listing::Bare(hubs) => hubs,
        }
    }
}

// =============================================================================
// Remote directory
// =============================================================================

/// Remote registry service: `GET {base}/hubs`, `POST {base}/hubs/register`
pub struct HttpDirectory {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hubkeeper/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    async fn read_json(response: reqwest::Response) -> Result<Value, DirectoryError> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            let message = body
                .get("error")
                .or_else(|| body.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            return Err(DirectoryError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(body)
    }
}

#[async_trait::async_trait]
impl DirectorySource for HttpDirectory {
    async fn fetch_entries(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let url = format!("{}/hubs", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;

        let body = Self::read_json(response).await?;
        let listing: Listing = serde_json::from_value(body)
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))?;
        Ok(listing.into_entries())
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<Value, DirectoryError> {
        let url = format!("{}/hubs/register", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;

        Self::read_json(response).await
    }
}

// =============================================================================
// Local directory file
// =============================================================================

/// `registry.json` next to the hub documents
pub struct FileDirectory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DirectoryError::Storage(e.to_string())),
        };
        let listing: Listing = serde_json::from_str(&raw).map_err(|e| {
            DirectoryError::InvalidResponse(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(listing.into_entries())
    }
}

#[async_trait::async_trait]
impl DirectorySource for FileDirectory {
    async fn fetch_entries(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.read_all().await
    }

    async fn register(&self, request: &RegistrationRequest) -> Result<Value, DirectoryError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self.read_all().await?;
        if entries.iter().any(|e| e.tenant_id == request.hive_tag) {
            return Err(DirectoryError::Duplicate(request.hive_tag.clone()));
        }

        let entry = request.to_entry();
        entries.push(entry.clone());

        let body = serde_json::to_string_pretty(&Listing::Wrapped { hubs: entries })
            .map_err(|e| DirectoryError::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DirectoryError::Storage(e.to_string()))?;
        }
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| DirectoryError::Storage(e.to_string()))?;

        info!(tenant = %entry.tenant_id, "Hub registered in local directory");
        Ok(json!({ "success": true, "hub": entry }))
    }
}

// =============================================================================
// Cache
// =============================================================================

struct CachedListing {
    entries: Arc<Vec<DirectoryEntry>>,
    expires_at: Instant,
}

/// TTL cache in front of a `DirectorySource`
pub struct DirectoryCache {
    source: Arc<dyn DirectorySource>,
    ttl: Duration,
    cached: RwLock<Option<CachedListing>>,
    fetches: AtomicU64,
}

impl DirectoryCache {
    pub fn new(source: Arc<dyn DirectorySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: RwLock::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// Every directory entry, served from cache while fresh
    pub async fn entries(&self) -> Result<Arc<Vec<DirectoryEntry>>, DirectoryError> {
        if let Some(entries) = self.get_cached().await {
            return Ok(entries);
        }

        let mut cached = self.cached.write().await;
        // another task may have refreshed while we waited for the lock
        if let Some(listing) = cached.as_ref() {
            if listing.expires_at > Instant::now() {
                return Ok(Arc::clone(&listing.entries));
            }
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let entries = match self.source.fetch_entries().await {
            Ok(entries) => Arc::new(entries),
            Err(e) => {
                warn!(error = %e, "Directory fetch failed");
                return Err(e);
            }
        };
        debug!(count = entries.len(), "Directory refreshed");

        *cached = Some(CachedListing {
            entries: Arc::clone(&entries),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(entries)
    }

    async fn get_cached(&self) -> Option<Arc<Vec<DirectoryEntry>>> {
        let cached = self.cached.read().await;
        cached.as_ref().and_then(|listing| {
            if listing.expires_at > Instant::now() {
                Some(Arc::clone(&listing.entries))
            } else {
                None
            }
        })
    }

    /// Active entries sorted by display name
    pub async fn active_sorted(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let entries = self.entries().await?;
        let mut active: Vec<DirectoryEntry> =
            entries.iter().filter(|e| e.active).cloned().collect();
        active.sort_by(|a, b| {
            a.display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
        });
        Ok(active)
    }

    /// Look up one tenant by id, active or not
    pub async fn find(&self, tenant_id: &str) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let entries = self.entries().await?;
        Ok(entries.iter().find(|e| e.tenant_id == tenant_id).cloned())
    }

    /// Forward a registration and drop the cached listing
    pub async fn register(&self, request: &RegistrationRequest) -> Result<Value, DirectoryError> {
        let result = self.source.register(request).await?;
        self.invalidate().await;
        Ok(result)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// Number of times the source has been queried
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct StaticDirectory {
        entries: Vec<DirectoryEntry>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl DirectorySource for StaticDirectory {
        async fn fetch_entries(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
            if self.fail {
                return Err(DirectoryError::Network("connection refused".into()));
            }
            Ok(self.entries.clone())
        }

        async fn register(&self, request: &RegistrationRequest) -> Result<Value, DirectoryError> {
            Ok(json!({ "success": true, "hub": request.to_entry() }))
        }
    }

    fn entry(id: &str, name: &str, active: bool) -> DirectoryEntry {
        DirectoryEntry {
            tenant_id: id.into(),
            display_name: name.into(),
            owner_account: format!("{}-admin", id),
            language: None,
            latitude: None,
            longitude: None,
            active,
        }
    }

    fn request(tag: &str) -> RegistrationRequest {
        RegistrationRequest {
            hive_tag: tag.into(),
            name: "Test City".into(),
            latitude: None,
            longitude: None,
            owner: Some("city-admin".into()),
        }
    }

    #[tokio::test]
    async fn test_cache_serves_warm_listing() {
        let source = Arc::new(StaticDirectory {
            entries: vec![entry("hive-2", "Zeta", true), entry("hive-1", "alpha", true)],
            fail: false,
        });
        let cache = DirectoryCache::new(source, Duration::from_secs(300));

        cache.entries().await.unwrap();
        cache.find("hive-1").await.unwrap();
        cache.active_sorted().await.unwrap();
        assert_eq!(cache.fetch_count(), 1);

        cache.invalidate().await;
        cache.entries().await.unwrap();
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_expired_listing_is_refetched() {
        let source = Arc::new(StaticDirectory {
            entries: vec![entry("hive-1", "A", true)],
            fail: false,
        });
        let cache = DirectoryCache::new(source, Duration::from_millis(1));

        cache.entries().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.entries().await.unwrap();
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_active_sorted() {
        let source = Arc::new(StaticDirectory {
            entries: vec![
                entry("hive-3", "Metro", true),
                entry("hive-2", "Zeta", true),
                entry("hive-4", "Closed", false),
                entry("hive-1", "alpha", true),
            ],
            fail: false,
        });
        let cache = DirectoryCache::new(source, Duration::from_secs(300));

        let names: Vec<String> = cache
            .active_sorted()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.display_name)
            .collect();
        assert_eq!(names, vec!["alpha", "Metro", "Zeta"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let source = Arc::new(StaticDirectory {
            entries: vec![],
            fail: true,
        });
        let cache = DirectoryCache::new(source, Duration::from_secs(300));
        let err = cache.entries().await.unwrap_err();
        assert!(matches!(
            PortalError::from(err),
            PortalError::UpstreamUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_register_invalidates() {
        let source = Arc::new(StaticDirectory {
            entries: vec![],
            fail: false,
        });
        let cache = DirectoryCache::new(source, Duration::from_secs(300));
        cache.entries().await.unwrap();

        let result = cache.register(&request("hive-138395")).await.unwrap();
        assert_eq!(result["hub"]["tenantId"], "hive-138395");

        cache.entries().await.unwrap();
        assert_eq!(cache.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_file_directory_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            concat!(
                r#"{"hubs": [{"communityUsername": "hive-100000", "#,
                r#""communityName": "Global Taxi", "#,
                r#""owner": "taxi-admin", "active": true}]}"#
            ),
        )
        .unwrap();
        let directory = FileDirectory::new(&path);

        let entries = directory.fetch_entries().await.unwrap();
        assert_eq!(entries[0].owner_account, "taxi-admin");

        let result = directory.register(&request("hive-138395")).await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["hub"]["ownerAccount"], "city-admin");
        assert_eq!(directory.fetch_entries().await.unwrap().len(), 2);

        let dup = directory.register(&request("hive-138395")).await.unwrap_err();
        assert!(matches!(dup, DirectoryError::Duplicate(_)));
        assert!(matches!(PortalError::from(dup), PortalError::Validation(_)));
    }

    #[tokio::test]
    async fn test_file_directory_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let directory = FileDirectory::new(dir.path().join("registry.json"));
        assert!(directory.fetch_entries().await.unwrap().is_empty());
    }

    #[test]
    fn test_listing_shapes() {
        let bare: Listing = serde_json::from_str(
            r#"[{"tenantId": "hive-1", "displayName": "One", "ownerAccount": "a"}]"#,
        )
        .unwrap();
        assert_eq!(bare.into_entries().len(), 1);

        let wrapped: Listing = serde_json::from_str(r#"{"hubs": []}"#).unwrap();
        assert!(wrapped.into_entries().is_empty());
    }
}
