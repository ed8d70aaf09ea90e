//! File-backed hub documents
//!
//! Each hub lives in `<hubs_dir>/<slug>.json`. Active documents are cached
//! after the first read; every write drops the cached copy.

use std::path::{Path, PathBuf};

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::model::{Branding, HubDocument, HubSettings, HubUpdate, NewHub};
use crate::types::{PortalError, Result};

/// File name of the local tenant directory, not a hub document
pub const REGISTRY_FILE: &str = "registry.json";

pub struct HubStore {
    hubs_dir: PathBuf,
    cache: DashMap<String, HubDocument>,
}

impl HubStore {
    pub fn new(hubs_dir: impl Into<PathBuf>) -> Self {
        Self {
            hubs_dir: hubs_dir.into(),
            cache: DashMap::new(),
        }
    }

    pub fn hubs_dir(&self) -> &Path {
        &self.hubs_dir
    }

    fn path_for(&self, slug: &str) -> PathBuf {
        self.hubs_dir.join(format!("{}.json", slug))
    }

    /// Active hub document for `slug`.
    ///
    /// Missing, inactive and unreadable documents all yield `None`; the
    /// last case is logged.
    pub async fn load(&self, slug: &str) -> Option<HubDocument> {
        if let Some(doc) = self.cache.get(slug) {
            return Some(doc.clone());
        }
        if !is_valid_slug(slug) {
            return None;
        }

        match self.read_document(slug).await {
            Ok(Some(doc)) if doc.active => {
                self.cache.insert(slug.to_string(), doc.clone());
                Some(doc)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(slug = %slug, error = %e, "Failed to load hub");
                None
            }
        }
    }

    /// Read a document regardless of its `active` flag
    async fn read_document(&self, slug: &str) -> Result<Option<HubDocument>> {
        let path = self.path_for(slug);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let doc = serde_json::from_str(&raw)
            .map_err(|e| PortalError::Internal(format!("{}: {}", path.display(), e)))?;
        Ok(Some(doc))
    }

    /// All active hub documents, sorted by slug
    pub async fn all_hubs(&self) -> Result<Vec<HubDocument>> {
        let mut entries = match tokio::fs::read_dir(&self.hubs_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut hubs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == REGISTRY_FILE {
                continue;
            }
            if let Some(slug) = name.strip_suffix(".json") {
                if let Some(doc) = self.load(slug).await {
                    hubs.push(doc);
                }
            }
        }

        hubs.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(hubs)
    }

    /// Active document whose `community` matches
    pub async fn find_by_community(&self, community: &str) -> Option<HubDocument> {
        match self.all_hubs().await {
            Ok(hubs) => hubs.into_iter().find(|doc| doc.community == community),
            Err(e) => {
                warn!(community = %community, error = %e, "Failed to scan hub documents");
                None
            }
        }
    }

    pub async fn create(&self, new_hub: NewHub) -> Result<HubDocument> {
        for (field, value) in [
            ("slug", &new_hub.slug),
            ("name", &new_hub.name),
            ("community", &new_hub.community),
            ("adminAccount", &new_hub.admin_account),
        ] {
            if value.trim().is_empty() {
                return Err(PortalError::Validation(format!(
                    "Missing required field: {}",
                    field
                )));
            }
        }
        if !is_valid_slug(&new_hub.slug) {
            return Err(PortalError::Validation(format!(
                "Invalid slug '{}': use lowercase letters, digits and hyphens",
                new_hub.slug
            )));
        }

        let path = self.path_for(&new_hub.slug);
        if tokio::fs::try_exists(&path).await? {
            return Err(PortalError::Validation("Hub already exists".into()));
        }

        let doc = HubDocument {
            slug: new_hub.slug,
            name: new_hub.name,
            community: new_hub.community,
            admin_account: new_hub.admin_account,
            posting_key: new_hub.posting_key,
            posting_key_env: new_hub.posting_key_env,
            language: new_hub.language,
            active: true,
            settings: new_hub.settings.unwrap_or_else(HubSettings::default),
            branding: new_hub.branding.unwrap_or_else(Branding::default),
            created_at: Utc::now(),
            updated_at: None,
        };

        tokio::fs::create_dir_all(&self.hubs_dir).await?;
        self.write_document(&doc).await?;
        self.cache.remove(&doc.slug);

        info!(slug = %doc.slug, community = %doc.community, "Hub created");
        Ok(doc)
    }

    /// Apply a partial update; the slug never changes
    pub async fn update(&self, slug: &str, update: HubUpdate) -> Result<HubDocument> {
        let mut doc = self
            .read_document(slug)
            .await?
            .ok_or_else(|| PortalError::NotFound(format!("Hub {} not found", slug)))?;

        if let Some(name) = update.name {
            doc.name = name;
        }
        if let Some(community) = update.community {
            doc.community = community;
        }
        if let Some(admin_account) = update.admin_account {
            doc.admin_account = admin_account;
        }
        if let Some(posting_key) = update.posting_key {
            doc.posting_key = Some(posting_key);
        }
        if let Some(posting_key_env) = update.posting_key_env {
            doc.posting_key_env = Some(posting_key_env);
        }
        if let Some(language) = update.language {
            doc.language = Some(language);
        }
        if let Some(active) = update.active {
            doc.active = active;
        }
        if let Some(settings) = update.settings {
            doc.settings = settings;
        }
        if let Some(branding) = update.branding {
            doc.branding = branding;
        }
        doc.updated_at = Some(Utc::now());

        self.write_document(&doc).await?;
        self.cache.remove(slug);

        debug!(slug = %slug, "Hub updated");
        Ok(doc)
    }

    pub async fn deactivate(&self, slug: &str) -> Result<HubDocument> {
        self.update(
            slug,
            HubUpdate {
                active: Some(false),
                ..HubUpdate::default()
            },
        )
        .await
    }

    async fn write_document(&self, doc: &HubDocument) -> Result<()> {
        let body = serde_json::to_string_pretty(doc)
            .map_err(|e| PortalError::Internal(e.to_string()))?;
        tokio::fs::write(self.path_for(&doc.slug), body).await?;
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Slugs are `[a-z0-9-]+`
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Derive a slug from a display name
pub fn generate_slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        let ch = if ch.is_whitespace() { '-' } else { ch };
        if !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-') {
            continue;
        }
        if ch == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(ch);
    }
    slug.trim_matches('-').to_string()
}
