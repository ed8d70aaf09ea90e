//! Tenant resolution
//!
//! Maps the `X-Hub-Community` selector of a request to a `HubContext`.

use std::sync::Arc;

use tracing::{debug, warn};

use super::model::HubContext;
use super::registry::DirectoryCache;
use super::store::HubStore;
use crate::types::{PortalError, Result};

/// Request header carrying the tenant selector
pub const HUB_HEADER: &str = "x-hub-community";

pub struct HubResolver {
    directory: Arc<DirectoryCache>,
    store: Arc<HubStore>,
    default_slug: String,
}

impl HubResolver {
    pub fn new(
        directory: Arc<DirectoryCache>,
        store: Arc<HubStore>,
        default_slug: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            store,
            default_slug: default_slug.into(),
        }
    }

    /// Resolve a selector; blank selectors mean the default hub
    pub async fn resolve(&self, selector: Option<&str>) -> Result<HubContext> {
        match selector.map(str::trim).filter(|s| !s.is_empty()) {
            Some(tenant_id) => self.resolve_directory(tenant_id).await,
            None => self.resolve_default().await,
        }
    }

    async fn resolve_directory(&self, tenant_id: &str) -> Result<HubContext> {
        let entry = self
            .directory
            .find(tenant_id)
            .await?
            .filter(|entry| entry.active)
            .ok_or_else(|| {
                PortalError::TenantNotFound(format!(
                    "No hub registered for community: {}",
                    tenant_id
                ))
            })?;

        let mut ctx = HubContext::from_directory(&entry);
        if let Some(doc) = self.store.find_by_community(tenant_id).await {
            // the key signs for the directory owner, so it must belong to them
            if doc.admin_account == entry.owner_account {
                ctx.signing_key_ref = doc.signing_key_ref();
            } else {
                warn!(
                    tenant = %tenant_id,
                    owner = %entry.owner_account,
                    document_admin = %doc.admin_account,
                    slug = %doc.slug,
                    "Ignoring local signing key for a different admin account"
                );
            }
        }

        debug!(tenant = %tenant_id, admin = %ctx.admin_account, "Hub resolved from directory");
        Ok(ctx)
    }

    async fn resolve_default(&self) -> Result<HubContext> {
        let doc = self.store.load(&self.default_slug).await.ok_or_else(|| {
            PortalError::TenantNotFound(format!(
                "Default hub '{}' is not configured",
                self.default_slug
            ))
        })?;
        Ok(HubContext::from_document(&doc))
    }
}
