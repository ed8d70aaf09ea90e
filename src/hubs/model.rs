//! Hub data model
//!
//! A hub is one tenant of the portal: a Hive community plus the account
//! that administers it. Hubs come from two places, the tenant directory
//! (`DirectoryEntry`) and local hub documents (`HubDocument`). Both are
//! folded into a per-request `HubContext`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PortalError, Result};

/// Where the posting key for a hub's admin account comes from
#[derive(Clone, PartialEq, Eq)]
pub enum SigningKeyRef {
    /// WIF stored in the hub document
    Inline(String),
    /// Name of an environment variable holding the WIF
    Env(String),
}

impl fmt::Debug for SigningKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKeyRef::Inline(_) => f.write_str("Inline(<redacted>)"),
            SigningKeyRef::Env(name) => f.debug_tuple("Env").field(name).finish(),
        }
    }
}

/// Per-hub behaviour switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    pub allow_driver_posts: bool,
    pub require_approval: bool,
    pub max_posts_per_day: u32,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            allow_driver_posts: true,
            require_approval: false,
            max_posts_per_day: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Branding {
    pub primary_color: String,
    pub logo: String,
}

impl Default for Branding {
    fn default() -> Self {
        Self {
            primary_color: "#e31337".to_string(),
            logo: String::new(),
        }
    }
}

/// Resolved tenant for the duration of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubContext {
    pub tenant_id: String,
    pub display_name: String,
    pub community_id: String,
    pub admin_account: String,
    pub signing_key_ref: Option<SigningKeyRef>,
    pub language: Option<String>,
    pub settings: HubSettings,
}

impl HubContext {
    /// Fail unless the hub can address the chain; a gap here is bad hub config
    pub fn ensure_routable(&self) -> Result<()> {
        if self.community_id.trim().is_empty() {
            return Err(PortalError::Config(format!(
                "Hub '{}' has no community configured",
                self.tenant_id
            )));
        }
        if self.admin_account.trim().is_empty() {
            return Err(PortalError::Config(format!(
                "Hub '{}' has no admin account configured",
                self.tenant_id
            )));
        }
        Ok(())
    }

    /// Context for a directory entry; the tenant id doubles as the community id
    pub fn from_directory(entry: &DirectoryEntry) -> Self {
        Self {
            tenant_id: entry.tenant_id.clone(),
            display_name: entry.display_name.clone(),
            community_id: entry.tenant_id.clone(),
            admin_account: entry.owner_account.clone(),
            signing_key_ref: None,
            language: entry.language.clone(),
            settings: HubSettings::default(),
        }
    }

    /// Context for a local hub document
    pub fn from_document(doc: &HubDocument) -> Self {
        Self {
            tenant_id: doc.slug.clone(),
            display_name: doc.name.clone(),
            community_id: doc.community.clone(),
            admin_account: doc.admin_account.clone(),
            signing_key_ref: doc.signing_key_ref(),
            language: doc.language.clone(),
            settings: doc.settings.clone(),
        }
    }

    /// Client-facing view without credentials
    pub fn summary(&self) -> HubSummary {
        HubSummary {
            tenant_id: self.tenant_id.clone(),
            name: self.display_name.clone(),
            community: self.community_id.clone(),
            admin_account: self.admin_account.clone(),
            language: self.language.clone(),
            settings: self.settings.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSummary {
    pub tenant_id: String,
    pub name: String,
    pub community: String,
    pub admin_account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub settings: HubSettings,
}

/// One tenant as listed by the hub directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    #[serde(alias = "communityUsername")]
    pub tenant_id: String,
    #[serde(alias = "communityName")]
    pub display_name: String,
    #[serde(alias = "owner", default)]
    pub owner_account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Payload for registering a new hub with the directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    #[serde(default)]
    pub hive_tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Filled in from the on-chain community team
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl RegistrationRequest {
    pub fn validate(&self) -> Result<()> {
        if !self.hive_tag.starts_with("hive-") || self.hive_tag.len() <= "hive-".len() {
            return Err(PortalError::Validation(
                "Invalid Hive tag. Must start with \"hive-\"".into(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(PortalError::Validation("Hub name is required".into()));
        }
        Ok(())
    }

    pub fn to_entry(&self) -> DirectoryEntry {
        DirectoryEntry {
            tenant_id: self.hive_tag.clone(),
            display_name: self.name.trim().to_string(),
            owner_account: self.owner.clone().unwrap_or_else(|| self.hive_tag.clone()),
            language: None,
            latitude: self.latitude,
            longitude: self.longitude,
            active: true,
        }
    }
}

/// Hub configuration document stored as `<slug>.json`
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubDocument {
    pub slug: String,
    pub name: String,
    pub community: String,
    pub admin_account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posting_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posting_key_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub settings: HubSettings,
    #[serde(default)]
    pub branding: Branding,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for HubDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubDocument")
            .field("slug", &self.slug)
            .field("community", &self.community)
            .field("admin_account", &self.admin_account)
            .field("signing_key_ref", &self.signing_key_ref())
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl HubDocument {
    /// Inline key wins over an env reference
    pub fn signing_key_ref(&self) -> Option<SigningKeyRef> {
        let non_empty = |v: &Option<String>| v.as_ref().filter(|s| !s.trim().is_empty()).cloned();
        non_empty(&self.posting_key)
            .map(SigningKeyRef::Inline)
            .or_else(|| non_empty(&self.posting_key_env).map(SigningKeyRef::Env))
    }
}

/// Input for creating a hub document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHub {
    pub slug: String,
    pub name: String,
    pub community: String,
    pub admin_account: String,
    #[serde(default)]
    pub posting_key: Option<String>,
    #[serde(default)]
    pub posting_key_env: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub settings: Option<HubSettings>,
    #[serde(default)]
    pub branding: Option<Branding>,
}

/// Partial update of a hub document; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubUpdate {
    pub name: Option<String>,
    pub community: Option<String>,
    pub admin_account: Option<String>,
    pub posting_key: Option<String>,
    pub posting_key_env: Option<String>,
    pub language: Option<String>,
    pub active: Option<bool>,
    pub settings: Option<HubSettings>,
    pub branding: Option<Branding>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_directory_entry_accepts_registry_names() {
        let entry: DirectoryEntry = serde_json::from_value(json!({
            "communityUsername": "hive-138395",
            "communityName": "Test City",
            "owner": "city-admin"
        }))
        .unwrap();
        assert_eq!(entry.tenant_id, "hive-138395");
        assert_eq!(entry.display_name, "Test City");
        assert_eq!(entry.owner_account, "city-admin");
        assert!(entry.active);
    }

    #[test]
    fn test_context_from_directory() {
        let entry = DirectoryEntry {
            tenant_id: "hive-138395".into(),
            display_name: "Test City".into(),
            owner_account: "city-admin".into(),
            language: Some("fr".into()),
            latitude: None,
            longitude: None,
            active: true,
        };
        let ctx = HubContext::from_directory(&entry);
        assert_eq!(ctx.community_id, "hive-138395");
        assert_eq!(ctx.admin_account, "city-admin");
        assert_eq!(ctx.settings, HubSettings::default());
        assert!(ctx.ensure_routable().is_ok());
    }

    #[test]
    fn test_unroutable_context() {
        let ctx = HubContext {
            tenant_id: "x".into(),
            display_name: "X".into(),
            community_id: "hive-1".into(),
            admin_account: " ".into(),
            signing_key_ref: None,
            language: None,
            settings: HubSettings::default(),
        };
        assert!(matches!(ctx.ensure_routable(), Err(PortalError::Config(_))));
    }

    #[test]
    fn test_document_defaults_and_key_ref() {
        let doc: HubDocument = serde_json::from_value(json!({
            "slug": "global-taxi",
            "name": "Global Taxi",
            "community": "hive-100000",
            "adminAccount": "taxi-admin",
            "postingKeyEnv": "GLOBAL_TAXI_KEY"
        }))
        .unwrap();
        assert!(doc.active);
        assert_eq!(doc.branding.primary_color, "#e31337");
        assert_eq!(doc.settings.max_posts_per_day, 1);
        assert_eq!(
            doc.signing_key_ref(),
            Some(SigningKeyRef::Env("GLOBAL_TAXI_KEY".into()))
        );
    }

    #[test]
    fn test_registration_validation() {
        let mut req = RegistrationRequest {
            hive_tag: "hive-138395".into(),
            name: "Test City".into(),
            latitude: None,
            longitude: None,
            owner: None,
        };
        assert!(req.validate().is_ok());
        assert_eq!(req.to_entry().owner_account, "hive-138395");

        req.hive_tag = "city-138395".into();
        assert!(req.validate().is_err());

        req.hive_tag = "hive-138395".into();
        req.name = "   ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_inline_key_is_redacted() {
        let key = SigningKeyRef::Inline("5JsecretWif".into());
        assert!(!format!("{:?}", key).contains("secret"));
    }
}
