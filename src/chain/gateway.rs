//! Blockchain gateway
//!
//! The single chokepoint for reads and writes against the chain. Every
//! operation returns `Result<ChainResponse<T>>`:
//!
//! - `Err(..)` for local problems detected before any upstream call
//!   (unroutable hub, unassignable role, no signing credential)
//! - `Ok(ChainResponse { success: false, .. })` for expected upstream
//!   failures (transport, timeout, RPC error, object not found)
//!
//! Nothing here retries.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::discussion::{resolve_reply_tree, DiscussionMap};
use super::keys::CredentialStore;
use super::model::{
    BroadcastResult, ChainResponse, DynamicGlobalProperties, MembershipRecord, Post, PostCursor,
    PostKey, RawPost, Role, RoleTriple, SortMode, UserRole,
};
use super::operations::{CommentOperation, CommunityAction, CustomJsonOperation, Operation};
use super::permlink::generate_permlink;
use super::rpc::ChainRpc;
use super::transaction::{Transaction, DEFAULT_EXPIRATION_SECS};
use crate::hubs::HubContext;
use crate::types::{PortalError, Result};

/// Bridge API cap on ranked/account post pages
pub const MAX_POSTS_PER_PAGE: u32 = 20;

/// Bridge API cap on subscriber pages
pub const MAX_SUBSCRIBERS_PER_PAGE: u32 = 100;

/// Settings that shape broadcasts
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub chain_id: [u8; 32],
    /// Tag added to every post, also the fallback parent category
    pub app_tag: String,
    /// `<app>/<version>` written to post metadata
    pub app_name: String,
    pub expiration_secs: i64,
}

/// Outcome of a community write
#[derive(Debug, Clone, serde::Serialize)]
pub struct WriteReceipt {
    pub action: String,
    pub result: BroadcastResult,
}

/// Outcome of publishing a post
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublishedPost {
    pub author: String,
    pub permlink: String,
    pub category: String,
    pub result: BroadcastResult,
}

pub struct BlockchainGateway {
    rpc: Arc<dyn ChainRpc>,
    credentials: Arc<CredentialStore>,
    config: GatewayConfig,
}

impl BlockchainGateway {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        credentials: Arc<CredentialStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            rpc,
            credentials,
            config,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Community metadata (`bridge.get_community`)
    pub async fn get_community_details(&self, hub: &HubContext) -> Result<ChainResponse<Value>> {
        hub.ensure_routable()?;
        let response: ChainResponse<Value> = self
            .read(
                "bridge.get_community",
                json!({ "name": hub.community_id, "observer": hub.admin_account }),
            )
            .await;

        // The bridge answers `null` for unknown communities
        Ok(match response.data {
            Some(Value::Null) => ChainResponse::not_found(format!(
                "Community {} not found",
                hub.community_id
            )),
            _ => response,
        })
    }

    /// One page of subscribers; `last` is forwarded only when non-empty
    pub async fn list_subscribers(
        &self,
        hub: &HubContext,
        limit: u32,
        last: Option<&str>,
    ) -> Result<ChainResponse<Vec<MembershipRecord>>> {
        hub.ensure_routable()?;

        let mut params = json!({
            "community": hub.community_id,
            "limit": limit.clamp(1, MAX_SUBSCRIBERS_PER_PAGE),
        });
        if let Some(last) = last.filter(|l| !l.is_empty()) {
            params["last"] = json!(last);
        }

        let response: ChainResponse<Vec<Value>> =
            self.read("bridge.list_subscribers", params).await;
        Ok(response.map(|rows| decode_rows(&rows, MembershipRecord::from_tuple, "subscriber")))
    }

    /// Community team as role triples; partition with `RoleLists::from_triples`
    pub async fn list_community_roles(
        &self,
        hub: &HubContext,
        last: Option<&str>,
    ) -> Result<ChainResponse<Vec<RoleTriple>>> {
        hub.ensure_routable()?;

        let response: ChainResponse<Vec<Value>> = self
            .read(
                "bridge.list_community_roles",
                json!({ "community": hub.community_id, "last": last.unwrap_or("") }),
            )
            .await;
        Ok(response.map(|rows| decode_rows(&rows, RoleTriple::from_tuple, "role")))
    }

    /// Ranked posts of the hub's community
    pub async fn get_ranked_posts(
        &self,
        hub: &HubContext,
        sort: SortMode,
        limit: u32,
        cursor: Option<&PostCursor>,
    ) -> Result<ChainResponse<Vec<Post>>> {
        hub.ensure_routable()?;

        let mut params = json!({
            "sort": sort.as_str(),
            "tag": hub.community_id,
            "limit": limit.clamp(1, MAX_POSTS_PER_PAGE),
            "observer": hub.admin_account,
        });
        if let Some(cursor) = cursor {
            params["start_author"] = json!(cursor.author);
            params["start_permlink"] = json!(cursor.permlink);
        }

        let response: ChainResponse<Vec<RawPost>> =
            self.read("bridge.get_ranked_posts", params).await;
        Ok(response.map(flatten_posts))
    }

    /// Latest top-level posts of one account
    pub async fn get_account_posts(
        &self,
        hub: &HubContext,
        account: &str,
        limit: u32,
    ) -> Result<ChainResponse<Vec<Post>>> {
        hub.ensure_routable()?;

        let response: ChainResponse<Vec<RawPost>> = self
            .read(
                "bridge.get_account_posts",
                json!({
                    "sort": "posts",
                    "account": account,
                    "limit": limit.clamp(1, MAX_POSTS_PER_PAGE),
                    "observer": hub.admin_account,
                }),
            )
            .await;
        Ok(response.map(flatten_posts))
    }

    /// A post with its full reply tree
    pub async fn get_post_with_replies(
        &self,
        author: &str,
        permlink: &str,
    ) -> Result<ChainResponse<Post>> {
        let root = PostKey::new(author, permlink);
        let response: ChainResponse<Option<HashMap<String, RawPost>>> = self
            .read(
                "bridge.get_discussion",
                json!({ "author": author, "permlink": permlink }),
            )
            .await;

        if !response.success {
            return Ok(response.cast());
        }

        let map: DiscussionMap = response.data.flatten().unwrap_or_default();
        Ok(match resolve_reply_tree(&map, &root) {
            Some(post) => ChainResponse::success(post),
            None => {
                ChainResponse::not_found(PortalError::PostNotFound(root.to_string()).to_string())
            }
        })
    }

    /// Raw account object (`condenser_api.get_accounts`)
    pub async fn get_account(&self, username: &str) -> Result<ChainResponse<Value>> {
        let response: ChainResponse<Vec<Value>> = self
            .read("condenser_api.get_accounts", json!([[username]]))
            .await;

        if !response.success {
            return Ok(response.cast());
        }

        Ok(match response.data.and_then(|accounts| accounts.into_iter().next()) {
            Some(account) => ChainResponse::success(account),
            None => ChainResponse::not_found("Account not found"),
        })
    }

    /// Whether an account exists; lookup failures count as absent
    pub async fn account_exists(&self, username: &str) -> bool {
        match self.get_account(username).await {
            Ok(response) => response.success,
            Err(_) => false,
        }
    }

    /// Role of one account in the hub's community
    pub async fn get_user_role(
        &self,
        hub: &HubContext,
        username: &str,
    ) -> Result<ChainResponse<UserRole>> {
        let response = self
            .list_subscribers(hub, MAX_SUBSCRIBERS_PER_PAGE, None)
            .await?;

        Ok(response.map(|records| {
            records
                .iter()
                .find(|record| record.account == username)
                .map(UserRole::from_record)
                .unwrap_or_else(|| UserRole::none(username))
        }))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Assign a member, mod or admin role
    pub async fn set_role(
        &self,
        hub: &HubContext,
        account: &str,
        role: &str,
    ) -> Result<ChainResponse<WriteReceipt>> {
        hub.ensure_routable()?;
        let role: Role = role
            .parse()
            .ok()
            .filter(Role::is_assignable)
            .ok_or_else(|| PortalError::InvalidRole(role.to_string()))?;

        self.community_action(
            hub,
            CommunityAction::SetRole {
                account: account.to_string(),
                role,
            },
        )
        .await
    }

    /// Mute an account in the community
    pub async fn mute_user(
        &self,
        hub: &HubContext,
        account: &str,
        notes: &str,
    ) -> Result<ChainResponse<WriteReceipt>> {
        hub.ensure_routable()?;
        info!(community = %hub.community_id, account = %account, notes = %notes, "Muting account");
        self.community_action(
            hub,
            CommunityAction::SetRole {
                account: account.to_string(),
                role: Role::Muted,
            },
        )
        .await
    }

    /// Lift a mute by returning the account to guest
    pub async fn unmute_user(
        &self,
        hub: &HubContext,
        account: &str,
    ) -> Result<ChainResponse<WriteReceipt>> {
        hub.ensure_routable()?;
        self.community_action(
            hub,
            CommunityAction::SetRole {
                account: account.to_string(),
                role: Role::Guest,
            },
        )
        .await
    }

    pub async fn pin_post(
        &self,
        hub: &HubContext,
        account: &str,
        permlink: &str,
        notes: Option<&str>,
    ) -> Result<ChainResponse<WriteReceipt>> {
        hub.ensure_routable()?;
        if let Some(notes) = notes.filter(|n| !n.is_empty()) {
            info!(
                community = %hub.community_id,
                account = %account,
                permlink = %permlink,
                notes = %notes,
                "Pinning post"
            );
        }
        self.community_action(
            hub,
            CommunityAction::PinPost {
                account: account.to_string(),
                permlink: permlink.to_string(),
            },
        )
        .await
    }

    pub async fn unpin_post(
        &self,
        hub: &HubContext,
        account: &str,
        permlink: &str,
    ) -> Result<ChainResponse<WriteReceipt>> {
        hub.ensure_routable()?;
        self.community_action(
            hub,
            CommunityAction::UnpinPost {
                account: account.to_string(),
                permlink: permlink.to_string(),
            },
        )
        .await
    }

    /// Publish a top-level post as the hub's admin account
    pub async fn create_post(
        &self,
        hub: &HubContext,
        title: &str,
        body: &str,
        tags: &[String],
    ) -> Result<ChainResponse<PublishedPost>> {
        hub.ensure_routable()?;

        let tags: Vec<String> = tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        let category = tags
            .first()
            .cloned()
            .unwrap_or_else(|| self.config.app_tag.clone());
        let permlink = generate_permlink(title);

        let mut metadata_tags = vec![self.config.app_tag.clone(), hub.tenant_id.clone()];
        metadata_tags.extend(tags.iter().cloned());
        let json_metadata = json!({
            "tags": metadata_tags,
            "app": self.config.app_name,
            "format": "markdown",
        });

        let op = Operation::Comment(CommentOperation {
            parent_author: String::new(),
            parent_permlink: category.clone(),
            author: hub.admin_account.clone(),
            permlink: permlink.clone(),
            title: title.to_string(),
            body: body.to_string(),
            json_metadata: json_metadata.to_string(),
        });

        let response = self.broadcast(hub, op).await?;
        Ok(response.map(|result| PublishedPost {
            author: hub.admin_account.clone(),
            permlink,
            category,
            result,
        }))
    }

    async fn community_action(
        &self,
        hub: &HubContext,
        action: CommunityAction,
    ) -> Result<ChainResponse<WriteReceipt>> {
        let name = action.name().to_string();
        let op = Operation::CustomJson(CustomJsonOperation::community(
            &hub.admin_account,
            &hub.community_id,
            &action,
        ));

        let response = self.broadcast(hub, op).await?;
        Ok(response.map(|result| WriteReceipt { action: name, result }))
    }

    /// Sign `op` with the hub's posting key and broadcast it
    async fn broadcast(
        &self,
        hub: &HubContext,
        op: Operation,
    ) -> Result<ChainResponse<BroadcastResult>> {
        let key = self.credentials.signing_key(hub)?;

        let props: ChainResponse<DynamicGlobalProperties> = self
            .read("condenser_api.get_dynamic_global_properties", json!([]))
            .await;
        if !props.success {
            return Ok(props.cast());
        }
        let Some(props) = props.data else {
            return Ok(ChainResponse::failed("Empty dynamic global properties"));
        };

        let op_name = op.name();
        let tx = Transaction::for_head_block(
            &props,
            vec![op],
            chrono::Duration::seconds(self.config.expiration_secs),
        )
        .map_err(|e| PortalError::Internal(format!("Failed to build transaction: {}", e)))?;
        let signed = tx
            .sign(&key, &self.config.chain_id)
            .map_err(|e| PortalError::Internal(format!("Failed to sign transaction: {}", e)))?;

        let response: ChainResponse<BroadcastResult> = self
            .read("condenser_api.broadcast_transaction_synchronous", json!([signed]))
            .await;

        if response.success {
            info!(
                account = %hub.admin_account,
                community = %hub.community_id,
                op = op_name,
                "Broadcast accepted"
            );
        }
        Ok(response)
    }

    /// Call and decode; every upstream failure becomes `success: false`
    async fn read<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResponse<T> {
        debug!(method = %method, "Chain call");
        match self.rpc.call(method, params).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(data) => ChainResponse::success(data),
                Err(e) => {
                    warn!(method = %method, error = %e, "Unexpected chain response shape");
                    ChainResponse::failed(format!("Invalid response from {}: {}", method, e))
                }
            },
            Err(e) => {
                warn!(method = %method, error = %e, "Chain call failed");
                ChainResponse::failed(e.to_string())
            }
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            chain_id: [0u8; 32],
            app_tag: "taxihub".to_string(),
            app_name: "taxihub/1.0.0".to_string(),
            expiration_secs: DEFAULT_EXPIRATION_SECS,
        }
    }
}

fn flatten_posts(raw: Vec<RawPost>) -> Vec<Post> {
    raw.iter().map(|p| p.to_post(Vec::new())).collect()
}

fn decode_rows<T>(rows: &[Value], decode: impl Fn(&Value) -> Option<T>, what: &str) -> Vec<T> {
    rows.iter()
        .filter_map(|row| {
            let decoded = decode(row);
            if decoded.is_none() {
                warn!(row = %row, "Skipping undecodable {} row", what);
            }
            decoded
        })
        .collect()
}
