//! Hub-scoped community routes
//!
//! Every route here runs against the hub selected by `X-Hub-Community`
//! (or the default hub). The hub is resolved first, then the session token
//! is checked for protected routes. Operator routes also need the session
//! account to hold a team role in that hub's community, since their writes
//! are signed with the hub admin's posting key.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    chain_data_response, error_response, json_response, parse_json_body, parse_query,
    portal_error_response,
};
use crate::auth::Claims;
use crate::chain::gateway::{MAX_POSTS_PER_PAGE, MAX_SUBSCRIBERS_PER_PAGE};
use crate::chain::{
    BlockchainGateway, ChainResponse, PostCursor, Role, RoleLists, SortMode, WriteReceipt,
};
use crate::hubs::HubContext;
use crate::pagination::{FeedPage, RankedPostSource};
use crate::server::AppState;
use crate::types::{PortalError, Result};

/// Default mute note when the operator gives none
pub const DEFAULT_MUTE_NOTES: &str = "Policy violation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunityRoute {
    Community,
    Posts,
    Post,
    UserRole,
    Account(String),
    AccountPosts(String),
    Members,
    Roles,
    Feed,
    SetRole,
    Mute,
    Unmute,
    Pin,
    Unpin,
    CreatePost,
}

impl CommunityRoute {
    /// Lowest community role the session account must hold in the hub
    pub fn required_role(&self) -> Option<Role> {
        match self {
            CommunityRoute::SetRole => Some(Role::Admin),
            CommunityRoute::Members
            | CommunityRoute::Roles
            | CommunityRoute::Mute
            | CommunityRoute::Unmute
            | CommunityRoute::Pin
            | CommunityRoute::Unpin
            | CommunityRoute::CreatePost => Some(Role::Mod),
            _ => None,
        }
    }

    /// Whether the route needs a session token
    pub fn requires_session(&self) -> bool {
        !matches!(
            self,
            CommunityRoute::Community
                | CommunityRoute::Posts
                | CommunityRoute::Post
                | CommunityRoute::UserRole
                | CommunityRoute::Account(_)
                | CommunityRoute::AccountPosts(_)
        )
    }
}

/// Match a method and path (without the `/api` prefix) to a community route
pub fn match_community_route(method: &Method, path: &str) -> Option<CommunityRoute> {
    let route = match (method, path) {
        (&Method::GET, "/community") => CommunityRoute::Community,
        (&Method::GET, "/posts") => CommunityRoute::Posts,
        (&Method::GET, "/post") => CommunityRoute::Post,
        (&Method::GET, "/user-role") => CommunityRoute::UserRole,
        (&Method::GET, "/members") => CommunityRoute::Members,
        (&Method::GET, "/roles") => CommunityRoute::Roles,
        (&Method::GET, "/feed") => CommunityRoute::Feed,
        (&Method::POST, "/role") => CommunityRoute::SetRole,
        (&Method::POST, "/mute") => CommunityRoute::Mute,
        (&Method::POST, "/unmute") => CommunityRoute::Unmute,
        (&Method::POST, "/pin") => CommunityRoute::Pin,
        (&Method::POST, "/unpin") => CommunityRoute::Unpin,
        (&Method::POST, "/post") => CommunityRoute::CreatePost,
        (&Method::GET, p) => {
            let rest = p.strip_prefix("/account/")?;
            let (username, posts) = match rest.strip_suffix("/posts") {
                Some(username) => (username, true),
                None => (rest, false),
            };
            if username.is_empty() || username.contains('/') {
                return None;
            }
            if posts {
                CommunityRoute::AccountPosts(username.to_string())
            } else {
                CommunityRoute::Account(username.to_string())
            }
        }
        _ => return None,
    };
    Some(route)
}

/// Everything a community route needs from the request
pub struct CommunityRequest<'a> {
    pub hub_selector: Option<&'a str>,
    pub auth_header: Option<&'a str>,
    pub query: Option<&'a str>,
    pub body: &'a [u8],
}

/// Resolve the hub, check the session, then run the route
pub async fn handle_community_request(
    state: Arc<AppState>,
    route: CommunityRoute,
    request: CommunityRequest<'_>,
) -> Response<Full<Bytes>> {
    let dev_mode = state.args.dev_mode;

    let hub = match state.resolver.resolve(request.hub_selector).await {
        Ok(hub) => hub,
        Err(e) => return portal_error_response(&e, dev_mode),
    };

    let claims = if route.requires_session() {
        match state.jwt.authorize(request.auth_header) {
            Ok(claims) => Some(claims),
            Err(e) => return portal_error_response(&e, dev_mode),
        }
    } else {
        None
    };

    if let (Some(required), Some(claims)) = (route.required_role(), claims.as_ref()) {
        if let Err(e) = ensure_standing(&state.gateway, &hub, &claims.username, required).await {
            warn!(
                tenant = %hub.tenant_id,
                username = %claims.username,
                error = %e,
                "Operator rejected"
            );
            return portal_error_response(&e, dev_mode);
        }
    }

    match dispatch(&state, route, &hub, claims.as_ref(), &request).await {
        Ok(response) => response,
        Err(e) => portal_error_response(&e, dev_mode),
    }
}

/// The hub's admin account always passes; anyone else needs a team role
/// of at least `required` in the hub's community
async fn ensure_standing(
    gateway: &BlockchainGateway,
    hub: &HubContext,
    username: &str,
    required: Role,
) -> Result<()> {
    if username == hub.admin_account {
        return Ok(());
    }

    let team = gateway
        .list_community_roles(hub, None)
        .await?
        .into_result()
        .map_err(PortalError::UpstreamUnavailable)?;
    let role = team
        .iter()
        .find(|member| member.account == username)
        .map(|member| member.role)
        .unwrap_or(Role::Guest);

    if role.rank() >= required.rank() {
        Ok(())
    } else {
        Err(PortalError::Forbidden(format!(
            "{} is {} in {}, {} required",
            username, role, hub.community_id, required
        )))
    }
}

async fn dispatch(
    state: &AppState,
    route: CommunityRoute,
    hub: &HubContext,
    claims: Option<&Claims>,
    request: &CommunityRequest<'_>,
) -> Result<Response<Full<Bytes>>> {
    let gateway = &state.gateway;
    let operator = claims.map(|c| c.username.as_str()).unwrap_or("anonymous");

    match route {
        CommunityRoute::Community => {
            Ok(chain_data_response(gateway.get_community_details(hub).await?))
        }

        CommunityRoute::Posts => {
            let query: PostsQuery = parse_query(request.query)?;
            let sort = query.sort_mode()?;
            let cursor = query.cursor()?;
            let limit = query.limit.unwrap_or(MAX_POSTS_PER_PAGE);
            Ok(chain_data_response(
                gateway.get_ranked_posts(hub, sort, limit, cursor.as_ref()).await?,
            ))
        }

        CommunityRoute::Post => {
            let query: PostQuery = parse_query(request.query)?;
            if query.author.is_empty() || query.permlink.is_empty() {
                return Err(PortalError::Validation("Author and permlink are required".into()));
            }
            Ok(chain_data_response(
                gateway.get_post_with_replies(&query.author, &query.permlink).await?,
            ))
        }

        CommunityRoute::UserRole => {
            let query: UserRoleQuery = parse_query(request.query)?;
            if query.username.is_empty() {
                return Err(PortalError::Validation("Username is required".into()));
            }
            Ok(chain_data_response(gateway.get_user_role(hub, &query.username).await?))
        }

        CommunityRoute::Account(username) => {
            Ok(chain_data_response(gateway.get_account(&username).await?))
        }

        CommunityRoute::AccountPosts(username) => {
            let query: LimitQuery = parse_query(request.query)?;
            let limit = query.limit.unwrap_or(MAX_POSTS_PER_PAGE);
            Ok(chain_data_response(
                gateway.get_account_posts(hub, &username, limit).await?,
            ))
        }

        CommunityRoute::Members => {
            let query: MembersQuery = parse_query(request.query)?;
            let limit = query.limit.unwrap_or(MAX_SUBSCRIBERS_PER_PAGE);
            Ok(chain_data_response(
                gateway.list_subscribers(hub, limit, Some(&query.last)).await?,
            ))
        }

        CommunityRoute::Roles => {
            let query: RolesQuery = parse_query(request.query)?;
            let response = gateway.list_community_roles(hub, Some(&query.last)).await?;
            Ok(chain_data_response(response.map(|triples| RoleLists::from_triples(&triples))))
        }

        CommunityRoute::Feed => {
            let query: FeedQuery = parse_query(request.query)?;
            let feed = state.feeds.feed(&hub.tenant_id, operator, SortMode::default());
            if query.reset {
                feed.reset().await;
            }
            if let Some(sort) = query.sort.as_deref() {
                let sort: SortMode = sort.parse().map_err(PortalError::Validation)?;
                if feed.set_sort_mode(sort).await {
                    debug!(
                        tenant = %hub.tenant_id,
                        operator = %operator,
                        sort = %sort,
                        "Feed reset for new sort"
                    );
                }
            }

            let source: &dyn RankedPostSource = &**gateway;
            let page = feed.fetch_next(source, hub).await?;
            Ok(match page.into_result() {
                Ok(page) => json_response(StatusCode::OK, &FeedResponse { success: true, page }),
                Err(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &message),
            })
        }

        CommunityRoute::SetRole => {
            let body: RoleRequest = parse_json_body(request.body)?;
            if body.account.is_empty() || body.role.is_empty() {
                return Err(PortalError::Validation("Account and role are required".into()));
            }
            let assignable = body.role.parse::<Role>().map(|r| r.is_assignable()).unwrap_or(false);
            if !assignable {
                return Err(PortalError::InvalidRole(body.role));
            }
            if !gateway.account_exists(&body.account).await {
                return Err(PortalError::NotFound("Account not found on Hive blockchain".into()));
            }

            info!(
                tenant = %hub.tenant_id,
                operator = %operator,
                account = %body.account,
                role = %body.role,
                "Set role"
            );
            let response = gateway.set_role(hub, &body.account, &body.role).await?;
            Ok(write_response(
                response,
                format!("Successfully set {} to {}", body.account, body.role),
            ))
        }

        CommunityRoute::Mute => {
            let body: MuteRequest = parse_json_body(request.body)?;
            if body.account.is_empty() {
                return Err(PortalError::Validation("Account is required".into()));
            }
            let notes = body
                .notes
                .as_deref()
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_MUTE_NOTES);

            info!(tenant = %hub.tenant_id, operator = %operator, account = %body.account, "Mute");
            let response = gateway.mute_user(hub, &body.account, notes).await?;
            Ok(write_response(response, format!("Successfully muted {}", body.account)))
        }

        CommunityRoute::Unmute => {
            let body: AccountRequest = parse_json_body(request.body)?;
            if body.account.is_empty() {
                return Err(PortalError::Validation("Account is required".into()));
            }

            info!(tenant = %hub.tenant_id, operator = %operator, account = %body.account, "Unmute");
            let response = gateway.unmute_user(hub, &body.account).await?;
            Ok(write_response(response, format!("Successfully unmuted {}", body.account)))
        }

        CommunityRoute::Pin => {
            let body: PinRequest = parse_json_body(request.body)?;
            body.require_target()?;

            info!(
                tenant = %hub.tenant_id,
                operator = %operator,
                account = %body.account,
                permlink = %body.permlink,
                "Pin"
            );
            let response = gateway
                .pin_post(hub, &body.account, &body.permlink, body.notes.as_deref())
                .await?;
            Ok(write_response(response, "Successfully pinned post".into()))
        }

        CommunityRoute::Unpin => {
            let body: PinRequest = parse_json_body(request.body)?;
            body.require_target()?;

            info!(
                tenant = %hub.tenant_id,
                operator = %operator,
                account = %body.account,
                permlink = %body.permlink,
                "Unpin"
            );
            let response = gateway.unpin_post(hub, &body.account, &body.permlink).await?;
            Ok(write_response(response, "Successfully unpinned post".into()))
        }

        CommunityRoute::CreatePost => {
            let body: NewPostRequest = parse_json_body(request.body)?;
            if body.title.trim().is_empty() || body.body.trim().is_empty() {
                return Err(PortalError::Validation("Title and body are required".into()));
            }

            info!(tenant = %hub.tenant_id, operator = %operator, "Create post");
            let response = gateway.create_post(hub, &body.title, &body.body, &body.tags).await?;
            Ok(match response.into_result() {
                Ok(published) => json_response(
                    StatusCode::OK,
                    &json!({
                        "success": true,
                        "message": "Successfully created post",
                        "author": published.author,
                        "permlink": published.permlink,
                        "category": published.category,
                        "result": published.result,
                    }),
                ),
                Err(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &message),
            })
        }
    }
}

fn write_response(response: ChainResponse<WriteReceipt>, message: String) -> Response<Full<Bytes>> {
    match response.into_result() {
        Ok(receipt) => json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": message,
                "action": receipt.action,
                "result": receipt.result,
            }),
        ),
        Err(error) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &error),
    }
}

// =============================================================================
// Query and body shapes
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PostsQuery {
    sort: Option<String>,
    limit: Option<u32>,
    start_author: Option<String>,
    start_permlink: Option<String>,
}

impl PostsQuery {
    fn sort_mode(&self) -> Result<SortMode> {
        match self.sort.as_deref().filter(|s| !s.is_empty()) {
            Some(sort) => sort.parse().map_err(PortalError::Validation),
            None => Ok(SortMode::default()),
        }
    }

    /// Both halves of the cursor or neither
    fn cursor(&self) -> Result<Option<PostCursor>> {
        let non_empty =
            |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        match (non_empty(&self.start_author), non_empty(&self.start_permlink)) {
            (Some(author), Some(permlink)) => Ok(Some(PostCursor::new(author, permlink))),
            (None, None) => Ok(None),
            _ => Err(PortalError::Validation(
                "startAuthor and startPermlink must be given together".into(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PostQuery {
    author: String,
    permlink: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserRoleQuery {
    username: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LimitQuery {
    limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MembersQuery {
    limit: Option<u32>,
    last: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RolesQuery {
    last: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FeedQuery {
    sort: Option<String>,
    reset: bool,
}

#[derive(Serialize)]
struct FeedResponse {
    success: bool,
    #[serde(flatten)]
    page: FeedPage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoleRequest {
    account: String,
    role: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MuteRequest {
    account: String,
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AccountRequest {
    account: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PinRequest {
    account: String,
    permlink: String,
    notes: Option<String>,
}

impl PinRequest {
    fn require_target(&self) -> Result<()> {
        if self.account.is_empty() || self.permlink.is_empty() {
            return Err(PortalError::Validation("Account and permlink are required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NewPostRequest {
    title: String,
    body: String,
    tags: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_matching() {
        assert_eq!(
            match_community_route(&Method::GET, "/community"),
            Some(CommunityRoute::Community)
        );
        assert_eq!(
            match_community_route(&Method::GET, "/post"),
            Some(CommunityRoute::Post)
        );
        assert_eq!(
            match_community_route(&Method::POST, "/post"),
            Some(CommunityRoute::CreatePost)
        );
        assert_eq!(
            match_community_route(&Method::GET, "/account/alice"),
            Some(CommunityRoute::Account("alice".into()))
        );
        assert_eq!(
            match_community_route(&Method::GET, "/account/alice/posts"),
            Some(CommunityRoute::AccountPosts("alice".into()))
        );
        assert_eq!(match_community_route(&Method::GET, "/account/"), None);
        assert_eq!(match_community_route(&Method::GET, "/account//posts"), None);
        assert_eq!(match_community_route(&Method::GET, "/account/a/b"), None);
        assert_eq!(match_community_route(&Method::POST, "/members"), None);
        assert_eq!(match_community_route(&Method::GET, "/nope"), None);
    }

    #[test]
    fn test_required_roles() {
        assert_eq!(CommunityRoute::SetRole.required_role(), Some(Role::Admin));
        assert_eq!(CommunityRoute::Mute.required_role(), Some(Role::Mod));
        assert_eq!(CommunityRoute::Members.required_role(), Some(Role::Mod));
        assert_eq!(CommunityRoute::Feed.required_role(), None);
        assert_eq!(CommunityRoute::Community.required_role(), None);
    }

    #[test]
    fn test_protected_routes() {
        assert!(!CommunityRoute::Posts.requires_session());
        assert!(!CommunityRoute::Account("alice".into()).requires_session());
        assert!(!CommunityRoute::AccountPosts("alice".into()).requires_session());
        assert!(CommunityRoute::Members.requires_session());
        assert!(CommunityRoute::Roles.requires_session());
        assert!(CommunityRoute::Feed.requires_session());
        assert!(CommunityRoute::Mute.requires_session());
        assert!(CommunityRoute::CreatePost.requires_session());
    }

    #[test]
    fn test_posts_query() {
        let raw = "sort=trending&limit=5&startAuthor=alice&startPermlink=ride-1";
        let query: PostsQuery = parse_query(Some(raw)).unwrap();
        assert_eq!(query.sort_mode().unwrap(), SortMode::Trending);
        assert_eq!(query.cursor().unwrap(), Some(PostCursor::new("alice", "ride-1")));

        let defaults: PostsQuery = parse_query(None).unwrap();
        assert_eq!(defaults.sort_mode().unwrap(), SortMode::Created);
        assert_eq!(defaults.cursor().unwrap(), None);

        let half: PostsQuery = parse_query(Some("startAuthor=alice")).unwrap();
        assert!(half.cursor().is_err());

        let bad: PostsQuery = parse_query(Some("sort=newest")).unwrap();
        assert!(matches!(bad.sort_mode(), Err(PortalError::Validation(_))));
    }

    #[test]
    fn test_feed_query() {
        let query: FeedQuery = parse_query(Some("sort=hot&reset=true")).unwrap();
        assert_eq!(query.sort.as_deref(), Some("hot"));
        assert!(query.reset);
    }
}
