//! Chain data model: roles, memberships, posts and the gateway envelope

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Gateway envelope
// =============================================================================

/// Why a gateway call came back unsuccessful
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport, timeout, RPC or decoding failure
    Upstream,
    /// The chain answered but the object does not exist
    NotFound,
}

/// Envelope returned by every gateway operation
#[derive(Debug, Clone, Serialize)]
pub struct ChainResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub kind: Option<FailureKind>,
}

impl<T> ChainResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            kind: Some(FailureKind::Upstream),
        }
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            kind: Some(FailureKind::NotFound),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == Some(FailureKind::NotFound)
    }

    /// Carry a failure over to a response of another payload type
    pub fn cast<U>(self) -> ChainResponse<U> {
        ChainResponse {
            success: self.success,
            data: None,
            error: self.error,
            kind: self.kind,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ChainResponse<U> {
        ChainResponse {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            kind: self.kind,
        }
    }

    /// Unwrap into a plain `Result` of the data or the error message
    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(self.error.unwrap_or_else(|| "Unknown error".to_string())),
        }
    }
}

// =============================================================================
// Roles and memberships
// =============================================================================

/// Community role on chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Member,
    Mod,
    Admin,
    Owner,
    Muted,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Member => "member",
            Role::Mod => "mod",
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::Muted => "muted",
        }
    }

    /// Roles an operator may hand out through `setRole`
    pub fn is_assignable(&self) -> bool {
        matches!(self, Role::Member | Role::Mod | Role::Admin)
    }

    /// Position in the community hierarchy; muted ranks with guests
    pub fn rank(&self) -> u8 {
        match self {
            Role::Guest | Role::Muted => 0,
            Role::Member => 1,
            Role::Mod => 2,
            Role::Admin => 3,
            Role::Owner => 4,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "member" => Ok(Role::Member),
            "mod" => Ok(Role::Mod),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            "muted" => Ok(Role::Muted),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A subscriber as listed by `bridge.list_subscribers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    pub account: String,
    pub role: Role,
    pub title: Option<String>,
    pub joined_at: Option<String>,
}

impl MembershipRecord {
    /// Decode a `[account, role, title, created]` tuple
    pub fn from_tuple(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let account = items.first()?.as_str()?.to_string();
        let role = items.get(1)?.as_str()?.parse().ok()?;
        Some(Self {
            account,
            role,
            title: opt_string(items.get(2)),
            joined_at: opt_string(items.get(3)),
        })
    }
}

/// An `(account, role, title)` triple from `bridge.list_community_roles`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleTriple {
    pub account: String,
    pub role: Role,
    pub title: Option<String>,
}

impl RoleTriple {
    pub fn from_tuple(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        Some(Self {
            account: items.first()?.as_str()?.to_string(),
            role: items.get(1)?.as_str()?.parse().ok()?,
            title: opt_string(items.get(2)),
        })
    }
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Team members grouped by role. Owners and guests are not listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleLists {
    pub admins: Vec<String>,
    pub mods: Vec<String>,
    pub members: Vec<String>,
    pub muted: Vec<String>,
}

impl RoleLists {
    pub fn from_triples(triples: &[RoleTriple]) -> Self {
        let mut lists = RoleLists::default();
        for triple in triples {
            let account = triple.account.clone();
            match triple.role {
                Role::Admin => lists.admins.push(account),
                Role::Mod => lists.mods.push(account),
                Role::Member => lists.members.push(account),
                Role::Muted => lists.muted.push(account),
                Role::Owner | Role::Guest => {}
            }
        }
        lists
    }
}

/// Result of a single-account role lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRole {
    pub username: String,
    /// Role name, or `none` when the account is not subscribed
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub joined: Option<String>,
}

impl UserRole {
    pub fn from_record(record: &MembershipRecord) -> Self {
        Self {
            username: record.account.clone(),
            role: record.role.as_str().to_string(),
            title: record.title.clone(),
            joined: record.joined_at.clone(),
        }
    }

    pub fn none(username: &str) -> Self {
        Self {
            username: username.to_string(),
            role: "none".to_string(),
            title: None,
            joined: None,
        }
    }
}

// =============================================================================
// Posts
// =============================================================================

/// Identity of a post on chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostKey {
    pub author: String,
    pub permlink: String,
}

impl PostKey {
    pub fn new(author: impl Into<String>, permlink: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            permlink: permlink.into(),
        }
    }

    /// Parse an `author/permlink` discussion key
    pub fn parse(key: &str) -> Option<Self> {
        let (author, permlink) = key.split_once('/')?;
        if author.is_empty() || permlink.is_empty() {
            return None;
        }
        Some(Self::new(author, permlink))
    }
}

impl fmt::Display for PostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.author, self.permlink)
    }
}

/// Ranked-post cursor: both halves or nothing
pub type PostCursor = PostKey;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostStats {
    #[serde(default)]
    pub total_votes: u64,
}

/// A post as the bridge API returns it, replies as `author/permlink` keys
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPost {
    pub author: String,
    pub permlink: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub payout: f64,
    #[serde(default)]
    pub stats: Option<PostStats>,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub replies: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawPost {
    pub fn key(&self) -> PostKey {
        PostKey::new(self.author.clone(), self.permlink.clone())
    }

    /// Convert to the client shape with already resolved replies
    pub fn to_post(&self, replies: Vec<Post>) -> Post {
        Post {
            author: self.author.clone(),
            permlink: self.permlink.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
            created: self.created.clone(),
            category: self.category.clone(),
            payout: self.payout,
            votes: self.stats.as_ref().map(|s| s.total_votes).unwrap_or(0),
            comment_count: self.children,
            replies,
            extra: self.extra.clone(),
        }
    }
}

/// A post as served to clients, with nested replies
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub author: String,
    pub permlink: String,
    pub title: String,
    pub body: String,
    pub created: String,
    pub category: String,
    pub payout: f64,
    pub votes: u64,
    pub comment_count: u32,
    pub replies: Vec<Post>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Post {
    pub fn key(&self) -> PostKey {
        PostKey::new(self.author.clone(), self.permlink.clone())
    }
}

/// Payouts arrive as numbers or as `"1.234 HBD"` strings depending on the API
fn lenient_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s
            .split_whitespace()
            .next()
            .and_then(|amount| amount.parse().ok())
            .unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Ranking used by `bridge.get_ranked_posts`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    Trending,
    Hot,
    Created,
    Promoted,
    Payout,
    PayoutComments,
    Muted,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Trending => "trending",
            SortMode::Hot => "hot",
            SortMode::Created => "created",
            SortMode::Promoted => "promoted",
            SortMode::Payout => "payout",
            SortMode::PayoutComments => "payout_comments",
            SortMode::Muted => "muted",
        }
    }
}

impl Default for SortMode {
    fn default() -> Self {
        SortMode::Created
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trending" => Ok(SortMode::Trending),
            "hot" => Ok(SortMode::Hot),
            "created" => Ok(SortMode::Created),
            "promoted" => Ok(SortMode::Promoted),
            "payout" => Ok(SortMode::Payout),
            "payout_comments" => Ok(SortMode::PayoutComments),
            "muted" => Ok(SortMode::Muted),
            other => Err(format!("unknown sort mode '{}'", other)),
        }
    }
}

// =============================================================================
// Chain state
// =============================================================================

/// Fields of `get_dynamic_global_properties` needed to reference a block
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u32,
    pub head_block_id: String,
    pub time: String,
}

/// Result of a synchronous broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastResult {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub block_num: u64,
    #[serde(default)]
    pub trx_num: u64,
    #[serde(default)]
    pub expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_parsing() {
        assert_eq!("mod".parse::<Role>().unwrap(), Role::Mod);
        assert!("superuser".parse::<Role>().is_err());
        assert!(Role::Admin.is_assignable());
        assert!(!Role::Owner.is_assignable());
        assert!(!Role::Muted.is_assignable());
        assert!(!Role::Guest.is_assignable());
    }

    #[test]
    fn test_role_rank() {
        assert!(Role::Owner.rank() > Role::Admin.rank());
        assert!(Role::Admin.rank() > Role::Mod.rank());
        assert!(Role::Mod.rank() > Role::Member.rank());
        assert_eq!(Role::Muted.rank(), Role::Guest.rank());
    }

    #[test]
    fn test_membership_record_from_tuple() {
        let row = json!(["alice", "mod", "Dispatcher", "2024-01-02T03:04:05"]);
        let record = MembershipRecord::from_tuple(&row).unwrap();
        assert_eq!(record.account, "alice");
        assert_eq!(record.role, Role::Mod);
        assert_eq!(record.title.as_deref(), Some("Dispatcher"));

        let record = MembershipRecord::from_tuple(&json!(["bob", "guest", null, null])).unwrap();
        assert_eq!(record.title, None);

        assert!(MembershipRecord::from_tuple(&json!(["bob", "wizard", null, null])).is_none());
        assert!(MembershipRecord::from_tuple(&json!({"account": "bob"})).is_none());
    }

    #[test]
    fn test_role_lists_exclude_owner() {
        let triples: Vec<RoleTriple> = [
            json!(["hive-138395", "owner", ""]),
            json!(["alice", "admin", ""]),
            json!(["bob", "mod", "Night shift"]),
            json!(["carol", "member", ""]),
            json!(["dave", "muted", ""]),
            json!(["erin", "guest", ""]),
        ]
        .iter()
        .filter_map(RoleTriple::from_tuple)
        .collect();

        let lists = RoleLists::from_triples(&triples);
        assert_eq!(lists.admins, vec!["alice"]);
        assert_eq!(lists.mods, vec!["bob"]);
        assert_eq!(lists.members, vec!["carol"]);
        assert_eq!(lists.muted, vec!["dave"]);
    }

    #[test]
    fn test_post_key_parse() {
        let key = PostKey::parse("alice/first-ride").unwrap();
        assert_eq!(key.author, "alice");
        assert_eq!(key.to_string(), "alice/first-ride");
        assert!(PostKey::parse("nokey").is_none());
        assert!(PostKey::parse("/permlink").is_none());
    }

    #[test]
    fn test_raw_post_keeps_extra_fields() {
        let raw: RawPost = serde_json::from_value(json!({
            "author": "alice",
            "permlink": "first-ride",
            "title": "First ride",
            "body": "Hello",
            "created": "2024-01-01T00:00:00",
            "category": "hive-138395",
            "payout": 1.5,
            "stats": {"total_votes": 7, "hide": false},
            "children": 2,
            "replies": ["bob/re-first-ride"],
            "json_metadata": {"tags": ["taxihub"]},
            "depth": 0
        }))
        .unwrap();

        let post = raw.to_post(Vec::new());
        assert_eq!(post.votes, 7);
        assert_eq!(post.comment_count, 2);
        assert!(post.extra.contains_key("json_metadata"));

        let value = serde_json::to_value(&post).unwrap();
        assert_eq!(value["commentCount"], 2);
        assert_eq!(value["depth"], 0);
        assert_eq!(value["replies"], json!([]));
    }

    #[test]
    fn test_payout_accepts_asset_strings() {
        let raw: RawPost = serde_json::from_value(json!({
            "author": "a",
            "permlink": "p",
            "payout": "2.250 HBD"
        }))
        .unwrap();
        assert_eq!(raw.payout, 2.25);
    }

    #[test]
    fn test_chain_response_serialization() {
        let ok = serde_json::to_value(ChainResponse::success(1)).unwrap();
        assert_eq!(ok, json!({"success": true, "data": 1}));

        let failed = ChainResponse::<u32>::not_found("Post not found");
        assert!(failed.is_not_found());
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value, json!({"success": false, "error": "Post not found"}));
    }

    #[test]
    fn test_sort_mode_round_trip_names() {
        assert_eq!("payout_comments".parse::<SortMode>().unwrap(), SortMode::PayoutComments);
        assert_eq!(SortMode::Trending.as_str(), "trending");
        assert!("newest".parse::<SortMode>().is_err());
    }
}
