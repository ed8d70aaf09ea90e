//! Configuration for hubkeeper
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Hive mainnet chain id
pub const HIVE_MAINNET_CHAIN_ID: &str =
    "beeab0de00000000000000000000000000000000000000000000000000000000";

/// hubkeeper - community administration gateway for Hive hubs
#[derive(Parser, Debug, Clone)]
#[command(name = "hubkeeper")]
#[command(about = "Multi-tenant administration gateway for Hive communities")]
pub struct Args {
    /// Unique node identifier for this gateway instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Enable development mode (relaxed login, error details in responses)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// JWT secret for session tokens (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Session token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "86400")]
    pub jwt_expiry_seconds: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Timeout for every upstream call in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "15000")]
    pub request_timeout_ms: u64,

    /// Allowed CORS origin
    #[arg(long, env = "CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,

    /// Length of one API rate-limit window in milliseconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value = "900000")]
    pub rate_limit_window_ms: u64,

    /// API requests allowed per client IP in one window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "100")]
    pub rate_limit_max_requests: u32,

    /// Seconds an unused post feed is kept before eviction
    #[arg(long, env = "FEED_IDLE_SECS", default_value = "1800")]
    pub feed_idle_secs: u64,

    /// Upper bound on live post feeds
    #[arg(long, env = "MAX_FEEDS", default_value = "10000")]
    pub max_feeds: usize,

    /// Chain access configuration
    #[command(flatten)]
    pub chain: ChainArgs,

    /// Hub storage and directory configuration
    #[command(flatten)]
    pub hubs: HubArgs,
}

/// Chain RPC and signing configuration
#[derive(Parser, Debug, Clone)]
pub struct ChainArgs {
    /// Comma-separated list of Hive RPC node URLs, tried in order
    #[arg(
        long,
        env = "HIVE_RPC_NODES",
        default_value = "https://api.hive.blog,https://api.openhive.network"
    )]
    pub rpc_nodes: String,

    /// Chain id used in transaction digests (hex)
    #[arg(long, env = "HIVE_CHAIN_ID", default_value = HIVE_MAINNET_CHAIN_ID)]
    pub chain_id: String,

    /// Process-wide fallback posting key (WIF)
    #[arg(long, env = "HIVE_POSTING_KEY", hide_env_values = true)]
    pub posting_key: Option<String>,

    /// Application tag added to every published post
    #[arg(long, env = "APP_TAG", default_value = "taxihub")]
    pub app_tag: String,

    /// Application identifier written to post metadata
    #[arg(long, env = "APP_NAME", default_value = "taxihub/1.0.0")]
    pub app_name: String,
}

/// Hub documents and tenant directory configuration
#[derive(Parser, Debug, Clone)]
pub struct HubArgs {
    /// Directory holding hub configuration documents
    #[arg(long, env = "HUBS_DIR", default_value = "hubs")]
    pub hubs_dir: PathBuf,

    /// Hub used when a request carries no tenant selector
    #[arg(long, env = "DEFAULT_HUB_SLUG", default_value = "global-taxi")]
    pub default_hub_slug: String,

    /// Base URL of the remote hub directory; falls back to registry.json in HUBS_DIR
    #[arg(long, env = "REGISTRY_URL")]
    pub registry_url: Option<String>,

    /// Directory cache lifetime in seconds
    #[arg(long, env = "REGISTRY_CACHE_TTL_SECS", default_value = "300")]
    pub registry_cache_ttl_secs: u64,
}

impl Args {
    /// Get effective JWT secret (uses a fixed secret in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some("dev-mode-secret-not-for-production-use-123456".to_string()),
            (None, false) => None,
        }
    }

    /// Upstream request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn feed_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.feed_idle_secs)
    }

    /// Whether logs should be emitted as JSON
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.chain.rpc_node_list().is_empty() {
            return Err("HIVE_RPC_NODES must list at least one node".to_string());
        }

        if self.chain.chain_id_bytes().is_none() {
            return Err("HIVE_CHAIN_ID must be 32 bytes of hex".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.rate_limit_window_ms == 0 || self.rate_limit_max_requests == 0 {
            return Err(
                "RATE_LIMIT_WINDOW_MS and RATE_LIMIT_MAX_REQUESTS must be greater than zero"
                    .to_string(),
            );
        }

        if self.feed_idle_secs == 0 || self.max_feeds == 0 {
            return Err("FEED_IDLE_SECS and MAX_FEEDS must be greater than zero".to_string());
        }

        if self.hubs.registry_cache_ttl_secs == 0 {
            return Err("REGISTRY_CACHE_TTL_SECS must be greater than zero".to_string());
        }

        Ok(())
    }
}

impl ChainArgs {
    /// RPC node URLs in failover order
    pub fn rpc_node_list(&self) -> Vec<String> {
        self.rpc_nodes
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Decoded chain id, if well formed
    pub fn chain_id_bytes(&self) -> Option<[u8; 32]> {
        let bytes = hex::decode(self.chain_id.trim()).ok()?;
        bytes.try_into().ok()
    }
}

impl HubArgs {
    pub fn registry_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.registry_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["hubkeeper"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--dev-mode"]);
        assert_eq!(args.listen.port(), 3000);
        assert_eq!(args.hubs.default_hub_slug, "global-taxi");
        assert_eq!(args.chain.app_tag, "taxihub");
        assert_eq!(args.chain.rpc_node_list().len(), 2);
        assert_eq!(args.rate_limit_window(), Duration::from_secs(15 * 60));
        assert_eq!(args.rate_limit_max_requests, 100);
        assert_eq!(args.feed_idle_ttl(), Duration::from_secs(1800));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_limits_must_be_positive() {
        assert!(parse(&["--dev-mode", "--rate-limit-max-requests", "0"])
            .validate()
            .is_err());
        assert!(parse(&["--dev-mode", "--rate-limit-window-ms", "0"])
            .validate()
            .is_err());
        assert!(parse(&["--dev-mode", "--max-feeds", "0"]).validate().is_err());
    }

    #[test]
    fn test_production_requires_secret() {
        let args = parse(&[]);
        assert!(args.validate().is_err());

        let args = parse(&["--jwt-secret", "a-secret-that-is-long-enough-for-hs256-use"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rpc_node_list_trims() {
        let args = parse(&[
            "--dev-mode",
            "--rpc-nodes",
            " https://a.example/ , ,https://b.example",
        ]);
        assert_eq!(
            args.chain.rpc_node_list(),
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_chain_id_decoding() {
        let args = parse(&["--dev-mode"]);
        let id = args.chain.chain_id_bytes().unwrap();
        assert_eq!(&id[..4], &[0xbe, 0xea, 0xb0, 0xde]);

        let args = parse(&["--dev-mode", "--chain-id", "abcd"]);
        assert!(args.chain.chain_id_bytes().is_none());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_dev_secret_fallback() {
        let args = parse(&["--dev-mode"]);
        assert!(args.jwt_secret().is_some());
        let args = parse(&[]);
        assert!(args.jwt_secret().is_none());
    }
}
