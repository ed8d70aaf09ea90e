//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one task per connection. Every route is served
//! both under `/api` and at the root. Apart from health, version and CORS
//! preflight, requests count against the per-IP rate limit. Every response
//! carries the CORS origin and a fixed set of hardening headers.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_SECURITY_POLICY,
    REFERRER_POLICY, RETRY_AFTER, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::chain::{
    BlockchainGateway, ChainRpc, CredentialStore, GatewayConfig, HiveRpcClient,
};
use crate::config::Args;
use crate::hubs::store::REGISTRY_FILE;
use crate::hubs::{
    DirectoryCache, DirectorySource, FileDirectory, HttpDirectory, HubResolver, HubStore,
    HUB_HEADER,
};
use crate::pagination::CursorManager;
use crate::routes::{self, CommunityRequest, MAX_BODY_BYTES};
use crate::server::rate_limit::{Admission, RateLimiter};
use crate::types::{PortalError, Result};

/// Headers set on every response
const SECURITY_HEADERS: [(HeaderName, &str); 4] = [
    (X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (X_FRAME_OPTIONS, "SAMEORIGIN"),
    (REFERRER_POLICY, "no-referrer"),
    (CONTENT_SECURITY_POLICY, "default-src 'self'; frame-ancestors 'self'"),
];

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Tenant directory (remote registry or local registry.json)
    pub directory: Arc<DirectoryCache>,
    /// Local hub documents
    pub hub_store: Arc<HubStore>,
    pub resolver: HubResolver,
    pub gateway: Arc<BlockchainGateway>,
    pub jwt: JwtValidator,
    /// Server-side ranked-post feeds per (hub, operator)
    pub feeds: CursorManager,
    /// Per-IP request windows for the API routes
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

impl AppState {
    /// Build state with the production chain client and directory
    pub fn new(args: Args) -> Result<Self> {
        let timeout = args.request_timeout();
        let rpc: Arc<dyn ChainRpc> =
            Arc::new(HiveRpcClient::new(args.chain.rpc_node_list(), timeout));

        let directory: Arc<dyn DirectorySource> = match args.hubs.registry_url.as_deref() {
            Some(url) if !url.trim().is_empty() => Arc::new(HttpDirectory::new(url, timeout)),
            _ => Arc::new(FileDirectory::new(args.hubs.hubs_dir.join(REGISTRY_FILE))),
        };

        Self::with_components(args, rpc, directory)
    }

    /// Build state around an explicit chain transport and directory source
    pub fn with_components(
        args: Args,
        rpc: Arc<dyn ChainRpc>,
        directory_source: Arc<dyn DirectorySource>,
    ) -> Result<Self> {
        let secret = args.jwt_secret().ok_or_else(|| {
            PortalError::Config("JWT_SECRET is required in production mode".into())
        })?;
        let jwt = JwtValidator::new(secret, args.jwt_expiry_seconds)?;

        let chain_id = args
            .chain
            .chain_id_bytes()
            .ok_or_else(|| PortalError::Config("HIVE_CHAIN_ID must be 32 bytes of hex".into()))?;
        let gateway_config = GatewayConfig {
            chain_id,
            app_tag: args.chain.app_tag.clone(),
            app_name: args.chain.app_name.clone(),
            ..GatewayConfig::default()
        };
        let credentials = Arc::new(CredentialStore::new(args.chain.posting_key.clone()));
        let gateway = Arc::new(BlockchainGateway::new(rpc, credentials, gateway_config));

        let directory = Arc::new(DirectoryCache::new(
            directory_source,
            args.hubs.registry_cache_ttl(),
        ));
        let hub_store = Arc::new(HubStore::new(args.hubs.hubs_dir.clone()));
        let resolver = HubResolver::new(
            Arc::clone(&directory),
            Arc::clone(&hub_store),
            args.hubs.default_hub_slug.clone(),
        );

        let feeds = CursorManager::new(
            crate::chain::gateway::MAX_POSTS_PER_PAGE,
            args.feed_idle_ttl(),
            args.max_feeds,
        );
        let rate_limiter = RateLimiter::new(args.rate_limit_window(), args.rate_limit_max_requests);

        Ok(Self {
            args,
            directory,
            hub_store,
            resolver,
            gateway,
            jwt,
            feeds,
            rate_limiter,
            started_at: Instant::now(),
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "hubkeeper listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - login signatures are not verified");
    }

    match state.hub_store.all_hubs().await {
        Ok(hubs) => info!(
            "{} local hub document(s) in {}",
            hubs.len(),
            state.hub_store.hubs_dir().display()
        ),
        Err(e) => warn!("Could not scan hub documents: {}", e),
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route one request
pub async fn handle_request<B>(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<B>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    info!("[{}] {} {}", addr, method, path);

    let route = strip_api_prefix(&path);
    let mut response = if is_rate_limited(&method, route) {
        match state.rate_limiter.check(addr.ip()) {
            Admission::Allowed { .. } => {
                route_request(&state, method, route, query.as_deref(), req).await
            }
            Admission::Limited { retry_after } => {
                warn!(client = %addr.ip(), "Rate limit exceeded");
                too_many_requests_response(retry_after)
            }
        }
    } else {
        route_request(&state, method, route, query.as_deref(), req).await
    };

    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    if let Ok(origin) = HeaderValue::from_str(&state.args.cors_origin) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    Ok(response)
}

/// Health, version and preflight are never limited
fn is_rate_limited(method: &Method, route: &str) -> bool {
    *method != Method::OPTIONS && !matches!(route, "/health" | "/healthz" | "/version")
}

async fn route_request<B>(
    state: &Arc<AppState>,
    method: Method,
    path: &str,
    query: Option<&str>,
    req: Request<B>,
) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    let (auth_header, hub_selector) = {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        (header(AUTHORIZATION.as_str()), header(HUB_HEADER))
    };

    match (&method, path) {
        (&Method::OPTIONS, _) => preflight_response(),

        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(state))
        }
        (&Method::GET, "/version") => routes::version_info(),

        (&Method::POST, "/auth/login") => match read_body(req).await {
            Ok(body) => routes::handle_login(Arc::clone(state), &body).await,
            Err(response) => response,
        },
        (&Method::GET, "/auth/verify") => {
            routes::handle_verify(Arc::clone(state), auth_header.as_deref())
        }

        (&Method::GET, "/hubs") => routes::handle_list_hubs(Arc::clone(state)).await,
        (&Method::POST, "/hubs/register") => match read_body(req).await {
            Ok(body) => routes::handle_register_hub(Arc::clone(state), &body).await,
            Err(response) => response,
        },
        (&Method::GET, p) if p.starts_with("/hubs/") && p.len() > "/hubs/".len() => {
            routes::handle_get_hub(Arc::clone(state), &p["/hubs/".len()..]).await
        }

        _ => match routes::match_community_route(&method, path) {
            Some(route) => {
                let body = if method == Method::POST {
                    match read_body(req).await {
                        Ok(body) => body,
                        Err(response) => return response,
                    }
                } else {
                    Bytes::new()
                };
                routes::handle_community_request(
                    Arc::clone(state),
                    route,
                    CommunityRequest {
                        hub_selector: hub_selector.as_deref(),
                        auth_header: auth_header.as_deref(),
                        query,
                        body: &body,
                    },
                )
                .await
            }
            None => {
                if state.args.dev_mode {
                    warn!("No route for {} {}", method, path);
                }
                not_found_response()
            }
        },
    }
}

/// Path with a leading `/api` mount point removed
fn strip_api_prefix(path: &str) -> &str {
    match path.strip_prefix("/api") {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Collect a request body, refusing it once it passes `MAX_BODY_BYTES`
async fn read_body<B>(req: Request<B>) -> std::result::Result<Bytes, Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn StdError + Send + Sync>>,
{
    match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(body) => Ok(body.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(routes::error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large",
        )),
        Err(e) => {
            warn!("Request body error: {}", e);
            Err(routes::error_response(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
            ))
        }
    }
}

fn too_many_requests_response(retry_after: std::time::Duration) -> Response<Full<Bytes>> {
    let mut response = routes::error_response(
        StatusCode::TOO_MANY_REQUESTS,
        "Too many requests, please try again later.",
    );
    let seconds = retry_after.as_secs().max(1);
    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
fn not_found_response() -> Response<Full<Bytes>> {
    routes::error_response(StatusCode::NOT_FOUND, "Route not found")
}
