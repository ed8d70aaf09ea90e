//! Hub directory routes
//!
//! - `GET /hubs` - active hubs for the hub picker, sorted by name
//! - `GET /hubs/:tenantId` - one directory entry
//! - `POST /hubs/register` - verify a community on chain and add it to the directory
//!
//! None of these need a resolved hub.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{json_response, parse_json_body, portal_error_response};
use crate::chain::{Role, RoleTriple};
use crate::hubs::{HubContext, HubSettings, RegistrationRequest};
use crate::server::AppState;
use crate::types::PortalError;

/// GET /hubs
pub async fn handle_list_hubs(state: Arc<AppState>) -> Response<Full<Bytes>> {
    match state.directory.active_sorted().await {
        Ok(hubs) => json_response(StatusCode::OK, &json!({ "success": true, "hubs": hubs })),
        Err(e) => {
            error!("Failed to fetch hub registry: {}", e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "success": false, "error": "Failed to fetch hub registry" }),
            )
        }
    }
}

/// GET /hubs/:tenantId
pub async fn handle_get_hub(state: Arc<AppState>, tenant_id: &str) -> Response<Full<Bytes>> {
    match state.directory.find(tenant_id).await {
        Ok(Some(hub)) if hub.active => {
            json_response(StatusCode::OK, &json!({ "success": true, "hub": hub }))
        }
        Ok(_) => json_response(
            StatusCode::NOT_FOUND,
            &json!({ "success": false, "error": "Hub not found" }),
        ),
        Err(e) => {
            error!("Failed to fetch hub {}: {}", tenant_id, e);
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "success": false, "error": "Failed to fetch hub" }),
            )
        }
    }
}

/// POST /hubs/register
///
/// The community must exist on chain before it is forwarded to the
/// directory. The owner recorded in the directory is the first admin of the
/// on-chain team, or the community account itself when the team lists none.
pub async fn handle_register_hub(state: Arc<AppState>, body: &[u8]) -> Response<Full<Bytes>> {
    let dev_mode = state.args.dev_mode;

    let mut request: RegistrationRequest = match parse_json_body(body) {
        Ok(request) => request,
        Err(e) => return portal_error_response(&e, dev_mode),
    };
    request.hive_tag = request.hive_tag.trim().to_string();
    if let Err(e) = request.validate() {
        return portal_error_response(&e, dev_mode);
    }

    let candidate = HubContext {
        tenant_id: request.hive_tag.clone(),
        display_name: request.name.clone(),
        community_id: request.hive_tag.clone(),
        admin_account: request.hive_tag.clone(),
        signing_key_ref: None,
        language: None,
        settings: HubSettings::default(),
    };

    let details = match state.gateway.get_community_details(&candidate).await {
        Ok(response) => response,
        Err(e) => return portal_error_response(&e, dev_mode),
    };
    let community = match details.into_result() {
        Ok(community) => community,
        Err(reason) => {
            warn!(tenant = %request.hive_tag, reason = %reason, "Hub registration rejected");
            return json_response(
                StatusCode::BAD_REQUEST,
                &json!({
                    "success": false,
                    "error": format!(
                        "Community {} could not be verified on the Hive blockchain",
                        request.hive_tag
                    ),
                }),
            );
        }
    };

    request.owner = Some(first_admin(&community).unwrap_or_else(|| request.hive_tag.clone()));

    match state.directory.register(&request).await {
        Ok(result) => {
            info!(tenant = %request.hive_tag, name = %request.name, "Hub registered");
            json_response(StatusCode::OK, &result)
        }
        Err(e) => portal_error_response(&PortalError::from(e), dev_mode),
    }
}

/// First admin in a `bridge.get_community` team listing
fn first_admin(community: &Value) -> Option<String> {
    community
        .get("team")?
        .as_array()?
        .iter()
        .filter_map(RoleTriple::from_tuple)
        .find(|member| member.role == Role::Admin)
        .map(|member| member.account)
}
