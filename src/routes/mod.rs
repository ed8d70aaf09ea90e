//! HTTP routes for hubkeeper

pub mod auth_routes;
pub mod community;
pub mod health;
pub mod hubs;

pub use auth_routes::{handle_login, handle_verify};
pub use community::{
    handle_community_request, match_community_route, CommunityRequest, CommunityRoute,
};
pub use health::{health_check, version_info};
pub use hubs::{handle_get_hub, handle_list_hubs, handle_register_hub};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::chain::ChainResponse;
use crate::types::PortalError;

/// Largest JSON body accepted by any route
pub const MAX_BODY_BYTES: usize = 64 * 1024;

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|e| {
        error!("Failed to serialize response: {}", e);
        r#"{"error":"Internal serialization error"}"#.to_string()
    });

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Cache-Control", "no-store")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub(crate) fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": message }))
}

/// Map a `PortalError` to its status; server-side details only in dev mode
pub(crate) fn portal_error_response(err: &PortalError, dev_mode: bool) -> Response<Full<Bytes>> {
    let status = err.status_code();
    if err.is_client_error() {
        return json_response(status, &json!({ "success": false, "error": err.to_string() }));
    }

    error!(error = %err, "Request failed");
    let mut body = json!({ "success": false, "error": err.label() });
    if dev_mode {
        body["details"] = json!(err.to_string());
    }
    json_response(status, &body)
}

/// Gateway envelope to HTTP: data on success, 404 for missing objects, 500 otherwise
pub(crate) fn chain_data_response<T: Serialize>(
    response: ChainResponse<T>,
) -> Response<Full<Bytes>> {
    let not_found = response.is_not_found();
    match response.into_result() {
        Ok(data) => json_response(StatusCode::OK, &data),
        Err(message) if not_found => error_response(StatusCode::NOT_FOUND, &message),
        Err(message) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &message),
    }
}

/// Decode a query string; a missing query decodes from the empty string
pub(crate) fn parse_query<T: DeserializeOwned>(query: Option<&str>) -> Result<T, PortalError> {
    serde_urlencoded::from_str(query.unwrap_or(""))
        .map_err(|e| PortalError::Validation(format!("Invalid query string: {}", e)))
}

/// Decode a JSON body; an empty body decodes from `{}`
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, PortalError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(PortalError::Validation("Request body too large".into()));
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return serde_json::from_slice(b"{}").map_err(PortalError::from);
    }
    serde_json::from_slice(body).map_err(PortalError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde::Deserialize;
    use serde_json::Value;

    async fn body_json(response: Response<Full<Bytes>>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[derive(Deserialize, Default)]
    #[serde(default)]
    struct Paging {
        limit: Option<u32>,
        last: String,
    }

    #[test]
    fn test_parse_query() {
        let paging: Paging = parse_query(Some("limit=50&last=alice")).unwrap();
        assert_eq!(paging.limit, Some(50));
        assert_eq!(paging.last, "alice");

        let empty: Paging = parse_query(None).unwrap();
        assert_eq!(empty.limit, None);
        assert!(empty.last.is_empty());

        assert!(parse_query::<Paging>(Some("limit=many")).is_err());
    }

    #[test]
    fn test_parse_json_body() {
        let empty: Paging = parse_json_body(b"").unwrap();
        assert!(empty.last.is_empty());
        assert!(matches!(
            parse_json_body::<Paging>(b"{ nope"),
            Err(PortalError::Validation(_))
        ));
        let huge = vec![b' '; MAX_BODY_BYTES + 1];
        assert!(parse_json_body::<Paging>(&huge).is_err());
    }

    #[tokio::test]
    async fn test_error_details_only_in_dev_mode() {
        let err = PortalError::MissingCredential("city-admin".into());

        let prod = portal_error_response(&err, false);
        assert_eq!(prod.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(prod).await;
        assert_eq!(body["error"], "Signing credential unavailable");
        assert!(body.get("details").is_none());

        let dev = body_json(portal_error_response(&err, true)).await;
        assert!(dev["details"].as_str().unwrap().contains("city-admin"));
    }

    #[tokio::test]
    async fn test_chain_data_response_statuses() {
        let ok = chain_data_response(ChainResponse::success(json!({"title": "Test City"})));
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(body_json(ok).await["title"], "Test City");

        let missing = chain_data_response(ChainResponse::<Value>::not_found("Account not found"));
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let failed =
            chain_data_response(ChainResponse::<Value>::failed("Request timed out after 15000 ms"));
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(failed).await["error"], "Request timed out after 15000 ms");
    }
}
