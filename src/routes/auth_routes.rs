//! Session routes
//!
//! Operators log in by signing a message with their Hive posting key
//! (as Keychain does). The server recovers the public key from the
//! signature and checks it against the account's posting authority before
//! issuing a session token. The signed message names the account and carries
//! the time it was signed, either unix seconds or milliseconds, or RFC 3339.
//! Messages older than five minutes are refused, so a captured signature
//! stops working quickly. In dev mode any well-formed request gets a token.

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use super::{error_response, json_response, parse_json_body, portal_error_response};
use crate::chain::keys::{decode_public_key, recover_public_key};
use crate::chain::BlockchainGateway;
use crate::server::AppState;
use crate::types::{PortalError, Result};

/// Role written into every session token
const OPERATOR_ROLE: &str = "admin";

/// Oldest signed login message still accepted
const LOGIN_MAX_AGE_SECS: i64 = 300;
/// Tolerated clock skew for messages stamped in the future
const LOGIN_MAX_SKEW_SECS: i64 = 60;

/// Numeric stamps above this are milliseconds
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub username: String,
    /// Text that was signed; must mention the username and a recent timestamp
    pub message: String,
    /// Hex of the 65-byte compact recoverable signature
    pub signature: String,
}

/// POST /auth/login
pub async fn handle_login(state: Arc<AppState>, body: &[u8]) -> Response<Full<Bytes>> {
    let dev_mode = state.args.dev_mode;

    let request: LoginRequest = match parse_json_body(body) {
        Ok(request) => request,
        Err(e) => return portal_error_response(&e, dev_mode),
    };
    let username = request.username.trim().to_lowercase();
    if username.is_empty() || request.signature.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Username and signature required");
    }

    if dev_mode {
        info!("Dev mode login: {}", username);
    } else if let Err(e) = verify_login(&state.gateway, &username, &request).await {
        warn!(username = %username, error = %e, "Login rejected");
        return portal_error_response(&e, dev_mode);
    }

    match state.jwt.generate_token(&username, OPERATOR_ROLE) {
        Ok(token) => {
            info!(username = %username, "Session issued");
            json_response(
                StatusCode::OK,
                &json!({ "success": true, "token": token, "username": username }),
            )
        }
        Err(e) => portal_error_response(&e, dev_mode),
    }
}

/// GET /auth/verify
pub fn handle_verify(state: Arc<AppState>, auth_header: Option<&str>) -> Response<Full<Bytes>> {
    match state.jwt.authorize(auth_header) {
        Ok(claims) => json_response(StatusCode::OK, &json!({ "success": true, "user": claims })),
        Err(e) => portal_error_response(&e, state.args.dev_mode),
    }
}

async fn verify_login(
    gateway: &BlockchainGateway,
    username: &str,
    request: &LoginRequest,
) -> Result<()> {
    if !request.message.contains(username) {
        return Err(PortalError::Unauthorized(
            "Signed message must contain the username".into(),
        ));
    }
    ensure_fresh(&request.message, Utc::now())?;

    let signature = hex::decode(request.signature.trim().trim_start_matches("0x"))
        .map_err(|_| PortalError::Unauthorized("Malformed signature".into()))?;
    let digest: [u8; 32] = Sha256::digest(request.message.as_bytes()).into();
    let signer = recover_public_key(&digest, &signature)
        .map_err(|e| PortalError::Unauthorized(e.to_string()))?;

    let response = gateway.get_account(username).await?;
    if response.is_not_found() {
        return Err(PortalError::Unauthorized(format!("Unknown account {}", username)));
    }
    let account = response
        .into_result()
        .map_err(PortalError::UpstreamUnavailable)?;

    if posting_keys(&account).contains(&signer) {
        Ok(())
    } else {
        Err(PortalError::Unauthorized(
            "Signature does not match a posting key".into(),
        ))
    }
}

/// Last timestamp token in a login message
fn message_timestamp(message: &str) -> Option<DateTime<Utc>> {
    message.split_whitespace().rev().find_map(|token| {
        if let Ok(n) = token.parse::<i64>() {
            return if n >= MILLIS_THRESHOLD {
                DateTime::from_timestamp_millis(n)
            } else {
                DateTime::from_timestamp(n, 0)
            };
        }
        DateTime::parse_from_rfc3339(token)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    })
}

fn ensure_fresh(message: &str, now: DateTime<Utc>) -> Result<()> {
    let signed_at = message_timestamp(message).ok_or_else(|| {
        PortalError::Unauthorized("Signed message must contain a timestamp".into())
    })?;

    if now - signed_at > Duration::seconds(LOGIN_MAX_AGE_SECS) {
        return Err(PortalError::Unauthorized("Login message expired".into()));
    }
    if signed_at - now > Duration::seconds(LOGIN_MAX_SKEW_SECS) {
        return Err(PortalError::Unauthorized(
            "Login message is dated in the future".into(),
        ));
    }
    Ok(())
}

/// Posting authority keys of a `condenser_api.get_accounts` entry
fn posting_keys(account: &Value) -> Vec<[u8; 33]> {
    account
        .pointer("/posting/key_auths")
        .and_then(Value::as_array)
        .map(|auths| {
            auths
                .iter()
                .filter_map(|auth| auth.get(0)?.as_str())
                .filter_map(|key| decode_public_key(key).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PostingKey;

    fn encode_stm(public: &[u8; 33]) -> String {
        let mut raw = public.to_vec();
        raw.extend_from_slice(&[0, 0, 0, 0]);
        format!("STM{}", bs58::encode(raw).into_string())
    }

    #[test]
    fn test_posting_keys() {
        let key = PostingKey::generate();
        let public = key.public_key_bytes();
        let account = json!({
            "name": "city-admin",
            "posting": {
                "weight_threshold": 1,
                "account_auths": [],
                "key_auths": [[encode_stm(&public), 1], ["garbage", 1]]
            }
        });

        assert_eq!(posting_keys(&account), vec![public]);
        assert!(posting_keys(&json!({ "name": "x" })).is_empty());
    }

    #[test]
    fn test_message_timestamp_forms() {
        let at = DateTime::from_timestamp(1_792_411_200, 0).unwrap();

        assert_eq!(
            message_timestamp("TaxiHub Login - city-admin 1792411200000"),
            Some(at)
        );
        assert_eq!(message_timestamp("login city-admin 1792411200"), Some(at));
        let rfc3339 = DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            message_timestamp("login city-admin 2026-10-19T12:00:00Z"),
            Some(rfc3339)
        );
        assert_eq!(message_timestamp("TaxiHub Login - city-admin"), None);
    }

    #[test]
    fn test_stale_and_future_messages_are_refused() {
        let now = DateTime::from_timestamp(1_792_411_200, 0).unwrap();
        let stamped = |t: DateTime<Utc>| format!("login city-admin {}", t.timestamp_millis());

        assert!(ensure_fresh(&stamped(now - Duration::seconds(30)), now).is_ok());
        assert!(ensure_fresh(&stamped(now + Duration::seconds(10)), now).is_ok());
        assert!(matches!(
            ensure_fresh(&stamped(now - Duration::seconds(301)), now),
            Err(PortalError::Unauthorized(_))
        ));
        assert!(ensure_fresh(&stamped(now + Duration::seconds(600)), now).is_err());
        assert!(ensure_fresh("login city-admin", now).is_err());
    }
}
