//! Posting keys and the credential store
//!
//! Hive posting keys are secp256k1 secrets exchanged as WIF strings.
//! `CredentialStore` resolves the key that signs for a hub's admin account
//! and caches one entry per account for the lifetime of the process.
//!
//! # Security
//!
//! - `k256::ecdsa::SigningKey` zeroizes its scalar on drop
//! - decoded WIF bytes are held in `Zeroizing` buffers
//! - keys never appear in `Debug` output

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use k256::ecdsa::signature::hazmat::RandomizedPrehashSigner;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::hubs::{HubContext, SigningKeyRef};
use crate::types::PortalError;

/// WIF version byte for private keys
const WIF_VERSION: u8 = 0x80;

/// Address prefixes accepted for public keys
const PUBLIC_KEY_PREFIXES: [&str; 2] = ["STM", "TST"];

/// Upper bound on nonce retries while looking for a canonical signature
const MAX_SIGN_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid WIF encoding: {0}")]
    InvalidWif(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// A decoded posting key
pub struct PostingKey {
    key: SigningKey,
}

impl fmt::Debug for PostingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostingKey")
            .field("public_key", &hex::encode(self.public_key_bytes()))
            .finish()
    }
}

impl PostingKey {
    /// Decode a WIF string: base58 of `0x80 || key(32) || checksum(4)`
    pub fn from_wif(wif: &str) -> Result<Self, KeyError> {
        let raw = Zeroizing::new(
            bs58::decode(wif.trim())
                .into_vec()
                .map_err(|e| KeyError::InvalidWif(e.to_string()))?,
        );

        if raw.len() != 37 {
            return Err(KeyError::InvalidWif(format!(
                "expected 37 bytes, got {}",
                raw.len()
            )));
        }
        if raw[0] != WIF_VERSION {
            return Err(KeyError::InvalidWif(format!(
                "unexpected version byte 0x{:02x}",
                raw[0]
            )));
        }

        let (payload, checksum) = raw.split_at(33);
        if double_sha256(payload)[..4] != *checksum {
            return Err(KeyError::InvalidWif("checksum mismatch".into()));
        }

        let key = SigningKey::from_slice(&payload[1..])
            .map_err(|e| KeyError::InvalidWif(e.to_string()))?;

        Ok(Self { key })
    }

    /// Fresh random key
    pub fn generate() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Encode back to WIF
    pub fn to_wif(&self) -> String {
        let mut payload = Zeroizing::new(Vec::with_capacity(37));
        payload.push(WIF_VERSION);
        payload.extend_from_slice(&self.key.to_bytes());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload.as_slice()).into_string()
    }

    /// Compressed SEC1 public key
    pub fn public_key_bytes(&self) -> [u8; 33] {
        compressed(self.key.verifying_key())
    }

    /// Sign a 32-byte digest, producing a 65-byte compact recoverable
    /// signature (`recovery header || r || s`) that passes the Graphene
    /// canonical check.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; 65], KeyError> {
        for _ in 0..MAX_SIGN_ATTEMPTS {
            let signature: Signature = self
                .key
                .sign_prehash_with_rng(&mut OsRng, digest)
                .map_err(|e| KeyError::Signing(e.to_string()))?;
            let signature = signature.normalize_s().unwrap_or(signature);

            let rs = signature.to_bytes();
            if !is_canonical(&rs) {
                continue;
            }

            let verifying_key = self.key.verifying_key();
            let recovery_id =
                RecoveryId::trial_recovery_from_prehash(verifying_key, digest, &signature)
                    .map_err(|e| KeyError::Signing(e.to_string()))?;

            let mut compact = [0u8; 65];
            // 27 + 4 marks a compressed public key
            compact[0] = 31 + recovery_id.to_byte();
            compact[1..].copy_from_slice(&rs);
            return Ok(compact);
        }

        Err(KeyError::Signing(format!(
            "no canonical signature after {} attempts",
            MAX_SIGN_ATTEMPTS
        )))
    }
}

fn compressed(key: &VerifyingKey) -> [u8; 33] {
    let encoded = key.to_encoded_point(true);
    let mut out = [0u8; 33];
    out.copy_from_slice(encoded.as_bytes());
    out
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// Graphene canonical form: neither `r` nor `s` may have the high bit set
/// or be padded with a removable leading zero byte.
pub fn is_canonical(rs: &[u8]) -> bool {
    if rs.len() != 64 {
        return false;
    }
    let (r, s) = rs.split_at(32);
    let half_ok = |h: &[u8]| h[0] & 0x80 == 0 && !(h[0] == 0 && h[1] & 0x80 == 0);
    half_ok(r) && half_ok(s)
}

/// Recover the compressed public key from a compact recoverable signature
pub fn recover_public_key(digest: &[u8; 32], compact: &[u8]) -> Result<[u8; 33], KeyError> {
    if compact.len() != 65 {
        return Err(KeyError::InvalidSignature(format!(
            "expected 65 bytes, got {}",
            compact.len()
        )));
    }

    let header = compact[0];
    if !(27..=34).contains(&header) {
        return Err(KeyError::InvalidSignature(format!(
            "bad recovery header {}",
            header
        )));
    }
    let recovery_id = RecoveryId::from_byte((header - 27) & 3)
        .ok_or_else(|| KeyError::InvalidSignature("bad recovery id".into()))?;
    let signature = Signature::from_slice(&compact[1..])
        .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;

    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
    Ok(compressed(&key))
}

/// Decode an `STM...` public key to its compressed point.
///
/// The trailing four checksum bytes are not verified.
pub fn decode_public_key(encoded: &str) -> Result<[u8; 33], KeyError> {
    let body = PUBLIC_KEY_PREFIXES
        .iter()
        .find_map(|prefix| encoded.strip_prefix(prefix))
        .ok_or_else(|| KeyError::InvalidPublicKey("missing address prefix".into()))?;

    let raw = bs58::decode(body)
        .into_vec()
        .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
    if raw.len() != 37 {
        return Err(KeyError::InvalidPublicKey(format!(
            "expected 37 bytes, got {}",
            raw.len()
        )));
    }

    let mut out = [0u8; 33];
    out.copy_from_slice(&raw[..33]);
    Ok(out)
}

// =============================================================================
// Credential Store
// =============================================================================

/// Lookup statistics for the credential store
#[derive(Debug, Default)]
pub struct CredentialStats {
    pub lookups: AtomicU64,
    pub hits: AtomicU64,
    pub loads: AtomicU64,
}

/// Resolves and caches the posting key for each admin account.
///
/// Lookup order: cached entry for the admin account, then the hub's own key
/// reference, then the process-wide fallback key. Entries never expire; use
/// [`CredentialStore::evict`] or [`CredentialStore::clear`] after rotating a key.
pub struct CredentialStore {
    fallback_wif: Option<Zeroizing<String>>,
    cache: DashMap<String, Arc<PostingKey>>,
    stats: CredentialStats,
}

impl CredentialStore {
    pub fn new(fallback_wif: Option<String>) -> Self {
        Self {
            fallback_wif: fallback_wif
                .filter(|wif| !wif.trim().is_empty())
                .map(Zeroizing::new),
            cache: DashMap::new(),
            stats: CredentialStats::default(),
        }
    }

    /// Posting key for the hub's admin account
    pub fn signing_key(&self, hub: &HubContext) -> Result<Arc<PostingKey>, PortalError> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let account = &hub.admin_account;

        if let Some(key) = self.cache.get(account) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(key.value()));
        }

        let wif = self.locate_wif(hub)?;
        let key = PostingKey::from_wif(&wif)
            .map_err(|e| PortalError::MissingCredential(format!("{}: {}", account, e)))?;
        let key = Arc::new(key);

        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        debug!(account = %account, "Posting key loaded");
        self.cache.insert(account.clone(), Arc::clone(&key));
        Ok(key)
    }

    fn locate_wif(&self, hub: &HubContext) -> Result<Zeroizing<String>, PortalError> {
        match &hub.signing_key_ref {
            Some(SigningKeyRef::Inline(wif)) => return Ok(Zeroizing::new(wif.clone())),
            Some(SigningKeyRef::Env(name)) => {
                if let Ok(wif) = std::env::var(name) {
                    if !wif.trim().is_empty() {
                        return Ok(Zeroizing::new(wif));
                    }
                }
                debug!(
                    account = %hub.admin_account,
                    var = %name,
                    "Hub key variable unset, trying fallback"
                );
            }
            None => {}
        }

        self.fallback_wif
            .clone()
            .ok_or_else(|| PortalError::MissingCredential(hub.admin_account.clone()))
    }

    /// Drop the cached key for one account
    pub fn evict(&self, account: &str) -> bool {
        let removed = self.cache.remove(account).is_some();
        if removed {
            info!(account = %account, "Posting key evicted");
        }
        removed
    }

    /// Drop every cached key
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Number of `signing_key` calls so far
    pub fn lookup_count(&self) -> u64 {
        self.stats.lookups.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &CredentialStats {
        &self.stats
    }
}
