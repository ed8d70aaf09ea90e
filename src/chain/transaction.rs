//! Transaction assembly, binary serialization and signing

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::keys::{KeyError, PostingKey};
use super::model::DynamicGlobalProperties;
use super::operations::{write_varint, Operation};

/// Lifetime of a broadcast transaction relative to head block time
pub const DEFAULT_EXPIRATION_SECS: i64 = 60;

const CHAIN_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("invalid head block id: {0}")]
    InvalidBlockId(String),

    #[error("invalid chain time: {0}")]
    InvalidTime(String),

    #[error(transparent)]
    Key(#[from] KeyError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: DateTime<Utc>,
    pub operations: Vec<Operation>,
}

impl Transaction {
    /// Reference the current head block and expire `expire_in` after head time
    pub fn for_head_block(
        props: &DynamicGlobalProperties,
        operations: Vec<Operation>,
        expire_in: Duration,
    ) -> Result<Self, TransactionError> {
        let block_id = hex::decode(&props.head_block_id)
            .map_err(|e| TransactionError::InvalidBlockId(e.to_string()))?;
        let prefix_bytes: [u8; 4] = block_id
            .get(4..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| TransactionError::InvalidBlockId(props.head_block_id.clone()))?;

        let head_time = NaiveDateTime::parse_from_str(&props.time, CHAIN_TIME_FORMAT)
            .map_err(|e| TransactionError::InvalidTime(format!("{}: {}", props.time, e)))?
            .and_utc();

        Ok(Self {
            ref_block_num: (props.head_block_number & 0xffff) as u16,
            ref_block_prefix: u32::from_le_bytes(prefix_bytes),
            expiration: head_time + expire_in,
            operations,
        })
    }

    /// Graphene binary form (no signatures)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.ref_block_num.to_le_bytes());
        out.extend_from_slice(&self.ref_block_prefix.to_le_bytes());
        out.extend_from_slice(&(self.expiration.timestamp() as u32).to_le_bytes());
        write_varint(&mut out, self.operations.len() as u32);
        for op in &self.operations {
            op.write_to(&mut out);
        }
        // extensions
        write_varint(&mut out, 0);
        out
    }

    /// `sha256(chain_id || tx)`
    pub fn digest(&self, chain_id: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(chain_id);
        hasher.update(self.to_bytes());
        hasher.finalize().into()
    }

    pub fn sign(
        self,
        key: &PostingKey,
        chain_id: &[u8; 32],
    ) -> Result<SignedTransaction, TransactionError> {
        let signature = key.sign_digest(&self.digest(chain_id))?;
        Ok(SignedTransaction {
            ref_block_num: self.ref_block_num,
            ref_block_prefix: self.ref_block_prefix,
            expiration: self.expiration.format(CHAIN_TIME_FORMAT).to_string(),
            operations: self.operations,
            extensions: Vec::new(),
            signatures: vec![hex::encode(signature)],
        })
    }
}

/// Condenser JSON form accepted by `broadcast_transaction_synchronous`
#[derive(Debug, Clone, Serialize)]
pub struct SignedTransaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub expiration: String,
    pub operations: Vec<Operation>,
    pub extensions: Vec<serde_json::Value>,
    pub signatures: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::keys::recover_public_key;
    use crate::chain::operations::{CommunityAction, CustomJsonOperation};
    use crate::chain::model::Role;

    fn props() -> DynamicGlobalProperties {
        DynamicGlobalProperties {
            head_block_number: 0x0123_4567,
            head_block_id: "0123456789abcdef0011223344556677deadbeef".into(),
            time: "2024-01-01T00:00:00".into(),
        }
    }

    fn set_role_op() -> Operation {
        Operation::CustomJson(CustomJsonOperation::community(
            "city-admin",
            "hive-138395",
            &CommunityAction::SetRole {
                account: "alice".into(),
                role: Role::Member,
            },
        ))
    }

    #[test]
    fn test_reference_block_fields() {
        let tx = Transaction::for_head_block(&props(), vec![], Duration::seconds(60)).unwrap();
        assert_eq!(tx.ref_block_num, 0x4567);
        assert_eq!(tx.ref_block_prefix, 0xefcd_ab89);
        assert_eq!(tx.expiration.format(CHAIN_TIME_FORMAT).to_string(), "2024-01-01T00:01:00");
    }

    #[test]
    fn test_header_layout() {
        let tx = Transaction::for_head_block(&props(), vec![], Duration::seconds(60)).unwrap();
        let bytes = tx.to_bytes();
        let expiration = (1_704_067_260u32).to_le_bytes();

        assert_eq!(&bytes[0..2], &[0x67, 0x45]);
        assert_eq!(&bytes[2..6], &[0x89, 0xab, 0xcd, 0xef]);
        assert_eq!(&bytes[6..10], &expiration);
        assert_eq!(&bytes[10..], &[0, 0]);
    }

    #[test]
    fn test_operations_are_embedded() {
        let tx = Transaction::for_head_block(&props(), vec![set_role_op()], Duration::seconds(60))
            .unwrap();
        let bytes = tx.to_bytes();
        assert_eq!(bytes[10], 1);
        assert_eq!(bytes[11], 18);
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_bad_block_id() {
        let mut p = props();
        p.head_block_id = "zz".into();
        assert!(matches!(
            Transaction::for_head_block(&p, vec![], Duration::seconds(60)),
            Err(TransactionError::InvalidBlockId(_))
        ));
        p.head_block_id = "0011".into();
        assert!(Transaction::for_head_block(&p, vec![], Duration::seconds(60)).is_err());
    }

    #[test]
    fn test_signature_recovers_to_signer() {
        let chain_id = [0x42u8; 32];
        let key = PostingKey::generate();
        let tx = Transaction::for_head_block(&props(), vec![set_role_op()], Duration::seconds(60))
            .unwrap();
        let digest = tx.digest(&chain_id);

        let signed = tx.sign(&key, &chain_id).unwrap();
        assert_eq!(signed.signatures.len(), 1);
        let compact = hex::decode(&signed.signatures[0]).unwrap();
        assert_eq!(compact.len(), 65);
        assert_eq!(recover_public_key(&digest, &compact).unwrap(), key.public_key_bytes());

        let value = serde_json::to_value(&signed).unwrap();
        assert_eq!(value["expiration"], "2024-01-01T00:01:00");
        assert_eq!(value["operations"][0][0], "custom_json");
        assert_eq!(value["extensions"], serde_json::json!([]));
    }

    #[test]
    fn test_digest_depends_on_chain_id() {
        let tx = Transaction::for_head_block(&props(), vec![set_role_op()], Duration::seconds(60))
            .unwrap();
        assert_ne!(tx.digest(&[0u8; 32]), tx.digest(&[1u8; 32]));
    }
}
