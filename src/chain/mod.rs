//! Hive chain access
//!
//! - `rpc`: JSON-RPC transport seam and the reqwest client
//! - `gateway`: hub-scoped reads and signed writes
//! - `keys`: posting keys and the credential store
//! - `transaction` / `operations`: binary serialization and signing
//! - `discussion`: reply-tree reconstruction
//! - `permlink`: permlink synthesis

pub mod discussion;
pub mod gateway;
pub mod keys;
pub mod model;
pub mod operations;
pub mod permlink;
pub mod rpc;
pub mod transaction;

pub use gateway::{BlockchainGateway, GatewayConfig, PublishedPost, WriteReceipt};
pub use keys::{CredentialStore, KeyError, PostingKey};
pub use model::{
    ChainResponse, FailureKind, MembershipRecord, Post, PostCursor, PostKey, Role, RoleLists,
    RoleTriple, SortMode, UserRole,
};
pub use rpc::{ChainRpc, HiveRpcClient, RpcError};
