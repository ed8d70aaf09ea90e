//! hubkeeper - multi-tenant administration gateway for Hive communities
//!
//! Operators of a community "hub" manage membership, roles and moderation
//! without touching the chain RPC surface themselves.
//!
//! ## Components
//!
//! - **Hubs**: tenant directory, local hub documents and request-to-hub resolution
//! - **Chain**: blockchain gateway, signed community operations, reply trees
//! - **Pagination**: cursor state for ranked post feeds
//! - **Server**: hyper HTTP surface and session tokens

pub mod auth;
pub mod chain;
pub mod config;
pub mod hubs;
pub mod pagination;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{PortalError, Result};
