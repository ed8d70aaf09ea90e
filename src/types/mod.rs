//! Shared types

pub mod error;

pub use error::{PortalError, Result};
