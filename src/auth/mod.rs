//! Operator session authentication

pub mod jwt;

pub use jwt::{bearer_token, Claims, JwtValidator};
