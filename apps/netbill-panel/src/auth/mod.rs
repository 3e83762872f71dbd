pub mod password;
pub mod token;

use thiserror::Error;

pub use token::{Claims, TokenKind, TokenPair, TokenService};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account disabled")]
    UserDisabled,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("token revoked")]
    TokenRevoked,
    #[error("email already registered")]
    EmailTaken,
    #[error("tenant slug already taken")]
    SlugTaken,
    #[error("password must be at least 8 characters")]
    WeakPassword,
    #[error("{0}")]
    InvalidInput(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
