// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types shared by the relay pipeline.

/// Application error type.
///
/// I/O-boundary failures are normally converted into outcome values
/// (`SnapshotFetch`, `DeliveryOutcome`) at the call site; this type
/// covers the remaining paths that genuinely fail.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No usable credential could be obtained.
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("NIU API error: {0}")]
    Upstream(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Credential store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Marker message for an upstream response that rejected the bearer token.
    pub const NIU_TOKEN_ERROR: &'static str = "NIU token rejected";

    /// Returns true if this error means the upstream rejected our token.
    pub fn is_token_error(&self) -> bool {
        match self {
            AppError::Upstream(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("token rejected")
                    || msg.contains("token expired")
                    || msg.contains("invalid token")
            }
            _ => false,
        }
    }

    /// Returns true for authentication failures.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, AppError::Auth(_))
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, AppError>;
