// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Credential model shared by the credential manager and its store.

use serde::{Deserialize, Serialize};

/// A bearer credential pair as issued by the NIU token endpoint.
///
/// Serialized with the store's key names; expiries are epoch seconds.
/// Replaced as a whole on refresh or re-login, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// When the access token stops being accepted (epoch seconds)
    #[serde(rename = "token_expires_in")]
    pub access_expires_at: i64,
    /// When the refresh token stops being accepted (epoch seconds)
    #[serde(rename = "refresh_token_expires_in")]
    pub refresh_expires_at: i64,
}

impl Credential {
    /// True while the access token has not expired.
    pub fn is_access_usable(&self, now: i64) -> bool {
        !self.access_token.is_empty() && now < self.access_expires_at
    }

    /// True while the refresh token may still be exchanged.
    pub fn is_refresh_usable(&self, now: i64) -> bool {
        !self.refresh_token.is_empty() && now < self.refresh_expires_at
    }
}
