// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable credential storage.

mod credential_file;
mod memory;

pub use credential_file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use crate::error::Result;
use crate::models::Credential;
use async_trait::async_trait;

/// Durable holder for the account's current credential.
///
/// `save` replaces the whole record; implementations must never leave
/// a partially written credential behind.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read the stored credential, `None` if nothing has been saved yet.
    async fn load(&self) -> Result<Option<Credential>>;

    /// Replace the stored credential.
    async fn save(&self, credential: &Credential) -> Result<()>;
}
