// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock identity provider backed by a token table.

use async_trait::async_trait;
use dashmap::DashMap;

use warelay_core::{IdentityVerifier, VerifiedUser, WarelayError};

/// Verifies exactly the tokens registered through [`MockIdentity::allow`].
#[derive(Default)]
pub struct MockIdentity {
    tokens: DashMap<String, String>,
}

impl MockIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bearer token for a uid.
    pub fn allow(&self, token: &str, uid: &str) {
        self.tokens.insert(token.to_string(), uid.to_string());
    }

    /// Invalidate a token.
    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }
}

#[async_trait]
impl IdentityVerifier for MockIdentity {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, WarelayError> {
        match self.tokens.get(token) {
            Some(uid) => Ok(VerifiedUser { uid: uid.clone() }),
            None => Err(WarelayError::Unauthorized("unknown bearer token".into())),
        }
    }
}
