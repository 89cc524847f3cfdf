// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity provider trait for bearer-token verification.

use async_trait::async_trait;

use crate::error::WarelayError;

/// A verified principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub uid: String,
}

/// Verifies bearer tokens presented by subscribers and admin callers.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify a bearer token and return the principal it belongs to.
    async fn verify(&self, token: &str) -> Result<VerifiedUser, WarelayError>;
}
