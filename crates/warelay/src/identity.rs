// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Config-backed bearer verifier for standalone deployments.
//!
//! Production installations plug a real identity provider in behind
//! `IdentityVerifier`; this one checks the static `[identity] tokens`
//! table from the config file.

use std::collections::HashMap;

use async_trait::async_trait;

use warelay_config::model::IdentityConfig;
use warelay_core::{IdentityVerifier, VerifiedUser, WarelayError};

/// Verifies bearers against the configured token table.
pub struct ConfigIdentity {
    tokens: HashMap<String, String>,
}

impl ConfigIdentity {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            tokens: config.tokens.clone(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for ConfigIdentity {
    async fn verify(&self, token: &str) -> Result<VerifiedUser, WarelayError> {
        match self.tokens.get(token) {
            Some(uid) => Ok(VerifiedUser { uid: uid.clone() }),
            None => Err(WarelayError::Unauthorized("unknown bearer token".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_token_verifies() {
        let mut tokens = HashMap::new();
        tokens.insert("tok-1".to_string(), "uid-1".to_string());
        let identity = ConfigIdentity::new(&IdentityConfig { tokens });

        let user = identity.verify("tok-1").await.unwrap();
        assert_eq!(user.uid, "uid-1");
        assert!(identity.verify("nope").await.is_err());
    }
}
