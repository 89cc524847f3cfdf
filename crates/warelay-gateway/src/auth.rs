// SPDX-FileCopyrightText: 2026 Warelay Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bearer verification and the authorization predicate for admin routes.
//!
//! The predicate itself (`Administrator` or label in the ACL) lives in
//! `warelay_store::rbac`; this module adapts it to HTTP semantics.

use axum::http::{HeaderMap, StatusCode};

use warelay_core::types::AllowedSessions;
use warelay_core::{IdentityVerifier, VerifiedUser};
use warelay_store::{is_authorized, Rbac, ROLE_ADMINISTRATOR};

/// An HTTP-mappable rejection.
pub type AuthRejection = (StatusCode, String);

/// Extract a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify the caller and resolve their allowed set within the account.
pub async fn authorize(
    identity: &dyn IdentityVerifier,
    rbac: &Rbac,
    headers: &HeaderMap,
    account_id: &str,
) -> Result<(VerifiedUser, AllowedSessions), AuthRejection> {
    let Some(token) = bearer_token(headers) else {
        return Err((StatusCode::UNAUTHORIZED, "missing bearer token".into()));
    };
    let user = identity
        .verify(token)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;
    let allowed = rbac
        .resolve_allowed(account_id, &user.uid)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| {
            (
                StatusCode::FORBIDDEN,
                format!("no role in account {account_id}"),
            )
        })?;
    Ok((user, allowed))
}

/// Session lifecycle and ACL mutation are Administrator-only.
pub fn require_admin(allowed: &AllowedSessions) -> Result<(), AuthRejection> {
    if allowed.role == ROLE_ADMINISTRATOR {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, "Administrator role required".into()))
    }
}

/// Read access to one session label.
pub fn require_label(allowed: &AllowedSessions, label: &str) -> Result<(), AuthRejection> {
    if is_authorized(allowed, label) {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            format!("label {label} not in ACL"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer tok-123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("tok-123"));
    }

    #[test]
    fn bearer_token_missing_or_malformed() {
        let headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn admin_gate() {
        let admin = AllowedSessions {
            role: ROLE_ADMINISTRATOR.into(),
            sessions: vec![],
        };
        let agent = AllowedSessions {
            role: "Agent".into(),
            sessions: vec!["support".into()],
        };
        assert!(require_admin(&admin).is_ok());
        assert!(require_admin(&agent).is_err());
        assert!(require_label(&admin, "anything").is_ok());
        assert!(require_label(&agent, "support").is_ok());
        assert!(require_label(&agent, "billing").is_err());
    }
}
