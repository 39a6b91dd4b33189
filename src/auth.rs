//! 🔐 Auth - bearer tokens, principals, and the fixed permission set
//!
//! Gates the WebSocket handshake: the first frame must carry a bearer token
//! (when auth is enabled), validation yields a principal bound to one
//! project, and the required permission set is checked once at bind time.
//! Tokens are HS256 over the configured pre-shared secret with expiration
//! and issuer checks.

use crate::config::AuthConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::log_debug;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Issuer baked into every minted token and required on every verified one
const ISSUER: &str = "switchboard";

/// Lifetime of tokens minted through `POST /auth`
const TOKEN_TTL_SECS: i64 = 8 * 60 * 60;

/// Every bound session needs exactly these
pub const REQUIRED_PERMISSIONS: &[&str] = &["file:read", "file:write", "lsp:query"];

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Project this token is bound to
    project_id: String,
    permissions: Vec<String>,
    exp: i64,
    iat: i64,
    iss: String,
}

/// 🪪 Authenticated identity cached on the session
#[derive(Debug, Clone)]
pub struct Principal {
    pub project_id: String,
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// 🔐 Token verifier/minter
pub struct Authenticator {
    required: bool,
    secret: Option<String>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            required: config.required,
            secret: config.secret_key.clone(),
        }
    }

    pub fn required(&self) -> bool {
        self.required
    }

    /// ✅ Validate a bearer token into a principal.
    /// When auth is disabled, returns an unrestricted principal for the
    /// declared project.
    pub fn verify(&self, token: &str, declared_project: &str) -> GatewayResult<Principal> {
        if !self.required {
            return Ok(Principal {
                project_id: declared_project.to_string(),
                permissions: REQUIRED_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
            });
        }

        let secret = self.secret.as_ref().ok_or_else(|| GatewayError::AuthFailed {
            reason: "auth enabled without a secret".to_string(),
        })?;

        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        validation.validate_exp = true;

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| GatewayError::AuthFailed {
            reason: e.to_string(),
        })?;

        let principal = Principal {
            project_id: data.claims.project_id,
            permissions: data.claims.permissions.into_iter().collect(),
        };

        // Bind the token to the declared project
        if principal.project_id != declared_project {
            return Err(GatewayError::AuthProjectMismatch {
                token_project: principal.project_id,
                declared: declared_project.to_string(),
            });
        }

        // Fixed permission set, checked once at bind time
        for required in REQUIRED_PERMISSIONS {
            if !principal.has_permission(required) {
                return Err(GatewayError::AuthMissingPermission {
                    permission: required.to_string(),
                });
            }
        }

        log_debug!("auth", "🔓 Principal bound to project {}", principal.project_id);
        Ok(principal)
    }

    /// 🎫 Mint a token for `POST /auth`; `secret_key` must match the
    /// configured pre-shared secret
    pub fn mint(&self, project_id: &str, secret_key: &str) -> GatewayResult<(String, i64)> {
        let secret = self.secret.as_ref().ok_or_else(|| GatewayError::AuthFailed {
            reason: "authentication is not enabled".to_string(),
        })?;
        if secret != secret_key {
            return Err(GatewayError::AuthFailed {
                reason: "invalid secret key".to_string(),
            });
        }

        let now = chrono::Utc::now().timestamp();
        let expires_at = now + TOKEN_TTL_SECS;
        let claims = Claims {
            project_id: project_id.to_string(),
            permissions: REQUIRED_PERMISSIONS.iter().map(|p| p.to_string()).collect(),
            exp: expires_at,
            iat: now,
            iss: ISSUER.to_string(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| GatewayError::AuthFailed {
            reason: format!("token encoding failed: {e}"),
        })?;

        Ok((token, expires_at))
    }
}
