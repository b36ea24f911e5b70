//! Caller identity extraction
//!
//! Authentication mechanics live upstream (reverse proxy / identity
//! service); handlers receive the already-authenticated caller through
//! trusted headers and only need tenant/user/role context here.

use crate::errors::{AppError, Result};
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Extracted caller context available to handlers
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// Tenant ID
    pub tenant_id: Uuid,

    /// User ID
    pub user_id: Uuid,

    /// Roles granted to the caller
    pub roles: Vec<String>,

    /// Request ID for tracing
    pub request_id: String,
}

impl CallerContext {
    /// Check if the caller has a specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Require the admin role, returning error if not present
    pub fn require_admin(&self) -> Result<()> {
        if self.has_role("admin") {
            Ok(())
        } else {
            Err(AppError::Forbidden {
                message: "Administrator role required".to_string(),
            })
        }
    }
}

/// Axum extractor for CallerContext
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        // Extract request ID
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Extract tenant ID
        let tenant_id = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-Tenant-ID header".to_string(),
            })?;

        // Extract user ID
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing or invalid X-User-ID header".to_string(),
            })?;

        // Roles arrive as a comma-separated list
        let roles = parts
            .headers
            .get("x-roles")
            .and_then(|v| v.to_str().ok())
            .map(|s| {
                s.split(',')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(CallerContext {
            tenant_id,
            user_id,
            roles,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_roles(roles: &[&str]) -> CallerContext {
        CallerContext {
            tenant_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            request_id: "req-1".to_string(),
        }
    }

    #[test]
    fn test_has_role() {
        let ctx = context_with_roles(&["learner", "admin"]);
        assert!(ctx.has_role("admin"));
        assert!(!ctx.has_role("auditor"));
    }

    #[test]
    fn test_require_admin() {
        assert!(context_with_roles(&["admin"]).require_admin().is_ok());
        assert!(context_with_roles(&["learner"]).require_admin().is_err());
    }
}
