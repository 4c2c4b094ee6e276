//! Caller identity.
//!
//! Authentication happens upstream (token issuance and verification live in
//! the gateway in front of this service). The gateway forwards the verified
//! user as `X-User-Id`, plus `X-User-Role: staff` for staff accounts, and this
//! module trusts those headers as given.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::utils::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Staff,
}

impl Role {
    fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(role) if role.eq_ignore_ascii_case("staff") => Role::Staff,
            _ => Role::Customer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn customer(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Customer,
        }
    }

    pub fn staff(id: Uuid) -> Self {
        Self {
            id,
            role: Role::Staff,
        }
    }

    /// Staff can list every purchase; everyone else only sees their own.
    pub fn can_view_all_purchases(&self) -> bool {
        self.role == Role::Staff
    }

    pub fn can_view_purchase_of(&self, owner: Uuid) -> bool {
        self.can_view_all_purchases() || self.id == owner
    }

    fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let raw_id = headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("Missing authenticated user".to_string()))?
            .to_str()
            .map_err(|_| AppError::AuthError("Malformed user identity".to_string()))?;

        let id = Uuid::parse_str(raw_id.trim())
            .map_err(|_| AppError::AuthError("Malformed user identity".to_string()))?;

        let role = Role::from_header(
            headers
                .get(USER_ROLE_HEADER)
                .and_then(|value| value.to_str().ok()),
        );

        Ok(Self { id, role })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
