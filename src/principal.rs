use serde::Serialize;
use uuid::Uuid;

use crate::entities::role::Role;
use crate::error::{AppError, AppResult};
use crate::utils::jwt::Claims;

/// The authenticated caller, validated once by the auth middleware and
/// shared by HTTP handlers and the WebSocket session.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            name: claims.name.filter(|n| !n.trim().is_empty()),
            phone: claims.phone.filter(|p| !p.trim().is_empty()),
        }
    }
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_role(&self, role: Role) -> AppResult<()> {
        if self.role != role {
            return Err(AppError::Forbidden(format!(
                "{} access required",
                role.as_str()
            )));
        }
        Ok(())
    }
}
