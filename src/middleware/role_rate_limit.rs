use axum::http::Request;
use std::sync::Arc;
use tower_governor::{
    governor::GovernorConfigBuilder,
    key_extractor::KeyExtractor,
    GovernorError, GovernorLayer,
};
use uuid::Uuid;

use crate::middleware::rate_limit::rate_limit_error_handler;
use crate::principal::Principal;

/// Keys the limiter on the authenticated principal set by `auth_middleware`
#[derive(Debug, Clone, Copy)]
pub struct PrincipalIdExtractor;

impl KeyExtractor for PrincipalIdExtractor {
    type Key = Uuid;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        req.extensions()
            .get::<Principal>()
            .map(|principal| principal.id)
            .ok_or(GovernorError::UnableToExtractKey)
    }
}

pub type RoleGovernorLayer = GovernorLayer<
    PrincipalIdExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Roles that get a per-user budget. Admin routes only sit behind the
/// global IP limiter, so admins have no variant here.
pub enum RateLimitedRole {
    Passenger,
    Driver,
}

/// - Driver: 500 burst, refilling every 240ms (location heartbeats are chatty)
/// - Passenger: 100 burst, refilling every 1.2s
pub fn create_role_governor(role: RateLimitedRole) -> RoleGovernorLayer {
    let (per_ms, burst) = match role {
        RateLimitedRole::Driver => (120 * 2, 500),
        RateLimitedRole::Passenger => (600 * 2, 100),
    };

    let config = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(burst)
            .key_extractor(PrincipalIdExtractor)
            .finish()
            .expect("rate limit quota must be non-zero"),
    );

    GovernorLayer::new(config).error_handler(rate_limit_error_handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::role::Role;

    #[test]
    fn test_extracts_principal_id() {
        let id = Uuid::new_v4();
        let mut req = Request::new(());
        req.extensions_mut().insert(Principal {
            id,
            role: Role::Driver,
            name: None,
            phone: None,
        });

        assert_eq!(PrincipalIdExtractor.extract(&req).unwrap(), id);
    }

    #[test]
    fn test_missing_principal_is_rejected() {
        let req = Request::new(());
        assert!(matches!(
            PrincipalIdExtractor.extract(&req),
            Err(GovernorError::UnableToExtractKey)
        ));
    }
}
