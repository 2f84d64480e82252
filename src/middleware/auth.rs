use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};

use crate::entities::role::Role;
use crate::error::{AppError, AppResult};
use crate::principal::Principal;
use crate::utils::jwt::verify_token;
use crate::AppState;

/// Extract and validate JWT token from Authorization header.
/// WebSocket clients that cannot set headers may pass `?token=` instead.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> AppResult<Response> {
    let token = bearer_token(&request)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    let claims = verify_token(&token, &state.config.jwt_secret)?;
    request.extensions_mut().insert(Principal::from(claims));
    Ok(next.run(request).await)
}

fn bearer_token(request: &Request) -> Option<String> {
    if let Some(auth) = request.headers().typed_get::<Authorization<Bearer>>() {
        return Some(auth.token().to_string());
    }
    request.uri().query().and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "token")
            .map(|(_, value)| value.to_string())
    })
}

fn require(request: &Request, role: Role) -> AppResult<()> {
    request
        .extensions()
        .get::<Principal>()
        .ok_or_else(|| AppError::Unauthorized("No authentication found".to_string()))?
        .require_role(role)
}

/// Require admin role
pub async fn require_admin(request: Request, next: Next) -> AppResult<Response> {
    require(&request, Role::Admin)?;
    Ok(next.run(request).await)
}

/// Require driver role
pub async fn require_driver(request: Request, next: Next) -> AppResult<Response> {
    require(&request, Role::Driver)?;
    Ok(next.run(request).await)
}

/// Require passenger role
pub async fn require_passenger(request: Request, next: Next) -> AppResult<Response> {
    require(&request, Role::Passenger)?;
    Ok(next.run(request).await)
}
