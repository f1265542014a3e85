use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::connect_info::ConnectInfo,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value,
        None => return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
    };

    let verified = match state.auth.verify_bearer_token(auth_header) {
        Ok(user) => user,
        Err(error) => {
            tracing::warn!(error = %error, "authorization failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: verified.user_id,
        email: verified.email,
    });

    next.run(request).await
}

/// Authenticates, then checks the admin flag with a fresh store read. No
/// caching: every admin request re-reads the flag.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        Some(value) => value,
        None => return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
    };

    let verified = match state.auth.verify_bearer_token(auth_header) {
        Ok(user) => user,
        Err(error) => {
            tracing::warn!(error = %error, "authorization failed");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    };

    match state.store.is_admin(verified.user_id).await {
        Ok(true) => {}
        Ok(false) => return (StatusCode::FORBIDDEN, "Admin access required.").into_response(),
        Err(error) => {
            tracing::error!(error = %error, "admin check failed");
            return (StatusCode::BAD_GATEWAY, "Upstream service unavailable").into_response();
        }
    }

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: verified.user_id,
        email: verified.email,
    });

    next.run(request).await
}

pub async fn api_rate_limit(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let socket_addr = request
        .extensions()
        .get::<SocketAddr>()
        .copied()
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|value| value.0)
        });
    let key = client_identity(request.headers(), socket_addr, state.config.trust_proxy);

    if !state.api_limiter.check_and_count(&key) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests from this IP, please try again after 15 minutes",
        )
            .into_response();
    }

    next.run(request).await
}

fn client_identity(
    headers: &HeaderMap,
    socket_addr: Option<SocketAddr>,
    trust_proxy: bool,
) -> String {
    if trust_proxy {
        if let Some(value) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = value.split(',').next() {
                let candidate = first.trim();
                if !candidate.is_empty() {
                    return candidate.to_string();
                }
            }
        }

        if let Some(value) = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
        {
            let candidate = value.trim();
            if !candidate.is_empty() {
                return candidate.to_string();
            }
        }
    }

    socket_addr
        .map(|address| address.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
