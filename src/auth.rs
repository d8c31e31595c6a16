use crate::backend::BookingBackend;
use crate::configuration::Configuration;
use crate::types::User;
use crate::AppState;
use axum::body::Body;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, request::Parts, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::convert::Infallible;
use tracing::debug;

/// Token of the session that authenticated the current request.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

/// The signed-in user, if any. Booking works without one.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<User>().cloned()))
    }
}

/// Reads the session token from the session cookie or a bearer header.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, token)| token.to_string())
}

pub async fn resolve_session<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let cookie_name = state.configuration.session_cookie_name();
    if let Some(token) = session_token(request.headers(), &cookie_name) {
        match state.backend.user_for_session(&token) {
            Ok(user) => {
                request.extensions_mut().insert(user);
                request.extensions_mut().insert(SessionToken(token));
            }
            Err(err) => debug!(%err, "Ignoring invalid session"),
        }
    }
    next.run(request).await
}

/// Guards the session hand-over endpoint used by the OAuth service.
pub async fn adapter_auth<T: BookingBackend, C: Configuration>(
    State(state): State<AppState<T, C>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let Some(secret) = state.configuration.auth_secret() else {
        return Err((StatusCode::NOT_FOUND, "Session hand-over is disabled".to_string()));
    };

    if let Some(auth_header) = request.headers().get("x-auth-secret") {
        if auth_header.to_str().unwrap_or("") != secret {
            return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
        }
    } else {
        return Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string()));
    }
    Ok(next.run(request).await)
}

pub async fn user_auth(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    if request.extensions().get::<User>().is_none() {
        return Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string()));
    }
    Ok(next.run(request).await)
}

pub async fn admin_auth(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    match request.extensions().get::<User>() {
        None => Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string())),
        Some(user) if !user.is_admin() => {
            Err((StatusCode::FORBIDDEN, "Admin role required".to_string()))
        }
        Some(_) => Ok(next.run(request).await),
    }
}
