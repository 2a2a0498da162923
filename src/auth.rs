//! HTTP Basic Authentication for operator routes

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::sync::Arc;

/// Operator credentials
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Username for operator routes (None = operator routes closed)
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
        }
    }

    /// Load credentials from OPERATOR_USERNAME and OPERATOR_PASSWORD.
    /// Both must be set to open the operator routes.
    pub fn from_env() -> Self {
        let username = std::env::var("OPERATOR_USERNAME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let password = std::env::var("OPERATOR_PASSWORD")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if username.is_some() && password.is_some() {
            tracing::info!("Operator authentication enabled");
            Self { username, password }
        } else {
            if username.is_some() || password.is_some() {
                tracing::warn!(
                    "OPERATOR_USERNAME and OPERATOR_PASSWORD must both be set to enable operator routes"
                );
            }
            tracing::warn!("No operator credentials configured, operator routes are closed");
            Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Check credentials; nothing validates while no credentials are configured
    pub fn validate(&self, username: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => {
                constant_time_eq(u.as_bytes(), username.as_bytes())
                    && constant_time_eq(p.as_bytes(), password.as_bytes())
            }
            _ => false,
        }
    }

    /// Check an `Authorization` header value
    fn accepts(&self, header_value: &str) -> bool {
        let Some(encoded) = header_value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        decoded
            .split_once(':')
            .is_some_and(|(username, password)| self.validate(username, password))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Middleware for HTTP Basic Authentication on operator routes
pub async fn operator_auth_middleware(
    State(auth_config): State<Arc<AuthConfig>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth_config.is_enabled() {
        tracing::warn!(
            "Rejected {} {}: operator routes are closed",
            request.method(),
            request.uri().path()
        );
        return unauthorized();
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| auth_config.accepts(value));

    if authorized {
        next.run(request).await
    } else {
        tracing::warn!(
            "Rejected {} {}: bad operator credentials",
            request.method(),
            request.uri().path()
        );
        unauthorized()
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"roundtable operator\"")],
        "Unauthorized",
    )
        .into_response()
}
