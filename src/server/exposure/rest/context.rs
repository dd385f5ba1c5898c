//! Request auth context
//!
//! When auth is enabled, the token presented in the configured header (raw
//! or as `Bearer <id>`) or in the `access_token` query parameter is
//! validated and the resulting [`AuthContext`] is stored in the request
//! extensions. A missing or invalid token leaves the request anonymous;
//! whether that is acceptable is up to the route's policy.

use crate::core::auth::AuthContext;
use crate::core::error::{RestError, RestResult};
use crate::core::query::QueryParams;
use crate::server::application::Application;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Extract the presented token id, header first, then query string
pub fn token_from_request(headers: &HeaderMap, header: &str, uri: &Uri) -> Option<String> {
    let from_header = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(strip_bearer)
        .filter(|s| !s.is_empty());

    if let Some(token) = from_header {
        return Some(token.to_string());
    }

    Query::<QueryParams>::try_from_uri(uri)
        .ok()
        .and_then(|Query(params)| params.access_token)
        .filter(|s| !s.is_empty())
}

fn strip_bearer(value: &str) -> &str {
    let value = value.trim();
    if value.eq_ignore_ascii_case("bearer") {
        return "";
    }
    match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => value,
    }
}

/// Middleware attaching an [`AuthContext`] to every request
pub async fn attach_auth_context(
    State(app): State<Application>,
    mut request: Request,
    next: Next,
) -> Response {
    let context = if app.is_auth_enabled() {
        match resolve_context(&app, request.headers(), request.uri()).await {
            Ok(context) => context,
            Err(err) => {
                tracing::error!(path = %request.uri().path(), error = %err, "token validation failed");
                return err.into_response();
            }
        }
    } else {
        AuthContext::Anonymous
    };

    request.extensions_mut().insert(context);
    next.run(request).await
}

async fn resolve_context(
    app: &Application,
    headers: &HeaderMap,
    uri: &Uri,
) -> RestResult<AuthContext> {
    let header = app.auth_config().header;
    let Some(token_id) = token_from_request(headers, &header, uri) else {
        return Ok(AuthContext::Anonymous);
    };

    let services = app.auth_services();
    if services.is_empty() {
        tracing::debug!("token presented but no user model issues tokens");
        return Ok(AuthContext::Anonymous);
    }

    for service in &services {
        match service.validate(&token_id).await {
            Ok((token, user)) => {
                return Ok(AuthContext::Token {
                    token,
                    user,
                    user_model: service.user_model().to_string(),
                });
            }
            Err(RestError::Unauthenticated) => continue,
            Err(err) => return Err(err),
        }
    }
    tracing::debug!("ignoring invalid access token");
    Ok(AuthContext::Anonymous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_raw_and_bearer_header() {
        let uri: Uri = "/users/1".parse().unwrap();
        assert_eq!(
            token_from_request(&headers("authorization", "abc"), "Authorization", &uri),
            Some("abc".to_string())
        );
        assert_eq!(
            token_from_request(&headers("authorization", "Bearer abc"), "Authorization", &uri),
            Some("abc".to_string())
        );
        assert_eq!(
            token_from_request(&headers("x-access-token", "xyz"), "X-Access-Token", &uri),
            Some("xyz".to_string())
        );
    }

    #[test]
    fn test_query_parameter_fallback() {
        let uri: Uri = "/users/1?access_token=qqq".parse().unwrap();
        assert_eq!(
            token_from_request(&HeaderMap::new(), "Authorization", &uri),
            Some("qqq".to_string())
        );
    }

    #[test]
    fn test_missing_or_blank_token() {
        let uri: Uri = "/users/1?access_token=".parse().unwrap();
        assert!(token_from_request(&HeaderMap::new(), "Authorization", &uri).is_none());
        assert!(
            token_from_request(&headers("authorization", "Bearer "), "Authorization", &uri)
                .is_none()
        );
    }
}
