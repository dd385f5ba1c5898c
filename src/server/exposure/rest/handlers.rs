//! HTTP handlers for model routes
//!
//! All handlers are model-agnostic: the model is resolved from the plural
//! path segment on every request.
//!
//! | Route | Operation |
//! |-------|-----------|
//! | `GET /{plural}` | list (with `filter`) |
//! | `POST /{plural}` | create |
//! | `GET /{plural}/count` | count (with `where`) |
//! | `GET`, `HEAD` `/{plural}/{id}` | find by id |
//! | `PUT /{plural}/{id}` | partial update |
//! | `DELETE /{plural}/{id}` | delete |
//! | `GET /{plural}/{id}/exists` | existence check |
//! | `POST /{plural}/login`, `POST /{plural}/logout` | User models only |
//!
//! Remote methods are matched before any of the item routes.

use super::context::token_from_request;
use super::response::{render, render_empty};
use crate::core::auth::{AuthContext, Operation};
use crate::core::error::{RestError, RestResult, ValidationError};
use crate::core::model::{BaseKind, ModelInstance};
use crate::core::negotiation::MediaType;
use crate::core::query::QueryParams;
use crate::core::token::Credentials;
use crate::server::application::Application;
use crate::server::registry::ModelHandle;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::sync::Arc;

/// Everything a model route needs from the request
struct RequestScope {
    app: Application,
    model: Arc<ModelHandle>,
    auth: AuthContext,
    query: IndexMap<String, String>,
    params: QueryParams,
    media: MediaType,
}

impl RequestScope {
    fn resolve(
        app: Application,
        plural: &str,
        auth: AuthContext,
        query: IndexMap<String, String>,
        headers: &HeaderMap,
    ) -> RestResult<Self> {
        let model = app
            .registry()
            .lookup_plural(plural)
            .ok_or_else(|| RestError::UnknownModel {
                name: plural.to_string(),
            })?;

        // negotiate before touching the store
        let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
        let media = model.negotiator().resolve(accept)?;

        Ok(Self {
            params: QueryParams::from_pairs(&query),
            media,
            app,
            model,
            auth,
            query,
        })
    }

    /// Check the model's policy for an operation
    ///
    /// A no-op while auth is off, except on AccessToken models: tokens are
    /// only ever issued and revoked through login and logout.
    fn authorize(&self, operation: Operation, target: Option<&ModelInstance>) -> RestResult<()> {
        let definition = self.model.definition();
        if !self.app.is_auth_enabled() && definition.base() != BaseKind::AccessToken {
            return Ok(());
        }

        let policy = definition.auth_config().policy_for(operation);
        if policy.check(&self.auth, definition, target) {
            Ok(())
        } else {
            Err(RestError::AccessDenied {
                model: definition.name().to_string(),
                operation: operation.as_str().to_string(),
            })
        }
    }

    fn respond(&self, status: StatusCode, body: &Value) -> RestResult<Response> {
        render(status, self.media, body, self.params.callback.as_deref())
    }

    fn respond_empty(&self, status: StatusCode) -> RestResult<Response> {
        Ok(render_empty(status, self.media))
    }

    fn present(&self, instance: &ModelInstance) -> Value {
        self.model.definition().present(instance)
    }

    fn not_found(&self, id: &str) -> RestError {
        RestError::NotFound {
            model: self.model.name().to_string(),
            id: id.to_string(),
        }
    }

    /// Run the first remote method matching the verb and path, if any
    async fn try_remote(
        &self,
        method: &Method,
        segments: &[&str],
        body: &Bytes,
    ) -> Option<RestResult<Response>> {
        let effective = if method == Method::HEAD {
            Method::GET
        } else {
            method.clone()
        };

        let remotes = self.app.remote_methods(self.model.name());
        let (remote, captures) = remotes.iter().find_map(|remote| {
            if !remote.verb().matches(&effective) {
                return None;
            }
            remote.match_path(segments).map(|captures| (remote, captures))
        })?;

        let result = async {
            if self.app.is_auth_enabled()
                && !remote
                    .auth_policy()
                    .check(&self.auth, self.model.definition(), None)
            {
                return Err(RestError::AccessDenied {
                    model: self.model.name().to_string(),
                    operation: remote.name().to_string(),
                });
            }

            let payload = if body.is_empty() {
                None
            } else {
                Some(parse_body(body)?)
            };
            let args = remote.bind(&captures, &self.query, payload.as_ref(), &self.auth);
            let value = remote.invoke(args).await?;
            self.respond(StatusCode::OK, &value)
        }
        .await;

        Some(result)
    }
}

fn parse_body(body: &Bytes) -> RestResult<Value> {
    if body.is_empty() {
        return Ok(json!({}));
    }
    let value = serde_json::from_slice(body).map_err(|e| ValidationError::InvalidPayload {
        message: format!("malformed JSON body: {}", e),
    })?;
    Ok(value)
}

/// Turn a handler result into a response, logging unexpected faults
fn finish(
    result: RestResult<Response>,
    method: &Method,
    route: &'static str,
    model: &str,
    id: Option<&str>,
) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => {
            if err.is_internal() {
                tracing::error!(%method, route, model, id, error = %err, "request failed");
            } else {
                tracing::debug!(
                    %method,
                    route,
                    model,
                    id,
                    status = err.status_code().as_u16(),
                    "request rejected"
                );
            }
            err.into_response()
        }
    }
}

/// `GET /health`
pub async fn health_check(State(app): State<Application>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "model-rest",
        "models": app.registry().model_names(),
    }))
}

/// Fallback for paths no route matches
pub async fn route_not_found(method: Method, uri: Uri) -> Response {
    RestError::RouteNotFound {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
    .into_response()
}

/// `GET /{plural}`
pub async fn list_instances(
    State(app): State<Application>,
    Path(plural): Path<String>,
    Query(query): Query<IndexMap<String, String>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
) -> Response {
    let result = async {
        let scope = RequestScope::resolve(app, &plural, auth, query, &headers)?;
        scope.authorize(Operation::List, None)?;

        let filter = scope.params.filter()?;
        let instances = scope.model.find(&filter).await?;
        let body = Value::Array(instances.iter().map(|i| scope.present(i)).collect());
        scope.respond(StatusCode::OK, &body)
    }
    .await;

    finish(result, &Method::GET, "/{plural}", &plural, None)
}

/// `POST /{plural}`
pub async fn create_instance(
    State(app): State<Application>,
    Path(plural): Path<String>,
    Query(query): Query<IndexMap<String, String>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let scope = RequestScope::resolve(app, &plural, auth, query, &headers)?;
        scope.authorize(Operation::Create, None)?;

        let instance = scope.model.create(parse_body(&body)?).await?;
        scope.respond(StatusCode::CREATED, &scope.present(&instance))
    }
    .await;

    finish(result, &Method::POST, "/{plural}", &plural, None)
}

/// Every verb on `/{plural}/{id}`
pub async fn item_route(
    State(app): State<Application>,
    method: Method,
    Path((plural, id)): Path<(String, String)>,
    Query(query): Query<IndexMap<String, String>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let scope = RequestScope::resolve(app, &plural, auth, query, &headers)?;
        if let Some(result) = scope.try_remote(&method, &[id.as_str()], &body).await {
            return result;
        }

        match method {
            Method::GET | Method::HEAD if id == "count" => count_instances(&scope).await,
            Method::GET => get_instance(&scope, &id, false).await,
            Method::HEAD => get_instance(&scope, &id, true).await,
            Method::PUT => update_instance(&scope, &id, &body).await,
            Method::DELETE => delete_instance(&scope, &id).await,
            Method::POST if scope.model.definition().base() == BaseKind::User => {
                match id.as_str() {
                    "login" => login(&scope, &body).await,
                    "logout" => logout(&scope, &headers).await,
                    _ => Err(route_error(&method, &plural, &id)),
                }
            }
            _ => Err(route_error(&method, &plural, &id)),
        }
    }
    .await;

    finish(result, &method, "/{plural}/{id}", &plural, Some(&id))
}

/// Every verb on `/{plural}/{id}/{action}`
pub async fn action_route(
    State(app): State<Application>,
    method: Method,
    Path((plural, id, action)): Path<(String, String, String)>,
    Query(query): Query<IndexMap<String, String>>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let scope = RequestScope::resolve(app, &plural, auth, query, &headers)?;
        let segments = [id.as_str(), action.as_str()];
        if let Some(result) = scope.try_remote(&method, &segments, &body).await {
            return result;
        }

        match (&method, action.as_str()) {
            (&Method::GET | &Method::HEAD, "exists") => instance_exists(&scope, &id).await,
            _ => Err(route_error(&method, &plural, &format!("{}/{}", id, action))),
        }
    }
    .await;

    finish(result, &method, "/{plural}/{id}/{action}", &plural, Some(&id))
}

fn route_error(method: &Method, plural: &str, rest: &str) -> RestError {
    RestError::RouteNotFound {
        method: method.to_string(),
        path: format!("/{}/{}", plural, rest),
    }
}

async fn count_instances(scope: &RequestScope) -> RestResult<Response> {
    scope.authorize(Operation::List, None)?;

    let where_clause = scope.params.where_clause()?;
    let count = scope.model.count(where_clause).await?;
    scope.respond(StatusCode::OK, &json!({ "count": count }))
}

async fn get_instance(scope: &RequestScope, id: &str, head: bool) -> RestResult<Response> {
    let instance = scope.model.find_by_id(id).await?;
    scope.authorize(Operation::Get, instance.as_ref())?;

    let Some(instance) = instance else {
        return Err(scope.not_found(id));
    };

    if head {
        scope.respond_empty(StatusCode::OK)
    } else {
        scope.respond(StatusCode::OK, &scope.present(&instance))
    }
}

async fn instance_exists(scope: &RequestScope, id: &str) -> RestResult<Response> {
    let exists = scope.model.exists(id).await?;
    // owner policies need the instance itself
    let target = if exists && scope.app.is_auth_enabled() {
        scope.model.find_by_id(id).await?
    } else {
        None
    };
    scope.authorize(Operation::Get, target.as_ref())?;

    scope.respond(StatusCode::OK, &json!({ "exists": exists }))
}

async fn update_instance(scope: &RequestScope, id: &str, body: &Bytes) -> RestResult<Response> {
    let existing = scope.model.find_by_id(id).await?;
    scope.authorize(Operation::Update, existing.as_ref())?;
    if existing.is_none() {
        return Err(scope.not_found(id));
    }

    let updated = scope
        .model
        .update(id, parse_body(body)?)
        .await?
        .ok_or_else(|| scope.not_found(id))?;
    scope.respond(StatusCode::OK, &scope.present(&updated))
}

async fn delete_instance(scope: &RequestScope, id: &str) -> RestResult<Response> {
    let existing = scope.model.find_by_id(id).await?;
    scope.authorize(Operation::Delete, existing.as_ref())?;
    if existing.is_none() || !scope.model.delete(id).await? {
        return Err(scope.not_found(id));
    }

    let service = match scope.model.definition().base() {
        BaseKind::User => scope.app.token_service_for(&scope.model),
        _ => None,
    };
    if let Some(service) = service {
        let revoked = service.revoke_user_tokens(id).await?;
        tracing::debug!(user_id = id, revoked, "revoked tokens of deleted user");
    }

    scope.respond(StatusCode::OK, &json!({ "count": 1 }))
}

async fn login(scope: &RequestScope, body: &Bytes) -> RestResult<Response> {
    let credentials: Credentials =
        serde_json::from_value(parse_body(body)?).map_err(|e| ValidationError::InvalidPayload {
            message: format!("invalid credentials: {}", e),
        })?;

    let service = scope.app.token_service_for(&scope.model).ok_or_else(|| {
        RestError::Internal(format!(
            "no AccessToken model is attached to {}",
            scope.model.name()
        ))
    })?;

    let token = service.login(credentials).await?;
    let body = serde_json::to_value(&token).map_err(|e| RestError::Internal(e.to_string()))?;
    scope.respond(StatusCode::OK, &body)
}

async fn logout(scope: &RequestScope, headers: &HeaderMap) -> RestResult<Response> {
    let header = scope.app.auth_config().header;
    let token_id = match scope.auth.access_token() {
        Some(token) => Some(token.id.clone()),
        None => token_from_request(headers, &header, &Uri::default()).or_else(|| {
            scope
                .params
                .access_token
                .clone()
                .filter(|s| !s.is_empty())
        }),
    }
    .ok_or(RestError::Unauthenticated)?;

    let service = scope
        .app
        .token_service_for(&scope.model)
        .ok_or(RestError::Unauthenticated)?;
    service.logout(&token_id).await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
