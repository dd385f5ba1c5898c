//! Remote methods: custom endpoints exposed next to a model's CRUD routes
//!
//! A [`RemoteMethod`] is a route descriptor: verb, path below the model's
//! plural, how each argument is bound from the request, how the result is
//! shaped, and the auth policy guarding it.
//!
//! ```rust,ignore
//! let get_token = RemoteMethod::new("getToken", Verb::Get, |args: RemoteArgs| async move {
//!     let id = args.request().and_then(|ctx| ctx.access_token()).map(|t| t.id.clone());
//!     Ok(json!(id))
//! })
//! .accepts(ParamBinding::request("req"))
//! .returns(Returns::named("id"));
//!
//! app.remote_method("user", get_token)?;
//! // GET /users/getToken -> {"id": null}
//! ```

use crate::core::auth::{AuthContext, AuthPolicy};
use crate::core::error::{RestResult, ValidationError};
use axum::http::Method;
use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Async handler of a remote method
pub type RemoteHandler =
    Arc<dyn Fn(RemoteArgs) -> BoxFuture<'static, RestResult<Value>> + Send + Sync>;

/// HTTP verb of a remote method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Verb::Get => method == Method::GET,
            Verb::Post => method == Method::POST,
            Verb::Put => method == Method::PUT,
            Verb::Delete => method == Method::DELETE,
        }
    }
}

/// Where an argument comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSource {
    /// The whole JSON body
    Body,
    /// A query-string parameter
    Query(String),
    /// A `{placeholder}` of the method path
    Path(String),
    /// The request's auth context
    Request,
}

/// Binding of one named argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    pub arg: String,
    pub source: ParamSource,
}

impl ParamBinding {
    pub fn body(arg: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            source: ParamSource::Body,
        }
    }

    /// Bind from a query parameter with the same name as the argument
    pub fn query(arg: impl Into<String>) -> Self {
        let arg = arg.into();
        Self {
            source: ParamSource::Query(arg.clone()),
            arg,
        }
    }

    /// Bind from a path placeholder with the same name as the argument
    pub fn path(arg: impl Into<String>) -> Self {
        let arg = arg.into();
        Self {
            source: ParamSource::Path(arg.clone()),
            arg,
        }
    }

    pub fn request(arg: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            source: ParamSource::Request,
        }
    }
}

/// Shape of the response body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Returns {
    /// Send the handler's value as is
    #[default]
    Root,
    /// Wrap the value as `{name: value}`
    Named(String),
}

impl Returns {
    pub fn named(name: impl Into<String>) -> Self {
        Returns::Named(name.into())
    }

    pub fn shape(&self, value: Value) -> Value {
        match self {
            Returns::Root => value,
            Returns::Named(name) => {
                let mut map = Map::new();
                map.insert(name.clone(), value);
                Value::Object(map)
            }
        }
    }
}

/// Arguments resolved from a request, passed to the handler
#[derive(Debug, Clone, Default)]
pub struct RemoteArgs {
    values: IndexMap<String, Value>,
    request: Option<AuthContext>,
}

impl RemoteArgs {
    pub fn new(values: IndexMap<String, Value>, request: Option<AuthContext>) -> Self {
        Self { values, request }
    }

    /// Raw value of an argument; unbound or absent arguments are `None`
    pub fn get(&self, arg: &str) -> Option<&Value> {
        self.values.get(arg)
    }

    /// Deserialize an argument, reporting a validation error on mismatch
    pub fn parse<T: DeserializeOwned>(&self, arg: &str) -> RestResult<T> {
        let value = self.values.get(arg).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            ValidationError::FieldError {
                field: arg.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Auth context, when the method declares a `request` binding
    pub fn request(&self) -> Option<&AuthContext> {
        self.request.as_ref()
    }
}

/// Descriptor of a custom endpoint
#[derive(Clone)]
pub struct RemoteMethod {
    name: String,
    verb: Verb,
    path: String,
    accepts: Vec<ParamBinding>,
    returns: Returns,
    policy: String,
    handler: RemoteHandler,
}

impl fmt::Debug for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMethod")
            .field("name", &self.name)
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("accepts", &self.accepts)
            .field("returns", &self.returns)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RemoteMethod {
    /// Create a remote method served at `/{plural}/{name}`
    pub fn new<F, Fut>(name: impl Into<String>, verb: Verb, handler: F) -> Self
    where
        F: Fn(RemoteArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RestResult<Value>> + Send + 'static,
    {
        let name = name.into();
        Self {
            path: format!("/{}", name),
            name,
            verb,
            accepts: Vec::new(),
            returns: Returns::Root,
            policy: "public".to_string(),
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }

    /// Override the path below the plural, e.g. `/{id}/greet`
    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        self
    }

    pub fn accepts(mut self, binding: ParamBinding) -> Self {
        self.accepts.push(binding);
        self
    }

    pub fn returns(mut self, returns: Returns) -> Self {
        self.returns = returns;
        self
    }

    /// Auth policy string, as accepted by [`AuthPolicy::parse_policy`]
    pub fn policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn route_path(&self) -> &str {
        &self.path
    }

    pub fn auth_policy(&self) -> AuthPolicy {
        AuthPolicy::parse_policy(&self.policy)
    }

    /// Match the path segments after the plural
    ///
    /// Returns the captured `{placeholder}` values on success.
    pub fn match_path(&self, segments: &[&str]) -> Option<IndexMap<String, String>> {
        let pattern: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        if pattern.len() != segments.len() {
            return None;
        }

        let mut captures = IndexMap::new();
        for (expected, actual) in pattern.iter().zip(segments) {
            match expected
                .strip_prefix('{')
                .and_then(|p| p.strip_suffix('}'))
            {
                Some(placeholder) => {
                    captures.insert(placeholder.to_string(), actual.to_string());
                }
                None if expected == actual => {}
                None => return None,
            }
        }
        Some(captures)
    }

    /// Resolve the declared bindings against one request
    pub fn bind(
        &self,
        captures: &IndexMap<String, String>,
        query: &IndexMap<String, String>,
        body: Option<&Value>,
        context: &AuthContext,
    ) -> RemoteArgs {
        let mut values = IndexMap::new();
        let mut request = None;

        for binding in &self.accepts {
            let value = match &binding.source {
                ParamSource::Body => body.cloned(),
                ParamSource::Query(name) => query.get(name).map(|raw| query_value(raw)),
                ParamSource::Path(name) => captures.get(name).map(|s| Value::String(s.clone())),
                ParamSource::Request => {
                    request = Some(context.clone());
                    None
                }
            };
            if let Some(value) = value {
                values.insert(binding.arg.clone(), value);
            }
        }

        RemoteArgs::new(values, request)
    }

    /// Run the handler and shape its result
    pub async fn invoke(&self, args: RemoteArgs) -> RestResult<Value> {
        let value = (self.handler)(args).await?;
        Ok(self.returns.shape(value))
    }
}

/// Query values that parse as JSON (numbers, booleans, objects) are passed
/// typed; anything else stays a string.
fn query_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Object(_) | Value::Array(_))) => {
            value
        }
        _ => Value::String(raw.to_string()),
    }
}
