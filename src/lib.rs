//! # model-rest
//!
//! REST middleware exposing registered data models over HTTP.
//!
//! ## Features
//!
//! - **Model Registry**: Models declared in code or YAML, each with its own store
//! - **CRUD Routes**: `/{plural}`, `/{plural}/{id}`, `count` and `exists`, resolved per request
//! - **Content Negotiation**: JSON, JSONP and XML chosen from the `Accept` header
//! - **Access Tokens**: Login/logout for User models, tokens from a header or `access_token`
//! - **Auth Policies**: Per-model, per-operation `public`/`authenticated`/`owner`/`deny`
//! - **Remote Methods**: Custom endpoints below a model's plural, with typed argument bindings
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use model_rest::prelude::*;
//!
//! let app = Application::new();
//! app.model(ModelDefinition::access_token("accessToken"))?;
//! app.model(
//!     ModelDefinition::user("user").has_many("accessTokens", "accessToken", "userId"),
//! )?;
//! app.model(
//!     ModelDefinition::new("MyModel")
//!         .property("name", PropertyDef::optional(PropertyType::String)),
//! )?;
//!
//! app.enable_auth();
//! app.serve("127.0.0.1:3000").await?;
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        AccessToken, AuthContext, AuthPolicy, AuthTokenService, BaseKind, ContentNegotiator,
        Credentials, FieldFormat, Filter, HasMany, InsertOutcome, MediaType, ModelAuthConfig,
        ModelDefinition, ModelInstance, ModelStore, Operation, ParamBinding, Pluralizer,
        PropertyDef, PropertySchema, PropertyType, RemoteArgs, RemoteMethod, RestError,
        RestResult, Returns, TokenSettings, ValidationError, Verb,
    };

    // === Storage ===
    pub use crate::storage::InMemoryStore;

    // === Config ===
    pub use crate::config::{AppConfig, AuthConfig, ModelConfig, RestConfig, ServerConfig};

    // === Server ===
    pub use crate::server::{Application, ModelHandle, ModelRegistry, RestExposure};

    // === External dependencies ===
    pub use anyhow::Result;
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};

    // === Axum ===
    pub use axum::Router;
}
