//! Application context: configuration, model registry, auth switch and
//! remote methods in one explicitly shared object
//!
//! ```rust,ignore
//! let app = Application::new();
//! app.model(ModelDefinition::new("MyModel").property("name", PropertyDef::optional(PropertyType::String)))?;
//!
//! let router = app.rest();
//! app.serve("127.0.0.1:3000").await?;
//! ```

use super::exposure::RestExposure;
use super::registry::{ModelHandle, ModelRegistry};
use crate::config::{AppConfig, AuthConfig};
use crate::core::error::{RestError, RestResult};
use crate::core::model::ModelDefinition;
use crate::core::negotiation::ContentNegotiator;
use crate::core::remote::RemoteMethod;
use crate::core::store::ModelStore;
use crate::core::token::AuthTokenService;
use crate::storage::InMemoryStore;
use anyhow::Result;
use axum::Router;
use indexmap::IndexMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::net::TcpListener;

/// Cheaply clonable handle to the application state
#[derive(Clone, Default)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct AppInner {
    config: RwLock<AppConfig>,
    registry: ModelRegistry,
    remote_methods: RwLock<IndexMap<String, Vec<RemoteMethod>>>,
}

impl Application {
    /// Create an application with the default configuration and no models
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an application from a configuration, registering its models
    ///
    /// Models are registered in declaration order with in-memory stores.
    pub fn with_config(config: AppConfig) -> RestResult<Self> {
        let models = config.models.clone();
        let app = Self {
            inner: Arc::new(AppInner {
                config: RwLock::new(config),
                ..AppInner::default()
            }),
        };

        for model in &models {
            app.model(model.to_definition())?;
        }
        Ok(app)
    }

    /// Load a YAML configuration file and build the application from it
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = AppConfig::from_yaml_file(path)?;
        Ok(Self::with_config(config)?)
    }

    fn config_read(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.inner
            .config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn config_write(&self) -> RwLockWriteGuard<'_, AppConfig> {
        self.inner
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> AppConfig {
        self.config_read().clone()
    }

    pub fn auth_config(&self) -> AuthConfig {
        self.config_read().auth.clone()
    }

    /// Set the ordered response media types
    ///
    /// Only models registered afterwards pick the new list up: each model
    /// caches its negotiator at registration time.
    pub fn set_supported_types<S: Into<String>>(&self, types: impl IntoIterator<Item = S>) {
        self.config_write().rest.supported_types = types.into_iter().map(Into::into).collect();
    }

    /// Register a model backed by a fresh in-memory store
    pub fn model(&self, definition: ModelDefinition) -> RestResult<Arc<ModelHandle>> {
        self.model_with_store(definition, Arc::new(InMemoryStore::new()))
    }

    /// Register a model backed by the given store
    pub fn model_with_store(
        &self,
        definition: ModelDefinition,
        store: Arc<dyn ModelStore>,
    ) -> RestResult<Arc<ModelHandle>> {
        let negotiator =
            ContentNegotiator::new(self.config_read().rest.supported_types.as_slice());
        self.inner.registry.register(definition, store, negotiator)
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ModelHandle>> {
        self.inner.registry.lookup(name)
    }

    /// Turn on token parsing and policy enforcement
    pub fn enable_auth(&self) {
        self.config_write().auth.enabled = true;
        tracing::info!("authentication enabled");
    }

    pub fn is_auth_enabled(&self) -> bool {
        self.config_read().auth.enabled
    }

    /// Token services of every User model with an AccessToken model
    pub fn auth_services(&self) -> Vec<AuthTokenService> {
        let settings = self.config_read().auth.token_settings();
        self.inner.registry.auth_services(settings)
    }

    /// Token service of a specific User model
    ///
    /// Available whether or not auth is enabled, so tokens can be issued
    /// programmatically.
    pub fn token_service_for(&self, user: &ModelHandle) -> Option<AuthTokenService> {
        let settings = self.config_read().auth.token_settings();
        self.inner.registry.token_service_for(user, settings)
    }

    /// Expose a custom endpoint below a model's plural
    pub fn remote_method(&self, model: &str, method: RemoteMethod) -> RestResult<()> {
        if self.inner.registry.lookup(model).is_none() {
            return Err(RestError::UnknownModel {
                name: model.to_string(),
            });
        }

        let mut methods = self
            .inner
            .remote_methods
            .write()
            .map_err(|e| RestError::Internal(format!("Failed to acquire write lock: {}", e)))?;

        tracing::debug!(
            model,
            method = method.name(),
            path = method.route_path(),
            "registered remote method"
        );
        methods.entry(model.to_string()).or_default().push(method);
        Ok(())
    }

    /// Remote methods of a model, in registration order
    pub fn remote_methods(&self, model: &str) -> Vec<RemoteMethod> {
        self.inner
            .remote_methods
            .read()
            .ok()
            .and_then(|methods| methods.get(model).cloned())
            .unwrap_or_default()
    }

    /// Drop every model, its instances and its remote methods
    pub fn reset(&self) -> RestResult<()> {
        self.inner.registry.reset()?;
        self.inner
            .remote_methods
            .write()
            .map_err(|e| RestError::Internal(format!("Failed to acquire write lock: {}", e)))?
            .clear();
        Ok(())
    }

    /// Build the REST router serving every registered model
    pub fn rest(&self) -> Router {
        RestExposure::build_router(self.clone())
    }

    /// Serve the REST router on the given address until shutdown
    pub async fn serve(&self, addr: &str) -> Result<()> {
        let app = self.rest();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }

    /// Serve on the address from the `server` configuration section
    pub async fn serve_configured(&self) -> Result<()> {
        let addr = self.config_read().server.address();
        self.serve(&addr).await
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
