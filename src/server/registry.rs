//! Model registry and per-model handles
//!
//! The registry maps model names to [`ModelHandle`]s: the immutable
//! definition, the backing store and the content negotiator cached when the
//! model was registered. Handles apply schema validation and the built-in
//! User behaviour before anything reaches the store.

use crate::core::error::{RestError, RestResult, ValidationError};
use crate::core::field::{ValidationMode, validate_fields};
use crate::core::model::{BaseKind, ModelDefinition, ModelInstance, value_as_id};
use crate::core::negotiation::ContentNegotiator;
use crate::core::query::Filter;
use crate::core::store::{InsertOutcome, ModelStore};
use crate::core::token::{AuthTokenService, TokenSettings, hash_password};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// URL segments the router serves itself; no model may use them as plural
pub const RESERVED_PLURALS: &[&str] = &["health", "healthz"];

/// A registered model
pub struct ModelHandle {
    definition: ModelDefinition,
    store: Arc<dyn ModelStore>,
    negotiator: ContentNegotiator,
    /// Serializes the email check and the write of User instances
    user_writes: Mutex<()>,
}

impl ModelHandle {
    pub fn new(
        definition: ModelDefinition,
        store: Arc<dyn ModelStore>,
        negotiator: ContentNegotiator,
    ) -> Self {
        Self {
            definition,
            store,
            negotiator,
            user_writes: Mutex::new(()),
        }
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn store(&self) -> Arc<dyn ModelStore> {
        self.store.clone()
    }

    pub fn negotiator(&self) -> &ContentNegotiator {
        &self.negotiator
    }

    /// Create an instance from a JSON payload
    ///
    /// An `id` in the payload is used as the instance id; a taken id is a
    /// conflict. User models hash the password and require a unique email.
    pub async fn create(&self, payload: Value) -> RestResult<ModelInstance> {
        let mut fields = into_object(payload)?;
        let id = match fields.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(value_as_id(&raw).ok_or_else(|| ValidationError::FieldError {
                field: "id".to_string(),
                message: "must be a string or a number".to_string(),
            })?),
        };

        validate_fields(self.definition.properties(), &fields, ValidationMode::Create)?;
        let is_user = self.definition.base() == BaseKind::User;
        if is_user {
            hash_password_field(&mut fields).await?;
        }

        let _guard = if is_user {
            let guard = self.user_writes.lock().await;
            self.ensure_unique_email(&fields, None).await?;
            Some(guard)
        } else {
            None
        };

        match self.store.insert(id, fields.into_iter().collect()).await? {
            InsertOutcome::Created(instance) => {
                tracing::debug!(model = self.name(), id = %instance.id, "created instance");
                Ok(instance)
            }
            InsertOutcome::IdTaken(id) => Err(RestError::Conflict {
                model: self.name().to_string(),
                id,
            }),
        }
    }

    pub async fn find_by_id(&self, id: &str) -> RestResult<Option<ModelInstance>> {
        Ok(self.store.get(id).await?)
    }

    /// Whether an instance exists; a missing id is simply `false`
    pub async fn exists(&self, id: &str) -> RestResult<bool> {
        Ok(self.store.contains(id).await?)
    }

    /// Merge a partial payload into an existing instance
    ///
    /// The id itself cannot be changed; an `id` in the payload is ignored.
    pub async fn update(&self, id: &str, payload: Value) -> RestResult<Option<ModelInstance>> {
        let mut fields = into_object(payload)?;
        fields.remove("id");

        validate_fields(self.definition.properties(), &fields, ValidationMode::Update)?;
        if !self.store.contains(id).await? {
            return Ok(None);
        }
        let is_user = self.definition.base() == BaseKind::User;
        if is_user {
            hash_password_field(&mut fields).await?;
        }

        let _guard = if is_user {
            let guard = self.user_writes.lock().await;
            self.ensure_unique_email(&fields, Some(id)).await?;
            Some(guard)
        } else {
            None
        };

        let updated = self.store.patch(id, fields.into_iter().collect()).await?;
        if updated.is_some() {
            tracing::debug!(model = self.name(), id, "updated instance");
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> RestResult<bool> {
        let removed = self.store.remove(id).await?;
        if removed {
            tracing::debug!(model = self.name(), id, "deleted instance");
        }
        Ok(removed)
    }

    pub async fn find(&self, filter: &Filter) -> RestResult<Vec<ModelInstance>> {
        Ok(self.store.find(filter).await?)
    }

    pub async fn count(&self, where_clause: Map<String, Value>) -> RestResult<usize> {
        Ok(self.store.count(&Filter::matching(where_clause)).await?)
    }

    pub async fn find_one(
        &self,
        where_clause: Map<String, Value>,
    ) -> RestResult<Option<ModelInstance>> {
        let filter = Filter {
            limit: Some(1),
            ..Filter::matching(where_clause)
        };
        Ok(self.store.find(&filter).await?.into_iter().next())
    }

    /// Reject an email another User instance already has
    ///
    /// `current` is the id of the instance being updated, if any. Callers
    /// hold `user_writes` until their write is done.
    async fn ensure_unique_email(
        &self,
        fields: &Map<String, Value>,
        current: Option<&str>,
    ) -> RestResult<()> {
        if let Some(email) = fields.get("email").cloned().filter(|e| !e.is_null()) {
            let mut by_email = Map::new();
            by_email.insert("email".to_string(), email);
            let taken = self
                .find_one(by_email)
                .await?
                .is_some_and(|existing| Some(existing.id.as_str()) != current);
            if taken {
                return Err(ValidationError::FieldError {
                    field: "email".to_string(),
                    message: "already exists".to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Replace a plain `password` by its Argon2 hash
async fn hash_password_field(fields: &mut Map<String, Value>) -> RestResult<()> {
    let password = fields
        .get("password")
        .and_then(Value::as_str)
        .map(str::to_string);
    if let Some(password) = password {
        let hash = hash_password(password).await?;
        fields.insert("password".to_string(), json!(hash));
    }
    Ok(())
}

fn into_object(payload: Value) -> Result<Map<String, Value>, ValidationError> {
    match payload {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::InvalidPayload {
            message: "body must be a JSON object".to_string(),
        }),
    }
}

/// Registry of all models of an application
///
/// Registration order is preserved; names and plurals are unique.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<IndexMap<String, Arc<ModelHandle>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model with its store
    ///
    /// Fails with [`RestError::DuplicateModel`] when the name (or the URL
    /// plural) is already taken, including the plurals of the built-in
    /// health routes.
    pub fn register(
        &self,
        definition: ModelDefinition,
        store: Arc<dyn ModelStore>,
        negotiator: ContentNegotiator,
    ) -> RestResult<Arc<ModelHandle>> {
        let mut models = self
            .models
            .write()
            .map_err(|e| RestError::Internal(format!("Failed to acquire write lock: {}", e)))?;

        if models.contains_key(definition.name()) {
            return Err(RestError::DuplicateModel {
                name: definition.name().to_string(),
            });
        }
        if RESERVED_PLURALS.contains(&definition.plural_name())
            || models
                .values()
                .any(|m| m.definition.plural_name() == definition.plural_name())
        {
            return Err(RestError::DuplicateModel {
                name: definition.plural_name().to_string(),
            });
        }

        tracing::info!(
            model = definition.name(),
            plural = definition.plural_name(),
            base = ?definition.base(),
            "registered model"
        );

        let handle = Arc::new(ModelHandle::new(definition, store, negotiator));
        models.insert(handle.name().to_string(), handle.clone());
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ModelHandle>> {
        self.models.read().ok()?.get(name).cloned()
    }

    /// Find a model by its URL segment
    pub fn lookup_plural(&self, plural: &str) -> Option<Arc<ModelHandle>> {
        self.models
            .read()
            .ok()?
            .values()
            .find(|m| m.definition.plural_name() == plural)
            .cloned()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models
            .read()
            .map(|models| models.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every model together with its store
    pub fn reset(&self) -> RestResult<()> {
        let mut models = self
            .models
            .write()
            .map_err(|e| RestError::Internal(format!("Failed to acquire write lock: {}", e)))?;
        models.clear();
        tracing::debug!("model registry reset");
        Ok(())
    }

    /// The AccessToken model a User model issues tokens into
    ///
    /// Follows the user's `hasMany` relations first and falls back to the
    /// first registered AccessToken model.
    pub fn token_model_for(&self, user: &ModelHandle) -> Option<Arc<ModelHandle>> {
        let models = self.models.read().ok()?;
        user.definition
            .relations()
            .iter()
            .filter_map(|relation| models.get(&relation.model))
            .find(|m| m.definition.base() == BaseKind::AccessToken)
            .or_else(|| {
                models
                    .values()
                    .find(|m| m.definition.base() == BaseKind::AccessToken)
            })
            .cloned()
    }

    /// Token service of a specific User model
    pub fn token_service_for(
        &self,
        user: &ModelHandle,
        settings: TokenSettings,
    ) -> Option<AuthTokenService> {
        let tokens = self.token_model_for(user)?;
        Some(AuthTokenService::new(
            user.name(),
            user.store(),
            tokens.store(),
            settings,
        ))
    }

    /// Token services of every User model that has a token model
    ///
    /// A token model serves the first User model, in registration order,
    /// that resolves to it.
    pub fn auth_services(&self, settings: TokenSettings) -> Vec<AuthTokenService> {
        let users: Vec<Arc<ModelHandle>> = match self.models.read() {
            Ok(models) => models
                .values()
                .filter(|m| m.definition.base() == BaseKind::User)
                .cloned()
                .collect(),
            Err(_) => return Vec::new(),
        };

        let mut claimed: Vec<String> = Vec::new();
        let mut services = Vec::new();
        for user in &users {
            let Some(tokens) = self.token_model_for(user) else {
                continue;
            };
            if claimed.iter().any(|name| name == tokens.name()) {
                continue;
            }
            claimed.push(tokens.name().to_string());
            services.push(AuthTokenService::new(
                user.name(),
                user.store(),
                tokens.store(),
                settings,
            ));
        }
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::{PropertyDef, PropertyType};
    use crate::storage::InMemoryStore;

    fn register(registry: &ModelRegistry, def: ModelDefinition) -> Arc<ModelHandle> {
        registry
            .register(def, Arc::new(InMemoryStore::new()), ContentNegotiator::default())
            .unwrap()
    }

    fn my_model() -> ModelDefinition {
        ModelDefinition::new("MyModel")
            .property("name", PropertyDef::required(PropertyType::String))
            .property("rank", PropertyDef::optional(PropertyType::Number))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = ModelRegistry::new();
        register(&registry, my_model());

        assert!(registry.lookup("MyModel").is_some());
        assert!(registry.lookup_plural("mymodels").is_some());
        assert!(registry.lookup("Other").is_none());
        assert_eq!(registry.model_names(), vec!["MyModel"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = ModelRegistry::new();
        register(&registry, my_model());

        let err = registry
            .register(my_model(), Arc::new(InMemoryStore::new()), ContentNegotiator::default())
            .err()
            .unwrap();
        assert!(matches!(err, RestError::DuplicateModel { .. }));

        let clash = ModelDefinition::new("Other").plural("mymodels");
        assert!(
            registry
                .register(clash, Arc::new(InMemoryStore::new()), ContentNegotiator::default())
                .is_err()
        );
    }

    #[test]
    fn test_health_plurals_are_reserved() {
        let registry = ModelRegistry::new();
        for plural in ["health", "healthz"] {
            let err = registry
                .register(
                    ModelDefinition::new("Status").plural(plural),
                    Arc::new(InMemoryStore::new()),
                    ContentNegotiator::default(),
                )
                .err()
                .unwrap();
            assert!(matches!(err, RestError::DuplicateModel { name } if name == plural));
        }
        assert!(registry.model_names().is_empty());
    }

    #[tokio::test]
    async fn test_reset_drops_models_and_instances() {
        let registry = ModelRegistry::new();
        let handle = register(&registry, my_model());
        handle.create(json!({"name": "m1"})).await.unwrap();

        registry.reset().unwrap();
        assert!(registry.model_names().is_empty());

        let fresh = register(&registry, my_model());
        assert!(fresh.find(&Filter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_validates_payload() {
        let registry = ModelRegistry::new();
        let handle = register(&registry, my_model());

        let err = handle.create(json!({"rank": 1})).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);

        let err = handle.create(json!({"name": 5})).await.unwrap_err();
        assert!(matches!(err, RestError::Validation(_)));

        let err = handle.create(json!(["not", "an", "object"])).await.unwrap_err();
        assert!(matches!(
            err,
            RestError::Validation(ValidationError::InvalidPayload { .. })
        ));
    }

    #[tokio::test]
    async fn test_crud_cycle() {
        let registry = ModelRegistry::new();
        let handle = register(&registry, my_model());

        let created = handle.create(json!({"name": "m1"})).await.unwrap();
        assert_eq!(created.id, "1");
        assert!(handle.exists("1").await.unwrap());
        assert!(!handle.exists("2").await.unwrap());

        let updated = handle
            .update("1", json!({"rank": 3, "id": "99"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, "1");
        assert_eq!(updated.fields["rank"], json!(3));
        assert!(handle.update("2", json!({"rank": 1})).await.unwrap().is_none());

        let err = handle.update("1", json!({"name": null})).await.unwrap_err();
        assert!(matches!(err, RestError::Validation(_)));

        assert!(handle.delete("1").await.unwrap());
        assert!(!handle.delete("1").await.unwrap());
        assert!(handle.find_by_id("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_explicit_id_conflict() {
        let registry = ModelRegistry::new();
        let handle = register(&registry, my_model());

        handle.create(json!({"id": 7, "name": "a"})).await.unwrap();
        let err = handle.create(json!({"id": "7", "name": "b"})).await.unwrap_err();
        assert!(matches!(err, RestError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_count_and_find_one() {
        let registry = ModelRegistry::new();
        let handle = register(&registry, my_model());
        for name in ["a", "b", "a"] {
            handle.create(json!({"name": name})).await.unwrap();
        }

        let mut only_a = Map::new();
        only_a.insert("name".to_string(), json!("a"));
        assert_eq!(handle.count(only_a.clone()).await.unwrap(), 2);
        assert_eq!(handle.count(Map::new()).await.unwrap(), 3);
        assert_eq!(handle.find_one(only_a).await.unwrap().unwrap().id, "1");
    }

    #[tokio::test]
    async fn test_user_password_is_hashed_and_email_unique() {
        let registry = ModelRegistry::new();
        let users = register(&registry, ModelDefinition::user("user"));

        let user = users
            .create(json!({"email": "a@b.io", "password": "pwd"}))
            .await
            .unwrap();
        let stored = user.get_str("password").unwrap();
        assert!(stored.starts_with("$argon2"));
        assert_eq!(
            users.definition().present(&user),
            json!({"id": "1", "email": "a@b.io"})
        );

        let err = users
            .create(json!({"email": "a@b.io", "password": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Validation(_)));

        let err = users
            .create(json!({"email": "not-an-email", "password": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, RestError::Validation(_)));

        // keeping one's own email on update is fine
        users
            .update("1", json!({"email": "a@b.io"}))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_token_service_follows_relation() {
        let registry = ModelRegistry::new();
        register(&registry, ModelDefinition::access_token("accessToken"));
        let users = register(
            &registry,
            ModelDefinition::user("user").has_many("accessTokens", "accessToken", "userId"),
        );

        let tokens = registry.token_model_for(&users).unwrap();
        assert_eq!(tokens.name(), "accessToken");
        assert_eq!(registry.auth_services(TokenSettings::default()).len(), 1);
    }

    #[test]
    fn test_no_token_service_without_token_model() {
        let registry = ModelRegistry::new();
        register(&registry, ModelDefinition::user("user"));
        assert!(registry.auth_services(TokenSettings::default()).is_empty());
    }

    #[tokio::test]
    async fn test_every_user_model_gets_a_token_service() {
        let registry = ModelRegistry::new();
        register(&registry, ModelDefinition::access_token("accessToken"));
        register(&registry, ModelDefinition::access_token("adminToken"));
        let users = register(
            &registry,
            ModelDefinition::user("user").has_many("accessTokens", "accessToken", "userId"),
        );
        let admins = register(
            &registry,
            ModelDefinition::user("admin").has_many("adminTokens", "adminToken", "userId"),
        );
        // resolves to the same token model as "user" through the fallback
        register(&registry, ModelDefinition::user("guest"));

        assert_eq!(registry.auth_services(TokenSettings::default()).len(), 2);
        assert_eq!(registry.token_model_for(&users).unwrap().name(), "accessToken");
        assert_eq!(registry.token_model_for(&admins).unwrap().name(), "adminToken");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_user_creates_keep_email_unique() {
        let registry = ModelRegistry::new();
        let users = register(&registry, ModelDefinition::user("user"));

        let mut tasks = Vec::new();
        for n in 0..8 {
            let users = users.clone();
            tasks.push(tokio::spawn(async move {
                users
                    .create(json!({"email": "same@b.io", "password": format!("pwd{n}")}))
                    .await
            }));
        }

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(err) => assert!(matches!(err, RestError::Validation(_))),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(users.count(Map::new()).await.unwrap(), 1);
    }
}
