//! Model definitions and instances
//!
//! A [`ModelDefinition`] is the immutable description of a model: its name,
//! URL plural, property schema and base kind. Instances are plain ordered
//! field maps with a store-assigned id.

use crate::core::auth::ModelAuthConfig;
use crate::core::field::{FieldFormat, PropertyDef, PropertySchema, PropertyType};
use crate::core::pluralize::Pluralizer;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Built-in behaviour a model extends
///
/// `User` and `AccessToken` models get a fixed set of extra properties and
/// default auth policies on top of what the definition declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseKind {
    #[default]
    Generic,
    #[serde(alias = "User")]
    User,
    #[serde(alias = "AccessToken")]
    AccessToken,
}

impl BaseKind {
    /// Properties every model of this kind carries
    pub fn base_properties(&self) -> PropertySchema {
        let mut props = PropertySchema::new();
        match self {
            BaseKind::Generic => {}
            BaseKind::User => {
                props.insert(
                    "email".into(),
                    PropertyDef::required(PropertyType::String).with_format(FieldFormat::Email),
                );
                props.insert(
                    "password".into(),
                    PropertyDef::required(PropertyType::String),
                );
            }
            BaseKind::AccessToken => {
                props.insert("userId".into(), PropertyDef::required(PropertyType::Any));
                props.insert("created".into(), PropertyDef::optional(PropertyType::Date));
                props.insert("ttl".into(), PropertyDef::optional(PropertyType::Number));
                props.insert("lastUsed".into(), PropertyDef::optional(PropertyType::Date));
            }
        }
        props
    }

    /// Properties never exposed in responses
    pub fn hidden_properties(&self) -> &'static [&'static str] {
        match self {
            BaseKind::User => &["password"],
            _ => &[],
        }
    }

    /// Default per-operation auth policies
    pub fn default_auth(&self) -> ModelAuthConfig {
        match self {
            BaseKind::Generic => ModelAuthConfig::default(),
            BaseKind::User => ModelAuthConfig {
                list: "deny".to_string(),
                get: "owner".to_string(),
                create: "public".to_string(),
                update: "owner".to_string(),
                delete: "owner".to_string(),
            },
            BaseKind::AccessToken => ModelAuthConfig::all("deny"),
        }
    }
}

/// `hasMany` relation, the only kind the layer understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasMany {
    /// Relation name (e.g. `accessTokens`)
    pub name: String,
    /// Target model name
    pub model: String,
    /// Property on the target holding this model's id
    pub foreign_key: String,
}

/// Immutable description of a registered model
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    name: String,
    plural: String,
    base: BaseKind,
    properties: PropertySchema,
    hidden: Vec<String>,
    relations: Vec<HasMany>,
    auth: ModelAuthConfig,
}

impl ModelDefinition {
    /// Create a generic model definition
    ///
    /// The plural defaults to the lower-cased, pluralized name
    /// (`MyModel` → `mymodels`).
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_base(name, BaseKind::Generic)
    }

    /// Create a model extending the built-in `User` behaviour
    pub fn user(name: impl Into<String>) -> Self {
        Self::with_base(name, BaseKind::User)
    }

    /// Create a model extending the built-in `AccessToken` behaviour
    pub fn access_token(name: impl Into<String>) -> Self {
        Self::with_base(name, BaseKind::AccessToken)
    }

    pub fn with_base(name: impl Into<String>, base: BaseKind) -> Self {
        let name = name.into();
        Self {
            plural: Pluralizer::route_segment(&name),
            name,
            base,
            properties: base.base_properties(),
            hidden: base
                .hidden_properties()
                .iter()
                .map(|p| p.to_string())
                .collect(),
            relations: Vec::new(),
            auth: base.default_auth(),
        }
    }

    /// Declare or override a property
    pub fn property(mut self, name: impl Into<String>, def: PropertyDef) -> Self {
        self.properties.insert(name.into(), def);
        self
    }

    /// Override the URL plural
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Hide a property from responses
    pub fn hidden(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.hidden.contains(&name) {
            self.hidden.push(name);
        }
        self
    }

    /// Declare a `hasMany` relation
    pub fn has_many(
        mut self,
        name: impl Into<String>,
        model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relations.push(HasMany {
            name: name.into(),
            model: model.into(),
            foreign_key: foreign_key.into(),
        });
        self
    }

    /// Replace the per-operation auth policies
    pub fn auth(mut self, auth: ModelAuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plural_name(&self) -> &str {
        &self.plural
    }

    pub fn base(&self) -> BaseKind {
        self.base
    }

    pub fn properties(&self) -> &PropertySchema {
        &self.properties
    }

    pub fn relations(&self) -> &[HasMany] {
        &self.relations
    }

    pub fn auth_config(&self) -> &ModelAuthConfig {
        &self.auth
    }

    pub fn is_hidden(&self, property: &str) -> bool {
        self.hidden.iter().any(|h| h == property)
    }

    /// Render an instance as JSON, leaving hidden properties out
    pub fn present(&self, instance: &ModelInstance) -> Value {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(instance.id.clone()));
        for (key, value) in &instance.fields {
            if !self.is_hidden(key) {
                map.insert(key.clone(), value.clone());
            }
        }
        Value::Object(map)
    }
}

/// A stored instance of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInstance {
    pub id: String,
    #[serde(flatten)]
    pub fields: IndexMap<String, Value>,
}

impl ModelInstance {
    pub fn new(id: impl Into<String>, fields: IndexMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        if field == "id" {
            return None;
        }
        self.fields.get(field)
    }

    /// Get a field as a string, accepting numbers as well
    pub fn get_str(&self, field: &str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Whether a field equals the given JSON value; `id` compares as a string
    pub fn field_matches(&self, field: &str, expected: &Value) -> bool {
        if field == "id" {
            return value_as_id(expected).is_some_and(|id| id == self.id);
        }
        match (self.fields.get(field), expected) {
            (Some(actual), expected) if actual == expected => true,
            (Some(Value::Number(a)), Value::String(b)) => a.to_string() == *b,
            (Some(Value::String(a)), Value::Number(b)) => *a == b.to_string(),
            (None, Value::Null) => true,
            _ => false,
        }
    }
}

/// Interpret a JSON value as a model id
pub fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_plural_is_lowercase() {
        let def = ModelDefinition::new("MyModel");
        assert_eq!(def.plural_name(), "mymodels");
        assert_eq!(ModelDefinition::user("user").plural_name(), "users");
        assert_eq!(
            ModelDefinition::access_token("accessToken").plural_name(),
            "accesstokens"
        );
    }

    #[test]
    fn test_user_base_contract() {
        let def = ModelDefinition::user("user");
        assert!(def.properties()["email"].required);
        assert!(def.properties()["password"].required);
        assert!(def.is_hidden("password"));
        assert_eq!(def.auth_config().list, "deny");
    }

    #[test]
    fn test_declared_property_overrides_base() {
        let def = ModelDefinition::user("user")
            .property("email", PropertyDef::optional(PropertyType::String));
        assert!(!def.properties()["email"].required);
    }

    #[test]
    fn test_present_strips_hidden() {
        let def = ModelDefinition::user("user");
        let mut fields = IndexMap::new();
        fields.insert("email".to_string(), json!("a@b.io"));
        fields.insert("password".to_string(), json!("$argon2id$..."));
        let body = def.present(&ModelInstance::new("7", fields));
        assert_eq!(body, json!({"id": "7", "email": "a@b.io"}));
    }

    #[test]
    fn test_field_matches_coerces_ids() {
        let mut fields = IndexMap::new();
        fields.insert("userId".to_string(), json!("3"));
        let inst = ModelInstance::new("9", fields);
        assert!(inst.field_matches("userId", &json!(3)));
        assert!(inst.field_matches("id", &json!(9)));
        assert!(!inst.field_matches("userId", &json!("4")));
        assert!(inst.field_matches("missing", &Value::Null));
    }
}
