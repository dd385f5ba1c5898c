//! Authorization primitives
//!
//! Provides the request-level auth context attached by the REST layer and
//! the policies a model (or remote method) can require per operation.

use crate::core::model::{BaseKind, ModelDefinition, ModelInstance};
use crate::core::token::AccessToken;
use serde::{Deserialize, Serialize};

/// Authorization context attached to a request
#[derive(Debug, Clone, Default)]
pub enum AuthContext {
    /// A valid access token was presented
    Token {
        token: AccessToken,
        user: ModelInstance,
        /// User model the token was issued for
        user_model: String,
    },

    /// No (valid) token, or auth is disabled
    #[default]
    Anonymous,
}

impl AuthContext {
    /// Get the access token if one was attached
    pub fn access_token(&self) -> Option<&AccessToken> {
        match self {
            AuthContext::Token { token, .. } => Some(token),
            AuthContext::Anonymous => None,
        }
    }

    /// Get the authenticated user id if available
    pub fn user_id(&self) -> Option<&str> {
        self.access_token().map(|t| t.user_id.as_str())
    }

    pub fn user_model(&self) -> Option<&str> {
        match self {
            AuthContext::Token { user_model, .. } => Some(user_model),
            AuthContext::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthContext::Token { .. })
    }
}

/// Operation a policy is checked for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Get => "get",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

/// Authorization policy for an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Public access (no auth required)
    Public,

    /// Any authenticated user
    Authenticated,

    /// The user owning the target instance
    Owner,

    /// Nobody over REST
    Deny,

    /// Any of the policies (OR)
    Or(Vec<AuthPolicy>),
}

impl AuthPolicy {
    /// Parse policy from string (for YAML config)
    ///
    /// Alternatives are separated by `|`, e.g. `owner|authenticated`.
    /// Unknown names fall back to `Authenticated`.
    pub fn parse_policy(s: &str) -> Self {
        if s.contains('|') {
            return AuthPolicy::Or(s.split('|').map(|p| Self::parse_policy(p.trim())).collect());
        }

        match s {
            "public" => AuthPolicy::Public,
            "authenticated" => AuthPolicy::Authenticated,
            "owner" => AuthPolicy::Owner,
            "deny" => AuthPolicy::Deny,
            _ => AuthPolicy::Authenticated,
        }
    }

    /// Check a context against this policy
    ///
    /// `target` is the instance the operation applies to, when there is one.
    pub fn check(
        &self,
        context: &AuthContext,
        model: &ModelDefinition,
        target: Option<&ModelInstance>,
    ) -> bool {
        match self {
            AuthPolicy::Public => true,
            AuthPolicy::Authenticated => context.is_authenticated(),
            AuthPolicy::Owner => match target {
                Some(instance) => is_owner(context, model, instance),
                None => false,
            },
            AuthPolicy::Deny => false,
            AuthPolicy::Or(policies) => policies.iter().any(|p| p.check(context, model, target)),
        }
    }
}

/// A user owns their own instance of the User model they logged in
/// through, or any instance whose `userId`/`ownerId` property points at them.
fn is_owner(context: &AuthContext, model: &ModelDefinition, instance: &ModelInstance) -> bool {
    let Some(user_id) = context.user_id() else {
        return false;
    };
    if model.base() == BaseKind::User {
        return context.user_model() == Some(model.name()) && instance.id == user_id;
    }

    ["userId", "ownerId"]
        .iter()
        .any(|field| instance.get_str(field).as_deref() == Some(user_id))
}

/// Per-operation policies of a model, as policy strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAuthConfig {
    #[serde(default = "default_policy")]
    pub list: String,
    #[serde(default = "default_policy")]
    pub get: String,
    #[serde(default = "default_policy")]
    pub create: String,
    #[serde(default = "default_policy")]
    pub update: String,
    #[serde(default = "default_policy")]
    pub delete: String,
}

fn default_policy() -> String {
    "public".to_string()
}

impl Default for ModelAuthConfig {
    fn default() -> Self {
        Self::all("public")
    }
}

impl ModelAuthConfig {
    /// Same policy for every operation
    pub fn all(policy: &str) -> Self {
        Self {
            list: policy.to_string(),
            get: policy.to_string(),
            create: policy.to_string(),
            update: policy.to_string(),
            delete: policy.to_string(),
        }
    }

    pub fn policy_for(&self, operation: Operation) -> AuthPolicy {
        let raw = match operation {
            Operation::List => &self.list,
            Operation::Get => &self.get,
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        };
        AuthPolicy::parse_policy(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use indexmap::IndexMap;
    use serde_json::json;

    fn token_context(user_id: &str) -> AuthContext {
        AuthContext::Token {
            token: AccessToken {
                id: "t".repeat(64),
                user_id: user_id.to_string(),
                created: Utc::now(),
                ttl: Some(60),
                last_used: None,
            },
            user: ModelInstance::new(user_id, IndexMap::new()),
            user_model: "user".to_string(),
        }
    }

    fn owned_by(user_id: &str) -> ModelInstance {
        let mut fields = IndexMap::new();
        fields.insert("ownerId".to_string(), json!(user_id));
        ModelInstance::new("10", fields)
    }

    #[test]
    fn test_parse_policy() {
        assert_eq!(AuthPolicy::parse_policy("public"), AuthPolicy::Public);
        assert_eq!(AuthPolicy::parse_policy("deny"), AuthPolicy::Deny);
        assert_eq!(
            AuthPolicy::parse_policy("something_unknown"),
            AuthPolicy::Authenticated
        );
        assert_eq!(
            AuthPolicy::parse_policy("owner | public"),
            AuthPolicy::Or(vec![AuthPolicy::Owner, AuthPolicy::Public])
        );
    }

    #[test]
    fn test_anonymous_only_passes_public() {
        let model = ModelDefinition::new("Note");
        let anon = AuthContext::Anonymous;
        assert!(AuthPolicy::Public.check(&anon, &model, None));
        assert!(!AuthPolicy::Authenticated.check(&anon, &model, None));
        assert!(!AuthPolicy::Owner.check(&anon, &model, Some(&owned_by("1"))));
        assert!(!AuthPolicy::Deny.check(&anon, &model, None));
    }

    #[test]
    fn test_owner_of_user_instance_is_same_id() {
        let model = ModelDefinition::user("user");
        let ctx = token_context("5");
        let me = ModelInstance::new("5", IndexMap::new());
        let other = ModelInstance::new("6", IndexMap::new());
        assert!(AuthPolicy::Owner.check(&ctx, &model, Some(&me)));
        assert!(!AuthPolicy::Owner.check(&ctx, &model, Some(&other)));

        // same id in another User model belongs to someone else
        let admins = ModelDefinition::user("admin");
        assert!(!AuthPolicy::Owner.check(&ctx, &admins, Some(&me)));
    }

    #[test]
    fn test_owner_of_generic_instance_uses_owner_fields() {
        let model = ModelDefinition::new("Note");
        let ctx = token_context("1");
        assert!(AuthPolicy::Owner.check(&ctx, &model, Some(&owned_by("1"))));
        assert!(!AuthPolicy::Owner.check(&ctx, &model, Some(&owned_by("2"))));
        assert!(!AuthPolicy::Owner.check(&ctx, &model, None));
    }

    #[test]
    fn test_model_auth_config_yaml_defaults() {
        let config: ModelAuthConfig = serde_yaml::from_str("list: deny").unwrap();
        assert_eq!(config.policy_for(Operation::List), AuthPolicy::Deny);
        assert_eq!(config.policy_for(Operation::Create), AuthPolicy::Public);
    }

    #[test]
    fn test_context_accessors() {
        let ctx = token_context("42");
        assert!(ctx.is_authenticated());
        assert_eq!(ctx.user_id(), Some("42"));
        assert!(AuthContext::Anonymous.access_token().is_none());
    }
}
