//! Configuration loading and management
//!
//! An application is configured programmatically or from YAML:
//!
//! ```yaml
//! server: { host: 127.0.0.1, port: 3000 }
//! rest:
//!   supported_types: [json, application/javascript]
//! auth:
//!   enabled: true
//! models:
//!   - name: MyModel
//!     properties:
//!       name: { type: string, required: true }
//! ```

use crate::core::auth::ModelAuthConfig;
use crate::core::field::PropertySchema;
use crate::core::model::{BaseKind, HasMany, ModelDefinition};
use crate::core::token::{DEFAULT_TTL_SECONDS, MAX_TTL_SECONDS, TokenSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rest: RestConfig,
    pub auth: AuthConfig,
    pub models: Vec<ModelConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).context("Invalid YAML configuration")?;
        Ok(config)
    }
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    /// `host:port` string suitable for binding
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// REST layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    /// Ordered response media types; `json` and `xml` are shorthands
    pub supported_types: Vec<String>,
    /// Answer cross-origin requests from any origin
    pub cors: bool,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            supported_types: vec!["json".to_string()],
            cors: false,
        }
    }
}

/// Token authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether tokens are parsed and policies enforced
    pub enabled: bool,
    /// Header carrying the token, either raw or as `Bearer <id>`
    pub header: String,
    pub ttl_seconds: i64,
    pub max_ttl_seconds: i64,
    /// Measure expiry from the last use instead of the creation date
    pub sliding_expiration: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header: "Authorization".to_string(),
            ttl_seconds: DEFAULT_TTL_SECONDS,
            max_ttl_seconds: MAX_TTL_SECONDS,
            sliding_expiration: false,
        }
    }
}

impl AuthConfig {
    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            default_ttl: self.ttl_seconds,
            max_ttl: self.max_ttl_seconds,
            sliding_expiration: self.sliding_expiration,
        }
    }
}

/// A model declared in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,

    #[serde(default)]
    pub base: BaseKind,

    /// URL segment; derived from the name when absent
    #[serde(default)]
    pub plural: Option<String>,

    #[serde(default)]
    pub properties: PropertySchema,

    #[serde(default)]
    pub hidden: Vec<String>,

    #[serde(default)]
    pub relations: Vec<HasMany>,

    /// Per-operation policies; the base kind's defaults when absent
    #[serde(default)]
    pub auth: Option<ModelAuthConfig>,
}

impl ModelConfig {
    /// Build the model definition this entry describes
    pub fn to_definition(&self) -> ModelDefinition {
        let mut def = ModelDefinition::with_base(self.name.clone(), self.base);

        if let Some(plural) = &self.plural {
            def = def.plural(plural.clone());
        }
        for (name, property) in &self.properties {
            def = def.property(name.clone(), property.clone());
        }
        for hidden in &self.hidden {
            def = def.hidden(hidden.clone());
        }
        for relation in &self.relations {
            def = def.has_many(
                relation.name.clone(),
                relation.model.clone(),
                relation.foreign_key.clone(),
            );
        }
        if let Some(auth) = &self.auth {
            def = def.auth(auth.clone());
        }
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::field::PropertyType;
    use std::io::Write;

    const SAMPLE: &str = r#"
server:
  port: 8080
rest:
  supported_types: [json, application/javascript, text/javascript]
auth:
  enabled: true
  ttl_seconds: 600
models:
  - name: MyModel
    properties:
      name: { type: string, required: true }
      rank: number
  - name: accessToken
    base: access_token
  - name: user
    base: user
    relations:
      - name: accessTokens
        model: accessToken
        foreign_key: userId
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.address(), "127.0.0.1:3000");
        assert_eq!(config.rest.supported_types, vec!["json"]);
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.header, "Authorization");
        assert_eq!(config.auth.ttl_seconds, 1_209_600);
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_from_yaml_str() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rest.supported_types.len(), 3);
        assert!(config.auth.enabled);
        assert_eq!(config.auth.token_settings().default_ttl, 600);
        assert_eq!(config.auth.token_settings().max_ttl, MAX_TTL_SECONDS);
        assert_eq!(config.models.len(), 3);
    }

    #[test]
    fn test_model_config_to_definition() {
        let config = AppConfig::from_yaml_str(SAMPLE).unwrap();

        let my_model = config.models[0].to_definition();
        assert_eq!(my_model.plural_name(), "mymodels");
        assert!(my_model.properties()["name"].required);
        assert_eq!(
            my_model.properties()["rank"].property_type,
            PropertyType::Number
        );

        let user = config.models[2].to_definition();
        assert_eq!(user.base(), BaseKind::User);
        assert!(user.is_hidden("password"));
        assert_eq!(user.relations()[0].model, "accessToken");
        assert_eq!(user.auth_config().get, "owner");
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.models[1].base, BaseKind::AccessToken);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(AppConfig::from_yaml_str("server: [not, a, map]").is_err());
        assert!(AppConfig::from_yaml_file("/definitely/missing.yaml").is_err());
    }
}
