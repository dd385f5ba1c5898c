//! Access tokens and the service issuing them
//!
//! Tokens are opaque 64-character hex ids stored as instances of the
//! AccessToken model. A token is `Issued → Valid → (Expired | Revoked)`;
//! expiry is checked lazily when the token is presented.

use crate::core::error::{RestError, RestResult};
use crate::core::model::ModelInstance;
use crate::core::query::Filter;
use crate::core::store::{InsertOutcome, ModelStore};
use anyhow::anyhow;
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use indexmap::IndexMap;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Two weeks
pub const DEFAULT_TTL_SECONDS: i64 = 1_209_600;

/// One year
pub const MAX_TTL_SECONDS: i64 = 31_556_926;

/// An issued access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub id: String,
    pub user_id: String,
    pub created: DateTime<Utc>,
    /// Lifetime in seconds; `None` or negative never expires
    pub ttl: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Create a fresh token for a user
    pub fn issue(user_id: impl Into<String>, ttl: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_token_id(),
            user_id: user_id.into(),
            created: now,
            ttl: Some(ttl),
            last_used: None,
        }
    }

    /// Read a token back from its stored instance
    ///
    /// Returns `None` when the record lacks a user id or creation date.
    pub fn from_instance(instance: &ModelInstance) -> Option<Self> {
        Some(Self {
            id: instance.id.clone(),
            user_id: instance.get_str("userId")?,
            created: instance.get("created").and_then(parse_timestamp)?,
            ttl: instance.get("ttl").and_then(Value::as_i64),
            last_used: instance.get("lastUsed").and_then(parse_timestamp),
        })
    }

    /// Fields persisted in the token store (the id is the record key)
    pub fn to_fields(&self) -> IndexMap<String, Value> {
        let mut fields = IndexMap::new();
        fields.insert("userId".to_string(), json!(self.user_id));
        fields.insert("created".to_string(), json!(format_timestamp(&self.created)));
        if let Some(ttl) = self.ttl {
            fields.insert("ttl".to_string(), json!(ttl));
        }
        if let Some(last_used) = &self.last_used {
            fields.insert("lastUsed".to_string(), json!(format_timestamp(last_used)));
        }
        fields
    }

    /// When the token stops being valid
    ///
    /// With sliding expiration the window starts at the last use instead of
    /// the creation date.
    pub fn expires_at(&self, sliding: bool) -> Option<DateTime<Utc>> {
        let ttl = self.ttl.filter(|ttl| *ttl >= 0)?;
        let start = if sliding {
            self.last_used.unwrap_or(self.created)
        } else {
            self.created
        };
        TimeDelta::try_seconds(ttl).and_then(|delta| start.checked_add_signed(delta))
    }

    pub fn is_expired(&self, now: DateTime<Utc>, sliding: bool) -> bool {
        self.expires_at(sliding).is_some_and(|at| now >= at)
    }
}

fn generate_token_id() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|at| at.with_timezone(&Utc))
}

/// Login payload
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    /// Requested lifetime, capped by the configured maximum
    #[serde(default)]
    pub ttl: Option<i64>,
}

/// Lifetime policy of issued tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSettings {
    pub default_ttl: i64,
    pub max_ttl: i64,
    pub sliding_expiration: bool,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECONDS,
            max_ttl: MAX_TTL_SECONDS,
            sliding_expiration: false,
        }
    }
}

impl TokenSettings {
    /// Lifetime granted for a requested ttl
    pub fn resolve_ttl(&self, requested: Option<i64>) -> i64 {
        match requested {
            Some(ttl) if ttl > 0 => ttl.min(self.max_ttl),
            _ => self.default_ttl,
        }
    }
}

/// Hash a password into an Argon2 PHC string on the blocking pool
pub async fn hash_password(password: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
        Ok(hash.to_string())
    })
    .await
    .map_err(|e| anyhow!("Password hashing task failed: {}", e))?
}

/// Check a password against a stored PHC string on the blocking pool
///
/// A stored value that is not a valid PHC string never verifies.
pub async fn verify_password(password: String, stored: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || {
        let Ok(hash) = PasswordHash::new(&stored) else {
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok()
    })
    .await
    .map_err(|e| anyhow!("Password verification task failed: {}", e))
}

/// Issues, validates and revokes access tokens
///
/// Works directly on the stores of the User model and its AccessToken model.
#[derive(Clone)]
pub struct AuthTokenService {
    user_model: String,
    users: Arc<dyn ModelStore>,
    tokens: Arc<dyn ModelStore>,
    settings: TokenSettings,
}

impl AuthTokenService {
    pub fn new(
        user_model: impl Into<String>,
        users: Arc<dyn ModelStore>,
        tokens: Arc<dyn ModelStore>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            user_model: user_model.into(),
            users,
            tokens,
            settings,
        }
    }

    /// Name of the User model whose tokens this service handles
    pub fn user_model(&self) -> &str {
        &self.user_model
    }

    /// Authenticate a user by email and password and issue a token
    pub async fn login(&self, credentials: Credentials) -> RestResult<AccessToken> {
        let mut by_email = Map::new();
        by_email.insert("email".to_string(), json!(credentials.email));
        let user = self
            .users
            .find(&Filter::matching(by_email))
            .await?
            .into_iter()
            .next();

        let Some(user) = user else {
            tracing::debug!(email = %credentials.email, "login for unknown email");
            return Err(login_failed());
        };

        let Some(stored) = user.get_str("password") else {
            return Err(login_failed());
        };

        if !verify_password(credentials.password, stored).await? {
            tracing::debug!(user_id = %user.id, "login with wrong password");
            return Err(login_failed());
        }

        let ttl = self.settings.resolve_ttl(credentials.ttl);
        let token = AccessToken::issue(user.id.clone(), ttl, Utc::now());

        match self
            .tokens
            .insert(Some(token.id.clone()), token.to_fields())
            .await?
        {
            InsertOutcome::Created(_) => {}
            InsertOutcome::IdTaken(_) => {
                return Err(RestError::Internal("token id collision".to_string()));
            }
        }

        tracing::info!(user_id = %user.id, ttl, "issued access token");
        Ok(token)
    }

    /// Resolve a presented token id into the token and its user
    ///
    /// Missing, malformed, expired and orphaned tokens are all rejected with
    /// [`RestError::Unauthenticated`]; expired ones are deleted on sight.
    pub async fn validate(&self, token_id: &str) -> RestResult<(AccessToken, ModelInstance)> {
        let Some(record) = self.tokens.get(token_id).await? else {
            return Err(RestError::Unauthenticated);
        };

        let Some(mut token) = AccessToken::from_instance(&record) else {
            tracing::warn!(token_id, "discarding malformed access token record");
            return Err(RestError::Unauthenticated);
        };

        let now = Utc::now();
        if token.is_expired(now, self.settings.sliding_expiration) {
            self.tokens.remove(token_id).await?;
            tracing::debug!(user_id = %token.user_id, "removed expired access token");
            return Err(RestError::Unauthenticated);
        }

        let Some(user) = self.users.get(&token.user_id).await? else {
            self.tokens.remove(token_id).await?;
            return Err(RestError::Unauthenticated);
        };

        let mut touched = IndexMap::new();
        touched.insert("lastUsed".to_string(), json!(format_timestamp(&now)));
        self.tokens.patch(token_id, touched).await?;
        token.last_used = Some(now);

        Ok((token, user))
    }

    /// Revoke a token; revoking an unknown token is not an error
    pub async fn logout(&self, token_id: &str) -> RestResult<()> {
        if self.tokens.remove(token_id).await? {
            tracing::info!("revoked access token");
        }
        Ok(())
    }

    /// Revoke every token of a user
    pub async fn revoke_user_tokens(&self, user_id: &str) -> RestResult<usize> {
        let mut by_user = Map::new();
        by_user.insert("userId".to_string(), json!(user_id));
        Ok(self.tokens.remove_where(&Filter::matching(by_user)).await?)
    }
}

fn login_failed() -> RestError {
    RestError::Authentication {
        message: "invalid email or password".to_string(),
    }
}
