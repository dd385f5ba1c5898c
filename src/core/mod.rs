//! Core module containing the model, store, negotiation and auth primitives

pub mod auth;
pub mod error;
pub mod field;
pub mod model;
pub mod negotiation;
pub mod pluralize;
pub mod query;
pub mod remote;
pub mod store;
pub mod token;

pub use auth::{AuthContext, AuthPolicy, ModelAuthConfig, Operation};
pub use error::{RestError, RestResult, ValidationError};
pub use field::{FieldFormat, PropertyDef, PropertySchema, PropertyType};
pub use model::{BaseKind, HasMany, ModelDefinition, ModelInstance};
pub use negotiation::{ContentNegotiator, MediaType};
pub use pluralize::Pluralizer;
pub use query::{Filter, QueryParams};
pub use remote::{ParamBinding, RemoteArgs, RemoteMethod, Returns, Verb};
pub use store::{InsertOutcome, ModelStore};
pub use token::{AccessToken, AuthTokenService, Credentials, TokenSettings};
