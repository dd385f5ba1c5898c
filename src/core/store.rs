//! Store trait backing a model
//!
//! A store owns the instances of exactly one model. It knows nothing about
//! schemas or auth; validation happens in the model handle before any call
//! reaches the store.

use crate::core::model::ModelInstance;
use crate::core::query::Filter;
use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

/// Outcome of an insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(ModelInstance),
    /// The caller-provided id is already taken
    IdTaken(String),
}

/// Storage operations for the instances of one model
///
/// Implementations must be safe to call concurrently; in particular id
/// generation must never hand out the same id twice.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Persist a new instance
    ///
    /// If `id` is `None` the store generates a fresh one.
    async fn insert(&self, id: Option<String>, fields: IndexMap<String, Value>)
    -> Result<InsertOutcome>;

    /// Get an instance by id
    async fn get(&self, id: &str) -> Result<Option<ModelInstance>>;

    /// List all instances in insertion order
    async fn list(&self) -> Result<Vec<ModelInstance>>;

    /// Merge fields into an existing instance
    ///
    /// Returns `None` when the id does not exist.
    async fn patch(&self, id: &str, fields: IndexMap<String, Value>)
    -> Result<Option<ModelInstance>>;

    /// Remove an instance; returns whether it existed
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Remove every instance matching the filter; returns how many were removed
    async fn remove_where(&self, filter: &Filter) -> Result<usize>;

    /// Whether an instance exists
    async fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// List the instances selected by a filter
    async fn find(&self, filter: &Filter) -> Result<Vec<ModelInstance>> {
        Ok(filter.apply(self.list().await?))
    }

    /// Count the instances matching a filter's where clause
    async fn count(&self, filter: &Filter) -> Result<usize> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter(|i| filter.matches(i))
            .count())
    }
}
