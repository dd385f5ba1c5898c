//! In-memory implementation of ModelStore for testing and development

use crate::core::model::ModelInstance;
use crate::core::query::Filter;
use crate::core::store::{InsertOutcome, ModelStore};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct StoreState {
    rows: IndexMap<String, IndexMap<String, Value>>,
    next_id: u64,
}

impl StoreState {
    /// Next numeric id not already used by an explicit insert
    fn generate_id(&mut self) -> String {
        loop {
            self.next_id += 1;
            let candidate = self.next_id.to_string();
            if !self.rows.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

/// In-memory model store
///
/// Ids are generated as `"1"`, `"2"`, ... under the write lock, so
/// concurrent inserts never share an id. Uses RwLock for thread-safe access.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for InMemoryStore {
    async fn insert(
        &self,
        id: Option<String>,
        fields: IndexMap<String, Value>,
    ) -> Result<InsertOutcome> {
        let mut state = self
            .state
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let id = match id {
            Some(id) if state.rows.contains_key(&id) => return Ok(InsertOutcome::IdTaken(id)),
            Some(id) => id,
            None => state.generate_id(),
        };

        state.rows.insert(id.clone(), fields.clone());

        Ok(InsertOutcome::Created(ModelInstance::new(id, fields)))
    }

    async fn get(&self, id: &str) -> Result<Option<ModelInstance>> {
        let state = self
            .state
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(state
            .rows
            .get(id)
            .map(|fields| ModelInstance::new(id, fields.clone())))
    }

    async fn list(&self) -> Result<Vec<ModelInstance>> {
        let state = self
            .state
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(state
            .rows
            .iter()
            .map(|(id, fields)| ModelInstance::new(id.clone(), fields.clone()))
            .collect())
    }

    async fn patch(
        &self,
        id: &str,
        fields: IndexMap<String, Value>,
    ) -> Result<Option<ModelInstance>> {
        let mut state = self
            .state
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let Some(row) = state.rows.get_mut(id) else {
            return Ok(None);
        };

        for (key, value) in fields {
            row.insert(key, value);
        }

        Ok(Some(ModelInstance::new(id, row.clone())))
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self
            .state
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        Ok(state.rows.shift_remove(id).is_some())
    }

    async fn remove_where(&self, filter: &Filter) -> Result<usize> {
        let mut state = self
            .state
            .write()
            .map_err(|e| anyhow!("Failed to acquire write lock: {}", e))?;

        let before = state.rows.len();
        state.rows.retain(|id, fields| {
            !filter.matches(&ModelInstance::new(id.clone(), fields.clone()))
        });

        Ok(before - state.rows.len())
    }

    async fn contains(&self, id: &str) -> Result<bool> {
        let state = self
            .state
            .read()
            .map_err(|e| anyhow!("Failed to acquire read lock: {}", e))?;

        Ok(state.rows.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(name: &str) -> IndexMap<String, Value> {
        let mut fields = IndexMap::new();
        fields.insert("name".to_string(), json!(name));
        fields
    }

    fn created(outcome: InsertOutcome) -> ModelInstance {
        match outcome {
            InsertOutcome::Created(instance) => instance,
            InsertOutcome::IdTaken(id) => panic!("id {} unexpectedly taken", id),
        }
    }

    #[tokio::test]
    async fn test_insert_generates_sequential_ids() {
        let store = InMemoryStore::new();
        let a = created(store.insert(None, fields("a")).await.unwrap());
        let b = created(store.insert(None, fields("b")).await.unwrap());
        assert_eq!(a.id, "1");
        assert_eq!(b.id, "2");
    }

    #[tokio::test]
    async fn test_explicit_id_is_honoured_and_skipped_by_generator() {
        let store = InMemoryStore::new();
        created(store.insert(Some("1".into()), fields("x")).await.unwrap());
        let next = created(store.insert(None, fields("y")).await.unwrap());
        assert_eq!(next.id, "2");

        let dup = store.insert(Some("1".into()), fields("z")).await.unwrap();
        assert_eq!(dup, InsertOutcome::IdTaken("1".into()));
    }

    #[tokio::test]
    async fn test_get_and_contains() {
        let store = InMemoryStore::new();
        let a = created(store.insert(None, fields("a")).await.unwrap());

        assert_eq!(store.get(&a.id).await.unwrap(), Some(a.clone()));
        assert!(store.contains(&a.id).await.unwrap());
        assert!(store.get("999").await.unwrap().is_none());
        assert!(!store.contains("999").await.unwrap());
    }

    #[tokio::test]
    async fn test_patch_merges_fields() {
        let store = InMemoryStore::new();
        let a = created(store.insert(None, fields("a")).await.unwrap());

        let mut patch = IndexMap::new();
        patch.insert("extra".to_string(), json!(true));
        let updated = store.patch(&a.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.fields["name"], json!("a"));
        assert_eq!(updated.fields["extra"], json!(true));

        assert!(store.patch("404", IndexMap::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryStore::new();
        let a = created(store.insert(None, fields("a")).await.unwrap());
        assert!(store.remove(&a.id).await.unwrap());
        assert!(!store.remove(&a.id).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_where_and_count() {
        let store = InMemoryStore::new();
        for name in ["a", "b", "a"] {
            store.insert(None, fields(name)).await.unwrap();
        }
        let only_a = Filter::parse(r#"{"where":{"name":"a"}}"#).unwrap();
        assert_eq!(store.count(&only_a).await.unwrap(), 2);
        assert_eq!(store.remove_where(&only_a).await.unwrap(), 2);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_unique_ids() {
        let store = InMemoryStore::new();
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                created(store.insert(None, fields(&i.to_string())).await.unwrap()).id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
    }
}
