//! Content entity repository
//!
//! Stands in for the full subjects/clusters/variants/answers CRUD
//! application. Handlers call through this trait to create, read, and
//! delete the entities they generate; the HTTP surface over those
//! entities is out of scope here, so only the in-memory implementation
//! exists.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("entity not found: {entity_type}/{entity_id}")]
    NotFound { entity_type: String, entity_id: String },
}

/// Minimal surface the bundled handlers need against content entities.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn create_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
    ) -> Result<(), ContentError>;

    async fn get_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<serde_json::Value>, ContentError>;

    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool, ContentError>;
}

/// In-memory [`ContentRepository`] backing the bundled `generate_clusters`
/// handler and integration tests.
#[derive(Default)]
pub struct InMemoryContentRepository {
    entities: RwLock<HashMap<(String, String), serde_json::Value>>,
}

impl InMemoryContentRepository {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ContentRepository for InMemoryContentRepository {
    async fn create_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
    ) -> Result<(), ContentError> {
        self.entities
            .write()
            .insert((entity_type.to_string(), entity_id.to_string()), data);
        Ok(())
    }

    async fn get_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<serde_json::Value>, ContentError> {
        Ok(self
            .entities
            .read()
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned())
    }

    async fn delete_entity(&self, entity_type: &str, entity_id: &str) -> Result<bool, ContentError> {
        Ok(self
            .entities
            .write()
            .remove(&(entity_type.to_string(), entity_id.to_string()))
            .is_some())
    }
}
