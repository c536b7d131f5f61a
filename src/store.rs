//! Durable key-value store seam (spec.md §6 "External collaborators").
//!
//! Grounded on the teacher's `ObjectStorage` trait (`object_storage/mod.rs`
//! in the pack, used as an injected collaborator behind an `async_trait`)
//! for the "thin async trait over an external system, errors mapped into
//! the crate's own error enum" shape.

use async_trait::async_trait;

use crate::errors::CoreError;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CoreError>;
    async fn delete(&self, key: &str) -> Result<(), CoreError>;
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CoreError>;
}

/// Test double and reference implementation; not meant for production use
/// (no persistence across restarts, spec.md Non-goals).
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: tokio::sync::Mutex<std::collections::BTreeMap<String, Vec<u8>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        InMemoryKvStore::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), CoreError> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        Ok(self.entries.lock().await.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_roundtrips() {
        let store = InMemoryKvStore::new();
        store.put("groups/app1", b"payload".to_vec()).await.unwrap();
        let value = store.get("groups/app1").await.unwrap();
        assert_eq!(value, Some(b"payload".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_removes_key() {
        let store = InMemoryKvStore::new();
        store.put("k", b"v".to_vec()).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_keys_filters_by_prefix() {
        let store = InMemoryKvStore::new();
        store.put("groups/a", vec![]).await.unwrap();
        store.put("tasks/a", vec![]).await.unwrap();
        let keys = store.list_keys("groups/").await.unwrap();
        assert_eq!(keys, vec!["groups/a".to_string()]);
    }
}
