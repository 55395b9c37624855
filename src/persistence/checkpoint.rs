//! Checkpoint Service
//!
//! Persists run state snapshots so an interrupted run can be inspected and
//! retried by hand. Checkpoints are written:
//! - After every pipeline stage
//! - When a run fails

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::traits::CheckpointStore;
use crate::error::{AugurError, Result};

/// Checkpoint envelope stored under a thread id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_type: String,
    pub thread_id: String,
    pub data: serde_json::Value,
    pub version: i32,
    pub created_at: DateTime<Utc>,
}

/// Trait for types that can be checkpointed
pub trait Checkpointable: Send + Sync {
    /// Get checkpoint type identifier
    fn checkpoint_type(&self) -> &str;

    /// Key the checkpoint is stored under
    fn thread_id(&self) -> &str;

    /// Serialize current state to JSON
    fn to_checkpoint(&self) -> serde_json::Value;

    /// Restore state from checkpoint
    fn from_checkpoint(&mut self, data: &serde_json::Value) -> std::result::Result<(), String>;

    /// Monotonic progress marker
    fn version(&self) -> i32;
}

/// Checkpoint service for managing state snapshots
#[derive(Clone)]
pub struct CheckpointService {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointService {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Create (or overwrite) the checkpoint for a component
    pub async fn create_checkpoint<T: Checkpointable>(&self, component: &T) -> Result<()> {
        let checkpoint = Checkpoint {
            checkpoint_type: component.checkpoint_type().to_string(),
            thread_id: component.thread_id().to_string(),
            data: component.to_checkpoint(),
            version: component.version(),
            created_at: Utc::now(),
        };

        self.store
            .put(&checkpoint.thread_id, serde_json::to_value(&checkpoint)?)
            .await?;

        debug!(
            "Checkpointed {}/{} (version {})",
            checkpoint.checkpoint_type, checkpoint.thread_id, checkpoint.version
        );
        Ok(())
    }

    /// Load the raw checkpoint envelope for a thread
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        match self.store.get(thread_id).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Restore a component from its checkpoint. Returns the restored version.
    pub async fn restore_checkpoint<T: Checkpointable>(
        &self,
        component: &mut T,
    ) -> Result<Option<i32>> {
        let thread_id = component.thread_id().to_string();
        let checkpoint_type = component.checkpoint_type().to_string();

        let Some(checkpoint) = self.load(&thread_id).await? else {
            debug!("No checkpoint found for {}/{}", checkpoint_type, thread_id);
            return Ok(None);
        };

        if checkpoint.checkpoint_type != checkpoint_type {
            return Err(AugurError::Internal(format!(
                "checkpoint {} has type {}, expected {}",
                thread_id, checkpoint.checkpoint_type, checkpoint_type
            )));
        }

        match component.from_checkpoint(&checkpoint.data) {
            Ok(()) => {
                info!(
                    "Restored checkpoint for {}/{} (version {})",
                    checkpoint_type, thread_id, checkpoint.version
                );
                Ok(Some(checkpoint.version))
            }
            Err(e) => {
                error!(
                    "Failed to restore checkpoint for {}/{}: {}",
                    checkpoint_type, thread_id, e
                );
                Err(AugurError::Internal(format!(
                    "Checkpoint restore failed: {}",
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use crate::persistence::CheckpointStore;

    struct MockComponent {
        name: String,
        state: i32,
        version: i32,
    }

    impl Checkpointable for MockComponent {
        fn checkpoint_type(&self) -> &str {
            "mock"
        }

        fn thread_id(&self) -> &str {
            &self.name
        }

        fn to_checkpoint(&self) -> serde_json::Value {
            serde_json::json!({
                "state": self.state,
                "name": self.name
            })
        }

        fn from_checkpoint(&mut self, data: &serde_json::Value) -> std::result::Result<(), String> {
            self.state = data["state"].as_i64().ok_or("missing state")? as i32;
            Ok(())
        }

        fn version(&self) -> i32 {
            self.version
        }
    }

    #[tokio::test]
    async fn test_checkpoint_restore_cycle() {
        let service = CheckpointService::new(Arc::new(InMemoryStore::new()));
        let component = MockComponent {
            name: "thread-1".to_string(),
            state: 42,
            version: 3,
        };
        service.create_checkpoint(&component).await.unwrap();
        let envelope = service.load("thread-1").await.unwrap().unwrap();
        assert_eq!(envelope.checkpoint_type, "mock");
        assert_eq!(envelope.data["state"], 42);

        let mut fresh = MockComponent {
            name: "thread-1".to_string(),
            state: 0,
            version: 0,
        };
        let version = service.restore_checkpoint(&mut fresh).await.unwrap();
        assert_eq!(version, Some(3));
        assert_eq!(fresh.state, 42);
    }

    #[tokio::test]
    async fn test_restore_missing_checkpoint() {
        let service = CheckpointService::new(Arc::new(InMemoryStore::new()));
        let mut component = MockComponent {
            name: "nope".to_string(),
            state: 7,
            version: 0,
        };
        assert_eq!(service.restore_checkpoint(&mut component).await.unwrap(), None);
        assert_eq!(component.state, 7);
    }

    #[tokio::test]
    async fn test_restore_rejects_other_checkpoint_type() {
        let store = Arc::new(InMemoryStore::new());
        let service = CheckpointService::new(store.clone());
        store
            .put(
                "thread-2",
                serde_json::json!({
                    "checkpoint_type": "other",
                    "thread_id": "thread-2",
                    "data": {"state": 1},
                    "version": 1,
                    "created_at": Utc::now(),
                }),
            )
            .await
            .unwrap();

        let mut component = MockComponent {
            name: "thread-2".to_string(),
            state: 0,
            version: 0,
        };
        assert!(service.restore_checkpoint(&mut component).await.is_err());
        assert_eq!(component.state, 0);
    }
}
