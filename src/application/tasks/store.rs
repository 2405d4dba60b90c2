use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::infra::kv::{self, KvStore, StoreError};

use super::types::TaskRecord;

const KEY_PREFIX: &str = "task:";

/// Task records in the shared store. Every write refreshes the result horizon.
#[derive(Clone)]
pub struct TaskStore {
    store: Arc<dyn KvStore>,
    horizon: Duration,
}

impl TaskStore {
    pub fn new(store: Arc<dyn KvStore>, horizon: Duration) -> Self {
        Self { store, horizon }
    }

    fn key(id: Uuid) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    pub async fn save(&self, record: &TaskRecord) -> Result<(), StoreError> {
        kv::set_json(
            self.store.as_ref(),
            &Self::key(record.id),
            record,
            Some(self.horizon),
        )
        .await
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        kv::get_json(self.store.as_ref(), &Self::key(id)).await
    }
}
