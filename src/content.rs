//! Accepted content persistence
//!
//! The [`ContentStore`] capability receives validated records. Writes are
//! idempotent per spec key: a second write for the same key is rejected with
//! [`StoreWriteError::Duplicate`] and never overwrites the first.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::error::{to_storage_data, to_storage_io, StorageError, StoreWriteError};
use crate::resolver::{CombinationId, SpecKey};

const TREE_CONTENT: &str = "content";

/// A validated exercise as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedContent {
    pub spec_key: SpecKey,
    pub combination_id: CombinationId,
    pub variation: u32,
    pub exercise_type: String,
    pub schema_version: u32,
    pub fields: BTreeMap<String, serde_json::Value>,
    pub quality_score: f64,
    pub low_diversity: bool,
    pub attempts: u32,
    pub accepted_at_ms: u64,
}

impl AcceptedContent {
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Durably store a record. Must reject a second write for the same spec key.
    async fn write(&self, record: &AcceptedContent) -> Result<(), StoreWriteError>;

    /// Everything accepted so far for one combination, in variation order.
    async fn accepted_for(
        &self,
        combination: &CombinationId,
    ) -> Result<Vec<AcceptedContent>, StoreWriteError>;

    async fn get(&self, key: &SpecKey) -> Result<Option<AcceptedContent>, StoreWriteError>;

    /// Drop the record for `key` so the spec can be generated again.
    /// Returns whether a record was present.
    async fn remove(&self, key: &SpecKey) -> Result<bool, StoreWriteError>;
}

#[derive(Clone)]
pub struct SledContentStore {
    content: Tree,
}

impl SledContentStore {
    pub fn new(db: &Db) -> Result<Self, StorageError> {
        let content = db.open_tree(TREE_CONTENT).map_err(to_storage_io)?;
        Ok(Self { content })
    }

    pub fn shared(db: &Db) -> Result<Arc<Self>, StorageError> {
        Ok(Arc::new(Self::new(db)?))
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    fn decode(raw: &[u8]) -> Result<AcceptedContent, StoreWriteError> {
        serde_json::from_slice(raw)
            .map_err(|e| StoreWriteError::Unavailable(to_storage_data(e).to_string()))
    }
}

fn unavailable(err: sled::Error) -> StoreWriteError {
    StoreWriteError::Unavailable(to_storage_io(err).to_string())
}

#[async_trait]
impl ContentStore for SledContentStore {
    async fn write(&self, record: &AcceptedContent) -> Result<(), StoreWriteError> {
        let value = serde_json::to_vec(record)
            .map_err(|e| StoreWriteError::Unavailable(to_storage_data(e).to_string()))?;
        let swapped = self
            .content
            .compare_and_swap(
                record.spec_key.as_bytes(),
                None as Option<&[u8]>,
                Some(value),
            )
            .map_err(unavailable)?;
        if swapped.is_err() {
            return Err(StoreWriteError::Duplicate(record.spec_key.to_string()));
        }
        self.content.flush_async().await.map_err(unavailable)?;
        Ok(())
    }

    async fn accepted_for(
        &self,
        combination: &CombinationId,
    ) -> Result<Vec<AcceptedContent>, StoreWriteError> {
        let prefix = format!("{}#", combination);
        let mut out = Vec::new();
        for result in self.content.scan_prefix(prefix.as_bytes()) {
            let (_, value) = result.map_err(unavailable)?;
            out.push(Self::decode(&value)?);
        }
        out.sort_by_key(|c| c.variation);
        Ok(out)
    }

    async fn get(&self, key: &SpecKey) -> Result<Option<AcceptedContent>, StoreWriteError> {
        match self.content.get(key.as_bytes()).map_err(unavailable)? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &SpecKey) -> Result<bool, StoreWriteError> {
        let removed = self.content.remove(key.as_bytes()).map_err(unavailable)?;
        self.content.flush_async().await.map_err(unavailable)?;
        Ok(removed.is_some())
    }
}
