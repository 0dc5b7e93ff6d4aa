//! Cursor kept as a JSON object in the staging bucket

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{info, warn};

use super::CursorStore;
use crate::error::{Result, SyncError};
use crate::storage::ObjectStore;

pub struct JsonCursorStore<C> {
    store: Arc<dyn ObjectStore>,
    key: String,
    _cursor: PhantomData<fn() -> C>,
}

impl<C> JsonCursorStore<C> {
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            _cursor: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<C> CursorStore for JsonCursorStore<C>
where
    C: Serialize + DeserializeOwned + Ord + std::fmt::Debug + Send + Sync + 'static,
{
    type Cursor = C;

    async fn read(&self) -> Result<C> {
        match self.store.get(&self.key).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(SyncError::ObjectNotFound(_)) => Err(SyncError::CursorNotFound(self.key.clone())),
            Err(e) => Err(e),
        }
    }

    /// Write the cursor unless it would move backwards
    async fn advance(&self, cursor: C) -> Result<()> {
        match self.read().await {
            Ok(current) if cursor < current => {
                warn!(key = %self.key, ?current, proposed = ?cursor, "Refusing to move cursor backwards");
                return Ok(());
            },
            Ok(_) | Err(SyncError::CursorNotFound(_)) => {},
            Err(e) => return Err(e),
        }

        let body = serde_json::to_vec_pretty(&cursor)?;
        self.store.put(&self.key, body, "application/json").await?;
        info!(key = %self.key, ?cursor, "Cursor advanced");
        Ok(())
    }
}
