use std::future::Future;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use stockroom_core::{BackendLabel, CacheKey, CacheStrategy, CacheValue, Raw};

use crate::{BackendError, DeleteStatus, format::JsonFormat};

/// Result of a store operation.
pub type BackendResult<T> = Result<T, BackendError>;

/// Raw byte storage for cache entries.
///
/// Stores own their entries: a value handed to [`write`](Backend::write)
/// replaces any previous value under the same key and is never mutated.
#[async_trait]
pub trait Backend: Sync + Send {
    /// The entry under `key`, expired or not. Stores may drop expired
    /// entries early but are not required to.
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>>;

    /// Stores `value` under `key`.
    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()>;

    /// Deletes the entry under `key`.
    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus>;

    /// Label used in logs and metrics.
    fn label(&self) -> BackendLabel {
        BackendLabel::new_static("backend")
    }
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheValue<Raw>>> {
        B::read(self, key).await
    }

    async fn write(&self, key: &CacheKey, value: CacheValue<Raw>) -> BackendResult<()> {
        B::write(self, key, value).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        B::remove(self, key).await
    }

    fn label(&self) -> BackendLabel {
        B::label(self)
    }
}

/// Typed access on top of [`Backend`], encoding values as JSON.
pub trait CacheBackend: Backend {
    /// Reads and decodes the entry under `key`.
    fn get<T>(&self, key: &CacheKey) -> impl Future<Output = BackendResult<Option<CacheValue<T>>>> + Send
    where
        T: DeserializeOwned + Send,
    {
        async move {
            let Some(value) = self.read(key).await? else {
                return Ok(None);
            };
            let data: T = JsonFormat.deserialize(value.data())?;
            Ok(Some(value.map(|_| data)))
        }
    }

    /// Encodes `value` and stores it with timestamps derived from `strategy`.
    fn set<T>(
        &self,
        key: &CacheKey,
        value: &T,
        strategy: &CacheStrategy,
    ) -> impl Future<Output = BackendResult<()>> + Send
    where
        T: Serialize,
    {
        let encoded = JsonFormat
            .serialize(value)
            .map(|raw| CacheValue::from_strategy(raw, strategy));
        async move { self.write(key, encoded?).await }
    }
}

impl<B: Backend + ?Sized> CacheBackend for B {}
