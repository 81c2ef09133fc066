//! The seam between composite operations and whatever document database backs
//! them.
//!
//! Operations only ever see a [`TxSession`]: a handle on one open transaction.
//! They never open, commit or abort transactions themselves; that is the job of
//! [`UnitOfWork`](super::UnitOfWork) driving a [`DocumentStore`].

use crate::core::{Result, StoreError};
use crate::storage::{Collection, Document};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// One open transaction. Reads observe the transaction's snapshot plus its own
/// staged writes.
#[async_trait]
pub trait TxSession: Send + Sync {
    fn transaction_id(&self) -> u64;

    async fn find_raw(&self, collection: Collection, id: &str) -> Result<Option<JsonValue>>;

    /// Returns every visible document of `collection` ordered by id.
    async fn scan_raw(&self, collection: Collection) -> Result<Vec<(String, JsonValue)>>;

    /// Fails with `DuplicateKey` when `id` is already visible.
    async fn insert_raw(&self, collection: Collection, id: &str, body: JsonValue) -> Result<()>;

    /// Whole-document replacement. Fails with `DocumentNotFound` when `id` is absent.
    async fn replace_raw(&self, collection: Collection, id: &str, body: JsonValue) -> Result<()>;

    async fn delete_raw(&self, collection: Collection, id: &str) -> Result<()>;
}

/// Typed helpers over [`TxSession`].
#[async_trait]
pub trait TxSessionExt: TxSession {
    async fn find<D: Document>(&self, id: &str) -> Result<Option<D>> {
        match self.find_raw(D::COLLECTION, id).await? {
            Some(body) => Ok(Some(serde_json::from_value(body)?)),
            None => Ok(None),
        }
    }

    async fn get<D: Document>(&self, id: &str) -> Result<D> {
        self.find::<D>(id)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound {
                collection: D::COLLECTION.to_string(),
                id: id.to_string(),
            })
    }

    async fn scan<D: Document>(&self) -> Result<Vec<D>> {
        let rows = self.scan_raw(D::COLLECTION).await?;
        rows.into_iter()
            .map(|(_, body)| serde_json::from_value(body).map_err(StoreError::from))
            .collect()
    }

    async fn insert<D: Document>(&self, document: &D) -> Result<()> {
        let body = serde_json::to_value(document)?;
        self.insert_raw(D::COLLECTION, document.document_id(), body)
            .await
    }

    async fn replace<D: Document>(&self, document: &D) -> Result<()> {
        let body = serde_json::to_value(document)?;
        self.replace_raw(D::COLLECTION, document.document_id(), body)
            .await
    }

    async fn delete<D: Document>(&self, id: &str) -> Result<()> {
        self.delete_raw(D::COLLECTION, id).await
    }
}

impl<T: TxSession + ?Sized> TxSessionExt for T {}

/// A database handle capable of multi-document transactions.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    type Tx: TxSession + Clone + 'static;

    async fn begin(&self) -> Result<Self::Tx>;

    /// Installs every staged write atomically or none of them.
    async fn commit(&self, tx: &Self::Tx) -> Result<()>;

    /// Discards every staged write.
    async fn abort(&self, tx: &Self::Tx) -> Result<()>;
}
