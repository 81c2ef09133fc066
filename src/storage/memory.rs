use super::{Collection, Document, StoreSnapshot};
use crate::core::{Result, StoreError};
use crate::transaction::{DocumentStore, TransactionId, TransactionManager, TransactionStats, TxSession};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

pub type DocumentKey = (Collection, String);

/// A committed document together with the commit version that last wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedDocument {
    pub version: u64,
    pub body: JsonValue,
}

/// Persistent map: cloning it for a transaction snapshot shares structure.
pub(crate) type CommittedState = im::OrdMap<DocumentKey, VersionedDocument>;

/// Multi-document transactional store with snapshot isolation.
///
/// Every transaction reads from the committed state as of `begin`. Commit uses
/// first-committer-wins: if any document staged by the transaction was
/// committed by someone else after the snapshot was taken, the whole commit is
/// rejected with [`StoreError::WriteConflict`] and nothing is installed.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    committed: Arc<RwLock<CommittedState>>,
    transactions: TransactionManager,
    // Test hook: number of upcoming commits to fail with a write conflict.
    injected_conflicts: Arc<AtomicUsize>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(RwLock::new(CommittedState::new())),
            transactions: TransactionManager::new(),
            injected_conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Rebuilds a store from a previously exported snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let latest = snapshot
            .documents
            .iter()
            .map(|entry| entry.version)
            .max()
            .unwrap_or(0);
        let state: CommittedState = snapshot
            .documents
            .into_iter()
            .map(|entry| {
                (
                    (entry.collection, entry.id),
                    VersionedDocument {
                        version: entry.version,
                        body: entry.body,
                    },
                )
            })
            .collect();

        Self {
            committed: Arc::new(RwLock::new(state)),
            transactions: TransactionManager::starting_at(latest),
            injected_conflicts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn export_snapshot(&self) -> StoreSnapshot {
        let committed = self.committed.read().await.clone();
        StoreSnapshot::from_state(&committed)
    }

    /// Writes a document straight into committed state, bypassing transactions.
    ///
    /// Meant for fixtures and data imports; it does not maintain any
    /// cross-collection invariant.
    pub async fn seed<D: Document>(&self, document: &D) -> Result<()> {
        let body = serde_json::to_value(document)?;
        let version = self.transactions.next_commit_version();
        let mut committed = self.committed.write().await;
        committed.insert(
            (D::COLLECTION, document.document_id().to_string()),
            VersionedDocument { version, body },
        );
        Ok(())
    }

    /// Reads the latest committed version of a document.
    pub async fn fetch<D: Document>(&self, id: &str) -> Result<Option<D>> {
        let committed = self.committed.read().await;
        match committed.get(&(D::COLLECTION, id.to_string())) {
            Some(doc) => Ok(Some(serde_json::from_value(doc.body.clone())?)),
            None => Ok(None),
        }
    }

    pub async fn fetch_all<D: Document>(&self) -> Result<Vec<D>> {
        let committed = self.committed.read().await;
        committed
            .iter()
            .filter(|((collection, _), _)| *collection == D::COLLECTION)
            .map(|(_, doc)| serde_json::from_value(doc.body.clone()).map_err(StoreError::from))
            .collect()
    }

    pub async fn document_count(&self, collection: Collection) -> usize {
        let committed = self.committed.read().await;
        committed
            .keys()
            .filter(|(candidate, _)| *candidate == collection)
            .count()
    }

    /// Makes the next `count` commits fail with a write-write conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    pub async fn stats(&self) -> TransactionStats {
        self.transactions.stats().await
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    async fn reject_commit(&self, tx: &MemoryTx, key: &DocumentKey) -> StoreError {
        tx.close();
        self.transactions.mark_conflict(tx.id).await;
        if let Err(err) = self.transactions.rollback(tx.id).await {
            warn!("Rollback of conflicted {} failed: {}", tx.id, err);
        }
        warn!(
            "Commit of {} rejected: write-write conflict detected on {}/{}",
            tx.id, key.0, key.1
        );
        StoreError::WriteConflict {
            collection: key.0.to_string(),
            id: key.1.clone(),
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let id = self.transactions.begin().await;
        let snapshot = self.committed.read().await.clone();
        debug!("Began {} at version {}", id, self.transactions.current_version());

        Ok(MemoryTx {
            id,
            inner: Arc::new(MemoryTxInner {
                snapshot,
                staged: Mutex::new(BTreeMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    async fn commit(&self, tx: &MemoryTx) -> Result<()> {
        self.transactions.ensure_active(tx.id).await?;
        let staged = std::mem::take(&mut *tx.inner.staged.lock().await);

        if self.take_injected_conflict() {
            let key = staged
                .keys()
                .next()
                .cloned()
                .unwrap_or((Collection::Bikes, String::from("*")));
            return Err(self.reject_commit(tx, &key).await);
        }

        let mut committed = self.committed.write().await;
        for key in staged.keys() {
            let seen = tx.inner.snapshot.get(key).map(|doc| doc.version);
            let current = committed.get(key).map(|doc| doc.version);
            if seen != current {
                drop(committed);
                return Err(self.reject_commit(tx, key).await);
            }
        }

        if !staged.is_empty() {
            let version = self.transactions.next_commit_version();
            for (key, write) in staged {
                match write {
                    Some(body) => {
                        committed.insert(key, VersionedDocument { version, body });
                    }
                    None => {
                        committed.remove(&key);
                    }
                }
            }
        }
        drop(committed);

        tx.close();
        self.transactions.commit(tx.id).await
    }

    async fn abort(&self, tx: &MemoryTx) -> Result<()> {
        tx.close();
        tx.inner.staged.lock().await.clear();
        self.transactions.rollback(tx.id).await
    }
}

/// Handle on one open transaction of an [`InMemoryDocumentStore`].
///
/// Clones share the same staged write set.
#[derive(Clone)]
pub struct MemoryTx {
    id: TransactionId,
    inner: Arc<MemoryTxInner>,
}

struct MemoryTxInner {
    snapshot: CommittedState,
    // `None` marks a staged delete.
    staged: Mutex<BTreeMap<DocumentKey, Option<JsonValue>>>,
    closed: AtomicBool,
}

impl MemoryTx {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::TransactionClosed(self.id.as_u64()));
        }
        Ok(())
    }

    async fn visible(&self, key: &DocumentKey) -> Option<JsonValue> {
        let staged = self.inner.staged.lock().await;
        match staged.get(key) {
            Some(write) => write.clone(),
            None => self.inner.snapshot.get(key).map(|doc| doc.body.clone()),
        }
    }
}

#[async_trait]
impl TxSession for MemoryTx {
    fn transaction_id(&self) -> u64 {
        self.id.as_u64()
    }

    async fn find_raw(&self, collection: Collection, id: &str) -> Result<Option<JsonValue>> {
        self.ensure_open()?;
        Ok(self.visible(&(collection, id.to_string())).await)
    }

    async fn scan_raw(&self, collection: Collection) -> Result<Vec<(String, JsonValue)>> {
        self.ensure_open()?;
        let mut visible: BTreeMap<String, JsonValue> = self
            .inner
            .snapshot
            .iter()
            .filter(|((candidate, _), _)| *candidate == collection)
            .map(|((_, id), doc)| (id.clone(), doc.body.clone()))
            .collect();

        let staged = self.inner.staged.lock().await;
        for ((candidate, id), write) in staged.iter() {
            if *candidate != collection {
                continue;
            }
            match write {
                Some(body) => {
                    visible.insert(id.clone(), body.clone());
                }
                None => {
                    visible.remove(id);
                }
            }
        }

        Ok(visible.into_iter().collect())
    }

    async fn insert_raw(&self, collection: Collection, id: &str, body: JsonValue) -> Result<()> {
        self.ensure_open()?;
        let key = (collection, id.to_string());
        if self.visible(&key).await.is_some() {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.inner.staged.lock().await.insert(key, Some(body));
        Ok(())
    }

    async fn replace_raw(&self, collection: Collection, id: &str, body: JsonValue) -> Result<()> {
        self.ensure_open()?;
        let key = (collection, id.to_string());
        if self.visible(&key).await.is_none() {
            return Err(StoreError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.inner.staged.lock().await.insert(key, Some(body));
        Ok(())
    }

    async fn delete_raw(&self, collection: Collection, id: &str) -> Result<()> {
        self.ensure_open()?;
        let key = (collection, id.to_string());
        if self.visible(&key).await.is_none() {
            return Err(StoreError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.inner.staged.lock().await.insert(key, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_staged_writes_are_invisible_until_commit() {
        let store = InMemoryDocumentStore::new();
        let writer = store.begin().await.unwrap();
        writer
            .insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
            .await
            .unwrap();

        let reader = store.begin().await.unwrap();
        assert!(reader.find_raw(Collection::Bikes, "b1").await.unwrap().is_none());
        assert!(writer.find_raw(Collection::Bikes, "b1").await.unwrap().is_some());

        store.commit(&writer).await.unwrap();
        // The reader keeps its snapshot.
        assert!(reader.find_raw(Collection::Bikes, "b1").await.unwrap().is_none());
        store.abort(&reader).await.unwrap();

        assert_eq!(store.document_count(Collection::Bikes).await, 1);
    }

    #[tokio::test]
    async fn test_abort_discards_staged_writes() {
        let store = InMemoryDocumentStore::new();
        let tx = store.begin().await.unwrap();
        tx.insert_raw(Collection::Partners, "p1", json!({"id": "p1"}))
            .await
            .unwrap();
        store.abort(&tx).await.unwrap();

        assert_eq!(store.document_count(Collection::Partners).await, 0);
        let err = tx
            .find_raw(Collection::Partners, "p1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TransactionClosed(_)));
    }

    #[tokio::test]
    async fn test_first_committer_wins_on_same_document() {
        let store = InMemoryDocumentStore::new();
        let setup = store.begin().await.unwrap();
        setup
            .insert_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 0}))
            .await
            .unwrap();
        store.commit(&setup).await.unwrap();

        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();
        first
            .replace_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 1}))
            .await
            .unwrap();
        second
            .replace_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 2}))
            .await
            .unwrap();

        store.commit(&first).await.unwrap();
        let err = store.commit(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict { .. }));
        assert!(err.is_transient());

        let check = store.begin().await.unwrap();
        let body = check.find_raw(Collection::Bikes, "b1").await.unwrap().unwrap();
        assert_eq!(body["n"], 1);
        assert_eq!(store.stats().await.conflicts, 1);
    }

    #[tokio::test]
    async fn test_disjoint_documents_commit_independently() {
        let store = InMemoryDocumentStore::new();
        let first = store.begin().await.unwrap();
        let second = store.begin().await.unwrap();
        first
            .insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
            .await
            .unwrap();
        second
            .insert_raw(Collection::Bikes, "b2", json!({"id": "b2"}))
            .await
            .unwrap();

        store.commit(&first).await.unwrap();
        store.commit(&second).await.unwrap();
        assert_eq!(store.document_count(Collection::Bikes).await, 2);
    }

    #[tokio::test]
    async fn test_insert_duplicate_and_replace_missing_fail() {
        let store = InMemoryDocumentStore::new();
        let tx = store.begin().await.unwrap();
        tx.insert_raw(Collection::Reviews, "r1", json!({"id": "r1"}))
            .await
            .unwrap();

        let duplicate = tx
            .insert_raw(Collection::Reviews, "r1", json!({"id": "r1"}))
            .await
            .unwrap_err();
        assert!(matches!(duplicate, StoreError::DuplicateKey { .. }));

        let missing = tx
            .replace_raw(Collection::Reviews, "r2", json!({"id": "r2"}))
            .await
            .unwrap_err();
        assert!(matches!(missing, StoreError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn test_scan_merges_staged_inserts_and_deletes() {
        let store = InMemoryDocumentStore::new();
        let setup = store.begin().await.unwrap();
        for id in ["a", "b", "c"] {
            setup
                .insert_raw(Collection::Reviews, id, json!({"id": id}))
                .await
                .unwrap();
        }
        store.commit(&setup).await.unwrap();

        let tx = store.begin().await.unwrap();
        tx.delete_raw(Collection::Reviews, "b").await.unwrap();
        tx.insert_raw(Collection::Reviews, "d", json!({"id": "d"}))
            .await
            .unwrap();

        let ids: Vec<String> = tx
            .scan_raw(Collection::Reviews)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
    }

    #[tokio::test]
    async fn test_injected_conflict_fails_next_commit_only() {
        let store = InMemoryDocumentStore::new();
        store.inject_conflicts(1);

        let tx = store.begin().await.unwrap();
        tx.insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
            .await
            .unwrap();
        assert!(store.commit(&tx).await.unwrap_err().is_transient());
        assert_eq!(store.document_count(Collection::Bikes).await, 0);

        let retry = store.begin().await.unwrap();
        retry
            .insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
            .await
            .unwrap();
        store.commit(&retry).await.unwrap();
        assert_eq!(store.document_count(Collection::Bikes).await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_preserves_versions() {
        let store = InMemoryDocumentStore::new();
        let tx = store.begin().await.unwrap();
        tx.insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
            .await
            .unwrap();
        store.commit(&tx).await.unwrap();

        let snapshot = store.export_snapshot().await;
        let restored = InMemoryDocumentStore::from_snapshot(snapshot.clone());
        assert_eq!(restored.export_snapshot().await.documents, snapshot.documents);

        let next = restored.begin().await.unwrap();
        next.replace_raw(Collection::Bikes, "b1", json!({"id": "b1", "v": 2}))
            .await
            .unwrap();
        restored.commit(&next).await.unwrap();
        let exported = restored.export_snapshot().await;
        assert!(exported.documents[0].version > snapshot.documents[0].version);
    }
}
