use super::TxSession;
use crate::core::{Result, StoreError};
use crate::storage::{Collection, DocumentRef};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    /// Writes are forwarded to the wrapped session.
    Passthrough,
    /// Writes land in a private overlay that later reads observe; the wrapped
    /// session never sees them.
    Capture,
}

/// Wraps a [`TxSession`] and records which documents were written.
///
/// Running the same operation once in each mode yields the same list of
/// touched documents, which is what lets a dry-run repair report exactly what a
/// real one would do.
pub struct RecordingSession<'a, T: TxSession + ?Sized> {
    inner: &'a T,
    mode: RecordingMode,
    overlay: Mutex<BTreeMap<(Collection, String), Option<JsonValue>>>,
    touched: Mutex<Vec<DocumentRef>>,
}

impl<'a, T: TxSession + ?Sized> RecordingSession<'a, T> {
    pub fn new(inner: &'a T, mode: RecordingMode) -> Self {
        Self {
            inner,
            mode,
            overlay: Mutex::new(BTreeMap::new()),
            touched: Mutex::new(Vec::new()),
        }
    }

    pub fn passthrough(inner: &'a T) -> Self {
        Self::new(inner, RecordingMode::Passthrough)
    }

    pub fn capture(inner: &'a T) -> Self {
        Self::new(inner, RecordingMode::Capture)
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    /// Documents written so far, deduplicated, in first-write order.
    pub async fn touched(&self) -> Vec<DocumentRef> {
        self.touched.lock().await.clone()
    }

    /// Replays the captured writes onto the wrapped session and consumes
    /// the recorder. Nesting a capture session inside another and flushing it
    /// only on success works like a savepoint. Passthrough sessions have
    /// nothing to replay.
    pub async fn flush(self) -> Result<()> {
        let inner = self.inner;
        for ((collection, id), write) in self.overlay.into_inner() {
            let exists = inner.find_raw(collection, &id).await?.is_some();
            match write {
                Some(body) if exists => inner.replace_raw(collection, &id, body).await?,
                Some(body) => inner.insert_raw(collection, &id, body).await?,
                // Inserted and deleted again within the overlay.
                None if !exists => {}
                None => inner.delete_raw(collection, &id).await?,
            }
        }
        Ok(())
    }

    async fn record(&self, collection: Collection, id: &str) {
        let doc_ref = DocumentRef::new(collection, id);
        let mut touched = self.touched.lock().await;
        if !touched.contains(&doc_ref) {
            touched.push(doc_ref);
        }
    }

    async fn overlay_entry(&self, collection: Collection, id: &str) -> Option<Option<JsonValue>> {
        let overlay = self.overlay.lock().await;
        overlay.get(&(collection, id.to_string())).cloned()
    }

    async fn visible(&self, collection: Collection, id: &str) -> Result<Option<JsonValue>> {
        match self.overlay_entry(collection, id).await {
            Some(write) => Ok(write),
            None => self.inner.find_raw(collection, id).await,
        }
    }

    async fn stage(&self, collection: Collection, id: &str, write: Option<JsonValue>) {
        self.overlay
            .lock()
            .await
            .insert((collection, id.to_string()), write);
    }
}

#[async_trait]
impl<'a, T: TxSession + ?Sized> TxSession for RecordingSession<'a, T> {
    fn transaction_id(&self) -> u64 {
        self.inner.transaction_id()
    }

    async fn find_raw(&self, collection: Collection, id: &str) -> Result<Option<JsonValue>> {
        self.visible(collection, id).await
    }

    async fn scan_raw(&self, collection: Collection) -> Result<Vec<(String, JsonValue)>> {
        let rows = self.inner.scan_raw(collection).await?;
        if self.mode == RecordingMode::Passthrough {
            return Ok(rows);
        }

        let mut merged: BTreeMap<String, JsonValue> = rows.into_iter().collect();
        let overlay = self.overlay.lock().await;
        for ((candidate, id), write) in overlay.iter() {
            if *candidate != collection {
                continue;
            }
            match write {
                Some(body) => {
                    merged.insert(id.clone(), body.clone());
                }
                None => {
                    merged.remove(id);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    async fn insert_raw(&self, collection: Collection, id: &str, body: JsonValue) -> Result<()> {
        match self.mode {
            RecordingMode::Passthrough => self.inner.insert_raw(collection, id, body).await?,
            RecordingMode::Capture => {
                if self.visible(collection, id).await?.is_some() {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                self.stage(collection, id, Some(body)).await;
            }
        }
        self.record(collection, id).await;
        Ok(())
    }

    async fn replace_raw(&self, collection: Collection, id: &str, body: JsonValue) -> Result<()> {
        match self.mode {
            RecordingMode::Passthrough => self.inner.replace_raw(collection, id, body).await?,
            RecordingMode::Capture => {
                if self.visible(collection, id).await?.is_none() {
                    return Err(StoreError::DocumentNotFound {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                self.stage(collection, id, Some(body)).await;
            }
        }
        self.record(collection, id).await;
        Ok(())
    }

    async fn delete_raw(&self, collection: Collection, id: &str) -> Result<()> {
        match self.mode {
            RecordingMode::Passthrough => self.inner.delete_raw(collection, id).await?,
            RecordingMode::Capture => {
                if self.visible(collection, id).await?.is_none() {
                    return Err(StoreError::DocumentNotFound {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    });
                }
                self.stage(collection, id, None).await;
            }
        }
        self.record(collection, id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryDocumentStore;
    use crate::transaction::DocumentStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_capture_mode_never_reaches_inner_session() {
        let store = InMemoryDocumentStore::new();
        let tx = store.begin().await.unwrap();
        let recording = RecordingSession::capture(&tx);

        recording
            .insert_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 1}))
            .await
            .unwrap();
        recording
            .replace_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 2}))
            .await
            .unwrap();

        let seen = recording.find_raw(Collection::Bikes, "b1").await.unwrap();
        assert_eq!(seen.unwrap()["n"], 2);
        assert!(tx.find_raw(Collection::Bikes, "b1").await.unwrap().is_none());
        assert_eq!(
            recording.touched().await,
            vec![DocumentRef::new(Collection::Bikes, "b1")]
        );

        store.commit(&tx).await.unwrap();
        assert_eq!(store.document_count(Collection::Bikes).await, 0);
    }

    #[tokio::test]
    async fn test_both_modes_report_identical_touched_documents() {
        let store = InMemoryDocumentStore::new();
        let setup = store.begin().await.unwrap();
        setup
            .insert_raw(Collection::Partners, "p1", json!({"id": "p1"}))
            .await
            .unwrap();
        store.commit(&setup).await.unwrap();

        let mut reports = Vec::new();
        for mode in [RecordingMode::Capture, RecordingMode::Passthrough] {
            let tx = store.begin().await.unwrap();
            let recording = RecordingSession::new(&tx, mode);
            recording
                .replace_raw(Collection::Partners, "p1", json!({"id": "p1", "x": 1}))
                .await
                .unwrap();
            recording
                .insert_raw(Collection::Bikes, "b9", json!({"id": "b9"}))
                .await
                .unwrap();
            reports.push(recording.touched().await);
            store.abort(&tx).await.unwrap();
        }
        assert_eq!(reports[0], reports[1]);
    }

    #[tokio::test]
    async fn test_flushed_nested_capture_is_visible_to_the_outer_one() {
        let store = InMemoryDocumentStore::new();
        let setup = store.begin().await.unwrap();
        setup
            .insert_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 1}))
            .await
            .unwrap();
        setup
            .insert_raw(Collection::Bikes, "b2", json!({"id": "b2"}))
            .await
            .unwrap();
        store.commit(&setup).await.unwrap();

        let tx = store.begin().await.unwrap();
        let batch = RecordingSession::capture(&tx);

        let kept = RecordingSession::capture(&batch);
        kept.replace_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 2}))
            .await
            .unwrap();
        kept.delete_raw(Collection::Bikes, "b2").await.unwrap();
        kept.insert_raw(Collection::Bikes, "b3", json!({"id": "b3"}))
            .await
            .unwrap();
        kept.insert_raw(Collection::Bikes, "tmp", json!({"id": "tmp"}))
            .await
            .unwrap();
        kept.delete_raw(Collection::Bikes, "tmp").await.unwrap();
        kept.flush().await.unwrap();

        let dropped = RecordingSession::capture(&batch);
        dropped
            .replace_raw(Collection::Bikes, "b1", json!({"id": "b1", "n": 99}))
            .await
            .unwrap();
        drop(dropped);

        let seen = batch.find_raw(Collection::Bikes, "b1").await.unwrap().unwrap();
        assert_eq!(seen["n"], 2);
        let ids: Vec<String> = batch
            .scan_raw(Collection::Bikes)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["b1".to_string(), "b3".to_string()]);
        assert_eq!(tx.scan_raw(Collection::Bikes).await.unwrap().len(), 2);
        assert_eq!(tx.find_raw(Collection::Bikes, "b1").await.unwrap().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_capture_scan_applies_overlay_deletes() {
        let store = InMemoryDocumentStore::new();
        let setup = store.begin().await.unwrap();
        setup
            .insert_raw(Collection::Reviews, "r1", json!({"id": "r1"}))
            .await
            .unwrap();
        store.commit(&setup).await.unwrap();

        let tx = store.begin().await.unwrap();
        let recording = RecordingSession::capture(&tx);
        recording.delete_raw(Collection::Reviews, "r1").await.unwrap();

        assert!(recording.scan_raw(Collection::Reviews).await.unwrap().is_empty());
        assert_eq!(tx.scan_raw(Collection::Reviews).await.unwrap().len(), 1);
    }
}
