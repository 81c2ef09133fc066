use super::{DocumentStore, RetryPolicy};
use crate::core::StoreError;
use log::{debug, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Error types a [`UnitOfWork`] can drive: they absorb storage errors and can
/// tell whether a fresh attempt might succeed.
pub trait RetryableError: From<StoreError> + fmt::Display + Send + 'static {
    fn is_transient(&self) -> bool;

    /// Called once the retry budget is spent on a transient error.
    fn exhausted(self, _attempts: usize) -> Self {
        self
    }
}

impl RetryableError for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Transactional scope: begin, run, commit on success, abort on failure.
///
/// The whole attempt is retried on transient storage errors, with exponential
/// backoff, up to `RetryPolicy::max_attempts`. Writes staged by an attempt are
/// never visible outside it unless that attempt commits.
pub struct UnitOfWork<S: DocumentStore> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S: DocumentStore> Clone for UnitOfWork<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<S: DocumentStore> UnitOfWork<S> {
    pub fn new(store: S, policy: RetryPolicy) -> Self {
        Self::from_shared(Arc::new(store), policy)
    }

    pub fn from_shared(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn shared_store(&self) -> Arc<S> {
        self.store.clone()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `operation` inside a retryable transaction.
    ///
    /// `operation` may run more than once; it must derive everything it writes
    /// from what it reads through the transaction handle it is given.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(S::Tx) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 1usize;
        loop {
            match self.attempt(&mut operation).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let backoff_ms = self.policy.backoff_ms_for(attempt);
                    warn!(
                        "UnitOfWork retry on transient error (attempt {} of {}): {} (backoff={}ms)",
                        attempt, max_attempts, err, backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => return Err(err.exhausted(attempt)),
                Err(err) => return Err(err),
            }
        }
    }

    /// Executes `operation` in a transaction that is always aborted.
    ///
    /// Used for read-only passes; anything the closure stages is discarded.
    pub async fn read<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce(S::Tx) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let tx = self.store.begin().await?;
        let result = operation(tx.clone()).await;
        if let Err(abort_err) = self.store.abort(&tx).await {
            warn!("Abort of read-only transaction failed: {}", abort_err);
        }
        result
    }

    async fn attempt<F, Fut, T, E>(&self, operation: &mut F) -> Result<T, E>
    where
        F: FnMut(S::Tx) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let tx = self.store.begin().await?;
        match operation(tx.clone()).await {
            Ok(value) => {
                if let Err(commit_err) = self.store.commit(&tx).await {
                    if let Err(abort_err) = self.store.abort(&tx).await {
                        warn!("Abort after failed commit also failed: {}", abort_err);
                    }
                    return Err(E::from(commit_err));
                }
                debug!("UnitOfWork committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = self.store.abort(&tx).await {
                    warn!("Abort after failed operation also failed: {}", abort_err);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Collection, InMemoryDocumentStore};
    use crate::transaction::TxSession;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy::default().max_attempts(attempts).backoff_ms(1, 2)
    }

    #[tokio::test]
    async fn test_run_commits_on_success() {
        let uow = UnitOfWork::new(InMemoryDocumentStore::new(), fast_policy(3));
        uow.run(|tx| async move {
            tx.insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
                .await?;
            Ok::<(), StoreError>(())
        })
        .await
        .expect("commit");

        assert_eq!(uow.store().document_count(Collection::Bikes).await, 1);
    }

    #[tokio::test]
    async fn test_run_aborts_on_error_without_side_effects() {
        let uow = UnitOfWork::new(InMemoryDocumentStore::new(), fast_policy(3));
        let err = uow
            .run(|tx| async move {
                tx.insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
                    .await?;
                Err::<(), StoreError>(StoreError::DocumentNotFound {
                    collection: "partners".to_string(),
                    id: "p1".to_string(),
                })
            })
            .await
            .expect_err("operation error must abort");

        assert!(matches!(err, StoreError::DocumentNotFound { .. }));
        assert_eq!(uow.store().document_count(Collection::Bikes).await, 0);
    }

    #[tokio::test]
    async fn test_run_retries_commit_conflicts() {
        let uow = UnitOfWork::new(InMemoryDocumentStore::new(), fast_policy(3));
        uow.store().inject_conflicts(2);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        uow.run(move |tx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
                    .await?;
                Ok::<(), StoreError>(())
            }
        })
        .await
        .expect("third attempt commits");

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(uow.store().document_count(Collection::Bikes).await, 1);
    }

    #[tokio::test]
    async fn test_run_gives_up_after_max_attempts() {
        let uow = UnitOfWork::new(InMemoryDocumentStore::new(), fast_policy(2));
        uow.store().inject_conflicts(5);

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let err = uow
            .run(move |tx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tx.insert_raw(Collection::Bikes, "b1", json!({"id": "b1"}))
                        .await?;
                    Ok::<(), StoreError>(())
                }
            })
            .await
            .expect_err("conflicts outlast the retry budget");

        assert!(err.is_transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(uow.store().document_count(Collection::Bikes).await, 0);
    }

    #[tokio::test]
    async fn test_non_transient_errors_are_not_retried() {
        let uow = UnitOfWork::new(InMemoryDocumentStore::new(), fast_policy(5));
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let _ = uow
            .run(move |_tx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), StoreError>(StoreError::Serialization("bad".to_string()))
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_never_commits() {
        let uow = UnitOfWork::new(InMemoryDocumentStore::new(), fast_policy(3));
        uow.read(|tx| async move {
            tx.insert_raw(Collection::Reviews, "r1", json!({"id": "r1"}))
                .await?;
            Ok::<(), StoreError>(())
        })
        .await
        .expect("read scope");

        assert_eq!(uow.store().document_count(Collection::Reviews).await, 0);
    }
}
