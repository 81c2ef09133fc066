// ============================================================================
// Transaction Manager
// ============================================================================

use super::TransactionId;
use crate::core::{Result, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Tracks the lifecycle of every transaction opened against one store.
#[derive(Clone)]
pub struct TransactionManager {
    // Open transactions; finished ids are forgotten.
    open: Arc<RwLock<HashSet<TransactionId>>>,
    // Transactions whose commit lost a write-write race.
    conflicted_ids: Arc<RwLock<HashSet<TransactionId>>>,
    global_version: Arc<AtomicU64>,
    committed: Arc<AtomicU64>,
    aborted: Arc<AtomicU64>,
    conflicts: Arc<AtomicU64>,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a manager whose commit versions continue after `version`.
    pub fn starting_at(version: u64) -> Self {
        Self {
            open: Arc::new(RwLock::new(HashSet::new())),
            conflicted_ids: Arc::new(RwLock::new(HashSet::new())),
            global_version: Arc::new(AtomicU64::new(version)),
            committed: Arc::new(AtomicU64::new(0)),
            aborted: Arc::new(AtomicU64::new(0)),
            conflicts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn begin(&self) -> TransactionId {
        let transaction_id = TransactionId::new();
        self.open.write().await.insert(transaction_id);
        transaction_id
    }

    pub async fn is_active(&self, txn_id: TransactionId) -> bool {
        self.open.read().await.contains(&txn_id)
    }

    pub async fn ensure_active(&self, txn_id: TransactionId) -> Result<()> {
        if self.is_active(txn_id).await {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed(txn_id.as_u64()))
        }
    }

    /// Allocates the version stamped on every document written by one commit.
    pub fn next_commit_version(&self) -> u64 {
        self.global_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_version(&self) -> u64 {
        self.global_version.load(Ordering::SeqCst)
    }

    pub async fn commit(&self, txn_id: TransactionId) -> Result<()> {
        if self.is_conflicted(txn_id).await {
            self.rollback(txn_id).await?;
            return Err(StoreError::Transient(format!(
                "transaction {txn_id} was marked conflicted before commit"
            )));
        }

        if self.open.write().await.remove(&txn_id) {
            self.committed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(StoreError::TransactionClosed(txn_id.as_u64()))
        }
    }

    /// Aborting an unknown or already finished transaction is a no-op.
    pub async fn rollback(&self, txn_id: TransactionId) -> Result<()> {
        if self.open.write().await.remove(&txn_id) {
            self.aborted.fetch_add(1, Ordering::Relaxed);
        }
        self.conflicted_ids.write().await.remove(&txn_id);
        Ok(())
    }

    pub async fn mark_conflict(&self, txn_id: TransactionId) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
        self.conflicted_ids.write().await.insert(txn_id);
    }

    pub async fn is_conflicted(&self, txn_id: TransactionId) -> bool {
        self.conflicted_ids.read().await.contains(&txn_id)
    }

    pub async fn stats(&self) -> TransactionStats {
        TransactionStats {
            active: self.open.read().await.len(),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionStats {
    pub active: usize,
    pub committed: u64,
    pub aborted: u64,
    pub conflicts: u64,
}
