// ============================================================================
// Transaction Identity
// ============================================================================
//
// A transaction is either open or gone: the manager tracks open ids only and
// forgets an id as soon as it commits or aborts. Reads inside a transaction
// see the committed state as of `begin` plus the transaction's own staged
// writes; nothing staged is visible to anyone else before commit.
//
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one store transaction. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase_and_display_with_prefix() {
        let first = TransactionId::new();
        let second = TransactionId::new();
        assert!(second > first);
        assert_eq!(TransactionId(7).to_string(), "tx-7");
    }
}
