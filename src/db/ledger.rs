//! Transaction ledger for nesting begin/commit/rollback on shared connections.
//!
//! Independent call sites may each wrap their work in begin/commit against the
//! same connection. Only the outermost pair reaches the native transaction
//! boundary. A rollback at any depth aborts everything immediately and clears
//! the entry, so outer callers find the transaction already closed.
//!
//! The ledger only decides; it returns a [`TxStep`] and the connection performs
//! the matching driver call.
//!
//! Entries are keyed by [`LedgerKey`], the connection key plus the generation
//! of the handle that opened it. A handle orphaned by `close_all` and the
//! fresh handle that replaced it never share an entry.

use crate::models::ConnectionKey;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Outcome of a ledger transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStep {
    /// Depth went 0 -> 1: open a native transaction.
    Opened,
    /// Depth > 1 after begin: joined the open transaction, no driver call.
    Joined,
    /// Depth reached 0: commit the native transaction.
    Committed,
    /// Depth decreased but is still > 0: no driver call.
    Released,
    /// Entry cleared: roll back the native transaction.
    RolledBack,
    /// Nothing was open: commit/rollback was a no-op.
    Inactive,
}

impl TxStep {
    /// True when this step requires a driver call.
    pub fn touches_driver(&self) -> bool {
        matches!(self, Self::Opened | Self::Committed | Self::RolledBack)
    }
}

/// Identity of one opened connection handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    key: ConnectionKey,
    generation: u64,
}

impl LedgerKey {
    pub fn new(key: ConnectionKey, generation: u64) -> Self {
        Self { key, generation }
    }

    pub fn connection_key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.key, self.generation)
    }
}

/// Per-handle transaction depth counters. Absent means depth 0.
#[derive(Debug, Default)]
pub struct TransactionLedger {
    depths: Mutex<HashMap<LedgerKey, u32>>,
}

impl TransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_depths<R>(&self, f: impl FnOnce(&mut HashMap<LedgerKey, u32>) -> R) -> R {
        let mut depths = self.depths.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut depths)
    }

    /// Enter a (possibly nested) transaction.
    pub fn begin(&self, key: &LedgerKey) -> TxStep {
        self.with_depths(|depths| {
            let depth = depths.entry(key.clone()).or_insert(0);
            *depth += 1;
            if *depth == 1 {
                TxStep::Opened
            } else {
                TxStep::Joined
            }
        })
    }

    /// Leave one level. Extra commits are [`TxStep::Inactive`], never an error.
    pub fn commit(&self, key: &LedgerKey) -> TxStep {
        self.with_depths(|depths| match depths.get_mut(key) {
            None => TxStep::Inactive,
            Some(depth) if *depth <= 1 => {
                depths.remove(key);
                TxStep::Committed
            }
            Some(depth) => {
                *depth -= 1;
                TxStep::Released
            }
        })
    }

    /// Abort at any depth: the entry is removed entirely.
    pub fn rollback(&self, key: &LedgerKey) -> TxStep {
        self.with_depths(|depths| match depths.remove(key) {
            Some(_) => TxStep::RolledBack,
            None => TxStep::Inactive,
        })
    }

    /// Drop an entry whose native begin failed.
    pub fn forget(&self, key: &LedgerKey) {
        self.with_depths(|depths| {
            depths.remove(key);
        });
    }

    pub fn depth(&self, key: &LedgerKey) -> u32 {
        self.with_depths(|depths| depths.get(key).copied().unwrap_or(0))
    }

    pub fn is_open(&self, key: &LedgerKey) -> bool {
        self.depth(key) > 0
    }

    /// Number of connections with an open transaction.
    pub fn open_count(&self) -> usize {
        self.with_depths(|depths| depths.len())
    }

    pub fn clear(&self) {
        self.with_depths(HashMap::clear);
    }
}
