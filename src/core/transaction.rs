use crate::core::constants::*;
use crate::core::errors::*;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Handle for one transaction. Mutating store operations given a handle are
/// journaled under its id; `commit` and `abort` consume it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Txn {
    id: TransactionID,
}

impl Txn {
    pub(crate) fn new(id: TransactionID) -> Self {
        Self { id }
    }

    pub fn id(&self) -> TransactionID {
        self.id
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TxnEntry {
    pub start_lsn: Lsn,
    pub state: TxState,
    pub records: u64,
}

/// Transactions the store has begun and not yet finished.
#[derive(Debug, Default)]
pub(crate) struct TransactionTable {
    entries: HashMap<TransactionID, TxnEntry>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, id: TransactionID, start_lsn: Lsn) {
        self.entries.insert(
            id,
            TxnEntry {
                start_lsn,
                state: TxState::Active,
                records: 0,
            },
        );
    }

    /// Fails unless `txn` is known and still active.
    pub fn check(&self, txn: &Txn) -> Result<TxnEntry> {
        match self.entries.get(&txn.id) {
            Some(entry) if entry.state == TxState::Active => Ok(*entry),
            _ => Err(Error::TxNotActive { txn_id: txn.id }),
        }
    }

    pub fn note_write(&mut self, id: TransactionID) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.records += 1;
        }
    }

    /// Removes the transaction, recording how it ended.
    pub fn finish(&mut self, id: TransactionID, state: TxState) -> Option<TxnEntry> {
        let mut entry = self.entries.remove(&id)?;
        entry.state = state;
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<TransactionID> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
