pub mod core;

pub use core::{
    Address, IndexQuery, KeyIndex, LogRecord, Loggable, OrderedIndex, RecoveryReport, StoreOptions, StoreStats,
    Termination, Txn, ValueStore, ValueStream,
};
pub use core::errors::{Error, Result};
pub use core::metrics::MetricsSnapshot;
pub use core::recovery::summarize as summarize_journal;
