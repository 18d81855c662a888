pub mod constants;
pub mod errors;
pub mod address;
pub mod buffer_pool;
pub mod pager;
pub mod page;
pub mod free_space;
pub mod lru_cache;
pub mod metrics;
pub mod loggable;
pub mod journal;
pub mod index;
pub mod data_file;
pub mod data_page;
pub mod transaction;
pub mod recovery;
pub mod stream;
pub mod store;

pub use constants::*;
pub use address::Address;
pub use index::{IndexQuery, KeyIndex, OrderedIndex, Termination};
pub use journal::LogRecord;
pub use loggable::Loggable;
pub use metrics::{Metrics, MetricsSnapshot};
pub use recovery::RecoveryReport;
pub use store::{StoreOptions, StoreStats, ValueStore};
pub use stream::ValueStream;
pub use transaction::Txn;
