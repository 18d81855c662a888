use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("transaction {txn_id} is not active")]
    TxNotActive { txn_id: u64 },

    #[error("store is read-only, cannot perform operation: {operation}")]
    ReadOnly { operation: String },

    #[error("store is closed")]
    StoreClosed,

    #[error("key length {len} exceeds maximum of {max} bytes")]
    KeyTooLarge { len: usize, max: usize },

    #[error("value length {len} exceeds maximum of {max} bytes")]
    ValueTooLarge { len: usize, max: usize },

    #[error("key already exists")]
    KeyExists,

    #[error("invalid address {address:#x}")]
    InvalidAddress { address: u64 },

    #[error("data corruption in {component}: page={page_num}, {details}")]
    Corruption {
        component: String,
        page_num: u64,
        details: String,
    },

    #[error("data corruption: {details}")]
    DataCorruption { details: String },

    #[error("lock poisoned: {lock_name} (another thread panicked while holding this lock)")]
    LockPoisoned { lock_name: String },

    #[error("operation terminated: {operation}")]
    Terminated { operation: String },

    #[error("invalid magic number")]
    InvalidMagic,

    #[error("unsupported file version {found} (expected {expected})")]
    InvalidVersion { found: u32, expected: u32 },

    #[error("invalid page size")]
    InvalidPageSize,

    #[error("invalid page number {page_num}")]
    InvalidPageNum { page_num: u64 },

    #[error("journal file corrupted")]
    JournalCorrupted,

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn corruption(component: &str, page_num: u64, details: impl Into<String>) -> Self {
        Error::Corruption {
            component: component.to_string(),
            page_num,
            details: details.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned {
            lock_name: "unknown".to_string(),
        }
    }
}

// Binary parsing of headers and journal records
impl From<std::array::TryFromSliceError> for Error {
    fn from(_: std::array::TryFromSliceError) -> Self {
        Error::DataCorruption {
            details: "failed to parse binary data".to_string(),
        }
    }
}

pub trait PoisonedLockExt<'a, T> {
    fn recover_poison(self) -> T;
}

impl<'a, T> PoisonedLockExt<'a, std::sync::MutexGuard<'a, T>> for std::sync::LockResult<std::sync::MutexGuard<'a, T>> {
    fn recover_poison(self) -> std::sync::MutexGuard<'a, T> {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
