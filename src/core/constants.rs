pub const DEFAULT_PAGE_SIZE: usize = 4096;

pub const MIN_PAGE_SIZE: usize = 1024;

pub const MAX_PAGE_SIZE: usize = 65536;

pub const VERSION: u32 = 1;

pub const MAGIC: [u8; 4] = *b"PGST";

pub const JOURNAL_MAGIC: [u8; 4] = *b"PSJL";

pub const JOURNAL_VERSION: u32 = 1;

pub const JOURNAL_HEADER_SIZE: usize = 32;

/// type + txn id + payload length
pub const JOURNAL_ENTRY_HEADER_SIZE: usize = 1 + 8 + 4;

pub const JOURNAL_CHECKSUM_SIZE: usize = 4;

pub const DEFAULT_CACHE_SIZE: usize = 256;

pub const PAGE_HEADER_SIZE: usize = 40;

/// Fixed part of the file header before the free page list.
pub const FILE_HEADER_FIXED_SIZE: usize = 4 + 4 + 4 + 8 + 8 + 8 + 4;

// page status tags
pub const STATUS_UNUSED: u8 = 0;
pub const RECORD: u8 = 20;
pub const LOB: u8 = 21;
pub const FREE_LIST: u8 = 22;
pub const OVERFLOW: u8 = 23;

/// Chain link meaning "no page". Page 0 always holds the file header.
pub const NO_PAGE: PageNum = 0;

pub const TID_SIZE: usize = 2;
pub const LENGTH_SIZE: usize = 4;

/// Bookkeeping bytes in front of every tuple: slot id + length.
pub const TUPLE_OVERHEAD: usize = TID_SIZE + LENGTH_SIZE;

pub const INITIAL_SLOT_TABLE: u16 = 32;

pub const MAX_SLOT_ID: u16 = 0x7FFF;

/// Slot id used to address a value stored in an overflow chain.
pub const OVERFLOW_SLOT: SlotId = 1;

/// Lowest tid a record page hands out, keeping record addresses apart from
/// overflow addresses.
pub const FIRST_RECORD_SLOT: SlotId = 2;

pub const PAGE_MIN_FREE: usize = 64;

pub const DEFAULT_MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

pub const DATA_SYNC_PERIOD_MS: u64 = 15_000;

pub const MAX_OVERFLOW_CHAIN_LENGTH: usize = 250_000;

/// Number of index matches resolved per lock acquisition during range scans.
pub const SCAN_BATCH_SIZE: usize = 128;

pub type TransactionID = u64;

pub type PageNum = u64;

pub type SlotId = u16;

pub type Lsn = u64;

pub const LSN_INVALID: Lsn = 0;
