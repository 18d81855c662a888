use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::loggable::Loggable;
use crate::core::metrics::Metrics;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const JOURNAL_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TransactionID,
    pub entry: Loggable,
}

#[derive(Debug, Clone)]
struct JournalHeader {
    magic: [u8; 4],
    version: u32,
    base_lsn: Lsn,
}

impl JournalHeader {
    fn serialize(&self) -> [u8; JOURNAL_HEADER_SIZE] {
        let mut data = [0u8; JOURNAL_HEADER_SIZE];
        data[0..4].copy_from_slice(&self.magic);
        data[4..8].copy_from_slice(&self.version.to_le_bytes());
        data[8..16].copy_from_slice(&self.base_lsn.to_le_bytes());
        data
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);
        if magic != JOURNAL_MAGIC {
            return Err(Error::JournalCorrupted);
        }

        let version = u32::from_le_bytes(data[4..8].try_into()?);
        if version != JOURNAL_VERSION {
            return Err(Error::InvalidVersion { found: version, expected: JOURNAL_VERSION });
        }

        Ok(Self {
            magic,
            version,
            base_lsn: u64::from_le_bytes(data[8..16].try_into()?),
        })
    }
}

/// Append-only log of [`Loggable`] records.
///
/// A record's LSN is `base_lsn` plus its byte offset in the file, so LSNs
/// keep growing across checkpoints, which truncate the file and move
/// `base_lsn` up to the old end.
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    base_lsn: Lsn,
    /// File length including buffered, unflushed bytes.
    end_offset: u64,
    durable_lsn: Lsn,
    metrics: Arc<Metrics>,
}

impl Journal {
    pub fn path_for(store_path: &Path) -> PathBuf {
        let mut path = store_path.as_os_str().to_owned();
        path.push("-journal");
        PathBuf::from(path)
    }

    /// Opens or creates the journal next to `store_path`. A new journal
    /// starts its LSNs above `floor`.
    #[cfg_attr(not(unix), allow(unused_variables))]
    pub fn open(store_path: &Path, floor: Lsn, permissions: u32, metrics: Arc<Metrics>) -> Result<Self> {
        let path = Self::path_for(store_path);
        let is_new = !path.exists() || std::fs::metadata(&path)?.len() < JOURNAL_HEADER_SIZE as u64;

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        #[cfg(unix)]
        options.mode(permissions);
        let mut file = options.open(&path)?;

        let base_lsn = if is_new {
            let header = JournalHeader { magic: JOURNAL_MAGIC, version: JOURNAL_VERSION, base_lsn: floor };
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.serialize())?;
            file.sync_all()?;
            debug!(file = %path.display(), base_lsn = floor, "created journal");
            floor
        } else {
            let mut data = [0u8; JOURNAL_HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut data)?;
            JournalHeader::deserialize(&data)?.base_lsn
        };

        // drop a torn tail so new records are never appended behind garbage
        let (_, valid_end) = scan(&path, base_lsn)?;
        let file_len = file.metadata()?.len();
        if valid_end < file_len {
            warn!(
                file = %path.display(),
                discarded = file_len - valid_end,
                "journal has a torn or corrupt tail; truncating"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        file.seek(SeekFrom::Start(valid_end))?;
        let writer = BufWriter::with_capacity(JOURNAL_BUFFER_SIZE, file);

        Ok(Self {
            path,
            writer,
            base_lsn,
            end_offset: valid_end,
            durable_lsn: base_lsn + valid_end,
            metrics,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// LSN the next record will receive.
    pub fn end_lsn(&self) -> Lsn {
        self.base_lsn + self.end_offset
    }

    /// An LSN at least as new as every written record and older than any
    /// future one.
    pub fn current_lsn(&self) -> Lsn {
        self.end_lsn() - 1
    }

    pub fn write(&mut self, txn_id: TransactionID, entry: &Loggable) -> Result<Lsn> {
        let mut buf = Vec::with_capacity(JOURNAL_ENTRY_HEADER_SIZE + 64);
        buf.push(entry.type_id());
        buf.extend_from_slice(&txn_id.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        entry.encode(&mut buf);

        let payload_len = (buf.len() - JOURNAL_ENTRY_HEADER_SIZE) as u32;
        buf[9..13].copy_from_slice(&payload_len.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        let lsn = self.end_lsn();
        self.writer.write_all(&buf)?;
        self.end_offset += buf.len() as u64;
        self.metrics.journal_write(buf.len() as u64);

        Ok(lsn)
    }

    /// Pushes buffered records to the file; with `sync` also waits for the
    /// disk to acknowledge them.
    pub fn flush_to_log(&mut self, sync: bool) -> Result<()> {
        self.writer.flush()?;
        if sync {
            self.writer.get_ref().sync_data()?;
            self.durable_lsn = self.end_lsn();
            self.metrics.journal_flushed();
        }
        Ok(())
    }

    /// Makes every record up to and including `lsn` durable.
    pub fn flush_through(&mut self, lsn: Lsn) -> Result<()> {
        if lsn >= self.durable_lsn {
            self.flush_to_log(true)?;
        }
        Ok(())
    }

    pub fn read_all(&mut self) -> Result<Vec<LogRecord>> {
        self.writer.flush()?;
        let (records, _) = scan(&self.path, self.base_lsn)?;
        Ok(records)
    }

    pub fn records_since(&mut self, lsn: Lsn) -> Result<Vec<LogRecord>> {
        Ok(self.read_all()?.into_iter().filter(|r| r.lsn >= lsn).collect())
    }

    /// Discards all records. Callers must have written every page the
    /// records describe first.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.writer.flush()?;
        let new_base = self.end_lsn();

        let header = JournalHeader { magic: JOURNAL_MAGIC, version: JOURNAL_VERSION, base_lsn: new_base };
        let file = self.writer.get_mut();
        file.set_len(JOURNAL_HEADER_SIZE as u64)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.serialize())?;
        file.sync_all()?;

        self.base_lsn = new_base;
        self.end_offset = JOURNAL_HEADER_SIZE as u64;
        self.durable_lsn = self.end_lsn();

        self.write(0, &Loggable::Checkpoint)?;
        self.flush_to_log(false)?;

        self.metrics.checkpoint_completed();
        info!(file = %self.path.display(), base_lsn = new_base, "journal checkpoint");
        Ok(())
    }

    /// Bytes in the journal, header included.
    pub fn size(&self) -> u64 {
        self.end_offset
    }

    pub fn close(&mut self) -> Result<()> {
        self.flush_to_log(true)
    }
}

// Reads records from the start of the file until the first torn or
// checksum-failing one. Returns the records and the offset where valid data ends.
fn scan(path: &Path, base_lsn: Lsn) -> Result<(Vec<LogRecord>, u64)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::with_capacity(JOURNAL_BUFFER_SIZE, file);
    reader.seek(SeekFrom::Start(JOURNAL_HEADER_SIZE as u64))?;

    let mut records = Vec::new();
    let mut offset = JOURNAL_HEADER_SIZE as u64;
    let mut head = [0u8; JOURNAL_ENTRY_HEADER_SIZE];

    loop {
        if offset + (JOURNAL_ENTRY_HEADER_SIZE + JOURNAL_CHECKSUM_SIZE) as u64 > file_len {
            break;
        }
        if reader.read_exact(&mut head).is_err() {
            break;
        }

        let type_id = head[0];
        let txn_id = u64::from_le_bytes(head[1..9].try_into()?);
        let payload_len = u32::from_le_bytes(head[9..13].try_into()?) as u64;
        let record_len = JOURNAL_ENTRY_HEADER_SIZE as u64 + payload_len + JOURNAL_CHECKSUM_SIZE as u64;
        if offset + record_len > file_len {
            break;
        }

        let mut rest = vec![0u8; payload_len as usize + JOURNAL_CHECKSUM_SIZE];
        if reader.read_exact(&mut rest).is_err() {
            break;
        }
        let (payload, crc_bytes) = rest.split_at(payload_len as usize);
        let stored = u32::from_le_bytes(crc_bytes.try_into()?);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&head);
        hasher.update(payload);
        if hasher.finalize() != stored {
            debug!(lsn = base_lsn + offset, "journal checksum mismatch; treating as end of log");
            break;
        }

        let entry = match Loggable::decode(type_id, payload) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(lsn = base_lsn + offset, error = %e, "undecodable journal record; treating as end of log");
                break;
            }
        };

        records.push(LogRecord { lsn: base_lsn + offset, txn_id, entry });
        offset += record_len;
    }

    Ok((records, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Journal {
        Journal::open(&dir.path().join("store.db"), 0, 0o644, Arc::new(Metrics::new())).unwrap()
    }

    fn store(page: PageNum) -> Loggable {
        Loggable::StoreValue { file_id: 1, page, tid: FIRST_RECORD_SLOT, value: vec![page as u8; 10] }
    }

    #[test]
    fn test_journal_create() {
        let dir = TempDir::new().unwrap();
        let mut journal = open(&dir);
        assert!(journal.path().ends_with("store.db-journal"));
        assert_eq!(journal.end_lsn(), JOURNAL_HEADER_SIZE as u64);
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_write_read_records() {
        let dir = TempDir::new().unwrap();
        let mut journal = open(&dir);

        let lsn1 = journal.write(7, &Loggable::TxnStart).unwrap();
        let lsn2 = journal.write(7, &store(3)).unwrap();
        let lsn3 = journal.write(7, &Loggable::TxnCommit).unwrap();
        assert!(lsn1 < lsn2 && lsn2 < lsn3);

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], LogRecord { lsn: lsn2, txn_id: 7, entry: store(3) });
        assert_eq!(journal.records_since(lsn2).unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let dir = TempDir::new().unwrap();
        let lsn = {
            let mut journal = open(&dir);
            let lsn = journal.write(1, &store(5)).unwrap();
            journal.close().unwrap();
            lsn
        };

        let mut journal = open(&dir);
        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lsn, lsn);
        assert!(journal.end_lsn() > lsn);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        {
            let mut journal = open(&dir);
            journal.write(1, &store(1)).unwrap();
            journal.write(1, &store(2)).unwrap();
            journal.close().unwrap();
        }

        // chop the last record in half
        let path = Journal::path_for(&dir.path().join("store.db"));
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 8).unwrap();
        drop(file);

        let mut journal = open(&dir);
        assert_eq!(journal.read_all().unwrap().len(), 1);
        journal.write(1, &store(9)).unwrap();
        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].entry, store(9));
    }

    #[test]
    fn test_corrupt_checksum_ends_log() {
        let dir = TempDir::new().unwrap();
        {
            let mut journal = open(&dir);
            journal.write(1, &store(1)).unwrap();
            journal.write(1, &store(2)).unwrap();
            journal.close().unwrap();
        }
        let path = Journal::path_for(&dir.path().join("store.db"));
        let mut data = std::fs::read(&path).unwrap();
        let last = data.len() - 6;
        data[last] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let mut journal = open(&dir);
        assert_eq!(journal.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_checkpoint_keeps_lsns_monotonic() {
        let dir = TempDir::new().unwrap();
        let mut journal = open(&dir);

        let before = journal.write(1, &store(1)).unwrap();
        journal.checkpoint().unwrap();

        let records = journal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entry, Loggable::Checkpoint);

        let after = journal.write(2, &store(2)).unwrap();
        assert!(after > before);
        drop(journal);

        let journal = open(&dir);
        assert!(journal.end_lsn() > after);
    }

    #[test]
    fn test_new_journal_starts_above_floor() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::open(&dir.path().join("store.db"), 10_000, 0o644, Arc::new(Metrics::new())).unwrap();
        assert!(journal.current_lsn() >= 10_000);
    }
}
