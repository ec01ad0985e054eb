use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::StorageError;
use crate::model::{AccountId, LedgerRecord};

/// Shared append-only transaction ledger.
///
/// Each committed effect is one `tx_id,account,kind,amount,timestamp` line.
/// Several worker processes append to the same file; all records of a
/// commit go out in a single `O_APPEND` write so they never interleave.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, records: &[LedgerRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for record in records {
            writer
                .serialize(record)
                .map_err(|source| self.csv_error(source))?;
        }
        let buf = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        file.write_all(&buf).map_err(|source| self.io_error(source))?;
        file.sync_data().map_err(|source| self.io_error(source))?;
        Ok(())
    }

    /// Most recent records of `account`, newest first, at most `limit`.
    pub fn history(
        &self,
        account: AccountId,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(&self.path)
            .map_err(|source| self.csv_error(source))?;

        let mut matching = Vec::new();
        for (idx, result) in reader.deserialize::<LedgerRecord>().enumerate() {
            match result {
                Ok(record) if record.account == account => matching.push(record),
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %self.path.display(), line = idx + 1, reason = %e, "ledger line skipped");
                }
            }
        }

        Ok(matching.into_iter().rev().take(limit).collect())
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> StorageError {
        StorageError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{EffectKind, TxId};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(tx: &str, account: AccountId, kind: EffectKind, cents: i64, second: u32) -> LedgerRecord {
        LedgerRecord {
            tx_id: TxId::from(tx),
            account,
            kind,
            amount: Amount::from_scaled(cents),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, second).unwrap(),
        }
    }

    #[test]
    fn append_writes_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("db/ledger.csv"));

        ledger
            .append(&[
                record("t1", 1000, EffectKind::Debit, 5_000, 0),
                record("t1", 1001, EffectKind::Credit, 5_000, 0),
            ])
            .unwrap();

        let text = fs::read_to_string(ledger.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("t1,1000,debit,50"));
        assert!(lines[1].starts_with("t1,1001,credit,50"));
    }

    #[test]
    fn appends_never_rewrite_existing_records() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("ledger.csv"));

        ledger.append(&[record("t1", 7, EffectKind::Create, 10_000, 0)]).unwrap();
        let before = fs::read_to_string(ledger.path()).unwrap();
        ledger.append(&[record("t2", 7, EffectKind::Delete, 10_000, 1)]).unwrap();
        let after = fs::read_to_string(ledger.path()).unwrap();

        assert!(after.starts_with(&before));
        assert_eq!(after.lines().count(), 2);
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("ledger.csv"));
        ledger
            .append(&[
                record("t1", 1000, EffectKind::Create, 50_000, 0),
                record("t2", 2000, EffectKind::Create, 10_000, 1),
                record("t3", 1000, EffectKind::Debit, 5_000, 2),
                record("t4", 1000, EffectKind::Credit, 125, 3),
            ])
            .unwrap();

        let history = ledger.history(1000, 2).unwrap();
        assert_eq!(
            history,
            vec![
                record("t4", 1000, EffectKind::Credit, 125, 3),
                record("t3", 1000, EffectKind::Debit, 5_000, 2),
            ]
        );
        assert_eq!(ledger.history(1000, 20).unwrap().len(), 3);
        assert!(ledger.history(3000, 20).unwrap().is_empty());
    }

    #[test]
    fn history_of_missing_ledger_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("none.csv"));
        assert!(ledger.history(1, 10).unwrap().is_empty());
    }

    #[test]
    fn empty_append_does_not_create_file() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path().join("ledger.csv"));
        ledger.append(&[]).unwrap();
        assert!(!ledger.path().exists());
    }
}
