use chrono::NaiveDate;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::StorageError;
use crate::Amount;
use crate::model::{Account, AccountId, ClientId};

/// Balance snapshot of one replica.
///
/// One line per account: `account_id,balance`, optionally extended with
/// `,owner_client_id,opened_on`. The file is replaced atomically on every
/// store, so readers only ever see a complete state.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all accounts. A missing file is created empty; unparsable lines
    /// are skipped.
    pub fn load(&self) -> Result<Vec<Account>, StorageError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "snapshot not found, starting empty");
            self.create_empty()?;
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|source| self.csv_error(source))?;

        let mut accounts = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let line = idx + 1;
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %self.path.display(), line, reason = %e, "snapshot line skipped");
                    continue;
                }
            };
            match parse_record(&record) {
                Some(account) => accounts.push(account),
                None => {
                    warn!(path = %self.path.display(), line, record = ?record, "snapshot line skipped");
                }
            }
        }

        info!(path = %self.path.display(), accounts = accounts.len(), "snapshot loaded");
        Ok(accounts)
    }

    /// Atomically replace the snapshot with `accounts`: write a sibling
    /// temporary file, sync it, then rename it over the old one.
    pub fn store<'a>(
        &self,
        accounts: impl IntoIterator<Item = &'a Account>,
    ) -> Result<(), StorageError> {
        let dir = self.parent_dir();
        fs::create_dir_all(dir).map_err(|source| self.io_error(source))?;

        let tmp = NamedTempFile::new_in(dir).map_err(|source| self.io_error(source))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(tmp);

        for account in accounts {
            let id = account.id.to_string();
            let balance = account.balance.to_string();
            let result = match (account.owner, account.opened_on) {
                (None, None) => writer.write_record([id, balance]),
                (owner, opened_on) => writer.write_record([
                    id,
                    balance,
                    owner.map(|o| o.to_string()).unwrap_or_default(),
                    opened_on.map(|d| d.to_string()).unwrap_or_default(),
                ]),
            };
            result.map_err(|source| self.csv_error(source))?;
        }

        let mut tmp = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;
        tmp.flush().map_err(|source| self.io_error(source))?;
        tmp.as_file()
            .sync_all()
            .map_err(|source| self.io_error(source))?;
        tmp.persist(&self.path).map_err(|source| StorageError::Persist {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    fn create_empty(&self) -> Result<(), StorageError> {
        fs::create_dir_all(self.parent_dir()).map_err(|source| self.io_error(source))?;
        fs::File::create(&self.path).map_err(|source| self.io_error(source))?;
        Ok(())
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
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

fn parse_record(record: &csv::StringRecord) -> Option<Account> {
    if record.len() != 2 && record.len() != 4 {
        return None;
    }
    let id: AccountId = record.get(0)?.parse().ok()?;
    let balance: Amount = record.get(1)?.parse().ok()?;
    let owner = optional::<ClientId>(record.get(2))?;
    let opened_on = optional::<NaiveDate>(record.get(3))?;
    Some(Account {
        id,
        balance,
        owner,
        opened_on,
    })
}

/// `Some(None)` for an absent or empty field, `None` when present but invalid.
fn optional<T: std::str::FromStr>(field: Option<&str>) -> Option<Option<T>> {
    match field {
        None | Some("") => Some(None),
        Some(value) => value.parse().ok().map(Some),
    }
}
