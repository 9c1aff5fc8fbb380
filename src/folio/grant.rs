use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FolioError;
use crate::core::Rut;

/// A folio recorded as "in use" for one (issuer, document type) pair.
///
/// Grants form an append-only audit trail: they are created on
/// successful retrieval and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolioGrant {
    pub issuer: Rut,
    pub type_code: u16,
    pub folio: u64,
    pub granted_at: DateTime<Utc>,
}

/// Durable log of folio grants.
///
/// The store is consulted before every grant and written before the
/// folio is handed to the caller; it must survive process restarts so
/// the no-reuse invariant holds across runs.
pub trait GrantStore: Send + Sync {
    /// Append a grant. Must be durable before returning.
    fn record(&self, grant: &FolioGrant) -> Result<(), FolioError>;

    /// Highest folio granted for the pair, if any.
    fn last_granted(&self, issuer: Rut, type_code: u16) -> Result<Option<u64>, FolioError>;

    /// Whether the exact folio was already granted for the pair.
    fn is_granted(&self, issuer: Rut, type_code: u16, folio: u64) -> Result<bool, FolioError>;
}

type GrantIndex = HashMap<(Rut, u16), BTreeSet<u64>>;

/// In-memory grant log for tests and short-lived tooling. Does not
/// survive restarts.
#[derive(Debug, Default)]
pub struct MemoryGrantStore {
    index: Mutex<GrantIndex>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GrantStore for MemoryGrantStore {
    fn record(&self, grant: &FolioGrant) -> Result<(), FolioError> {
        lock(&self.index)
            .entry((grant.issuer, grant.type_code))
            .or_default()
            .insert(grant.folio);
        Ok(())
    }

    fn last_granted(&self, issuer: Rut, type_code: u16) -> Result<Option<u64>, FolioError> {
        Ok(lock(&self.index)
            .get(&(issuer, type_code))
            .and_then(|folios| folios.last().copied()))
    }

    fn is_granted(&self, issuer: Rut, type_code: u16, folio: u64) -> Result<bool, FolioError> {
        Ok(lock(&self.index)
            .get(&(issuer, type_code))
            .is_some_and(|folios| folios.contains(&folio)))
    }
}

/// Append-only grant log backed by a JSON-lines file.
///
/// Each grant is one serialized line, fsynced before `record` returns.
/// On open, the file is replayed into an in-memory index; lookups never
/// touch the disk.
#[derive(Debug)]
pub struct FileGrantStore {
    path: PathBuf,
    index: Mutex<GrantIndex>,
}

impl FileGrantStore {
    /// Open (or create) the grant log at `path` and replay it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FolioError> {
        let path = path.as_ref().to_path_buf();
        let mut index = GrantIndex::new();

        match File::open(&path) {
            Ok(file) => {
                for (number, line) in BufReader::new(file).lines().enumerate() {
                    let line = line.map_err(store_error)?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let grant: FolioGrant = serde_json::from_str(&line).map_err(|e| {
                        FolioError::Store(format!(
                            "corrupt grant log {}:{}: {e}",
                            path.display(),
                            number + 1
                        ))
                    })?;
                    index
                        .entry((grant.issuer, grant.type_code))
                        .or_default()
                        .insert(grant.folio);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(store_error(e)),
        }

        Ok(Self {
            path,
            index: Mutex::new(index),
        })
    }
}

impl GrantStore for FileGrantStore {
    fn record(&self, grant: &FolioGrant) -> Result<(), FolioError> {
        let mut index = lock(&self.index);

        let line = serde_json::to_string(grant).map_err(|e| FolioError::Store(e.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(store_error)?;
        writeln!(file, "{line}").map_err(store_error)?;
        file.sync_data().map_err(store_error)?;

        index
            .entry((grant.issuer, grant.type_code))
            .or_default()
            .insert(grant.folio);
        Ok(())
    }

    fn last_granted(&self, issuer: Rut, type_code: u16) -> Result<Option<u64>, FolioError> {
        Ok(lock(&self.index)
            .get(&(issuer, type_code))
            .and_then(|folios| folios.last().copied()))
    }

    fn is_granted(&self, issuer: Rut, type_code: u16, folio: u64) -> Result<bool, FolioError> {
        Ok(lock(&self.index)
            .get(&(issuer, type_code))
            .is_some_and(|folios| folios.contains(&folio)))
    }
}

fn store_error(e: std::io::Error) -> FolioError {
    FolioError::Store(e.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
