//! Time-bounded run leases.
//!
//! A lease is held in two places: an in-process registry (so two runs inside
//! one process see each other without touching the disk) and a lock file
//! that other processes see too. The record is written to a temporary file
//! and hard-linked into place, so a lock file never exists half-written.
//!
//! Lock files past their expiry are reclaimed. A lock file that cannot be
//! parsed is aged by its modification time and blocks until the TTL has
//! passed since it was last written.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ui::prelude::{Level, emit};

static HELD: LazyLock<Mutex<HashMap<String, Holder>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone)]
struct Holder {
    run_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("{resource} is in use by run {holder} until {expires_at}")]
    Busy {
        resource: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Lease file {path} could not be used: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaseRecord {
    pub run_id: String,
    pub resource_key: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Exclusive ownership of a resource key. Released when dropped.
#[derive(Debug)]
pub struct Lease {
    record: LeaseRecord,
    path: PathBuf,
}

impl Lease {
    pub fn run_id(&self) -> &str {
        &self.record.run_id
    }

    #[cfg(test)]
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Ok(mut held) = HELD.lock()
            && held
                .get(&self.record.resource_key)
                .is_some_and(|h| h.run_id == self.record.run_id)
        {
            held.remove(&self.record.resource_key);
        }

        // Only remove the file if it is still ours; it may have been reclaimed.
        let still_ours = read_record(&self.path)
            .map(|record| record.run_id == self.record.run_id)
            .unwrap_or(false);
        if still_ours && let Err(err) = fs::remove_file(&self.path) {
            emit(
                Level::Warn,
                "lease.release_failed",
                &format!("Failed to remove lease file {}: {err}", self.path.display()),
                None,
            );
        }
    }
}

pub fn new_run_id() -> String {
    let random: u32 = rand::random();
    format!("run_{}_{random:08x}", Utc::now().timestamp_millis())
}

/// Lock file location for `resource_key` inside `lease_dir`.
pub fn lease_path(lease_dir: &Path, resource_key: &str) -> PathBuf {
    let digest = Sha256::digest(resource_key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    lease_dir.join(format!("{hex}.lock"))
}

pub fn acquire_lease(lease_dir: &Path, resource_key: &str, ttl: Duration) -> Result<Lease, LeaseError> {
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
    let record = LeaseRecord {
        run_id: new_run_id(),
        resource_key: resource_key.to_string(),
        pid: std::process::id(),
        acquired_at: now,
        expires_at: now + ttl,
    };

    let mut held = HELD.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(holder) = held.get(resource_key)
        && holder.expires_at > now
    {
        return Err(LeaseError::Busy {
            resource: resource_key.to_string(),
            holder: holder.run_id.clone(),
            expires_at: holder.expires_at,
        });
    }

    fs::create_dir_all(lease_dir).map_err(|source| LeaseError::Io {
        path: lease_dir.to_path_buf(),
        source,
    })?;
    let path = lease_path(lease_dir, resource_key);

    // Retries only follow a reclaim or a lock file that vanished underneath us.
    for _ in 0..3 {
        match write_new(&path, &record) {
            Ok(()) => {
                held.insert(
                    resource_key.to_string(),
                    Holder {
                        run_id: record.run_id.clone(),
                        expires_at: record.expires_at,
                    },
                );
                emit(
                    Level::Debug,
                    "lease.acquired",
                    &format!("Acquired lease {} for {resource_key}", record.run_id),
                    None,
                );
                return Ok(Lease { record, path });
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let snapshot = match fs::read(&path) {
                    Ok(contents) => contents,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(source) => return Err(LeaseError::Io { path, source }),
                };
                match inspect(&path, &snapshot, ttl, now) {
                    Occupant::Live { holder, expires_at } => {
                        return Err(LeaseError::Busy {
                            resource: resource_key.to_string(),
                            holder,
                            expires_at,
                        });
                    }
                    Occupant::Stale(reason) => {
                        emit(
                            Level::Warn,
                            "lease.reclaimed",
                            &format!("Reclaiming stale lease for {resource_key} ({reason})"),
                            None,
                        );
                        reclaim_if_unchanged(&path, &snapshot)
                            .map_err(|source| LeaseError::Io {
                                path: path.clone(),
                                source,
                            })?;
                    }
                }
            }
            Err(source) => return Err(LeaseError::Io { path, source }),
        }
    }

    let (holder, expires_at) = match fs::read(&path) {
        Ok(contents) => match inspect(&path, &contents, ttl, now) {
            Occupant::Live { holder, expires_at } => (holder, expires_at),
            Occupant::Stale(_) => ("unknown".to_string(), record.expires_at),
        },
        Err(_) => ("unknown".to_string(), record.expires_at),
    };
    Err(LeaseError::Busy {
        resource: resource_key.to_string(),
        holder,
        expires_at,
    })
}

/// What an existing lock file says about its owner.
enum Occupant {
    Live {
        holder: String,
        expires_at: DateTime<Utc>,
    },
    Stale(String),
}

fn inspect(path: &Path, contents: &[u8], ttl: chrono::Duration, now: DateTime<Utc>) -> Occupant {
    if let Ok(record) = serde_json::from_slice::<LeaseRecord>(contents) {
        return if record.expires_at > now {
            Occupant::Live {
                holder: record.run_id,
                expires_at: record.expires_at,
            }
        } else {
            Occupant::Stale(format!("expired at {}", record.expires_at))
        };
    }

    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from);
    match modified {
        Ok(modified) if modified + ttl > now => Occupant::Live {
            holder: "unknown".to_string(),
            expires_at: modified + ttl,
        },
        Ok(modified) => Occupant::Stale(format!("unreadable, last written {modified}")),
        Err(_) => Occupant::Stale("unreadable".to_string()),
    }
}

/// Remove the lock file at `path` only if it still holds `snapshot`.
///
/// The file is first renamed aside so a concurrent reclaimer cannot have its
/// fresh lock deleted; a file that changed in between is put back.
fn reclaim_if_unchanged(path: &Path, snapshot: &[u8]) -> io::Result<bool> {
    let aside = path.with_extension(format!("stale-{}", new_run_id()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    }

    let unchanged = fs::read(&aside).map(|contents| contents == snapshot);
    if !matches!(unchanged, Ok(true)) {
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
    }
    fs::remove_file(&aside)?;
    unchanged
}

fn write_new(path: &Path, record: &LeaseRecord) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(staged.as_file_mut(), record).map_err(io::Error::other)?;
    staged.as_file().sync_all()?;
    fs::hard_link(staged.path(), path)
}

fn read_record(path: &Path) -> Option<LeaseRecord> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}
