//! Directory-backed store.
//!
//! Layout:
//!
//! ```text
//! <official_dir>/<EIP55 address>.tsml    written by the coordinator
//! <overrides_dir>/<any name>             dropped in by the user
//! ```
//!
//! The file modification time of an official document is its last-modified
//! timestamp. Override files are indexed by the contracts they declare.

use crate::indices::{official_file_name, IndexDelta, OFFICIAL_FILE_EXTENSION};
use crate::memory::{emit_delta, StoreState};
use crate::{BackingStore, ConflictingFiles, StoreChange, STORE_CHANGE_CAPACITY};
use assetdef_core::{
    Address, CachedDocument, ContentHash, Provenance, SignatureVerification, StoreError, Timestamp,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn modified_at(path: &Path) -> Option<Timestamp> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Override file names must be plain names inside the overrides directory.
fn validate_file_name(name: &str) -> Result<(), StoreError> {
    let reason = if name.is_empty() {
        Some("must not be empty")
    } else if name.starts_with('.') {
        Some("must not be hidden")
    } else if name.contains('/') || name.contains('\\') {
        Some("must not contain path separators")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(StoreError::InvalidFileName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Read every visible regular file in `dir` as UTF-8 text.
fn read_text_files(dir: &Path) -> Result<BTreeMap<String, (String, Option<Timestamp>)>, StoreError> {
    let mut files = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let entry = entry.map_err(|e| io_error(dir, e))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if name.starts_with('.') || !path.is_file() {
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(xml) => {
                files.insert(name, (xml, modified_at(&path)));
            }
            Err(err) => warn!(path = %path.display(), error = %err, "Skipping unreadable file"),
        }
    }
    Ok(files)
}

/// Backing store persisted in two directories.
#[derive(Debug)]
pub struct DiskBackingStore {
    official_dir: PathBuf,
    overrides_dir: PathBuf,
    state: RwLock<StoreState>,
    signatures: RwLock<HashMap<ContentHash, SignatureVerification>>,
    changes: broadcast::Sender<StoreChange>,
}

impl DiskBackingStore {
    /// Open (creating if needed) both directories and load their contents.
    pub fn open(
        official_dir: impl Into<PathBuf>,
        overrides_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let official_dir = official_dir.into();
        let overrides_dir = overrides_dir.into();
        fs::create_dir_all(&official_dir).map_err(|e| io_error(&official_dir, e))?;
        fs::create_dir_all(&overrides_dir).map_err(|e| io_error(&overrides_dir, e))?;

        let mut state = StoreState::default();
        for (name, (xml, last_modified)) in read_text_files(&official_dir)? {
            let address = name
                .strip_suffix(&format!(".{}", OFFICIAL_FILE_EXTENSION))
                .and_then(|stem| Address::parse(stem).ok());
            match address {
                Some(address) => {
                    state.official.insert(
                        address,
                        CachedDocument::new(address, xml, Provenance::Official, last_modified),
                    );
                }
                None => warn!(file = %name, "Ignoring official file not named after a contract"),
            }
        }
        for (name, (xml, last_modified)) in read_text_files(&overrides_dir)? {
            state.overrides.upsert(&name, xml, last_modified);
        }

        info!(
            official = state.official.len(),
            overrides = state.overrides.len(),
            dir = %official_dir.display(),
            "Disk backing store opened"
        );

        let (changes, _) = broadcast::channel(STORE_CHANGE_CAPACITY);
        Ok(Self {
            official_dir,
            overrides_dir,
            state: RwLock::new(state),
            signatures: RwLock::new(HashMap::new()),
            changes,
        })
    }

    pub fn official_dir(&self) -> &Path {
        &self.official_dir
    }

    pub fn overrides_dir(&self) -> &Path {
        &self.overrides_dir
    }

    fn official_path(&self, address: &Address) -> PathBuf {
        self.official_dir.join(official_file_name(address))
    }

    /// Write an override file and announce the change.
    pub fn add_override(&self, file_name: &str, xml: &str) -> Result<Vec<StoreChange>, StoreError> {
        validate_file_name(file_name)?;
        let path = self.overrides_dir.join(file_name);
        fs::write(&path, xml).map_err(|e| io_error(&path, e))?;
        let delta = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.overrides.upsert(file_name, xml, modified_at(&path))
        };
        Ok(emit_delta(&self.changes, &delta))
    }

    /// Delete an override file and announce the change.
    pub fn remove_override(&self, file_name: &str) -> Result<Vec<StoreChange>, StoreError> {
        validate_file_name(file_name)?;
        let path = self.overrides_dir.join(file_name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(&path, err)),
        }
        let delta = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.overrides.remove(file_name)
        };
        Ok(emit_delta(&self.changes, &delta))
    }

    /// Re-read the overrides directory and announce whatever changed.
    ///
    /// Hosts call this from their file watcher. Files are compared by content
    /// hash, so touching a file without editing it announces nothing.
    pub fn rescan_overrides(&self) -> Result<Vec<StoreChange>, StoreError> {
        let on_disk = read_text_files(&self.overrides_dir)?;
        let delta = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let bad_before = state.overrides.bad_file_names();
            let mut affected = std::collections::BTreeSet::new();

            for name in state.overrides.file_names() {
                if !on_disk.contains_key(&name) {
                    affected.extend(state.overrides.remove(&name).affected);
                }
            }
            for (name, (xml, last_modified)) in on_disk {
                affected.extend(state.overrides.upsert(&name, xml, last_modified).affected);
            }

            IndexDelta {
                affected,
                bad_files_changed: bad_before != state.overrides.bad_file_names(),
            }
        };
        debug!(
            affected = delta.affected.len(),
            bad_files_changed = delta.bad_files_changed,
            "Override directory rescanned"
        );
        Ok(emit_delta(&self.changes, &delta))
    }
}

impl BackingStore for DiskBackingStore {
    fn read_official(&self, address: &Address) -> Option<CachedDocument> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .official
            .get(address)
            .cloned()
    }

    fn read_override(&self, address: &Address) -> Option<CachedDocument> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .document_for(address)
    }

    fn write(
        &self,
        address: &Address,
        xml: &str,
        last_modified: Option<Timestamp>,
    ) -> Result<(), StoreError> {
        let path = self.official_path(address);
        // Hidden, so a crash mid-write leaves nothing the loader picks up.
        let staging = self
            .official_dir
            .join(format!(".{}.tmp", official_file_name(address)));
        fs::write(&staging, xml).map_err(|e| io_error(&staging, e))?;
        if let Some(at) = last_modified {
            let file = fs::File::options()
                .write(true)
                .open(&staging)
                .map_err(|e| io_error(&staging, e))?;
            file.set_modified(SystemTime::from(at))
                .map_err(|e| io_error(&staging, e))?;
        }
        fs::rename(&staging, &path).map_err(|e| io_error(&path, e))?;

        let stamp = last_modified.or_else(|| modified_at(&path));
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.official.insert(
            *address,
            CachedDocument::new(*address, xml, Provenance::Official, stamp),
        );
        Ok(())
    }

    fn delete(&self, address: &Address) -> Result<bool, StoreError> {
        let path = self.official_path(address);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(&path, err)),
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Ok(state.official.remove(address).is_some())
    }

    fn has_conflict(&self, address: &Address) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .has_conflict(address)
    }

    fn bad_file_names(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .overrides
            .bad_file_names()
    }

    fn conflicting_file_names(&self) -> ConflictingFiles {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .conflicting_files()
    }

    fn contracts(&self) -> Vec<Address> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contracts()
    }

    fn contracts_from_official_repo(&self) -> Vec<Address> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .official
            .keys()
            .copied()
            .collect()
    }

    fn signature_verification(&self, content_hash: &ContentHash) -> Option<SignatureVerification> {
        self.signatures
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(content_hash)
            .cloned()
    }

    fn record_signature_verification(
        &self,
        content_hash: ContentHash,
        verification: SignatureVerification,
    ) {
        self.signatures
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(content_hash, verification);
    }

    fn subscribe_changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
