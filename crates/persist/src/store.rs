//! File-backed fog record persistence.
//!
//! Layout inside the data directory:
//! ```text
//! records.meta.json             - schema version
//! records/
//!   <stem>.fog.cbor.zst         - CBOR+zstd compressed record per session
//! integrity/
//!   manifest.json               - SHA-256 of every record file
//! <stem>_actors.json            - tracked actor ids per session
//! ```

use crate::key::SessionKey;
use crate::record::{FogRecord, RECORD_SCHEMA_VERSION, RecordSummary};
use fogwar_common::{TilePosition, VisibilityState};
use fogwar_kernel::{EntryError, SnapshotError, VisibilityStore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Errors from file-backed persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: file has v{file_version}, expected v{expected_version}")]
    SchemaMismatch {
        file_version: u32,
        expected_version: u32,
    },
    #[error("record saved with default state {record}, store uses {store}")]
    PolicyMismatch {
        record: VisibilityState,
        store: VisibilityState,
    },
    #[error("invalid tile entry: {0}")]
    InvalidEntry(#[from] EntryError),
    #[error("{kind} for tile {pos} has no state entry")]
    Orphan {
        pos: TilePosition,
        kind: &'static str,
    },
    #[error("snapshot for tile {pos}: {source}")]
    Snapshot {
        pos: TilePosition,
        #[source]
        source: SnapshotError,
    },
}

/// Metadata stored in records.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsMeta {
    pub record_schema_version: u32,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

impl IntegrityManifest {
    fn get(&self, filename: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.filename == filename)
    }

    fn upsert(&mut self, filename: String, sha256: String) {
        match self.entries.iter_mut().find(|e| e.filename == filename) {
            Some(entry) => entry.sha256 = sha256,
            None => self.entries.push(ManifestEntry { filename, sha256 }),
        }
    }
}

/// What a load found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(RecordSummary),
    /// No record for the key; the store was left empty.
    Missing,
}

pub struct RecordStore {
    root: PathBuf,
    meta: RecordsMeta,
    manifest: IntegrityManifest,
}

impl RecordStore {
    /// Open or create a record store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("records"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("records.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: RecordsMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.record_schema_version != RECORD_SCHEMA_VERSION {
                return Err(RecordError::SchemaMismatch {
                    file_version: meta.record_schema_version,
                    expected_version: RECORD_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = RecordsMeta {
                record_schema_version: RECORD_SCHEMA_VERSION,
            };
            let manifest = IntegrityManifest::default();
            write_json(&meta_path, &meta)?;
            write_json(&manifest_path, &manifest)?;
            (meta, manifest)
        };

        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &RecordsMeta {
        &self.meta
    }

    fn filename(key: &SessionKey) -> String {
        format!("{}.fog.cbor.zst", key.stem())
    }

    pub fn record_path(&self, key: &SessionKey) -> PathBuf {
        self.root.join("records").join(Self::filename(key))
    }

    /// Write the current contents of `store` as the record for `key`.
    pub fn save(&mut self, key: &SessionKey, store: &VisibilityStore) -> Result<RecordSummary, RecordError> {
        let record = FogRecord::capture(store)?;
        let compressed = zstd_compress(&cbor_serialize(&record)?)?;
        let hash = sha256_hex(&compressed);

        write_atomic(&self.record_path(key), &compressed)?;
        self.manifest.upsert(Self::filename(key), hash);
        self.save_manifest()?;

        let summary = record.summary();
        tracing::info!(%key, tiles = summary.tiles, bytes = compressed.len(), "fog record saved");
        Ok(summary)
    }

    /// Read and verify the record for `key` without touching any store.
    pub fn read(&self, key: &SessionKey) -> Result<Option<FogRecord>, RecordError> {
        let filename = Self::filename(key);
        let compressed = match std::fs::read(self.record_path(key)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        self.verify_file_hash(&filename, &compressed)?;

        let record: FogRecord = cbor_deserialize(&zstd_decompress(&compressed)?)?;
        record.verify()?;
        Ok(Some(record))
    }

    /// Replace the contents of `store` with the record for `key`.
    ///
    /// The store is cleared first and stays empty unless the whole record
    /// reads, verifies and validates.
    pub fn load(&self, key: &SessionKey, store: &VisibilityStore) -> Result<LoadOutcome, RecordError> {
        store.clear_all();
        let outcome = self.read(key).and_then(|record| match record {
            None => Ok(LoadOutcome::Missing),
            Some(record) => {
                let entries = record.to_entries(store.policy())?;
                store.replace_all(entries)?;
                Ok(LoadOutcome::Loaded(record.summary()))
            }
        });
        match &outcome {
            Ok(LoadOutcome::Loaded(summary)) => {
                tracing::info!(%key, tiles = summary.tiles, "fog record loaded")
            }
            Ok(LoadOutcome::Missing) => tracing::info!(%key, "no fog record, starting empty"),
            Err(err) => {
                store.clear_all();
                tracing::warn!(%key, error = %err, "fog record rejected, starting empty");
            }
        }
        outcome
    }

    pub fn remove(&mut self, key: &SessionKey) -> Result<bool, RecordError> {
        let filename = Self::filename(key);
        let existed = match std::fs::remove_file(self.record_path(key)) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        self.manifest.entries.retain(|e| e.filename != filename);
        self.save_manifest()?;
        Ok(existed)
    }

    /// Record files named in the manifest.
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.manifest.entries.iter().map(|e| e.filename.as_str())
    }

    /// Verify every record file against the manifest.
    pub fn verify_integrity(&self) -> Result<(), RecordError> {
        for entry in &self.manifest.entries {
            let data = std::fs::read(self.root.join("records").join(&entry.filename))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                return Err(RecordError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }

    fn verify_file_hash(&self, filename: &str, data: &[u8]) -> Result<(), RecordError> {
        let actual = sha256_hex(data);
        match self.manifest.get(filename) {
            Some(entry) if entry.sha256 != actual => Err(RecordError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            }),
            Some(_) => Ok(()),
            None => {
                // The body hash still guards the content.
                tracing::warn!(filename, "record file missing from manifest");
                Ok(())
            }
        }
    }

    fn save_manifest(&self) -> Result<(), RecordError> {
        write_json(&self.root.join("integrity").join("manifest.json"), &self.manifest)
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), RecordError> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

/// Write to a sibling temporary file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), RecordError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, RecordError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| RecordError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, RecordError> {
    ciborium::from_reader(data).map_err(|e| RecordError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, RecordError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, RecordError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
