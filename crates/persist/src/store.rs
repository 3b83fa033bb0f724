//! File-backed storage.
//!
//! Layout inside the store directory, one subdirectory per label:
//! ```text
//! <label>/
//!   label.meta.json        - schema version, current table files, hash chain
//!   live/
//!     000001.cbor.zst      - CBOR+zstd full table, one file per generation
//!   archive/
//!     000001.cbor.zst
//!   changes/
//!     000001.cbor.zst      - CBOR+zstd changelog segment, one per commit
//! ```
//!
//! Data files are written before the metadata that references them. `label.meta.json` is
//! replaced through a temp file and rename, which is the commit point: a crash
//! before the rename leaves the previous state readable.

use crate::storage::{Storage, StorageError, Table, TableWrite, stage_write, validate_label};
use ledger_common::Snapshot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: u32 = 1;
const META_FILE: &str = "label.meta.json";

/// A full-table file referenced from the metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFile {
    pub filename: String,
    pub sha256: String,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Hash chain over the changelog segments, in append order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Metadata stored in `label.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMeta {
    pub schema_version: u32,
    /// Counter for live and archive file names.
    pub generation: u32,
    pub live: Option<TableFile>,
    pub archive: Option<TableFile>,
    pub changes: IntegrityManifest,
}

impl Default for LabelMeta {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generation: 0,
            live: None,
            archive: None,
            changes: IntegrityManifest::default(),
        }
    }
}

impl LabelMeta {
    fn table_file(&self, table: Table) -> Option<&TableFile> {
        match table {
            Table::Live => self.live.as_ref(),
            Table::Archive => self.archive.as_ref(),
            Table::Changes => None,
        }
    }

    fn set_table_file(&mut self, table: Table, file: TableFile) -> Option<TableFile> {
        match table {
            Table::Live => self.live.replace(file),
            Table::Archive => self.archive.replace(file),
            Table::Changes => None,
        }
    }
}

/// Storage backend keeping every label under one directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Get the path to the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the metadata of a label; a label never written has default metadata.
    pub fn meta(&self, label: &str) -> Result<LabelMeta, StorageError> {
        validate_label(label)?;
        let path = self.label_dir(label).join(META_FILE);
        if !path.exists() {
            return Ok(LabelMeta::default());
        }
        let meta: LabelMeta = serde_json::from_reader(std::fs::File::open(&path)?)?;
        if meta.schema_version != SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                file_version: meta.schema_version,
                expected_version: SCHEMA_VERSION,
            });
        }
        Ok(meta)
    }

    /// Verify the current table files and the changelog hash chain of a label.
    pub fn verify_integrity(&self, label: &str) -> Result<(), StorageError> {
        let meta = self.meta(label)?;
        for table in [Table::Live, Table::Archive] {
            if let Some(file) = meta.table_file(table) {
                self.read_verified(label, table, &file.filename, &file.sha256)?;
            }
        }

        let mut prev_hash: Option<String> = None;
        for entry in &meta.changes.entries {
            if entry.prev_hash != prev_hash {
                return Err(StorageError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            self.read_verified(label, Table::Changes, &entry.filename, &entry.sha256)?;
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    fn label_dir(&self, label: &str) -> PathBuf {
        self.root.join(label)
    }

    fn table_dir(&self, label: &str, table: Table) -> PathBuf {
        self.label_dir(label).join(table.as_str())
    }

    fn read_verified(
        &self,
        label: &str,
        table: Table,
        filename: &str,
        expected: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let data = std::fs::read(self.table_dir(label, table).join(filename))?;
        let actual = sha256_hex(&data);
        if actual != expected {
            return Err(StorageError::IntegrityMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(data)
    }

    fn load_file(
        &self,
        label: &str,
        table: Table,
        filename: &str,
        sha256: &str,
    ) -> Result<Snapshot, StorageError> {
        let compressed = self.read_verified(label, table, filename, sha256)?;
        let cbor_bytes = zstd_decompress(&compressed)?;
        cbor_deserialize(&cbor_bytes)
    }

    fn load_table(&self, label: &str, meta: &LabelMeta, table: Table) -> Result<Snapshot, StorageError> {
        if table == Table::Changes {
            let mut rows = Snapshot::new();
            for entry in &meta.changes.entries {
                rows.extend(self.load_file(label, table, &entry.filename, &entry.sha256)?);
            }
            return Ok(rows);
        }
        match meta.table_file(table) {
            Some(file) => self.load_file(label, table, &file.filename, &file.sha256),
            None => Ok(Snapshot::new()),
        }
    }

    /// Write a data file and return its name and hash.
    fn write_file(
        &self,
        label: &str,
        table: Table,
        index: u32,
        rows: &Snapshot,
    ) -> Result<TableFile, StorageError> {
        let dir = self.table_dir(label, table);
        std::fs::create_dir_all(&dir)?;
        let filename = format!("{:06}.cbor.zst", index);

        let cbor_bytes = cbor_serialize(rows)?;
        let compressed = zstd_compress(&cbor_bytes)?;
        let sha256 = sha256_hex(&compressed);
        std::fs::write(dir.join(&filename), &compressed)?;
        Ok(TableFile { filename, sha256 })
    }

    fn save_meta(&self, label: &str, meta: &LabelMeta) -> Result<(), StorageError> {
        let dir = self.label_dir(label);
        std::fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!("{META_FILE}.tmp"));
        {
            let mut file = std::fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, meta)?;
            file.flush()?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, dir.join(META_FILE))?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn read(&self, label: &str, table: Table) -> Result<Snapshot, StorageError> {
        let meta = self.meta(label)?;
        self.load_table(label, &meta, table)
    }

    fn commit(&mut self, label: &str, writes: Vec<TableWrite>) -> Result<(), StorageError> {
        let mut meta = self.meta(label)?;

        let mut staged = BTreeMap::new();
        let mut appended = Snapshot::new();
        for write in &writes {
            if !staged.contains_key(&write.table) {
                staged.insert(write.table, self.load_table(label, &meta, write.table)?);
            }
        }
        for write in writes {
            if write.table.is_append_only() {
                appended.extend(write.rows.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            stage_write(label, &mut staged, write)?;
        }

        let mut superseded = Vec::new();
        for (table, rows) in &staged {
            if table.is_append_only() {
                if appended.is_empty() {
                    continue;
                }
                let index = meta.changes.entries.len() as u32 + 1;
                let file = self.write_file(label, *table, index, &appended)?;
                let prev_hash = meta.changes.entries.last().map(|e| e.sha256.clone());
                meta.changes.entries.push(ManifestEntry {
                    filename: file.filename,
                    sha256: file.sha256,
                    prev_hash,
                });
            } else {
                meta.generation += 1;
                let file = self.write_file(label, *table, meta.generation, rows)?;
                if let Some(old) = meta.set_table_file(*table, file) {
                    superseded.push((*table, old.filename));
                }
            }
        }

        self.save_meta(label, &meta)?;

        for (table, filename) in superseded {
            let path = self.table_dir(label, table).join(&filename);
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "could not remove superseded table file");
            }
        }
        tracing::debug!(label, generation = meta.generation, segments = meta.changes.entries.len(), "committed");
        Ok(())
    }

    fn labels(&self) -> Result<Vec<String>, StorageError> {
        let mut labels = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().join(META_FILE).is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_label(name).is_ok() {
                    labels.push(name.to_string());
                }
            }
        }
        labels.sort();
        Ok(labels)
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StorageError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(data).map_err(|e| StorageError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_common::Value;

    fn rows(entries: &[(&str, Value)]) -> Snapshot {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn people() -> Snapshot {
        rows(&[
            ("abc", Value::record([("name", "Joe"), ("email", "j@x.io")])),
            ("def", Value::scalar("plain")),
        ])
    }

    #[test]
    fn unknown_label_reads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStorage::open(tmp.path().join("ledger_data")).unwrap();
        assert!(store.read("people", Table::Live).unwrap().is_empty());
        assert!(store.read("people", Table::Changes).unwrap().is_empty());
        assert_eq!(store.meta("people").unwrap(), LabelMeta::default());
        assert!(store.labels().unwrap().is_empty());
    }

    #[test]
    fn tables_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ledger_data");
        {
            let mut store = FileStorage::open(&path).unwrap();
            store
                .commit(
                    "people",
                    vec![
                        TableWrite::replace(Table::Live, people()),
                        TableWrite::append(Table::Changes, rows(&[("c1", Value::scalar("x"))])),
                    ],
                )
                .unwrap();
            store
                .write("people", Table::Changes, rows(&[("c2", Value::scalar("y"))]), false)
                .unwrap();
        }

        let store = FileStorage::open(&path).unwrap();
        assert_eq!(store.read("people", Table::Live).unwrap(), people());
        assert_eq!(store.read("people", Table::Changes).unwrap().len(), 2);
        assert_eq!(store.meta("people").unwrap().changes.entries.len(), 2);
        assert_eq!(store.labels().unwrap(), vec!["people"]);
        store.verify_integrity("people").unwrap();
    }

    #[test]
    fn replacing_a_table_drops_the_old_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStorage::open(tmp.path()).unwrap();
        store.write("people", Table::Live, people(), true).unwrap();
        store
            .write("people", Table::Live, rows(&[("x", Value::scalar("1"))]), true)
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(tmp.path().join("people").join("live"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(store.read("people", Table::Live).unwrap().len(), 1);
    }

    #[test]
    fn merge_write_keeps_other_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStorage::open(tmp.path()).unwrap();
        store.write("people", Table::Archive, people(), true).unwrap();
        store
            .write("people", Table::Archive, rows(&[("ghi", Value::scalar("new"))]), false)
            .unwrap();
        assert_eq!(store.read("people", Table::Archive).unwrap().len(), 3);
    }

    #[test]
    fn changelog_cannot_be_replaced_or_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStorage::open(tmp.path()).unwrap();
        store
            .write("people", Table::Changes, rows(&[("c1", Value::scalar("x"))]), false)
            .unwrap();
        assert!(store
            .write("people", Table::Changes, Snapshot::new(), true)
            .is_err());
        assert!(matches!(
            store.commit(
                "people",
                vec![
                    TableWrite::replace(Table::Live, people()),
                    TableWrite::append(Table::Changes, rows(&[("c1", Value::scalar("dup"))])),
                ]
            ),
            Err(StorageError::DuplicateChange { .. })
        ));
        assert!(store.read("people", Table::Live).unwrap().is_empty());
    }

    #[test]
    fn integrity_fail_closed_on_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStorage::open(tmp.path()).unwrap();
        store
            .write("people", Table::Changes, rows(&[("c1", Value::scalar("x"))]), false)
            .unwrap();

        let seg = tmp.path().join("people").join("changes").join("000001.cbor.zst");
        let mut data = std::fs::read(&seg).unwrap();
        if let Some(byte) = data.last_mut() {
            *byte ^= 0xff;
        }
        std::fs::write(&seg, &data).unwrap();

        assert!(matches!(
            store.verify_integrity("people"),
            Err(StorageError::IntegrityMismatch { .. })
        ));
        assert!(store.read("people", Table::Changes).is_err());
    }

    #[test]
    fn broken_chain_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStorage::open(tmp.path()).unwrap();
        store
            .write("people", Table::Changes, rows(&[("c1", Value::scalar("x"))]), false)
            .unwrap();
        store
            .write("people", Table::Changes, rows(&[("c2", Value::scalar("y"))]), false)
            .unwrap();

        let mut meta = store.meta("people").unwrap();
        meta.changes.entries[1].prev_hash = Some("0".repeat(64));
        store.save_meta("people", &meta).unwrap();
        assert!(store.verify_integrity("people").is_err());
    }

    #[test]
    fn schema_mismatch_fail_closed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStorage::open(tmp.path()).unwrap();
        store.write("people", Table::Live, people(), true).unwrap();

        let meta_path = tmp.path().join("people").join(META_FILE);
        let mut meta: LabelMeta =
            serde_json::from_reader(std::fs::File::open(&meta_path).unwrap()).unwrap();
        meta.schema_version = 999;
        serde_json::to_writer_pretty(std::fs::File::create(&meta_path).unwrap(), &meta).unwrap();

        assert!(matches!(
            store.read("people", Table::Live),
            Err(StorageError::SchemaMismatch {
                file_version: 999,
                ..
            })
        ));
    }

    #[test]
    fn bad_labels_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileStorage::open(tmp.path()).unwrap();
        for label in ["", "..", "a/b", "a.b"] {
            assert!(matches!(
                store.write(label, Table::Live, people(), true),
                Err(StorageError::InvalidLabel(_))
            ));
        }
    }
}
