//! # Snapshots
//!
//! Saves a [`Database`] to a directory and loads it back.
//!
//! ```text
//! data_dir/
//! ├── MANIFEST                        JSON: format version, generation, one entry per collection
//! ├── channelDataChunk.000002.rmp     MessagePack map key → {version, bytes}
//! ├── dataObject.000002.rmp
//! └── ...
//! ```
//!
//! Each save writes a new generation of collection files, renames the manifest
//! into place and only then removes files the new manifest does not name. The
//! manifest in place always points at a complete generation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use drillstore_core::{
    error::{Error, Result, ResultExt},
    metrics::Metrics,
    Timestamp,
};

use crate::document::{Collection, Database, StoredDocument};

pub const MANIFEST_FILE: &str = "MANIFEST";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub format_version: u32,
    #[serde(default)]
    pub generation: u64,
    pub created_at: Timestamp,
    pub collections: Vec<CollectionManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionManifestEntry {
    pub name: String,
    pub file: PathBuf,
    pub documents: usize,
    pub size: u64,
}

/// True if `dir` holds a snapshot
pub fn exists(dir: &Path) -> bool {
    dir.join(MANIFEST_FILE).is_file()
}

/// File holding `collection` for a given save generation
pub fn collection_file(collection: &str, generation: u64) -> PathBuf {
    PathBuf::from(format!("{}.{:06}.rmp", collection, generation))
}

fn read_manifest(dir: &Path) -> Result<SnapshotManifest> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest: SnapshotManifest = serde_json::from_slice(&fs::read(&manifest_path)?)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::Configuration {
            message: format!("unsupported snapshot format {}", manifest.format_version),
        });
    }
    Ok(manifest)
}

/// Remove collection files the current manifest does not reference
fn remove_stale(dir: &Path, manifest: &SnapshotManifest) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(true, |ext| ext != "rmp") {
            continue;
        }
        let referenced = path
            .file_name()
            .map_or(false, |name| manifest.collections.iter().any(|c| c.file.as_os_str() == name));
        if !referenced {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn save(db: &Database, dir: &Path) -> Result<SnapshotManifest> {
    fs::create_dir_all(dir)?;
    let generation = if exists(dir) {
        read_manifest(dir)?.generation + 1
    } else {
        1
    };

    let mut entries = Vec::new();
    for name in db.collection_names() {
        let documents = db.collection(&name).export();
        let bytes = rmp_serde::to_vec_named(&documents).map_err(|e| Error::Serialization {
            message: format!("collection {}: {}", name, e),
        })?;
        let file = collection_file(&name, generation);
        write_atomic(&dir.join(&file), &bytes)?;
        debug!(collection = %name, documents = documents.len(), bytes = bytes.len(), "Saved collection");

        entries.push(CollectionManifestEntry {
            name,
            file,
            documents: documents.len(),
            size: bytes.len() as u64,
        });
    }

    let manifest = SnapshotManifest {
        format_version: FORMAT_VERSION,
        generation,
        created_at: Utc::now(),
        collections: entries,
    };
    let json = serde_json::to_vec_pretty(&manifest)?;
    write_atomic(&dir.join(MANIFEST_FILE), &json)?;
    let removed = remove_stale(dir, &manifest)?;

    info!(
        dir = %dir.display(),
        generation,
        collections = manifest.collections.len(),
        removed,
        "Snapshot saved"
    );
    Ok(manifest)
}

pub fn load(dir: &Path, metrics: Metrics) -> Result<Database> {
    if !exists(dir) {
        return Err(Error::NotFound {
            uri: dir.join(MANIFEST_FILE).display().to_string(),
        });
    }
    let manifest = read_manifest(dir)?;

    let mut collections = Vec::with_capacity(manifest.collections.len());
    for entry in &manifest.collections {
        let path = dir.join(&entry.file);
        let bytes = fs::read(&path)
            .map_err(Error::from)
            .with_context(|| format!("reading {}", path.display()))?;
        let documents: BTreeMap<String, StoredDocument> =
            rmp_serde::from_slice(&bytes).map_err(|e| Error::Serialization {
                message: format!("collection {}: {}", entry.name, e),
            })?;
        if documents.len() != entry.documents {
            return Err(Error::Internal {
                message: format!(
                    "collection {} holds {} documents, manifest says {}",
                    entry.name,
                    documents.len(),
                    entry.documents
                ),
            });
        }
        collections.push(Collection::from_documents(entry.name.clone(), documents));
    }

    info!(
        dir = %dir.display(),
        generation = manifest.generation,
        collections = collections.len(),
        "Snapshot loaded"
    );
    Ok(Database::from_collections(collections, metrics))
}
