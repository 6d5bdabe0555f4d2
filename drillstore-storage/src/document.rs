//! # Document Database
//!
//! In-process document store the chunk store and the lifecycle manager persist
//! into.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Database                                                 │
//! │  ├── channelDataChunk   key → [version | msgpack bytes]  │
//! │  ├── dataObject         key → [version | msgpack bytes]  │
//! │  ├── dbGrowingObject    ...                              │
//! │  ├── wellbore           ...                              │
//! │  └── changeHistory      ...                              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each document write is an atomic whole-document insert, replace or delete
//! under the collection's write lock. Every write bumps the document version;
//! there is no cross-document atomicity, which is what [`Transaction`] journals
//! compensate for. The encoded length of a document is its physical size.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use drillstore_core::{
    error::{Error, Result},
    metrics::Metrics,
};

use crate::transaction::{JournalEntry, Rollback, Transaction};

/// Raw stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub version: u64,
    pub bytes: Vec<u8>,
}

/// A decoded document together with its storage metadata
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub key: String,
    pub version: u64,
    pub size: usize,
    pub document: T,
}

/// Encode a document the way it is persisted
pub fn encode<T: Serialize>(document: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(document).map_err(|e| Error::Serialization {
        message: e.to_string(),
    })
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization {
        message: e.to_string(),
    })
}

/// Physical size of a document once persisted
pub fn encoded_size<T: Serialize>(document: &T) -> Result<usize> {
    encode(document).map(|b| b.len())
}

/// Precondition checked under the write lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteGuard {
    None,
    MustNotExist,
    /// Write regardless, but report a race if the version moved
    ExpectVersion(u64),
    /// Skip the write if the version moved
    RequireVersion(u64),
}

#[derive(Debug)]
pub(crate) struct Applied {
    pub prior: Option<StoredDocument>,
    pub version: u64,
    pub raced: bool,
    pub written: bool,
}

/// Named set of documents
pub struct Collection {
    name: String,
    documents: RwLock<BTreeMap<String, StoredDocument>>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn from_documents(name: String, documents: BTreeMap<String, StoredDocument>) -> Self {
        Self {
            name,
            documents: RwLock::new(documents),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Document keys in order
    pub fn keys(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.documents.read().contains_key(key)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Versioned<T>>> {
        let stored = match self.documents.read().get(key) {
            Some(stored) => stored.clone(),
            None => return Ok(None),
        };
        Ok(Some(Versioned {
            key: key.to_string(),
            version: stored.version,
            size: stored.bytes.len(),
            document: decode(&stored.bytes)?,
        }))
    }

    /// All documents whose key starts with `prefix`, in key order
    pub fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<Versioned<T>>> {
        let snapshot: Vec<(String, StoredDocument)> = self
            .documents
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        snapshot
            .into_iter()
            .map(|(key, stored)| {
                Ok(Versioned {
                    key,
                    version: stored.version,
                    size: stored.bytes.len(),
                    document: decode(&stored.bytes)?,
                })
            })
            .collect()
    }

    /// All documents matching `predicate`
    pub fn find<T, F>(&self, predicate: F) -> Result<Vec<Versioned<T>>>
    where
        T: DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let all: Vec<Versioned<T>> = self.scan_prefix("")?;
        Ok(all.into_iter().filter(|d| predicate(&d.document)).collect())
    }

    /// Insert a new document outside any transaction
    pub fn insert<T: Serialize>(&self, key: &str, document: &T) -> Result<u64> {
        let bytes = encode(document)?;
        Ok(self.apply(key, Some(bytes), WriteGuard::MustNotExist)?.version)
    }

    /// Insert or replace a document outside any transaction
    pub fn upsert<T: Serialize>(&self, key: &str, document: &T) -> Result<u64> {
        let bytes = encode(document)?;
        Ok(self.apply(key, Some(bytes), WriteGuard::None)?.version)
    }

    /// Replace only if the stored version is still `expected`.
    /// Returns the new version, or `None` if another writer got there first.
    pub fn replace_if_version<T: Serialize>(
        &self,
        key: &str,
        document: &T,
        expected: u64,
    ) -> Result<Option<u64>> {
        let bytes = encode(document)?;
        let applied = self.apply(key, Some(bytes), WriteGuard::RequireVersion(expected))?;
        Ok(applied.written.then_some(applied.version))
    }

    /// Delete a document outside any transaction
    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.apply(key, None, WriteGuard::None)?.prior.is_some())
    }

    /// Single atomic write; `new == None` deletes.
    pub(crate) fn apply(&self, key: &str, new: Option<Vec<u8>>, guard: WriteGuard) -> Result<Applied> {
        let mut documents = self.documents.write();
        let prior = documents.get(key).cloned();
        let prior_version = prior.as_ref().map_or(0, |d| d.version);

        let mut raced = false;
        match guard {
            WriteGuard::None => {}
            WriteGuard::MustNotExist => {
                if prior.is_some() {
                    return Err(Error::invalid_operation(format!(
                        "document '{}' already exists in {}",
                        key, self.name
                    )));
                }
            }
            WriteGuard::ExpectVersion(expected) => raced = prior_version != expected,
            WriteGuard::RequireVersion(expected) => {
                if prior_version != expected {
                    return Ok(Applied {
                        prior,
                        version: prior_version,
                        raced: true,
                        written: false,
                    });
                }
            }
        }

        let version = match new {
            Some(bytes) => {
                let version = prior_version + 1;
                documents.insert(key.to_string(), StoredDocument { version, bytes });
                version
            }
            None => {
                documents.remove(key);
                prior_version
            }
        };

        Ok(Applied {
            prior,
            version,
            raced,
            written: true,
        })
    }

    /// Put back a prior image; `None` removes the key
    pub(crate) fn restore(&self, key: &str, prior: Option<StoredDocument>) {
        let mut documents = self.documents.write();
        match prior {
            Some(doc) => {
                documents.insert(key.to_string(), doc);
            }
            None => {
                documents.remove(key);
            }
        }
    }

    pub(crate) fn export(&self) -> BTreeMap<String, StoredDocument> {
        self.documents.read().clone()
    }
}

/// Set of named collections
pub struct Database {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    metrics: Metrics,
}

impl Database {
    pub fn new() -> Self {
        Self::with_metrics(Metrics::new())
    }

    pub fn with_metrics(metrics: Metrics) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub(crate) fn from_collections(collections: Vec<Collection>, metrics: Metrics) -> Self {
        let map = collections
            .into_iter()
            .map(|c| (c.name().to_string(), Arc::new(c)))
            .collect();
        Self {
            collections: RwLock::new(map),
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a collection, creating it on first use
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(collection) = self.collections.read().get(name) {
            return Arc::clone(collection);
        }
        let mut collections = self.collections.write();
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Collection::new(name))),
        )
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Open a root transaction whose rollback restores this database
    pub fn begin_transaction(self: &Arc<Self>) -> Transaction {
        Transaction::begin(Arc::clone(self) as Arc<dyn Rollback>)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Rollback for Database {
    fn rollback(&self, journal: Vec<JournalEntry>) -> Result<()> {
        let entries = journal.len();
        for entry in journal.into_iter().rev() {
            match entry {
                JournalEntry::Insert { collection, key } => {
                    self.collection(&collection).restore(&key, None);
                }
                JournalEntry::Replace {
                    collection,
                    key,
                    prior,
                }
                | JournalEntry::Delete {
                    collection,
                    key,
                    prior,
                } => {
                    self.collection(&collection).restore(&key, Some(prior));
                }
            }
        }
        self.metrics.record_rollback();
        debug!("Rolled back {} journal entries", entries);
        Ok(())
    }
}
