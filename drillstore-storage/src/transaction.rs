//! # Transaction Coordinator
//!
//! Lets one logical operation span several independent document writes with
//! all-or-nothing compensating rollback.
//!
//! ```text
//!   root = db.begin_transaction()        depth 1   stack [root]
//!     nested = root.nested()             depth 2   stack [root, nested]
//!       tx.insert / upsert / delete      applied now, prior image journaled
//!     drop(nested)                       depth 1
//!   root.commit()                        committed = true
//!   drop(root)                           depth 0 → committed, journal discarded
//!                                        depth 0 → not committed, journal undone
//! ```
//!
//! Writes take effect immediately; `commit` only suppresses the rollback.
//! Commit at any level counts for the whole operation. The transaction is an
//! explicit value passed to every store call, and its shared state is `Send`,
//! so a scope may move between threads.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use drillstore_core::{error::Result, EtpUri};

use crate::document::{encode, Collection, StoredDocument, WriteGuard};

/// Transaction ID type
pub type TransactionId = Uuid;

/// Compensating action run when a root scope ends uncommitted
pub trait Rollback: Send + Sync {
    fn rollback(&self, journal: Vec<JournalEntry>) -> Result<()>;
}

/// Prior image of one document write
#[derive(Debug, Clone)]
pub enum JournalEntry {
    /// The document did not exist before
    Insert { collection: String, key: String },
    /// The document was overwritten
    Replace {
        collection: String,
        key: String,
        prior: StoredDocument,
    },
    /// The document was removed
    Delete {
        collection: String,
        key: String,
        prior: StoredDocument,
    },
}

/// Outcome of a version-checked write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub version: u64,
    /// The stored version moved between read and write
    pub raced: bool,
}

/// Lifecycle of the whole operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

struct SharedState {
    root_id: TransactionId,
    depth: usize,
    stack: Vec<TransactionId>,
    committed: bool,
    completed: bool,
    context: Option<EtpUri>,
    journal: Vec<JournalEntry>,
}

/// One open scope of a logical operation
pub struct Transaction {
    id: TransactionId,
    parent: Option<TransactionId>,
    shared: Arc<Mutex<SharedState>>,
    rollback: Arc<dyn Rollback>,
    disposed: bool,
}

impl Transaction {
    /// Open a root scope
    pub fn begin(rollback: Arc<dyn Rollback>) -> Self {
        let id = Uuid::new_v4();
        debug!(transaction = %id, "Begin root transaction");
        Self {
            id,
            parent: None,
            shared: Arc::new(Mutex::new(SharedState {
                root_id: id,
                depth: 1,
                stack: vec![id],
                committed: false,
                completed: false,
                context: None,
                journal: Vec::new(),
            })),
            rollback,
            disposed: false,
        }
    }

    /// Open a scope nested inside this operation. It attaches to the same root.
    pub fn nested(&self) -> Transaction {
        let id = Uuid::new_v4();
        let parent = {
            let mut shared = self.shared.lock();
            let parent = shared.stack.last().copied();
            shared.depth += 1;
            shared.stack.push(id);
            parent
        };
        Transaction {
            id,
            parent,
            shared: Arc::clone(&self.shared),
            rollback: Arc::clone(&self.rollback),
            disposed: false,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn root_id(&self) -> TransactionId {
        self.shared.lock().root_id
    }

    /// Scope that was on top when this one opened
    pub fn parent_id(&self) -> Option<TransactionId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Number of open scopes in this operation
    pub fn depth(&self) -> usize {
        self.shared.lock().depth
    }

    pub fn is_committed(&self) -> bool {
        self.shared.lock().committed
    }

    pub fn state(&self) -> TransactionState {
        let shared = self.shared.lock();
        match (shared.completed, shared.committed) {
            (false, _) => TransactionState::Active,
            (true, true) => TransactionState::Committed,
            (true, false) => TransactionState::RolledBack,
        }
    }

    /// Associate the operation with its target object
    pub fn set_context(&self, uri: EtpUri) {
        self.shared.lock().context = Some(uri);
    }

    pub fn context(&self) -> Option<EtpUri> {
        self.shared.lock().context.clone()
    }

    /// Number of journaled writes so far
    pub fn journal_len(&self) -> usize {
        self.shared.lock().journal.len()
    }

    /// Mark the operation committed. Effects are already applied.
    pub fn commit(&self) {
        let mut shared = self.shared.lock();
        shared.committed = true;
        debug!(transaction = %self.id, root = %shared.root_id, "Commit");
    }

    /// Insert a new document, journaling its absence
    pub fn insert<T: Serialize>(&self, collection: &Collection, key: &str, document: &T) -> Result<u64> {
        let bytes = encode(document)?;
        let applied = collection.apply(key, Some(bytes), WriteGuard::MustNotExist)?;
        self.record(collection, key, applied.prior);
        Ok(applied.version)
    }

    /// Insert or replace a document
    pub fn upsert<T: Serialize>(&self, collection: &Collection, key: &str, document: &T) -> Result<u64> {
        let bytes = encode(document)?;
        let applied = collection.apply(key, Some(bytes), WriteGuard::None)?;
        self.record(collection, key, applied.prior);
        Ok(applied.version)
    }

    /// Replace a document read at `expected_version`. The write always happens;
    /// a moved version is reported so the caller can log the race.
    pub fn replace_checked<T: Serialize>(
        &self,
        collection: &Collection,
        key: &str,
        document: &T,
        expected_version: u64,
    ) -> Result<WriteOutcome> {
        let bytes = encode(document)?;
        let applied = collection.apply(key, Some(bytes), WriteGuard::ExpectVersion(expected_version))?;
        self.record(collection, key, applied.prior);
        Ok(WriteOutcome {
            version: applied.version,
            raced: applied.raced,
        })
    }

    /// Delete a document, journaling its prior image
    pub fn delete(&self, collection: &Collection, key: &str) -> Result<bool> {
        let applied = collection.apply(key, None, WriteGuard::None)?;
        let existed = applied.prior.is_some();
        if let Some(prior) = applied.prior {
            self.shared.lock().journal.push(JournalEntry::Delete {
                collection: collection.name().to_string(),
                key: key.to_string(),
                prior,
            });
        }
        Ok(existed)
    }

    fn record(&self, collection: &Collection, key: &str, prior: Option<StoredDocument>) {
        let entry = match prior {
            None => JournalEntry::Insert {
                collection: collection.name().to_string(),
                key: key.to_string(),
            },
            Some(prior) => JournalEntry::Replace {
                collection: collection.name().to_string(),
                key: key.to_string(),
                prior,
            },
        };
        self.shared.lock().journal.push(entry);
    }

    /// Close this scope and report the rollback outcome, if one ran.
    /// Dropping the scope does the same but can only log a rollback failure.
    pub fn dispose(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        let journal = {
            let mut shared = self.shared.lock();
            shared.depth = shared.depth.saturating_sub(1);
            match shared.stack.iter().rposition(|id| *id == self.id) {
                Some(pos) if pos + 1 == shared.stack.len() => {
                    shared.stack.pop();
                }
                Some(pos) => {
                    warn!(transaction = %self.id, "Scope closed out of order");
                    shared.stack.remove(pos);
                }
                None => {}
            }

            if self.is_root() {
                shared.context = None;
            }

            if shared.depth > 0 || shared.completed {
                return Ok(());
            }
            shared.completed = true;
            shared.stack.clear();
            if shared.committed {
                shared.journal.clear();
                return Ok(());
            }
            std::mem::take(&mut shared.journal)
        };

        debug!(transaction = %self.id, entries = journal.len(), "Rolling back");
        self.rollback.rollback(journal)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(transaction = %self.id, "Rollback failed: {}", e);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("depth", &self.depth())
            .field("committed", &self.is_committed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingRollback {
        calls: AtomicUsize,
    }

    impl Rollback for CountingRollback {
        fn rollback(&self, _journal: Vec<JournalEntry>) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_nested_attaches_to_root() {
        let counter = Arc::new(CountingRollback::default());
        let root = Transaction::begin(counter.clone());
        let nested = root.nested();

        assert!(root.is_root());
        assert!(!nested.is_root());
        assert_eq!(nested.parent_id(), Some(root.id()));
        assert_eq!(nested.root_id(), root.id());
        assert_eq!(root.depth(), 2);

        drop(nested);
        assert_eq!(root.depth(), 1);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_context_cleared_by_root() {
        let counter = Arc::new(CountingRollback::default());
        let root = Transaction::begin(counter.clone());
        let uri = EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)/log(l1)").unwrap();
        root.set_context(uri.clone());

        let nested = root.nested();
        assert_eq!(nested.context(), Some(uri));
        root.commit();
        drop(root);
        assert_eq!(nested.context(), None);
        assert_eq!(nested.state(), TransactionState::Active);
        drop(nested);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 0);
    }
}
