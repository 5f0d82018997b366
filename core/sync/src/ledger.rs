//! Persisted singleton documents with a private serialization point.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

use labjournal_common::{RelativePath, Result};
use labjournal_document::{codec, UserMetadata};
use labjournal_storage::DocumentStorage;

/// A document kept as a ledger.
pub trait LedgerDocument: Serialize + DeserializeOwned + Clone + Send {
    /// Name used in log output.
    const NAME: &'static str;
}

/// A ledger document and the file it is persisted to.
///
/// Updates hold the ledger's lock across mutate-encode-write, so writes to
/// one ledger are totally ordered and the file always holds the latest
/// successful update. Different ledgers never share a lock.
pub struct Ledger<T> {
    storage: Arc<dyn DocumentStorage>,
    path: RelativePath,
    doc: Mutex<T>,
}

impl LedgerDocument for UserMetadata {
    const NAME: &'static str = "user_metadata";
}

impl<T: LedgerDocument> Ledger<T> {
    /// Wrap an already loaded document without persisting it.
    pub fn new(storage: Arc<dyn DocumentStorage>, path: RelativePath, doc: T) -> Self {
        Self {
            storage,
            path,
            doc: Mutex::new(doc),
        }
    }

    /// Load the ledger at `path`, or build one with `create` and persist it.
    ///
    /// A missing, unreadable or corrupt file is treated the same way: the
    /// ledger is regenerated. This never fails; a failed initial persist is
    /// logged and retried implicitly by the next update.
    pub fn load_or_create(
        storage: Arc<dyn DocumentStorage>,
        path: RelativePath,
        create: impl FnOnce() -> T,
    ) -> Self {
        let loaded = match storage.read(&path) {
            Ok(bytes) => match codec::decode::<T>(&bytes) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!(ledger = T::NAME, error = %e, "Corrupt ledger, regenerating");
                    None
                }
            },
            Err(e) if e.is_not_found() => {
                debug!(ledger = T::NAME, "No ledger on disk, creating");
                None
            }
            Err(e) => {
                warn!(ledger = T::NAME, error = %e, "Unreadable ledger, regenerating");
                None
            }
        };

        let doc = match loaded {
            Some(doc) => doc,
            None => {
                let doc = create();
                if let Err(e) = persist(storage.as_ref(), &path, &doc) {
                    error!(ledger = T::NAME, error = %e, "Failed to persist new ledger");
                }
                doc
            }
        };

        Self::new(storage, path, doc)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        // Every persisted write is atomic, so a panicked writer cannot have
        // left the file half-written.
        self.doc.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the ledger and persist it.
    ///
    /// # Errors
    /// - Encoding or write failure; both the file and the in-memory ledger
    ///   keep their previous content
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let result = f(&mut next);
        if let Err(e) = persist(self.storage.as_ref(), &self.path, &next) {
            error!(ledger = T::NAME, error = %e, "Failed to persist ledger");
            return Err(e);
        }
        *guard = next;
        Ok(result)
    }

    /// Write the current document again, e.g. after it was migrated.
    pub fn persist(&self) -> Result<()> {
        let guard = self.lock();
        persist(self.storage.as_ref(), &self.path, &*guard).inspect_err(|e| {
            error!(ledger = T::NAME, error = %e, "Failed to persist ledger");
        })
    }

    /// Read from the ledger without persisting.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    /// Copy of the current ledger.
    pub fn snapshot(&self) -> T {
        self.lock().clone()
    }

    /// Path of the persisted ledger.
    pub fn path(&self) -> &RelativePath {
        &self.path
    }
}

fn persist<T: Serialize>(storage: &dyn DocumentStorage, path: &RelativePath, doc: &T) -> Result<()> {
    let bytes = codec::encode(doc)?;
    storage.write(path, &bytes)
}
