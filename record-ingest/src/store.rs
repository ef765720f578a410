//! File-backed record collection with an atomic, serialized append.
//!
//! Every append rewrites the whole collection: the new document is written to
//! a staging file next to the canonical one, synced, then renamed over it.
//! A reader therefore sees either the old or the new document, never a torn
//! one, and a crash before the rename leaves the canonical file untouched.

use std::{
    io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

use crate::record::{self, Record, RecordCollection};

pub const STORE_FILE_NAME: &str = "alunos.json";
pub const STAGING_FILE_NAME: &str = "alunos.tmp.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode record collection: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Owner of the store file. Nothing else in the crate touches its path.
pub struct DurableStore {
    dir: PathBuf,
    path: PathBuf,
    staging_path: PathBuf,
    // Held for the whole read-modify-write-replace cycle. Tokio's mutex is
    // FIFO, so waiting appends are served in the order they queued.
    write_lock: Mutex<()>,
}

impl DurableStore {
    /// Points a store at `data_dir`. The directory is created on first append.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let dir = data_dir.into();
        Self {
            path: dir.join(STORE_FILE_NAME),
            staging_path: dir.join(STAGING_FILE_NAME),
            dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current collection. A missing file is an empty collection.
    pub async fn load_all(&self) -> Result<RecordCollection, StoreError> {
        read_collection(&self.path).await
    }

    /// Appends one record and makes it durable before returning.
    pub async fn append(&self, record: Record) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut collection = read_collection(&self.path).await?;
        collection.push(record);
        self.stage(&collection).await?;
        self.commit().await?;

        debug!(path = %self.path.display(), records = collection.len(), "collection replaced");
        Ok(())
    }

    async fn stage(&self, collection: &RecordCollection) -> Result<(), StoreError> {
        let payload = record::encode(collection)?;

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| StoreError::io("create directory", &self.dir, err))?;

        let staging = &self.staging_path;
        let mut file = fs::File::create(staging)
            .await
            .map_err(|err| StoreError::io("create", staging, err))?;
        file.write_all(&payload)
            .await
            .map_err(|err| StoreError::io("write", staging, err))?;
        file.flush()
            .await
            .map_err(|err| StoreError::io("flush", staging, err))?;
        file.sync_all()
            .await
            .map_err(|err| StoreError::io("sync", staging, err))?;

        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        fs::rename(&self.staging_path, &self.path)
            .await
            .map_err(|err| StoreError::io("replace", &self.path, err))?;
        sync_directory(&self.dir).await;
        Ok(())
    }
}

async fn read_collection(path: &Path) -> Result<RecordCollection, StoreError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RecordCollection::new()),
        Err(err) => return Err(StoreError::io("read", path, err)),
    };

    match record::parse(&bytes) {
        Ok(collection) => Ok(collection),
        Err(err) => Ok(recover_corrupt_store(path, err)),
    }
}

/// Recovery policy for a store file that does not parse: continue from an
/// empty collection. The next successful append replaces the bad file.
fn recover_corrupt_store(path: &Path, err: serde_json::Error) -> RecordCollection {
    warn!(
        path = %path.display(),
        error = %err,
        "store file is not a valid record list, continuing with an empty collection"
    );
    RecordCollection::new()
}

#[cfg(unix)]
async fn sync_directory(dir: &Path) {
    // Persists the rename itself; the data is already synced.
    let result = match fs::File::open(dir).await {
        Ok(handle) => handle.sync_all().await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        debug!(dir = %dir.display(), error = ?err, "directory sync failed");
    }
}

#[cfg(not(unix))]
async fn sync_directory(_dir: &Path) {}
