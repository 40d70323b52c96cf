//! Output stream creation for sensor logs and session manifests.
//!
//! Two backends implement [`StorageBackend`]: [`DirectStorage`] writes to a
//! plain directory, [`ScopedDocumentStorage`] goes through a permission-scoped
//! document provider. The backend is picked once per session.

mod direct;
mod indexer;
mod scoped;

pub use direct::DirectStorage;
pub use indexer::{ChannelIndexer, MediaIndexer, NoopIndexer};
pub use scoped::{DocumentProvider, DocumentUri, LocalDocumentProvider, ScopedDocumentStorage};

use crate::config::{StorageConfig, StorageMode};
use crate::error::{Result, StorageError};
use crate::recording::SessionStamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Reference to a created output, valid after its sink is closed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: Option<PathBuf>,
    pub uri: Option<String>,
}

impl FileRef {
    pub fn from_path(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            uri: None,
        }
    }
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.uri, &self.path) {
            (Some(uri), _) => f.write_str(uri),
            (None, Some(path)) => write!(f, "{}", path.display()),
            (None, None) => f.write_str("<unresolved>"),
        }
    }
}

/// A freshly opened output: the writable sink and where it lives
pub struct OutputStream {
    pub sink: Box<dyn Write + Send>,
    pub file: FileRef,
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

pub trait StorageBackend: Send + Sync {
    /// Create an output for `stream` (e.g. a sensor short name) within a session
    fn open(
        &self,
        stream: &str,
        extension: &str,
        session: &SessionStamp,
    ) -> std::result::Result<OutputStream, StorageError>;

    fn name(&self) -> &'static str;
}

/// File name shared by both backends: `<session>_<stream>.<ext>`
pub(crate) fn output_file_name(session: &SessionStamp, stream: &str, extension: &str) -> String {
    format!("{}_{}.{}", session.id(), stream, extension)
}

/// Build the backend selected by configuration
pub fn build_backend(
    config: &StorageConfig,
    indexer: Arc<dyn MediaIndexer>,
) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config.backend {
        StorageMode::Direct => Arc::new(DirectStorage::new(&config.path, indexer)),
        StorageMode::ScopedDocument => {
            let provider = LocalDocumentProvider::new(&config.document_root);
            provider.grant(&config.document_tree)?;
            let tree = provider.tree_uri(&config.document_tree);
            Arc::new(ScopedDocumentStorage::new(Arc::new(provider), tree, indexer))
        }
    };

    info!("Using {} storage backend", backend.name());
    Ok(backend)
}
