use super::{output_file_name, FileRef, MediaIndexer, OutputStream, StorageBackend};
use crate::error::StorageError;
use crate::recording::SessionStamp;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Writes each session into `<root>/<session id>/` on the local filesystem
pub struct DirectStorage {
    root: PathBuf,
    indexer: Arc<dyn MediaIndexer>,
}

impl DirectStorage {
    pub fn new<P: AsRef<Path>>(root: P, indexer: Arc<dyn MediaIndexer>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            indexer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub(super) fn classify_io(path: &Path, source: io::Error) -> StorageError {
    if source.kind() == io::ErrorKind::PermissionDenied {
        StorageError::PermissionDenied {
            path: path.display().to_string(),
        }
    } else {
        StorageError::NotWritable {
            path: path.display().to_string(),
            source,
        }
    }
}

impl StorageBackend for DirectStorage {
    fn open(
        &self,
        stream: &str,
        extension: &str,
        session: &SessionStamp,
    ) -> Result<OutputStream, StorageError> {
        let session_dir = self.root.join(session.id());
        fs::create_dir_all(&session_dir).map_err(|e| classify_io(&session_dir, e))?;

        let path = session_dir.join(output_file_name(session, stream, extension));
        let file = File::create(&path).map_err(|e| classify_io(&path, e))?;
        debug!("Saving {} to {}", stream, path.display());

        let file_ref = FileRef::from_path(path);
        self.indexer.file_created(&file_ref);

        Ok(OutputStream {
            sink: Box::new(file),
            file: file_ref,
        })
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}
