use super::direct::classify_io;
use super::{output_file_name, FileRef, MediaIndexer, OutputStream, StorageBackend};
use crate::error::StorageError;
use crate::recording::SessionStamp;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const AUTHORITY: &str = "syncrec.documents";

/// Opaque document address handed out by a [`DocumentProvider`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentUri(String);

impl DocumentUri {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for DocumentUri {
    fn from(uri: String) -> Self {
        Self(uri)
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission-scoped document broker. Callers never see paths unless the
/// provider chooses to resolve one.
pub trait DocumentProvider: Send + Sync {
    fn create_document(
        &self,
        tree: &DocumentUri,
        directory: &str,
        display_name: &str,
    ) -> Result<DocumentUri, StorageError>;

    /// Low-level descriptor for writing; `None` when the provider has no backing file
    fn open_descriptor(&self, document: &DocumentUri) -> Result<Option<File>, StorageError>;

    fn resolve_path(&self, document: &DocumentUri) -> Option<PathBuf>;

    /// Remove a document created by this provider
    fn delete_document(&self, document: &DocumentUri) -> Result<(), StorageError>;
}

/// Document provider backed by a local directory, one sub-directory per tree
pub struct LocalDocumentProvider {
    root: PathBuf,
    granted: RwLock<HashSet<String>>,
}

impl LocalDocumentProvider {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            granted: RwLock::new(HashSet::new()),
        }
    }

    /// Grant write access to a tree, creating its backing directory
    pub fn grant(&self, tree: &str) -> Result<(), StorageError> {
        let dir = self.root.join(tree);
        fs::create_dir_all(&dir).map_err(|e| classify_io(&dir, e))?;
        self.granted.write().insert(tree.to_string());
        Ok(())
    }

    pub fn revoke(&self, tree: &str) {
        self.granted.write().remove(tree);
    }

    pub fn tree_uri(&self, tree: &str) -> DocumentUri {
        DocumentUri(format!("content://{}/tree/{}", AUTHORITY, tree))
    }

    /// Split `content://<authority>/tree/<tree>[/document/<rest>]`
    fn parse<'a>(&self, uri: &'a DocumentUri) -> Option<(&'a str, Option<&'a str>)> {
        let rest = uri
            .as_str()
            .strip_prefix("content://")?
            .strip_prefix(AUTHORITY)?
            .strip_prefix("/tree/")?;

        match rest.split_once("/document/") {
            Some((tree, document)) => Some((tree, Some(document))),
            None => Some((rest, None)),
        }
    }
}

impl DocumentProvider for LocalDocumentProvider {
    fn create_document(
        &self,
        tree: &DocumentUri,
        directory: &str,
        display_name: &str,
    ) -> Result<DocumentUri, StorageError> {
        let tree_name = match self.parse(tree) {
            Some((name, None)) => name,
            _ => {
                return Err(StorageError::PermissionDenied {
                    path: tree.to_string(),
                })
            }
        };

        if !self.granted.read().contains(tree_name) {
            return Err(StorageError::PermissionDenied {
                path: tree.to_string(),
            });
        }

        let dir = self.root.join(tree_name).join(directory);
        fs::create_dir_all(&dir).map_err(|e| classify_io(&dir, e))?;

        let path = dir.join(display_name);
        File::create(&path).map_err(|e| classify_io(&path, e))?;

        Ok(DocumentUri(format!(
            "{}/document/{}/{}",
            tree.as_str(),
            directory,
            display_name
        )))
    }

    fn open_descriptor(&self, document: &DocumentUri) -> Result<Option<File>, StorageError> {
        let path = match self.resolve_path(document) {
            Some(path) => path,
            None => return Ok(None),
        };

        match OpenOptions::new().write(true).truncate(true).open(&path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(classify_io(&path, e)),
        }
    }

    fn resolve_path(&self, document: &DocumentUri) -> Option<PathBuf> {
        match self.parse(document)? {
            (tree, Some(relative)) if !relative.split('/').any(|part| part == "..") => {
                Some(self.root.join(tree).join(relative))
            }
            _ => None,
        }
    }

    fn delete_document(&self, document: &DocumentUri) -> Result<(), StorageError> {
        let path = self
            .resolve_path(document)
            .ok_or_else(|| StorageError::PermissionDenied {
                path: document.to_string(),
            })?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(classify_io(&path, e)),
        }
    }
}

/// Storage backend that creates every output through a [`DocumentProvider`]
pub struct ScopedDocumentStorage {
    provider: Arc<dyn DocumentProvider>,
    tree: DocumentUri,
    indexer: Arc<dyn MediaIndexer>,
}

impl ScopedDocumentStorage {
    pub fn new(
        provider: Arc<dyn DocumentProvider>,
        tree: DocumentUri,
        indexer: Arc<dyn MediaIndexer>,
    ) -> Self {
        Self {
            provider,
            tree,
            indexer,
        }
    }

    /// Remove a document that was created but can never be written
    fn discard(&self, document: &DocumentUri) {
        if let Err(e) = self.provider.delete_document(document) {
            warn!("Failed to remove unusable document {}: {}", document, e);
        }
    }
}

impl StorageBackend for ScopedDocumentStorage {
    fn open(
        &self,
        stream: &str,
        extension: &str,
        session: &SessionStamp,
    ) -> Result<OutputStream, StorageError> {
        let name = output_file_name(session, stream, extension);
        let document = self.provider.create_document(&self.tree, &session.id(), &name)?;

        let descriptor = match self.provider.open_descriptor(&document) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                self.discard(&document);
                return Err(StorageError::DescriptorUnavailable {
                    uri: document.to_string(),
                });
            }
            Err(e) => {
                self.discard(&document);
                return Err(e);
            }
        };

        let path = self.provider.resolve_path(&document);
        if path.is_none() {
            warn!("Document {} has no local path", document);
        }
        debug!("Saving {} to {}", stream, document);

        let file_ref = FileRef {
            path,
            uri: Some(document.to_string()),
        };
        self.indexer.file_created(&file_ref);

        Ok(OutputStream {
            sink: Box::new(descriptor),
            file: file_ref,
        })
    }

    fn name(&self) -> &'static str {
        "scoped_document"
    }
}
