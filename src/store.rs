//! File-system backed resource store.
//!
//! Every request path is resolved against the root before any file-system
//! call is made. Low-level IO errors are translated into
//! [`FileServerError`] here and nowhere else.

use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::error::FileServerError;
use crate::etag::{self, ETag};

const HASH_CHUNK_SIZE: usize = 64 * 1024;
const TEMP_PREFIX: &str = ".tagserve-";

/// Behaviour switches for a [`ResourceStore`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub read_only: bool,
    /// Allow symlinks whose target lies outside the root (reads only).
    pub follow_symlinks: bool,
    /// File served for GET/HEAD on a directory.
    pub index_file: Option<String>,
}

/// A request path that passed root containment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The decoded request path, used in messages.
    pub request_path: String,
    /// Absolute path inside the root, built without following symlinks.
    pub path: PathBuf,
    /// The canonical target lies outside the root through a symlink.
    pub escapes_root: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Missing,
    File,
    Directory,
}

/// Metadata view of a resource.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub kind: EntryKind,
    pub len: u64,
    pub last_modified: Option<SystemTime>,
    pub content_type: String,
    /// Present only for existing files when requested.
    pub etag: Option<ETag>,
}

impl ResourceState {
    fn missing(content_type: String) -> Self {
        Self {
            kind: EntryKind::Missing,
            len: 0,
            last_modified: None,
            content_type,
            etag: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// A fully read resource.
#[derive(Debug, Clone)]
pub struct Resource {
    pub content: Bytes,
    pub content_type: String,
    pub last_modified: Option<SystemTime>,
    pub etag: ETag,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub etag: ETag,
    /// No file existed at the path before the write.
    pub created: bool,
}

pub struct ResourceStore {
    root: PathBuf,
    options: StoreOptions,
}

impl ResourceStore {
    /// Open a store over `root`, which must be an existing directory.
    pub fn new(root: &Path, options: StoreOptions) -> io::Result<Self> {
        let root = root.canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("root path is not a directory: {}", root.display()),
            ));
        }

        Ok(Self { root, options })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_read_only(&self) -> bool {
        self.options.read_only
    }

    /// Resolve a decoded request path and enforce root containment.
    pub async fn resolve(&self, request_path: &str) -> Result<ResolvedPath, FileServerError> {
        let path = normalize(&self.root, request_path)?;
        let escapes_root = self.escapes_root(&path).await;

        if escapes_root && !self.options.follow_symlinks {
            warn!(
                "Symlink escape attempt: {:?} resolves outside {:?}",
                request_path, self.root
            );
            return Err(FileServerError::Forbidden);
        }

        Ok(ResolvedPath {
            request_path: request_path.to_string(),
            path,
            escapes_root,
        })
    }

    /// Canonicalize the deepest existing ancestor of `path` and test it
    /// against the root.
    async fn escapes_root(&self, path: &Path) -> bool {
        let mut probe = path.to_path_buf();
        loop {
            if let Ok(canonical) = fs::canonicalize(&probe).await {
                return !canonical.starts_with(&self.root);
            }
            if probe == self.root || !probe.pop() {
                return false;
            }
        }
    }

    /// Map a directory onto its index file. Fails with `NotFound` when the
    /// path is missing or is a directory without an index.
    pub async fn locate(&self, target: ResolvedPath) -> Result<ResolvedPath, FileServerError> {
        let metadata = fs::metadata(&target.path)
            .await
            .map_err(|err| map_io(err, &target.request_path))?;

        if !metadata.is_dir() {
            return Ok(target);
        }

        if target.escapes_root {
            return Err(FileServerError::Forbidden);
        }

        let Some(index) = &self.options.index_file else {
            return Err(FileServerError::NotFound(target.request_path));
        };

        let index_path = target.path.join(index);
        let index_target = ResolvedPath {
            request_path: format!("{}/{}", target.request_path.trim_end_matches('/'), index),
            escapes_root: self.escapes_root(&index_path).await,
            path: index_path,
        };

        if index_target.escapes_root && !self.options.follow_symlinks {
            return Err(FileServerError::Forbidden);
        }

        match fs::metadata(&index_target.path).await {
            Ok(meta) if meta.is_file() => Ok(index_target),
            _ => Err(FileServerError::NotFound(target.request_path)),
        }
    }

    /// Load metadata, hashing the content only when `with_etag` is set.
    pub async fn stat(
        &self,
        target: &ResolvedPath,
        with_etag: bool,
    ) -> Result<ResourceState, FileServerError> {
        let content_type = content_type_for(&target.path);
        let metadata = match fs::metadata(&target.path).await {
            Ok(metadata) => metadata,
            Err(err) if is_missing(&err) => return Ok(ResourceState::missing(content_type)),
            Err(err) => return Err(map_io(err, &target.request_path)),
        };

        if target.escapes_root && !metadata.is_file() {
            return Err(FileServerError::Forbidden);
        }

        if metadata.is_dir() {
            return Ok(ResourceState {
                kind: EntryKind::Directory,
                len: 0,
                last_modified: metadata.modified().ok(),
                content_type,
                etag: None,
            });
        }

        let etag = if with_etag {
            Some(hash_file(&target.path).await.map_err(|err| map_io(err, &target.request_path))?)
        } else {
            None
        };

        Ok(ResourceState {
            kind: EntryKind::File,
            len: metadata.len(),
            last_modified: metadata.modified().ok(),
            content_type,
            etag,
        })
    }

    /// Read the full content of a resource.
    pub async fn read(&self, target: &ResolvedPath) -> Result<Resource, FileServerError> {
        let target = self.locate(target.clone()).await?;
        let metadata = fs::metadata(&target.path)
            .await
            .map_err(|err| map_io(err, &target.request_path))?;

        if target.escapes_root && !metadata.is_file() {
            return Err(FileServerError::Forbidden);
        }

        debug!("Reading file: {}", target.path.display());
        let content = fs::read(&target.path)
            .await
            .map_err(|err| map_io(err, &target.request_path))?;

        let etag = etag::compute(&content);
        Ok(Resource {
            content: Bytes::from(content),
            content_type: content_type_for(&target.path),
            last_modified: metadata.modified().ok(),
            etag,
        })
    }

    /// Atomically replace the content at `target`, creating parent
    /// directories as needed.
    pub async fn write(
        &self,
        target: &ResolvedPath,
        content: Bytes,
    ) -> Result<WriteOutcome, FileServerError> {
        if self.options.read_only {
            return Err(FileServerError::ReadOnly);
        }
        if target.escapes_root {
            warn!("Refusing to write through escaping symlink: {:?}", target.path);
            return Err(FileServerError::Forbidden);
        }

        let created = match fs::symlink_metadata(&target.path).await {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                warn!("Refusing to overwrite symlink: {:?}", target.path);
                return Err(FileServerError::Forbidden);
            }
            Ok(metadata) if metadata.is_dir() => {
                return Err(FileServerError::InvalidOperation(format!(
                    "{} is a directory",
                    target.request_path
                )));
            }
            Ok(_) => false,
            Err(err) if is_missing(&err) => true,
            Err(err) => return Err(map_io(err, &target.request_path)),
        };

        let parent = target
            .path
            .parent()
            .filter(|parent| parent.starts_with(&self.root))
            .ok_or(FileServerError::Forbidden)?
            .to_path_buf();
        self.ensure_parent(&parent, &target.request_path).await?;

        info!(
            "Writing file: {} ({} bytes)",
            target.path.display(),
            content.len()
        );

        let etag = etag::compute(&content);
        let dest = target.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&parent, &dest, &content))
            .await
            .map_err(io::Error::other)?
            .map_err(|err| map_io(err, &target.request_path))?;

        Ok(WriteOutcome { etag, created })
    }

    /// Create missing parent directories. An existing non-directory
    /// ancestor makes the write impossible.
    async fn ensure_parent(&self, parent: &Path, request_path: &str) -> Result<(), FileServerError> {
        let mut ancestor = parent.to_path_buf();
        loop {
            match fs::metadata(&ancestor).await {
                Ok(metadata) if metadata.is_dir() => break,
                Ok(_) => {
                    return Err(FileServerError::InvalidOperation(format!(
                        "parent of {} is not a directory",
                        request_path
                    )));
                }
                Err(err) if ancestor == self.root => return Err(map_io(err, request_path)),
                Err(_) => {
                    ancestor.pop();
                }
            }
        }

        if ancestor != parent {
            debug!("Creating directories: {}", parent.display());
            fs::create_dir_all(parent)
                .await
                .map_err(|err| map_io(err, request_path))?;
        }
        Ok(())
    }

    /// Remove a single file.
    pub async fn delete(&self, target: &ResolvedPath) -> Result<(), FileServerError> {
        if self.options.read_only {
            return Err(FileServerError::ReadOnly);
        }
        if target.escapes_root {
            warn!("Refusing to delete through escaping symlink: {:?}", target.path);
            return Err(FileServerError::Forbidden);
        }

        let metadata = fs::symlink_metadata(&target.path)
            .await
            .map_err(|err| map_io(err, &target.request_path))?;

        if metadata.is_dir() {
            return Err(FileServerError::InvalidOperation(format!(
                "{} is a directory",
                target.request_path
            )));
        }

        info!("Deleting: {}", target.path.display());
        fs::remove_file(&target.path)
            .await
            .map_err(|err| map_io(err, &target.request_path))
    }
}

/// Build an absolute path under `root` from a request path without touching
/// the file system. `..` may not climb above the root.
fn normalize(root: &Path, relative: &str) -> Result<PathBuf, FileServerError> {
    if relative.contains('\0') {
        warn!("Path contains null byte: {:?}", relative);
        return Err(FileServerError::Forbidden);
    }

    let mut parts = Vec::new();
    for component in Path::new(relative.trim_start_matches('/')).components() {
        match component {
            Component::Normal(name) => parts.push(name),
            Component::CurDir => continue,
            Component::ParentDir => {
                if parts.pop().is_none() {
                    warn!("Path traversal attempt detected: {:?}", relative);
                    return Err(FileServerError::Forbidden);
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                warn!("Absolute path component in request path: {:?}", relative);
                return Err(FileServerError::Forbidden);
            }
        }
    }

    let mut result = root.to_path_buf();
    result.extend(parts);
    Ok(result)
}

/// Write into a temp file beside `dest` and rename it into place. The temp
/// file is removed on every failure path when it is dropped.
fn write_atomic(parent: &Path, dest: &Path, content: &[u8]) -> io::Result<()> {
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(dest).map_err(|err| err.error)?;
    Ok(())
}

async fn hash_file(path: &Path) -> io::Result<ETag> {
    let mut file = fs::File::open(path).await?;
    let mut hasher = etag::Hasher::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finish())
}

pub fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

fn is_missing(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

fn map_io(err: io::Error, request_path: &str) -> FileServerError {
    if is_missing(&err) {
        FileServerError::NotFound(request_path.to_string())
    } else {
        FileServerError::Io(err)
    }
}
