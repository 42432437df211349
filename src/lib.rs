//! HTTP file server with ETag-based optimistic concurrency.
//!
//! Serves a directory tree over GET/HEAD and, unless read-only, accepts
//! PUT/DELETE guarded by If-Match / If-None-Match. The file system is the
//! only store; entity tags are derived from content on demand.

pub mod conditional;
pub mod config;
pub mod error;
pub mod etag;
pub mod handlers;
pub mod locks;
pub mod port;
pub mod routes;
pub mod server;
pub mod store;
pub mod tls;

use std::io;
use std::path::Path;
use std::sync::Arc;

pub use config::Config;
pub use error::FileServerError;

use locks::PathLocks;
use store::{ResourceStore, StoreOptions};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Store over the served root directory
    pub store: Arc<ResourceStore>,
    /// Configuration, frozen at startup
    pub config: Arc<Config>,
    /// Serializes mutations of the same path
    pub locks: Arc<PathLocks>,
}

impl AppState {
    /// Create a new AppState with the given root directory and default config.
    pub fn new(root_dir: &Path) -> io::Result<Self> {
        Self::with_config(root_dir, Config::default())
    }

    /// Create a new AppState with the given root directory and config.
    pub fn with_config(root_dir: &Path, config: Config) -> io::Result<Self> {
        let store = ResourceStore::new(
            root_dir,
            StoreOptions {
                read_only: config.read_only,
                follow_symlinks: config.follow_symlinks,
                index_file: config.index_file.clone(),
            },
        )?;

        Ok(Self {
            store: Arc::new(store),
            config: Arc::new(config),
            locks: Arc::new(PathLocks::new()),
        })
    }
}
