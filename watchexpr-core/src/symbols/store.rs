//! Database lifecycle
//!
//! One writer rebuilds the database from a symbol file while readers keep
//! whatever `Arc<TypeDatabase>` snapshot they already fetched. A snapshot is
//! only handed out in the `Ready` state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::TypeDatabase;
use crate::dwarf::{build_database, BuildOptions, DebugInfoProvider, DwarfError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    NotLoaded,
    Loading,
    Ready,
    Failed { kind: String, message: String },
    Aborted,
}

/// What happens to the current database when a reload fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Clear,
    Retain,
}

#[derive(Debug)]
struct Published {
    state: LoadState,
    database: Option<Arc<TypeDatabase>>,
    path: Option<PathBuf>,
}

pub struct SymbolStore {
    provider: Box<dyn DebugInfoProvider>,
    options: BuildOptions,
    failure_policy: FailurePolicy,
    published: RwLock<Published>,
    /// Serializes loads
    loading: Mutex<()>,
    abort: AtomicBool,
}

impl SymbolStore {
    pub fn new(provider: Box<dyn DebugInfoProvider>) -> Self {
        Self {
            provider,
            options: BuildOptions::default(),
            failure_policy: FailurePolicy::default(),
            published: RwLock::new(Published {
                state: LoadState::NotLoaded,
                database: None,
                path: None,
            }),
            loading: Mutex::new(()),
            abort: AtomicBool::new(false),
        }
    }

    pub fn with_build_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Published> {
        self.published.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Published> {
        self.published.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LoadState {
        self.read().state.clone()
    }

    pub fn last_path(&self) -> Option<PathBuf> {
        self.read().path.clone()
    }

    /// The published database; `NotLoaded` unless the store is `Ready`
    pub fn snapshot(&self) -> Result<Arc<TypeDatabase>, DwarfError> {
        let published = self.read();
        match (&published.state, &published.database) {
            (LoadState::Ready, Some(db)) => Ok(Arc::clone(db)),
            _ => Err(DwarfError::NotLoaded),
        }
    }

    /// Publish a database built elsewhere
    pub fn install(&self, database: TypeDatabase) -> Arc<TypeDatabase> {
        let _guard = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        let database = Arc::new(database);
        let mut published = self.write();
        published.database = Some(Arc::clone(&database));
        published.state = LoadState::Ready;
        database
    }

    /// Publish `Loading` for `path` ahead of a `load` that runs on another thread
    pub fn begin_load(&self, path: &Path) {
        let mut published = self.write();
        published.state = LoadState::Loading;
        published.path = Some(path.to_path_buf());
    }

    /// Rebuild the database from `path`. Blocks while another load runs.
    pub fn load(&self, path: &Path) -> Result<Arc<TypeDatabase>, DwarfError> {
        let _guard = self.loading.lock().unwrap_or_else(PoisonError::into_inner);
        self.begin_load(path);

        info!("Loading symbols from {}", path.display());
        let result = self.provider.read(path).and_then(|debug_info| {
            build_database(&debug_info, &self.options, Some(&self.abort))
        });
        self.publish(path, result)
    }

    /// Reload the last symbol file
    pub fn refresh(&self) -> Result<Arc<TypeDatabase>, DwarfError> {
        let path = self.last_path().ok_or(DwarfError::NotLoaded)?;
        self.load(&path)
    }

    /// Ask a running load to stop at the next unit boundary.
    /// Returns whether a load was in progress.
    pub fn abort(&self) -> bool {
        // Set under the read lock so `publish` cannot clear it first
        let published = self.read();
        let loading = published.state == LoadState::Loading;
        if loading {
            info!("Aborting symbol load");
            self.abort.store(true, Ordering::Relaxed);
        }
        loading
    }

    fn publish(
        &self,
        path: &Path,
        result: Result<TypeDatabase, DwarfError>,
    ) -> Result<Arc<TypeDatabase>, DwarfError> {
        let mut published = self.write();
        self.abort.store(false, Ordering::Relaxed);
        match result {
            Ok(database) => {
                info!(
                    "Symbols ready from {}: {} symbols, {} types",
                    path.display(),
                    database.symbol_count(),
                    database.type_count()
                );
                let database = Arc::new(database);
                published.database = Some(Arc::clone(&database));
                published.state = LoadState::Ready;
                Ok(database)
            }
            Err(DwarfError::Aborted) => {
                published.database = None;
                published.state = LoadState::Aborted;
                Err(DwarfError::Aborted)
            }
            Err(err) => {
                warn!("Failed to load symbols from {}: {}", path.display(), err);
                match self.failure_policy {
                    FailurePolicy::Retain if published.database.is_some() => {
                        published.state = LoadState::Ready;
                    }
                    _ => {
                        published.database = None;
                        published.state = LoadState::Failed {
                            kind: err.kind().to_string(),
                            message: err.to_string(),
                        };
                    }
                }
                Err(err)
            }
        }
    }
}
