//! Sandboxed per-user file trees
//!
//! Every request path goes through [`security::PathResolver`] first; the
//! lister, operations and search only ever see [`security::ConfinedPath`]s.

pub mod breadcrumbs;
pub mod config;
pub mod listing;
pub mod mime;
pub mod operations;
pub mod search;
pub mod security;


use std::sync::Arc;

use config::FileSystemConfig;
use listing::DirectoryLister;
use operations::FileOperations;
use search::FileSearch;
use security::PathResolver;

pub struct FileSystemService {
    config: Arc<FileSystemConfig>,
    resolver: Arc<PathResolver>,
    lister: DirectoryLister,
    ops: FileOperations,
    search: FileSearch,
}

impl FileSystemService {
    pub fn new(config: FileSystemConfig) -> Self {
        let config = Arc::new(config);
        let resolver = Arc::new(PathResolver::new(config.clone()));
        let ops = FileOperations::new(config.clone());
        Self {
            config,
            resolver,
            lister: DirectoryLister::new(),
            ops,
            search: FileSearch::new(),
        }
    }

    pub fn config(&self) -> &FileSystemConfig {
        self.config.as_ref()
    }

    pub fn resolver(&self) -> &PathResolver {
        self.resolver.as_ref()
    }

    pub fn shared_resolver(&self) -> Arc<PathResolver> {
        self.resolver.clone()
    }

    pub fn lister(&self) -> &DirectoryLister {
        &self.lister
    }

    pub fn ops(&self) -> &FileOperations {
        &self.ops
    }

    pub fn search(&self) -> &FileSearch {
        &self.search
    }
}
